//! # BondRPC
//!
//! The wire contract shared by both ends of a bond channel.
//!
//! ## Layout
//!
//! - `message`: the envelope every frame travels in, plus the message id
//!   namespace that keeps control traffic apart from application traffic.
//! - `control`: payloads of the interface control sub-protocol
//!   (version query and version requirement).
//! - `handshake`: the two frames exchanged before any envelope is sent.
//! - `payload`: the typed encode/decode seam used by all of the above.

pub mod control;
pub mod error;
pub mod handshake;
pub mod message;
pub mod payload;

#[cfg(test)]
mod tests;

pub use control::RunInput;
pub use control::RunMessageParams;
pub use control::RunOrClosePipeInput;
pub use control::RunOrClosePipeParams;
pub use control::RunOutput;
pub use control::RunResponseParams;
pub use error::Error;
pub use error::Result;
pub use handshake::Hello;
pub use handshake::PROTOCOL_VERSION;
pub use handshake::Welcome;
pub use message::Flags;
pub use message::Header;
pub use message::InterfaceId;
pub use message::Message;
pub use message::MessageId;
pub use payload::Payload;
pub use payload::SerializationContext;
