//! # bondrun
//!
//! Control plane for bond channels: bootstraps a pair of associated
//! endpoints over one transport, negotiates interface versions on a private
//! control sub-protocol, and defers watcher side effects until the runtime
//! has released its own state.
//!
//! ## Core Concepts
//!
//! - **Bootstrap**: handshake state machine. Owns the transport and hands a
//!   `ChannelSender`/`ChannelReceiver` pair to its `Delegate`.
//! - **Endpoints**: the caller half submits messages and version queries;
//!   the callee half binds the handler that receives the peer's messages.
//! - **RequestContext**: thread-local scope that collects watcher
//!   notifications and runs them when the outermost scope ends.
//! - **Transport**: anything that moves ordered frames (`DuplexTransport`
//!   in-process, `StreamTransport` over sockets).
//!
//! ## Example
//!
//! ```rust,no_run
//! use bondrun::{Bootstrap, BootstrapConfig, ChannelReceiver, ChannelSender};
//! use bondrun::{DuplexTransport, Mode, TransportHandle};
//!
//! # async fn example() {
//! let (a, _b) = DuplexTransport::pair();
//! let bootstrap = Bootstrap::create(
//!     TransportHandle::new(a),
//!     Mode::Initiator,
//!     |mut sender: ChannelSender, _receiver: ChannelReceiver| {
//!         sender.query_version(|version| println!("peer speaks v{}", version));
//!     },
//!     tokio::runtime::Handle::current(),
//!     BootstrapConfig::new().name("example"),
//! );
//! bootstrap.connect().unwrap();
//! bootstrap.start().unwrap();
//! # }
//! ```

pub mod bootstrap;
pub mod config;
pub mod control;
pub mod endpoint;
pub mod request_context;
pub mod transport;
pub mod watcher;

mod router;

pub use bootstrap::Bootstrap;
pub use bootstrap::BootstrapError;
pub use bootstrap::Delegate;
pub use bootstrap::Mode;
pub use bootstrap::State;
pub use config::BootstrapConfig;
pub use control::ControlMessageProxy;
pub use endpoint::ChannelReceiver;
pub use endpoint::ChannelSender;
pub use endpoint::InterfaceHandler;
pub use endpoint::MessageReceiver;
pub use endpoint::MessageReceiverWithResponder;
pub use endpoint::Responder;
pub use request_context::RequestContext;
pub use transport::DuplexTransport;
pub use transport::StreamTransport;
pub use transport::Transport;
pub use transport::TransportHandle;
pub use watcher::Signals;
pub use watcher::SignalsState;
pub use watcher::WatchId;
pub use watcher::WatchResult;
pub use watcher::Watcher;

pub use bondrpc::Message;
pub use bondrpc::MessageId;

#[cfg(test)]
mod tests;
