//! # Error Definitions
//!
//! Failures while building or reading bond frames.

use bondpack::Error as PackError;

/// Wire-level failures.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The underlying Bondpack encoding or decoding failed.
    Serialization(PackError),
    /// A required field was absent from a frame.
    MissingField(&'static str),
    /// A tagged union carried a name this side does not know.
    UnknownVariant(String),
    /// The frame is well-formed bytes but breaks the protocol.
    ProtocolViolation(String),
    /// An application message id fell inside the reserved control space.
    ReservedMessageId(u32),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Serialization(e) => write!(f, "serialization failed: {}", e),
            Self::MissingField(name) => write!(f, "missing field '{}'", name),
            Self::UnknownVariant(name) => write!(f, "unknown variant '{}'", name),
            Self::ProtocolViolation(msg) => write!(f, "protocol violation: {}", msg),
            Self::ReservedMessageId(id) => {
                write!(f, "message id {:#010x} is reserved for control messages", id)
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

impl From<PackError> for Error {
    fn from(e: PackError) -> Self {
        Self::Serialization(e)
    }
}

/// A specialized Result type for wire operations.
pub type Result<T> = std::result::Result<T, Error>;
