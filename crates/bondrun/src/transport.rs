//! # Transport Abstraction
//!
//! A minimal, async interface for moving frames between two endpoints.
//!
//! ## Philosophy
//!
//! - **Frame-Oriented**: A Transport moves whole opaque buffers. It knows
//!   nothing about handshakes, headers, or interfaces.
//! - **Ordered**: Frames arrive in the order they were sent, or not at all.
//! - **Exclusively Owned**: A `TransportHandle` is moved into exactly one
//!   bootstrap; it is never cloned.

use std::fmt;

mod duplex;
mod stream;

pub use duplex::DuplexTransport;
pub use stream::StreamTransport;

/// Errors that occur at the transport layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// The peer went away or the local end was closed.
    ConnectionLost(String),
    /// A frame exceeded the transport's size limit.
    FrameTooLarge { len: usize, max: usize },
    /// Generic I/O error or internal transport failure.
    Io(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ConnectionLost(msg) => write!(f, "connection lost: {}", msg),
            Self::FrameTooLarge { len, max } => {
                write!(f, "frame of {} bytes exceeds limit of {}", len, max)
            }
            Self::Io(msg) => write!(f, "I/O error: {}", msg),
        }
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::BrokenPipe
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::ConnectionAborted
            | std::io::ErrorKind::UnexpectedEof => Self::ConnectionLost(e.to_string()),
            _ => Self::Io(e.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

/// An ordered, bidirectional frame pipe.
///
/// Object-safe so the runtime can hold `Arc<dyn Transport>`. `send` and
/// `recv` may be called concurrently from different tasks; each direction is
/// used by one task at a time.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Queues one frame for the peer.
    async fn send(&self, frame: &[u8]) -> Result<()>;

    /// Waits for the next frame. `Ok(None)` means the peer closed cleanly.
    async fn recv(&self) -> Result<Option<Vec<u8>>>;

    /// Closes the local end. The peer's `recv` observes end of stream.
    async fn close(&self);
}

/// Move-only ownership of one end of a raw transport.
pub struct TransportHandle {
    inner: Box<dyn Transport>,
}

impl TransportHandle {
    pub fn new(transport: impl Transport) -> Self {
        Self { inner: Box::new(transport) }
    }

    pub(crate) fn into_inner(self) -> Box<dyn Transport> {
        self.inner
    }
}

impl fmt::Debug for TransportHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportHandle").finish_non_exhaustive()
    }
}
