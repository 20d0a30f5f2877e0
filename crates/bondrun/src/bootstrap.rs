//! # Bootstrap
//!
//! Turns one raw transport into a pair of associated endpoints.
//!
//! ## Lifecycle
//!
//! ```text
//! Created --connect()--> Connecting --handshake ok--> Queuing --start()--> Running
//!     \                        \
//!      `------ close() -------> `---- handshake failed / close() ----> Closed
//! ```
//!
//! - **Created**: the channel actor is spawned on the bound runtime and owns
//!   the transport, but nothing has touched the wire.
//! - **Connecting**: the handshake is in flight. On success the delegate gets
//!   `on_pipes_available(sender, receiver)` exactly once.
//! - **Queuing**: messages submitted on the new endpoints are kept locally.
//! - **Running**: messages go straight to the wire once everything queued
//!   before `start()` has been flushed.
//!
//! Every callback and all channel I/O happen on the actor task, whichever
//! thread the calls to `Bootstrap` come from.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bondrpc::InterfaceId;
use tokio::runtime::Handle;

use crate::config::BootstrapConfig;
use crate::endpoint::ChannelReceiver;
use crate::endpoint::ChannelSender;
use crate::router::Channel;
use crate::router::Command;
use crate::router::Router;
use crate::transport;
use crate::transport::TransportHandle;

/// Which half of the handshake this end performs.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Sends `Hello` and waits for `Welcome`.
    Initiator,
    /// Waits for `Hello` and answers with `Welcome`.
    Acceptor,
}

impl Mode {
    /// Interface the local sender writes to.
    pub fn send_interface(self) -> InterfaceId {
        match self {
            Mode::Initiator => InterfaceId(1),
            Mode::Acceptor => InterfaceId(2),
        }
    }

    /// Interface the local receiver is addressed on.
    pub fn receive_interface(self) -> InterfaceId {
        match self {
            Mode::Initiator => InterfaceId(2),
            Mode::Acceptor => InterfaceId(1),
        }
    }
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum State {
    Created,
    Connecting,
    Queuing,
    Running,
    Closed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapError {
    /// `connect()` was called more than once.
    AlreadyConnected,
    /// The call needs a connected channel.
    NotConnected,
    /// `start()` was called more than once.
    AlreadyStarted,
    /// The channel is already closed.
    Closed,
    /// The peer did not finish the handshake in time.
    HandshakeTimeout(Duration),
    /// The peer hung up during the handshake.
    PeerClosed,
    Transport(transport::Error),
    Wire(bondrpc::Error),
}

impl fmt::Display for BootstrapError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AlreadyConnected => write!(f, "connect() called twice"),
            Self::NotConnected => write!(f, "channel is not connected"),
            Self::AlreadyStarted => write!(f, "start() called twice"),
            Self::Closed => write!(f, "channel is closed"),
            Self::HandshakeTimeout(limit) => write!(f, "handshake timed out after {:?}", limit),
            Self::PeerClosed => write!(f, "peer closed during handshake"),
            Self::Transport(e) => write!(f, "transport error: {}", e),
            Self::Wire(e) => write!(f, "handshake frame rejected: {}", e),
        }
    }
}

impl std::error::Error for BootstrapError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Transport(e) => Some(e),
            Self::Wire(e) => Some(e),
            _ => None,
        }
    }
}

impl From<transport::Error> for BootstrapError {
    fn from(e: transport::Error) -> Self {
        Self::Transport(e)
    }
}

impl From<bondrpc::Error> for BootstrapError {
    fn from(e: bondrpc::Error) -> Self {
        Self::Wire(e)
    }
}

pub type Result<T> = std::result::Result<T, BootstrapError>;

/// Receives the endpoints once the handshake completes.
///
/// Called on the channel's actor task, inside a request context.
pub trait Delegate: Send + 'static {
    fn on_pipes_available(&mut self, sender: ChannelSender, receiver: ChannelReceiver);

    /// Called instead of `on_pipes_available` when the handshake fails.
    fn on_handshake_failed(&mut self, _error: &BootstrapError) {}
}

impl<F> Delegate for F
where
    F: FnMut(ChannelSender, ChannelReceiver) + Send + 'static,
{
    fn on_pipes_available(&mut self, sender: ChannelSender, receiver: ChannelReceiver) {
        self(sender, receiver)
    }
}

/// Owner of one bootstrapped channel. Dropping it closes the channel.
pub struct Bootstrap {
    channel: Arc<Channel>,
}

impl Bootstrap {
    /// Binds a transport, a role and a delegate to the runtime behind
    /// `runtime`. May be called from any thread.
    pub fn create(
        transport: TransportHandle,
        mode: Mode,
        delegate: impl Delegate,
        runtime: Handle,
        config: BootstrapConfig,
    ) -> Self {
        let (channel, commands) = Channel::new(config.name.clone(), mode);
        tracing::debug!(name = %channel.name(), ?mode, "bootstrap created");

        let router = Router::new(
            Arc::clone(&channel),
            commands,
            transport,
            mode,
            Box::new(delegate),
            config,
        );
        runtime.spawn(router.run());

        Self { channel }
    }

    /// Begins the handshake. Allowed once, before anything else.
    pub fn connect(&self) -> Result<()> {
        let result = self.channel.transition(|state| match state {
            State::Created => {
                *state = State::Connecting;
                Ok(())
            }
            State::Closed => Err(BootstrapError::Closed),
            _ => Err(BootstrapError::AlreadyConnected),
        });
        self.usage(result)?;
        self.command(Command::Connect)
    }

    /// Writes the pre-start backlog, then switches to running. Messages
    /// submitted from now on go straight to the wire.
    pub fn start(&self) -> Result<()> {
        let result = self.require_connected().and_then(|()| {
            if self.channel.mark_started() {
                Ok(())
            } else {
                Err(BootstrapError::AlreadyStarted)
            }
        });
        self.usage(result)?;
        self.command(Command::Start)
    }

    /// Writes everything queued so far, in submission order. Once running
    /// the backlog is already empty and this does nothing.
    pub fn flush(&self) -> Result<()> {
        let result = self.require_connected();
        self.usage(result)?;
        self.command(Command::Flush)
    }

    /// Tears the channel down. Safe in any state and more than once.
    pub fn close(&self) {
        if !self.channel.command(Command::Close) {
            tracing::debug!(name = %self.channel.name(), "close ignored, channel already gone");
        }
    }

    pub fn state(&self) -> State {
        self.channel.state()
    }

    pub fn name(&self) -> &str {
        self.channel.name()
    }

    /// Resolves once the channel is closed.
    pub async fn closed(&self) {
        self.channel.closed().await
    }

    fn require_connected(&self) -> Result<()> {
        match self.channel.state() {
            State::Created => Err(BootstrapError::NotConnected),
            State::Closed => Err(BootstrapError::Closed),
            _ => Ok(()),
        }
    }

    fn command(&self, command: Command) -> Result<()> {
        if self.channel.command(command) {
            Ok(())
        } else {
            self.usage(Err(BootstrapError::Closed))
        }
    }

    fn usage<T>(&self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            tracing::error!(name = %self.channel.name(), error = %e, "bootstrap misuse");
        }
        result
    }
}

impl Drop for Bootstrap {
    fn drop(&mut self) {
        self.close();
    }
}

impl fmt::Debug for Bootstrap {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Bootstrap")
            .field("name", &self.channel.name())
            .field("state", &self.channel.state())
            .finish()
    }
}
