//! # Associated Endpoints
//!
//! The two halves handed to the delegate once a channel is up. Both refer to
//! the same multiplexed channel and share its lifetime.
//!
//! - `ChannelSender` plays the caller role: it submits requests and one-way
//!   messages, and owns the control proxy used for version negotiation.
//! - `ChannelReceiver` plays the callee role: it binds the handler that
//!   application messages from the peer are delivered to.
//!
//! Submission never blocks. Messages travel through the channel's command
//! queue to its actor task, which applies the queuing rules and does the I/O.

use std::sync::Arc;

use bondrpc::Flags;
use bondrpc::Header;
use bondrpc::Message;
use tokio::sync::oneshot;

use crate::control::ControlMessageProxy;
use crate::router::Channel;
use crate::router::Command;
use crate::watcher::Signals;
use crate::watcher::WatchId;
use crate::watcher::Watcher;

/// Takes a single inbound message, typically the response to a request.
///
/// Returning `false` rejects the message as malformed, which closes the
/// channel.
pub trait MessageReceiver: Send {
    fn accept(&mut self, message: Message) -> bool;
}

impl<F> MessageReceiver for F
where
    F: FnMut(Message) -> bool + Send,
{
    fn accept(&mut self, message: Message) -> bool {
        self(message)
    }
}

/// Accepts outbound messages, optionally with a responder for the answer.
///
/// A `false` return means the message was not submitted. In that case the
/// responder has already been dropped and will never be invoked.
pub trait MessageReceiverWithResponder: Send + Sync {
    fn accept(&self, message: Message) -> bool;

    fn accept_with_responder(&self, message: Message, responder: Box<dyn MessageReceiver>)
    -> bool;
}

impl MessageReceiverWithResponder for Channel {
    fn accept(&self, mut message: Message) -> bool {
        if message.expects_response() || message.is_response() {
            return false;
        }
        message.header.interface_id = self.send_interface();
        self.submit(message, None)
    }

    fn accept_with_responder(
        &self,
        mut message: Message,
        responder: Box<dyn MessageReceiver>,
    ) -> bool {
        if message.is_response() {
            return false;
        }
        message.header.interface_id = self.send_interface();
        message.header.flags = Flags::EXPECTS_RESPONSE;
        self.submit(message, Some(responder))
    }
}

/// Caller-role endpoint.
pub struct ChannelSender {
    channel: Arc<Channel>,
    control: ControlMessageProxy,
}

impl ChannelSender {
    pub(crate) fn new(channel: Arc<Channel>) -> Self {
        let control = ControlMessageProxy::new(Arc::clone(&channel) as Arc<dyn MessageReceiverWithResponder>);
        Self { channel, control }
    }

    /// Submits a one-way message. `false` if the channel is closed or the
    /// message is flagged as a request or response.
    pub fn accept(&self, message: Message) -> bool {
        MessageReceiverWithResponder::accept(&*self.channel, message)
    }

    /// Submits a request. `responder` gets the answer, or is dropped
    /// unanswered if the channel closes first.
    pub fn accept_with_responder(
        &self,
        message: Message,
        responder: impl MessageReceiver + 'static,
    ) -> bool {
        self.channel.accept_with_responder(message, Box::new(responder))
    }

    /// Asks the peer for its interface version.
    ///
    /// `callback` runs once, later, on the channel's actor task. It never
    /// runs if the channel closes before the answer arrives.
    pub fn query_version(&mut self, callback: impl FnOnce(u32) + Send + 'static) {
        let channel = Arc::clone(&self.channel);
        self.control.query_version(move |version| {
            channel.record_version(version);
            callback(version);
        });
    }

    /// `query_version` as a future. `None` if the channel closed first.
    pub async fn query_version_async(&mut self) -> Option<u32> {
        let (tx, rx) = oneshot::channel();
        self.query_version(move |version| {
            let _ = tx.send(version);
        });
        rx.await.ok()
    }

    /// Asserts that the peer implements at least `version`.
    ///
    /// Fire and forget: a peer that cannot honor it closes the channel.
    /// Versions already known to be satisfied are not re-sent.
    pub fn require_version(&mut self, version: u32) {
        if version <= self.channel.version() {
            return;
        }
        self.channel.record_version(version);
        self.control.require_version(version);
    }

    /// Highest peer version known on this side.
    pub fn version(&self) -> u32 {
        self.channel.version()
    }

    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }

    /// Resolves once the channel is closed.
    pub async fn closed(&self) {
        self.channel.closed().await
    }

    pub fn watch(&self, signals: Signals, watcher: Arc<dyn Watcher>) -> WatchId {
        self.channel.watch(signals, watcher)
    }

    pub fn cancel_watch(&self, id: WatchId) -> bool {
        self.channel.cancel_watch(id)
    }
}

impl std::fmt::Debug for ChannelSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSender")
            .field("name", &self.channel.name())
            .field("interface", &self.channel.send_interface())
            .finish()
    }
}

/// Handles application messages delivered to a `ChannelReceiver`.
///
/// Requests come with a `Responder`. Returning `false` rejects the message
/// and closes the channel.
pub trait InterfaceHandler: Send + 'static {
    fn handle(&mut self, message: Message, responder: Option<Responder>) -> bool;
}

impl<F> InterfaceHandler for F
where
    F: FnMut(Message, Option<Responder>) -> bool + Send + 'static,
{
    fn handle(&mut self, message: Message, responder: Option<Responder>) -> bool {
        self(message, responder)
    }
}

/// Answers one request. Dropping it leaves the request unanswered.
pub struct Responder {
    channel: Arc<Channel>,
    request: Header,
}

impl Responder {
    pub(crate) fn new(channel: Arc<Channel>, request: Header) -> Self {
        Self { channel, request }
    }

    pub fn request_id(&self) -> u64 {
        self.request.request_id
    }

    /// Sends the response. `false` if the channel is closed.
    pub fn respond(self, payload: Vec<u8>) -> bool {
        self.channel.submit(Message::response_to(&self.request, payload), None)
    }
}

/// Callee-role endpoint.
pub struct ChannelReceiver {
    channel: Arc<Channel>,
    bound: bool,
}

impl ChannelReceiver {
    pub(crate) fn new(channel: Arc<Channel>) -> Self {
        Self { channel, bound: false }
    }

    /// Installs the handler. Messages that arrived earlier are delivered to
    /// it first, in arrival order. Returns `false` if a handler is already
    /// bound or the channel is closed.
    pub fn bind(&mut self, handler: impl InterfaceHandler) -> bool {
        if self.bound {
            return false;
        }
        self.bound = self.channel.command(Command::Bind { handler: Box::new(handler) });
        self.bound
    }

    pub fn is_bound(&self) -> bool {
        self.bound
    }

    pub fn is_closed(&self) -> bool {
        self.channel.is_closed()
    }

    pub async fn closed(&self) {
        self.channel.closed().await
    }

    pub fn watch(&self, signals: Signals, watcher: Arc<dyn Watcher>) -> WatchId {
        self.channel.watch(signals, watcher)
    }

    pub fn cancel_watch(&self, id: WatchId) -> bool {
        self.channel.cancel_watch(id)
    }
}

impl std::fmt::Debug for ChannelReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelReceiver")
            .field("name", &self.channel.name())
            .field("bound", &self.bound)
            .finish()
    }
}
