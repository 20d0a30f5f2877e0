//! # Channel Router
//!
//! One actor task owns a bootstrapped channel: the transport, the pending
//! responders, the outbound backlog and the bound handler. Everything else
//! talks to it through an unbounded command queue, so commands take effect
//! in the order they were issued regardless of the calling thread.
//!
//! ## Tasks
//!
//! - **Actor** (`Router::run`): performs the handshake, then serves commands
//!   and inbound frames one at a time. Commands that arrive mid-handshake are
//!   held until it completes, except `Close`, which abandons it.
//! - **Reader**: spawned after the handshake, pumps `Transport::recv` into
//!   the actor. Aborted on close.
//!
//! ## Reentrancy
//!
//! Handler, responder, delegate and watcher callbacks run inside a
//! `RequestContext` opened by the actor. Callbacks may submit messages; those
//! land behind the current command in the queue. A context is never held
//! across an `.await`.

use std::collections::HashMap;
use std::collections::VecDeque;
use std::ops::ControlFlow;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::PoisonError;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;

use bondrpc::Flags;
use bondrpc::Hello;
use bondrpc::InterfaceId;
use bondrpc::Message;
use bondrpc::Payload;
use bondrpc::SerializationContext;
use bondrpc::Welcome;
use tokio::sync::mpsc;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::bootstrap::BootstrapError;
use crate::bootstrap::Delegate;
use crate::bootstrap::Mode;
use crate::bootstrap::State;
use crate::config::BootstrapConfig;
use crate::control::ControlMessageHandler;
use crate::endpoint::ChannelReceiver;
use crate::endpoint::ChannelSender;
use crate::endpoint::InterfaceHandler;
use crate::endpoint::MessageReceiver;
use crate::endpoint::Responder;
use crate::request_context::RequestContext;
use crate::transport;
use crate::transport::Transport;
use crate::transport::TransportHandle;
use crate::watcher::Signals;
use crate::watcher::SignalsState;
use crate::watcher::WatchId;
use crate::watcher::Watcher;
use crate::watcher::WatcherSet;

pub(crate) enum Command {
    Connect,
    Start,
    Flush,
    Send {
        message: Message,
        responder: Option<Box<dyn MessageReceiver>>,
    },
    Bind {
        handler: Box<dyn InterfaceHandler>,
    },
    Close,
}

enum Inbound {
    Frame(Vec<u8>),
    Closed(Option<transport::Error>),
}

enum Event {
    Command(Option<Command>),
    Inbound(Option<Inbound>),
}

/// Why the actor is tearing the channel down.
enum Fault {
    Violation(String),
    Transport(transport::Error),
    Handshake(BootstrapError),
    PeerClosed,
    /// Closed locally before the handshake completed.
    Abandoned,
}

impl std::fmt::Display for Fault {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Violation(msg) => write!(f, "protocol violation: {}", msg),
            Self::Transport(e) => write!(f, "transport failed: {}", e),
            Self::Handshake(e) => write!(f, "handshake failed: {}", e),
            Self::PeerClosed => write!(f, "peer closed"),
            Self::Abandoned => write!(f, "closed locally during handshake"),
        }
    }
}

impl From<bondrpc::Error> for Fault {
    fn from(e: bondrpc::Error) -> Self {
        Self::Violation(e.to_string())
    }
}

/// State shared between the actor and the endpoints.
pub(crate) struct Channel {
    name: String,
    send_interface: InterfaceId,
    receive_interface: InterfaceId,
    commands: mpsc::UnboundedSender<Command>,
    state: Mutex<State>,
    closed: watch::Sender<bool>,
    started: AtomicBool,
    readable: AtomicBool,
    version: AtomicU32,
    watchers: WatcherSet,
}

impl Channel {
    pub(crate) fn new(
        name: String,
        mode: Mode,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<Command>) {
        let (commands, rx) = mpsc::unbounded_channel();
        let (closed, _) = watch::channel(false);
        let channel = Arc::new(Self {
            name,
            send_interface: mode.send_interface(),
            receive_interface: mode.receive_interface(),
            commands,
            state: Mutex::new(State::Created),
            closed,
            started: AtomicBool::new(false),
            readable: AtomicBool::new(false),
            version: AtomicU32::new(0),
            watchers: WatcherSet::default(),
        });
        (channel, rx)
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn send_interface(&self) -> InterfaceId {
        self.send_interface
    }

    pub(crate) fn state(&self) -> State {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Runs `f` with the state locked.
    pub(crate) fn transition<R>(&self, f: impl FnOnce(&mut State) -> R) -> R {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        f(&mut state)
    }

    fn set_state(&self, next: State) {
        self.transition(|state| {
            if *state != State::Closed {
                *state = next;
            }
        });
    }

    /// Returns `true` the first time only.
    pub(crate) fn mark_started(&self) -> bool {
        !self.started.swap(true, Ordering::AcqRel)
    }

    /// Returns `false` if the actor is gone.
    pub(crate) fn command(&self, command: Command) -> bool {
        self.commands.send(command).is_ok()
    }

    /// Hands a message to the actor. A refused responder is dropped here.
    pub(crate) fn submit(
        &self,
        message: Message,
        responder: Option<Box<dyn MessageReceiver>>,
    ) -> bool {
        if self.is_closed() {
            return false;
        }
        self.command(Command::Send { message, responder })
    }

    pub(crate) fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    pub(crate) async fn closed(&self) {
        let mut rx = self.closed.subscribe();
        let _ = rx.wait_for(|closed| *closed).await;
    }

    pub(crate) fn version(&self) -> u32 {
        self.version.load(Ordering::Acquire)
    }

    pub(crate) fn record_version(&self, version: u32) {
        self.version.fetch_max(version, Ordering::AcqRel);
    }

    fn signals_state(&self) -> SignalsState {
        if self.is_closed() {
            SignalsState::closed()
        } else {
            SignalsState::open(self.readable.load(Ordering::Acquire))
        }
    }

    pub(crate) fn watch(&self, signals: Signals, watcher: Arc<dyn Watcher>) -> WatchId {
        let ctx = RequestContext::new();
        let id = self.watchers.add(signals, watcher);
        // Added before the check, so a concurrent close either sees this
        // watch or leaves it for us.
        if self.is_closed() {
            self.watchers.close(&ctx);
        }
        id
    }

    pub(crate) fn cancel_watch(&self, id: WatchId) -> bool {
        let ctx = RequestContext::new();
        self.watchers.cancel(&ctx, id)
    }

    /// Marks the channel closed and queues the final watcher notifications.
    /// Returns `false` if it was already closed.
    fn mark_closed(&self, ctx: &RequestContext) -> bool {
        let was_closed = self.transition(|state| std::mem::replace(state, State::Closed))
            == State::Closed;
        if was_closed {
            return false;
        }
        self.closed.send_replace(true);
        self.readable.store(false, Ordering::Release);
        self.watchers.close(ctx);
        true
    }
}

/// The actor that owns one channel.
pub(crate) struct Router {
    channel: Arc<Channel>,
    commands: mpsc::UnboundedReceiver<Command>,
    deferred: VecDeque<Command>,
    inbound: Option<mpsc::UnboundedReceiver<Inbound>>,
    transport: Arc<dyn Transport>,
    reader: Option<JoinHandle<()>>,
    mode: Mode,
    delegate: Option<Box<dyn Delegate>>,
    config: BootstrapConfig,
    control: ControlMessageHandler,
    context: SerializationContext,
    backlog: VecDeque<Message>,
    pending: HashMap<u64, Box<dyn MessageReceiver>>,
    next_request_id: u64,
    handler: Option<Box<dyn InterfaceHandler>>,
    unread: VecDeque<Message>,
}

impl Router {
    pub(crate) fn new(
        channel: Arc<Channel>,
        commands: mpsc::UnboundedReceiver<Command>,
        transport: TransportHandle,
        mode: Mode,
        delegate: Box<dyn Delegate>,
        config: BootstrapConfig,
    ) -> Self {
        Self {
            channel,
            commands,
            deferred: VecDeque::new(),
            inbound: None,
            transport: Arc::from(transport.into_inner()),
            reader: None,
            mode,
            delegate: Some(delegate),
            control: ControlMessageHandler::new(config.interface_version),
            config,
            context: SerializationContext::new(),
            backlog: VecDeque::new(),
            pending: HashMap::new(),
            next_request_id: 0,
            handler: None,
            unread: VecDeque::new(),
        }
    }

    pub(crate) async fn run(mut self) {
        loop {
            let event = match self.deferred.pop_front() {
                Some(command) => Event::Command(Some(command)),
                None => tokio::select! {
                    command = self.commands.recv() => Event::Command(command),
                    inbound = next_inbound(&mut self.inbound) => Event::Inbound(inbound),
                },
            };

            let result = match event {
                Event::Command(Some(Command::Close)) | Event::Command(None) => {
                    self.close("closed locally").await;
                    break;
                }
                Event::Command(Some(command)) => self.on_command(command).await,
                Event::Inbound(Some(Inbound::Frame(frame))) => self.on_frame(&frame).await,
                Event::Inbound(Some(Inbound::Closed(Some(e)))) => Err(Fault::Transport(e)),
                Event::Inbound(Some(Inbound::Closed(None))) | Event::Inbound(None) => {
                    Err(Fault::PeerClosed)
                }
            };

            if let Err(fault) = result {
                if self.fail(fault).await.is_break() {
                    break;
                }
            }
        }
    }

    async fn on_command(&mut self, command: Command) -> Result<(), Fault> {
        match command {
            Command::Connect => self.connect().await,
            Command::Start => {
                // The backlog goes out ahead of anything sent once running.
                let queued = self.backlog.len();
                self.flush().await?;
                self.channel.set_state(State::Running);
                tracing::debug!(name = %self.config.name, queued, "started");
                Ok(())
            }
            Command::Flush => self.flush().await,
            Command::Send { message, responder } => self.send(message, responder).await,
            Command::Bind { handler } => self.bind(handler),
            Command::Close => Ok(()),
        }
    }

    async fn connect(&mut self) -> Result<(), Fault> {
        let transport = Arc::clone(&self.transport);
        let (mode, limit) = (self.mode, self.config.handshake_timeout);
        let exchange = async move {
            match limit {
                Some(limit) => tokio::time::timeout(limit, handshake(transport, mode))
                    .await
                    .unwrap_or(Err(BootstrapError::HandshakeTimeout(limit))),
                None => handshake(transport, mode).await,
            }
        };
        tokio::pin!(exchange);

        let outcome = loop {
            tokio::select! {
                outcome = &mut exchange => break outcome,
                command = self.commands.recv() => match command {
                    Some(Command::Close) | None => return Err(Fault::Abandoned),
                    Some(command) => self.deferred.push_back(command),
                },
            }
        };
        outcome.map_err(Fault::Handshake)?;

        tracing::info!(name = %self.config.name, mode = ?self.mode, "handshake complete");
        self.spawn_reader();
        self.channel.set_state(State::Queuing);

        self.announce();
        Ok(())
    }

    /// Hands the endpoints to the delegate. Happens once per channel.
    fn announce(&mut self) {
        let _ctx = RequestContext::new();
        if let Some(mut delegate) = self.delegate.take() {
            let sender = ChannelSender::new(Arc::clone(&self.channel));
            let receiver = ChannelReceiver::new(Arc::clone(&self.channel));
            delegate.on_pipes_available(sender, receiver);
        }
    }

    fn spawn_reader(&mut self) {
        let (tx, rx) = mpsc::unbounded_channel();
        let transport = Arc::clone(&self.transport);
        let name = self.config.name.clone();

        self.reader = Some(tokio::spawn(async move {
            loop {
                match transport.recv().await {
                    Ok(Some(frame)) => {
                        if tx.send(Inbound::Frame(frame)).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {
                        let _ = tx.send(Inbound::Closed(None));
                        break;
                    }
                    Err(e) => {
                        tracing::debug!(name = %name, error = %e, "read failed");
                        let _ = tx.send(Inbound::Closed(Some(e)));
                        break;
                    }
                }
            }
        }));
        self.inbound = Some(rx);
    }

    async fn send(
        &mut self,
        mut message: Message,
        responder: Option<Box<dyn MessageReceiver>>,
    ) -> Result<(), Fault> {
        if let Some(responder) = responder {
            self.next_request_id += 1;
            message.header.request_id = self.next_request_id;
            message.header.flags = Flags::EXPECTS_RESPONSE;
            self.pending.insert(self.next_request_id, responder);
        }

        match self.channel.state() {
            State::Running if self.backlog.is_empty() => self.write(&message).await,
            State::Queuing | State::Running => {
                self.backlog.push_back(message);
                Ok(())
            }
            // Endpoints only exist once queuing has begun.
            State::Created | State::Connecting | State::Closed => Ok(()),
        }
    }

    async fn flush(&mut self) -> Result<(), Fault> {
        if self.backlog.is_empty() {
            return Ok(());
        }
        tracing::debug!(name = %self.config.name, count = self.backlog.len(), "flushing backlog");
        while let Some(message) = self.backlog.pop_front() {
            self.write(&message).await?;
        }
        Ok(())
    }

    async fn write(&mut self, message: &Message) -> Result<(), Fault> {
        let frame = self.context.serialize(message)?;
        self.transport.send(&frame).await.map_err(Fault::Transport)
    }

    fn bind(&mut self, handler: Box<dyn InterfaceHandler>) -> Result<(), Fault> {
        let _ctx = RequestContext::new();
        self.handler = Some(handler);
        self.channel.readable.store(false, Ordering::Release);
        while let Some(message) = self.unread.pop_front() {
            self.deliver(message)?;
        }
        Ok(())
    }

    async fn on_frame(&mut self, frame: &[u8]) -> Result<(), Fault> {
        if let Some(reply) = self.dispatch(frame)? {
            self.send(reply, None).await?;
        }
        Ok(())
    }

    /// Routes one inbound frame. Returns a control response to send.
    fn dispatch(&mut self, frame: &[u8]) -> Result<Option<Message>, Fault> {
        let ctx = RequestContext::new();
        let message: Message = self.context.deserialize(frame)?;

        if message.is_response() {
            if message.header.interface_id != self.channel.send_interface {
                return Err(Fault::Violation(format!(
                    "response on {}",
                    message.header.interface_id
                )));
            }
            let request_id = message.header.request_id;
            let Some(mut responder) = self.pending.remove(&request_id) else {
                return Err(Fault::Violation(format!("response to unknown request {}", request_id)));
            };
            if !responder.accept(message) {
                return Err(Fault::Violation(format!("response to request {} rejected", request_id)));
            }
            return Ok(None);
        }

        if message.header.interface_id != self.channel.receive_interface {
            return Err(Fault::Violation(format!(
                "message for {} on a channel receiving {}",
                message.header.interface_id, self.channel.receive_interface
            )));
        }

        if message.name().is_control() {
            return Ok(self.control.handle(&message)?);
        }

        if self.handler.is_none() {
            self.unread.push_back(message);
            self.channel.readable.store(true, Ordering::Release);
            self.channel
                .watchers
                .signal(&ctx, Signals::READABLE, self.channel.signals_state());
            return Ok(None);
        }

        self.deliver(message)?;
        Ok(None)
    }

    fn deliver(&mut self, message: Message) -> Result<(), Fault> {
        let Some(handler) = self.handler.as_mut() else {
            return Ok(());
        };
        let name = message.name();
        let responder = message
            .expects_response()
            .then(|| Responder::new(Arc::clone(&self.channel), message.header.clone()));
        if !handler.handle(message, responder) {
            return Err(Fault::Violation(format!("handler rejected {}", name)));
        }
        Ok(())
    }

    /// Closes the channel for `fault`. Breaks the actor loop.
    async fn fail(&mut self, fault: Fault) -> ControlFlow<()> {
        match &fault {
            Fault::PeerClosed | Fault::Abandoned => {
                tracing::debug!(name = %self.config.name, reason = %fault, "closing channel")
            }
            _ => tracing::warn!(name = %self.config.name, reason = %fault, "closing channel"),
        }
        self.close(&fault.to_string()).await;

        if let Fault::Handshake(error) = fault {
            self.report_handshake_failure(&error);
        }
        ControlFlow::Break(())
    }

    fn report_handshake_failure(&mut self, error: &BootstrapError) {
        let _ctx = RequestContext::new();
        if let Some(mut delegate) = self.delegate.take() {
            delegate.on_handshake_failed(error);
        }
    }

    async fn close(&mut self, reason: &str) {
        if !self.teardown() {
            return;
        }
        if let Some(reader) = self.reader.take() {
            reader.abort();
        }
        self.inbound = None;
        self.transport.close().await;
        tracing::debug!(name = %self.config.name, reason, "channel closed");
    }

    /// Drops everything the channel holds. Pending responders are dropped
    /// without being called.
    fn teardown(&mut self) -> bool {
        let ctx = RequestContext::new();
        if !self.channel.mark_closed(&ctx) {
            return false;
        }
        self.pending.clear();
        self.deferred.clear();
        self.backlog.clear();
        self.unread.clear();
        self.handler = None;
        true
    }
}

async fn next_inbound(inbound: &mut Option<mpsc::UnboundedReceiver<Inbound>>) -> Option<Inbound> {
    match inbound {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

async fn handshake(transport: Arc<dyn Transport>, mode: Mode) -> Result<(), BootstrapError> {
    match mode {
        Mode::Initiator => {
            transport.send(&Hello::current().to_bytes()?).await?;
            let frame = transport.recv().await?.ok_or(BootstrapError::PeerClosed)?;
            Welcome::from_bytes(&frame)?;
        }
        Mode::Acceptor => {
            let frame = transport.recv().await?.ok_or(BootstrapError::PeerClosed)?;
            Hello::from_bytes(&frame)?;
            transport.send(&Welcome::current().to_bytes()?).await?;
        }
    }
    Ok(())
}
