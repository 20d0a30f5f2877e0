use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::AtomicU32;
use std::sync::atomic::Ordering;
use std::time::Duration;

use bondrpc::Error as WireError;
use bondrpc::InterfaceId;
use bondrpc::Message;
use bondrpc::MessageId;
use bondrpc::Payload;
use bondrpc::RunInput;
use bondrpc::RunMessageParams;
use bondrpc::RunOrClosePipeInput;
use bondrpc::RunOrClosePipeParams;
use bondrpc::RunOutput;
use bondrpc::RunResponseParams;

use crate::config::BootstrapConfig;
use crate::control::ControlMessageHandler;
use crate::control::ControlMessageProxy;
use crate::endpoint::MessageReceiver;
use crate::endpoint::MessageReceiverWithResponder;
use crate::request_context::RequestContext;
use crate::watcher::Signals;
use crate::watcher::SignalsState;
use crate::watcher::WatchResult;
use crate::watcher::Watcher;
use crate::watcher::WatcherSet;

// --- Helpers ---

type Log = Arc<Mutex<Vec<String>>>;

fn log() -> Log {
    Arc::new(Mutex::new(Vec::new()))
}

fn entries(log: &Log) -> Vec<String> {
    log.lock().unwrap().clone()
}

struct LogWatcher {
    label: &'static str,
    log: Log,
}

impl LogWatcher {
    fn new(label: &'static str, log: &Log) -> Arc<dyn Watcher> {
        Arc::new(Self { label, log: log.clone() })
    }
}

impl Watcher for LogWatcher {
    fn on_signal(&self, result: WatchResult, _state: SignalsState) {
        self.log.lock().unwrap().push(format!("{}:{:?}", self.label, result));
    }

    fn on_cancel(&self) {
        self.log.lock().unwrap().push(format!("{}:cancel", self.label));
    }
}

fn open_state() -> SignalsState {
    SignalsState::open(false)
}

// --- Request context ---

#[test]
fn test_nested_context_defers_to_outermost() {
    let log = log();
    let a = LogWatcher::new("a", &log);

    let outer = RequestContext::new();
    assert!(outer.is_outermost());
    {
        let inner = RequestContext::new();
        assert!(!inner.is_outermost());
        inner.add_notify_finalizer(a, WatchResult::Ok, open_state());
    }
    assert!(entries(&log).is_empty());
    assert_eq!(RequestContext::pending(), 1);

    drop(outer);
    assert_eq!(entries(&log), vec!["a:Ok"]);
    assert_eq!(RequestContext::pending(), 0);
}

#[test]
fn test_current_is_a_view_of_the_outermost() {
    let log = log();
    assert!(RequestContext::current().is_none());

    let outer = RequestContext::new();
    let view = RequestContext::current().expect("active context");
    assert!(!view.is_outermost());
    view.add_cancel_finalizer(LogWatcher::new("a", &log));
    drop(view);
    assert!(entries(&log).is_empty());

    drop(outer);
    assert_eq!(entries(&log), vec!["a:cancel"]);
    assert!(RequestContext::current().is_none());
}

#[test]
fn test_cancel_wins_regardless_of_registration_order() {
    let log = log();
    let a = LogWatcher::new("a", &log);
    let b = LogWatcher::new("b", &log);
    let c = LogWatcher::new("c", &log);

    {
        let ctx = RequestContext::new();
        ctx.add_notify_finalizer(a.clone(), WatchResult::Ok, open_state());
        ctx.add_cancel_finalizer(a);
        ctx.add_cancel_finalizer(b.clone());
        ctx.add_notify_finalizer(b, WatchResult::Ok, open_state());
        ctx.add_notify_finalizer(c, WatchResult::FailedPrecondition, SignalsState::closed());
    }

    assert_eq!(entries(&log), vec!["a:cancel", "b:cancel", "c:FailedPrecondition"]);
}

#[test]
fn test_duplicates_fire_in_registration_order_past_inline_capacity() {
    let log = log();
    let a = LogWatcher::new("a", &log);
    let b = LogWatcher::new("b", &log);

    {
        let ctx = RequestContext::new();
        for i in 0..10 {
            let (watcher, result) = if i % 3 == 0 {
                (b.clone(), WatchResult::FailedPrecondition)
            } else {
                (a.clone(), WatchResult::Ok)
            };
            ctx.add_notify_finalizer(watcher, result, open_state());
        }
    }

    let expected: Vec<String> = (0..10)
        .map(|i| if i % 3 == 0 { "b:FailedPrecondition" } else { "a:Ok" }.to_string())
        .collect();
    assert_eq!(entries(&log), expected);
}

/// Registers a follow-up notification from inside its own callback.
struct ChainWatcher {
    log: Log,
    next: Arc<dyn Watcher>,
}

impl Watcher for ChainWatcher {
    fn on_signal(&self, _result: WatchResult, state: SignalsState) {
        self.log.lock().unwrap().push("chain".to_string());
        let ctx = RequestContext::new();
        assert!(ctx.is_outermost(), "flush must clear the thread's context first");
        ctx.add_notify_finalizer(self.next.clone(), WatchResult::Ok, state);
        self.log.lock().unwrap().push("chain-done".to_string());
    }
}

#[test]
fn test_callbacks_may_reenter() {
    let log = log();
    let chain: Arc<dyn Watcher> = Arc::new(ChainWatcher {
        log: log.clone(),
        next: LogWatcher::new("next", &log),
    });

    {
        let ctx = RequestContext::new();
        ctx.add_notify_finalizer(chain, WatchResult::Ok, open_state());
        ctx.add_notify_finalizer(LogWatcher::new("tail", &log), WatchResult::Ok, open_state());
    }

    assert_eq!(entries(&log), vec!["chain", "chain-done", "next:Ok", "tail:Ok"]);
}

#[test]
fn test_contexts_are_per_thread() {
    let log = log();
    let outer = RequestContext::new();
    outer.add_notify_finalizer(LogWatcher::new("main", &log), WatchResult::Ok, open_state());

    let thread_log = log.clone();
    std::thread::spawn(move || {
        let ctx = RequestContext::new();
        assert!(ctx.is_outermost());
        assert_eq!(RequestContext::pending(), 0);
        ctx.add_notify_finalizer(
            LogWatcher::new("thread", &thread_log),
            WatchResult::Ok,
            open_state(),
        );
    })
    .join()
    .unwrap();

    assert_eq!(entries(&log), vec!["thread:Ok"]);
    drop(outer);
    assert_eq!(entries(&log), vec!["thread:Ok", "main:Ok"]);
}

// --- Watchers ---

#[test]
fn test_watcher_set_close_reports_final_state() {
    let log = log();
    let set = WatcherSet::default();
    set.add(Signals::PEER_CLOSED, LogWatcher::new("closed", &log));
    set.add(Signals::READABLE, LogWatcher::new("readable", &log));

    {
        let ctx = RequestContext::new();
        set.close(&ctx);
        assert!(entries(&log).is_empty());
    }

    let mut seen = entries(&log);
    seen.sort();
    assert_eq!(seen, vec!["closed:Ok", "readable:FailedPrecondition"]);
    assert_eq!(set.len(), 0);
}

#[test]
fn test_watcher_set_cancel_suppresses_pending_signal() {
    let log = log();
    let set = WatcherSet::default();
    let id = set.add(Signals::READABLE, LogWatcher::new("a", &log));
    set.add(Signals::PEER_CLOSED, LogWatcher::new("b", &log));

    {
        let ctx = RequestContext::new();
        set.signal(&ctx, Signals::READABLE, SignalsState::open(true));
        assert!(set.cancel(&ctx, id));
        assert!(!set.cancel(&ctx, id));
    }

    assert_eq!(entries(&log), vec!["a:cancel"]);
    assert_eq!(set.len(), 1);
}

// --- Control handler ---

fn run_request(input: RunInput) -> Message {
    let payload = RunMessageParams { input }.to_bytes().unwrap();
    let mut message = Message::request(MessageId::RUN, payload);
    message.header.interface_id = InterfaceId(1);
    message.header.request_id = 7;
    message
}

#[test]
fn test_handler_answers_query_version() -> anyhow::Result<()> {
    let mut handler = ControlMessageHandler::new(3);
    let reply = handler.handle(&run_request(RunInput::QueryVersion))?.expect("a response");

    assert!(reply.is_response());
    assert_eq!(reply.header.request_id, 7);
    assert_eq!(reply.header.interface_id, InterfaceId(1));
    assert_eq!(RunResponseParams::from_bytes(&reply.payload)?.queried_version(), 3);
    Ok(())
}

#[test]
fn test_handler_checks_run_requirements() -> anyhow::Result<()> {
    let mut handler = ControlMessageHandler::new(4);
    let reply = handler
        .handle(&run_request(RunInput::RequireVersion { version: 4 }))?
        .expect("a response");
    assert_eq!(RunResponseParams::from_bytes(&reply.payload)?.output, None);

    let err = handler.handle(&run_request(RunInput::RequireVersion { version: 5 }));
    assert!(matches!(err, Err(WireError::ProtocolViolation(_))));
    Ok(())
}

#[test]
fn test_handler_closes_on_unmet_requirement() -> anyhow::Result<()> {
    let mut handler = ControlMessageHandler::new(2);
    let require = |version| {
        let params = RunOrClosePipeParams {
            input: RunOrClosePipeInput::RequireVersion { version },
        };
        Message::new(MessageId::RUN_OR_CLOSE_PIPE, params.to_bytes().unwrap())
    };

    assert_eq!(handler.handle(&require(2))?, None);
    assert_eq!(handler.handle(&require(1))?, None);
    assert!(matches!(handler.handle(&require(5)), Err(WireError::ProtocolViolation(_))));
    Ok(())
}

#[test]
fn test_handler_rejects_malformed_control_messages() {
    let mut handler = ControlMessageHandler::new(1);

    let unknown = Message::new(MessageId::from_raw(0x8000_0001), Vec::new());
    assert_eq!(handler.handle(&unknown), Err(WireError::ReservedMessageId(0x8000_0001)));

    let mut one_way_run = run_request(RunInput::QueryVersion);
    one_way_run.header.flags = bondrpc::Flags::NONE;
    assert!(handler.handle(&one_way_run).is_err());

    let garbage = Message::request(MessageId::RUN, vec![0xFF, 0x00]);
    assert!(handler.handle(&garbage).is_err());
}

// --- Control proxy ---

struct MockReceiver {
    accepting: bool,
    sent: Mutex<Vec<Message>>,
    responders: Mutex<Vec<Box<dyn MessageReceiver>>>,
}

impl MockReceiver {
    fn new(accepting: bool) -> Arc<Self> {
        Arc::new(Self {
            accepting,
            sent: Mutex::new(Vec::new()),
            responders: Mutex::new(Vec::new()),
        })
    }
}

impl MessageReceiverWithResponder for MockReceiver {
    fn accept(&self, message: Message) -> bool {
        if self.accepting {
            self.sent.lock().unwrap().push(message);
        }
        self.accepting
    }

    fn accept_with_responder(
        &self,
        message: Message,
        responder: Box<dyn MessageReceiver>,
    ) -> bool {
        if !self.accepting {
            return false;
        }
        self.sent.lock().unwrap().push(message);
        self.responders.lock().unwrap().push(responder);
        true
    }
}

fn proxy(receiver: &Arc<MockReceiver>) -> ControlMessageProxy {
    ControlMessageProxy::new(receiver.clone() as Arc<dyn MessageReceiverWithResponder>)
}

#[test]
fn test_proxy_forwards_queried_version() -> anyhow::Result<()> {
    let receiver = MockReceiver::new(true);
    let mut proxy = proxy(&receiver);
    let version = Arc::new(AtomicU32::new(u32::MAX));

    let seen = version.clone();
    proxy.query_version(move |v| seen.store(v, Ordering::SeqCst));
    assert_eq!(version.load(Ordering::SeqCst), u32::MAX, "callback must wait for the response");

    let request = receiver.sent.lock().unwrap().pop().expect("request sent");
    assert_eq!(request.name(), MessageId::RUN);
    assert!(request.expects_response());
    let params = RunMessageParams::from_bytes(&request.payload)?;
    assert_eq!(params.input, RunInput::QueryVersion);

    let payload = RunResponseParams {
        output: Some(RunOutput::QueryVersionResult { version: 4 }),
    }
    .to_bytes()?;
    let mut responder = receiver.responders.lock().unwrap().pop().expect("responder");
    assert!(responder.accept(Message::response_to(&request.header, payload)));
    assert_eq!(version.load(Ordering::SeqCst), 4);
    Ok(())
}

#[test]
fn test_proxy_rejects_undecodable_response() {
    let receiver = MockReceiver::new(true);
    let mut proxy = proxy(&receiver);
    let called = Arc::new(AtomicBool::new(false));

    let flag = called.clone();
    proxy.query_version(move |_| flag.store(true, Ordering::SeqCst));

    let request = receiver.sent.lock().unwrap().pop().expect("request sent");
    let mut responder = receiver.responders.lock().unwrap().pop().expect("responder");
    assert!(!responder.accept(Message::response_to(&request.header, vec![0x05])));
    assert!(!called.load(Ordering::SeqCst));
}

/// Sets its flag when dropped.
struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[test]
fn test_refused_submission_releases_callback() {
    let receiver = MockReceiver::new(false);
    let mut proxy = proxy(&receiver);
    let dropped = Arc::new(AtomicBool::new(false));
    let called = Arc::new(AtomicBool::new(false));

    let guard = DropFlag(dropped.clone());
    let flag = called.clone();
    proxy.query_version(move |_| {
        let _guard = &guard;
        flag.store(true, Ordering::SeqCst);
    });

    assert!(dropped.load(Ordering::SeqCst));
    assert!(!called.load(Ordering::SeqCst));
    assert!(receiver.responders.lock().unwrap().is_empty());
}

#[test]
fn test_proxy_require_version_is_one_way() -> anyhow::Result<()> {
    let receiver = MockReceiver::new(true);
    let mut proxy = proxy(&receiver);
    proxy.require_version(5);

    let message = receiver.sent.lock().unwrap().pop().expect("message sent");
    assert_eq!(message.name(), MessageId::RUN_OR_CLOSE_PIPE);
    assert!(!message.expects_response());
    assert_eq!(
        RunOrClosePipeParams::from_bytes(&message.payload)?.input,
        RunOrClosePipeInput::RequireVersion { version: 5 }
    );
    assert!(receiver.responders.lock().unwrap().is_empty());
    Ok(())
}

// --- Config ---

#[test]
fn test_config_builder() {
    let config = BootstrapConfig::default();
    assert_eq!(config.interface_version, 0);
    assert_eq!(config.handshake_timeout, None);

    let config = config
        .name("gpu")
        .interface_version(7)
        .handshake_timeout(Duration::from_millis(250));
    assert_eq!(config.name, "gpu");
    assert_eq!(config.interface_version, 7);
    assert_eq!(config.handshake_timeout, Some(Duration::from_millis(250)));
}
