//! # Watchers
//!
//! Observers of a channel's signal state. The runtime never calls a watcher
//! directly: every notification or cancellation is queued on the current
//! `RequestContext` and delivered once the runtime has let go of its own
//! bookkeeping.

use std::sync::Arc;
use std::sync::atomic::AtomicU64;
use std::sync::atomic::Ordering;

use dashmap::DashMap;

use crate::request_context::RequestContext;

/// A set of channel signals.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct Signals(u32);

impl Signals {
    pub const NONE: Signals = Signals(0);
    /// Inbound messages are waiting for a receiver to be bound.
    pub const READABLE: Signals = Signals(1 << 0);
    /// Outbound messages can be submitted.
    pub const WRITABLE: Signals = Signals(1 << 1);
    /// The channel is closed; nothing more will arrive.
    pub const PEER_CLOSED: Signals = Signals(1 << 2);

    pub fn contains(self, other: Signals) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn intersects(self, other: Signals) -> bool {
        self.0 & other.0 != 0
    }
}

impl std::ops::BitOr for Signals {
    type Output = Signals;

    fn bitor(self, rhs: Signals) -> Signals {
        Signals(self.0 | rhs.0)
    }
}

/// Which signals hold now, and which could still come to hold.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct SignalsState {
    pub satisfied: Signals,
    pub satisfiable: Signals,
}

impl SignalsState {
    pub(crate) fn open(readable: bool) -> Self {
        let mut satisfied = Signals::WRITABLE;
        if readable {
            satisfied = satisfied | Signals::READABLE;
        }
        Self {
            satisfied,
            satisfiable: Signals::READABLE | Signals::WRITABLE | Signals::PEER_CLOSED,
        }
    }

    pub(crate) fn closed() -> Self {
        Self {
            satisfied: Signals::PEER_CLOSED,
            satisfiable: Signals::PEER_CLOSED,
        }
    }
}

/// Outcome delivered with a notification.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WatchResult {
    /// A watched signal became satisfied.
    Ok,
    /// No watched signal can ever become satisfied again.
    FailedPrecondition,
}

/// Receives signal notifications for a channel.
///
/// Callbacks run on whichever thread finishes the runtime call that produced
/// them, after that call has released its locks. They may call back into the
/// runtime, including `watch` and `cancel_watch`.
pub trait Watcher: Send + Sync {
    fn on_signal(&self, result: WatchResult, state: SignalsState);

    /// The watch was cancelled. No further `on_signal` calls follow.
    fn on_cancel(&self) {}
}

/// Identifies a registered watch on a channel.
#[derive(Copy, Clone, Debug, Hash, PartialEq, Eq)]
pub struct WatchId(pub u64);

impl std::fmt::Display for WatchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "watch-{}", self.0)
    }
}

struct Registration {
    signals: Signals,
    watcher: Arc<dyn Watcher>,
}

/// The watchers registered on one channel.
#[derive(Default)]
pub(crate) struct WatcherSet {
    entries: DashMap<WatchId, Registration>,
    next_id: AtomicU64,
}

impl WatcherSet {
    pub(crate) fn add(&self, signals: Signals, watcher: Arc<dyn Watcher>) -> WatchId {
        let id = WatchId(self.next_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.entries.insert(id, Registration { signals, watcher });
        id
    }

    /// Removes a watch and queues its cancellation.
    pub(crate) fn cancel(&self, ctx: &RequestContext, id: WatchId) -> bool {
        match self.entries.remove(&id) {
            Some((_, registration)) => {
                ctx.add_cancel_finalizer(registration.watcher);
                true
            }
            None => false,
        }
    }

    /// Queues a notification for every watch interested in `signals`.
    pub(crate) fn signal(&self, ctx: &RequestContext, signals: Signals, state: SignalsState) {
        for entry in self.entries.iter() {
            if entry.signals.intersects(signals) {
                ctx.add_notify_finalizer(Arc::clone(&entry.watcher), WatchResult::Ok, state);
            }
        }
    }

    /// Queues the final notification for every watch and forgets them all.
    pub(crate) fn close(&self, ctx: &RequestContext) {
        let ids: Vec<WatchId> = self.entries.iter().map(|e| *e.key()).collect();
        for id in ids {
            if let Some((_, registration)) = self.entries.remove(&id) {
                ctx.add_notify_finalizer(
                    registration.watcher,
                    closed_result(registration.signals),
                    SignalsState::closed(),
                );
            }
        }
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Result reported to a watch on `signals` once the channel is closed.
pub(crate) fn closed_result(signals: Signals) -> WatchResult {
    if signals.intersects(Signals::PEER_CLOSED) {
        WatchResult::Ok
    } else {
        WatchResult::FailedPrecondition
    }
}
