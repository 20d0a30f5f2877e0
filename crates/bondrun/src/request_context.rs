//! # Request Context
//!
//! A thread-local scope around one entry into the runtime. While it is alive,
//! watcher notifications and cancellations produced deep inside the runtime
//! are only *recorded*. They run when the outermost scope on the thread ends,
//! which is after every lock taken during the call has been released.
//!
//! ## Nesting
//!
//! Runtime entry points call each other, so scopes nest. Only the outermost
//! one owns the finalizer lists; a nested scope records into the same lists
//! and does nothing when it ends.
//!
//! ## Order
//!
//! Cancellations run first, in registration order. Notifications run next,
//! in registration order, except for watchers cancelled in the same flush.

use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;

use crate::watcher::SignalsState;
use crate::watcher::WatchResult;
use crate::watcher::Watcher;

/// Finalizers kept inline before the lists spill to the heap.
const INLINE_FINALIZERS: usize = 4;

thread_local! {
    static CURRENT: RefCell<Option<Finalizers>> = const { RefCell::new(None) };
}

/// A deferred `Watcher::on_signal` call.
struct NotifyFinalizer {
    watcher: Arc<dyn Watcher>,
    result: WatchResult,
    state: SignalsState,
}

/// Insertion-ordered list that stays off the heap for its first `N` items.
struct InlineList<T, const N: usize> {
    inline: [Option<T>; N],
    len: usize,
    spill: Vec<T>,
}

impl<T, const N: usize> InlineList<T, N> {
    fn new() -> Self {
        Self {
            inline: std::array::from_fn(|_| None),
            len: 0,
            spill: Vec::new(),
        }
    }

    fn push(&mut self, value: T) {
        if self.len < N {
            self.inline[self.len] = Some(value);
        } else {
            self.spill.push(value);
        }
        self.len += 1;
    }

    fn len(&self) -> usize {
        self.len
    }

    fn iter(&self) -> impl Iterator<Item = &T> + '_ {
        self.inline[..self.len.min(N)]
            .iter()
            .filter_map(Option::as_ref)
            .chain(self.spill.iter())
    }

    /// Takes every item out, oldest first.
    fn drain(&mut self) -> impl Iterator<Item = T> + '_ {
        let inline = self.len.min(N);
        self.len = 0;
        self.inline[..inline]
            .iter_mut()
            .filter_map(Option::take)
            .chain(self.spill.drain(..))
    }
}

struct Finalizers {
    notify: InlineList<NotifyFinalizer, INLINE_FINALIZERS>,
    cancel: InlineList<Arc<dyn Watcher>, INLINE_FINALIZERS>,
}

impl Finalizers {
    fn new() -> Self {
        Self {
            notify: InlineList::new(),
            cancel: InlineList::new(),
        }
    }

    fn run(mut self) {
        for watcher in self.cancel.iter() {
            watcher.on_cancel();
        }
        for finalizer in self.notify.drain() {
            if self.cancel.iter().any(|w| same_watcher(w, &finalizer.watcher)) {
                continue;
            }
            finalizer.watcher.on_signal(finalizer.result, finalizer.state);
        }
    }
}

fn same_watcher(a: &Arc<dyn Watcher>, b: &Arc<dyn Watcher>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

/// Scope guard for one entry into the runtime on the current thread.
///
/// Construct one at the top of any call that may produce watcher side
/// effects and keep it alive until the call returns. Registrations made
/// through any instance on a thread go to the outermost one.
///
/// Not `Send`: a context belongs to the thread that created it.
pub struct RequestContext {
    outermost: bool,
    _not_send: PhantomData<*const ()>,
}

impl RequestContext {
    /// Opens a scope. It becomes the outermost scope if none is active.
    pub fn new() -> Self {
        let outermost = CURRENT.with(|current| {
            let mut current = current.borrow_mut();
            if current.is_some() {
                false
            } else {
                *current = Some(Finalizers::new());
                true
            }
        });
        Self { outermost, _not_send: PhantomData }
    }

    /// A view of the scope that is active on this thread, if any.
    ///
    /// The view records into the outermost scope's lists and never runs
    /// finalizers itself.
    pub fn current() -> Option<Self> {
        let active = CURRENT.with(|current| current.borrow().is_some());
        active.then_some(Self { outermost: false, _not_send: PhantomData })
    }

    /// Whether this instance will run the thread's finalizers when dropped.
    pub fn is_outermost(&self) -> bool {
        self.outermost
    }

    /// Schedules `watcher.on_signal(result, state)` for the end of the
    /// outermost scope, unless the watcher is cancelled in the same flush.
    pub fn add_notify_finalizer(
        &self,
        watcher: Arc<dyn Watcher>,
        result: WatchResult,
        state: SignalsState,
    ) {
        with_finalizers(|f| f.notify.push(NotifyFinalizer { watcher, result, state }));
    }

    /// Schedules `watcher.on_cancel()` for the end of the outermost scope.
    pub fn add_cancel_finalizer(&self, watcher: Arc<dyn Watcher>) {
        with_finalizers(|f| f.cancel.push(watcher));
    }

    /// Number of finalizers waiting on this thread, for diagnostics.
    pub fn pending() -> usize {
        CURRENT.with(|current| {
            current
                .borrow()
                .as_ref()
                .map_or(0, |f| f.notify.len() + f.cancel.len())
        })
    }
}

impl Default for RequestContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Records into the active scope. A registration made while the outermost
/// scope is already flushing (from inside a finalizer callback) gets a fresh
/// scope of its own, which flushes on return.
fn with_finalizers(f: impl FnOnce(&mut Finalizers)) {
    let mut f = Some(f);
    let recorded = CURRENT.with(|current| match current.borrow_mut().as_mut() {
        Some(finalizers) => {
            if let Some(f) = f.take() {
                f(finalizers);
            }
            true
        }
        None => false,
    });
    if !recorded {
        let _scope = RequestContext::new();
        if let Some(f) = f.take() {
            CURRENT.with(|current| {
                if let Some(finalizers) = current.borrow_mut().as_mut() {
                    f(finalizers);
                }
            });
        }
    }
}

impl Drop for RequestContext {
    fn drop(&mut self) {
        if !self.outermost {
            return;
        }
        // Clear the slot before running anything: callbacks may enter the
        // runtime again and open scopes of their own.
        let finalizers = CURRENT
            .try_with(|current| current.borrow_mut().take())
            .ok()
            .flatten();
        if let Some(finalizers) = finalizers {
            finalizers.run();
        }
    }
}
