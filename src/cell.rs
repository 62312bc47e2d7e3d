//! The completion cell shared by a `Deferred` and every clone of its
//! `Promise`.
//!
//! All state lives behind one lock: the settlement, the continuations waiting
//! for it, the cancellation hooks and the child cancellables. A transition is
//! decided under the lock, but every callback runs after the lock is released,
//! so callbacks are free to touch this or any other cell.
use std::any::Any;
use std::borrow::Cow;
use std::mem;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::task::Waker;
use std::time::Instant;

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, trace};

use crate::cancel::Cancellable;
use crate::promise::Settlement;

pub(crate) type Observer<T> = Box<dyn FnOnce(&Settlement<T>) + Send>;
type Hook = Box<dyn FnOnce() + Send>;

pub(crate) struct Cell<T> {
    label: Option<Cow<'static, str>>,
    state: Mutex<State<T>>,
    settled: Condvar,
}

struct State<T> {
    settlement: Arc<Settlement<T>>,
    observers: Vec<Observer<T>>,
    on_cancel: Vec<Hook>,
    children: Vec<Box<dyn Cancellable>>,
    wakers: Vec<Waker>,
}

impl<T> Cell<T> {
    pub(crate) fn new(label: Option<Cow<'static, str>>) -> Self {
        Cell {
            label,
            state: Mutex::new(State {
                settlement: Arc::new(Settlement::Pending),
                observers: Vec::new(),
                on_cancel: Vec::new(),
                children: Vec::new(),
                wakers: Vec::new(),
            }),
            settled: Condvar::new(),
        }
    }

    pub(crate) fn label(&self) -> Option<&Cow<'static, str>> {
        self.label.as_ref()
    }

    pub(crate) fn label_field(&self) -> &str {
        self.label.as_deref().unwrap_or("-")
    }

    /// Moves the cell out of `Pending`. Returns `false`, changing nothing, if
    /// the cell was already terminal.
    pub(crate) fn settle(&self, settlement: Settlement<T>) -> bool {
        debug_assert!(!settlement.is_pending());
        let (snapshot, observers, on_cancel, children, wakers) = {
            let mut state = self.state.lock();
            if !state.settlement.is_pending() {
                debug!(
                    label = self.label_field(),
                    current = state.settlement.kind(),
                    attempted = settlement.kind(),
                    "ignoring settlement of an already settled promise"
                );
                return false;
            }
            state.settlement = Arc::new(settlement);
            self.settled.notify_all();
            (
                state.settlement.clone(),
                mem::take(&mut state.observers),
                mem::take(&mut state.on_cancel),
                mem::take(&mut state.children),
                mem::take(&mut state.wakers),
            )
        };

        trace!(
            label = self.label_field(),
            state = snapshot.kind(),
            observers = observers.len(),
            "promise settled"
        );

        for waker in wakers {
            waker.wake();
        }
        // Every callback runs even if an earlier one panics; the first panic
        // is re-raised once they all have.
        let mut first_panic = None;
        if snapshot.is_cancelled() {
            debug!(
                label = self.label_field(),
                hooks = on_cancel.len(),
                children = children.len(),
                "promise cancelled"
            );
            for hook in on_cancel {
                self.run_guarded(&mut first_panic, hook);
            }
            for child in children {
                self.run_guarded(&mut first_panic, move || child.cancel());
            }
        }
        for observer in observers {
            let snapshot = &snapshot;
            self.run_guarded(&mut first_panic, move || observer(snapshot));
        }
        if let Some(payload) = first_panic {
            panic::resume_unwind(payload);
        }
        true
    }

    fn run_guarded(&self, first_panic: &mut Option<Box<dyn Any + Send>>, f: impl FnOnce()) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
            error!(
                label = self.label_field(),
                panic = panic_message(&*payload),
                "callback panicked while settling promise"
            );
            first_panic.get_or_insert(payload);
        }
    }

    /// Runs `observer` once the cell is terminal, or right away if it already is.
    pub(crate) fn observe(&self, observer: Observer<T>) {
        let snapshot = {
            let mut state = self.state.lock();
            if state.settlement.is_pending() {
                state.observers.push(observer);
                return;
            }
            state.settlement.clone()
        };
        trace!(label = self.label_field(), "dispatching late continuation inline");
        observer(&snapshot);
    }

    /// Runs `hook` if, and only if, the cell is cancelled.
    pub(crate) fn on_cancel(&self, hook: Hook) {
        {
            let mut state = self.state.lock();
            match *state.settlement {
                Settlement::Pending => {
                    state.on_cancel.push(hook);
                    return;
                }
                Settlement::Cancelled => {}
                _ => return,
            }
        }
        hook();
    }

    pub(crate) fn add_child(&self, child: Box<dyn Cancellable>) {
        {
            let mut state = self.state.lock();
            match *state.settlement {
                Settlement::Pending => {
                    state.children.push(child);
                    return;
                }
                Settlement::Cancelled => {}
                _ => return,
            }
        }
        child.cancel();
    }

    pub(crate) fn snapshot(&self) -> Arc<Settlement<T>> {
        self.state.lock().settlement.clone()
    }

    pub(crate) fn inspect<R>(&self, f: impl FnOnce(&Settlement<T>) -> R) -> R {
        f(&self.state.lock().settlement)
    }

    /// Blocks until the cell is terminal.
    pub(crate) fn wait(&self) -> Arc<Settlement<T>> {
        let mut state = self.state.lock();
        while state.settlement.is_pending() {
            self.settled.wait(&mut state);
        }
        state.settlement.clone()
    }

    /// Blocks until the cell is terminal or `deadline` passes.
    pub(crate) fn wait_until(&self, deadline: Instant) -> Option<Arc<Settlement<T>>> {
        let mut state = self.state.lock();
        while state.settlement.is_pending() {
            if self.settled.wait_until(&mut state, deadline).timed_out() {
                if state.settlement.is_pending() {
                    return None;
                }
                break;
            }
        }
        Some(state.settlement.clone())
    }

    /// Returns the settlement if terminal, otherwise registers `waker`.
    pub(crate) fn poll(&self, waker: &Waker) -> Option<Arc<Settlement<T>>> {
        let mut state = self.state.lock();
        if !state.settlement.is_pending() {
            return Some(state.settlement.clone());
        }
        if !state.wakers.iter().any(|w| w.will_wake(waker)) {
            state.wakers.push(waker.clone());
        }
        None
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message
    } else {
        "Box<dyn Any>"
    }
}
