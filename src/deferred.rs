use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use tracing::warn;

use crate::cell::Cell;
use crate::promise::{Promise, Settlement, Step};
use crate::Error;

/// The producer side of a promise. There is exactly one `Deferred` per
/// [`Promise`]; whoever holds it decides how the promise settles.
///
/// Settling is first-write-wins: the first of `resolve`, `reject` or a
/// cancellation of the promise sticks, every later attempt is ignored.
/// Dropping a `Deferred` that never settled rejects its promise with
/// [`Error::ProducerDropped`].
///
/// # Examples
///
/// ```
/// use deferred::Deferred;
/// use futures::executor::block_on;
/// use std::thread;
///
/// let deferred = Deferred::<String>::new();
/// let promise = deferred.promise();
///
/// let task1 = thread::spawn(move || block_on(async {
///     assert_eq!(promise.await.unwrap(), "🍓");
/// }));
/// deferred.resolve(String::from("🍓"));
/// task1.join().expect("The task1 thread has panicked");
/// ```
pub struct Deferred<T> {
    cell: Arc<Cell<T>>,
}

impl<T> Deferred<T> {
    pub fn new() -> Self {
        Self::with_label(None)
    }

    /// A deferred whose tracing events carry `label`.
    pub fn named(label: impl Into<Cow<'static, str>>) -> Self {
        Self::with_label(Some(label.into()))
    }

    pub(crate) fn with_label(label: Option<Cow<'static, str>>) -> Self {
        Deferred {
            cell: Arc::new(Cell::new(label)),
        }
    }

    /// The consumer handle paired with this deferred.
    pub fn promise(&self) -> Promise<T> {
        Promise::from_cell(self.cell.clone())
    }

    #[doc(alias = "fulfill")]
    pub fn resolve(&self, value: T) {
        self.settle(Settlement::Fulfilled(value));
    }

    /// Rejects the promise. `None` (through `Option<Error>`) is replaced with
    /// [`Error::default`].
    pub fn reject(&self, error: impl Into<Error>) {
        self.settle(Settlement::Rejected(error.into()));
    }

    /// Resolves or rejects depending on `result`.
    pub fn complete(&self, result: Result<T, Error>) {
        match result {
            Ok(value) => self.resolve(value),
            Err(error) => self.reject(error),
        }
    }

    /// Registers `callback` to run if the promise is cancelled before it
    /// settles any other way. It runs on the thread that cancels, or right
    /// away if the promise is already cancelled.
    pub fn when_cancelled(&self, callback: impl FnOnce() + Send + 'static) {
        self.cell.on_cancel(Box::new(callback));
    }

    /// Producers can poll this to give up early.
    pub fn is_cancelled(&self) -> bool {
        self.cell.inspect(Settlement::is_cancelled)
    }

    pub fn is_settled(&self) -> bool {
        self.cell.inspect(|s| !s.is_pending())
    }

    pub(crate) fn settle(&self, settlement: Settlement<T>) -> bool {
        self.cell.settle(settlement)
    }
}

impl<T: Clone + Send + Sync + 'static> Deferred<T> {
    /// Settles from the outcome of a continuation, following a returned
    /// promise until it settles.
    pub(crate) fn pipe(self, step: Step<T>) {
        match step {
            Step::Value(value) => self.resolve(value),
            Step::Fail(error) => self.reject(error),
            Step::Pipe(inner) => {
                self.promise().add_cancellable(inner.clone());
                inner.observe(move |settlement| {
                    self.settle(settlement.clone());
                });
            }
        }
    }
}

impl<T> Default for Deferred<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for Deferred<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Deferred")
            .field("label", &self.cell.label())
            .field("state", &self.cell.inspect(Settlement::kind))
            .finish()
    }
}

impl<T> Drop for Deferred<T> {
    /// If this is an unsettled deferred, reject with an error.
    fn drop(&mut self) {
        if self.cell.inspect(Settlement::is_pending) {
            warn!(
                label = self.cell.label_field(),
                "deferred dropped before it was settled"
            );
            self.cell.settle(Settlement::Rejected(Error::ProducerDropped));
        }
    }
}

/// The resolving half handed to the executor of [`Promise::new`].
pub struct Resolver<T> {
    deferred: Arc<Deferred<T>>,
}

/// The rejecting half handed to the executor of [`Promise::new`].
pub struct Rejecter<T> {
    deferred: Arc<Deferred<T>>,
}

pub(crate) fn split<T>(deferred: Deferred<T>) -> (Resolver<T>, Rejecter<T>) {
    let deferred = Arc::new(deferred);
    (
        Resolver {
            deferred: deferred.clone(),
        },
        Rejecter { deferred },
    )
}

impl<T> Resolver<T> {
    pub fn resolve(&self, value: T) {
        self.deferred.resolve(value)
    }

    pub fn is_cancelled(&self) -> bool {
        self.deferred.is_cancelled()
    }
}

impl<T> Rejecter<T> {
    pub fn reject(&self, error: impl Into<Error>) {
        self.deferred.reject(error)
    }

    pub fn is_cancelled(&self) -> bool {
        self.deferred.is_cancelled()
    }
}

impl<T> Clone for Resolver<T> {
    fn clone(&self) -> Self {
        Resolver {
            deferred: self.deferred.clone(),
        }
    }
}

impl<T> Clone for Rejecter<T> {
    fn clone(&self) -> Self {
        Rejecter {
            deferred: self.deferred.clone(),
        }
    }
}
