use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use tracing::warn;

use crate::cancel::Cancellable;
use crate::cell::{self, Cell};
use crate::deferred::{self, Deferred, Rejecter, Resolver};
use crate::executor::Executor;
use crate::Error;

/// Where a promise is in its life. `Pending` is the only non-terminal state;
/// a promise leaves it at most once.
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement<T> {
    Pending,
    Fulfilled(T),
    Rejected(Error),
    Cancelled,
}

impl<T> Settlement<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, Settlement::Pending)
    }

    pub fn is_fulfilled(&self) -> bool {
        matches!(self, Settlement::Fulfilled(_))
    }

    pub fn is_rejected(&self) -> bool {
        matches!(self, Settlement::Rejected(_))
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Settlement::Cancelled)
    }

    pub fn value(&self) -> Option<&T> {
        match self {
            Settlement::Fulfilled(value) => Some(value),
            _ => None,
        }
    }

    pub fn error(&self) -> Option<&Error> {
        match self {
            Settlement::Rejected(error) => Some(error),
            _ => None,
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Settlement::Pending => "pending",
            Settlement::Fulfilled(_) => "fulfilled",
            Settlement::Rejected(_) => "rejected",
            Settlement::Cancelled => "cancelled",
        }
    }
}

impl<T: Clone> Settlement<T> {
    /// The terminal outcome as a `Result`; cancellation reads as
    /// [`Error::Cancelled`]. `None` while pending.
    pub fn outcome(&self) -> Option<Result<T, Error>> {
        match self {
            Settlement::Pending => None,
            Settlement::Fulfilled(value) => Some(Ok(value.clone())),
            Settlement::Rejected(error) => Some(Err(error.clone())),
            Settlement::Cancelled => Some(Err(Error::Cancelled)),
        }
    }
}

/// What a continuation hands to the promise returned by `then`.
///
/// Continuations usually return something convertible into a `Step`: a
/// `Result<U, Error>` settles the chained promise directly, a `Promise<U>` is
/// followed until it settles and its settlement is adopted.
pub enum Step<U> {
    Value(U),
    Fail(Error),
    Pipe(Promise<U>),
}

impl<U> From<Result<U, Error>> for Step<U> {
    fn from(result: Result<U, Error>) -> Self {
        match result {
            Ok(value) => Step::Value(value),
            Err(error) => Step::Fail(error),
        }
    }
}

impl<U> From<Promise<U>> for Step<U> {
    fn from(promise: Promise<U>) -> Self {
        Step::Pipe(promise)
    }
}

/// The consumer side of a [`Deferred`]: a read-only view of a value that
/// settles at most once.
///
/// A `Promise` is cheap to clone; every clone observes the same settlement.
/// It can be observed with continuations (`then`, `catch`, `finally`), waited
/// on from a thread (`wait`, `wait_timeout`) or awaited as a [`Future`].
///
/// Continuations run on the thread that settles the promise. One registered
/// after settlement runs immediately on the registering thread. Use
/// [`Promise::via`] to run them somewhere else.
///
/// # Examples
///
/// ```
/// use deferred::{Deferred, Error};
/// use std::thread;
///
/// let deferred = Deferred::<u32>::new();
/// let doubled = deferred.promise().then(|n| Ok::<_, Error>(n * 2));
///
/// thread::spawn(move || deferred.resolve(21));
/// assert_eq!(doubled.wait(), Ok(42));
/// ```
pub struct Promise<T> {
    cell: Arc<Cell<T>>,
}

impl<T> Promise<T> {
    pub(crate) fn from_cell(cell: Arc<Cell<T>>) -> Self {
        Promise { cell }
    }

    pub fn is_pending(&self) -> bool {
        self.cell.inspect(Settlement::is_pending)
    }

    pub fn is_fulfilled(&self) -> bool {
        self.cell.inspect(Settlement::is_fulfilled)
    }

    pub fn is_rejected(&self) -> bool {
        self.cell.inspect(Settlement::is_rejected)
    }

    pub fn is_cancelled(&self) -> bool {
        self.cell.inspect(Settlement::is_cancelled)
    }

    /// The rejection error, or `None` unless the promise is rejected.
    pub fn error(&self) -> Option<Error> {
        self.cell.inspect(|s| s.error().cloned())
    }

    /// Requests cancellation.
    ///
    /// A pending promise becomes `Cancelled`: the deferred's `when_cancelled`
    /// callbacks and every added cancellable are told, and `then`/`catch`
    /// continuations are skipped. A promise that has already settled is left
    /// alone. Never blocks.
    ///
    /// Cancelling a promise made by `then`, `catch`, `finally` or `via` also
    /// cancels the promise it was derived from. Every other chain hanging off
    /// that source is then cancelled too, so cancel a shared source only when
    /// no sibling still needs its value.
    ///
    /// A callback that panics during cancellation does not stop the others;
    /// the first panic is re-raised on the cancelling thread once all have run.
    pub fn cancel(&self) {
        self.cell.settle(Settlement::Cancelled);
    }

    /// Registers `child` to be cancelled along with this promise. If the
    /// promise is already cancelled, `child` is cancelled right away; if it
    /// settled some other way, `child` is dropped.
    pub fn add_cancellable(&self, child: impl Cancellable + 'static) {
        self.cell.add_child(Box::new(child));
    }

    /// Runs `observer` with the terminal settlement, whatever it is.
    pub(crate) fn observe(&self, observer: impl FnOnce(&Settlement<T>) + Send + 'static) {
        self.cell.observe(Box::new(observer));
    }
}

impl<T: Clone + Send + Sync + 'static> Promise<T> {
    /// Builds a promise by handing `executor` the means to settle it.
    ///
    /// The executor runs before `new` returns. If it drops both halves
    /// without settling, the promise rejects with [`Error::ProducerDropped`].
    ///
    /// ```
    /// use deferred::Promise;
    /// use std::thread;
    ///
    /// let promise = Promise::new(|resolve, _reject| {
    ///     thread::spawn(move || resolve.resolve("done"));
    /// });
    /// assert_eq!(promise.wait(), Ok("done"));
    /// ```
    pub fn new<F>(executor: F) -> Self
    where
        F: FnOnce(Resolver<T>, Rejecter<T>),
    {
        let deferred = Deferred::new();
        let promise = deferred.promise();
        let (resolve, reject) = deferred::split(deferred);
        executor(resolve, reject);
        promise
    }

    /// An already fulfilled promise.
    pub fn resolve(value: T) -> Self {
        let deferred = Deferred::new();
        deferred.resolve(value);
        deferred.promise()
    }

    /// An already rejected promise.
    pub fn reject(error: impl Into<Error>) -> Self {
        let deferred = Deferred::new();
        deferred.reject(error);
        deferred.promise()
    }

    /// The fulfilled value, or `None` unless the promise is fulfilled.
    pub fn value(&self) -> Option<T> {
        self.cell.inspect(|s| s.value().cloned())
    }

    /// A snapshot of the current settlement.
    pub fn state(&self) -> Settlement<T> {
        (*self.cell.snapshot()).clone()
    }

    /// Chains `on_fulfilled` onto this promise. A rejection skips it and
    /// passes through to the returned promise unchanged.
    pub fn then<U, F, R>(&self, on_fulfilled: F) -> Promise<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> R + Send + 'static,
        R: Into<Step<U>>,
    {
        self.chain(move |outcome| match outcome {
            Ok(value) => on_fulfilled(value).into(),
            Err(error) => Step::Fail(error),
        })
    }

    /// Chains both callbacks; exactly one of them runs, at most once.
    pub fn then_or<U, F, G, R, S>(&self, on_fulfilled: F, on_rejected: G) -> Promise<U>
    where
        U: Clone + Send + Sync + 'static,
        F: FnOnce(T) -> R + Send + 'static,
        G: FnOnce(Error) -> S + Send + 'static,
        R: Into<Step<U>>,
        S: Into<Step<U>>,
    {
        self.chain(move |outcome| match outcome {
            Ok(value) => on_fulfilled(value).into(),
            Err(error) => on_rejected(error).into(),
        })
    }

    /// Handles a rejection; a fulfilled value passes through untouched.
    pub fn catch<F, R>(&self, on_rejected: F) -> Promise<T>
    where
        F: FnOnce(Error) -> R + Send + 'static,
        R: Into<Step<T>>,
    {
        self.chain(move |outcome| match outcome {
            Ok(value) => Step::Value(value),
            Err(error) => on_rejected(error).into(),
        })
    }

    /// Runs `callback` on any terminal settlement, cancellation included. The
    /// returned promise settles exactly like this one, unless `callback`
    /// panics, in which case it rejects with [`Error::Panicked`].
    pub fn finally<F>(&self, callback: F) -> Promise<T>
    where
        F: FnOnce() + Send + 'static,
    {
        let (deferred, next) = self.derived();
        self.observe(move |settlement| {
            match panic::catch_unwind(AssertUnwindSafe(callback)) {
                Ok(()) => deferred.settle(settlement.clone()),
                Err(payload) => deferred.settle(Settlement::Rejected(panicked(payload))),
            };
        });
        next
    }

    /// A promise that settles like this one, but on `executor`.
    ///
    /// Continuations registered on the returned promise therefore run on
    /// `executor` rather than on the settling thread. If the executor drops
    /// the job, the returned promise rejects with [`Error::ProducerDropped`].
    pub fn via<E>(&self, executor: E) -> Promise<T>
    where
        E: Executor + 'static,
    {
        let (deferred, next) = self.derived();
        self.observe(move |settlement| {
            let settlement = settlement.clone();
            executor.execute(Box::new(move || {
                deferred.settle(settlement);
            }));
        });
        next
    }

    /// Blocks until the promise settles. A cancelled promise returns
    /// [`Error::Cancelled`] right away.
    pub fn wait(&self) -> Result<T, Error> {
        match self.cell.wait().outcome() {
            Some(outcome) => outcome,
            None => unreachable!("wait returned while pending"),
        }
    }

    /// Like [`wait`](Self::wait), but gives up after `timeout` and returns
    /// `None`. Timing out leaves the promise untouched.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, Error>> {
        let settlement = match Instant::now().checked_add(timeout) {
            Some(deadline) => self.cell.wait_until(deadline)?,
            None => self.cell.wait(),
        };
        settlement.outcome()
    }

    fn chain<U, H>(&self, handler: H) -> Promise<U>
    where
        U: Clone + Send + Sync + 'static,
        H: FnOnce(Result<T, Error>) -> Step<U> + Send + 'static,
    {
        let deferred = Deferred::<U>::with_label(self.cell.label().cloned());
        let chained = deferred.promise();
        chained.add_cancellable(self.clone());
        self.observe(move |settlement| {
            let outcome = match settlement {
                Settlement::Fulfilled(value) => Ok(value.clone()),
                Settlement::Rejected(error) => Err(error.clone()),
                Settlement::Cancelled => {
                    deferred.settle(Settlement::Cancelled);
                    return;
                }
                Settlement::Pending => return,
            };
            // A panicking handler fails its own promise only.
            let step = panic::catch_unwind(AssertUnwindSafe(move || handler(outcome)))
                .unwrap_or_else(|payload| Step::Fail(panicked(payload)));
            deferred.pipe(step);
        });
        chained
    }

    /// A fresh pair whose promise, when cancelled, cancels this one.
    fn derived(&self) -> (Deferred<T>, Promise<T>) {
        let deferred = Deferred::with_label(self.cell.label().cloned());
        let promise = deferred.promise();
        promise.add_cancellable(self.clone());
        (deferred, promise)
    }
}

fn panicked(payload: Box<dyn Any + Send>) -> Error {
    let message = cell::panic_message(&*payload).to_owned();
    warn!(panic = %message, "continuation panicked, rejecting its promise");
    Error::Panicked(message)
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Promise {
            cell: self.cell.clone(),
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("label", &self.cell.label())
            .field("state", &self.cell.inspect(Settlement::kind))
            .finish()
    }
}

impl<T: Send + Sync> Cancellable for Promise<T> {
    fn cancel(&self) {
        Promise::cancel(self)
    }
}

impl<T: Clone> Future for Promise<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.cell.poll(cx.waker()).and_then(|s| s.outcome()) {
            Some(outcome) => Poll::Ready(outcome),
            None => Poll::Pending,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::panic::{self, AssertUnwindSafe};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    use super::{Promise, Settlement};
    use crate::{defer, Error};

    #[test]
    fn test_fresh_promise_is_pending() {
        let (_deferred, promise) = defer::<u32>();
        assert!(promise.is_pending());
        assert!(!promise.is_fulfilled());
        assert!(!promise.is_rejected());
        assert!(!promise.is_cancelled());
        assert_eq!(promise.value(), None);
        assert_eq!(promise.error(), None);
        assert_eq!(promise.state(), Settlement::Pending);
    }

    #[test]
    fn test_resolve_twice_keeps_first_value() {
        let (deferred, promise) = defer();
        deferred.resolve("first");
        deferred.resolve("second");
        deferred.reject(Error::producer("test", 1, "late"));
        assert_eq!(promise.value(), Some("first"));
        assert_eq!(promise.error(), None);
    }

    #[test]
    fn test_then_before_and_after_settlement() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (deferred, promise) = defer::<u32>();

        let early = calls.clone();
        let before = promise.then(move |n| {
            early.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Error>(n + 1)
        });
        deferred.resolve(1);
        deferred.resolve(5);
        let late = calls.clone();
        let after = promise.then(move |n| {
            late.fetch_add(1, Ordering::SeqCst);
            Ok::<_, Error>(n + 2)
        });

        assert_eq!(before.value(), Some(2));
        assert_eq!(after.value(), Some(3));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_then_or_picks_the_rejected_branch() {
        let (deferred, promise) = defer::<u32>();
        let fulfilled = Arc::new(AtomicUsize::new(0));
        let seen = fulfilled.clone();
        let chained = promise.then_or(
            move |_| {
                seen.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Error>(String::from("value"))
            },
            |error| Ok::<_, Error>(error.to_string()),
        );
        deferred.reject(Error::producer("io", 5, "broken pipe"));
        assert_eq!(chained.value(), Some(String::from("io (5): broken pipe")));
        assert_eq!(fulfilled.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_rejection_propagates_through_then() {
        let (deferred, promise) = defer::<u32>();
        let error = Error::producer("db", 3, "locked");
        let tail = promise
            .then(|n| Ok::<_, Error>(n + 1))
            .then(|n| Ok::<_, Error>(n * 10));
        deferred.reject(error.clone());
        assert_eq!(tail.wait(), Err(error.clone()));

        let recovered = tail.catch(|_| Ok::<_, Error>(0));
        assert_eq!(recovered.value(), Some(0));
    }

    #[test]
    fn test_then_flattens_returned_promise() {
        let (outer, promise) = defer::<u32>();
        let (inner, inner_promise) = defer::<String>();
        let chained = promise.then(move |_| inner_promise);

        outer.resolve(1);
        assert!(chained.is_pending());
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            inner.resolve(String::from("inner"));
        });
        assert_eq!(chained.wait(), Ok(String::from("inner")));
        producer.join().expect("The producer thread has panicked");
    }

    #[test]
    fn test_finally_runs_on_every_settlement() {
        let calls = Arc::new(AtomicUsize::new(0));

        let count = calls.clone();
        let fulfilled = Promise::resolve(4).finally(move || {
            count.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(fulfilled.value(), Some(4));

        let count = calls.clone();
        let error = Error::producer("test", 2, "nope");
        let rejected = Promise::<u32>::reject(error.clone()).finally(move || {
            count.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(rejected.error(), Some(error));

        let (_deferred, pending) = defer::<u32>();
        let count = calls.clone();
        let cancelled = pending.finally(move || {
            count.fetch_add(1, Ordering::SeqCst);
        });
        pending.cancel();
        assert!(cancelled.is_cancelled());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn test_cancel_skips_continuations() {
        let (deferred, promise) = defer::<u32>();
        let calls = Arc::new(AtomicUsize::new(0));
        let (on_value, on_error) = (calls.clone(), calls.clone());
        let chained = promise.then_or(
            move |n| {
                on_value.fetch_add(1, Ordering::SeqCst);
                Ok::<_, Error>(n)
            },
            move |e| {
                on_error.fetch_add(1, Ordering::SeqCst);
                Err::<u32, _>(e)
            },
        );
        promise.cancel();
        deferred.resolve(1);

        assert!(promise.is_cancelled());
        assert!(chained.is_cancelled());
        assert_eq!(chained.wait(), Err(Error::Cancelled));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_cancelling_a_chain_cancels_its_source() {
        let (deferred, promise) = defer::<u32>();
        let cancelled = Arc::new(AtomicUsize::new(0));
        let count = cancelled.clone();
        deferred.when_cancelled(move || {
            count.fetch_add(1, Ordering::SeqCst);
        });

        let tail = promise
            .then(|n| Ok::<_, Error>(n + 1))
            .finally(|| {});
        tail.cancel();

        assert!(promise.is_cancelled());
        assert!(deferred.is_cancelled());
        assert_eq!(cancelled.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_wait_timeout_returns_none_and_leaves_promise_running() {
        let (deferred, promise) = defer::<u32>();
        let producer = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            deferred.resolve(7);
        });

        assert_eq!(promise.wait_timeout(Duration::ZERO), None);
        assert!(promise.is_pending());
        producer.join().expect("The producer thread has panicked");
        assert_eq!(promise.wait_timeout(Duration::ZERO), Some(Ok(7)));
    }

    #[test]
    fn test_wait_on_cancelled_promise_returns() {
        let (_deferred, promise) = defer::<u32>();
        let waiter = {
            let promise = promise.clone();
            thread::spawn(move || promise.wait())
        };
        thread::sleep(Duration::from_millis(10));
        promise.cancel();
        assert_eq!(
            waiter.join().expect("The waiter thread has panicked"),
            Err(Error::Cancelled)
        );
        assert_eq!(promise.wait_timeout(Duration::MAX), Some(Err(Error::Cancelled)));
    }

    #[test]
    fn test_new_hands_out_resolver() {
        let promise = Promise::<u32>::new(|_resolve, reject| {
            reject.reject(Error::producer("exec", 9, "refused"));
        });
        assert_eq!(promise.error(), Some(Error::producer("exec", 9, "refused")));

        let dropped = Promise::<u32>::new(|_resolve, _reject| {});
        assert_eq!(dropped.wait(), Err(Error::ProducerDropped));
    }

    #[test]
    fn test_panicking_then_rejects_only_its_own_chain() {
        let (deferred, promise) = defer::<u32>();
        let before = promise.then(|n| Ok::<_, Error>(n + 1));
        let broken = promise.then(|_| -> Result<u32, Error> { panic!("handler blew up") });
        let after = promise.then(|n| Ok::<_, Error>(n * 10));

        deferred.resolve(4);

        assert_eq!(before.value(), Some(5));
        assert_eq!(after.value(), Some(40));
        assert_eq!(
            broken.wait(),
            Err(Error::Panicked(String::from("handler blew up")))
        );

        // Registered after settlement, the handler runs inline and must not
        // unwind into the caller either.
        let late = promise.then(|_| -> Result<u32, Error> { panic!("late") });
        assert_eq!(late.error(), Some(Error::Panicked(String::from("late"))));
    }

    #[test]
    fn test_panicking_finally_rejects_and_siblings_still_run() {
        let (deferred, promise) = defer::<u32>();
        let broken = promise.finally(|| panic!("cleanup failed"));
        let sibling = promise.then(|n| Ok::<_, Error>(n + 1));

        let settled = panic::catch_unwind(AssertUnwindSafe(|| deferred.resolve(1)));
        assert!(settled.is_ok());
        assert_eq!(sibling.value(), Some(2));
        assert_eq!(
            broken.error(),
            Some(Error::Panicked(String::from("cleanup failed")))
        );
    }
}
