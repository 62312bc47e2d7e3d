use std::sync::Arc;

/// Anything that can be asked to stop.
///
/// Cancellation is advisory: implementors abort early if they can, and
/// ignore the request if they have already finished. `cancel` may be called
/// more than once and from any thread.
pub trait Cancellable: Send + Sync {
    fn cancel(&self);
}

impl<C: Cancellable + ?Sized> Cancellable for Arc<C> {
    fn cancel(&self) {
        (**self).cancel()
    }
}

impl<C: Cancellable + ?Sized> Cancellable for Box<C> {
    fn cancel(&self) {
        (**self).cancel()
    }
}

/// Adapts a closure into a [`Cancellable`].
///
/// ```
/// use deferred::{Cancellable, OnCancel};
/// use std::sync::atomic::{AtomicBool, Ordering};
/// use std::sync::Arc;
///
/// let flag = Arc::new(AtomicBool::new(false));
/// let seen = flag.clone();
/// let task = OnCancel::new(move || seen.store(true, Ordering::SeqCst));
/// task.cancel();
/// assert!(flag.load(Ordering::SeqCst));
/// ```
pub struct OnCancel<F>(F);

impl<F> OnCancel<F>
where
    F: Fn() + Send + Sync,
{
    pub fn new(f: F) -> Self {
        OnCancel(f)
    }
}

impl<F> Cancellable for OnCancel<F>
where
    F: Fn() + Send + Sync,
{
    fn cancel(&self) {
        (self.0)()
    }
}
