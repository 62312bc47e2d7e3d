use std::sync::Arc;
use std::thread;

use tracing::warn;

pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// An execution context that settlements can be delivered on.
///
/// An executor that drops a job without running it leaves the promise built
/// by [`Promise::via`](crate::Promise::via) rejected with
/// [`Error::ProducerDropped`](crate::Error::ProducerDropped).
pub trait Executor: Send + Sync {
    fn execute(&self, job: Job);
}

impl<E: Executor + ?Sized> Executor for Arc<E> {
    fn execute(&self, job: Job) {
        (**self).execute(job)
    }
}

/// Runs every job right away on the calling thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct Inline;

impl Executor for Inline {
    fn execute(&self, job: Job) {
        job()
    }
}

/// Spawns one OS thread per job.
///
/// ```
/// use deferred::{defer, Error, ThreadPerTask};
/// use std::thread;
///
/// let (deferred, promise) = defer::<u32>();
/// let name = promise
///     .via(ThreadPerTask::new().name("callbacks"))
///     .then(|_| Ok::<_, Error>(thread::current().name().map(String::from)));
/// deferred.resolve(1);
/// assert_eq!(name.wait(), Ok(Some(String::from("callbacks"))));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ThreadPerTask {
    name: Option<String>,
    stack_size: Option<usize>,
}

impl ThreadPerTask {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the name of the spawned threads.
    pub fn name<N: Into<String>>(self, name: N) -> Self {
        Self {
            name: Some(name.into()),
            ..self
        }
    }

    #[inline]
    pub fn stack_size(self, size: usize) -> Self {
        Self {
            stack_size: Some(size),
            ..self
        }
    }
}

impl Executor for ThreadPerTask {
    fn execute(&self, job: Job) {
        let mut builder = thread::Builder::new();
        if let Some(name) = &self.name {
            builder = builder.name(name.clone());
        }
        if let Some(size) = self.stack_size {
            builder = builder.stack_size(size);
        }
        if let Err(error) = builder.spawn(job) {
            warn!(%error, "failed to spawn executor thread, dropping job");
        }
    }
}
