//! Deferred values for threaded code.
//!
//! A [`Deferred`] is the write side of a single-assignment cell and a
//! [`Promise`] its shared read side. The holder of the deferred settles it
//! once, with [`Deferred::resolve`] or [`Deferred::reject`]; everyone holding
//! the promise sees that settlement, either through continuations
//! ([`Promise::then`], [`Promise::catch`], [`Promise::finally`]), by blocking
//! ([`Promise::wait`], [`Promise::wait_timeout`]) or by `.await`ing it.
//!
//! Promises can be combined with [`Promise::all`] and cancelled with
//! [`Promise::cancel`]. Cancellation is cooperative: it marks the promise
//! `Cancelled`, tells the producer through [`Deferred::when_cancelled`] and
//! anything added with [`Promise::add_cancellable`], and skips pending
//! continuations.
//!
//! ```
//! use deferred::{defer, Error};
//! use std::thread;
//!
//! let (deferred, promise) = defer::<u32>();
//! let message = promise.then(|n| Ok::<_, Error>(format!("got {}", n)));
//!
//! thread::spawn(move || deferred.resolve(7));
//! assert_eq!(message.wait(), Ok(String::from("got 7")));
//! ```
mod aggregate;
mod cancel;
mod cell;
mod deferred;
mod error;
pub mod executor;
pub mod net;
mod promise;

pub use cancel::{Cancellable, OnCancel};
pub use deferred::{Deferred, Rejecter, Resolver};
pub use error::{AggregateError, Error, ProducerError};
pub use executor::{Executor, Inline, ThreadPerTask};
pub use promise::{Promise, Settlement, Step};

/// Creates a pending deferred and its promise.
pub fn defer<T>() -> (Deferred<T>, Promise<T>) {
    let deferred = Deferred::new();
    let promise = deferred.promise();
    (deferred, promise)
}
