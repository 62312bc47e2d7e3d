use std::any::Any;
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

/// The error channel shared by every `Promise<T>`, whatever `T` is.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// A producer rejected its deferred.
    #[error(transparent)]
    Producer(#[from] ProducerError),
    /// One or more children of `Promise::all` failed.
    #[error(transparent)]
    Aggregate(#[from] AggregateError),
    /// The promise was cancelled before it settled.
    #[error("promise was cancelled")]
    Cancelled,
    /// The deferred was dropped without ever being settled.
    #[error("deferred was dropped before it was settled")]
    ProducerDropped,
    /// A continuation panicked; holds the panic message.
    #[error("continuation panicked: {0}")]
    Panicked(String),
}

impl Error {
    /// Shorthand for a [`ProducerError`] wrapped in [`Error::Producer`].
    pub fn producer(
        domain: impl Into<Cow<'static, str>>,
        code: i64,
        message: impl Into<String>,
    ) -> Self {
        Error::Producer(ProducerError::new(domain, code, message))
    }
}

impl Default for Error {
    fn default() -> Self {
        Error::Producer(ProducerError::unknown())
    }
}

/// A missing error is never stored as such: `None` becomes [`Error::default`].
impl From<Option<Error>> for Error {
    fn from(error: Option<Error>) -> Self {
        error.unwrap_or_default()
    }
}

/// Error surfaced by whoever settles a deferred; opaque to the promise itself.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{domain} ({code}): {message}")]
pub struct ProducerError {
    pub domain: Cow<'static, str>,
    pub code: i64,
    pub message: String,
}

impl ProducerError {
    pub fn new(domain: impl Into<Cow<'static, str>>, code: i64, message: impl Into<String>) -> Self {
        Self {
            domain: domain.into(),
            code,
            message: message.into(),
        }
    }

    /// The error used when a producer rejects without saying why.
    pub fn unknown() -> Self {
        Self::new("deferred", 0, "rejected without an error")
    }
}

/// Rejection of an aggregate promise.
///
/// `failures` holds every child that did not fulfill, in input order, paired
/// with its index. `fulfilled` lists the indices of the children that did, and
/// [`value`](Self::value) hands back their values. Equality compares indices
/// and errors only.
#[derive(Clone, Error)]
pub struct AggregateError {
    pub total: usize,
    pub failures: Vec<(usize, Error)>,
    pub fulfilled: Vec<usize>,
    values: Vec<Arc<dyn Any + Send + Sync>>,
}

impl AggregateError {
    pub fn new(total: usize, failures: Vec<(usize, Error)>, fulfilled: Vec<usize>) -> Self {
        AggregateError {
            total,
            failures,
            fulfilled,
            values: Vec::new(),
        }
    }

    pub(crate) fn with_values<T: Send + Sync + 'static>(
        total: usize,
        failures: Vec<(usize, Error)>,
        fulfilled: Vec<(usize, T)>,
    ) -> Self {
        let (fulfilled, values) = fulfilled
            .into_iter()
            .map(|(index, value)| (index, Arc::new(value) as Arc<dyn Any + Send + Sync>))
            .unzip();
        AggregateError {
            total,
            failures,
            fulfilled,
            values,
        }
    }

    /// The value of the child at `index`, if that child fulfilled and `T` is
    /// its value type.
    pub fn value<T: 'static>(&self, index: usize) -> Option<&T> {
        let position = self.fulfilled.iter().position(|i| *i == index)?;
        self.values.get(position)?.downcast_ref::<T>()
    }

    /// The error of the child at `index`, if that child failed.
    pub fn failure(&self, index: usize) -> Option<&Error> {
        self.failures
            .iter()
            .find(|(i, _)| *i == index)
            .map(|(_, error)| error)
    }
}

impl PartialEq for AggregateError {
    fn eq(&self, other: &Self) -> bool {
        self.total == other.total
            && self.failures == other.failures
            && self.fulfilled == other.fulfilled
    }
}

impl fmt::Debug for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AggregateError")
            .field("total", &self.total)
            .field("failures", &self.failures)
            .field("fulfilled", &self.fulfilled)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for AggregateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} of {} promises failed", self.failures.len(), self.total)?;
        for (index, error) in &self.failures {
            write!(f, "; [{}] {}", index, error)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_error_is_synthesized() {
        let error: Error = None.into();
        assert_eq!(error, Error::Producer(ProducerError::unknown()));

        let given = Error::producer("net", 7, "boom");
        assert_eq!(Error::from(Some(given.clone())), given);
    }

    #[test]
    fn test_aggregate_error_lists_every_failure() {
        let error = AggregateError::with_values(
            3,
            vec![(0, Error::Cancelled), (2, Error::producer("io", 2, "eof"))],
            vec![(1, String::from("middle"))],
        );
        assert_eq!(error.failure(0), Some(&Error::Cancelled));
        assert_eq!(error.failure(1), None);
        assert_eq!(error.value::<String>(1).map(String::as_str), Some("middle"));
        assert_eq!(error.value::<u32>(1), None);
        assert_eq!(error.value::<String>(0), None);
        assert_eq!(
            error,
            AggregateError::new(3, error.failures.clone(), vec![1])
        );
        assert_eq!(
            error.to_string(),
            "2 of 3 promises failed; [0] promise was cancelled; [2] io (2): eof"
        );
    }
}
