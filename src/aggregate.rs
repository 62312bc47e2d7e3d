//! Fan-in of many promises into one.
//!
//! Aggregation waits for every child before settling, then fails if any child
//! failed. The aggregate error lists all failed children, not just the first.
//! Cancelling an aggregate cancels every child that is still pending.
use std::mem;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::trace;

use crate::deferred::Deferred;
use crate::error::AggregateError;
use crate::promise::Promise;
use crate::Error;

type Finish<T, U> = fn(Vec<Result<T, Error>>) -> Result<U, Error>;

struct Gather<T, U> {
    state: Mutex<GatherState<T>>,
    deferred: Deferred<U>,
    finish: Finish<T, U>,
}

struct GatherState<T> {
    outcomes: Vec<Option<Result<T, Error>>>,
    remaining: usize,
}

impl<T, U> Gather<T, U> {
    fn record(&self, index: usize, outcome: Result<T, Error>) {
        let outcomes = {
            let mut state = self.state.lock();
            if state.outcomes[index].is_some() {
                return;
            }
            state.outcomes[index] = Some(outcome);
            state.remaining -= 1;
            trace!(index, remaining = state.remaining, "aggregate child settled");
            if state.remaining > 0 {
                return;
            }
            mem::take(&mut state.outcomes)
        };
        let outcomes = outcomes.into_iter().flatten().collect();
        self.deferred.complete((self.finish)(outcomes));
    }
}

impl<T: Clone + Send + Sync + 'static> Promise<T> {
    /// A promise of every child's value, in input order.
    ///
    /// Fulfills once all children fulfill. Otherwise it waits until every
    /// child has settled and rejects with an [`Error::Aggregate`] naming each
    /// child that was rejected or cancelled. An empty input fulfills at once
    /// with an empty `Vec`.
    ///
    /// ```
    /// use deferred::{defer, Promise};
    ///
    /// let (a, pa) = defer();
    /// let (b, pb) = defer();
    /// let all = Promise::all([pa, pb]);
    /// b.resolve(2);
    /// a.resolve(1);
    /// assert_eq!(all.value(), Some(vec![1, 2]));
    /// ```
    pub fn all<I>(promises: I) -> Promise<Vec<T>>
    where
        I: IntoIterator<Item = Promise<T>>,
    {
        gather(promises, split_outcomes)
    }

    /// Alias of [`Promise::all`].
    #[inline]
    pub fn when<I>(promises: I) -> Promise<Vec<T>>
    where
        I: IntoIterator<Item = Promise<T>>,
    {
        Self::all(promises)
    }

    /// A promise of every child's outcome, in input order. Never rejects.
    pub fn all_settled<I>(promises: I) -> Promise<Vec<Result<T, Error>>>
    where
        I: IntoIterator<Item = Promise<T>>,
    {
        gather(promises, Ok)
    }
}

fn gather<T, U, I>(promises: I, finish: Finish<T, U>) -> Promise<U>
where
    T: Clone + Send + Sync + 'static,
    U: Send + Sync + 'static,
    I: IntoIterator<Item = Promise<T>>,
{
    let children: Vec<Promise<T>> = promises.into_iter().collect();
    let deferred = Deferred::new();
    let aggregate = deferred.promise();
    if children.is_empty() {
        deferred.complete(finish(Vec::new()));
        return aggregate;
    }

    for child in &children {
        aggregate.add_cancellable(child.clone());
    }
    let gather = Arc::new(Gather {
        state: Mutex::new(GatherState {
            outcomes: (0..children.len()).map(|_| None).collect(),
            remaining: children.len(),
        }),
        deferred,
        finish,
    });
    for (index, child) in children.iter().enumerate() {
        let gather = gather.clone();
        child.observe(move |settlement| {
            if let Some(outcome) = settlement.outcome() {
                gather.record(index, outcome);
            }
        });
    }
    aggregate
}

fn split_outcomes<T: Send + Sync + 'static>(
    outcomes: Vec<Result<T, Error>>,
) -> Result<Vec<T>, Error> {
    let total = outcomes.len();
    let mut fulfilled = Vec::with_capacity(total);
    let mut failures = Vec::new();
    for (index, outcome) in outcomes.into_iter().enumerate() {
        match outcome {
            Ok(value) => fulfilled.push((index, value)),
            Err(error) => failures.push((index, error)),
        }
    }
    if failures.is_empty() {
        Ok(fulfilled.into_iter().map(|(_, value)| value).collect())
    } else {
        Err(Error::Aggregate(AggregateError::with_values(
            total, failures, fulfilled,
        )))
    }
}
