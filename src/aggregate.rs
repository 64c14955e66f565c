use crate::Metric;
use crate::macros::aggregate;
use crate::metric::{CallKind, Measurement};

use serde::{Serialize, de::DeserializeOwned};
use std::fmt::Debug;
use tokio::sync::mpsc;

/// The `Aggregate` trait defines how [`Metric`] values coming out of the result
/// stream are collected into an intermediate representation.
///
/// Aggregates should not compute final statistics. Those belong in a
/// [`crate::Report`], which is built from the aggregate once the run is over.
///
/// A run has exactly one aggregate, fed by [`aggregator_task`] in the order metrics
/// arrive on the stream.
///
/// # Example
/// ```rust
/// use horde::{Aggregate, metric::Measurement, macros::aggregate};
///
/// #[aggregate]
/// struct FailureCounter {
///     failures: u64,
/// }
///
/// impl Aggregate for FailureCounter {
///     type Metric = Measurement;
///
///     fn new() -> Self {
///         Self { failures: 0 }
///     }
///
///     fn consume(&mut self, metric: Self::Metric) {
///         if metric.is_failure() {
///             self.failures += 1;
///         }
///     }
/// }
/// ```
pub trait Aggregate
where
    Self: Serialize + DeserializeOwned + PartialOrd + PartialEq + Send + Sync + Debug + Clone,
{
    /// The metric type this aggregate collects.
    type Metric: Metric;

    /// Create a new, empty instance of the aggregate.
    fn new() -> Self;

    /// Aggregate multiple metrics, in order, into the current instance.
    fn aggregate(&mut self, metrics: impl IntoIterator<Item = Self::Metric>) {
        metrics.into_iter().for_each(|m| self.consume(m));
    }

    /// Incorporate a single metric into the aggregate.
    fn consume(&mut self, metric: Self::Metric);
}

/// Drains the result stream into a fresh aggregate.
///
/// Returns once every sender has been dropped and all buffered metrics have been
/// consumed. Metrics that are already queued are taken in batches of up to
/// `batch_size` to keep wakeups low under heavy load.
pub async fn aggregator_task<A: Aggregate>(
    mut rx: mpsc::Receiver<A::Metric>,
    batch_size: usize,
) -> A {
    let mut agg = A::new();
    let mut batch = Vec::with_capacity(batch_size.max(1));

    // Zero means every sender is gone and the buffer is empty.
    while rx.recv_many(&mut batch, batch_size.max(1)).await > 0 {
        agg.aggregate(batch.drain(..));
    }

    tracing::debug!("Result stream closed, aggregator done.");
    agg
}

/// Every [`Measurement`] of a run, in arrival order.
///
/// Arrival order is not user order: users run concurrently and their measurements
/// interleave. Within a single user, measurements keep the order of the user's steps.
#[aggregate]
#[derive(Default)]
pub struct Measurements {
    pub items: Vec<Measurement>,
}

impl Aggregate for Measurements {
    type Metric = Measurement;

    fn new() -> Self {
        Measurements::default()
    }

    fn consume(&mut self, metric: Self::Metric) {
        self.items.push(metric);
    }
}

impl Measurements {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Measurement> {
        self.items.iter()
    }

    pub fn failures(&self) -> usize {
        self.items.iter().filter(|m| m.is_failure()).count()
    }

    /// Number of successful measurements of the given kind.
    pub fn count_of(&self, kind: CallKind) -> usize {
        self.items
            .iter()
            .filter(|m| !m.is_failure() && m.call_kind == kind)
            .count()
    }
}

impl<'a> IntoIterator for &'a Measurements {
    type Item = &'a Measurement;
    type IntoIter = std::slice::Iter<'a, Measurement>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}
