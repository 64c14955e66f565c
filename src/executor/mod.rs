//! Executor: orchestration of a run.
//!
//! The `Executor` trait is the runtime that executes a [`Scenario`]. Horde ships the
//! [`UserExecutor`], which launches a fixed number of simulated users under a
//! concurrency cap and funnels every measurement into one aggregate.
//!
//! # High-level flow
//! 1. A result stream (`tokio::sync::mpsc`) is opened, sized to hold every
//!    measurement the run can produce, so users never wait on the aggregator.
//! 2. The aggregator task is spawned. It owns the receiving end.
//! 3. For each user the executor takes a permit from the [`ConcurrencyLimiter`] and
//!    spawns a task that owns the permit and a clone of the sender.
//! 4. Once every user is launched, the executor drains the limiter. Getting all
//!    permits back means every user has finished and dropped its sender.
//! 5. The executor drops the last sender. The stream closes, the aggregator returns,
//!    and the run is complete.
//!
//! Only the executor holds the original sender and only it drops it, after the
//! barrier. A user can never write to a closed stream: while it holds a sender the
//! stream is open.
pub mod limiter;
pub mod users;

pub use limiter::{ConcurrencyLimiter, DEFAULT_CONCURRENCY};
pub use users::{DEFAULT_CALL_TIMEOUT, UserExecutor};

use serde::{Deserialize, Serialize};
use std::{future::Future, time::Duration};

use crate::{aggregate::Aggregate, metric::Measurement, scenario::Scenario, target::Target};

/// The runtime hook that executes a `Scenario`.
pub trait Executor<A, T>
where
    Self: Send + Sync + Sized,
    A: Aggregate<Metric = Measurement>,
    T: Target,
{
    type Error;

    /// Execute the scenario and return the finished run.
    fn exec(
        &self,
        scenario: &Scenario<T>,
    ) -> impl Future<Output = Result<Run<A>, Self::Error>> + Send;
}

/// What the executor does when a user's call fails.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum FailurePolicy {
    /// Record the failure, stop that user, keep the run going.
    #[default]
    Continue,
    /// Cancel the whole run on the first failure and report no results.
    Abort,
}

/// A finished run: the aggregate plus what the executor observed.
#[derive(Clone, Debug)]
pub struct Run<A> {
    pub aggregate: A,
    /// Wall-clock time from the first launch until the aggregator has taken the last
    /// measurement.
    pub elapsed: Duration,
    /// Users that were launched. Lower than requested only if the run was cancelled.
    pub users: usize,
    /// Users whose sequence ended in a failure or a panic.
    pub failed_users: usize,
    /// Some users were never launched or were stopped before their last step.
    pub cancelled: bool,
}
