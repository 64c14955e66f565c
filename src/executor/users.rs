use std::time::Duration;

use tokio::{
    sync::{Semaphore, mpsc},
    task::{JoinError, JoinSet},
    time::Instant,
};
use tokio_util::sync::CancellationToken;
use typed_builder::TypedBuilder;

use super::{ConcurrencyLimiter, DEFAULT_CONCURRENCY, Executor, FailurePolicy, Run};
use crate::{
    aggregate::{Aggregate, aggregator_task},
    error::{CallError, ConfigError, RunError},
    metric::Measurement,
    scenario::{Scenario, UserOutcome},
    target::Target,
};

/// Upper bound on measurements the aggregator takes per wakeup.
const AGGREGATOR_BATCH: usize = 256;

/// Deadline applied to each call unless the executor is told otherwise.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// Executor that runs `users` simulated users, at most `concurrency` at a time.
///
/// Every user runs the scenario's full step sequence once. The run ends when the
/// last user is done; the returned aggregate then holds
/// `users * scenario.steps_per_user()` measurements, unless users failed or the run
/// was cancelled.
///
/// ```rust,no_run
/// use horde::{Scenario, aggregate::Measurements, executor::UserExecutor, target::HttpTarget};
///
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let scenario = Scenario::builder()
///     .name("json then echo")
///     .target(HttpTarget::new("http://localhost:8080", None)?)
///     .build();
/// let executor = UserExecutor::builder().users(1_000).concurrency(50).build();
///
/// let run = scenario.run::<Measurements, _>(&executor).await?;
/// assert_eq!(run.aggregate.len(), 2_000);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Debug, TypedBuilder)]
pub struct UserExecutor {
    /// Total number of simulated users.
    pub users: usize,
    /// Maximum number of users running at once.
    #[builder(default = DEFAULT_CONCURRENCY)]
    pub concurrency: usize,
    #[builder(default)]
    pub on_failure: FailurePolicy,
    /// Deadline for each individual call. `None` lets a call run for as long as the
    /// target takes.
    #[builder(default = Some(DEFAULT_CALL_TIMEOUT))]
    pub call_timeout: Option<Duration>,
    /// Cancels the run from outside. Calls in flight are dropped, users stop and
    /// pending launches are skipped; whatever was measured is still returned.
    #[builder(default)]
    pub cancel: CancellationToken,
}

impl UserExecutor {
    /// Check the configuration and build the limiter for a run.
    pub fn validate(&self) -> Result<ConcurrencyLimiter, ConfigError> {
        if self.users == 0 {
            return Err(ConfigError::NoUsers);
        }
        ConcurrencyLimiter::new(self.concurrency)
    }
}

impl<A, T> Executor<A, T> for UserExecutor
where
    A: Aggregate<Metric = Measurement> + 'static,
    T: Target,
{
    type Error = RunError;

    async fn exec(&self, scenario: &Scenario<T>) -> Result<Run<A>, Self::Error> {
        let limiter = self.validate()?;
        let steps = scenario.steps_per_user();
        if steps == 0 {
            return Err(ConfigError::NoSteps.into());
        }

        // Room for every measurement of the run, so users never block on a send.
        let capacity = self
            .users
            .saturating_mul(steps)
            .min(Semaphore::MAX_PERMITS);
        let (results_tx, results_rx) = mpsc::channel(capacity);
        // Aborting cancels this child only, never the caller's token.
        let cancel = self.cancel.child_token();

        tracing::info!(
            users = self.users,
            concurrency = limiter.limit(),
            steps,
            "Running scenario: {}",
            scenario.name
        );
        let start = Instant::now();
        let aggregator = tokio::spawn(aggregator_task::<A>(results_rx, AGGREGATOR_BATCH));

        let mut tally = Tally::default();
        let mut running = JoinSet::new();
        let mut launched = 0;
        for user_id in 0..self.users {
            let Some(permit) = limiter.acquire(&cancel).await else {
                tracing::warn!("Run cancelled after launching {launched} users.");
                break;
            };

            let scenario = scenario.clone();
            let tx = results_tx.clone();
            let cancel = cancel.clone();
            let policy = self.on_failure;
            let call_timeout = self.call_timeout;
            running.spawn(async move {
                tracing::debug!("User {user_id} started.");
                let outcome = scenario
                    .simulate_user(user_id, &tx, &cancel, call_timeout)
                    .await;
                let failed = matches!(outcome, UserOutcome::Failed { .. });
                if failed && policy == FailurePolicy::Abort {
                    cancel.cancel();
                }
                // The sender goes before the permit, so a drained limiter means no
                // user can still write.
                drop(tx);
                drop(permit);
                tracing::debug!("User {user_id} finished.");
                (user_id, outcome)
            });
            launched += 1;

            while let Some(res) = running.try_join_next() {
                tally.record(res);
            }
        }

        limiter.drain().await;
        // Last sender: this closes the result stream, exactly once.
        drop(results_tx);

        let aggregate = aggregator.await?;
        let elapsed = start.elapsed();
        while let Some(res) = running.join_next().await {
            tally.record(res);
        }

        tracing::info!("Load test is done. Time taken = {elapsed:?}");

        if self.on_failure == FailurePolicy::Abort {
            if let Some((user_id, source)) = tally.first_failure {
                tracing::error!(user_id, "Run aborted: {source}");
                return Err(RunError::Aborted { user_id, source });
            }
        }

        let cancelled = launched < self.users || tally.cancelled > 0;
        if cancelled {
            tracing::warn!("Run was cancelled, results are partial.");
        }
        if tally.failed > 0 {
            tracing::warn!("{} of {launched} users failed.", tally.failed);
        }

        Ok(Run {
            aggregate,
            elapsed,
            users: launched,
            failed_users: tally.failed,
            cancelled,
        })
    }
}

/// Outcomes of finished user tasks.
#[derive(Default)]
struct Tally {
    failed: usize,
    cancelled: usize,
    first_failure: Option<(usize, CallError)>,
}

impl Tally {
    fn record(&mut self, res: Result<(usize, UserOutcome), JoinError>) {
        match res {
            Ok((user_id, UserOutcome::Failed { error, .. })) => {
                self.failed += 1;
                if self.first_failure.is_none() {
                    self.first_failure = Some((user_id, error));
                }
            }
            Ok((_, UserOutcome::Cancelled)) => self.cancelled += 1,
            Ok((_, UserOutcome::Completed)) => {}
            Err(e) => {
                // The permit and sender were released while unwinding.
                tracing::error!("User task panicked: {e}");
                self.failed += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{aggregate::Measurements, metric::CallKind, scenario::Step};

    struct Immediate;

    struct Stalled;

    impl Target for Stalled {
        async fn call(&self, _: &Step) -> Result<(), CallError> {
            std::future::pending().await
        }
    }

    struct Slow(Duration);

    impl Target for Slow {
        async fn call(&self, _: &Step) -> Result<(), CallError> {
            tokio::time::sleep(self.0).await;
            Ok(())
        }
    }

    /// Fires the token while serving the final step.
    struct CancelsOnLastStep(CancellationToken);

    impl Target for CancelsOnLastStep {
        async fn call(&self, step: &Step) -> Result<(), CallError> {
            if step.kind == CallKind::Post {
                self.0.cancel();
            }
            Ok(())
        }
    }

    impl Target for Immediate {
        async fn call(&self, _: &Step) -> Result<(), CallError> {
            Ok(())
        }
    }

    fn scenario() -> Scenario<Immediate> {
        Scenario::builder().name("unit").target(Immediate).build()
    }

    #[tokio::test]
    async fn rejects_zero_users() {
        let executor = UserExecutor::builder().users(0).build();
        let res = scenario().run::<Measurements, _>(&executor).await;
        assert!(matches!(res, Err(RunError::Config(ConfigError::NoUsers))));
    }

    #[tokio::test]
    async fn rejects_zero_concurrency() {
        let executor = UserExecutor::builder().users(1).concurrency(0).build();
        let res = scenario().run::<Measurements, _>(&executor).await;
        assert!(matches!(
            res,
            Err(RunError::Config(ConfigError::Concurrency { value: 0, .. }))
        ));
    }

    #[tokio::test]
    async fn rejects_an_empty_scenario() {
        let s = Scenario::builder()
            .name("empty")
            .target(Immediate)
            .steps(vec![])
            .build();
        let executor = UserExecutor::builder().users(1).build();
        let res = s.run::<Measurements, _>(&executor).await;
        assert!(matches!(res, Err(RunError::Config(ConfigError::NoSteps))));
    }

    #[tokio::test]
    async fn single_user_produces_json_then_post() {
        let executor = UserExecutor::builder().users(1).build();
        let run = scenario()
            .run::<Measurements, _>(&executor)
            .await
            .unwrap();

        assert_eq!(run.users, 1);
        assert_eq!(run.failed_users, 0);
        assert!(!run.cancelled);
        let rows: Vec<(usize, CallKind)> = run
            .aggregate
            .iter()
            .map(|m| (m.user_id, m.call_kind))
            .collect();
        assert_eq!(rows, vec![(0, CallKind::Json), (0, CallKind::Post)]);
    }

    #[tokio::test]
    async fn step_count_drives_the_run_size() {
        let s = Scenario::builder()
            .name("three steps")
            .target(Immediate)
            .steps(vec![
                Step::get(CallKind::Json, "/a"),
                Step::get(CallKind::Json, "/b"),
                Step::get(CallKind::Json, "/c"),
            ])
            .build();
        let executor = UserExecutor::builder().users(7).concurrency(2).build();
        let run = s.run::<Measurements, _>(&executor).await.unwrap();
        assert_eq!(run.aggregate.len(), 21);
    }

    #[tokio::test]
    async fn cancelled_before_start_launches_nobody() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let executor = UserExecutor::builder().users(10).cancel(cancel).build();
        let run = scenario()
            .run::<Measurements, _>(&executor)
            .await
            .unwrap();

        assert!(run.cancelled);
        assert_eq!(run.users, 0);
        assert!(run.aggregate.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_call_times_out_by_default() {
        let executor = UserExecutor::builder().users(2).build();
        assert_eq!(executor.call_timeout, Some(DEFAULT_CALL_TIMEOUT));

        let s = Scenario::builder().name("stalled").target(Stalled).build();
        let run = s.run::<Measurements, _>(&executor).await.unwrap();

        assert_eq!(run.failed_users, 2);
        assert_eq!(run.aggregate.len(), 2);
        let expected = CallError::Timeout(DEFAULT_CALL_TIMEOUT).to_string();
        assert!(run.aggregate.iter().all(|m| m.error.as_ref() == Some(&expected)));
        assert!(!run.cancelled);
    }

    #[tokio::test]
    async fn cancel_after_the_last_step_is_not_a_partial_run() {
        let cancel = CancellationToken::new();
        let s = Scenario::builder()
            .name("late cancel")
            .target(CancelsOnLastStep(cancel.clone()))
            .build();
        let executor = UserExecutor::builder().users(1).cancel(cancel.clone()).build();

        let run = s.run::<Measurements, _>(&executor).await.unwrap();

        assert!(cancel.is_cancelled());
        assert!(!run.cancelled);
        assert_eq!(run.users, 1);
        assert_eq!(run.aggregate.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn elapsed_spans_every_users_calls() {
        let s = Scenario::builder()
            .name("slow")
            .target(Slow(Duration::from_secs(2)))
            .build();
        // Two waves of two users, two calls each.
        let executor = UserExecutor::builder().users(4).concurrency(2).build();

        let run = s.run::<Measurements, _>(&executor).await.unwrap();

        let expected = Duration::from_secs(8);
        assert!(run.elapsed >= expected);
        assert!(run.elapsed < expected + Duration::from_millis(50));
    }
}
