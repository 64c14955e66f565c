use std::{sync::Arc, time::Duration};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use typed_builder::TypedBuilder;

use crate::{
    aggregate::Aggregate,
    error::CallError,
    executor::{Executor, Run},
    metric::{CallKind, Measurement},
    target::Target,
    timing::measure,
};

/// What a single step sends to the target.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Request {
    Get { path: String },
    /// A POST whose body is the form-encoded `form` pairs.
    PostForm {
        path: String,
        form: Vec<(String, String)>,
    },
}

impl Request {
    pub fn path(&self) -> &str {
        match self {
            Request::Get { path } | Request::PostForm { path, .. } => path,
        }
    }
}

/// One call in a simulated user's sequence.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Step {
    /// Kind recorded on the step's measurement.
    pub kind: CallKind,
    pub request: Request,
    /// Treat a non-2xx response as a failed call.
    pub require_success: bool,
}

impl Step {
    pub fn get(kind: CallKind, path: impl Into<String>) -> Self {
        Self {
            kind,
            request: Request::Get { path: path.into() },
            require_success: false,
        }
    }

    pub fn post_form<K, V>(
        kind: CallKind,
        path: impl Into<String>,
        form: impl IntoIterator<Item = (K, V)>,
    ) -> Self
    where
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            kind,
            request: Request::PostForm {
                path: path.into(),
                form: form.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            },
            require_success: false,
        }
    }

    pub fn require_success(mut self) -> Self {
        self.require_success = true;
        self
    }
}

/// The sequence every simulated user runs unless told otherwise: fetch `/json`, then
/// post a small form to `/echo`.
pub fn default_steps() -> Vec<Step> {
    vec![
        Step::get(CallKind::Json, "/json").require_success(),
        Step::post_form(CallKind::Post, "/echo", [("form_data", "Hello world!")]),
    ]
}

/// How one simulated user's sequence ended.
#[derive(Debug)]
pub enum UserOutcome {
    /// Every step was measured and emitted.
    Completed,
    /// A step failed. Its failure measurement was emitted and the rest were skipped.
    Failed { kind: CallKind, error: CallError },
    /// The run was cancelled before the user finished.
    Cancelled,
}

/// A `Scenario` ties a [`Target`] to the ordered steps each simulated user performs.
///
/// Cloning is cheap: the target and the steps are shared, so every user task gets
/// its own handle.
///
/// ```rust,no_run
/// use horde::{Scenario, target::HttpTarget};
///
/// # fn main() -> Result<(), horde::error::CallError> {
/// let scenario = Scenario::builder()
///     .name("json then echo")
///     .target(HttpTarget::new("http://localhost:8080", None)?)
///     .build();
/// assert_eq!(scenario.steps_per_user(), 2);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, TypedBuilder)]
pub struct Scenario<T: Target> {
    #[builder(setter(into))]
    pub name: String,
    #[builder(setter(transform = |target: T| Arc::new(target)))]
    pub target: Arc<T>,
    #[builder(
        default = Arc::from(default_steps()),
        setter(transform = |steps: Vec<Step>| Arc::from(steps))
    )]
    pub steps: Arc<[Step]>,
    /// Pause between two consecutive steps of the same user.
    #[builder(default = Duration::ZERO)]
    pub think_time: Duration,
}

impl<T: Target> Clone for Scenario<T> {
    fn clone(&self) -> Self {
        Self {
            name: self.name.clone(),
            target: Arc::clone(&self.target),
            steps: Arc::clone(&self.steps),
            think_time: self.think_time,
        }
    }
}

impl<T: Target> Scenario<T> {
    pub fn steps_per_user(&self) -> usize {
        self.steps.len()
    }

    /// Run the scenario with `executor` and return the finished run.
    pub async fn run<A, E>(&self, executor: &E) -> Result<Run<A>, E::Error>
    where
        A: Aggregate<Metric = Measurement>,
        E: Executor<A, T>,
    {
        executor.exec(self).await
    }

    /// Simulate one user: run every step in order and emit one measurement per step.
    ///
    /// Cancellation stops the user before its next step, or drops the call in flight
    /// without a measurement. A failed step emits a failure measurement and ends the
    /// user's sequence.
    pub async fn simulate_user(
        &self,
        user_id: usize,
        results: &mpsc::Sender<Measurement>,
        cancel: &CancellationToken,
        call_timeout: Option<Duration>,
    ) -> UserOutcome {
        for (i, step) in self.steps.iter().enumerate() {
            if i > 0 && !self.think_time.is_zero() {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    _ = tokio::time::sleep(self.think_time) => {}
                }
            }
            if cancel.is_cancelled() {
                tracing::debug!("User {user_id} cancelled before step {i}.");
                return UserOutcome::Cancelled;
            }

            let timed = tokio::select! {
                biased;
                timed = measure(|| self.call_with_deadline(step, call_timeout)) => timed,
                _ = cancel.cancelled() => {
                    tracing::debug!("User {user_id} cancelled during step {i}.");
                    return UserOutcome::Cancelled;
                }
            };
            let (measurement, failure) = match timed {
                Ok(elapsed) => (Measurement::success(user_id, step.kind, elapsed), None),
                Err(error) => {
                    tracing::warn!(user_id, kind = %step.kind, "Call failed: {error}");
                    (Measurement::failure(user_id, &error), Some(error))
                }
            };

            if results.send(measurement).await.is_err() {
                // Only happens if the aggregator is gone.
                tracing::error!(user_id, "Result stream closed while the user was running.");
                return UserOutcome::Cancelled;
            }

            if let Some(error) = failure {
                return UserOutcome::Failed {
                    kind: step.kind,
                    error,
                };
            }
        }

        UserOutcome::Completed
    }

    async fn call_with_deadline(
        &self,
        step: &Step,
        call_timeout: Option<Duration>,
    ) -> Result<(), CallError> {
        match call_timeout {
            Some(deadline) => tokio::time::timeout(deadline, self.target.call(step))
                .await
                .map_err(|_| CallError::Timeout(deadline))?,
            None => self.target.call(step).await,
        }
    }
}
