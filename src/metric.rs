use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::macros::metric;

/// A `Metric` represents a single observed measurement produced while driving the
/// system under test.
///
/// Metrics are the most granular level of data in horde. They are produced by the
/// simulated users, travel by value through the result stream, and are collected by an
/// [`crate::Aggregate`] before a [`crate::Report`] turns them into output.
///
/// Metrics must be `Send` and `Clone` so they can cross task boundaries, and
/// serializable so aggregates holding them can be persisted.
///
/// ## Example
/// ```rust
/// use horde::{Metric, macros::metric};
/// use std::time::Duration;
///
/// #[metric]
/// struct QueueDepth {
///     depth: usize,
///     sampled_after: Duration,
/// }
/// ```
pub trait Metric
where
    Self: Serialize + DeserializeOwned + PartialOrd + PartialEq + Send + Sync + fmt::Debug + Clone,
{
}

/// Classification of a request, used for reporting.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum CallKind {
    /// A GET that fetches a JSON document.
    Json,
    /// A form-encoded POST.
    Post,
    /// Anything else, including calls that failed before they could be measured.
    Unknown,
}

impl CallKind {
    /// Label written to the report file.
    pub fn label(self) -> &'static str {
        match self {
            CallKind::Json => "JSON",
            CallKind::Post => "POST",
            CallKind::Unknown => "UNKNOWN",
        }
    }
}

impl fmt::Display for CallKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// One timed call made by one simulated user.
///
/// A failed call is recorded with [`CallKind::Unknown`], a zero `elapsed` and the
/// cause in `error`.
#[metric]
pub struct Measurement {
    /// 0-indexed id of the simulated user that made the call.
    pub user_id: usize,
    pub call_kind: CallKind,
    pub elapsed: Duration,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Measurement {
    pub fn success(user_id: usize, call_kind: CallKind, elapsed: Duration) -> Self {
        Self {
            user_id,
            call_kind,
            elapsed,
            error: None,
        }
    }

    pub fn failure(user_id: usize, cause: impl fmt::Display) -> Self {
        Self {
            user_id,
            call_kind: CallKind::Unknown,
            elapsed: Duration::ZERO,
            error: Some(cause.to_string()),
        }
    }

    pub fn is_failure(&self) -> bool {
        self.error.is_some()
    }

    /// Elapsed time in fractional milliseconds.
    pub fn elapsed_ms(&self) -> f64 {
        self.elapsed.as_nanos() as f64 / 1_000_000.0
    }
}
