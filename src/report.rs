use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::future::Future;
use std::path::{Path, PathBuf};

use crate::{
    Aggregate,
    aggregate::Measurements,
    error::ReportError,
    executor::Run,
    metric::{CallKind, Measurement},
};

/// A [`Report`] is the processed form of a finished [`Run`].
///
/// Reports are pure data: built from a run, free of I/O, and serializable. A
/// [`Reporter`] takes care of sending them somewhere. Several reports can be built
/// from the same run.
///
/// # Example
/// ```rust
/// use horde::{Report, aggregate::Measurements, executor::Run};
/// use serde::Serialize;
///
/// #[derive(Debug, Serialize)]
/// struct SlowCalls(usize);
///
/// impl From<&Run<Measurements>> for SlowCalls {
///     fn from(run: &Run<Measurements>) -> Self {
///         SlowCalls(run.aggregate.iter().filter(|m| m.elapsed_ms() > 100.0).count())
///     }
/// }
///
/// impl Report<Measurements> for SlowCalls {}
/// ```
pub trait Report<A>
where
    Self: Send + Sync + Debug + Serialize + for<'a> From<&'a Run<A>>,
    A: Aggregate,
{
}

/// A [`Reporter`] consumes a [`Report`] and performs the side effects: printing it,
/// writing it to a file, sending it to a service.
pub trait Reporter<A: Aggregate, R: Report<A>> {
    fn report(&self, report: &R) -> impl Future<Output = Result<(), ReportError>>;
}

/// Header line of the CSV report.
pub const CSV_HEADER: &str = "RequestNumber;RequestType;RequestTime(ms)";

/// One line of the CSV report.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CsvRow {
    pub request_number: usize,
    pub request_time_ms: f64,
    pub request_type: CallKind,
    /// Failure cause, written as an extra trailing field.
    pub error: Option<String>,
}

impl From<&Measurement> for CsvRow {
    fn from(m: &Measurement) -> Self {
        Self {
            request_number: m.user_id,
            request_time_ms: m.elapsed_ms(),
            request_type: m.call_kind,
            error: m.error.clone(),
        }
    }
}

/// Every measurement of a run as semicolon-separated rows, in arrival order.
///
/// Rows read `user;elapsed_ms;kind`, with `elapsed_ms` printed to six decimals.
/// Failed calls carry their cause in a fourth field. Rendering is deterministic:
/// the same report always produces the same bytes.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CsvReport {
    pub rows: Vec<CsvRow>,
}

impl From<&Run<Measurements>> for CsvReport {
    fn from(run: &Run<Measurements>) -> Self {
        Self {
            rows: run.aggregate.iter().map(CsvRow::from).collect(),
        }
    }
}

impl Report<Measurements> for CsvReport {}

impl CsvReport {
    pub fn render(&self) -> String {
        let mut out = String::with_capacity(CSV_HEADER.len() + 1 + self.rows.len() * 24);
        out.push_str(CSV_HEADER);
        out.push('\n');
        for row in &self.rows {
            let mut line = format!(
                "{};{:.6};{}",
                row.request_number,
                row.request_time_ms,
                row.request_type.label()
            );
            if let Some(cause) = &row.error {
                line.push(';');
                line.push_str(&sanitize_field(cause));
            }
            out.push_str(&line);
            out.push('\n');
        }
        out
    }
}

/// Keeps a free-text cause on one line and inside one field.
fn sanitize_field(text: &str) -> String {
    text.chars()
        .map(|c| if matches!(c, ';' | '\n' | '\r') { ' ' } else { c })
        .collect()
}

/// Writes a [`CsvReport`] to a file, replacing any file already there.
#[derive(Clone, Debug)]
pub struct CsvReporter {
    path: PathBuf,
}

impl CsvReporter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Reporter<Measurements, CsvReport> for CsvReporter {
    async fn report(&self, report: &CsvReport) -> Result<(), ReportError> {
        tokio::fs::write(&self.path, report.render())
            .await
            .map_err(|source| ReportError::Write {
                path: self.path.clone(),
                source,
            })?;
        tracing::info!("Wrote {} rows to {}", report.rows.len(), self.path.display());
        Ok(())
    }
}

/// Counts for a finished run. No statistics, just what happened.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub users: usize,
    pub failed_users: usize,
    pub measurements: usize,
    pub json_calls: usize,
    pub post_calls: usize,
    pub failures: usize,
    pub wall_clock_ms: f64,
    pub cancelled: bool,
}

impl From<&Run<Measurements>> for Summary {
    fn from(run: &Run<Measurements>) -> Self {
        let agg = &run.aggregate;
        Self {
            users: run.users,
            failed_users: run.failed_users,
            measurements: agg.len(),
            json_calls: agg.count_of(CallKind::Json),
            post_calls: agg.count_of(CallKind::Post),
            failures: agg.failures(),
            wall_clock_ms: run.elapsed.as_secs_f64() * 1_000.0,
            cancelled: run.cancelled,
        }
    }
}

impl Report<Measurements> for Summary {}

/// Prints a [`Summary`] to stdout as pretty JSON.
pub struct StdoutReporter;

impl Reporter<Measurements, Summary> for StdoutReporter {
    async fn report(&self, report: &Summary) -> Result<(), ReportError> {
        println!("{}", serde_json::to_string_pretty(report)?);
        Ok(())
    }
}
