//! Horde: a small HTTP load generator.
//!
//! Horde spawns a fixed number of simulated users against a target service. Each user
//! runs the same short sequence of requests, every request is timed, and all timings
//! flow through a single result stream into one aggregate that is reported once the
//! run is over.
//!
//! # Architecture
//!
//! The main building blocks are:
//!
//! - [`Scenario`]: the target plus the ordered steps each simulated user performs.
//! - [`Target`]: the service under test. [`target::HttpTarget`] speaks HTTP; anything
//!   else can be plugged in for tests or other protocols.
//! - [`Executor`]: runs a scenario. The built-in [`executor::UserExecutor`] launches
//!   every user under a concurrency cap and closes the result stream exactly once,
//!   after the last user is done.
//! - [`Metric`]: one observation. Users produce [`metric::Measurement`]s.
//! - [`Aggregate`]: collects metrics from the result stream.
//! - [`Report`]: the processed form of a finished run.
//! - [`Reporter`]: sends a report somewhere (a CSV file, stdout).
//!
//! # Example
//!
//! ```rust,no_run
//! use horde::{
//!     Reporter, Scenario,
//!     aggregate::Measurements,
//!     executor::UserExecutor,
//!     report::{CsvReport, CsvReporter},
//!     target::HttpTarget,
//! };
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // One client for the whole run; it is shared by every user.
//!     let scenario = Scenario::builder()
//!         .name("json then echo")
//!         .target(HttpTarget::new("http://localhost:8080", None)?)
//!         .build();
//!
//!     let executor = UserExecutor::builder().users(500).concurrency(100).build();
//!     let run = scenario.run::<Measurements, _>(&executor).await?;
//!
//!     CsvReporter::new("request_stats.csv")
//!         .report(&CsvReport::from(&run))
//!         .await?;
//!     Ok(())
//! }
//! ```
//!
//! # Feature flags
//! - `http`: the reqwest-backed [`target::HttpTarget`]. (Enabled by default)
//! - `cli`: the `horde` binary. (Enabled by default)

/// Collecting metrics from the result stream
pub mod aggregate;
/// Error types for calls, runs and reports
pub mod error;
/// Orchestrators that define how a run actually happens
pub mod executor;
/// Single measurements
pub mod metric;
/// Reports and Reporters
pub mod report;
/// Scenarios, steps and the simulation of one user
pub mod scenario;
/// The service under test
pub mod target;
/// Timing a single call
pub mod timing;

pub use aggregate::Aggregate;
pub use executor::{Executor, UserExecutor};
pub use metric::Metric;
pub use report::{Report, Reporter};
pub use scenario::Scenario;
pub use target::Target;

/// Procedural macros to reduce boilerplate
pub mod macros {
    pub use horde_macros::*;
}
