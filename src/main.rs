use std::num::NonZeroUsize;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use horde::{
    Reporter, Scenario,
    aggregate::Measurements,
    executor::{DEFAULT_CALL_TIMEOUT, DEFAULT_CONCURRENCY, FailurePolicy, UserExecutor},
    report::{CsvReport, CsvReporter, StdoutReporter, Summary},
    target::HttpTarget,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Spawn simulated users against an HTTP service and record how long every call takes.
#[derive(Parser, Debug)]
#[command(name = "horde", version, about)]
struct Args {
    /// Number of simulated users
    users: NonZeroUsize,

    /// Maximum number of users running at the same time
    #[arg(short, long, env = "HORDE_CONCURRENCY", default_value_t = DEFAULT_CONCURRENCY)]
    concurrency: usize,

    /// Base URL of the service under test
    #[arg(short, long, env = "HORDE_TARGET", default_value = "http://localhost:8080")]
    target: String,

    /// Where to write the CSV report
    #[arg(short, long, env = "HORDE_OUTPUT", default_value = "request_stats.csv")]
    output: PathBuf,

    /// Deadline for each call, in milliseconds
    #[arg(
        long,
        env = "HORDE_TIMEOUT_MS",
        default_value_t = DEFAULT_CALL_TIMEOUT.as_millis() as u64,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    timeout_ms: u64,

    /// Pause between two calls of the same user, in milliseconds
    #[arg(long, env = "HORDE_THINK_TIME_MS", default_value_t = 0)]
    think_time_ms: u64,

    /// Stop the whole run at the first failed call instead of recording it
    #[arg(long)]
    abort_on_error: bool,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false))
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_logging();

    let call_timeout = Some(Duration::from_millis(args.timeout_ms));
    let target = HttpTarget::new(args.target, call_timeout)?;
    let scenario = Scenario::builder()
        .name("json then echo")
        .target(target)
        .think_time(Duration::from_millis(args.think_time_ms))
        .build();

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_err() {
            return;
        }
        warn!("Interrupted, cancelling the run. Press Ctrl-C again to quit now");
        ctrl_c.cancel();

        if tokio::signal::ctrl_c().await.is_ok() {
            error!("Interrupted twice, exiting without a report");
            std::process::exit(130);
        }
    });

    let executor = UserExecutor::builder()
        .users(args.users.get())
        .concurrency(args.concurrency)
        .on_failure(if args.abort_on_error {
            FailurePolicy::Abort
        } else {
            FailurePolicy::Continue
        })
        .call_timeout(call_timeout)
        .cancel(cancel)
        .build();

    info!(
        users = executor.users,
        base_url = scenario.target.base_url(),
        "Load test started"
    );
    let run = match scenario.run::<Measurements, _>(&executor).await {
        Ok(run) => run,
        Err(e) => {
            error!("Load test failed: {e}");
            return Err(e.into());
        }
    };

    let reporter = CsvReporter::new(args.output);
    reporter.report(&CsvReport::from(&run)).await?;
    info!("Program done. Wrote stats to file: {}", reporter.path().display());

    StdoutReporter.report(&Summary::from(&run)).await?;
    Ok(())
}
