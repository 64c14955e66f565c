use std::{future::Future, time::Duration};

use tokio::time::Instant;

/// Runs `op` once and returns how long it took.
///
/// If the operation fails its error is handed back untouched and no timing is
/// reported: a failed call has no meaningful latency.
pub async fn measure<F, Fut, E>(op: F) -> Result<Duration, E>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(), E>>,
{
    let start = Instant::now();
    op().await?;
    Ok(start.elapsed())
}
