//! Blocking wait until a deployment reports healthy.

use std::time::Duration;

use graviton_core::{Console, GravitonError, Progress, Result};
use tokio::time::{Instant, sleep_until};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::probe::HealthCheck;

/// Fixed delay between probes.
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Poll `check` every [`POLL_INTERVAL`] until it reports healthy.
///
/// At most `timeout_secs / 2 + 1` probes are made; if the last one is
/// still unhealthy the wait fails with [`GravitonError::Timeout`]. A
/// check that does not answer is abandoned at `timeout_secs` plus one
/// poll interval. Canceling `cancel` aborts a pending check or the sleep
/// between checks.
pub async fn wait_for_health(
    check: &dyn HealthCheck,
    timeout_secs: u64,
    internal: bool,
    cancel: &CancellationToken,
    console: &Console,
) -> Result<()> {
    let cap = timeout_secs / POLL_INTERVAL.as_secs();
    let deadline = Instant::now() + Duration::from_secs(timeout_secs) + POLL_INTERVAL;
    let spinner = if internal {
        console.spinner(2, "Waiting for the node to be healthy internally")
    } else {
        console.spinner(1, "Waiting for external health check to pass")
    };

    let mut polls = 0u64;
    loop {
        let healthy = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GravitonError::Canceled),
            healthy = check.is_healthy(internal) => healthy?,
            _ = sleep_until(deadline) => return Err(timed_out(timeout_secs, polls)),
        };
        if healthy {
            break;
        }
        if polls >= cap {
            return Err(timed_out(timeout_secs, polls));
        }
        polls += 1;
        spinner.tick();
        debug!(poll = polls, "not healthy yet");

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(GravitonError::Canceled),
            _ = sleep_until(deadline) => return Err(timed_out(timeout_secs, polls)),
            _ = tokio::time::sleep(POLL_INTERVAL) => {}
        }
    }

    spinner.finish();
    console.success("The instance is healthy");
    Ok(())
}

fn timed_out(timeout_secs: u64, polls: u64) -> GravitonError {
    info!(timeout_secs, polls = polls + 1, "gave up waiting for health");
    GravitonError::Timeout {
        seconds: timeout_secs,
    }
}
