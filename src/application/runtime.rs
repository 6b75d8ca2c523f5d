use crate::application::lifecycle::LifecycleManager;
use crate::infrastructure::shield::{AuthorizationCenter, ShieldAdapter};
use std::future::Future;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info};

const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Keep running with nothing scheduled and re-read persisted state every `poll_interval`.
    pub follow: bool,
    pub poll_interval: Duration,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            follow: false,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub fired: usize,
    pub restores: usize,
    pub interrupted: bool,
}

/// Drives timers until nothing is left to do or `shutdown` resolves.
pub async fn run_until<S, A, F>(
    lifecycle: &mut LifecycleManager<S, A>,
    options: RunOptions,
    shutdown: F,
) -> RunSummary
where
    S: ShieldAdapter,
    A: AuthorizationCenter,
    F: Future<Output = ()>,
{
    let mut summary = RunSummary::default();
    lifecycle.restore();
    summary.restores += 1;
    let mut last_poll = Instant::now();
    tokio::pin!(shutdown);

    loop {
        summary.fired += lifecycle.fire_due().len();

        let next_deadline = lifecycle.next_deadline();
        if next_deadline.is_none() && !options.follow {
            info!(fired = summary.fired, "nothing left to monitor");
            break;
        }

        let mut wait = next_deadline
            .map(|deadline| {
                (deadline - lifecycle.now())
                    .to_std()
                    .unwrap_or(Duration::ZERO)
            })
            .unwrap_or(options.poll_interval);
        if options.follow {
            wait = wait.min(options.poll_interval.saturating_sub(last_poll.elapsed()));
        }
        debug!(wait_ms = wait.as_millis() as u64, "sleeping until next deadline");

        tokio::select! {
            () = &mut shutdown => {
                info!("shutdown requested");
                summary.interrupted = true;
                break;
            }
            () = tokio::time::sleep(wait) => {}
        }

        if options.follow && last_poll.elapsed() >= options.poll_interval {
            summary.fired += lifecycle.fire_due().len();
            lifecycle.restore();
            summary.restores += 1;
            last_poll = Instant::now();
        }
    }

    summary
}
