use crate::config::PacingConfig;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

const SLEEP_SLICE: Duration = Duration::from_millis(250);

/// Operator interrupt, shared between the signal handler and the run.
#[derive(Debug, Clone, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

impl PacingConfig {
    /// Pause owed after the `sent`-th successful send of the run.
    pub fn delay_after(&self, sent: usize) -> Duration {
        if self.batch_size > 0 && sent % self.batch_size as usize == 0 {
            Duration::from_secs(self.batch_delay_seconds)
        } else {
            Duration::from_secs(self.delay_seconds)
        }
    }
}

/// Waits between sends to stay under provider rate limits.
#[allow(async_fn_in_trait)]
pub trait Pacer {
    async fn pause(&self, duration: Duration);
}

/// Real sleeps, cut short when a stop is requested.
pub struct SleepPacer {
    stop: StopSignal,
}

impl SleepPacer {
    pub fn new(stop: StopSignal) -> Self {
        Self { stop }
    }
}

impl Pacer for SleepPacer {
    async fn pause(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }
        log::info!("Waiting {}s before the next email", duration.as_secs());
        let deadline = Instant::now() + duration;
        while !self.stop.is_requested() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            tokio::time::sleep(SLEEP_SLICE.min(deadline - now)).await;
        }
    }
}

/// No waiting at all, for dry runs.
pub struct NoDelay;

impl Pacer for NoDelay {
    async fn pause(&self, _duration: Duration) {}
}
