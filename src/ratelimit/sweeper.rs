//! Background eviction of expired window state.
//!
//! Lazy pruning on every check keeps decisions correct, but a key that stops
//! sending requests is only ever freed here. The sweep is timer driven so it
//! runs whether or not traffic arrives.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use super::limiter::RateLimiter;
use super::policy::PolicyCatalog;

/// Interval used when no policy is registered.
const FALLBACK_INTERVAL: Duration = Duration::from_secs(30);
const MIN_INTERVAL: Duration = Duration::from_millis(1);

/// Half the smallest configured window.
pub fn default_sweep_interval(policies: &PolicyCatalog) -> Duration {
    policies
        .smallest_window()
        .map(|window| (window / 2).max(MIN_INTERVAL))
        .unwrap_or(FALLBACK_INTERVAL)
}

struct SweepTask {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

/// Periodic sweeper for a [`RateLimiter`].
pub struct Sweeper {
    limiter: Arc<RateLimiter>,
    interval: Duration,
    task: Mutex<Option<SweepTask>>,
}

impl Sweeper {
    /// Create a stopped sweeper running every `interval`.
    pub fn new(limiter: Arc<RateLimiter>, interval: Duration) -> Self {
        Self {
            limiter,
            interval: interval.max(MIN_INTERVAL),
            task: Mutex::new(None),
        }
    }

    /// Create a stopped sweeper using `interval`, or the default derived from
    /// the limiter's policies.
    pub fn for_limiter(limiter: Arc<RateLimiter>, interval: Option<Duration>) -> Self {
        let interval = interval.unwrap_or_else(|| default_sweep_interval(limiter.policies()));
        Self::new(limiter, interval)
    }

    /// Time between sweeps.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Whether the background task is active.
    pub fn is_running(&self) -> bool {
        self.task.lock().is_some()
    }

    /// Spawn the sweep task on the current tokio runtime.
    ///
    /// Returns `false` if it was already running.
    pub fn start(&self) -> bool {
        let mut task = self.task.lock();
        if task.is_some() {
            return false;
        }

        let (shutdown, mut shutdown_rx) = watch::channel(false);
        let limiter = Arc::clone(&self.limiter);
        let interval = self.interval;

        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // The first tick completes immediately.
            ticker.tick().await;

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        limiter.sweep();
                    }
                    _ = shutdown_rx.changed() => {
                        debug!("Sweeper received shutdown");
                        break;
                    }
                }
            }
        });

        info!(interval_ms = interval.as_millis() as u64, "Sweeper started");
        *task = Some(SweepTask { shutdown, handle });
        true
    }

    /// Stop the sweep task and wait for it to exit. No-op when stopped.
    pub async fn stop(&self) {
        let task = self.task.lock().take();
        let Some(task) = task else {
            return;
        };

        let _ = task.shutdown.send(true);
        if let Err(e) = task.handle.await {
            warn!(error = %e, "Sweeper task ended abnormally");
        }
        info!("Sweeper stopped");
    }
}

impl Drop for Sweeper {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.handle.abort();
        }
    }
}
