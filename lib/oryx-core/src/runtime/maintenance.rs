use std::{pin::Pin, time::Duration};

use oryx_error::GenericError;
use tokio::time::{sleep, Instant, Sleep};
use tracing::trace;

// Deadlines past the end of representable time are clamped to roughly thirty years out.
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// Reclaims unused heap memory back to the operating system.
///
/// Called from the main event loop on every maintenance tick, so implementations should not block for long.
pub trait HeapReclaimer: Send + Sync {
    /// Returns the name of the reclaimer.
    fn name(&self) -> &str;

    /// Reclaims heap memory.
    ///
    /// # Errors
    ///
    /// If reclamation fails, an error is returned. The caller logs it and carries on.
    fn reclaim(&self) -> Result<(), GenericError>;
}

/// A reclaimer that does nothing.
///
/// Used when the process runs on the system allocator, which offers no portable way to force memory back to the OS.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopReclaimer;

impl HeapReclaimer for NoopReclaimer {
    fn name(&self) -> &str {
        "noop"
    }

    fn reclaim(&self) -> Result<(), GenericError> {
        trace!("No-op heap reclamation.");
        Ok(())
    }
}

/// A periodic timer driving heap maintenance.
///
/// The timer does not rearm itself: once [`tick`][Self::tick] resolves, it resolves immediately on every subsequent call
/// until [`rearm`][Self::rearm] is called. This lets the owner pick the next period when it rearms, typically from the
/// configuration snapshot installed at that point.
///
/// Waiting on `tick` is cancel-safe: dropping the future returned by `tick` does not reset the deadline.
pub struct MaintenanceTimer {
    period: Duration,
    sleep: Pin<Box<Sleep>>,
}

impl MaintenanceTimer {
    /// Creates a new `MaintenanceTimer` that first fires after `period`.
    pub fn new(period: Duration) -> Self {
        Self {
            period,
            sleep: Box::pin(sleep(period)),
        }
    }

    /// Returns the current period.
    pub fn period(&self) -> Duration {
        self.period
    }

    /// Waits until the timer fires.
    pub async fn tick(&mut self) {
        self.sleep.as_mut().await
    }

    /// Rearms the timer to fire `period` from now.
    ///
    /// A period too large to be represented as a deadline is treated as "never".
    pub fn rearm(&mut self, period: Duration) {
        let now = Instant::now();
        let deadline = now.checked_add(period).unwrap_or_else(|| now + FAR_FUTURE);

        self.period = period;
        self.sleep.as_mut().reset(deadline);
    }
}
