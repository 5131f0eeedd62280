use std::{num::NonZeroUsize, thread::available_parallelism};

use snafu::Snafu;
use tokio::sync::watch;
use tracing::{debug, info};

/// Concurrency width errors.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum WidthError {
    /// The requested worker count is negative.
    #[snafu(display("invalid worker count {}: must not be negative", workers))]
    Negative {
        /// The rejected worker count.
        workers: i64,
    },
}

/// Returns the number of CPUs available to the process.
///
/// Falls back to 1 when the parallelism of the host cannot be determined.
pub fn detected_cpus() -> usize {
    available_parallelism().map(NonZeroUsize::get).unwrap_or(1)
}

/// The process-wide worker parallelism.
///
/// Components that size pools or shard work by parallelism subscribe to the width and resize when it changes. The
/// width is never zero.
pub struct ConcurrencyWidth {
    width_tx: watch::Sender<usize>,
}

impl ConcurrencyWidth {
    /// Creates a new `ConcurrencyWidth`, initially set to the detected CPU count.
    pub fn new() -> Self {
        let (width_tx, _) = watch::channel(detected_cpus());
        Self { width_tx }
    }

    /// Applies a configured worker count, returning the previous width.
    ///
    /// A worker count of 0 selects the detected CPU count.
    ///
    /// # Errors
    ///
    /// If `workers` is negative, an error is returned and the width is left unchanged.
    pub fn apply(&self, workers: i64) -> Result<usize, WidthError> {
        if workers < 0 {
            return Err(WidthError::Negative { workers });
        }

        let width = match usize::try_from(workers) {
            Ok(0) => detected_cpus(),
            Ok(width) => width,
            Err(_) => usize::MAX,
        };

        let previous = self.width_tx.send_replace(width);
        if previous != width {
            info!(previous, current = width, "Concurrency width changed.");
        } else {
            debug!(width, "Concurrency width unchanged.");
        }

        Ok(previous)
    }

    /// Returns the current width.
    pub fn current(&self) -> usize {
        *self.width_tx.borrow()
    }

    /// Subscribes to width changes.
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.width_tx.subscribe()
    }
}

impl Default for ConcurrencyWidth {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_selects_cpu_count() {
        let width = ConcurrencyWidth::new();
        width.apply(3).unwrap();

        let previous = width.apply(0).unwrap();
        assert_eq!(previous, 3);
        assert_eq!(width.current(), detected_cpus());
        assert!(width.current() >= 1);
    }

    #[test]
    fn negative_is_rejected() {
        let width = ConcurrencyWidth::new();
        width.apply(2).unwrap();

        let err = width.apply(-1).unwrap_err();
        assert!(matches!(err, WidthError::Negative { workers: -1 }));
        assert_eq!(width.current(), 2);
    }

    #[tokio::test]
    async fn subscribers_see_changes() {
        let width = ConcurrencyWidth::new();
        let mut width_rx = width.subscribe();

        width.apply(7).unwrap();
        width_rx.changed().await.unwrap();
        assert_eq!(*width_rx.borrow_and_update(), 7);
    }
}
