use std::{any::Any, future::Future, panic::AssertUnwindSafe};

use futures::FutureExt as _;
use oryx_error::GenericError;
use tokio_util::task::TaskTracker;
use tracing::{debug, debug_span, error, Instrument as _};

use super::cancel::{CancelReceiver, Cancellation};

/// Forks and joins the workers of a process.
///
/// Every worker forked through a container is tracked until it returns, and every worker gets a copy of the container
/// so that it can observe cancellation, request it, or fork workers of its own. Cloning a container is cheap and all
/// clones share the same set of tracked workers.
#[derive(Clone)]
pub struct WorkerContainer {
    cancellation: Cancellation,
    tracker: TaskTracker,
}

impl WorkerContainer {
    /// Creates a new `WorkerContainer` around the given cancellation primitive.
    pub fn new(cancellation: Cancellation) -> Self {
        Self {
            cancellation,
            tracker: TaskTracker::new(),
        }
    }

    /// Returns a receive-only view of process cancellation.
    pub fn cancel_channel(&self) -> CancelReceiver {
        self.cancellation.receiver()
    }

    /// Requests cancellation of the process.
    ///
    /// Never blocks, and may be called any number of times from anywhere.
    pub fn request_cancel(&self) {
        self.cancellation.request();
    }

    /// Returns `true` if cancellation was requested.
    pub fn is_cancel_requested(&self) -> bool {
        self.cancellation.is_requested()
    }

    /// Forks a named worker.
    ///
    /// The worker runs on the current Tokio runtime and is tracked until it returns. If it panics or returns an error,
    /// the fault is logged with the worker's name and cancellation of the process is requested. Either way the worker
    /// is untracked, and nothing propagates to the caller.
    ///
    /// # Panics
    ///
    /// Panics if called outside of a Tokio runtime.
    pub fn fork<F, Fut>(&self, name: &str, work: F)
    where
        F: FnOnce(WorkerContainer) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), GenericError>> + Send + 'static,
    {
        let container = self.clone();
        let cancellation = self.cancellation.clone();
        let worker_name = name.to_string();
        let span = debug_span!("worker", worker_name = %worker_name);

        debug!(worker_name = %worker_name, "Forking worker.");

        let body = AssertUnwindSafe(async move { work(container).await }).catch_unwind();
        self.tracker.spawn(
            async move {
                match body.await {
                    Ok(Ok(())) => debug!(worker_name = %worker_name, "Worker exited."),
                    Ok(Err(e)) => {
                        error!(worker_name = %worker_name, error = %e, "Worker failed. Requesting shutdown.");
                        cancellation.request();
                    }
                    Err(payload) => {
                        error!(
                            worker_name = %worker_name,
                            panic = panic_message(payload.as_ref()),
                            "Worker panicked. Requesting shutdown."
                        );
                        cancellation.request();
                    }
                }
            }
            .instrument(span),
        );
    }

    /// Returns the number of workers that have been forked and have not yet returned.
    pub fn outstanding(&self) -> usize {
        self.tracker.len()
    }

    /// Waits until every forked worker has returned.
    ///
    /// Workers forked after this is called, including by workers that are still running, are waited for as well.
    pub async fn join(&self) {
        self.tracker.close();
        self.tracker.wait().await;
        self.tracker.reopen();
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "<non-string panic payload>"
    }
}
