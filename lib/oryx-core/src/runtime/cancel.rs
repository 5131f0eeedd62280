use std::future::Future;

use tokio::{
    select,
    sync::{
        mpsc::{self, error::TrySendError},
        oneshot,
    },
};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Creates the cancellation primitive of a process.
///
/// Returns the requesting side, which can be cloned and handed out freely, and the single consuming side, which is
/// owned by the main event loop.
pub fn cancellation() -> (Cancellation, CancelRequests) {
    let (requests_tx, requests_rx) = mpsc::channel(1);
    let cancellation = Cancellation {
        requests_tx,
        token: CancellationToken::new(),
    };

    (cancellation, CancelRequests { requests_rx })
}

/// The requesting side of the cancellation primitive.
#[derive(Clone)]
pub struct Cancellation {
    requests_tx: mpsc::Sender<()>,
    token: CancellationToken,
}

impl Cancellation {
    /// Requests cancellation of the process.
    ///
    /// Never blocks. If a request is already pending, this request is dropped, so at most one request is ever pending
    /// no matter how many callers race here.
    pub fn request(&self) {
        self.token.cancel();

        match self.requests_tx.try_send(()) {
            Ok(()) => debug!("Cancellation requested."),
            Err(TrySendError::Full(())) => debug!("Cancellation already pending."),
            Err(TrySendError::Closed(())) => debug!("Cancellation requested after the main loop exited."),
        }
    }

    /// Returns `true` if cancellation was requested at least once.
    pub fn is_requested(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Returns a receive-only view of the cancellation state.
    pub fn receiver(&self) -> CancelReceiver {
        CancelReceiver {
            token: self.token.clone(),
        }
    }
}

/// A receive-only view of cancellation, handed to workers.
///
/// Once cancellation has been requested it stays requested: every call to [`cancelled`][Self::cancelled] made
/// afterwards resolves immediately.
#[derive(Clone)]
pub struct CancelReceiver {
    token: CancellationToken,
}

impl CancelReceiver {
    /// Waits until cancellation is requested.
    pub async fn cancelled(&self) {
        self.token.cancelled().await
    }

    /// Returns `true` if cancellation was requested.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Runs `fut` until it completes or cancellation is requested, whichever comes first.
    ///
    /// Returns `None` if cancellation won, in which case `fut` is dropped.
    pub async fn run_until_cancelled<F: Future>(&self, fut: F) -> Option<F::Output> {
        select! {
            biased;
            _ = self.token.cancelled() => None,
            output = fut => Some(output),
        }
    }
}

/// The consuming side of the cancellation request channel.
pub struct CancelRequests {
    requests_rx: mpsc::Receiver<()>,
}

impl CancelRequests {
    /// Waits for a pending cancellation request and consumes it.
    ///
    /// Also returns once every [`Cancellation`] has been dropped, since nobody is left to request it.
    pub async fn recv(&mut self) {
        let _ = self.requests_rx.recv().await;
    }

    /// Consumes a pending request without waiting, returning `true` if there was one.
    pub fn try_take(&mut self) -> bool {
        self.requests_rx.try_recv().is_ok()
    }
}

/// Creates the shutdown acknowledgement pair.
///
/// The sending side can post at most once: posting consumes it, and dropping it without posting posts as well, so a
/// waiter is never left hanging by a main loop that went away.
pub fn shutdown_acknowledgement() -> (AckSender, AckReceiver) {
    let (ack_tx, ack_rx) = oneshot::channel();
    (AckSender { ack_tx: Some(ack_tx) }, AckReceiver { ack_rx: Some(ack_rx) })
}

/// Posts the shutdown acknowledgement.
pub struct AckSender {
    ack_tx: Option<oneshot::Sender<()>>,
}

impl AckSender {
    /// Posts the acknowledgement.
    pub fn post(mut self) {
        self.send();
    }

    fn send(&mut self) {
        if let Some(ack_tx) = self.ack_tx.take() {
            let _ = ack_tx.send(());
        }
    }
}

impl Drop for AckSender {
    fn drop(&mut self) {
        self.send();
    }
}

/// Waits for the shutdown acknowledgement.
pub struct AckReceiver {
    ack_rx: Option<oneshot::Receiver<()>>,
}

impl AckReceiver {
    /// Waits until shutdown has been acknowledged.
    ///
    /// Returns immediately if the acknowledgement was already received by an earlier call.
    pub async fn wait(&mut self) {
        if let Some(ack_rx) = self.ack_rx.take() {
            let _ = ack_rx.await;
        }
    }

    /// Returns `true` if the acknowledgement was posted, consuming it.
    pub fn try_wait(&mut self) -> bool {
        match self.ack_rx.as_mut().map(|ack_rx| ack_rx.try_recv()) {
            None => true,
            Some(Ok(())) | Some(Err(oneshot::error::TryRecvError::Closed)) => {
                self.ack_rx = None;
                true
            }
            Some(Err(oneshot::error::TryRecvError::Empty)) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tokio::time::timeout;

    use super::*;

    #[tokio::test]
    async fn concurrent_requests_leave_one_pending() {
        let (cancellation, mut requests) = cancellation();

        let handles = (0..64)
            .map(|_| {
                let cancellation = cancellation.clone();
                tokio::spawn(async move { cancellation.request() })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
        }

        assert!(requests.try_take());
        assert!(!requests.try_take());
        assert!(cancellation.is_requested());
    }

    #[tokio::test]
    async fn receivers_observe_cancellation_after_the_fact() {
        let (cancellation, mut requests) = cancellation();
        let receiver = cancellation.receiver();
        assert!(!receiver.is_cancelled());

        cancellation.request();
        requests.recv().await;

        // The request was consumed, but the level stays set for workers.
        assert!(receiver.is_cancelled());
        timeout(Duration::from_millis(100), receiver.cancelled()).await.unwrap();
        timeout(Duration::from_millis(100), receiver.clone().cancelled()).await.unwrap();
    }

    #[tokio::test]
    async fn run_until_cancelled_abandons_pending_work() {
        let (cancellation, _requests) = cancellation();
        let receiver = cancellation.receiver();

        assert_eq!(receiver.run_until_cancelled(async { 7 }).await, Some(7));

        let waiting = tokio::spawn({
            let receiver = receiver.clone();
            async move { receiver.run_until_cancelled(std::future::pending::<()>()).await }
        });
        tokio::task::yield_now().await;
        cancellation.request();

        assert_eq!(timeout(Duration::from_secs(1), waiting).await.unwrap().unwrap(), None);
        assert_eq!(receiver.run_until_cancelled(async { 7 }).await, None);
    }

    #[tokio::test]
    async fn request_after_consumer_dropped_does_not_block() {
        let (cancellation, requests) = cancellation();
        drop(requests);
        cancellation.request();
        cancellation.request();
        assert!(cancellation.is_requested());
    }

    #[tokio::test]
    async fn acknowledgement_is_delivered_once() {
        let (ack_tx, mut ack_rx) = shutdown_acknowledgement();
        assert!(!ack_rx.try_wait());

        ack_tx.post();
        timeout(Duration::from_millis(100), ack_rx.wait()).await.unwrap();

        // A second wait does not block.
        timeout(Duration::from_millis(100), ack_rx.wait()).await.unwrap();
        assert!(ack_rx.try_wait());
    }

    #[tokio::test]
    async fn dropped_sender_still_acknowledges() {
        let (ack_tx, mut ack_rx) = shutdown_acknowledgement();
        drop(ack_tx);
        timeout(Duration::from_millis(100), ack_rx.wait()).await.unwrap();
    }
}
