use std::{
    path::Path,
    sync::Arc,
    time::{Duration, SystemTime},
};

use oryx_config::ConfigStore;
use oryx_core::runtime::WorkerContainer;
use oryx_error::GenericError;
use tokio::{
    select,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, error, info};

const POLL_INTERVAL: Duration = Duration::from_secs(3);

/// Reloads the configuration whenever `SIGHUP` is received or the configuration file is modified, until cancellation
/// is requested.
///
/// Reload failures are logged and never stop the watcher.
pub(crate) async fn reload_cycle(store: Arc<ConfigStore>, container: WorkerContainer) -> Result<(), GenericError> {
    let cancel = container.cancel_channel();
    let mut hangup = hangup::Hangup::install()?;

    let mut ticker = interval(POLL_INTERVAL);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut last_modified = store.path().and_then(|path| modified(&path));

    loop {
        select! {
            _ = cancel.cancelled() => break,
            _ = hangup.recv() => {
                info!("Received SIGHUP. Reloading configuration.");
                reload(&store);
            }
            _ = ticker.tick() => {
                let Some(current) = store.path().and_then(|path| modified(&path)) else {
                    continue;
                };
                if last_modified.is_some_and(|last| last != current) {
                    info!("Configuration file modified. Reloading configuration.");
                    reload(&store);
                }
                last_modified = Some(current);
            }
        }
    }

    debug!("Reload watcher stopped.");
    Ok(())
}

fn reload(store: &ConfigStore) {
    match store.reload() {
        Ok(scope) => debug!(?scope, "Configuration reload completed."),
        Err(e) => error!(error = %e, "Failed to reload configuration."),
    }
}

fn modified(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).and_then(|metadata| metadata.modified()).ok()
}

#[cfg(unix)]
mod hangup {
    use oryx_error::{ErrorContext as _, GenericError};
    use tokio::signal::unix::{signal, Signal, SignalKind};

    pub(super) struct Hangup(Signal);

    impl Hangup {
        pub(super) fn install() -> Result<Self, GenericError> {
            signal(SignalKind::hangup())
                .map(Self)
                .error_context("Failed to set up SIGHUP handler.")
        }

        pub(super) async fn recv(&mut self) {
            if self.0.recv().await.is_none() {
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(not(unix))]
mod hangup {
    use oryx_error::GenericError;

    pub(super) struct Hangup;

    impl Hangup {
        pub(super) fn install() -> Result<Self, GenericError> {
            Ok(Self)
        }

        pub(super) async fn recv(&mut self) {
            std::future::pending::<()>().await
        }
    }
}
