use std::{
    future::{pending, Future},
    path::Path,
    sync::Arc,
};

use oryx_config::{Config, ConfigError, ConfigStore, ReloadHandler, ReloadScope};
use oryx_core::runtime::{
    cancellation, detected_cpus, shutdown_acknowledgement, AckReceiver, AckSender, CancelRequests, ConcurrencyWidth,
    HeapReclaimer, MaintenanceTimer, NoopReclaimer, Operation, ServerState, Signal, SignalDispatcher, WorkerContainer,
};
use oryx_error::GenericError;
use snafu::{ResultExt as _, Snafu};
use tokio::{
    select,
    sync::{watch, Mutex},
};
use tracing::{debug, error, info, warn};

use crate::{heartbeat::Heartbeat, logging::LoggerAdapter, reload::reload_cycle};

/// Server errors.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ServerError {
    /// The configuration could not be loaded.
    #[snafu(display("Failed to load configuration: {}", source))]
    Configuration {
        /// Error source.
        source: ConfigError,
    },

    /// The logger could not be opened.
    #[snafu(display("Failed to open logger: {}", source))]
    Logger {
        /// Error source.
        source: GenericError,
    },

    /// OS signal handlers could not be installed.
    #[snafu(display("Failed to install signal handlers: {}", source))]
    Signals {
        /// Error source.
        source: GenericError,
    },

    /// The heartbeat client could not be created.
    #[snafu(display("Failed to create heartbeat client: {}", source))]
    HeartbeatClient {
        /// Error source.
        source: GenericError,
    },
}

/// Applies the reloadable sections of the configuration to the running process.
struct RuntimeReloader {
    logger: Arc<LoggerAdapter>,
    width: Arc<ConcurrencyWidth>,
}

impl ReloadHandler for RuntimeReloader {
    fn name(&self) -> &str {
        "server"
    }

    fn on_reload_global(&self, scope: ReloadScope, current: &Config, _previous: &Config) -> Result<(), GenericError> {
        if scope.contains(ReloadScope::Workers) {
            let previous = self.width.apply(current.workers)?;
            info!(workers = current.workers, previous, "Applied worker count.");
        }

        if scope.contains(ReloadScope::Log) {
            self.logger.reopen(&current.log)?;
            info!(log = %current.log, "Reopened logger.");
        }

        Ok(())
    }
}

/// Builder for [`Server`].
pub struct ServerBuilder {
    store: Arc<ConfigStore>,
    logger: Option<Arc<LoggerAdapter>>,
    width: Option<Arc<ConcurrencyWidth>>,
    reclaimer: Option<Arc<dyn HeapReclaimer>>,
}

impl ServerBuilder {
    /// Creates a new `ServerBuilder` around the given configuration store.
    pub fn new(store: Arc<ConfigStore>) -> Self {
        Self {
            store,
            logger: None,
            width: None,
            reclaimer: None,
        }
    }

    /// Sets the logger adapter.
    ///
    /// Defaults to a logger that installs the global subscriber.
    pub fn with_logger(mut self, logger: Arc<LoggerAdapter>) -> Self {
        self.logger = Some(logger);
        self
    }

    /// Sets the concurrency width.
    pub fn with_width(mut self, width: Arc<ConcurrencyWidth>) -> Self {
        self.width = Some(width);
        self
    }

    /// Sets the heap reclaimer run on every maintenance tick.
    ///
    /// Defaults to [`NoopReclaimer`].
    pub fn with_reclaimer(mut self, reclaimer: Arc<dyn HeapReclaimer>) -> Self {
        self.reclaimer = Some(reclaimer);
        self
    }

    /// Builds the server, subscribing it to configuration reloads.
    pub fn build(self) -> Server {
        let logger = self.logger.unwrap_or_else(|| Arc::new(LoggerAdapter::global()));
        let width = self.width.unwrap_or_default();
        let reclaimer = self.reclaimer.unwrap_or_else(|| Arc::new(NoopReclaimer));

        let (cancellation, requests) = cancellation();
        let (ack_tx, ack_rx) = shutdown_acknowledgement();

        let reload_handler: Arc<dyn ReloadHandler> = Arc::new(RuntimeReloader {
            logger: Arc::clone(&logger),
            width: Arc::clone(&width),
        });
        self.store.subscribe(Arc::clone(&reload_handler));

        let (state_tx, _) = watch::channel(ServerState::Init);

        Server {
            store: self.store,
            logger,
            width,
            reclaimer,
            reload_handler,
            container: WorkerContainer::new(cancellation),
            state: state_tx,
            inner: Mutex::new(Inner {
                signals: None,
                requests: Some(requests),
                ack_tx: Some(ack_tx),
                ack_rx,
            }),
        }
    }
}

struct Inner {
    signals: Option<SignalDispatcher>,
    requests: Option<CancelRequests>,
    ack_tx: Option<AckSender>,
    ack_rx: AckReceiver,
}

/// A supervised service process.
///
/// The server drives the lifecycle of the process: loading the configuration, opening the logger, forking the
/// built-in workers, running the main event loop, and shutting down. Lifecycle operations are serialized and only
/// allowed from specific states:
///
/// | operation                                | allowed from | moves to  |
/// |------------------------------------------|--------------|-----------|
/// | [`parse_config`][Self::parse_config]     | `Init`       | `Ready`   |
/// | [`prepare_logger`][Self::prepare_logger] | `Ready`      | `Ready`   |
/// | [`initialize`][Self::initialize]         | `Ready`      | `Ready`   |
/// | [`run`][Self::run]                       | `Ready`      | `Running` |
/// | [`close`][Self::close]                   | any          | `Closed`  |
///
/// Calling an operation from a state it is not allowed in is a programming error, and panics.
pub struct Server {
    store: Arc<ConfigStore>,
    logger: Arc<LoggerAdapter>,
    width: Arc<ConcurrencyWidth>,
    reclaimer: Arc<dyn HeapReclaimer>,
    reload_handler: Arc<dyn ReloadHandler>,
    container: WorkerContainer,
    state: watch::Sender<ServerState>,
    inner: Mutex<Inner>,
}

impl Server {
    /// Returns the current lifecycle state.
    pub fn state(&self) -> ServerState {
        *self.state.borrow()
    }

    /// Subscribes to lifecycle state changes.
    pub fn subscribe_state(&self) -> watch::Receiver<ServerState> {
        self.state.subscribe()
    }

    /// Returns the worker container of the server.
    pub fn container(&self) -> &WorkerContainer {
        &self.container
    }

    /// Returns the configuration store.
    pub fn store(&self) -> &Arc<ConfigStore> {
        &self.store
    }

    /// Returns the concurrency width.
    pub fn width(&self) -> &Arc<ConcurrencyWidth> {
        &self.width
    }

    /// Returns the logger adapter.
    pub fn logger(&self) -> &Arc<LoggerAdapter> {
        &self.logger
    }

    /// Forks a named worker.
    ///
    /// See [`WorkerContainer::fork`].
    pub fn fork<F, Fut>(&self, name: &str, work: F)
    where
        F: FnOnce(WorkerContainer) -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), GenericError>> + Send + 'static,
    {
        self.container.fork(name, work);
    }

    /// Requests the server to shut down.
    ///
    /// Never blocks.
    pub fn request_cancel(&self) {
        self.container.request_cancel();
    }

    /// Loads the configuration from `path`.
    ///
    /// # Errors
    ///
    /// If the configuration cannot be loaded, an error is returned and the server stays in `Init`.
    ///
    /// # Panics
    ///
    /// Panics if the server is not in `Init`.
    pub async fn parse_config<P: AsRef<Path>>(&self, path: P) -> Result<(), ServerError> {
        let _inner = self.inner.lock().await;
        let next = self.next_state(Operation::ParseConfig);

        let path = path.as_ref();
        debug!(file_path = %path.display(), "Parsing configuration.");
        self.store.load(path).context(Configuration)?;

        self.state.send_replace(next);
        Ok(())
    }

    /// Opens the logger according to the installed configuration.
    ///
    /// # Errors
    ///
    /// If the logger cannot be opened, an error is returned.
    ///
    /// # Panics
    ///
    /// Panics if the server is not in `Ready`.
    pub async fn prepare_logger(&self) -> Result<(), ServerError> {
        let _inner = self.inner.lock().await;
        let next = self.next_state(Operation::PrepareLogger);

        let config = self.store.current();
        self.logger.open(&config.log).context(Logger)?;

        self.state.send_replace(next);
        Ok(())
    }

    /// Installs OS signal handlers and forks the built-in workers: the reload watcher and both heartbeat cycles.
    ///
    /// # Errors
    ///
    /// If signal handlers cannot be installed, or the heartbeat cannot be created, an error is returned and no worker
    /// is forked.
    ///
    /// # Panics
    ///
    /// Panics if the server is not in `Ready`.
    pub async fn initialize(&self) -> Result<(), ServerError> {
        let mut inner = self.inner.lock().await;
        let next = self.next_state(Operation::Initialize);

        let config = self.store.current();
        let signals = SignalDispatcher::install().context(Signals)?;
        let heartbeat = Arc::new(Heartbeat::from_config(&config, Arc::clone(&self.width)).context(HeartbeatClient)?);
        inner.signals = Some(signals);

        let store = Arc::clone(&self.store);
        self.container.fork("reload", move |container| reload_cycle(store, container));
        let discovery = Arc::clone(&heartbeat);
        self.container
            .fork("htbt(discovery)", move |container| discovery.discovery_cycle(container));
        self.container
            .fork("htbt(main)", move |container| heartbeat.beat_cycle(container));

        info!(
            file_path = %self.store.path().map(|path| path.display().to_string()).unwrap_or_default(),
            log = %config.log,
            workers = config.workers,
            cpus = detected_cpus(),
            maintenance_interval_secs = config.maintenance.interval,
            daemon = config.daemon,
            "Server initialized."
        );

        self.state.send_replace(next);
        Ok(())
    }

    /// Runs the main event loop.
    ///
    /// Applies the configured worker count, then reacts to OS signals, shutdown requests, and maintenance ticks. `INT`
    /// and `TERM` request shutdown; other handled signals are logged. Once shutdown is requested, waits for every
    /// forked worker to exit, acknowledges the shutdown, and returns.
    ///
    /// # Panics
    ///
    /// Panics if the server is not in `Ready`.
    pub async fn run(&self) {
        let (mut signals, mut requests, ack_tx) = {
            let mut inner = self.inner.lock().await;
            let next = self.next_state(Operation::Run);
            if let Err(e) = self.width.apply(self.store.current().workers) {
                error!(error = %e, "Failed to apply worker count.");
            }
            self.state.send_replace(next);

            let requests = inner.requests.take().expect("shutdown requests are only consumed by run");
            let ack_tx = inner.ack_tx.take().expect("shutdown acknowledgement is only posted by run");
            (inner.signals.take(), requests, ack_tx)
        };

        info!("Server running.");

        let mut timer = MaintenanceTimer::new(self.store.current().maintenance_interval());
        loop {
            select! {
                signal = next_signal(&mut signals) => match signal {
                    Some(signal) if signal.is_termination() => {
                        info!(%signal, "Received termination signal. Shutting down.");
                        self.container.request_cancel();
                    }
                    Some(signal) => debug!(%signal, "Received signal. Ignoring."),
                    None => {
                        warn!("Signal handlers closed. No longer listening for signals.");
                        signals = None;
                    }
                },
                _ = requests.recv() => {
                    self.container.request_cancel();
                    info!(outstanding = self.container.outstanding(), "Shutdown requested. Waiting for workers to exit.");
                    self.container.join().await;
                    break;
                }
                _ = timer.tick() => {
                    match self.reclaimer.reclaim() {
                        Ok(()) => info!(
                            reclaimer = self.reclaimer.name(),
                            interval_secs = timer.period().as_secs(),
                            "Reclaimed heap memory."
                        ),
                        Err(e) => warn!(reclaimer = self.reclaimer.name(), error = %e, "Failed to reclaim heap memory."),
                    }
                    timer.rearm(self.store.current().maintenance_interval());
                }
            }
        }

        warn!("Server quit.");
        ack_tx.post();
    }

    /// Shuts the server down.
    ///
    /// If the main event loop is running, shutdown is requested and this waits until the loop has exited. Workers
    /// forked without the loop ever running are stopped and waited for as well. The server then unsubscribes from
    /// configuration reloads and moves to `Closed`.
    ///
    /// Safe to call from any state and any number of times. Closing a closed server does nothing.
    pub async fn close(&self) {
        let mut inner = self.inner.lock().await;

        let state = self.state();
        if state.is_terminal() {
            info!("Server already closed.");
            return;
        }

        if state == ServerState::Running {
            info!("Notifying server to stop.");
            self.container.request_cancel();
            inner.ack_rx.wait().await;

            // The loop may have gone away without joining, so make sure nothing is left running.
            self.container.join().await;
        } else if self.container.outstanding() > 0 {
            self.container.request_cancel();
            self.container.join().await;
        }

        self.store.unsubscribe(&self.reload_handler);
        let next = self.next_state(Operation::Close);
        self.state.send_replace(next);
        info!("Server closed.");
    }

    fn next_state(&self, operation: Operation) -> ServerState {
        match self.state().on(operation) {
            Ok(next) => next,
            Err(e) => panic!("{}", e),
        }
    }
}

async fn next_signal(signals: &mut Option<SignalDispatcher>) -> Option<Signal> {
    match signals {
        Some(signals) => signals.recv().await,
        None => pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use oryx_config::LogLevel;
    use oryx_error::generic_error;
    use tokio::time::timeout;

    use super::*;

    const CONFIG: &str = r#"{
        // Two workers, maintenance every five seconds.
        "workers": 2,
        "maintenance": { "interval": 5 },
        "log": { "tank": "console", "level": "warn" }
    }"#;

    struct Fixture {
        _dir: tempfile::TempDir,
        path: std::path::PathBuf,
        server: Arc<Server>,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("oryx.json");
        std::fs::write(&path, CONFIG).unwrap();

        let server = ServerBuilder::new(Arc::new(ConfigStore::new()))
            .with_logger(Arc::new(LoggerAdapter::detached()))
            .build();

        Fixture {
            _dir: dir,
            path,
            server: Arc::new(server),
        }
    }

    async fn wait_for_state(server: &Server, expected: ServerState) {
        let mut state_rx = server.subscribe_state();
        timeout(Duration::from_secs(5), state_rx.wait_for(|state| *state == expected))
            .await
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn full_lifecycle() {
        let Fixture { _dir, path, server } = fixture();
        assert_eq!(server.state(), ServerState::Init);

        server.parse_config(&path).await.unwrap();
        assert_eq!(server.state(), ServerState::Ready);
        server.prepare_logger().await.unwrap();
        server.initialize().await.unwrap();
        assert_eq!(server.container().outstanding(), 3);

        let run = tokio::spawn({
            let server = Arc::clone(&server);
            async move { server.run().await }
        });
        wait_for_state(&server, ServerState::Running).await;
        assert_eq!(server.width().current(), 2);

        timeout(Duration::from_secs(5), server.close()).await.unwrap();
        assert_eq!(server.state(), ServerState::Closed);
        assert_eq!(server.container().outstanding(), 0);
        assert_eq!(server.store().subscriber_count(), 0);
        timeout(Duration::from_secs(1), run).await.unwrap().unwrap();

        timeout(Duration::from_millis(100), server.close()).await.unwrap();
        assert_eq!(server.state(), ServerState::Closed);
    }

    #[tokio::test]
    async fn close_joins_workers_when_the_loop_went_away() {
        let Fixture { _dir, path, server } = fixture();
        server.parse_config(&path).await.unwrap();
        server.initialize().await.unwrap();

        let finished = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let slow_finished = Arc::clone(&finished);
        server.fork("slow-exit", move |container| async move {
            container.cancel_channel().cancelled().await;
            tokio::time::sleep(Duration::from_millis(200)).await;
            slow_finished.store(true, std::sync::atomic::Ordering::SeqCst);
            Ok::<_, GenericError>(())
        });

        let run = tokio::spawn({
            let server = Arc::clone(&server);
            async move { server.run().await }
        });
        wait_for_state(&server, ServerState::Running).await;

        run.abort();
        assert!(run.await.unwrap_err().is_cancelled());

        timeout(Duration::from_secs(5), server.close()).await.unwrap();
        assert!(finished.load(std::sync::atomic::Ordering::SeqCst));
        assert_eq!(server.container().outstanding(), 0);
        assert_eq!(server.state(), ServerState::Closed);
    }

    #[tokio::test]
    #[should_panic(expected = "server invalid state")]
    async fn prepare_logger_before_parse_config_panics() {
        let Fixture { server, .. } = fixture();
        let _ = server.prepare_logger().await;
    }

    #[tokio::test]
    #[should_panic(expected = "server invalid state: cannot run while closed")]
    async fn run_after_close_panics() {
        let Fixture { server, .. } = fixture();
        server.close().await;
        server.run().await;
    }

    #[tokio::test]
    async fn failed_parse_stays_in_init() {
        let Fixture { _dir, path, server } = fixture();
        std::fs::write(&path, r#"{ "workers": -1 }"#).unwrap();

        let err = server.parse_config(&path).await.unwrap_err();
        assert!(matches!(err, ServerError::Configuration { .. }));
        assert_eq!(server.state(), ServerState::Init);
    }

    #[tokio::test]
    async fn second_close_is_a_no_op() {
        let Fixture { server, .. } = fixture();

        timeout(Duration::from_secs(1), server.close()).await.unwrap();
        timeout(Duration::from_secs(1), server.close()).await.unwrap();
        assert_eq!(server.state(), ServerState::Closed);
    }

    #[tokio::test]
    async fn close_before_run_stops_forked_workers() {
        let Fixture { _dir, path, server } = fixture();
        server.parse_config(&path).await.unwrap();
        server.initialize().await.unwrap();
        assert_eq!(server.container().outstanding(), 3);

        timeout(Duration::from_secs(5), server.close()).await.unwrap();
        assert_eq!(server.container().outstanding(), 0);
        assert_eq!(server.state(), ServerState::Closed);
    }

    #[tokio::test]
    async fn faulty_worker_shuts_the_server_down() {
        let Fixture { _dir, path, server } = fixture();
        server.parse_config(&path).await.unwrap();
        server.initialize().await.unwrap();

        let run = tokio::spawn({
            let server = Arc::clone(&server);
            async move { server.run().await }
        });
        wait_for_state(&server, ServerState::Running).await;

        server.fork("faulty", |_| async move { Err::<(), _>(generic_error!("lost connection")) });
        timeout(Duration::from_secs(5), run).await.unwrap().unwrap();
        assert_eq!(server.container().outstanding(), 0);

        // The loop already acknowledged shutdown, so close does not wait.
        timeout(Duration::from_secs(1), server.close()).await.unwrap();
        assert_eq!(server.state(), ServerState::Closed);
    }

    #[tokio::test]
    async fn reload_scopes_are_applied_independently() {
        let Fixture { _dir, path, server } = fixture();
        server.parse_config(&path).await.unwrap();
        server.prepare_logger().await.unwrap();
        assert_eq!(server.logger().open_count(), 1);

        let mut config = (*server.store().current()).clone();
        config.workers = 5;
        let scope = server.store().apply(config.clone()).unwrap();
        assert_eq!(scope, ReloadScope::Workers);
        assert_eq!(server.width().current(), 5);
        assert_eq!(server.logger().open_count(), 1);

        config.log.level = LogLevel::Verbose;
        let scope = server.store().apply(config.clone()).unwrap();
        assert_eq!(scope, ReloadScope::Log);
        assert_eq!(server.logger().open_count(), 2);
        assert_eq!(server.logger().active().map(|log| log.level), Some(LogLevel::Verbose));
        assert_eq!(server.width().current(), 5);
    }

    #[tokio::test]
    async fn closed_server_ignores_reloads() {
        let Fixture { _dir, path, server } = fixture();
        server.parse_config(&path).await.unwrap();
        server.close().await;

        let mut config = (*server.store().current()).clone();
        config.workers = 977;
        server.store().apply(config).unwrap();
        assert_ne!(server.width().current(), 977);
    }
}
