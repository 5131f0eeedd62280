use std::{
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};

use arc_swap::ArcSwap;
use oryx_error::GenericError;
use snafu::{ResultExt as _, Snafu};
use tracing::{debug, info, warn};

use crate::{Config, ConfigError, ReloadScope};

/// A component that reacts to configuration reloads.
pub trait ReloadHandler: Send + Sync {
    /// Returns the name of the handler, used when reporting failures.
    fn name(&self) -> &str;

    /// Applies a reload.
    ///
    /// Called only when `scope` is not empty. `current` is the snapshot that was just installed and `previous` is the
    /// one it replaced.
    ///
    /// # Errors
    ///
    /// If the handler cannot apply the new configuration, an error is returned. Handlers registered after this one
    /// are then not notified of this reload.
    fn on_reload_global(&self, scope: ReloadScope, current: &Config, previous: &Config) -> Result<(), GenericError>;
}

/// Reload errors.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ReloadError {
    /// A reload was requested before any configuration file was loaded.
    #[snafu(display("No configuration file has been loaded yet."))]
    NotLoaded,

    /// The new configuration could not be loaded. The previous snapshot is still installed.
    #[snafu(display("Failed to load new configuration: {}", source))]
    Load {
        /// Error source.
        source: ConfigError,
    },

    /// A reload handler failed. The new snapshot is installed, but handlers after this one were not notified.
    #[snafu(display("Reload handler '{}' failed: {}", handler, source))]
    Handler {
        /// Name of the handler that failed.
        handler: String,

        /// Error source.
        source: GenericError,
    },
}

/// Owner of the live configuration.
///
/// The store holds the installed snapshot, remembers which file it came from, and keeps an ordered registry of
/// [`ReloadHandler`]s. Readers call [`current`][Self::current] and get a cheap handle to an immutable snapshot.
///
/// Loading the initial configuration never notifies anyone. Reloading does, synchronously and in registration order,
/// on the caller's task.
pub struct ConfigStore {
    current: ArcSwap<Config>,
    path: Mutex<Option<PathBuf>>,
    subscribers: Mutex<Vec<Arc<dyn ReloadHandler>>>,
}

impl ConfigStore {
    /// Creates a store holding the default configuration.
    pub fn new() -> Self {
        Self::with_config(Config::default())
    }

    /// Creates a store holding the given configuration.
    pub fn with_config(config: Config) -> Self {
        Self {
            current: ArcSwap::from_pointee(config),
            path: Mutex::new(None),
            subscribers: Mutex::new(Vec::new()),
        }
    }

    /// Returns the installed snapshot.
    pub fn current(&self) -> Arc<Config> {
        self.current.load_full()
    }

    /// Returns the path of the file the configuration was loaded from, if any.
    pub fn path(&self) -> Option<PathBuf> {
        lock(&self.path).clone()
    }

    /// Loads the initial configuration from `path` and installs it.
    ///
    /// No handler is notified. The path is remembered for later calls to [`reload`][Self::reload].
    ///
    /// # Errors
    ///
    /// If the file cannot be loaded, an error is returned and the installed snapshot is left unchanged.
    pub fn load<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let config = Config::from_file(path)?;

        self.current.store(Arc::new(config));
        *lock(&self.path) = Some(path.to_path_buf());

        info!(file_path = %path.display(), "Configuration loaded.");
        Ok(())
    }

    /// Reloads the configuration from the file it was initially loaded from.
    ///
    /// See [`apply`][Self::apply] for how the new snapshot is installed and handlers are notified.
    ///
    /// # Errors
    ///
    /// If no file was loaded before, or the file can no longer be loaded, an error is returned and the installed
    /// snapshot is left unchanged. If a handler fails, its error is returned but the new snapshot stays installed.
    pub fn reload(&self) -> Result<ReloadScope, ReloadError> {
        let path = self.path().ok_or(ReloadError::NotLoaded)?;
        let config = Config::from_file(&path).context(Load)?;

        debug!(file_path = %path.display(), "Reloading configuration.");
        self.install(config)
    }

    /// Installs `config` as the new snapshot and notifies handlers of the reloadable sections that changed.
    ///
    /// Installation is not transactional: if a handler fails, handlers registered after it are skipped, and the new
    /// snapshot remains installed.
    ///
    /// # Errors
    ///
    /// If `config` is not valid, an error is returned and nothing is installed. If a handler fails, its error is
    /// returned.
    pub fn apply(&self, config: Config) -> Result<ReloadScope, ReloadError> {
        config.validate().context(Load)?;
        self.install(config)
    }

    fn install(&self, config: Config) -> Result<ReloadScope, ReloadError> {
        let current = Arc::new(config);
        let previous = self.current.swap(Arc::clone(&current));

        for section in current.restart_required_changes(&previous) {
            warn!(section, "Configuration section changed but requires a restart to take effect.");
        }

        let scope = ReloadScope::between(&previous, &current);
        if scope.is_none() {
            debug!("Reload did not change any reloadable section.");
            return Ok(scope);
        }

        // Handlers are called on a copy of the registry so they are free to (un)subscribe while being notified.
        let subscribers = lock(&self.subscribers).clone();
        for handler in subscribers {
            debug!(handler = handler.name(), ?scope, "Notifying reload handler.");
            handler
                .on_reload_global(scope, &current, &previous)
                .context(Handler { handler: handler.name() })?;
        }

        info!(?scope, "Configuration reloaded.");
        Ok(scope)
    }

    /// Registers a reload handler.
    ///
    /// Registering a handler that is already registered does nothing.
    pub fn subscribe(&self, handler: Arc<dyn ReloadHandler>) {
        let mut subscribers = lock(&self.subscribers);
        if subscribers.iter().any(|existing| same_handler(existing, &handler)) {
            return;
        }

        debug!(handler = handler.name(), "Reload handler subscribed.");
        subscribers.push(handler);
    }

    /// Removes a reload handler.
    ///
    /// Removing a handler that is not registered does nothing.
    pub fn unsubscribe(&self, handler: &Arc<dyn ReloadHandler>) {
        let mut subscribers = lock(&self.subscribers);
        let before = subscribers.len();
        subscribers.retain(|existing| !same_handler(existing, handler));

        if subscribers.len() != before {
            debug!(handler = handler.name(), "Reload handler unsubscribed.");
        }
    }

    /// Returns the number of registered handlers.
    pub fn subscriber_count(&self) -> usize {
        lock(&self.subscribers).len()
    }
}

impl Default for ConfigStore {
    fn default() -> Self {
        Self::new()
    }
}

fn same_handler(a: &Arc<dyn ReloadHandler>, b: &Arc<dyn ReloadHandler>) -> bool {
    std::ptr::addr_eq(Arc::as_ptr(a), Arc::as_ptr(b))
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // Nothing is left half-updated while these locks are held, so a poisoned lock is still consistent.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
