//! Logging.
//!
//! The process logger is a `tracing` subscriber whose verbosity and output target follow the `log` section of the
//! configuration. Both can change on reload without reinstalling the subscriber: the level filter sits behind a reload
//! layer, and the formatting layer writes through a writer whose target can be switched.

use std::{
    path::Path,
    sync::{
        atomic::{AtomicU64, Ordering},
        Mutex, MutexGuard, PoisonError,
    },
};

use oryx_config::LogConfig;
use oryx_error::{generic_error, ErrorContext as _, GenericError};
use tracing::{debug, info};
use tracing_appender::{
    non_blocking::WorkerGuard,
    rolling::{RollingFileAppender, Rotation},
};
use tracing_subscriber::{
    fmt, layer::SubscriberExt as _, reload, util::SubscriberInitExt as _, EnvFilter, Layer as _, Registry,
};

mod writer;
use self::writer::{SwitchableWriter, Target};

/// Logs a message to standard error and exits the process with a non-zero exit code.
pub fn fatal_and_exit(message: String) -> ! {
    eprintln!("FATAL: {}", message);
    std::process::exit(1);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Mode {
    Global,
    Detached,
}

#[derive(Default)]
struct LoggerState {
    filter_handle: Option<reload::Handle<EnvFilter, Registry>>,
    file_guard: Option<WorkerGuard>,
    active: Option<LogConfig>,
}

/// Opens, closes, and reopens the process logger.
///
/// In global mode, the first successful [`open`][Self::open] installs the global `tracing` subscriber. Detached mode
/// never installs anything and only switches its own writer, which is what embedders and tests use when a subscriber
/// is already installed.
pub struct LoggerAdapter {
    mode: Mode,
    writer: SwitchableWriter,
    state: Mutex<LoggerState>,
    opens: AtomicU64,
}

impl LoggerAdapter {
    /// Creates a logger adapter that installs the global subscriber when first opened.
    pub fn global() -> Self {
        Self::with_mode(Mode::Global)
    }

    /// Creates a logger adapter that never installs a subscriber.
    pub fn detached() -> Self {
        Self::with_mode(Mode::Detached)
    }

    fn with_mode(mode: Mode) -> Self {
        Self {
            mode,
            writer: SwitchableWriter::console(),
            state: Mutex::new(LoggerState::default()),
            opens: AtomicU64::new(0),
        }
    }

    /// Opens the logger with the given settings.
    ///
    /// If the logger is already open, it is switched over to the new settings.
    ///
    /// # Errors
    ///
    /// If the log file cannot be opened, or the global subscriber cannot be installed, an error is returned and the
    /// logger is left as it was.
    pub fn open(&self, config: &LogConfig) -> Result<(), GenericError> {
        let mut state = self.lock();

        let (target, file_guard) = if config.to_file() {
            let (writer, guard) = open_log_file(&config.file)?;
            (Target::File(writer), Some(guard))
        } else {
            (Target::Console, None)
        };

        let filter = level_filter(config);
        match &state.filter_handle {
            Some(handle) => handle
                .reload(filter)
                .map_err(|e| generic_error!("Failed to update log level filter: {}", e))?,
            None if self.mode == Mode::Global => {
                let (filter_layer, handle) = reload::Layer::new(filter);
                tracing_subscriber::registry()
                    .with(
                        fmt::layer()
                            .with_ansi(false)
                            .with_writer(self.writer.clone())
                            .with_filter(filter_layer),
                    )
                    .try_init()
                    .error_context("Failed to install the global log subscriber.")?;
                state.filter_handle = Some(handle);
            }
            None => {}
        }

        // Switch before dropping the previous file guard, so nothing is written to a file writer that was shut down.
        self.writer.switch(target);
        state.file_guard = file_guard;
        state.active = Some(config.clone());
        self.opens.fetch_add(1, Ordering::Relaxed);

        info!(log = %config, "Logger opened.");
        Ok(())
    }

    /// Closes the logger.
    ///
    /// Pending output of the log file, if any, is flushed and the file is closed. Anything logged afterwards goes to
    /// the console. Closing a logger that is not open does nothing.
    pub fn close(&self) {
        let mut state = self.lock();
        let Some(active) = state.active.take() else {
            return;
        };

        debug!(log = %active, "Closing logger.");
        self.writer.switch(Target::Console);
        drop(state.file_guard.take());
    }

    /// Closes the logger, then opens it again with the given settings.
    ///
    /// # Errors
    ///
    /// If the logger cannot be opened again, an error is returned. The logger is left closed, writing to the console.
    pub fn reopen(&self, config: &LogConfig) -> Result<(), GenericError> {
        self.close();
        self.open(config)
    }

    /// Returns the settings the logger is currently open with, if it is open.
    pub fn active(&self) -> Option<LogConfig> {
        self.lock().active.clone()
    }

    /// Returns how many times the logger was successfully opened.
    pub fn open_count(&self) -> u64 {
        self.opens.load(Ordering::Relaxed)
    }

    fn lock(&self) -> MutexGuard<'_, LoggerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

fn level_filter(config: &LogConfig) -> EnvFilter {
    EnvFilter::default().add_directive(config.level.as_level_filter().into())
}

fn open_log_file(file: &str) -> Result<(tracing_appender::non_blocking::NonBlocking, WorkerGuard), GenericError> {
    let path = Path::new(file);
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| generic_error!("Invalid log file path '{}'.", file))?;
    let directory = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };

    let appender = RollingFileAppender::builder()
        .rotation(Rotation::NEVER)
        .filename_prefix(file_name)
        .build(directory)
        .with_error_context(|| format!("Failed to open log file '{}'.", file))?;

    Ok(tracing_appender::non_blocking(appender))
}
