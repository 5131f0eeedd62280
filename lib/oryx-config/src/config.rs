use std::{fmt, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;

const DEFAULT_LISTEN_PORT: u16 = 1935;
const DEFAULT_MAINTENANCE_INTERVAL_SECS: u64 = 300;
const DEFAULT_HEARTBEAT_INTERVAL_SECS: f64 = 9.3;
const DEFAULT_HEARTBEAT_URL: &str = "http://127.0.0.1:8085/api/v1/servers";

/// A configuration snapshot.
///
/// Snapshots are never mutated once installed in a [`ConfigStore`][crate::ConfigStore]. Consumers that care about a
/// particular section compare the snapshot they were handed on reload against the previous one.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct Config {
    /// Number of workers to run with. `0` means one per detected CPU.
    pub workers: i64,

    /// Port the service listens on.
    pub listen: u16,

    /// Whether the process was asked to run as a daemon. Never reloaded.
    pub daemon: bool,

    /// Periodic maintenance settings.
    pub maintenance: MaintenanceConfig,

    /// Logging settings.
    pub log: LogConfig,

    /// Heartbeat settings.
    pub heartbeat: HeartbeatConfig,

    /// Statistics collection settings.
    pub stat: StatConfig,
}

impl Config {
    /// Returns the interval between two runs of the maintenance timer.
    pub fn maintenance_interval(&self) -> Duration {
        Duration::from_secs(self.maintenance.interval)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            workers: 0,
            listen: DEFAULT_LISTEN_PORT,
            daemon: false,
            maintenance: MaintenanceConfig::default(),
            log: LogConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            stat: StatConfig::default(),
        }
    }
}

/// Periodic maintenance settings.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(default)]
pub struct MaintenanceConfig {
    /// Seconds between two forced heap reclamations.
    pub interval: u64,
}

impl Default for MaintenanceConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_MAINTENANCE_INTERVAL_SECS,
        }
    }
}

/// Where log output goes.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogTank {
    /// Standard output.
    #[default]
    Console,

    /// The file named by [`LogConfig::file`].
    File,
}

impl fmt::Display for LogTank {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Console => f.write_str("console"),
            Self::File => f.write_str("file"),
        }
    }
}

/// Log verbosity, from the most to the least verbose.
///
/// `trace` is the level important operational messages are written at, which is why it sits above `info`.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Everything, including per-event chatter.
    Verbose,

    /// Informational messages.
    Info,

    /// Operational messages.
    #[default]
    Trace,

    /// Warnings.
    Warn,

    /// Errors only.
    Error,
}

impl LogLevel {
    /// Returns the `tracing` level filter this level maps to.
    pub const fn as_level_filter(&self) -> LevelFilter {
        match self {
            Self::Verbose => LevelFilter::TRACE,
            Self::Info => LevelFilter::DEBUG,
            Self::Trace => LevelFilter::INFO,
            Self::Warn => LevelFilter::WARN,
            Self::Error => LevelFilter::ERROR,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Verbose => "verbose",
            Self::Info => "info",
            Self::Trace => "trace",
            Self::Warn => "warn",
            Self::Error => "error",
        };
        f.write_str(name)
    }
}

/// Logging settings. Hot-reloadable.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// Where log output goes.
    pub tank: LogTank,

    /// Log verbosity.
    pub level: LogLevel,

    /// Log file path, only used when `tank` is [`LogTank::File`].
    pub file: String,
}

impl LogConfig {
    /// Returns `true` if logs are written to a file.
    pub fn to_file(&self) -> bool {
        self.tank == LogTank::File
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            tank: LogTank::Console,
            level: LogLevel::Trace,
            file: "oryx.log".to_string(),
        }
    }
}

impl fmt::Display for LogConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.to_file() {
            write!(f, "{}({}/{})", self.tank, self.level, self.file)
        } else {
            write!(f, "{}({})", self.tank, self.level)
        }
    }
}

/// Heartbeat settings.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(default)]
pub struct HeartbeatConfig {
    /// Whether heartbeats are sent at all.
    pub enabled: bool,

    /// Seconds between two heartbeats.
    pub interval: f64,

    /// Endpoint heartbeats are posted to.
    pub url: String,

    /// Identifier of this device, sent with every heartbeat.
    pub device_id: String,

    /// Whether to attach process summaries to every heartbeat.
    pub summaries: bool,
}

impl HeartbeatConfig {
    /// Returns the interval between two heartbeats.
    ///
    /// Falls back to the default interval if the configured one is not a valid duration, which can only happen when
    /// heartbeats are disabled since validation rejects it otherwise.
    pub fn interval(&self) -> Duration {
        Duration::try_from_secs_f64(self.interval)
            .ok()
            .filter(|interval| !interval.is_zero())
            .unwrap_or_else(|| Duration::from_secs_f64(DEFAULT_HEARTBEAT_INTERVAL_SECS))
    }
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval: DEFAULT_HEARTBEAT_INTERVAL_SECS,
            url: DEFAULT_HEARTBEAT_URL.to_string(),
            device_id: String::new(),
            summaries: false,
        }
    }
}

/// Statistics collection settings.
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
#[serde(default)]
pub struct StatConfig {
    /// Index of the network device to report on.
    pub network: i64,

    /// Names of the disk devices to report on.
    pub disks: Vec<String>,
}

impl Default for StatConfig {
    fn default() -> Self {
        Self {
            network: 0,
            disks: vec!["sda".to_string(), "xvda".to_string()],
        }
    }
}
