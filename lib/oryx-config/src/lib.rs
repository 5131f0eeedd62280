//! Configuration snapshots, loading, and hot reload.
//!
//! The configuration of the process is held by a [`ConfigStore`], which owns the currently installed [`Config`]
//! snapshot. Snapshots are immutable: a reload parses a brand new snapshot, swaps it in, and then tells every
//! subscribed [`ReloadHandler`] which reloadable sections changed (a [`ReloadScope`]), handing it both the new and
//! the previous snapshot.
#![deny(missing_docs)]

mod config;
pub use self::config::{Config, HeartbeatConfig, LogConfig, LogLevel, LogTank, MaintenanceConfig, StatConfig};

mod loader;
pub use self::loader::{strip_comments, ConfigError, ENV_PREFIX};

mod scope;
pub use self::scope::ReloadScope;

mod store;
pub use self::store::{ConfigStore, ReloadError, ReloadHandler};
