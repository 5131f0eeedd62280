use bitmask_enum::bitmask;

use crate::{Config, LogConfig};

/// The reloadable configuration sections that changed between two snapshots.
///
/// Only the sections listed here can be applied to a running process. Changes to any other field are installed with
/// the new snapshot but only take effect after a restart.
#[bitmask(u8)]
#[bitmask_config(vec_debug)]
pub enum ReloadScope {
    /// The worker count changed.
    Workers,

    /// Any of the logging settings changed.
    Log,
}

impl ReloadScope {
    /// Computes the scope of a reload from `previous` to `current`.
    pub fn between(previous: &Config, current: &Config) -> Self {
        let mut scope = Self::none();

        if previous.workers != current.workers {
            scope |= Self::Workers;
        }

        if log_changed(&previous.log, &current.log) {
            scope |= Self::Log;
        }

        scope
    }
}

// The file path only matters when one side actually logs to a file.
fn log_changed(previous: &LogConfig, current: &LogConfig) -> bool {
    previous.tank != current.tank
        || previous.level != current.level
        || ((previous.to_file() || current.to_file()) && previous.file != current.file)
}

impl Config {
    /// Returns the names of the sections that changed from `previous` but cannot be applied without a restart.
    pub fn restart_required_changes(&self, previous: &Config) -> Vec<&'static str> {
        let mut changed = Vec::new();

        if self.listen != previous.listen {
            changed.push("listen");
        }
        if self.daemon != previous.daemon {
            changed.push("daemon");
        }
        if self.heartbeat != previous.heartbeat {
            changed.push("heartbeat");
        }
        if self.stat != previous.stat {
            changed.push("stat");
        }

        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{LogLevel, LogTank};

    #[test]
    fn identical_snapshots_have_empty_scope() {
        let config = Config::default();
        assert!(ReloadScope::between(&config, &config.clone()).is_none());
    }

    #[test]
    fn scope_tracks_each_reloadable_section() {
        let previous = Config::default();

        let mut workers_only = previous.clone();
        workers_only.workers = 8;
        let scope = ReloadScope::between(&previous, &workers_only);
        assert!(scope.contains(ReloadScope::Workers));
        assert!(!scope.contains(ReloadScope::Log));

        let mut log_only = previous.clone();
        log_only.log.level = LogLevel::Verbose;
        let scope = ReloadScope::between(&previous, &log_only);
        assert!(scope.contains(ReloadScope::Log));
        assert!(!scope.contains(ReloadScope::Workers));

        let mut both = workers_only.clone();
        both.log.level = LogLevel::Error;
        assert_eq!(
            ReloadScope::between(&previous, &both),
            ReloadScope::Workers | ReloadScope::Log
        );
    }

    #[test]
    fn log_file_only_matters_when_logging_to_a_file() {
        let previous = Config::default();

        let mut console = previous.clone();
        console.log.file = "other.log".to_string();
        assert!(ReloadScope::between(&previous, &console).is_none());

        let mut to_file = previous.clone();
        to_file.log.tank = LogTank::File;
        to_file.log.file = "oryx.log".to_string();
        assert_eq!(ReloadScope::between(&previous, &to_file), ReloadScope::Log);

        let mut moved = to_file.clone();
        moved.log.file = "other.log".to_string();
        assert_eq!(ReloadScope::between(&to_file, &moved), ReloadScope::Log);
        assert_eq!(ReloadScope::between(&moved, &console), ReloadScope::Log);
    }

    #[test]
    fn non_reloadable_changes_are_reported() {
        let previous = Config::default();
        let mut current = previous.clone();
        current.listen = 1936;
        current.heartbeat.enabled = true;
        current.maintenance.interval = 10;

        assert!(ReloadScope::between(&previous, &current).is_none());
        assert_eq!(current.restart_required_changes(&previous), vec!["listen", "heartbeat"]);
    }
}
