use std::path::{Path, PathBuf};

use figment::{
    providers::{Env, Format as _, Json, Serialized},
    Figment,
};
use snafu::{ResultExt as _, Snafu};
use tracing::debug;

use crate::Config;

/// Prefix of environment variables that override values from the configuration file.
///
/// Nested fields are separated by a double underscore: `ORYX_LOG__LEVEL=warn` sets `log.level`.
pub const ENV_PREFIX: &str = "ORYX_";

/// A configuration error.
#[derive(Debug, Snafu)]
#[snafu(context(suffix(false)))]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[snafu(display("Failed to read configuration file '{}': {}", path.display(), source))]
    Read {
        /// Path of the configuration file.
        path: PathBuf,

        /// Error source.
        source: std::io::Error,
    },

    /// The configuration file could not be parsed into a configuration snapshot.
    #[snafu(display("Failed to parse configuration file '{}': {}", path.display(), source))]
    Parse {
        /// Path of the configuration file.
        path: PathBuf,

        /// Error source.
        source: figment::Error,
    },

    /// The worker count is negative.
    #[snafu(display("Worker count must not be negative, got {}.", workers))]
    NegativeWorkers {
        /// The configured worker count.
        workers: i64,
    },

    /// A field holds a value that is not allowed.
    #[snafu(display("Invalid value for field '{}': {}.", field, reason))]
    InvalidField {
        /// Period-separated path of the field.
        field: &'static str,

        /// Why the value was rejected.
        reason: &'static str,
    },
}

impl Config {
    /// Loads a configuration snapshot from the given file.
    ///
    /// The file is JSON that may contain `//` and `/* */` comments. Fields missing from the file take their default
    /// value, and environment variables prefixed with [`ENV_PREFIX`] override the file.
    ///
    /// # Errors
    ///
    /// If the file cannot be read or parsed, or if the resulting snapshot is not valid, an error is returned.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).context(Read { path })?;
        let config = Self::from_commented_json(&contents).context(Parse { path })?;
        config.validate()?;

        debug!(file_path = %path.display(), "Loaded configuration file.");
        Ok(config)
    }

    fn from_commented_json(contents: &str) -> Result<Self, figment::Error> {
        Figment::from(Serialized::defaults(Self::default()))
            .merge(Json::string(&strip_comments(contents)))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
    }

    /// Checks that the snapshot can be installed.
    ///
    /// # Errors
    ///
    /// Returns the first invalid field found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers < 0 {
            return Err(ConfigError::NegativeWorkers { workers: self.workers });
        }

        if self.listen == 0 {
            return Err(ConfigError::InvalidField {
                field: "listen",
                reason: "port must not be zero",
            });
        }

        if self.maintenance.interval == 0 {
            return Err(ConfigError::InvalidField {
                field: "maintenance.interval",
                reason: "interval must be at least one second",
            });
        }

        if self.log.to_file() && self.log.file.trim().is_empty() {
            return Err(ConfigError::InvalidField {
                field: "log.file",
                reason: "a file path is required when logging to a file",
            });
        }

        if self.heartbeat.enabled {
            if !self.heartbeat.interval.is_finite() || self.heartbeat.interval <= 0.0 {
                return Err(ConfigError::InvalidField {
                    field: "heartbeat.interval",
                    reason: "interval must be a positive number of seconds",
                });
            }

            if self.heartbeat.url.trim().is_empty() {
                return Err(ConfigError::InvalidField {
                    field: "heartbeat.url",
                    reason: "an endpoint is required when heartbeats are enabled",
                });
            }
        }

        Ok(())
    }
}

/// Removes `//` line comments and `/* */` block comments from JSON text.
///
/// Comment markers inside string literals are left alone. Newlines inside block comments are kept so that parse errors
/// still point at the right line.
pub fn strip_comments(input: &str) -> String {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    let mut in_string = false;

    while let Some(c) = chars.next() {
        if in_string {
            output.push(c);
            match c {
                '\\' => {
                    if let Some(escaped) = chars.next() {
                        output.push(escaped);
                    }
                }
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        let next = chars.peek().copied();
        match (c, next) {
            ('"', _) => {
                in_string = true;
                output.push(c);
            }
            ('/', Some('/')) => {
                while chars.next_if(|&c| c != '\n').is_some() {}
            }
            ('/', Some('*')) => {
                chars.next();
                let mut previous = '\0';
                for c in chars.by_ref() {
                    if previous == '*' && c == '/' {
                        break;
                    }
                    if c == '\n' {
                        output.push('\n');
                    }
                    previous = c;
                }
            }
            _ => output.push(c),
        }
    }

    output
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use super::*;
    use crate::{LogLevel, LogTank};

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn strips_line_and_block_comments() {
        let input = r#"{
            // the number of workers
            "workers": 4, /* inline */ "listen": 1936
        }"#;
        let stripped = strip_comments(input);
        assert!(!stripped.contains("workers\n"));
        assert!(!stripped.contains("inline"));
        assert!(stripped.contains(r#""workers": 4,"#));
        assert!(stripped.contains(r#""listen": 1936"#));
    }

    #[test]
    fn comment_markers_inside_strings_are_kept() {
        let input = r#"{"url": "http://127.0.0.1:8085/api/v1/servers", "id": "a\"/*b*/"}"#;
        assert_eq!(strip_comments(input), input);
    }

    #[test]
    fn block_comments_keep_line_count() {
        let input = "{\n/* one\ntwo\nthree */\n}";
        assert_eq!(strip_comments(input).lines().count(), input.lines().count());
    }

    #[test]
    fn loads_commented_file_over_defaults() {
        let file = write_config(
            r#"{
                // two workers are plenty
                "workers": 2,
                "maintenance": { "interval": 5 },
                "log": { "tank": "file", "level": "warn", "file": "/tmp/oryx-test.log" },
                "stat": { "disks": ["nvme0n1"] }
            }"#,
        );

        let config = Config::from_file(file.path()).unwrap();
        assert_eq!(config.workers, 2);
        assert_eq!(config.maintenance.interval, 5);
        assert_eq!(config.log.tank, LogTank::File);
        assert_eq!(config.log.level, LogLevel::Warn);
        assert_eq!(config.stat.disks, vec!["nvme0n1".to_string()]);

        // Untouched sections keep their defaults.
        assert_eq!(config.listen, 1935);
        assert_eq!(config.heartbeat, Default::default());
    }

    #[test]
    fn environment_overrides_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("oryx.json", r#"{ "workers": 2, "log": { "level": "warn" } }"#)?;
            jail.set_env("ORYX_LOG__LEVEL", "error");
            jail.set_env("ORYX_WORKERS", "3");

            let config = Config::from_file("oryx.json").unwrap();
            assert_eq!(config.log.level, LogLevel::Error);
            assert_eq!(config.workers, 3);
            assert_eq!(config.log.tank, LogTank::Console);
            Ok(())
        });
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = Config::from_file("/nonexistent/oryx.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }

    #[test]
    fn malformed_file_is_a_parse_error() {
        let file = write_config(r#"{ "workers": "many" }"#);
        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn negative_workers_are_rejected() {
        let file = write_config(r#"{ "workers": -1 }"#);
        let err = Config::from_file(file.path()).unwrap_err();
        assert!(matches!(err, ConfigError::NegativeWorkers { workers: -1 }));
    }

    #[test]
    fn validation_rejects_unusable_values() {
        let mut config = Config::default();
        config.log.tank = LogTank::File;
        config.log.file = "  ".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidField { field: "log.file", .. })
        ));

        let mut config = Config::default();
        config.heartbeat.enabled = true;
        config.heartbeat.interval = f64::NAN;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidField {
                field: "heartbeat.interval",
                ..
            })
        ));

        let mut config = Config::default();
        config.maintenance.interval = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidField {
                field: "maintenance.interval",
                ..
            })
        ));

        assert!(Config::default().validate().is_ok());
    }
}
