//! Configuration file loading and validation.
//!
//! The configuration is a single JSON document read once at startup.  Keys
//! are camelCase.  Every optional setting has a default, so a minimal file
//! only needs `cron`, `doneDirectory` and `subscriptions`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{Error, Result};
use crate::matcher::TitleFilter;
use crate::poll::CronSchedule;

/// Default log file name when `log.fileName` is absent.
pub const DEFAULT_LOG_FILE_NAME: &str = "feedgrab.log";

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Cron expression driving the cycle schedule (5, 6 or 7 fields)
    pub cron: String,

    /// Directory holding one `<name>.run` watermark file per subscription
    pub done_directory: PathBuf,

    /// Upper bound on every HTTP request, in seconds
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,

    /// Log file placement, size limit and retention
    #[serde(default)]
    pub log: LogSettings,

    /// Feeds to poll and what to grab from them
    #[serde(default)]
    pub subscriptions: Vec<Subscription>,
}

/// Rolling log file settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogSettings {
    /// Directory holding the active log and its rotated siblings
    #[serde(default = "default_log_directory")]
    pub directory: PathBuf,

    /// Name of the active log file
    #[serde(default = "default_log_file_name")]
    pub file_name: String,

    /// How many rotated files to keep; `0` is treated as `1`
    #[serde(default = "default_num_old_logs")]
    pub num_old_logs: usize,

    /// Size above which the active file is rotated
    #[serde(default = "default_max_size_in_megabytes")]
    pub max_size_in_megabytes: f64,
}

impl Default for LogSettings {
    fn default() -> Self {
        Self {
            directory: default_log_directory(),
            file_name: default_log_file_name(),
            num_old_logs: default_num_old_logs(),
            max_size_in_megabytes: default_max_size_in_megabytes(),
        }
    }
}

impl LogSettings {
    /// Full path of the active log file.
    pub fn active_path(&self) -> PathBuf {
        self.directory.join(&self.file_name)
    }

    /// Rotation threshold in bytes.
    pub fn max_bytes(&self) -> u64 {
        (self.max_size_in_megabytes * 1024.0 * 1024.0) as u64
    }
}

/// One feed watch: which feed, which titles, where to save.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Subscription {
    /// Unique key; names the watermark file and tags log lines
    pub name: String,

    /// Regular expression matched against item titles
    #[serde(rename = "regex")]
    pub filter_pattern: String,

    /// Match titles regardless of case
    #[serde(rename = "ignoreCase", default = "default_case_insensitive")]
    pub case_insensitive: bool,

    /// Feed to poll
    #[serde(rename = "rssFeedUrl")]
    pub feed_url: String,

    /// Directory receiving `<title>.torrent` files
    pub save_location: PathBuf,
}

fn default_request_timeout_seconds() -> u64 {
    30
}

fn default_log_directory() -> PathBuf {
    PathBuf::from(".")
}

fn default_log_file_name() -> String {
    DEFAULT_LOG_FILE_NAME.to_string()
}

fn default_num_old_logs() -> usize {
    1
}

fn default_max_size_in_megabytes() -> f64 {
    100.0
}

fn default_case_insensitive() -> bool {
    true
}

impl Config {
    /// Read, parse and validate the configuration at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: Config = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Bounded timeout applied to every feed and payload request.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    /// Check everything that would otherwise surface mid-cycle.
    ///
    /// Subscription names key the watermark files, so they must be unique
    /// and usable as a file stem.
    pub fn validate(&self) -> Result<()> {
        if self.cron.trim().is_empty() {
            return Err(Error::config("cron expression must not be empty", "cron"));
        }
        CronSchedule::parse(&self.cron)
            .map_err(|e| match e {
                Error::Config { .. } => e,
                other => Error::config(other.to_string(), "cron"),
            })?;

        if self.request_timeout_seconds == 0 {
            return Err(Error::config(
                "request timeout must be at least one second",
                "requestTimeoutSeconds",
            ));
        }

        if self.log.file_name.trim().is_empty() {
            return Err(Error::config("log file name must not be empty", "log.fileName"));
        }
        let max_mb = self.log.max_size_in_megabytes;
        if max_mb.is_nan() || max_mb <= 0.0 {
            return Err(Error::config(
                "maximum log size must be positive",
                "log.maxSizeInMegabytes",
            ));
        }

        let mut seen = HashSet::new();
        for (i, sub) in self.subscriptions.iter().enumerate() {
            let key = |field: &str| format!("subscriptions[{i}].{field}");

            let name = sub.name.trim();
            if name.is_empty() || name == "." || name == ".." {
                return Err(Error::config(
                    format!("'{}' is not a usable subscription name", sub.name),
                    key("name"),
                ));
            }
            if sub.name.contains(['/', '\\']) {
                return Err(Error::config(
                    format!("subscription name '{}' must not contain path separators", sub.name),
                    key("name"),
                ));
            }
            if !seen.insert(sub.name.as_str()) {
                return Err(Error::config(
                    format!("duplicate subscription name '{}'", sub.name),
                    key("name"),
                ));
            }
            if sub.feed_url.trim().is_empty() {
                return Err(Error::config("feed URL must not be empty", key("rssFeedUrl")));
            }
            TitleFilter::new(sub).map_err(|e| Error::config(e.to_string(), key("regex")))?;
        }

        Ok(())
    }
}
