//! Per-subscription download watermarks.
//!
//! Each subscription owns one `<name>.run` file under the done directory
//! holding the publish date of the last item it downloaded.  Reads never
//! fail: anything short of a parseable date is "no watermark", which errs on
//! the side of downloading again rather than skipping forever.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, SecondsFormat, Utc};
use tracing::{debug, warn};

use crate::error::Result;
use crate::source::parse_date;

const WATERMARK_EXTENSION: &str = "run";

/// File-backed watermark store.
#[derive(Debug, Clone)]
pub struct WatermarkStore {
    dir: PathBuf,
}

impl WatermarkStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Location of the watermark record for `subscription`.
    pub fn path_for(&self, subscription: &str) -> PathBuf {
        self.dir
            .join(format!("{subscription}.{WATERMARK_EXTENSION}"))
    }

    /// Read the watermark for `subscription`.
    ///
    /// Missing, empty and unparseable records are all `None`.  Other I/O
    /// failures are logged and also yield `None`.
    pub async fn read(&self, subscription: &str) -> Option<DateTime<Utc>> {
        let path = self.path_for(subscription);
        let raw = match tokio::fs::read_to_string(&path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(subscription = %subscription, "No watermark recorded yet");
                return None;
            }
            Err(e) => {
                warn!(
                    subscription = %subscription,
                    path = %path.display(),
                    error = %e,
                    "Failed to read watermark, treating as absent"
                );
                return None;
            }
        };

        if raw.trim().is_empty() {
            return None;
        }

        let parsed = parse_date(&raw);
        if parsed.is_none() {
            warn!(
                subscription = %subscription,
                path = %path.display(),
                "Watermark is not a date, treating as absent"
            );
        }
        parsed
    }

    /// Persist `date` as the watermark for `subscription`.
    ///
    /// The record is written to a sibling temp file and renamed into place,
    /// so a crash mid-write leaves the previous watermark intact.
    pub async fn write(&self, subscription: &str, date: DateTime<Utc>) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;

        let path = self.path_for(subscription);
        let tmp = path.with_extension(format!("{WATERMARK_EXTENSION}.tmp"));
        tokio::fs::write(&tmp, date.to_rfc3339_opts(SecondsFormat::Millis, true)).await?;
        tokio::fs::rename(&tmp, &path).await?;
        Ok(())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}
