//! Rolling log file and tracing setup.
//!
//! Every tracing event is written twice: to stdout, and through [`LogSink`]
//! to the active log file.  The two layers are independent, so a failing
//! disk never hides a message from the console.
//!
//! The sink rotates the active file once it grows past the configured size,
//! renaming it to `<file>.<YYYYMMDDHHMMSSfff>.old`, and keeps at most
//! `numOldLogs` of those around.  Rotated names sort by their embedded
//! timestamp, which is what retention relies on.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

use crate::config::LogSettings;

const DEFAULT_LOG_FILTER: &str = "feedgrab=info";
const ROTATED_EXTENSION: &str = "old";

/// Install the global tracing subscriber and return the sink backing its
/// file layer.
pub fn init(settings: &LogSettings) -> Result<LogSink> {
    let sink = LogSink::open(settings).with_context(|| {
        format!(
            "Failed to open log file {}",
            settings.active_path().display()
        )
    })?;

    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER))
    };

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(sink.clone())
                .with_ansi(false)
                .with_filter(filter()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(io::stdout)
                .with_filter(filter()),
        )
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(sink)
}

/// Housekeeping done on the write path, reported by the next
/// [`LogSink::maintain`] once the lock is released.
#[derive(Debug)]
enum Deferred {
    Rotated(PathBuf),
    RotationFailed(io::Error),
    Cleanup(Cleanup),
    CleanupFailed(io::Error),
}

struct RollingLog {
    dir: PathBuf,
    file_name: String,
    max_bytes: u64,
    retain: usize,
    file: Option<File>,
    current_size: u64,
    /// Set when a write-time rotation failed; suppresses further attempts
    /// until the next explicit [`RollingLog::rotate_if_needed`].
    rotation_failed: bool,
    deferred: Vec<Deferred>,
    clock: fn() -> DateTime<Local>,
}

impl RollingLog {
    fn open(settings: &LogSettings) -> io::Result<Self> {
        fs::create_dir_all(&settings.directory)?;
        let mut log = Self {
            dir: settings.directory.clone(),
            file_name: settings.file_name.clone(),
            max_bytes: settings.max_bytes(),
            // Zero retention would delete every rotated file; keep one.
            retain: settings.num_old_logs.max(1),
            file: None,
            current_size: 0,
            rotation_failed: false,
            deferred: Vec::new(),
            clock: Local::now,
        };
        log.reopen()?;
        Ok(log)
    }

    fn active_path(&self) -> PathBuf {
        self.dir.join(&self.file_name)
    }

    fn rotated_path(&self) -> PathBuf {
        let stamp = (self.clock)().format("%Y%m%d%H%M%S%3f");
        self.dir
            .join(format!("{}.{stamp}.{ROTATED_EXTENSION}", self.file_name))
    }

    fn reopen(&mut self) -> io::Result<()> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(self.active_path())?;
        self.current_size = file.metadata()?.len();
        self.file = Some(file);
        Ok(())
    }

    /// Re-stat the active file and rotate it if it is over the limit.
    ///
    /// Returns the rotated path when a rotation happened.
    fn rotate_if_needed(&mut self) -> io::Result<Option<PathBuf>> {
        self.rotation_failed = false;
        self.current_size = match fs::metadata(self.active_path()) {
            Ok(meta) => meta.len(),
            Err(e) if e.kind() == io::ErrorKind::NotFound => 0,
            Err(e) => return Err(e),
        };
        if self.current_size <= self.max_bytes {
            return Ok(None);
        }
        self.rotate().map(Some)
    }

    fn rotate(&mut self) -> io::Result<PathBuf> {
        if let Some(mut file) = self.file.take() {
            let _ = file.flush();
        }

        let rotated = self.rotated_path();
        let renamed = fs::rename(self.active_path(), &rotated);
        // Reopen even if the rename failed, so later writes still land.
        self.reopen()?;
        renamed?;
        Ok(rotated)
    }

    /// Rotated siblings of the active file, oldest first.
    fn rotated_files(&self) -> io::Result<Vec<PathBuf>> {
        let prefix = format!("{}.", self.file_name);
        let suffix = format!(".{ROTATED_EXTENSION}");

        let mut names: Vec<String> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| entry.file_name().into_string().ok())
            .filter(|name| {
                name.strip_prefix(&prefix)
                    .and_then(|rest| rest.strip_suffix(&suffix))
                    .is_some_and(|stamp| {
                        !stamp.is_empty() && stamp.bytes().all(|b| b.is_ascii_digit())
                    })
            })
            .collect();
        names.sort();

        Ok(names.into_iter().map(|name| self.dir.join(name)).collect())
    }

    /// Delete rotated files beyond the retention count, oldest first.
    ///
    /// Returns what was deleted and what could not be.
    fn cleanup(&self) -> io::Result<Cleanup> {
        let files = self.rotated_files()?;
        let excess = files.len().saturating_sub(self.retain);

        let mut cleanup = Cleanup::default();
        for path in files.into_iter().take(excess) {
            match fs::remove_file(&path) {
                Ok(()) => cleanup.deleted.push(path),
                Err(e) => cleanup.failed.push((path, e)),
            }
        }
        Ok(cleanup)
    }

    fn append(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.current_size > self.max_bytes && !self.rotation_failed {
            match self.rotate() {
                Ok(rotated) => {
                    self.deferred.push(Deferred::Rotated(rotated));
                    let cleanup = match self.cleanup() {
                        Ok(cleanup) => Deferred::Cleanup(cleanup),
                        Err(e) => Deferred::CleanupFailed(e),
                    };
                    self.deferred.push(cleanup);
                }
                Err(e) => {
                    self.rotation_failed = true;
                    self.deferred.push(Deferred::RotationFailed(e));
                }
            }
        }

        let file = self
            .file
            .as_mut()
            .ok_or_else(|| io::Error::other("log file unavailable"))?;
        let bytes = file.write(buf)?;
        self.current_size += bytes as u64;
        Ok(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        if let Some(file) = self.file.as_mut() {
            file.flush()?;
        }
        Ok(())
    }
}

/// Outcome of a retention pass.
#[derive(Debug, Default)]
pub struct Cleanup {
    pub deleted: Vec<PathBuf>,
    pub failed: Vec<(PathBuf, io::Error)>,
}

/// Shared handle to the rolling log file.
///
/// Cloning is cheap; all clones append to the same file.  The sink never
/// emits tracing events while holding its lock, since its own file layer
/// would need the same lock to record them.
#[derive(Clone)]
pub struct LogSink {
    inner: Arc<Mutex<RollingLog>>,
}

impl LogSink {
    /// Open (or create) the active log file described by `settings`.
    pub fn open(settings: &LogSettings) -> io::Result<Self> {
        Ok(Self {
            inner: Arc::new(Mutex::new(RollingLog::open(settings)?)),
        })
    }

    fn lock(&self) -> io::Result<MutexGuard<'_, RollingLog>> {
        self.inner
            .lock()
            .map_err(|_| io::Error::other("log writer lock poisoned"))
    }

    /// Path of the active log file.
    pub fn active_path(&self) -> io::Result<PathBuf> {
        Ok(self.lock()?.active_path())
    }

    /// Rotate the active file if it has outgrown the configured size.
    pub fn rotate_if_needed(&self) -> io::Result<Option<PathBuf>> {
        self.lock()?.rotate_if_needed()
    }

    /// Delete rotated files beyond the retention count.
    pub fn cleanup_old_logs(&self) -> io::Result<Cleanup> {
        self.lock()?.cleanup()
    }

    fn take_deferred(&self) -> io::Result<Vec<Deferred>> {
        Ok(std::mem::take(&mut self.lock()?.deferred))
    }

    /// End-of-cycle housekeeping: report what the write path did since the
    /// last call, then rotation, then retention.
    ///
    /// Failures are logged and swallowed.
    pub fn maintain(&self) {
        match self.take_deferred() {
            Ok(deferred) => deferred.into_iter().for_each(report),
            Err(e) => warn!(error = %e, "Log housekeeping unavailable"),
        }

        match self.rotate_if_needed() {
            Ok(Some(rotated)) => report(Deferred::Rotated(rotated)),
            Ok(None) => {}
            Err(e) => report(Deferred::RotationFailed(e)),
        }

        match self.cleanup_old_logs() {
            Ok(cleanup) => report(Deferred::Cleanup(cleanup)),
            Err(e) => report(Deferred::CleanupFailed(e)),
        }
    }
}

/// Emit one housekeeping result.  Must be called without the sink lock held.
fn report(event: Deferred) {
    match event {
        Deferred::Rotated(rotated) => info!(rotated = %rotated.display(), "Rotated log file"),
        Deferred::RotationFailed(e) => {
            warn!(error = %e, "Log rotation failed, skipping until next cycle")
        }
        Deferred::Cleanup(cleanup) => {
            for path in &cleanup.deleted {
                info!(path = %path.display(), "Deleted old log file");
            }
            for (path, e) in &cleanup.failed {
                warn!(path = %path.display(), error = %e, "Failed to delete old log file");
            }
        }
        Deferred::CleanupFailed(e) => warn!(error = %e, "Log cleanup failed"),
    }
}

/// Per-event writer handed out to the tracing file layer.
pub struct LogSinkWriter {
    inner: Arc<Mutex<RollingLog>>,
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for LogSink {
    type Writer = LogSinkWriter;

    fn make_writer(&'a self) -> Self::Writer {
        LogSinkWriter {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Write for LogSinkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("log writer lock poisoned"))?;
        guard.append(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut guard = self
            .inner
            .lock()
            .map_err(|_| io::Error::other("log writer lock poisoned"))?;
        guard.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::path::Path;
    use tracing_subscriber::fmt::MakeWriter;

    fn is_rotated(path: &Path, file_name: &str) -> bool {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(&format!("{file_name}.")) && n.ends_with(".old"))
    }

    fn settings(dir: &Path, max_mb: f64, retain: usize) -> LogSettings {
        LogSettings {
            directory: dir.to_path_buf(),
            file_name: "feedgrab.log".into(),
            num_old_logs: retain,
            max_size_in_megabytes: max_mb,
        }
    }

    fn rotated_in(dir: &Path) -> Vec<PathBuf> {
        let mut found: Vec<PathBuf> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().path())
            .filter(|p| is_rotated(p, "feedgrab.log"))
            .collect();
        found.sort();
        found
    }

    #[test]
    fn append_writes_to_active_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::open(&settings(dir.path(), 1.0, 1)).unwrap();

        let mut writer = sink.make_writer();
        writer.write_all(b"2024-01-01T00:00:00Z INFO hello\n").unwrap();
        writer.flush().unwrap();

        let content = fs::read_to_string(sink.active_path().unwrap()).unwrap();
        assert_eq!(content, "2024-01-01T00:00:00Z INFO hello\n");
        assert!(rotated_in(dir.path()).is_empty());
    }

    #[test]
    fn oversized_file_rotates_on_next_append() {
        let dir = tempfile::tempdir().unwrap();
        let active = dir.path().join("feedgrab.log");
        let oversized = (0.11 * 1024.0 * 1024.0) as usize;
        fs::write(&active, vec![b'x'; oversized]).unwrap();

        let sink = LogSink::open(&settings(dir.path(), 0.1, 2)).unwrap();
        assert!(rotated_in(dir.path()).is_empty(), "opening must not rotate");

        sink.make_writer().write_all(b"fresh line\n").unwrap();

        let rotated = rotated_in(dir.path());
        assert_eq!(rotated.len(), 1);
        assert_eq!(fs::metadata(&rotated[0]).unwrap().len(), oversized as u64);
        assert_eq!(fs::read_to_string(&active).unwrap(), "fresh line\n");

        let name = rotated[0].file_name().unwrap().to_str().unwrap();
        let stamp = name
            .strip_prefix("feedgrab.log.")
            .and_then(|s| s.strip_suffix(".old"))
            .unwrap();
        assert_eq!(stamp.len(), 17, "YYYYMMDDHHMMSSfff");
        assert!(stamp.bytes().all(|b| b.is_ascii_digit()));
    }

    #[test]
    fn rotate_if_needed_leaves_small_file_alone() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::open(&settings(dir.path(), 1.0, 1)).unwrap();
        sink.make_writer().write_all(b"small\n").unwrap();

        assert!(sink.rotate_if_needed().unwrap().is_none());
        assert!(rotated_in(dir.path()).is_empty());
    }

    #[test]
    fn rotate_if_needed_sees_external_growth() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::open(&settings(dir.path(), 0.001, 1)).unwrap();
        fs::write(dir.path().join("feedgrab.log"), vec![b'y'; 4096]).unwrap();

        let rotated = sink.rotate_if_needed().unwrap().expect("should rotate");
        assert!(rotated.exists());
        assert_eq!(
            fs::metadata(dir.path().join("feedgrab.log")).unwrap().len(),
            0,
            "fresh active file"
        );
    }

    #[test]
    fn cleanup_keeps_newest_rotated_files() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::open(&settings(dir.path(), 1.0, 2)).unwrap();
        sink.make_writer().write_all(b"active\n").unwrap();

        let stamps = [
            "20240101000000000",
            "20240102000000000",
            "20240103000000000",
            "20240104000000000",
            "20240105000000000",
        ];
        for stamp in stamps {
            fs::write(dir.path().join(format!("feedgrab.log.{stamp}.old")), "old").unwrap();
        }
        fs::write(dir.path().join("unrelated.log.20240101000000000.old"), "x").unwrap();

        let cleanup = sink.cleanup_old_logs().unwrap();

        assert_eq!(cleanup.deleted.len(), 3);
        assert!(cleanup.failed.is_empty());
        let left: Vec<_> = rotated_in(dir.path())
            .iter()
            .map(|p| p.file_name().unwrap().to_str().unwrap().to_string())
            .collect();
        assert_eq!(
            left,
            vec![
                "feedgrab.log.20240104000000000.old",
                "feedgrab.log.20240105000000000.old",
            ]
        );
        assert_eq!(
            fs::read_to_string(dir.path().join("feedgrab.log")).unwrap(),
            "active\n"
        );
        assert!(dir.path().join("unrelated.log.20240101000000000.old").exists());
    }

    #[test]
    fn cleanup_within_retention_deletes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::open(&settings(dir.path(), 1.0, 3)).unwrap();
        fs::write(dir.path().join("feedgrab.log.20240101000000000.old"), "a").unwrap();

        let cleanup = sink.cleanup_old_logs().unwrap();
        assert!(cleanup.deleted.is_empty());
        assert_eq!(rotated_in(dir.path()).len(), 1);
    }

    #[test]
    fn failed_rotation_still_appends_and_is_not_retried_per_write() {
        let dir = tempfile::tempdir().unwrap();
        let active = dir.path().join("feedgrab.log");
        fs::write(&active, vec![b'x'; 4096]).unwrap();
        let sink = LogSink::open(&settings(dir.path(), 0.001, 1)).unwrap();

        let fixed = || Local.with_ymd_and_hms(2024, 1, 2, 3, 4, 5).unwrap();
        sink.inner.lock().unwrap().clock = fixed;
        // A non-empty directory at the rotation target makes the rename fail.
        let blocker = dir.path().join("feedgrab.log.20240102030405000.old");
        fs::create_dir(&blocker).unwrap();
        fs::write(blocker.join("keep"), "x").unwrap();

        let mut writer = sink.make_writer();
        writer.write_all(b"line one\n").unwrap();
        writer.write_all(b"line two\n").unwrap();

        let content = fs::read(&active).unwrap();
        assert_eq!(content.len(), 4096 + "line one\nline two\n".len());
        assert!(content.ends_with(b"line one\nline two\n"));
        {
            let log = sink.inner.lock().unwrap();
            assert!(log.rotation_failed);
            assert_eq!(log.deferred.len(), 1, "one attempt until next maintain");
            assert!(matches!(log.deferred[0], Deferred::RotationFailed(_)));
        }

        fs::remove_dir_all(&blocker).unwrap();
        sink.maintain();

        assert!(blocker.is_file(), "rotated once the target is free");
        assert_eq!(fs::metadata(&active).unwrap().len(), 0);
        let log = sink.inner.lock().unwrap();
        assert!(!log.rotation_failed);
        assert!(log.deferred.is_empty());
    }

    #[test]
    fn write_time_cleanup_is_reported_by_maintain() {
        let dir = tempfile::tempdir().unwrap();
        let active = dir.path().join("feedgrab.log");
        fs::write(&active, vec![b'x'; 4096]).unwrap();
        for stamp in ["20200101000000000", "20200102000000000"] {
            fs::write(dir.path().join(format!("feedgrab.log.{stamp}.old")), "old").unwrap();
        }
        let sink = LogSink::open(&settings(dir.path(), 0.001, 1)).unwrap();

        sink.make_writer().write_all(b"fresh\n").unwrap();

        {
            let log = sink.inner.lock().unwrap();
            assert!(matches!(log.deferred[0], Deferred::Rotated(_)));
            match &log.deferred[1] {
                Deferred::Cleanup(cleanup) => assert_eq!(cleanup.deleted.len(), 2),
                other => panic!("unexpected: {other:?}"),
            }
        }
        sink.maintain();
        assert!(sink.inner.lock().unwrap().deferred.is_empty());
        assert_eq!(rotated_in(dir.path()).len(), 1);
    }

    #[test]
    fn zero_retention_keeps_one_rotated_file() {
        let dir = tempfile::tempdir().unwrap();
        let sink = LogSink::open(&settings(dir.path(), 1.0, 0)).unwrap();
        for stamp in ["20240101000000000", "20240102000000000"] {
            fs::write(dir.path().join(format!("feedgrab.log.{stamp}.old")), "old").unwrap();
        }

        let cleanup = sink.cleanup_old_logs().unwrap();

        assert_eq!(cleanup.deleted.len(), 1);
        assert_eq!(
            rotated_in(dir.path())[0].file_name().unwrap(),
            "feedgrab.log.20240102000000000.old"
        );
    }

    #[test]
    fn maintain_swallows_missing_directory() {
        let dir = tempfile::tempdir().unwrap();
        let logs = dir.path().join("logs");
        let sink = LogSink::open(&settings(&logs, 1.0, 1)).unwrap();
        fs::remove_dir_all(&logs).unwrap();

        // Must not panic or propagate.
        sink.maintain();
    }
}
