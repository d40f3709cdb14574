//! Retention sweeper: bounds storage growth from abandoned jobs.
//!
//! Uploaded sources and encoded outputs are kept on disk only as long as a
//! client might still come back for them. A periodic sweep deletes files
//! older than the retention window by modification time, independent of
//! whether a registry record still references them; terminal registry
//! records past the window are evicted in the same cycle.

use crate::registry::JobRegistry;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Retention window and sweep cadence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Files older than this are deleted by the sweep.
    pub max_age: Duration,
    /// Interval between sweep cycles.
    pub interval: Duration,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age: Duration::from_secs(3600),
            interval: Duration::from_secs(3600),
        }
    }
}

/// Outcome counters for one sweep cycle.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepStats {
    /// Files removed this cycle.
    pub files_deleted: usize,
    /// Files that could not be removed (logged, not fatal).
    pub files_failed: usize,
    /// Terminal job records evicted from the registry.
    pub records_evicted: usize,
}

/// Periodic background task that reclaims stale files and records.
pub struct RetentionSweeper {
    upload_dir: PathBuf,
    output_dir: PathBuf,
    policy: RetentionPolicy,
    registry: Arc<JobRegistry>,
}

impl RetentionSweeper {
    /// Create a sweeper over the upload and output directories.
    pub fn new(
        upload_dir: PathBuf,
        output_dir: PathBuf,
        policy: RetentionPolicy,
        registry: Arc<JobRegistry>,
    ) -> Self {
        Self {
            upload_dir,
            output_dir,
            policy,
            registry,
        }
    }

    /// Spawn the periodic sweep loop.
    ///
    /// The loop runs one sweep per interval and exits cleanly when the
    /// shutdown token fires, so tests and process shutdown never leave a
    /// dangling timer behind.
    pub fn spawn(self, shutdown: CancellationToken) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => {
                        debug!("retention sweeper stopping");
                        break;
                    }
                    _ = tokio::time::sleep(self.policy.interval) => {
                        let stats = self.sweep_once().await;
                        info!(
                            files_deleted = stats.files_deleted,
                            files_failed = stats.files_failed,
                            records_evicted = stats.records_evicted,
                            "retention sweep finished"
                        );
                    }
                }
            }
        })
    }

    /// Run a single sweep cycle over both directories and the registry.
    pub async fn sweep_once(&self) -> SweepStats {
        let cutoff = SystemTime::now()
            .checked_sub(self.policy.max_age)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut stats = SweepStats::default();
        for dir in [&self.upload_dir, &self.output_dir] {
            let (deleted, failed) = sweep_dir(dir, cutoff);
            stats.files_deleted += deleted;
            stats.files_failed += failed;
        }

        stats.records_evicted = self.evict_stale_records().await;
        stats
    }

    /// Remove terminal job records not touched within the retention window.
    ///
    /// Decoupled from the file scan: a record may outlive its files (client
    /// never polled again) or vice versa.
    async fn evict_stale_records(&self) -> usize {
        let cutoff_ms = crate::job::current_timestamp_ms()
            - i64::try_from(self.policy.max_age.as_millis()).unwrap_or(i64::MAX);

        let mut evicted = 0;
        for job in self.registry.list().await {
            if job.is_terminal() && job.updated_at_ms < cutoff_ms {
                if self.registry.delete(&job.id).await {
                    debug!(job_id = %job.id, "evicted stale job record");
                    evicted += 1;
                }
            }
        }
        evicted
    }
}

/// Delete every file in `dir` whose modification time is older than `cutoff`.
///
/// Files that disappear mid-scan are tolerated; individual deletion
/// failures are logged and the scan continues.
fn sweep_dir(dir: &Path, cutoff: SystemTime) -> (usize, usize) {
    if !dir.exists() {
        return (0, 0);
    }

    let mut deleted = 0;
    let mut failed = 0;

    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .into_iter()
        .filter_map(|e| e.ok())
    {
        if !entry.file_type().is_file() {
            continue;
        }

        let modified = match entry.metadata().ok().and_then(|m| m.modified().ok()) {
            Some(t) => t,
            None => continue,
        };

        if modified < cutoff {
            match std::fs::remove_file(entry.path()) {
                Ok(()) => deleted += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %entry.path().display(), error = %e, "failed to delete stale file");
                    failed += 1;
                }
            }
        }
    }

    (deleted, failed)
}

/// Best-effort file removal shared by error cleanup and retrieval cleanup.
///
/// A missing file is a no-op; any other failure is logged and swallowed.
pub fn best_effort_remove(path: &Path) {
    match std::fs::remove_file(path) {
        Ok(()) => debug!(path = %path.display(), "removed file"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(path = %path.display(), error = %e, "failed to remove file"),
    }
}
