//! Job orchestrator: admission, execution, and retrieval of encode jobs.
//!
//! One spawned task per submitted job, admitted through a semaphore so the
//! number of concurrent ffmpeg processes stays bounded. The orchestrator is
//! the only writer of job state; everything callers see comes out of the
//! registry as snapshots.

use crate::encode::{run_ffmpeg, EncodeError, EncodeParams};
use crate::job::{DurationSource, Job, JobStatus};
use crate::probe::{
    probe_media, select_quality, BytesPerSecondEstimator, DurationEstimator, QualityProfile,
};
use crate::progress::{encode_progress_percent, ProgressEvent};
use crate::registry::{JobRegistry, RegistryError};
use crate::sweeper::best_effort_remove;
use serde::Serialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, RwLock, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use vidshrink_config::Config;

/// Error type for job submission.
#[derive(Debug, Error)]
pub enum SubmitError {
    /// The source file is missing, unreadable, or empty.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// IO error while inspecting the source.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Registry rejected the new record.
    #[error(transparent)]
    Registry(#[from] RegistryError),
}

/// Error type for output retrieval.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum RetrieveError {
    /// No record with this id.
    #[error("job not found: {0}")]
    NotFound(String),

    /// The job exists but has not completed successfully.
    #[error("job not ready: {0}")]
    NotReady(String),
}

/// Runtime settings for the orchestrator, extracted from configuration.
#[derive(Debug, Clone)]
pub struct OrchestratorSettings {
    /// Directory where encoded outputs are written.
    pub output_dir: PathBuf,
    /// Path to the ffmpeg binary.
    pub ffmpeg_path: PathBuf,
    /// Path to the ffprobe binary.
    pub ffprobe_path: PathBuf,
    /// Bitrate target used when the caller does not supply one.
    pub default_bitrate_kbps: u32,
    /// Wall-clock ceiling per encode in seconds (0 = unlimited).
    pub max_encode_secs: u64,
    /// Maximum concurrent encodes (0 = derive from CPU count).
    pub max_concurrent: usize,
    /// Byte rate assumed by the size-based duration heuristic.
    pub heuristic_bytes_per_second: u64,
}

impl OrchestratorSettings {
    /// Extract orchestrator settings from the loaded configuration.
    pub fn from_config(config: &Config) -> Self {
        Self {
            output_dir: config.storage.output_dir.clone(),
            ffmpeg_path: config.encoder.ffmpeg_path.clone(),
            ffprobe_path: config.encoder.ffprobe_path.clone(),
            default_bitrate_kbps: config.encoder.default_bitrate_kbps,
            max_encode_secs: config.encoder.max_encode_secs,
            max_concurrent: config.jobs.max_concurrent as usize,
            heuristic_bytes_per_second: config.jobs.heuristic_bytes_per_second,
        }
    }
}

/// Point-in-time view of a job, with derived fields for status consumers.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// Job identifier.
    pub id: String,
    /// Current status.
    pub status: JobStatus,
    /// Display percentage in [0, 100].
    pub progress: u8,
    /// Current-phase message.
    pub message: String,
    /// Original source filename.
    pub input_name: String,
    /// User-facing output filename.
    pub output_name: String,
    /// Wall-clock seconds since submission.
    pub elapsed_secs: f64,
    /// Remaining media time divided by encoder speed, when both are known.
    pub eta_secs: Option<f64>,
    /// Latest encoder-reported speed multiplier.
    pub speed: Option<f32>,
    /// Whether the duration estimate was probed or guessed from size.
    pub duration_source: DurationSource,
    /// Source file size in bytes.
    pub source_size_bytes: u64,
    /// Output file size in bytes, once the job completed.
    pub output_size_bytes: Option<u64>,
    /// Size reduction achieved, as a percentage of the source size.
    pub reduction_percent: Option<f64>,
}

impl StatusReport {
    fn from_job(job: &Job) -> Self {
        let elapsed_secs =
            (crate::job::current_timestamp_ms() - job.created_at_ms).max(0) as f64 / 1000.0;

        let eta_secs = match (job.encoded_secs, job.speed) {
            (Some(t), Some(speed)) if speed > 0.0 && job.estimated_duration_secs > t => {
                Some((job.estimated_duration_secs - t) / speed as f64)
            }
            _ => None,
        };

        let output_size_bytes = if job.status == JobStatus::Completed {
            std::fs::metadata(&job.output_path).ok().map(|m| m.len())
        } else {
            None
        };
        let reduction_percent = output_size_bytes.and_then(|out| {
            if job.source_size_bytes == 0 {
                None
            } else {
                Some((1.0 - out as f64 / job.source_size_bytes as f64) * 100.0)
            }
        });

        Self {
            id: job.id.clone(),
            status: job.status,
            progress: job.progress,
            message: job.message.clone(),
            input_name: job.input_name.clone(),
            output_name: job.output_name.clone(),
            elapsed_secs,
            eta_secs,
            speed: job.speed,
            duration_source: job.duration_source,
            source_size_bytes: job.source_size_bytes,
            output_size_bytes,
            reduction_percent,
        }
    }
}

/// Handle to a successfully retrieved output.
///
/// Owns both job files; dropping the handle deletes them best-effort, so a
/// caller that copies or renames the output before dropping keeps it. The
/// registry record is already gone by the time this handle exists.
#[derive(Debug)]
pub struct RetrievedOutput {
    input_path: PathBuf,
    output_path: PathBuf,
    output_name: String,
}

impl RetrievedOutput {
    /// Path of the encoded output file, valid until the handle drops.
    pub fn output_path(&self) -> &Path {
        &self.output_path
    }

    /// User-facing filename for the output.
    pub fn output_name(&self) -> &str {
        &self.output_name
    }
}

impl Drop for RetrievedOutput {
    fn drop(&mut self) {
        best_effort_remove(&self.input_path);
        best_effort_remove(&self.output_path);
    }
}

/// Coordinates the full lifecycle of encode jobs.
///
/// Cheap to clone: all clones share the same registry, admission semaphore
/// and cancellation state.
#[derive(Clone)]
pub struct JobOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Arc<JobRegistry>,
    semaphore: Arc<Semaphore>,
    estimator: Arc<dyn DurationEstimator>,
    cancel_tokens: RwLock<HashMap<String, CancellationToken>>,
    shutdown: CancellationToken,
    settings: OrchestratorSettings,
}

impl JobOrchestrator {
    /// Create an orchestrator with the default size-based duration estimator.
    pub fn new(settings: OrchestratorSettings) -> Self {
        let estimator = Arc::new(BytesPerSecondEstimator {
            bytes_per_second: settings.heuristic_bytes_per_second,
        });
        Self::with_estimator(settings, estimator)
    }

    /// Create an orchestrator with a caller-supplied duration estimator.
    pub fn with_estimator(
        settings: OrchestratorSettings,
        estimator: Arc<dyn DurationEstimator>,
    ) -> Self {
        let permits = derive_max_concurrent_jobs(settings.max_concurrent);
        info!(max_concurrent = permits, "orchestrator initialised");
        Self {
            inner: Arc::new(Inner {
                registry: Arc::new(JobRegistry::new()),
                semaphore: Arc::new(Semaphore::new(permits)),
                estimator,
                cancel_tokens: RwLock::new(HashMap::new()),
                shutdown: CancellationToken::new(),
                settings,
            }),
        }
    }

    /// The registry backing this orchestrator (status endpoint, sweeper).
    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.inner.registry
    }

    /// Cancel all running jobs; in-flight tasks mark themselves errored.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    /// Submit a source video for compression.
    ///
    /// Validates the source, creates the queued record, spawns the job task
    /// and returns the new job id immediately. The output lands at
    /// `{output_dir}/{job_id}_{sanitized_name}`.
    pub async fn submit(
        &self,
        input_path: &Path,
        output_name: &str,
        target_bitrate_kbps: Option<u32>,
    ) -> Result<String, SubmitError> {
        let meta = std::fs::metadata(input_path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                SubmitError::InvalidInput(format!("no such file: {}", input_path.display()))
            } else {
                SubmitError::Io(e)
            }
        })?;
        if !meta.is_file() {
            return Err(SubmitError::InvalidInput(format!(
                "not a regular file: {}",
                input_path.display()
            )));
        }
        if meta.len() == 0 {
            return Err(SubmitError::InvalidInput(format!(
                "empty file: {}",
                input_path.display()
            )));
        }
        let is_mp4 = input_path
            .extension()
            .map(|e| e.eq_ignore_ascii_case("mp4"))
            .unwrap_or(false);
        if !is_mp4 {
            return Err(SubmitError::InvalidInput(format!(
                "only MP4 sources are supported: {}",
                input_path.display()
            )));
        }

        let job_id = uuid::Uuid::new_v4().to_string();
        let sanitized = sanitize_file_name(output_name);
        let output_path = self
            .inner
            .settings
            .output_dir
            .join(format!("{}_{}", job_id, sanitized));
        let input_name = input_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "input.mp4".to_string());

        let job = Job::new(
            job_id.clone(),
            input_path.to_path_buf(),
            output_path,
            input_name,
            sanitized,
            meta.len(),
            self.inner.estimator.estimate_secs(meta.len()),
        );
        self.inner.registry.create(job).await?;

        let cancel = self.inner.shutdown.child_token();
        self.inner
            .cancel_tokens
            .write()
            .await
            .insert(job_id.clone(), cancel.clone());

        let bitrate = target_bitrate_kbps.unwrap_or(self.inner.settings.default_bitrate_kbps);
        let orchestrator = self.clone();
        let id = job_id.clone();
        tokio::spawn(async move {
            orchestrator.run_job(&id, bitrate, cancel).await;
        });

        info!(job_id = %job_id, "job submitted");
        Ok(job_id)
    }

    /// Request cancellation of a job. Returns whether a running job was found.
    pub async fn cancel(&self, id: &str) -> bool {
        let tokens = self.inner.cancel_tokens.read().await;
        match tokens.get(id) {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Point-in-time status report for one job.
    pub async fn get_status(&self, id: &str) -> Result<StatusReport, RegistryError> {
        let job = self.inner.registry.get(id).await?;
        Ok(StatusReport::from_job(&job))
    }

    /// Status reports for every known job.
    pub async fn list_status(&self) -> Vec<StatusReport> {
        self.inner
            .registry
            .list()
            .await
            .iter()
            .map(StatusReport::from_job)
            .collect()
    }

    /// Claim the finished output of a completed job.
    ///
    /// Removes the registry record, so a later status query reports the id
    /// as unknown. The returned handle owns both files; see
    /// [`RetrievedOutput`].
    pub async fn retrieve(&self, id: &str) -> Result<RetrievedOutput, RetrieveError> {
        let job = self
            .inner
            .registry
            .get(id)
            .await
            .map_err(|_| RetrieveError::NotFound(id.to_string()))?;

        if job.status != JobStatus::Completed {
            return Err(RetrieveError::NotReady(id.to_string()));
        }

        self.inner.registry.delete(id).await;
        self.inner.cancel_tokens.write().await.remove(id);
        info!(job_id = %id, "output retrieved");

        Ok(RetrievedOutput {
            input_path: job.input_path,
            output_path: job.output_path,
            output_name: job.output_name,
        })
    }

    /// Execute one job end to end: admission, probe, encode, terminal state.
    async fn run_job(&self, id: &str, bitrate_kbps: u32, cancel: CancellationToken) {
        let permit = tokio::select! {
            _ = cancel.cancelled() => {
                self.inner.cancel_tokens.write().await.remove(id);
                // Same cleanup contract as the encode failure path: the
                // staged input is reclaimed, not left for the sweep.
                if let Ok(job) = self.inner.registry.get(id).await {
                    best_effort_remove(&job.input_path);
                }
                self.finish_failed(id, "cancelled before encoding started").await;
                return;
            }
            permit = Arc::clone(&self.inner.semaphore).acquire_owned() => match permit {
                Ok(permit) => permit,
                // Semaphore closure only happens at teardown.
                Err(_) => return,
            },
        };

        let job = match self.inner.registry.get(id).await {
            Ok(job) => job,
            Err(_) => {
                debug!(job_id = %id, "record gone before execution");
                return;
            }
        };

        self.update_job(id, |job| {
            job.start_processing();
            job.set_progress(5);
            job.set_message("Preparing video...");
        })
        .await;

        // Probe failure is recoverable: the size heuristic stays in place
        // and the encode proceeds at the caller's bitrate target.
        let quality = match probe_media(&self.inner.settings.ffprobe_path, &job.input_path).await {
            Ok(info) => {
                if info.duration_secs > 0.0 {
                    self.update_job(id, |job| {
                        job.estimated_duration_secs = info.duration_secs;
                        job.duration_source = DurationSource::Probed;
                        job.touch();
                    })
                    .await;
                }
                select_quality(info.height, bitrate_kbps)
            }
            Err(e) => {
                warn!(job_id = %id, error = %e, "probe failed, using size heuristic");
                QualityProfile {
                    bitrate_kbps,
                    crf: 23,
                }
            }
        };

        let duration_secs = match self.inner.registry.get(id).await {
            Ok(job) => job.estimated_duration_secs,
            Err(_) => job.estimated_duration_secs,
        };

        self.update_job(id, |job| {
            job.set_progress(10);
            job.set_message("Encoding...");
        })
        .await;

        let (tx, rx) = mpsc::unbounded_channel();
        let consumer = tokio::spawn(consume_progress(
            Arc::clone(&self.inner.registry),
            id.to_string(),
            duration_secs,
            rx,
        ));

        let params = EncodeParams {
            ffmpeg_path: self.inner.settings.ffmpeg_path.clone(),
            input_path: job.input_path.clone(),
            output_path: job.output_path.clone(),
            bitrate_kbps: quality.bitrate_kbps,
            crf: quality.crf,
        };

        let result = if self.inner.settings.max_encode_secs > 0 {
            let ceiling = Duration::from_secs(self.inner.settings.max_encode_secs);
            match tokio::time::timeout(ceiling, run_ffmpeg(&params, &cancel, tx)).await {
                Ok(result) => result,
                // Dropping the encode future kills the child process.
                Err(_) => Err(EncodeError::TimedOut(self.inner.settings.max_encode_secs)),
            }
        } else {
            run_ffmpeg(&params, &cancel, tx).await
        };

        // The sender is gone once the encode returns, so the consumer drains
        // its backlog and exits before the terminal update below.
        let _ = consumer.await;

        // Token removal and file cleanup happen before the terminal status
        // update, so observers of a terminal job never see stale state.
        self.inner.cancel_tokens.write().await.remove(id);

        match result {
            Ok(()) => {
                self.update_job(id, |job| job.complete()).await;
                info!(job_id = %id, "job completed");
            }
            Err(e) => {
                best_effort_remove(&job.input_path);
                best_effort_remove(&job.output_path);
                self.finish_failed(id, &e.to_string()).await;
            }
        }

        drop(permit);
    }

    /// Apply a mutation, tolerating a record removed mid-flight by a sweep.
    async fn update_job<F>(&self, id: &str, mutate: F)
    where
        F: FnOnce(&mut Job),
    {
        if self.inner.registry.update(id, mutate).await.is_err() {
            debug!(job_id = %id, "update on missing record skipped");
        }
    }

    async fn finish_failed(&self, id: &str, reason: &str) {
        warn!(job_id = %id, reason = %reason, "job failed");
        self.update_job(id, |job| job.fail(reason)).await;
    }
}

/// Turn encoder progress events into registry updates for one job.
async fn consume_progress(
    registry: Arc<JobRegistry>,
    id: String,
    duration_secs: f64,
    mut rx: mpsc::UnboundedReceiver<ProgressEvent>,
) {
    while let Some(event) = rx.recv().await {
        let result = match event {
            ProgressEvent::Elapsed(elapsed) => {
                let t = elapsed.as_secs_f64();
                registry
                    .update(&id, |job| {
                        job.encoded_secs = Some(t);
                        if let Some(percent) = encode_progress_percent(t, duration_secs) {
                            job.set_progress(percent);
                            job.set_message(format!(
                                "Encoding... {:.1}s / {:.1}s",
                                t, duration_secs
                            ));
                        } else {
                            job.set_message(format!("Encoding... {:.1}s", t));
                        }
                    })
                    .await
            }
            ProgressEvent::Speed(speed) => {
                registry
                    .update(&id, |job| {
                        job.speed = Some(speed);
                        job.touch();
                    })
                    .await
            }
        };
        if result.is_err() {
            // Record evicted mid-encode; nothing left to report against.
            break;
        }
    }
}

/// Reduce an untrusted output filename to a safe basename ending in `.mp4`.
///
/// Path separators and shell-hostile characters collapse to underscores;
/// an empty result falls back to a fixed name.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(name)
        .trim()
        .trim_start_matches('.');

    let mut cleaned: String = base
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '.' | '-' | '_') {
                c
            } else {
                '_'
            }
        })
        .collect();

    if cleaned.is_empty() {
        cleaned = "output".to_string();
    }
    if !cleaned.to_ascii_lowercase().ends_with(".mp4") {
        cleaned.push_str(".mp4");
    }
    cleaned
}

/// Number of encodes allowed to run at once.
///
/// ffmpeg is internally multithreaded, so a per-core permit count would
/// oversubscribe the machine; a quarter of the logical cores keeps encodes
/// parallel on big hosts without starving small ones.
pub fn derive_max_concurrent_jobs(configured: usize) -> usize {
    if configured > 0 {
        return configured;
    }
    (num_cpus::get() / 4).max(1)
}
