//! Job record types for the compression pipeline.
//!
//! A `Job` tracks one submitted compression request from submission through
//! its terminal state. Records are mutated only through the registry, and
//! only by the orchestrator task that owns the job.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

/// Status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Job is waiting for an execution slot.
    Queued,
    /// Job is probing or encoding.
    Processing,
    /// Job finished and the output is ready for retrieval.
    Completed,
    /// Job failed; the message carries the reason.
    Error,
}

impl Default for JobStatus {
    fn default() -> Self {
        Self::Queued
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Queued => write!(f, "queued"),
            JobStatus::Processing => write!(f, "processing"),
            JobStatus::Completed => write!(f, "completed"),
            JobStatus::Error => write!(f, "error"),
        }
    }
}

/// How the job's media duration estimate was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DurationSource {
    /// Duration came from an ffprobe inspection of the source.
    Probed,
    /// Duration was approximated from file size; treat as a rough guess.
    Estimated,
}

impl std::fmt::Display for DurationSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DurationSource::Probed => write!(f, "probed"),
            DurationSource::Estimated => write!(f, "estimated"),
        }
    }
}

/// Represents one compression job with full lifecycle metadata.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Job {
    /// Unique job identifier (UUID).
    pub id: String,
    /// Current status of the job.
    pub status: JobStatus,
    /// Display percentage in [0, 100]; never decreases.
    pub progress: u8,
    /// Human-readable description of the current phase.
    pub message: String,
    /// Path to the uploaded source file.
    pub input_path: PathBuf,
    /// Path for the encoded output file.
    pub output_path: PathBuf,
    /// Original source filename.
    pub input_name: String,
    /// User-facing output filename.
    pub output_name: String,
    /// Source file size in bytes, captured at submission.
    pub source_size_bytes: u64,
    /// Best-effort media duration in seconds (0.0 = unknown).
    pub estimated_duration_secs: f64,
    /// Whether the duration estimate was probed or guessed from size.
    pub duration_source: DurationSource,
    /// Latest encoder-reported output time in seconds.
    pub encoded_secs: Option<f64>,
    /// Latest encoder-reported speed multiplier.
    pub speed: Option<f32>,
    /// Unix timestamp (milliseconds) when the job was submitted.
    pub created_at_ms: i64,
    /// Unix timestamp (milliseconds) when the job was last updated.
    pub updated_at_ms: i64,
}

impl Job {
    /// Create a new queued job record.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: String,
        input_path: PathBuf,
        output_path: PathBuf,
        input_name: String,
        output_name: String,
        source_size_bytes: u64,
        estimated_duration_secs: f64,
    ) -> Self {
        let now = current_timestamp_ms();
        Self {
            id,
            status: JobStatus::Queued,
            progress: 0,
            message: "Queued".to_string(),
            input_path,
            output_path,
            input_name,
            output_name,
            source_size_bytes,
            estimated_duration_secs,
            duration_source: DurationSource::Estimated,
            encoded_secs: None,
            speed: None,
            created_at_ms: now,
            updated_at_ms: now,
        }
    }

    /// Update the job's updated_at timestamp to now.
    pub fn touch(&mut self) {
        self.updated_at_ms = current_timestamp_ms();
    }

    /// Raise the display percentage.
    ///
    /// The value is clamped to [0, 100], never decreases, and is frozen once
    /// the job reaches a terminal state.
    pub fn set_progress(&mut self, percent: u8) {
        if self.is_terminal() {
            return;
        }
        self.progress = self.progress.max(percent.min(100));
        self.touch();
    }

    /// Replace the current-phase message.
    pub fn set_message(&mut self, message: impl Into<String>) {
        self.message = message.into();
        self.touch();
    }

    /// Mark the job as processing.
    pub fn start_processing(&mut self) {
        if self.is_terminal() {
            return;
        }
        self.status = JobStatus::Processing;
        self.touch();
    }

    /// Mark the job as completed; progress jumps to 100.
    pub fn complete(&mut self) {
        if self.is_terminal() {
            return;
        }
        self.status = JobStatus::Completed;
        self.progress = 100;
        self.message = "Compression completed".to_string();
        self.touch();
    }

    /// Mark the job as failed with a reason; progress freezes at its last value.
    pub fn fail(&mut self, reason: &str) {
        if self.is_terminal() {
            return;
        }
        self.status = JobStatus::Error;
        self.message = format!("Error: {}", reason);
        self.touch();
    }

    /// Check if the job is in a terminal state (completed or error).
    pub fn is_terminal(&self) -> bool {
        matches!(self.status, JobStatus::Completed | JobStatus::Error)
    }
}

/// Get current timestamp in milliseconds since Unix epoch.
pub(crate) fn current_timestamp_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}
