//! vidshrink — asynchronous video compression job orchestration.
//!
//! The library tracks compression jobs from submission through retrieval:
//! sources are re-encoded by an external ffmpeg binary toward a web-friendly
//! bitrate profile, progress is streamed from the encoder's machine-readable
//! output, and stale artifacts are reclaimed by a periodic retention sweep.
//!
//! Entry points:
//! - [`orchestrator::JobOrchestrator`] — submit, poll, cancel, retrieve.
//! - [`sweeper::RetentionSweeper`] — background storage reclamation.
//! - [`server::run_status_server`] — read-only HTTP status endpoint.

pub mod encode;
pub mod job;
pub mod orchestrator;
pub mod probe;
pub mod progress;
pub mod registry;
pub mod server;
pub mod sweeper;

pub use vidshrink_config as config;

pub use encode::{EncodeError, EncodeParams};
pub use job::{DurationSource, Job, JobStatus};
pub use orchestrator::{
    JobOrchestrator, OrchestratorSettings, RetrieveError, RetrievedOutput, StatusReport,
    SubmitError,
};
pub use probe::{BytesPerSecondEstimator, DurationEstimator, MediaInfo, ProbeError, QualityProfile};
pub use progress::{encode_progress_percent, parse_progress_line, ProgressEvent};
pub use registry::{JobRegistry, RegistryError};
pub use server::{run_status_server, status_router, ServerError};
pub use sweeper::{RetentionPolicy, RetentionSweeper, SweepStats};
