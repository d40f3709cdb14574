//! Encoding module: drives a single ffmpeg invocation per job.

mod ffmpeg;

pub use ffmpeg::{build_ffmpeg_command, run_ffmpeg, EncodeError, EncodeParams};
