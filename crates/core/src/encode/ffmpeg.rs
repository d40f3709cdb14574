//! ffmpeg encoder wrapper.
//!
//! Builds the argument list for one re-encode invocation with the fixed
//! web-playback profile, launches the subprocess, streams its progress
//! channel through the parser, and reports the final exit status.

use crate::progress::{parse_progress_line, ProgressEvent};
use std::path::PathBuf;
use std::process::Stdio;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Encoding speed/compression preset.
const PRESET: &str = "medium";
/// Pixel format compatible with broad playback support.
const PIX_FMT: &str = "yuv420p";
/// Audio codec for the output container.
const AUDIO_CODEC: &str = "aac";
/// Audio bitrate: good quality without bloat.
const AUDIO_BITRATE: &str = "128k";
/// Forced stereo output.
const AUDIO_CHANNELS: &str = "2";
/// Standard audio sample rate.
const AUDIO_SAMPLE_RATE: &str = "44100";
/// Moves container metadata to the front for progressive playback.
const MOVFLAGS: &str = "+faststart";

/// Error type for encoding operations
#[derive(Debug, Error)]
pub enum EncodeError {
    /// The encoder binary could not be found.
    #[error("encoder binary not found: {0}")]
    EncoderNotFound(String),

    /// ffmpeg exited with non-zero status.
    #[error("ffmpeg exited with code {code}: {stderr}")]
    Failed { code: i32, stderr: String },

    /// ffmpeg was terminated by a signal.
    #[error("ffmpeg terminated by signal: {stderr}")]
    Terminated { stderr: String },

    /// The encode was cancelled before completion.
    #[error("encoding cancelled")]
    Cancelled,

    /// The encode exceeded its wall-clock ceiling.
    #[error("encoding exceeded wall-clock limit of {0}s")]
    TimedOut(u64),

    /// IO error during encoding.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Parameters for one ffmpeg encoding invocation.
#[derive(Debug, Clone)]
pub struct EncodeParams {
    /// Path to the ffmpeg binary.
    pub ffmpeg_path: PathBuf,
    /// Path to the input video file.
    pub input_path: PathBuf,
    /// Path for the encoded output file.
    pub output_path: PathBuf,
    /// Target maximum video bitrate in kbps.
    pub bitrate_kbps: u32,
    /// Constant-quality factor.
    pub crf: u8,
}

/// Build the ffmpeg command with the fixed web-playback profile.
///
/// The profile re-encodes video to H.264 capped at the target bitrate
/// (buffer size fixed at 2x the bitrate), transcodes audio to stereo
/// 44.1kHz AAC, and front-loads container metadata so playback can start
/// before the download finishes. Progress is directed to stdout as a
/// machine-readable key=value stream.
pub fn build_ffmpeg_command(params: &EncodeParams) -> std::process::Command {
    let mut cmd = std::process::Command::new(&params.ffmpeg_path);

    cmd.arg("-i").arg(&params.input_path);

    // Video: H.264 at a capped bitrate with constant-quality rate control
    cmd.arg("-c:v").arg("libx264");
    cmd.arg("-preset").arg(PRESET);
    cmd.arg("-crf").arg(params.crf.to_string());
    cmd.arg("-maxrate").arg(format!("{}k", params.bitrate_kbps));
    cmd.arg("-bufsize")
        .arg(format!("{}k", params.bitrate_kbps * 2));
    cmd.arg("-pix_fmt").arg(PIX_FMT);

    // Audio: stereo 44.1kHz AAC
    cmd.arg("-c:a").arg(AUDIO_CODEC);
    cmd.arg("-b:a").arg(AUDIO_BITRATE);
    cmd.arg("-ac").arg(AUDIO_CHANNELS);
    cmd.arg("-ar").arg(AUDIO_SAMPLE_RATE);

    // Container layout for progressive download
    cmd.arg("-movflags").arg(MOVFLAGS);

    // Machine-readable progress on stdout, diagnostics only on stderr
    cmd.arg("-progress").arg("pipe:1");
    cmd.arg("-nostats");
    cmd.arg("-loglevel").arg("error");

    cmd.arg("-y").arg(&params.output_path);

    cmd
}

/// Execute one ffmpeg encoding invocation.
///
/// Streams stdout line-by-line through the progress parser and forwards
/// each recognized event over `events`; unparseable lines are skipped.
/// stderr is captured concurrently for diagnostics. The read loop ends
/// when the pipe closes, after which the child is waited on to reap its
/// exit code. Cancelling `cancel` kills the subprocess.
pub async fn run_ffmpeg(
    params: &EncodeParams,
    cancel: &CancellationToken,
    events: mpsc::UnboundedSender<ProgressEvent>,
) -> Result<(), EncodeError> {
    let mut cmd = tokio::process::Command::from(build_ffmpeg_command(params));
    cmd.stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            EncodeError::EncoderNotFound(params.ffmpeg_path.display().to_string())
        } else {
            EncodeError::Io(e)
        }
    })?;

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| std::io::Error::other("ffmpeg stdout not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| std::io::Error::other("ffmpeg stderr not captured"))?;

    // Drain stderr concurrently so a chatty encoder cannot deadlock on a
    // full pipe while we read progress lines.
    let stderr_task = tokio::spawn(async move {
        let mut buf = String::new();
        let mut reader = BufReader::new(stderr);
        let _ = reader.read_to_string(&mut buf).await;
        buf
    });

    // Read raw bytes rather than UTF-8 lines: a garbled line must be
    // skipped without abandoning the drain, or the child blocks on a full
    // pipe and never exits.
    let mut reader = BufReader::new(stdout);
    let mut buf = Vec::new();
    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = child.start_kill();
                let _ = child.wait().await;
                stderr_task.abort();
                return Err(EncodeError::Cancelled);
            }
            read = reader.read_until(b'\n', &mut buf) => match read {
                Ok(0) => break,
                Ok(_) => {
                    if let Some(event) = parse_progress_line(&String::from_utf8_lossy(&buf)) {
                        // Receiver dropping just means nobody is listening.
                        let _ = events.send(event);
                    }
                    buf.clear();
                }
                Err(_) => break,
            }
        }
    }

    let status = child.wait().await?;
    let captured = stderr_task.await.unwrap_or_default();
    let stderr_text = if captured.trim().is_empty() {
        "ffmpeg produced no diagnostic output".to_string()
    } else {
        captured.trim().to_string()
    };

    if status.success() {
        Ok(())
    } else {
        match status.code() {
            Some(code) => Err(EncodeError::Failed {
                code,
                stderr: stderr_text,
            }),
            None => Err(EncodeError::Terminated {
                stderr: stderr_text,
            }),
        }
    }
}
