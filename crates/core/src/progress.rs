//! Progress stream parsing for the encoder subprocess.
//!
//! ffmpeg's `-progress pipe:1` option emits a machine-readable stream of
//! `key=value` lines while encoding. This module extracts the two signals
//! the orchestrator cares about (output time and speed multiplier) and maps
//! elapsed time onto a banded display percentage.

use std::time::Duration;

/// A structured progress signal extracted from one encoder output line.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProgressEvent {
    /// Encoder output time so far (how much of the media has been written).
    Elapsed(Duration),
    /// Encoder speed relative to real time (e.g. 1.8 means 1.8x).
    Speed(f32),
}

/// Parses a single `key=value` progress line into at most one event.
///
/// Recognized keys:
/// - `out_time_us` / `out_time_ms` - output time counter in microseconds
///   (ffmpeg's `out_time_ms` is microseconds despite the name)
/// - `speed` - real-time multiplier suffixed with `x`, e.g. `1.8x`
///
/// The `N/A` sentinel (emitted during encoder startup), unknown keys, and
/// garbled values all yield `None`; malformed progress lines are never an
/// error.
pub fn parse_progress_line(line: &str) -> Option<ProgressEvent> {
    let (key, value) = line.trim().split_once('=')?;
    let value = value.trim();

    match key.trim() {
        "out_time_us" | "out_time_ms" => {
            if value == "N/A" {
                return None;
            }
            let micros: i64 = value.parse().ok()?;
            if micros < 0 {
                return None;
            }
            Some(ProgressEvent::Elapsed(Duration::from_micros(micros as u64)))
        }
        "speed" => {
            if value == "N/A" {
                return None;
            }
            let factor: f32 = value.strip_suffix('x')?.trim().parse().ok()?;
            if !factor.is_finite() {
                return None;
            }
            Some(ProgressEvent::Speed(factor))
        }
        _ => None,
    }
}

/// Maps encoder elapsed time onto a display percentage.
///
/// The percentage scale is split into reserved bands: 0-10 for setup,
/// 10-95 proportional to `elapsed / duration`, and 95-100 for container
/// finalization and completion. Encoders report wall-clock encode progress
/// against a best-effort total, so the bands keep the bar moving during
/// phases where no ratio is known and cap it below 100 until the process
/// actually exits.
///
/// Returns `None` when the total duration is unknown or zero; the caller
/// keeps the last percentage in that case.
pub fn encode_progress_percent(elapsed_secs: f64, duration_secs: f64) -> Option<u8> {
    if duration_secs <= 0.0 || !duration_secs.is_finite() || !elapsed_secs.is_finite() {
        return None;
    }

    let banded = ((elapsed_secs / duration_secs) * 80.0).floor() as i64 + 10;
    Some(banded.clamp(10, 95) as u8)
}
