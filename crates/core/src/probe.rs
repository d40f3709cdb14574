//! Source media inspection before encoding.
//!
//! Probes a video file with ffprobe to obtain its duration and dimensions,
//! selects a resolution-tiered quality profile, and provides the size-based
//! duration fallback used when probing fails.

use std::path::Path;
use thiserror::Error;
use tokio::process::Command;

/// Error type for probe operations.
#[derive(Debug, Error)]
pub enum ProbeError {
    /// ffprobe command failed to execute or exited non-zero.
    #[error("ffprobe failed: {0}")]
    FfprobeFailed(String),

    /// Failed to parse ffprobe JSON output.
    #[error("Failed to parse ffprobe output: {0}")]
    ParseError(String),

    /// The container holds no video stream.
    #[error("no video stream in source")]
    NoVideoStream,

    /// IO error during probe.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Duration and dimensions of a probed source.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MediaInfo {
    /// Media duration in seconds (0.0 if the container did not report one).
    pub duration_secs: f64,
    /// Width of the first video stream in pixels.
    pub width: u32,
    /// Height of the first video stream in pixels.
    pub height: u32,
}

/// Encoding quality settings chosen for a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QualityProfile {
    /// Target maximum bitrate in kbps.
    pub bitrate_kbps: u32,
    /// Constant-quality factor for the video encoder.
    pub crf: u8,
}

/// Raw ffprobe JSON structures for parsing.
mod ffprobe_json {
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    pub struct FfprobeOutput {
        pub streams: Option<Vec<Stream>>,
        pub format: Option<Format>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Stream {
        pub codec_type: Option<String>,
        pub width: Option<u32>,
        pub height: Option<u32>,
    }

    #[derive(Debug, Deserialize)]
    pub struct Format {
        pub duration: Option<String>,
    }
}

/// Probes a video file using ffprobe to collect duration and dimensions.
///
/// Runs `ffprobe -v quiet -print_format json -show_streams -show_format <path>`
/// and parses the JSON output.
pub async fn probe_media(ffprobe_path: &Path, path: &Path) -> Result<MediaInfo, ProbeError> {
    let output = Command::new(ffprobe_path)
        .args([
            "-v",
            "quiet",
            "-print_format",
            "json",
            "-show_streams",
            "-show_format",
        ])
        .arg(path)
        .output()
        .await?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(ProbeError::FfprobeFailed(format!(
            "ffprobe exited with status {}: {}",
            output.status,
            stderr.trim()
        )));
    }

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_ffprobe_output(&stdout)
}

/// Parses ffprobe JSON output into a MediaInfo.
pub fn parse_ffprobe_output(json_str: &str) -> Result<MediaInfo, ProbeError> {
    let ffprobe: ffprobe_json::FfprobeOutput =
        serde_json::from_str(json_str).map_err(|e| ProbeError::ParseError(e.to_string()))?;

    let streams = ffprobe.streams.unwrap_or_default();
    let video = streams
        .iter()
        .find(|s| s.codec_type.as_deref() == Some("video"))
        .ok_or(ProbeError::NoVideoStream)?;

    let duration_secs = ffprobe
        .format
        .as_ref()
        .and_then(|f| f.duration.as_ref())
        .and_then(|d| d.parse::<f64>().ok())
        .unwrap_or(0.0);

    Ok(MediaInfo {
        duration_secs,
        width: video.width.unwrap_or(0),
        height: video.height.unwrap_or(0),
    })
}

/// Selects bitrate and constant-quality factor from source resolution.
///
/// 1080p sources use the caller's target bitrate; smaller sources step the
/// bitrate down and the CRF up since they compress further at equal quality.
pub fn select_quality(height: u32, target_bitrate_kbps: u32) -> QualityProfile {
    if height >= 1080 {
        QualityProfile {
            bitrate_kbps: target_bitrate_kbps,
            crf: 23,
        }
    } else if height >= 720 {
        QualityProfile {
            bitrate_kbps: 1500,
            crf: 24,
        }
    } else {
        QualityProfile {
            bitrate_kbps: 1000,
            crf: 25,
        }
    }
}

/// Fallback estimator used when probing fails or reports no duration.
pub trait DurationEstimator: Send + Sync {
    /// Approximate media duration in seconds from file size alone.
    fn estimate_secs(&self, size_bytes: u64) -> f64;
}

/// Size-based duration heuristic: assumes a flat byte rate for the source.
///
/// The constant is a placeholder with no basis in the actual codec or
/// bitrate; it only has to keep the progress bar moving in the right order
/// of magnitude when ffprobe is unavailable.
#[derive(Debug, Clone, Copy)]
pub struct BytesPerSecondEstimator {
    /// Assumed source byte rate.
    pub bytes_per_second: u64,
}

impl Default for BytesPerSecondEstimator {
    fn default() -> Self {
        Self {
            bytes_per_second: 250_000,
        }
    }
}

impl DurationEstimator for BytesPerSecondEstimator {
    fn estimate_secs(&self, size_bytes: u64) -> f64 {
        if self.bytes_per_second == 0 {
            return 0.0;
        }
        size_bytes as f64 / self.bytes_per_second as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    const SAMPLE_FFPROBE_JSON: &str = r#"{
        "streams": [
            {
                "codec_type": "video",
                "codec_name": "h264",
                "width": 1920,
                "height": 1080
            },
            {
                "codec_type": "audio",
                "codec_name": "aac",
                "channels": 2
            }
        ],
        "format": {
            "duration": "30.500000",
            "size": "7500000"
        }
    }"#;

    #[test]
    fn test_parse_valid_output() {
        let info = parse_ffprobe_output(SAMPLE_FFPROBE_JSON).unwrap();
        assert_eq!(info.width, 1920);
        assert_eq!(info.height, 1080);
        assert!((info.duration_secs - 30.5).abs() < 1e-9);
    }

    #[test]
    fn test_parse_audio_only_is_no_video_stream() {
        let json = r#"{
            "streams": [{"codec_type": "audio", "channels": 2}],
            "format": {"duration": "12.0"}
        }"#;
        let err = parse_ffprobe_output(json).unwrap_err();
        assert!(matches!(err, ProbeError::NoVideoStream));
    }

    #[test]
    fn test_parse_missing_streams_is_no_video_stream() {
        let err = parse_ffprobe_output(r#"{"format": {"duration": "1.0"}}"#).unwrap_err();
        assert!(matches!(err, ProbeError::NoVideoStream));
    }

    #[test]
    fn test_parse_missing_duration_is_zero() {
        let json = r#"{
            "streams": [{"codec_type": "video", "width": 640, "height": 480}]
        }"#;
        let info = parse_ffprobe_output(json).unwrap();
        assert_eq!(info.duration_secs, 0.0);
        assert_eq!(info.height, 480);
    }

    #[test]
    fn test_parse_invalid_json_is_parse_error() {
        let err = parse_ffprobe_output("not json at all").unwrap_err();
        assert!(matches!(err, ProbeError::ParseError(_)));
    }

    #[test]
    fn test_select_quality_tiers() {
        assert_eq!(
            select_quality(2160, 2000),
            QualityProfile {
                bitrate_kbps: 2000,
                crf: 23
            }
        );
        assert_eq!(
            select_quality(1080, 2500),
            QualityProfile {
                bitrate_kbps: 2500,
                crf: 23
            }
        );
        assert_eq!(
            select_quality(720, 2000),
            QualityProfile {
                bitrate_kbps: 1500,
                crf: 24
            }
        );
        assert_eq!(
            select_quality(480, 2000),
            QualityProfile {
                bitrate_kbps: 1000,
                crf: 25
            }
        );
        assert_eq!(
            select_quality(0, 2000),
            QualityProfile {
                bitrate_kbps: 1000,
                crf: 25
            }
        );
    }

    #[test]
    fn test_bytes_per_second_estimator() {
        let estimator = BytesPerSecondEstimator {
            bytes_per_second: 250_000,
        };
        assert!((estimator.estimate_secs(7_500_000) - 30.0).abs() < 1e-9);
        assert_eq!(estimator.estimate_secs(0), 0.0);
    }

    #[test]
    fn test_zero_rate_estimator_reports_unknown() {
        let estimator = BytesPerSecondEstimator {
            bytes_per_second: 0,
        };
        assert_eq!(estimator.estimate_secs(1_000_000), 0.0);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        // The selected profile always lands on one of the three tiers, and
        // the 1080p tier preserves the caller's target bitrate.
        #[test]
        fn prop_quality_tier_boundaries(height in 0u32..5000, target in 100u32..50_000) {
            let profile = select_quality(height, target);
            if height >= 1080 {
                prop_assert_eq!(profile.bitrate_kbps, target);
                prop_assert_eq!(profile.crf, 23);
            } else if height >= 720 {
                prop_assert_eq!(profile.bitrate_kbps, 1500);
                prop_assert_eq!(profile.crf, 24);
            } else {
                prop_assert_eq!(profile.bitrate_kbps, 1000);
                prop_assert_eq!(profile.crf, 25);
            }
        }

        // The heuristic is linear in size and never negative.
        #[test]
        fn prop_estimator_linear(size in 0u64..1u64 << 40, rate in 1u64..10_000_000) {
            let estimator = BytesPerSecondEstimator { bytes_per_second: rate };
            let secs = estimator.estimate_secs(size);
            prop_assert!(secs >= 0.0);
            prop_assert!((secs - size as f64 / rate as f64).abs() < 1e-6);
        }
    }
}
