//! Core configuration structures and loading logic

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

/// Error type for configuration operations
#[derive(Debug)]
pub enum ConfigError {
    /// IO error reading config file
    Io(std::io::Error),
    /// TOML parsing error
    Parse(toml::de::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Io(e) => write!(f, "Failed to read config file: {}", e),
            ConfigError::Parse(e) => write!(f, "Failed to parse config: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {}

impl From<std::io::Error> for ConfigError {
    fn from(e: std::io::Error) -> Self {
        ConfigError::Io(e)
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(e: toml::de::Error) -> Self {
        ConfigError::Parse(e)
    }
}

/// Storage directory configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StorageConfig {
    /// Directory for uploaded source files
    #[serde(default = "default_upload_dir")]
    pub upload_dir: PathBuf,
    /// Directory for encoded output files
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
}

fn default_upload_dir() -> PathBuf {
    PathBuf::from("uploads")
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("outputs")
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            upload_dir: default_upload_dir(),
            output_dir: default_output_dir(),
        }
    }
}

/// Encoder-related configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncoderConfig {
    /// Path to the ffmpeg binary
    #[serde(default = "default_ffmpeg_path")]
    pub ffmpeg_path: PathBuf,
    /// Path to the ffprobe binary
    #[serde(default = "default_ffprobe_path")]
    pub ffprobe_path: PathBuf,
    /// Default target maximum bitrate in kbps
    #[serde(default = "default_bitrate_kbps")]
    pub default_bitrate_kbps: u32,
    /// Wall-clock ceiling for a single encode in seconds (0 = unlimited)
    #[serde(default)]
    pub max_encode_secs: u64,
}

fn default_ffmpeg_path() -> PathBuf {
    PathBuf::from("ffmpeg")
}

fn default_ffprobe_path() -> PathBuf {
    PathBuf::from("ffprobe")
}

fn default_bitrate_kbps() -> u32 {
    2000
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            ffmpeg_path: default_ffmpeg_path(),
            ffprobe_path: default_ffprobe_path(),
            default_bitrate_kbps: default_bitrate_kbps(),
            max_encode_secs: 0,
        }
    }
}

/// Job scheduling configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobsConfig {
    /// Maximum concurrent encoding jobs (0 = auto-derive from CPU count)
    #[serde(default)]
    pub max_concurrent: u32,
    /// Bytes-per-second constant for the size-based duration heuristic
    #[serde(default = "default_heuristic_bytes_per_second")]
    pub heuristic_bytes_per_second: u64,
}

fn default_heuristic_bytes_per_second() -> u64 {
    250_000
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 0,
            heuristic_bytes_per_second: default_heuristic_bytes_per_second(),
        }
    }
}

/// File retention configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetentionConfig {
    /// Interval between retention sweeps in seconds
    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
    /// Maximum age of upload/output files in seconds before deletion
    #[serde(default = "default_max_age_secs")]
    pub max_age_secs: u64,
}

fn default_sweep_interval_secs() -> u64 {
    3600
}

fn default_max_age_secs() -> u64 {
    3600
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            sweep_interval_secs: default_sweep_interval_secs(),
            max_age_secs: default_max_age_secs(),
        }
    }
}

/// Status server configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Bind address for the status HTTP server
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "127.0.0.1:7878".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub encoder: EncoderConfig,
    #[serde(default)]
    pub jobs: JobsConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub server: ServerConfig,
}

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Parses the config.toml file and handles missing optional fields with defaults.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = fs::read_to_string(path)?;
        Self::parse_toml(&content)
    }

    /// Parse configuration from a TOML string
    pub fn parse_toml(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    /// Apply environment variable overrides to the configuration
    ///
    /// Overrides the following values if environment variables are set:
    /// - VIDSHRINK_UPLOAD_DIR -> storage.upload_dir
    /// - VIDSHRINK_OUTPUT_DIR -> storage.output_dir
    /// - VIDSHRINK_FFMPEG_PATH -> encoder.ffmpeg_path
    /// - VIDSHRINK_FFPROBE_PATH -> encoder.ffprobe_path
    /// - VIDSHRINK_DEFAULT_BITRATE_KBPS -> encoder.default_bitrate_kbps
    /// - VIDSHRINK_MAX_ENCODE_SECS -> encoder.max_encode_secs
    /// - VIDSHRINK_MAX_CONCURRENT_JOBS -> jobs.max_concurrent
    /// - VIDSHRINK_SWEEP_INTERVAL_SECS -> retention.sweep_interval_secs
    /// - VIDSHRINK_MAX_AGE_SECS -> retention.max_age_secs
    /// - VIDSHRINK_BIND_ADDR -> server.bind_addr
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("VIDSHRINK_UPLOAD_DIR") {
            if !val.is_empty() {
                self.storage.upload_dir = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("VIDSHRINK_OUTPUT_DIR") {
            if !val.is_empty() {
                self.storage.output_dir = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("VIDSHRINK_FFMPEG_PATH") {
            if !val.is_empty() {
                self.encoder.ffmpeg_path = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("VIDSHRINK_FFPROBE_PATH") {
            if !val.is_empty() {
                self.encoder.ffprobe_path = PathBuf::from(val);
            }
        }

        if let Ok(val) = env::var("VIDSHRINK_DEFAULT_BITRATE_KBPS") {
            if let Ok(kbps) = val.parse::<u32>() {
                self.encoder.default_bitrate_kbps = kbps;
            }
        }

        if let Ok(val) = env::var("VIDSHRINK_MAX_ENCODE_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.encoder.max_encode_secs = secs;
            }
        }

        if let Ok(val) = env::var("VIDSHRINK_MAX_CONCURRENT_JOBS") {
            if let Ok(jobs) = val.parse::<u32>() {
                self.jobs.max_concurrent = jobs;
            }
        }

        if let Ok(val) = env::var("VIDSHRINK_SWEEP_INTERVAL_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.retention.sweep_interval_secs = secs;
            }
        }

        if let Ok(val) = env::var("VIDSHRINK_MAX_AGE_SECS") {
            if let Ok(secs) = val.parse::<u64>() {
                self.retention.max_age_secs = secs;
            }
        }

        if let Ok(val) = env::var("VIDSHRINK_BIND_ADDR") {
            if !val.is_empty() {
                self.server.bind_addr = val;
            }
        }
    }

    /// Load configuration from file and apply environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let mut config = Self::load_from_file(path)?;
        config.apply_env_overrides();
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::Mutex;

    // Mutex to ensure env var tests don't interfere with each other
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Helper to clear all config-related env vars
    fn clear_env_vars() {
        env::remove_var("VIDSHRINK_UPLOAD_DIR");
        env::remove_var("VIDSHRINK_OUTPUT_DIR");
        env::remove_var("VIDSHRINK_FFMPEG_PATH");
        env::remove_var("VIDSHRINK_FFPROBE_PATH");
        env::remove_var("VIDSHRINK_DEFAULT_BITRATE_KBPS");
        env::remove_var("VIDSHRINK_MAX_ENCODE_SECS");
        env::remove_var("VIDSHRINK_MAX_CONCURRENT_JOBS");
        env::remove_var("VIDSHRINK_SWEEP_INTERVAL_SECS");
        env::remove_var("VIDSHRINK_MAX_AGE_SECS");
        env::remove_var("VIDSHRINK_BIND_ADDR");
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(100))]

        // For any valid TOML configuration string, all sections parse with
        // their values preserved.
        #[test]
        fn prop_config_parses_all_sections(
            bitrate in 100u32..50_000,
            max_encode in 0u64..86_400,
            max_jobs in 0u32..16,
            bytes_per_sec in 1u64..10_000_000,
            sweep_interval in 1u64..86_400,
            max_age in 1u64..86_400,
        ) {
            let toml_str = format!(
                r#"
[storage]
upload_dir = "in"
output_dir = "out"

[encoder]
default_bitrate_kbps = {}
max_encode_secs = {}

[jobs]
max_concurrent = {}
heuristic_bytes_per_second = {}

[retention]
sweep_interval_secs = {}
max_age_secs = {}
"#,
                bitrate, max_encode, max_jobs, bytes_per_sec, sweep_interval, max_age
            );

            let config = Config::parse_toml(&toml_str).expect("Valid TOML should parse");

            prop_assert_eq!(config.storage.upload_dir, PathBuf::from("in"));
            prop_assert_eq!(config.storage.output_dir, PathBuf::from("out"));
            prop_assert_eq!(config.encoder.default_bitrate_kbps, bitrate);
            prop_assert_eq!(config.encoder.max_encode_secs, max_encode);
            prop_assert_eq!(config.jobs.max_concurrent, max_jobs);
            prop_assert_eq!(config.jobs.heuristic_bytes_per_second, bytes_per_sec);
            prop_assert_eq!(config.retention.sweep_interval_secs, sweep_interval);
            prop_assert_eq!(config.retention.max_age_secs, max_age);
        }

        #[test]
        fn prop_env_overrides_max_concurrent_jobs(
            initial_jobs in 0u32..8,
            override_jobs in 0u32..16,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let toml_str = format!(
                r#"
[jobs]
max_concurrent = {}
"#,
                initial_jobs
            );

            let mut config = Config::parse_toml(&toml_str).expect("Valid TOML");

            env::set_var("VIDSHRINK_MAX_CONCURRENT_JOBS", override_jobs.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.jobs.max_concurrent, override_jobs);
        }

        #[test]
        fn prop_env_overrides_retention(
            override_interval in 1u64..86_400,
            override_age in 1u64..86_400,
        ) {
            let _guard = ENV_MUTEX.lock().unwrap();
            clear_env_vars();

            let mut config = Config::parse_toml("").expect("Empty TOML");

            env::set_var("VIDSHRINK_SWEEP_INTERVAL_SECS", override_interval.to_string());
            env::set_var("VIDSHRINK_MAX_AGE_SECS", override_age.to_string());
            config.apply_env_overrides();
            clear_env_vars();

            prop_assert_eq!(config.retention.sweep_interval_secs, override_interval);
            prop_assert_eq!(config.retention.max_age_secs, override_age);
        }
    }

    // Test that missing sections use defaults
    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse_toml("").expect("Empty TOML should parse");

        assert_eq!(config.storage.upload_dir, PathBuf::from("uploads"));
        assert_eq!(config.storage.output_dir, PathBuf::from("outputs"));
        assert_eq!(config.encoder.ffmpeg_path, PathBuf::from("ffmpeg"));
        assert_eq!(config.encoder.ffprobe_path, PathBuf::from("ffprobe"));
        assert_eq!(config.encoder.default_bitrate_kbps, 2000);
        assert_eq!(config.encoder.max_encode_secs, 0);
        assert_eq!(config.jobs.max_concurrent, 0);
        assert_eq!(config.jobs.heuristic_bytes_per_second, 250_000);
        assert_eq!(config.retention.sweep_interval_secs, 3600);
        assert_eq!(config.retention.max_age_secs, 3600);
        assert_eq!(config.server.bind_addr, "127.0.0.1:7878");
    }

    // Test partial config with some sections missing
    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let toml_str = r#"
[encoder]
default_bitrate_kbps = 4000
"#;
        let config = Config::parse_toml(toml_str).expect("Partial TOML should parse");

        assert_eq!(config.encoder.default_bitrate_kbps, 4000);
        assert_eq!(config.encoder.max_encode_secs, 0); // default
        assert_eq!(config.storage.upload_dir, PathBuf::from("uploads")); // default
        assert_eq!(config.jobs.max_concurrent, 0); // default
        assert_eq!(config.retention.max_age_secs, 3600); // default
    }

    #[test]
    fn test_env_override_paths() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::default();
        env::set_var("VIDSHRINK_UPLOAD_DIR", "/srv/in");
        env::set_var("VIDSHRINK_OUTPUT_DIR", "/srv/out");
        env::set_var("VIDSHRINK_FFMPEG_PATH", "/usr/local/bin/ffmpeg");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config.storage.upload_dir, PathBuf::from("/srv/in"));
        assert_eq!(config.storage.output_dir, PathBuf::from("/srv/out"));
        assert_eq!(
            config.encoder.ffmpeg_path,
            PathBuf::from("/usr/local/bin/ffmpeg")
        );
    }

    #[test]
    fn test_env_override_invalid_number_keeps_existing() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env_vars();

        let mut config = Config::default();
        env::set_var("VIDSHRINK_DEFAULT_BITRATE_KBPS", "not-a-number");
        config.apply_env_overrides();
        clear_env_vars();

        assert_eq!(config.encoder.default_bitrate_kbps, 2000);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(
            &path,
            r#"
[retention]
max_age_secs = 7200
"#,
        )
        .unwrap();

        let config = Config::load_from_file(&path).expect("Should load config file");
        assert_eq!(config.retention.max_age_secs, 7200);
    }
}
