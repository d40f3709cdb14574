//! Configuration library for vidshrink

mod config;

pub use config::{
    Config, ConfigError, EncoderConfig, JobsConfig, RetentionConfig, ServerConfig, StorageConfig,
};
