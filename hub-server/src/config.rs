//! Server configuration.
//!
//! Supports loading from YAML files with environment variable overrides,
//! mirrored from the teacher's `apps/server/src/config.rs`.

use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Server configuration loaded from YAML with environment overrides.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Override: `HUB_BIND_HOST`
    pub bind_host: String,
    /// Override: `HUB_CONTROL_PORT`
    pub control_port: u16,
    /// Override: `HUB_VIDEO_PORT`
    pub video_port: u16,
    /// Override: `HUB_AUDIO_PORT`
    pub audio_port: u16,
    /// Override: `HUB_SCREEN_CONTROL_PORT`
    pub screen_control_port: u16,
    /// Override: `HUB_SCREEN_DATA_PORT`
    pub screen_data_port: u16,
    /// Override: `HUB_FILE_PORT`
    pub file_port: u16,
    /// Override: `HUB_MAX_USERS`
    pub max_users: usize,
    /// Override: `HUB_MAX_FILE_SIZE_BYTES`
    pub max_file_size_bytes: u64,
    pub sample_rate: u32,
    pub chunk_samples: u32,
    pub audio_stale_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        let core = hub_core::Config::default();
        Self {
            bind_host: core.bind_host,
            control_port: core.control_port,
            video_port: core.video_port,
            audio_port: core.audio_port,
            screen_control_port: core.screen_control_port,
            screen_data_port: core.screen_data_port,
            file_port: core.file_port,
            max_users: core.max_users,
            max_file_size_bytes: core.max_file_size_bytes,
            sample_rate: core.sample_rate,
            chunk_samples: core.chunk_samples,
            audio_stale_ms: core.audio_stale_ms,
        }
    }
}

impl ServerConfig {
    /// Loads configuration from a YAML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(val) = std::env::var("HUB_BIND_HOST") {
            self.bind_host = val;
        }
        macro_rules! override_parsed {
            ($env:literal, $field:ident) => {
                if let Ok(val) = std::env::var($env) {
                    if let Ok(parsed) = val.parse() {
                        self.$field = parsed;
                    }
                }
            };
        }
        override_parsed!("HUB_CONTROL_PORT", control_port);
        override_parsed!("HUB_VIDEO_PORT", video_port);
        override_parsed!("HUB_AUDIO_PORT", audio_port);
        override_parsed!("HUB_SCREEN_CONTROL_PORT", screen_control_port);
        override_parsed!("HUB_SCREEN_DATA_PORT", screen_data_port);
        override_parsed!("HUB_FILE_PORT", file_port);
        override_parsed!("HUB_MAX_USERS", max_users);
        override_parsed!("HUB_MAX_FILE_SIZE_BYTES", max_file_size_bytes);
    }

    /// Converts to `hub-core`'s `Config` type.
    #[must_use]
    pub fn to_core_config(&self) -> hub_core::Config {
        hub_core::Config {
            bind_host: self.bind_host.clone(),
            control_port: self.control_port,
            video_port: self.video_port,
            audio_port: self.audio_port,
            screen_control_port: self.screen_control_port,
            screen_data_port: self.screen_data_port,
            file_port: self.file_port,
            max_users: self.max_users,
            max_file_size_bytes: self.max_file_size_bytes,
            sample_rate: self.sample_rate,
            chunk_samples: self.chunk_samples,
            audio_stale_ms: self.audio_stale_ms,
        }
    }
}
