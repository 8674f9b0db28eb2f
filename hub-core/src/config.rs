//! Core hub configuration.
//!
//! Mirrors the shape of the teacher's `thaumic_core::Config`: a single
//! `Serialize`/`Deserialize` struct with a sensible [`Default`], constructed
//! by the binary crate from CLI flags and a YAML file and then handed to
//! [`crate::Hub::bootstrap`].

use serde::{Deserialize, Serialize};

/// Runtime configuration for every hub endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Address to bind all listening/receiving sockets to.
    pub bind_host: String,

    /// Control session port (stream).
    pub control_port: u16,
    /// Video frame port (datagram).
    pub video_port: u16,
    /// Audio PCM port (datagram).
    pub audio_port: u16,
    /// Presenter lease handshake port (stream).
    pub screen_control_port: u16,
    /// Screen frame port (datagram).
    pub screen_data_port: u16,
    /// File upload/download/delete port (stream).
    pub file_port: u16,

    /// Maximum simultaneous live participants.
    pub max_users: usize,
    /// Maximum bytes accepted for a single file upload.
    pub max_file_size_bytes: u64,

    /// Audio sample rate, in Hz.
    pub sample_rate: u32,
    /// Samples per mixed audio chunk.
    pub chunk_samples: u32,
    /// Age, in milliseconds, past which a buffered audio chunk is excluded
    /// from mixing.
    pub audio_stale_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            control_port: 5000,
            video_port: 5001,
            audio_port: 5002,
            screen_control_port: 5003,
            screen_data_port: 5004,
            file_port: 5005,
            max_users: 10,
            max_file_size_bytes: 100 * 1024 * 1024,
            sample_rate: 44_100,
            chunk_samples: 1024,
            audio_stale_ms: 500,
        }
    }
}

impl Config {
    /// Validates the configuration.
    ///
    /// # Errors
    /// Returns a human-readable message describing the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_users == 0 {
            return Err("max_users must be >= 1".to_string());
        }
        if self.max_file_size_bytes == 0 {
            return Err("max_file_size_bytes must be >= 1".to_string());
        }
        if self.sample_rate == 0 {
            return Err("sample_rate must be >= 1".to_string());
        }
        if self.chunk_samples == 0 {
            return Err("chunk_samples must be >= 1".to_string());
        }
        let ports = [
            self.control_port,
            self.video_port,
            self.audio_port,
            self.screen_control_port,
            self.screen_data_port,
            self.file_port,
        ];
        for (i, a) in ports.iter().enumerate() {
            for b in &ports[i + 1..] {
                // 0 means "let the OS pick an ephemeral port"; multiple
                // endpoints requesting that are not a conflict.
                if *a != 0 && a == b {
                    return Err(format!("duplicate port {a} across endpoints"));
                }
            }
        }
        Ok(())
    }

    /// Mix tick cadence, derived from `chunk_samples / sample_rate`.
    #[must_use]
    pub fn mix_tick(&self) -> std::time::Duration {
        std::time::Duration::from_secs_f64(f64::from(self.chunk_samples) / f64::from(self.sample_rate))
    }
}
