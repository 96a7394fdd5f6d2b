//! Configuration management for the recorder

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::capture::{Container, DeviceSelection, FrameRate, Monitor, VideoCodec};
use crate::encoder::StopTimeouts;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Recording defaults
    #[serde(default)]
    pub recording: RecordingConfig,

    /// Encoder process settings
    #[serde(default)]
    pub encoder: EncoderConfig,

    /// Audio device monitoring
    #[serde(default)]
    pub devices: DeviceConfig,

    /// Static monitor geometry; overrides platform enumeration when set
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub displays: Vec<Monitor>,

    /// Path to config file (not serialized)
    #[serde(skip)]
    config_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    /// Directory for segments and merged recordings
    #[serde(default = "default_output_directory_option")]
    pub output_directory: Option<PathBuf>,

    /// Monitor index to capture
    #[serde(default)]
    pub monitor: usize,

    #[serde(default)]
    pub frame_rate: FrameRate,

    /// Target video bitrate, e.g. "1000k"
    #[serde(default = "default_bitrate")]
    pub bitrate: String,

    #[serde(default)]
    pub codec: VideoCodec,

    #[serde(default)]
    pub container: Container,

    /// Remembered audio input selection, in mix order
    #[serde(default)]
    pub audio_devices: Vec<DeviceSelection>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EncoderConfig {
    /// Encoder binary override
    pub path: Option<PathBuf>,

    /// Seconds to wait after asking the encoder to quit
    #[serde(default = "default_quit_grace")]
    pub quit_grace_secs: u64,

    /// Seconds to wait after terminating the encoder before killing it
    #[serde(default = "default_terminate_grace")]
    pub terminate_grace_secs: u64,

    /// Informational encoder lines batched per log entry (5..=10)
    #[serde(default = "default_output_batch_lines")]
    pub output_batch_lines: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Seconds between device enumeration polls
    #[serde(default = "default_device_poll_interval")]
    pub poll_interval_secs: u64,

    /// Gain multiplier for loopback devices; platform default when unset
    pub loopback_boost: Option<f64>,
}

// Default value functions
fn default_output_directory() -> PathBuf {
    directories::UserDirs::new()
        .and_then(|dirs| dirs.video_dir().map(|d| d.join("OpenCap")))
        .unwrap_or_else(|| std::env::temp_dir().join("opencap-recordings"))
}

fn default_output_directory_option() -> Option<PathBuf> {
    Some(default_output_directory())
}

fn default_bitrate() -> String {
    "1000k".to_string()
}

fn default_quit_grace() -> u64 {
    5
}

fn default_terminate_grace() -> u64 {
    2
}

fn default_output_batch_lines() -> usize {
    10
}

fn default_device_poll_interval() -> u64 {
    5
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            output_directory: default_output_directory_option(),
            monitor: 0,
            frame_rate: FrameRate::default(),
            bitrate: default_bitrate(),
            codec: VideoCodec::default(),
            container: Container::default(),
            audio_devices: Vec::new(),
        }
    }
}

impl Default for EncoderConfig {
    fn default() -> Self {
        Self {
            path: None,
            quit_grace_secs: default_quit_grace(),
            terminate_grace_secs: default_terminate_grace(),
            output_batch_lines: default_output_batch_lines(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: default_device_poll_interval(),
            loopback_boost: None,
        }
    }
}

impl Config {
    /// Load configuration from default location or create default
    pub fn load() -> Result<Self> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from(&config_path)
        } else {
            let mut config = Config::default();
            config.config_path = Some(config_path);
            config.save()?;
            Ok(config)
        }
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {:?}", path))?;

        let mut config: Config = toml::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", path))?;

        config.config_path = Some(path.to_path_buf());
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self) -> Result<()> {
        let config_path = self.config_path()?;

        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        Ok(())
    }

    /// Get the config file path
    pub fn config_path(&self) -> Result<PathBuf> {
        match &self.config_path {
            Some(path) => Ok(path.clone()),
            None => Self::default_config_path(),
        }
    }

    /// Get default config path
    fn default_config_path() -> Result<PathBuf> {
        let proj_dirs = directories::ProjectDirs::from("dev", "opencap", "recorder")
            .context("Failed to determine config directory")?;

        Ok(proj_dirs.config_dir().join("config.toml"))
    }

    /// Output directory for recordings
    pub fn output_directory(&self) -> PathBuf {
        self.recording
            .output_directory
            .clone()
            .unwrap_or_else(default_output_directory)
    }

    pub fn stop_timeouts(&self) -> StopTimeouts {
        StopTimeouts {
            quit_grace: Duration::from_secs(self.encoder.quit_grace_secs),
            terminate_grace: Duration::from_secs(self.encoder.terminate_grace_secs),
        }
    }

    /// Device poll interval, never below one second
    pub fn device_poll_interval(&self) -> Duration {
        Duration::from_secs(self.devices.poll_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.recording.monitor, 0);
        assert_eq!(config.recording.frame_rate, FrameRate::Fps60);
        assert_eq!(config.recording.bitrate, "1000k");
        assert_eq!(config.recording.codec, VideoCodec::H264);
        assert_eq!(config.recording.container, Container::Mkv);
        assert_eq!(config.stop_timeouts(), StopTimeouts::default());
        assert_eq!(config.device_poll_interval(), Duration::from_secs(5));
        assert!(config.displays.is_empty());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config: Config = toml::from_str(
            r#"
            [recording]
            frame_rate = 30
            codec = "hevc"
            container = "mp4"
            audio_devices = [
                { id = "alsa_input.usb-mic" },
                { id = "alsa_output.monitor", volume = 40 },
            ]

            [devices]
            poll_interval_secs = 0

            [[displays]]
            x = -1280
            y = 0
            width = 1280
            height = 1024
            "#,
        )
        .unwrap();

        assert_eq!(config.recording.frame_rate, FrameRate::Fps30);
        assert_eq!(config.recording.codec, VideoCodec::H265);
        assert_eq!(config.recording.container, Container::Mp4);
        assert_eq!(config.recording.audio_devices[0].volume, 100);
        assert_eq!(config.recording.audio_devices[1].volume, 40);
        assert_eq!(config.encoder.quit_grace_secs, 5);
        assert_eq!(config.device_poll_interval(), Duration::from_secs(1));
        assert_eq!(config.displays[0].x, -1280);
    }

    #[test]
    fn test_invalid_frame_rate_is_rejected() {
        let parsed: std::result::Result<Config, _> = toml::from_str("[recording]\nframe_rate = 45\n");
        assert!(parsed.is_err());
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = Config::default();
        config.config_path = Some(path.clone());
        config.recording.bitrate = "2500k".to_string();
        config
            .recording
            .audio_devices
            .push(DeviceSelection::new("Microphone (USB)", 80));
        config.save().unwrap();

        let loaded = Config::load_from(&path).unwrap();
        assert_eq!(loaded.recording.bitrate, "2500k");
        assert_eq!(loaded.recording.audio_devices, config.recording.audio_devices);
        assert_eq!(loaded.config_path().unwrap(), path);
    }
}
