//! Application configuration
//!
//! Loaded from a TOML file in the platform config directory. Every field has a
//! default, so a missing or partial file still yields a usable config.

use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants::*;
use crate::error::{Error, Result};
use crate::frame::Rotation;

const CONFIG_FILE: &str = "airlens.toml";

/// Top-level configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub network: NetworkConfig,
    pub storage: StorageConfig,
    pub recording: RecordingConfig,
    pub view: ViewConfig,
}

/// Ports and socket settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    pub video_port: u16,
    pub audio_port: u16,
    pub talk_port: u16,
    pub connect_timeout_ms: u64,
    pub max_frame_bytes: u32,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            video_port: VIDEO_PORT,
            audio_port: AUDIO_PORT,
            talk_port: TALK_PORT,
            connect_timeout_ms: CONNECT_TIMEOUT.as_millis() as u64,
            max_frame_bytes: MAX_FRAME_BYTES,
        }
    }
}

impl NetworkConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Where photos, finished videos and recording temporaries go
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub base_dir: PathBuf,
    pub photo_dir: String,
    pub video_dir: String,
    pub temp_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let base_dir = ProjectDirs::from("", "", "airlens")
            .map(|dirs| dirs.data_dir().to_path_buf())
            .unwrap_or_else(|| PathBuf::from("."));
        Self::with_base(base_dir)
    }
}

impl StorageConfig {
    /// Standard layout below `base_dir`
    pub fn with_base(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
            photo_dir: "photo_save".to_string(),
            video_dir: "video_save".to_string(),
            temp_dir: "temp".to_string(),
        }
    }

    pub fn photo_path(&self) -> PathBuf {
        self.base_dir.join(&self.photo_dir)
    }

    pub fn video_path(&self) -> PathBuf {
        self.base_dir.join(&self.video_dir)
    }

    pub fn temp_path(&self) -> PathBuf {
        self.base_dir.join(&self.temp_dir)
    }

    /// Create all storage directories.
    pub fn ensure_dirs(&self) -> Result<()> {
        for dir in [self.photo_path(), self.video_path(), self.temp_path()] {
            std::fs::create_dir_all(&dir).map_err(|e| {
                Error::Config(format!("cannot create {}: {}", dir.display(), e))
            })?;
        }
        Ok(())
    }
}

/// Recording and mux settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RecordingConfig {
    pub fps: u32,
    pub ffmpeg_path: String,
    pub video_codec: String,
    pub audio_codec: String,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            fps: RECORDING_FPS,
            ffmpeg_path: "ffmpeg".to_string(),
            video_codec: "mpeg4".to_string(),
            audio_codec: "aac".to_string(),
        }
    }
}

/// Presentation defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ViewConfig {
    pub poll_interval_ms: u64,
    pub zoom_step: f32,
    pub rotation: Rotation,
}

impl Default for ViewConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: POLL_INTERVAL.as_millis() as u64,
            zoom_step: 0.05,
            rotation: Rotation::Cw90,
        }
    }
}

impl ViewConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl AppConfig {
    /// Default config file location
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("", "", "airlens").map(|dirs| dirs.config_dir().join(CONFIG_FILE))
    }

    /// Load from `path`; a missing file yields defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            tracing::debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))
    }

    /// Load from the default location, or defaults if there is none.
    pub fn load_default() -> Result<Self> {
        match Self::default_path() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let text = toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))?;
        std::fs::write(path, text)?;
        Ok(())
    }
}
