// SPDX-License-Identifier: GPL-3.0-only

use crate::backends::camera::CameraPosition;
use crate::constants::{BitratePreset, pool, recording};
use crate::display::{DisplayColorFormat, DisplayConfig};
use crate::errors::AppError;
use crate::filters::{ComputeBackendKind, FilterKind};
use crate::pipelines::video::RecorderSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Name of the configuration file inside the config directory
pub const CONFIG_FILE_NAME: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Camera selected at startup
    pub camera: CameraPosition,
    /// Filter selected at startup
    pub filter: FilterKind,
    /// Where filters run (Auto, Gpu, Cpu)
    pub compute_backend: ComputeBackendKind,
    /// App-private directory for in-progress recordings
    pub recordings_dir: Option<PathBuf>,
    /// Media library directory (defaults to the videos folder)
    pub library_dir: Option<PathBuf>,
    /// Video encoder bitrate preset (Low, Medium, High)
    pub bitrate_preset: BitratePreset,
    /// Rotation tag written into recordings
    pub recording_orientation: u32,
    /// Rotation applied by the display
    pub display_orientation: u32,
    pub pool_min_buffers: usize,
    pub pool_max_buffers: usize,
    /// Captured frames buffered ahead of the frame thread
    pub frame_queue_depth: usize,
    /// RGBA clear colour of the display target
    pub clear_color: [f64; 4],
    pub color_format: DisplayColorFormat,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            camera: CameraPosition::default(),
            filter: FilterKind::default(),
            compute_backend: ComputeBackendKind::default(),
            recordings_dir: None,
            library_dir: None,
            bitrate_preset: BitratePreset::default(), // Default to Medium
            recording_orientation: recording::DEFAULT_ORIENTATION_DEGREES,
            display_orientation: 0,
            pool_min_buffers: pool::MIN_BUFFER_COUNT,
            pool_max_buffers: pool::MAX_BUFFER_COUNT,
            frame_queue_depth: 2,
            clear_color: [0.0, 0.0, 0.0, 0.0],
            color_format: DisplayColorFormat::default(),
        }
    }
}

impl Config {
    /// `$XDG_CONFIG_HOME/filter-camera/config.json`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(recording::DIRECTORY_NAME).join(CONFIG_FILE_NAME))
    }

    /// Parse a configuration file
    pub fn from_file(path: &Path) -> Result<Self, AppError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| AppError::Config(format!("{}: {}", path.display(), e)))?;
        let config: Config = serde_json::from_str(&text)
            .map_err(|e| AppError::Config(format!("{}: {}", path.display(), e)))?;
        Ok(config.sanitized())
    }

    /// Load `path`, or the default location when `None`
    ///
    /// A missing file yields the defaults quietly; an unreadable or corrupt
    /// one yields the defaults with a warning.
    pub fn load(path: Option<&Path>) -> Self {
        let Some(path) = path.map(Path::to_path_buf).or_else(Self::default_path) else {
            debug!("No configuration directory, using defaults");
            return Self::default();
        };

        if !path.exists() {
            debug!(path = %path.display(), "No configuration file, using defaults");
            return Self::default();
        }

        match Self::from_file(&path) {
            Ok(config) => {
                info!(path = %path.display(), "Configuration loaded");
                config
            }
            Err(e) => {
                warn!(error = %e, "Invalid configuration, using defaults");
                Self::default()
            }
        }
    }

    /// Write the configuration as pretty JSON, creating parent directories
    pub fn save(&self, path: &Path) -> Result<(), AppError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| AppError::Storage(format!("{}: {}", parent.display(), e)))?;
        }
        let text = serde_json::to_string_pretty(self)
            .map_err(|e| AppError::Config(e.to_string()))?;
        std::fs::write(path, text)
            .map_err(|e| AppError::Storage(format!("{}: {}", path.display(), e)))?;
        Ok(())
    }

    /// Clamp values that would make the pipeline unusable
    fn sanitized(mut self) -> Self {
        if self.pool_max_buffers == 0 {
            warn!("pool_max_buffers must be at least 1");
            self.pool_max_buffers = pool::MAX_BUFFER_COUNT;
        }
        if self.pool_min_buffers > self.pool_max_buffers {
            self.pool_min_buffers = self.pool_max_buffers;
        }
        if self.frame_queue_depth == 0 {
            self.frame_queue_depth = 1;
        }
        for channel in &mut self.clear_color {
            *channel = channel.clamp(0.0, 1.0);
        }
        self.recording_orientation %= 360;
        self.display_orientation %= 360;
        self
    }

    pub fn recordings_dir(&self) -> PathBuf {
        self.recordings_dir
            .clone()
            .unwrap_or_else(crate::storage::default_recordings_dir)
    }

    pub fn library_dir(&self) -> PathBuf {
        self.library_dir
            .clone()
            .unwrap_or_else(crate::storage::default_library_dir)
    }

    pub fn display_config(&self) -> DisplayConfig {
        DisplayConfig {
            clear_color: self.clear_color,
            color_format: self.color_format,
            orientation_degrees: self.display_orientation,
        }
    }

    pub fn recorder_settings(&self) -> RecorderSettings {
        RecorderSettings {
            directory: self.recordings_dir(),
            bitrate: self.bitrate_preset,
            orientation_degrees: self.recording_orientation,
        }
    }
}
