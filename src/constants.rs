// SPDX-License-Identifier: GPL-3.0-only

//! Application-wide constants and tunables

use serde::{Deserialize, Serialize};

/// Video encoder bitrate presets
///
/// These presets define the target bitrate for video encoding based on resolution.
/// Users can choose between quality and file size trade-offs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BitratePreset {
    /// Low bitrate - smaller files, reduced quality
    Low,
    /// Medium bitrate - balanced quality and file size (default)
    #[default]
    Medium,
    /// High bitrate - larger files, better quality
    High,
}

impl BitratePreset {
    /// Get all preset variants for UI iteration
    pub const ALL: [BitratePreset; 3] = [
        BitratePreset::Low,
        BitratePreset::Medium,
        BitratePreset::High,
    ];

    /// Get display name for the preset
    pub fn display_name(&self) -> &'static str {
        match self {
            BitratePreset::Low => "Low",
            BitratePreset::Medium => "Medium",
            BitratePreset::High => "High",
        }
    }

    /// Get bitrate in kbps for a given resolution
    ///
    /// Bitrates are tuned for good quality at each resolution tier:
    /// - SD (640x480): Low=1, Medium=2, High=4 Mbps
    /// - HD (1280x720): Low=2.5, Medium=5, High=10 Mbps
    /// - Full HD (1920x1080): Low=4, Medium=8, High=16 Mbps
    /// - 2K (2560x1440): Low=8, Medium=16, High=32 Mbps
    /// - 4K (3840x2160): Low=15, Medium=30, High=50 Mbps
    pub fn bitrate_kbps(&self, width: u32, _height: u32) -> u32 {
        let resolution_tier = get_resolution_tier(width);

        match (resolution_tier, self) {
            // SD (640x480 and below)
            (ResolutionTier::SD, BitratePreset::Low) => 1_000,
            (ResolutionTier::SD, BitratePreset::Medium) => 2_000,
            (ResolutionTier::SD, BitratePreset::High) => 4_000,
            // HD (1280x720)
            (ResolutionTier::HD, BitratePreset::Low) => 2_500,
            (ResolutionTier::HD, BitratePreset::Medium) => 5_000,
            (ResolutionTier::HD, BitratePreset::High) => 10_000,
            // Full HD (1920x1080)
            (ResolutionTier::FullHD, BitratePreset::Low) => 4_000,
            (ResolutionTier::FullHD, BitratePreset::Medium) => 8_000,
            (ResolutionTier::FullHD, BitratePreset::High) => 16_000,
            // 2K (2560x1440)
            (ResolutionTier::TwoK, BitratePreset::Low) => 8_000,
            (ResolutionTier::TwoK, BitratePreset::Medium) => 16_000,
            (ResolutionTier::TwoK, BitratePreset::High) => 32_000,
            // 4K (3840x2160 and above)
            (ResolutionTier::FourK, BitratePreset::Low) => 15_000,
            (ResolutionTier::FourK, BitratePreset::Medium) => 30_000,
            (ResolutionTier::FourK, BitratePreset::High) => 50_000,
        }
    }
}

/// Resolution tiers for bitrate calculation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionTier {
    /// SD: 640x480 and below
    SD,
    /// HD: 1280x720
    HD,
    /// Full HD: 1920x1080
    FullHD,
    /// 2K: 2560x1440
    TwoK,
    /// 4K: 3840x2160 and above
    FourK,
}

/// Get the resolution tier for a given width
pub fn get_resolution_tier(width: u32) -> ResolutionTier {
    match width {
        w if w >= 3840 => ResolutionTier::FourK,
        w if w >= 2560 => ResolutionTier::TwoK,
        w if w >= 1920 => ResolutionTier::FullHD,
        w if w >= 1280 => ResolutionTier::HD,
        _ => ResolutionTier::SD,
    }
}

/// Format bitrate for display (e.g., "8 Mbps" or "2.5 Mbps")
pub fn format_bitrate(kbps: u32) -> String {
    let mbps = kbps as f64 / 1000.0;
    if mbps == mbps.floor() {
        format!("{} Mbps", mbps as u32)
    } else {
        format!("{:.1} Mbps", mbps)
    }
}

/// GStreamer capture pipeline constants
pub mod pipeline {
    /// Maximum buffer queue size on the capture appsink (keep small for low latency)
    pub const MAX_BUFFERS: u32 = 2;

    /// Get number of threads for videoconvert based on available CPU threads
    pub fn videoconvert_threads() -> u32 {
        std::thread::available_parallelism()
            .map(|n| n.get() as u32)
            .unwrap_or(4) // Fallback to 4 if detection fails
    }
}

/// Output buffer pool sizing
pub mod pool {
    /// Buffers kept allocated while the pool lives
    pub const MIN_BUFFER_COUNT: usize = 3;

    /// Buffers in flight before allocation fails and frames are dropped
    pub const MAX_BUFFER_COUNT: usize = 8;
}

/// Recording container settings
pub mod recording {
    /// Container file extension (QuickTime)
    pub const FILE_EXTENSION: &str = "mov";

    /// Media timescale in ticks per second
    pub const MEDIA_TIMESCALE: u32 = 600;

    /// Rotation written into the track metadata
    pub const DEFAULT_ORIENTATION_DEGREES: u32 = 90;

    /// Output buffers the pool keeps free of the writer queue: the frame
    /// being filtered, the frame on screen and one in flight to the display
    pub const POOL_BUFFERS_RESERVED: usize = 3;

    /// Frames queued in the writer before it reports not-ready
    ///
    /// Queued frames hold pooled output buffers, so the queue stays below the
    /// pool's cap.
    pub const MAX_QUEUED_FRAMES: u64 =
        (super::pool::MAX_BUFFER_COUNT - POOL_BUFFERS_RESERVED) as u64;

    /// Name of the sub-directory used inside app data and the videos folder
    pub const DIRECTORY_NAME: &str = "filter-camera";
}

/// Timing constants
pub mod timing {
    use std::time::Duration;

    /// Frame counter modulo for periodic logging
    pub const FRAME_LOG_INTERVAL: u64 = 30;

    /// How long the frame loop waits for a sample before checking its stop signal
    pub const FRAME_POLL_INTERVAL: Duration = Duration::from_millis(50);

    /// Upper bound on waiting for the writer to flush after end-of-stream
    pub const FINALIZE_TIMEOUT_SECS: u64 = 10;

    /// Pipeline state change timeout on stop
    pub const STOP_TIMEOUT_SECS: u64 = 2;

    /// Pipeline playing state timeout on start
    pub const START_TIMEOUT_SECS: u64 = 5;

    /// How long to wait for the camera portal to answer
    pub const PORTAL_TIMEOUT: Duration = Duration::from_secs(60);
}

/// Application information utilities
pub mod app_info {
    use std::path::Path;

    /// Get the application version from build-time environment
    pub fn version() -> &'static str {
        env!("GIT_VERSION")
    }

    /// Check if the application is running inside a Flatpak sandbox
    pub fn is_flatpak() -> bool {
        Path::new("/.flatpak-info").exists()
    }
}
