// SPDX-License-Identifier: GPL-3.0-only

//! Shared types for camera capture

use crate::errors::CaptureError;
use crate::media::{FormatDescription, ImageBuffer};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::mpsc::SyncSender;
use std::time::Duration;

/// Which side of the device a camera faces
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum CameraPosition {
    Front,
    #[default]
    Back,
}

impl CameraPosition {
    /// The opposite position
    pub fn toggled(&self) -> Self {
        match self {
            CameraPosition::Front => CameraPosition::Back,
            CameraPosition::Back => CameraPosition::Front,
        }
    }

    /// Parse a libcamera `api.libcamera.location` value
    pub fn from_location(location: &str) -> Option<Self> {
        match location.to_ascii_lowercase().as_str() {
            "front" => Some(CameraPosition::Front),
            "back" | "rear" => Some(CameraPosition::Back),
            _ => None,
        }
    }
}

impl fmt::Display for CameraPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CameraPosition::Front => write!(f, "front"),
            CameraPosition::Back => write!(f, "back"),
        }
    }
}

impl FromStr for CameraPosition {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_location(s).ok_or_else(|| format!("Unknown camera position: {}", s))
    }
}

/// Kind of camera module, in order of preference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DeviceType {
    DualCamera,
    DualWideCamera,
    WideAngleCamera,
}

impl DeviceType {
    /// Lookup order used when resolving a camera for a position
    pub const PREFERENCE: [DeviceType; 3] = [
        DeviceType::DualCamera,
        DeviceType::DualWideCamera,
        DeviceType::WideAngleCamera,
    ];
}

/// Where the capture pipeline pulls frames from
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceSource {
    /// PipeWire node, addressed by its object serial
    PipeWire { target_object: String },
    /// V4L2 device node
    V4l2 { path: String },
}

impl DeviceSource {
    /// GStreamer element that reads from this source
    pub fn element_name(&self) -> &'static str {
        match self {
            DeviceSource::PipeWire { .. } => "pipewiresrc",
            DeviceSource::V4l2 { .. } => "v4l2src",
        }
    }
}

/// A physical camera as reported by device discovery
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CaptureDevice {
    /// Stable identifier (object serial or device path)
    pub id: String,
    /// Human-readable name
    pub name: String,
    pub position: CameraPosition,
    pub device_type: DeviceType,
    pub source: DeviceSource,
}

impl fmt::Display for CaptureDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}, {})", self.name, self.position, self.id)
    }
}

/// A device opened for use as a capture-session input
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInput {
    pub device: CaptureDevice,
}

impl DeviceInput {
    pub fn new(device: CaptureDevice) -> Self {
        Self { device }
    }

    pub fn id(&self) -> &str {
        &self.device.id
    }

    pub fn position(&self) -> CameraPosition {
        self.device.position
    }
}

/// One captured frame as delivered by the driver
///
/// Image and format are optional because the driver may fail to map a
/// buffer or to read its caps. The frame router reports and drops such
/// samples.
#[derive(Debug, Clone)]
pub struct FrameSample {
    pub image: Option<ImageBuffer>,
    pub format: Option<FormatDescription>,
    /// Presentation time on the capture clock
    pub presentation_time: Duration,
}

impl FrameSample {
    /// A sample carrying a frame and its format
    pub fn new(image: ImageBuffer, presentation_time: Duration) -> Self {
        let format = image.format_description();
        Self {
            image: Some(image),
            format: Some(format),
            presentation_time,
        }
    }

    /// Image and format, or the reason they could not be extracted
    pub fn extract(&self) -> Result<(&ImageBuffer, FormatDescription), CaptureError> {
        let image = self
            .image
            .as_ref()
            .ok_or_else(|| CaptureError::Backend("sample has no image buffer".to_string()))?;
        let format = self
            .format
            .ok_or_else(|| CaptureError::Backend("sample has no format description".to_string()))?;
        Ok((image, format))
    }
}

/// Sending half of the frame-delivery channel
pub type SampleSender = SyncSender<FrameSample>;
