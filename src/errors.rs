// SPDX-License-Identifier: MPL-2.0

//! Error types for the filter camera
//!
//! Low-level GPU, GStreamer and filesystem failures are converted into one of
//! these categories at the module boundary where they occur. Nothing above the
//! filter stage or the recording session sees a raw platform error.

use crate::media::PixelFormat;
use std::fmt;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;

/// Main application error type
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppError {
    /// Device, input or session wiring failures
    Capture(CaptureError),
    /// Per-frame filter failures
    Filter(FilterError),
    /// Recording and save failures
    Recording(RecordingError),
    /// Configuration errors
    Config(String),
    /// Storage/filesystem errors
    Storage(String),
    /// Generic error with message
    Other(String),
}

/// Capture session configuration errors
///
/// All of these are unrecoverable for the current session attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    /// Camera access has not been granted
    NotAuthorized,
    /// No device exists for the requested position
    DeviceNotFound(String),
    /// The device exists but an input could not be constructed from it
    InputCreation(String),
    /// The capture session refused the input
    InputRejected(String),
    /// The platform capture stack failed (pipeline build, state change)
    Backend(String),
    /// An operation needed a configured session
    NotConfigured,
}

/// Filter stage errors
///
/// Recoverable per frame: the frame is dropped and the next one is attempted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FilterError {
    /// No compute device could be opened
    Device(String),
    /// The shader library failed to compile
    Library(String),
    /// The requested kernel does not exist in the shader library
    FunctionNotFound(String),
    /// Compute pipeline construction failed
    Pipeline(String),
    /// The device could not record or submit work
    CommandQueue(String),
    /// A texture view over a buffer could not be created
    TextureCache(String),
    /// Texture creation or upload failed
    Texture(String),
    /// The output pool has no buffer to hand out
    PixelBufferAllocation(String),
    /// The input buffer has a format the pool cannot hold
    InvalidBufferType(PixelFormat),
}

/// Recording errors
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordingError {
    /// A session is already active
    AlreadyActive,
    /// The container writer could not be opened
    WriterCreation(String),
    /// No usable video encoder is installed
    EncoderNotAvailable(String),
    /// The writer input is not accepting data
    WriterNotReady,
    /// The writer reported a failed status
    WriterFailed(String),
    /// Media library access was not granted
    LibraryAccessDenied,
    /// Handing the file to the media library failed
    SaveFailed(String),
    /// The recording file could not be removed
    DeleteFailed(String),
    /// There is no session or pending recording to operate on
    NoSession,
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Capture(e) => write!(f, "Capture error: {}", e),
            AppError::Filter(e) => write!(f, "Filter error: {}", e),
            AppError::Recording(e) => write!(f, "Recording error: {}", e),
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Storage(msg) => write!(f, "Storage error: {}", msg),
            AppError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl fmt::Display for CaptureError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CaptureError::NotAuthorized => write!(f, "Camera access not authorized"),
            CaptureError::DeviceNotFound(what) => write!(f, "No camera found: {}", what),
            CaptureError::InputCreation(msg) => write!(f, "Failed to create input: {}", msg),
            CaptureError::InputRejected(msg) => write!(f, "Session rejected input: {}", msg),
            CaptureError::Backend(msg) => write!(f, "Backend error: {}", msg),
            CaptureError::NotConfigured => write!(f, "Capture session not configured"),
        }
    }
}

impl fmt::Display for FilterError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterError::Device(msg) => write!(f, "Compute device unavailable: {}", msg),
            FilterError::Library(msg) => write!(f, "Shader library failed: {}", msg),
            FilterError::FunctionNotFound(name) => write!(f, "Kernel not found: {}", name),
            FilterError::Pipeline(msg) => write!(f, "Pipeline creation failed: {}", msg),
            FilterError::CommandQueue(msg) => write!(f, "Command submission failed: {}", msg),
            FilterError::TextureCache(msg) => write!(f, "Texture view failed: {}", msg),
            FilterError::Texture(msg) => write!(f, "Texture creation failed: {}", msg),
            FilterError::PixelBufferAllocation(msg) => {
                write!(f, "Pixel buffer allocation failed: {}", msg)
            }
            FilterError::InvalidBufferType(format) => {
                write!(f, "Unsupported pixel buffer format: {}", format)
            }
        }
    }
}

impl fmt::Display for RecordingError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RecordingError::AlreadyActive => write!(f, "Recording already in progress"),
            RecordingError::WriterCreation(msg) => write!(f, "Failed to open writer: {}", msg),
            RecordingError::EncoderNotAvailable(msg) => {
                write!(f, "Encoder not available: {}", msg)
            }
            RecordingError::WriterNotReady => write!(f, "Writer input not ready"),
            RecordingError::WriterFailed(msg) => write!(f, "Writer failed: {}", msg),
            RecordingError::LibraryAccessDenied => write!(f, "Media library access denied"),
            RecordingError::SaveFailed(msg) => write!(f, "Failed to save video: {}", msg),
            RecordingError::DeleteFailed(msg) => write!(f, "Failed to delete video: {}", msg),
            RecordingError::NoSession => write!(f, "No recording session"),
        }
    }
}

impl std::error::Error for AppError {}
impl std::error::Error for CaptureError {}
impl std::error::Error for FilterError {}
impl std::error::Error for RecordingError {}

// Conversions from sub-errors to AppError
impl From<CaptureError> for AppError {
    fn from(err: CaptureError) -> Self {
        AppError::Capture(err)
    }
}

impl From<FilterError> for AppError {
    fn from(err: FilterError) -> Self {
        AppError::Filter(err)
    }
}

impl From<RecordingError> for AppError {
    fn from(err: RecordingError) -> Self {
        AppError::Recording(err)
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Storage(err.to_string())
    }
}

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Other(msg)
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError::Other(msg.to_string())
    }
}
