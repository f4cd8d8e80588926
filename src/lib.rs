// SPDX-License-Identifier: MPL-2.0

//! Filter Camera - live camera capture with GPU compute filters and recording
//!
//! Each captured frame is filtered, shown, and (while recording) appended
//! to a QuickTime movie that is handed to the videos folder when finished.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`app`]: Capture controller, frame routing and shell notifications
//! - [`backends`]: Camera capture and permission backends
//! - [`filters`]: Filter stage and compute backends
//! - [`display`]: Frame presentation
//! - [`pipelines`]: Video recording pipeline
//! - [`media`]: Pixel buffers and the buffer pool
//! - [`config`]: User configuration handling
//! - [`storage`]: Recording directories and the media library
//!
//! # Example
//!
//! ```ignore
//! // This is a terminal application, typically run via:
//! // filter-camera --filter sepia
//! ```

pub mod app;
pub mod backends;
pub mod config;
pub mod constants;
pub mod display;
pub mod errors;
pub mod filters;
pub mod gpu;
pub mod media;
pub mod pipelines;
pub mod shaders;
pub mod storage;
pub mod terminal;

// Re-export commonly used types
pub use app::{CameraObserver, CaptureController, FrameRouter};
pub use config::Config;
pub use constants::BitratePreset;
pub use errors::{AppError, AppResult};
pub use filters::FilterKind;
