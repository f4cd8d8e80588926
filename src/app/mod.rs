// SPDX-License-Identifier: MPL-2.0

//! Application core between the platform backends and the shell
//!
//! # Architecture
//!
//! - `controller`: authorization, session wiring and user intents
//! - `router`: per-frame filter → recorder → display routing
//! - `session_queue`: serialized configuration thread
//! - `observer`: notifications back to the shell
//! - `builder`: production wiring from the configuration
//!
//! # Main Types
//!
//! - [`CaptureController`]: what the shell talks to
//! - [`FrameRouter`]: what runs on every frame
//! - [`CameraObserver`]: what the shell implements

mod builder;
mod controller;
mod observer;
mod router;
mod session_queue;

pub use builder::{build_controller, build_display, open_gpu};
pub use controller::{CaptureController, CaptureServices, ControllerSettings};
pub use observer::{CameraEvent, CameraObserver, ChannelObserver};
pub use router::{FilterSelection, FrameRouter, FrameStats};
pub use session_queue::SessionQueue;
