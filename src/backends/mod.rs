// SPDX-License-Identifier: MPL-2.0

//! Platform collaborators
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │              CaptureController               │
//! └───────────┬──────────────────────┬───────────┘
//!             │                      │
//! ┌───────────┴──────────┐ ┌─────────┴──────────┐
//! │       Camera         │ │    Permissions     │
//! │ (GStreamer session,  │ │ (portal / device   │
//! │  device monitor)     │ │  nodes)            │
//! └──────────────────────┘ └────────────────────┘
//! ```
//!
//! - [`camera`]: capture session, device discovery and frame delivery
//! - [`permissions`]: camera access authorization

pub mod camera;
pub mod permissions;

pub use permissions::{AuthorizationStatus, CameraPermissions, SystemCameraPermissions};
