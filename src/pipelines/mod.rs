// SPDX-License-Identifier: MPL-2.0

//! Recording pipeline
//!
//! ```text
//! ┌──────────────┐     ┌───────────────────┐     ┌──────────────┐
//! │ Filter Stage │ ──▶ │     Recorder      │ ──▶ │ Videos Folder│
//! │  (BGRA out)  │     │  - State machine  │     │   (.mov)     │
//! │              │     │  - GStreamer      │     │              │
//! │              │     │  - HW Encoding    │     │              │
//! └──────────────┘     └───────────────────┘     └──────────────┘
//! ```
//!
//! Frames reach the recorder in capture order on the frame-delivery thread.
//! Finalization runs on its own thread so a slow container flush never holds
//! up the live preview.

pub mod video;
