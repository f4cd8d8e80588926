// SPDX-License-Identifier: MPL-2.0

//! Pixel buffers and the output buffer pool
//!
//! Every frame in the pipeline is an [`ImageBuffer`]: captured frames wrap
//! GStreamer memory directly, filtered frames come from a [`PixelBufferPool`]
//! so the steady state allocates nothing per frame.
//!
//! # Modules
//!
//! - [`buffer`]: Pixel formats, format descriptions and buffer handles
//! - [`pool`]: Fixed-format recycling pool

pub mod buffer;
pub mod pool;

pub use buffer::{FormatDescription, FrameData, ImageBuffer, PixelBuffer, PixelFormat};
pub use pool::{PixelBufferPool, PoolConfig};
