// SPDX-License-Identifier: GPL-3.0-only

//! Frame presentation
//!
//! The display only ever receives textures; nothing flows back to the
//! capture pipeline. [`WgpuDisplay`] draws each texture with a render
//! pipeline into an offscreen target and publishes the rendered picture to a
//! [`FrameSlot`] that the terminal shell paints from. [`LatestFrameSink`] skips
//! the GPU and publishes the filtered buffer as is.

mod renderer;

pub use renderer::{Vertex, WgpuDisplay, quad_vertices, rotated_extent};

use crate::errors::FilterError;
use crate::filters::GpuTexture;
use crate::gpu::wgpu;
use crate::media::{ImageBuffer, PixelFormat};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Consumer of the filtered texture for each frame
pub trait DisplaySink: Send {
    fn present(&mut self, texture: &GpuTexture) -> Result<(), FilterError>;

    fn name(&self) -> &'static str;
}

/// Colour format of the display render target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DisplayColorFormat {
    #[default]
    Bgra8Unorm,
    Rgba8Unorm,
}

impl DisplayColorFormat {
    pub fn texture_format(&self) -> wgpu::TextureFormat {
        match self {
            Self::Bgra8Unorm => wgpu::TextureFormat::Bgra8Unorm,
            Self::Rgba8Unorm => wgpu::TextureFormat::Rgba8Unorm,
        }
    }

    /// Pixel layout of a rendered frame read back from the target
    pub fn pixel_format(&self) -> PixelFormat {
        match self {
            Self::Bgra8Unorm => PixelFormat::Bgra,
            Self::Rgba8Unorm => PixelFormat::Rgba,
        }
    }
}

/// Presentation settings handed to the renderer at construction
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DisplayConfig {
    /// RGBA clear colour, each channel 0.0..=1.0
    pub clear_color: [f64; 4],
    pub color_format: DisplayColorFormat,
    /// Clockwise rotation applied to the picture
    pub orientation_degrees: u32,
}

impl DisplayConfig {
    pub const DEPTH_FORMAT: wgpu::TextureFormat = wgpu::TextureFormat::Depth32Float;

    pub fn clear_color(&self) -> wgpu::Color {
        let [r, g, b, a] = self.clear_color;
        wgpu::Color { r, g, b, a }
    }
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            clear_color: [0.0, 0.0, 0.0, 0.0],
            color_format: DisplayColorFormat::default(),
            orientation_degrees: 0,
        }
    }
}

#[derive(Default)]
struct SlotInner {
    frame: Mutex<Option<ImageBuffer>>,
    generation: AtomicU64,
}

/// Latest presented picture, shared with the shell
///
/// Writers replace the frame; readers clone it out and can tell from the
/// generation counter whether anything new arrived.
#[derive(Clone, Default)]
pub struct FrameSlot {
    inner: Arc<SlotInner>,
}

impl FrameSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, image: ImageBuffer) {
        if let Ok(mut frame) = self.inner.frame.lock() {
            *frame = Some(image);
        }
        self.inner.generation.fetch_add(1, Ordering::AcqRel);
    }

    pub fn latest(&self) -> Option<ImageBuffer> {
        self.inner.frame.lock().ok().and_then(|f| f.clone())
    }

    /// Drop the held frame so its pool buffer can be recycled
    pub fn clear(&self) {
        if let Ok(mut frame) = self.inner.frame.lock() {
            frame.take();
        }
    }

    pub fn generation(&self) -> u64 {
        self.inner.generation.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for FrameSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameSlot")
            .field("generation", &self.generation())
            .finish()
    }
}

/// Publishes the filtered buffer without rendering
#[derive(Debug, Clone, Default)]
pub struct LatestFrameSink {
    slot: FrameSlot,
}

impl LatestFrameSink {
    pub fn new(slot: FrameSlot) -> Self {
        Self { slot }
    }
}

impl DisplaySink for LatestFrameSink {
    fn present(&mut self, texture: &GpuTexture) -> Result<(), FilterError> {
        self.slot.publish(texture.image().clone());
        Ok(())
    }

    fn name(&self) -> &'static str {
        "latest-frame"
    }
}
