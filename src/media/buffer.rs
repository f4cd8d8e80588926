// SPDX-License-Identifier: GPL-3.0-only

//! Frame buffer types shared by capture, filtering, display and recording
//!
//! [`PixelBuffer`] is a uniquely owned, writable pixel grid. Freezing it
//! produces an [`ImageBuffer`], the reference-counted read-only handle that
//! flows through the pipeline. Buffers handed out by a
//! [`PixelBufferPool`](super::PixelBufferPool) return their memory to the pool
//! when the last handle is dropped.

use super::pool::Recycler;
use gstreamer::buffer::{MappedBuffer, Readable};
use std::fmt;
use std::sync::Arc;

/// Pixel layouts known to the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PixelFormat {
    /// 8-bit B, G, R, A (the capture and filter format)
    Bgra,
    /// 8-bit R, G, B, A
    Rgba,
    /// Semi-planar 4:2:0
    Nv12,
    /// Anything else, identified by FourCC
    Other(u32),
}

impl PixelFormat {
    /// Bytes per pixel for packed formats
    pub fn bytes_per_pixel(&self) -> Option<u32> {
        match self {
            PixelFormat::Bgra | PixelFormat::Rgba => Some(4),
            PixelFormat::Nv12 | PixelFormat::Other(_) => None,
        }
    }

    /// Whether the format is a single packed plane
    pub fn is_packed(&self) -> bool {
        self.bytes_per_pixel().is_some()
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PixelFormat::Bgra => write!(f, "BGRA"),
            PixelFormat::Rgba => write!(f, "RGBA"),
            PixelFormat::Nv12 => write!(f, "NV12"),
            PixelFormat::Other(fourcc) => {
                let bytes = fourcc.to_le_bytes();
                write!(f, "{}", String::from_utf8_lossy(&bytes))
            }
        }
    }
}

/// Format metadata carried alongside every captured sample
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FormatDescription {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
}

impl FormatDescription {
    pub fn new(width: u32, height: u32, pixel_format: PixelFormat) -> Self {
        Self {
            width,
            height,
            pixel_format,
        }
    }

    /// Tightly packed row stride, if the format is packed
    pub fn packed_stride(&self) -> Option<u32> {
        self.pixel_format.bytes_per_pixel().map(|bpp| self.width * bpp)
    }
}

/// Backing memory of a pixel buffer
pub enum FrameData {
    /// Heap memory owned by the buffer (possibly on loan from a pool)
    Owned(Vec<u8>),
    /// A mapped GStreamer buffer, kept alive without copying
    Mapped(MappedBuffer<Readable>),
}

impl FrameData {
    pub fn len(&self) -> usize {
        self.as_ref().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl AsRef<[u8]> for FrameData {
    fn as_ref(&self) -> &[u8] {
        match self {
            FrameData::Owned(data) => data.as_slice(),
            FrameData::Mapped(map) => map.as_slice(),
        }
    }
}

impl fmt::Debug for FrameData {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameData::Owned(data) => write!(f, "FrameData::Owned({} bytes)", data.len()),
            FrameData::Mapped(map) => write!(f, "FrameData::Mapped({} bytes)", map.len()),
        }
    }
}

/// A writable 2D pixel grid with format metadata
pub struct PixelBuffer {
    width: u32,
    height: u32,
    format: PixelFormat,
    stride: u32,
    data: FrameData,
    recycler: Option<Recycler>,
}

impl PixelBuffer {
    /// Wrap heap memory. `data` must hold at least `stride * height` bytes.
    pub fn new(width: u32, height: u32, format: PixelFormat, stride: u32, data: Vec<u8>) -> Self {
        debug_assert!(data.len() >= (stride as usize) * (height as usize));
        Self {
            width,
            height,
            format,
            stride,
            data: FrameData::Owned(data),
            recycler: None,
        }
    }

    /// Allocate a zeroed, tightly packed buffer
    pub fn zeroed(width: u32, height: u32, format: PixelFormat) -> Self {
        let stride = width * format.bytes_per_pixel().unwrap_or(1);
        let len = stride as usize * height as usize;
        Self::new(width, height, format, stride, vec![0; len])
    }

    /// Wrap a mapped GStreamer buffer without copying
    pub fn from_mapped(
        width: u32,
        height: u32,
        format: PixelFormat,
        stride: u32,
        map: MappedBuffer<Readable>,
    ) -> Self {
        Self {
            width,
            height,
            format,
            stride,
            data: FrameData::Mapped(map),
            recycler: None,
        }
    }

    pub(crate) fn with_recycler(mut self, recycler: Recycler) -> Self {
        self.recycler = Some(recycler);
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.format
    }

    pub fn stride(&self) -> u32 {
        self.stride
    }

    pub fn format_description(&self) -> FormatDescription {
        FormatDescription::new(self.width, self.height, self.format)
    }

    pub fn data(&self) -> &[u8] {
        self.data.as_ref()
    }

    /// Mutable access to the pixels; `None` for mapped (read-only) memory
    pub fn data_mut(&mut self) -> Option<&mut [u8]> {
        match &mut self.data {
            FrameData::Owned(data) => Some(data.as_mut_slice()),
            FrameData::Mapped(_) => None,
        }
    }

    /// Whether this buffer's memory belongs to a pool
    pub fn is_pooled(&self) -> bool {
        self.recycler.is_some()
    }

    /// Give up write access and share the buffer
    pub fn freeze(self) -> ImageBuffer {
        ImageBuffer(Arc::new(self))
    }
}

impl Drop for PixelBuffer {
    fn drop(&mut self) {
        if let (Some(recycler), FrameData::Owned(data)) = (self.recycler.take(), &mut self.data) {
            recycler.recycle(std::mem::take(data));
        }
    }
}

impl fmt::Debug for PixelBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PixelBuffer")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("format", &self.format)
            .field("stride", &self.stride)
            .field("data", &self.data)
            .field("pooled", &self.recycler.is_some())
            .finish()
    }
}

/// Shared, read-only handle to a [`PixelBuffer`]
///
/// Cloning is cheap. Two handles are the same buffer when [`ImageBuffer::ptr_eq`]
/// says so, which is how a pass-through frame is told apart from a filtered one.
#[derive(Clone, Debug)]
pub struct ImageBuffer(Arc<PixelBuffer>);

impl ImageBuffer {
    pub fn width(&self) -> u32 {
        self.0.width
    }

    pub fn height(&self) -> u32 {
        self.0.height
    }

    pub fn pixel_format(&self) -> PixelFormat {
        self.0.format
    }

    pub fn stride(&self) -> u32 {
        self.0.stride
    }

    pub fn format_description(&self) -> FormatDescription {
        self.0.format_description()
    }

    pub fn data(&self) -> &[u8] {
        self.0.data()
    }

    pub fn is_pooled(&self) -> bool {
        self.0.is_pooled()
    }

    /// Row `y` without stride padding
    pub fn row(&self, y: u32) -> &[u8] {
        let bpp = self.0.format.bytes_per_pixel().unwrap_or(1) as usize;
        let start = y as usize * self.0.stride as usize;
        &self.data()[start..start + self.0.width as usize * bpp]
    }

    /// The four bytes of a packed pixel, in memory order
    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        let offset = y as usize * self.0.stride as usize + x as usize * 4;
        let data = self.data();
        [
            data[offset],
            data[offset + 1],
            data[offset + 2],
            data[offset + 3],
        ]
    }

    /// Copy the visible pixels into a tightly packed vector
    pub fn to_packed_vec(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.data().len());
        for y in 0..self.height() {
            out.extend_from_slice(self.row(y));
        }
        out
    }

    /// Whether both handles refer to the same buffer
    pub fn ptr_eq(a: &ImageBuffer, b: &ImageBuffer) -> bool {
        Arc::ptr_eq(&a.0, &b.0)
    }

    /// Number of live handles to this buffer
    pub fn handle_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }
}

impl From<PixelBuffer> for ImageBuffer {
    fn from(buffer: PixelBuffer) -> Self {
        buffer.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pixel_format_display() {
        assert_eq!(PixelFormat::Bgra.to_string(), "BGRA");
        let fourcc = u32::from_le_bytes(*b"YUYV");
        assert_eq!(PixelFormat::Other(fourcc).to_string(), "YUYV");
    }

    #[test]
    fn test_packed_stride() {
        let desc = FormatDescription::new(640, 480, PixelFormat::Bgra);
        assert_eq!(desc.packed_stride(), Some(2560));
        let desc = FormatDescription::new(640, 480, PixelFormat::Nv12);
        assert_eq!(desc.packed_stride(), None);
    }

    #[test]
    fn test_rows_skip_padding() {
        // 2x2 BGRA with 4 bytes of padding per row
        let mut data = vec![0u8; 24];
        data[0..8].copy_from_slice(&[1, 2, 3, 4, 5, 6, 7, 8]);
        data[12..20].copy_from_slice(&[9, 10, 11, 12, 13, 14, 15, 16]);
        let image = PixelBuffer::new(2, 2, PixelFormat::Bgra, 12, data).freeze();

        assert_eq!(image.row(1), &[9, 10, 11, 12, 13, 14, 15, 16]);
        assert_eq!(image.pixel(1, 1), [13, 14, 15, 16]);
        assert_eq!(image.to_packed_vec().len(), 16);
    }

    #[test]
    fn test_clone_shares_buffer() {
        let image = PixelBuffer::zeroed(4, 4, PixelFormat::Bgra).freeze();
        let other = image.clone();
        assert!(ImageBuffer::ptr_eq(&image, &other));
        assert_eq!(image.handle_count(), 2);

        let distinct = PixelBuffer::zeroed(4, 4, PixelFormat::Bgra).freeze();
        assert!(!ImageBuffer::ptr_eq(&image, &distinct));
    }
}
