// SPDX-License-Identifier: GPL-3.0-only

//! Recycling pool for filter output buffers
//!
//! The pool is built explicitly from a [`PoolConfig`] and then used; nothing is
//! created implicitly from the first frame. Buffers go back to the free list
//! when the last [`ImageBuffer`](super::ImageBuffer) referring to them is
//! dropped, so a frame held by the recorder or the display keeps its memory
//! out of circulation until it is done.

use super::buffer::{FormatDescription, PixelBuffer, PixelFormat};
use crate::constants::pool;
use crate::errors::FilterError;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use tracing::{debug, warn};

/// Dimensions, format and size limits of a pool
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolConfig {
    pub width: u32,
    pub height: u32,
    pub pixel_format: PixelFormat,
    /// Buffers allocated up front and kept around
    pub min_buffer_count: usize,
    /// Hard cap on buffers in existence at once
    pub max_buffer_count: usize,
}

impl PoolConfig {
    /// Size a pool for frames described by `desc`
    pub fn from_format(
        desc: &FormatDescription,
        min_buffer_count: usize,
        max_buffer_count: usize,
    ) -> Self {
        Self {
            width: desc.width,
            height: desc.height,
            pixel_format: desc.pixel_format,
            min_buffer_count,
            max_buffer_count: max_buffer_count.max(min_buffer_count),
        }
    }

    pub fn format_description(&self) -> FormatDescription {
        FormatDescription::new(self.width, self.height, self.pixel_format)
    }
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            width: 0,
            height: 0,
            pixel_format: PixelFormat::Bgra,
            min_buffer_count: pool::MIN_BUFFER_COUNT,
            max_buffer_count: pool::MAX_BUFFER_COUNT,
        }
    }
}

struct PoolShared {
    free: Mutex<Vec<Vec<u8>>>,
    allocated: AtomicUsize,
    buffer_len: usize,
}

/// Returns a buffer's memory to its pool, if the pool still exists
pub(crate) struct Recycler {
    shared: Weak<PoolShared>,
}

impl Recycler {
    pub(crate) fn recycle(self, data: Vec<u8>) {
        let Some(shared) = self.shared.upgrade() else {
            return;
        };
        if data.len() != shared.buffer_len {
            shared.allocated.fetch_sub(1, Ordering::AcqRel);
            return;
        }
        match shared.free.lock() {
            Ok(mut free) => free.push(data),
            Err(_) => {
                shared.allocated.fetch_sub(1, Ordering::AcqRel);
            }
        }
    }
}

/// Fixed-format BGRA buffer pool
pub struct PixelBufferPool {
    config: PoolConfig,
    stride: u32,
    shared: Arc<PoolShared>,
}

impl PixelBufferPool {
    /// Validate `config` and allocate the minimum buffer count
    pub fn new(config: PoolConfig) -> Result<Self, FilterError> {
        if config.pixel_format != PixelFormat::Bgra {
            return Err(FilterError::InvalidBufferType(config.pixel_format));
        }
        if config.width == 0 || config.height == 0 {
            return Err(FilterError::PixelBufferAllocation(format!(
                "invalid dimensions {}x{}",
                config.width, config.height
            )));
        }
        if config.max_buffer_count == 0 {
            return Err(FilterError::PixelBufferAllocation(
                "pool must allow at least one buffer".to_string(),
            ));
        }

        let stride = config.width * 4;
        let buffer_len = stride as usize * config.height as usize;
        let initial = config.min_buffer_count.min(config.max_buffer_count);
        let free = (0..initial).map(|_| vec![0u8; buffer_len]).collect();

        debug!(
            width = config.width,
            height = config.height,
            min = config.min_buffer_count,
            max = config.max_buffer_count,
            "Created pixel buffer pool"
        );

        Ok(Self {
            config,
            stride,
            shared: Arc::new(PoolShared {
                free: Mutex::new(free),
                allocated: AtomicUsize::new(initial),
                buffer_len,
            }),
        })
    }

    pub fn config(&self) -> &PoolConfig {
        &self.config
    }

    /// Whether frames described by `desc` fit this pool
    pub fn matches(&self, desc: &FormatDescription) -> bool {
        self.config.width == desc.width
            && self.config.height == desc.height
            && self.config.pixel_format == desc.pixel_format
    }

    /// Take a buffer from the pool, allocating one if under the cap
    pub fn create_pixel_buffer(&self) -> Result<PixelBuffer, FilterError> {
        let recycled = self
            .shared
            .free
            .lock()
            .map_err(|_| FilterError::PixelBufferAllocation("pool lock poisoned".to_string()))?
            .pop();

        let data = match recycled {
            Some(data) => data,
            None => {
                let claimed = self.shared.allocated.fetch_update(
                    Ordering::AcqRel,
                    Ordering::Acquire,
                    |count| (count < self.config.max_buffer_count).then_some(count + 1),
                );
                if claimed.is_err() {
                    warn!(
                        max = self.config.max_buffer_count,
                        "Pixel buffer pool exhausted"
                    );
                    return Err(FilterError::PixelBufferAllocation(format!(
                        "all {} buffers in use",
                        self.config.max_buffer_count
                    )));
                }
                vec![0u8; self.shared.buffer_len]
            }
        };

        let recycler = Recycler {
            shared: Arc::downgrade(&self.shared),
        };
        Ok(PixelBuffer::new(
            self.config.width,
            self.config.height,
            PixelFormat::Bgra,
            self.stride,
            data,
        )
        .with_recycler(recycler))
    }

    /// Buffers created by this pool that are still alive
    pub fn allocated(&self) -> usize {
        self.shared.allocated.load(Ordering::Acquire)
    }

    /// Buffers sitting on the free list
    pub fn available(&self) -> usize {
        self.shared.free.lock().map(|free| free.len()).unwrap_or(0)
    }
}

impl std::fmt::Debug for PixelBufferPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PixelBufferPool")
            .field("config", &self.config)
            .field("allocated", &self.allocated())
            .field("available", &self.available())
            .finish()
    }
}
