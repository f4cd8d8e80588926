// SPDX-License-Identifier: GPL-3.0-only

//! GPU initialization utilities
//!
//! One device is created per process and shared by the filter stage and the
//! display renderer, so filtered textures can be presented without leaving
//! the GPU.

use crate::errors::FilterError;
use crate::media::{ImageBuffer, PixelFormat};
use std::sync::Arc;
use tracing::{debug, info};

pub use wgpu;

/// Information about the created GPU device
#[derive(Debug, Clone)]
pub struct GpuDeviceInfo {
    /// Name of the GPU adapter
    pub adapter_name: String,
    /// Backend being used (Vulkan, Metal, DX12, etc.)
    pub backend: wgpu::Backend,
    /// Largest workgroup the device accepts, in invocations
    pub max_invocations_per_workgroup: u32,
    /// Subgroup size the adapter reports, used as the threadgroup width hint
    pub subgroup_size: u32,
}

/// Device, queue and adapter facts shared across pipelines
#[derive(Clone)]
pub struct GpuContext {
    pub device: Arc<wgpu::Device>,
    pub queue: Arc<wgpu::Queue>,
    pub info: GpuDeviceInfo,
}

impl std::fmt::Debug for GpuContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GpuContext").field("info", &self.info).finish()
    }
}

/// Create a wgpu device and queue for compute and presentation.
///
/// # Arguments
///
/// * `label` - A label for the device (for debugging)
pub async fn create_device(label: &str) -> Result<GpuContext, FilterError> {
    info!(label = label, "Creating GPU device");

    let instance = wgpu::Instance::new(&wgpu::InstanceDescriptor {
        backends: wgpu::Backends::VULKAN,
        ..Default::default()
    });

    let adapter = instance
        .request_adapter(&wgpu::RequestAdapterOptions {
            power_preference: wgpu::PowerPreference::HighPerformance,
            compatible_surface: None,
            force_fallback_adapter: false,
        })
        .await
        .map_err(|e| FilterError::Device(format!("Failed to find suitable GPU adapter: {}", e)))?;

    let adapter_info = adapter.get_info();
    let adapter_limits = adapter.limits();

    info!(
        adapter = %adapter_info.name,
        backend = ?adapter_info.backend,
        "GPU adapter selected"
    );

    let (device, queue) = adapter
        .request_device(&wgpu::DeviceDescriptor {
            label: Some(label),
            required_features: wgpu::Features::empty(),
            required_limits: adapter_limits.clone(),
            memory_hints: wgpu::MemoryHints::Performance,
            ..Default::default()
        })
        .await
        .map_err(|e| FilterError::Device(format!("Failed to create GPU device: {}", e)))?;

    // Adapters that do not report a subgroup size get the common 32-wide default
    let subgroup_size = match adapter_limits.min_subgroup_size {
        0 => 32,
        size => size,
    };

    let info = GpuDeviceInfo {
        adapter_name: adapter_info.name.clone(),
        backend: adapter_info.backend,
        max_invocations_per_workgroup: adapter_limits.max_compute_invocations_per_workgroup,
        subgroup_size,
    };

    debug!(
        max_invocations = info.max_invocations_per_workgroup,
        subgroup_size = info.subgroup_size,
        "GPU compute limits"
    );

    Ok(GpuContext {
        device: Arc::new(device),
        queue: Arc::new(queue),
        info,
    })
}

/// Blocking wrapper around [`create_device`] for non-async callers
pub fn create_device_blocking(label: &str) -> Result<GpuContext, FilterError> {
    pollster::block_on(create_device(label))
}

/// Upload a BGRA frame into a sampled texture
pub fn upload_bgra_texture(
    context: &GpuContext,
    image: &ImageBuffer,
    label: &str,
) -> Result<wgpu::Texture, FilterError> {
    if image.pixel_format() != PixelFormat::Bgra {
        return Err(FilterError::InvalidBufferType(image.pixel_format()));
    }
    if image.width() == 0 || image.height() == 0 {
        return Err(FilterError::Texture(format!(
            "cannot upload empty frame {}x{}",
            image.width(),
            image.height()
        )));
    }

    let size = wgpu::Extent3d {
        width: image.width(),
        height: image.height(),
        depth_or_array_layers: 1,
    };

    let texture = context.device.create_texture(&wgpu::TextureDescriptor {
        label: Some(label),
        size,
        mip_level_count: 1,
        sample_count: 1,
        dimension: wgpu::TextureDimension::D2,
        format: wgpu::TextureFormat::Bgra8Unorm,
        usage: wgpu::TextureUsages::TEXTURE_BINDING | wgpu::TextureUsages::COPY_DST,
        view_formats: &[],
    });

    context.queue.write_texture(
        wgpu::TexelCopyTextureInfo {
            texture: &texture,
            mip_level: 0,
            origin: wgpu::Origin3d::ZERO,
            aspect: wgpu::TextureAspect::All,
        },
        image.data(),
        wgpu::TexelCopyBufferLayout {
            offset: 0,
            bytes_per_row: Some(image.stride()),
            rows_per_image: Some(image.height()),
        },
        size,
    );

    Ok(texture)
}
