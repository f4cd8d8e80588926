// SPDX-License-Identifier: GPL-3.0-only
//! GPU filter backend
//!
//! Compiles one compute pipeline per filter kernel from the shared WGSL
//! library and runs it over BGRA frames. The input frame is uploaded to a
//! BGRA texture, the kernel writes packed BGRA pixels to a storage buffer,
//! and the result is read back into the output pool buffer so the recorder
//! can consume it. The output buffer is then uploaded for display.

use super::gpu_processor::{CachedDimensions, read_buffer_async};
use crate::errors::FilterError;
use crate::filters::{ComputeBackend, ComputePipeline, DispatchGrid, GpuTexture, ThreadgroupSize};
use crate::gpu::{GpuContext, upload_bgra_texture, wgpu};
use crate::media::{ImageBuffer, PixelBuffer, PixelFormat};
use tracing::{debug, info};

/// Filter parameters uniform
#[repr(C)]
#[derive(Debug, Copy, Clone, bytemuck::Pod, bytemuck::Zeroable)]
struct FilterParams {
    width: u32,
    height: u32,
    row_pixels: u32,
    _padding: u32,
}

/// A compiled filter kernel
pub struct WgpuPipeline {
    kernel: String,
    pipeline: wgpu::ComputePipeline,
    workgroup: ThreadgroupSize,
}

impl ComputePipeline for WgpuPipeline {
    fn kernel_name(&self) -> &str {
        &self.kernel
    }

    fn thread_execution_width(&self) -> u32 {
        self.workgroup.width
    }

    fn max_total_threads_per_threadgroup(&self) -> u32 {
        self.workgroup.width * self.workgroup.height
    }
}

/// Buffers sized for the current frame dimensions
#[derive(Default)]
struct FrameResources {
    dims: CachedDimensions,
    output_buffer: Option<wgpu::Buffer>,
    staging_buffer: Option<wgpu::Buffer>,
}

/// wgpu compute backend
pub struct WgpuBackend {
    context: GpuContext,
    bind_group_layout: wgpu::BindGroupLayout,
    pipeline_layout: wgpu::PipelineLayout,
    uniform_buffer: wgpu::Buffer,
    resources: FrameResources,
}

impl WgpuBackend {
    pub fn new(context: GpuContext) -> Result<Self, FilterError> {
        info!(
            adapter_name = %context.info.adapter_name,
            adapter_backend = ?context.info.backend,
            "Initializing GPU filter backend"
        );

        let device = &context.device;

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("filter_bind_group_layout"),
            entries: &[
                // Input texture (BGRA)
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: false },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                // Output pixels
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Storage { read_only: false },
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
                // Uniform buffer
                wgpu::BindGroupLayoutEntry {
                    binding: 2,
                    visibility: wgpu::ShaderStages::COMPUTE,
                    ty: wgpu::BindingType::Buffer {
                        ty: wgpu::BufferBindingType::Uniform,
                        has_dynamic_offset: false,
                        min_binding_size: None,
                    },
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("filter_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let uniform_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("filter_uniform_buffer"),
            size: std::mem::size_of::<FilterParams>() as u64,
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        Ok(Self {
            context,
            bind_group_layout,
            pipeline_layout,
            uniform_buffer,
            resources: FrameResources::default(),
        })
    }

    /// Workgroup shape from the device: subgroup-wide rows, filled to the invocation limit
    fn workgroup_size(&self) -> ThreadgroupSize {
        let limits = self.context.device.limits();
        let width = self
            .context
            .info
            .subgroup_size
            .min(limits.max_compute_workgroup_size_x);
        let size = ThreadgroupSize::for_limits(width, limits.max_compute_invocations_per_workgroup);
        ThreadgroupSize {
            width: size.width,
            height: size.height.min(limits.max_compute_workgroup_size_y),
        }
    }

    /// Ensure output and staging buffers match the frame dimensions
    fn ensure_resources(&mut self, width: u32, height: u32) {
        if !self.resources.dims.needs_update(width, height) {
            return;
        }

        debug!(width, height, "Allocating filter pipeline resources");

        let buffer_size = width as u64 * height as u64 * 4;
        let device = &self.context.device;

        self.resources.output_buffer = Some(device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("filter_output_buffer"),
            size: buffer_size,
            usage: wgpu::BufferUsages::STORAGE | wgpu::BufferUsages::COPY_SRC,
            mapped_at_creation: false,
        }));

        self.resources.staging_buffer = Some(device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("filter_staging_buffer"),
            size: buffer_size,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        }));

        self.resources.dims.update(width, height);
    }

    fn upload_texture(&self, image: &ImageBuffer) -> Result<wgpu::Texture, FilterError> {
        upload_bgra_texture(&self.context, image, "filter_frame_texture")
    }
}

impl ComputeBackend for WgpuBackend {
    type Pipeline = WgpuPipeline;

    fn name(&self) -> &'static str {
        "wgpu"
    }

    fn make_pipeline(&self, kernel: &str) -> Result<WgpuPipeline, FilterError> {
        if !super::has_kernel(super::FILTER_KERNELS, kernel) {
            return Err(FilterError::FunctionNotFound(kernel.to_string()));
        }

        let device = &self.context.device;
        let workgroup = self.workgroup_size();
        let source = super::filter_library_source(workgroup.width, workgroup.height);

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("filter_kernels"),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(FilterError::Library(error.to_string()));
        }

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some(kernel),
            layout: Some(&self.pipeline_layout),
            module: &shader,
            entry_point: Some(kernel),
            compilation_options: Default::default(),
            cache: None,
        });
        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(FilterError::Pipeline(error.to_string()));
        }

        Ok(WgpuPipeline {
            kernel: kernel.to_string(),
            pipeline,
            workgroup,
        })
    }

    fn make_texture(&self, image: &ImageBuffer) -> Result<GpuTexture, FilterError> {
        if image.pixel_format() != PixelFormat::Bgra {
            // Not uploadable; a view of the frame is enough for pass-through
            debug!(format = %image.pixel_format(), "Frame kept on the CPU");
            return Ok(GpuTexture::from_image(image.clone()));
        }
        let texture = self.upload_texture(image)?;
        Ok(GpuTexture::with_gpu_texture(image.clone(), texture))
    }

    fn dispatch(
        &mut self,
        pipeline: &WgpuPipeline,
        input: &GpuTexture,
        output: &mut PixelBuffer,
        grid: &DispatchGrid,
    ) -> Result<(), FilterError> {
        let width = grid.width;
        let height = grid.height;
        if output.stride() != width * 4 || output.height() != height {
            return Err(FilterError::TextureCache(format!(
                "output buffer {}x{} (stride {}) does not match grid {}x{}",
                output.width(),
                output.height(),
                output.stride(),
                width,
                height
            )));
        }

        // Textures made by the CPU path have no GPU copy yet
        let uploaded;
        let input_texture = match input.gpu_texture() {
            Some(texture) => texture,
            None => {
                uploaded = self.upload_texture(input.image())?;
                &uploaded
            }
        };

        self.ensure_resources(width, height);

        let device = &self.context.device;
        let queue = &self.context.queue;
        let (Some(output_buffer), Some(staging_buffer)) = (
            self.resources.output_buffer.as_ref(),
            self.resources.staging_buffer.as_ref(),
        ) else {
            return Err(FilterError::TextureCache(
                "filter buffers not allocated".to_string(),
            ));
        };

        let params = FilterParams {
            width,
            height,
            row_pixels: width,
            _padding: 0,
        };
        queue.write_buffer(&self.uniform_buffer, 0, bytemuck::bytes_of(&params));

        let input_view = input_texture.create_view(&wgpu::TextureViewDescriptor::default());

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("filter_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&input_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: output_buffer.as_entire_binding(),
                },
                wgpu::BindGroupEntry {
                    binding: 2,
                    resource: self.uniform_buffer.as_entire_binding(),
                },
            ],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("filter_encoder"),
        });

        {
            let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("filter_compute_pass"),
                timestamp_writes: None,
            });

            compute_pass.set_pipeline(&pipeline.pipeline);
            compute_pass.set_bind_group(0, Some(&bind_group), &[]);
            compute_pass.dispatch_workgroups(grid.groups_x, grid.groups_y, 1);
        }

        let buffer_size = width as u64 * height as u64 * 4;
        encoder.copy_buffer_to_buffer(output_buffer, 0, staging_buffer, 0, buffer_size);

        queue.submit(std::iter::once(encoder.finish()));

        // Completion is awaited here so frames leave the stage in capture order
        let pixels = pollster::block_on(read_buffer_async(device, staging_buffer))?;

        let data = output.data_mut().ok_or_else(|| {
            FilterError::TextureCache("output buffer is not writable".to_string())
        })?;
        data[..pixels.len()].copy_from_slice(&pixels);

        Ok(())
    }
}
