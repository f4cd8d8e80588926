// SPDX-License-Identifier: GPL-3.0-only

//! wgpu display renderer
//!
//! One textured quad drawn per frame. The quad's texture coordinates carry the
//! display rotation, so the target is sized to the rotated picture and the
//! shader stays a plain sample.

use super::{DisplayConfig, DisplaySink, FrameSlot};
use crate::constants::timing;
use crate::errors::FilterError;
use crate::filters::GpuTexture;
use crate::gpu::{GpuContext, upload_bgra_texture, wgpu};
use crate::media::PixelBuffer;
use crate::shaders::{CachedDimensions, DISPLAY_SHADER, read_buffer_async};
use tracing::{debug, info};

/// Quad vertex: clip-space position and texture coordinate
#[repr(C)]
#[derive(Debug, Copy, Clone, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vertex {
    pub position: [f32; 2],
    pub tex_coord: [f32; 2],
}

impl Vertex {
    const ATTRIBUTES: [wgpu::VertexAttribute; 2] =
        wgpu::vertex_attr_array![0 => Float32x2, 1 => Float32x2];

    fn layout() -> wgpu::VertexBufferLayout<'static> {
        wgpu::VertexBufferLayout {
            array_stride: std::mem::size_of::<Vertex>() as wgpu::BufferAddress,
            step_mode: wgpu::VertexStepMode::Vertex,
            attributes: &Self::ATTRIBUTES,
        }
    }
}

/// Two triangles covering the target, sampling the source rotated clockwise
pub fn quad_vertices(orientation_degrees: u32) -> [Vertex; 6] {
    const CORNERS: [[f32; 2]; 6] = [
        [-1.0, -1.0],
        [1.0, -1.0],
        [1.0, 1.0],
        [-1.0, -1.0],
        [1.0, 1.0],
        [-1.0, 1.0],
    ];

    CORNERS.map(|[x, y]| {
        // Target coordinates with the origin at the top-left
        let u = (x + 1.0) / 2.0;
        let v = (1.0 - y) / 2.0;
        let tex_coord = match orientation_degrees % 360 {
            90 => [v, 1.0 - u],
            180 => [1.0 - u, 1.0 - v],
            270 => [1.0 - v, u],
            _ => [u, v],
        };
        Vertex {
            position: [x, y],
            tex_coord,
        }
    })
}

/// Target size for a `width`x`height` source after rotation
pub fn rotated_extent(width: u32, height: u32, orientation_degrees: u32) -> (u32, u32) {
    match orientation_degrees % 360 {
        90 | 270 => (height, width),
        _ => (width, height),
    }
}

/// Render targets sized for the current output
struct TargetResources {
    dims: CachedDimensions,
    color: wgpu::Texture,
    depth: wgpu::Texture,
    readback: wgpu::Buffer,
    padded_row: u32,
}

/// Render pipeline that presents frames into an offscreen target
pub struct WgpuDisplay {
    context: GpuContext,
    config: DisplayConfig,
    pipeline: wgpu::RenderPipeline,
    bind_group_layout: wgpu::BindGroupLayout,
    sampler: wgpu::Sampler,
    vertex_buffer: wgpu::Buffer,
    targets: Option<TargetResources>,
    slot: Option<FrameSlot>,
    presented: u64,
}

impl WgpuDisplay {
    /// Build the display pipeline
    ///
    /// When `slot` is set every rendered frame is read back and published
    /// there.
    pub fn new(
        context: GpuContext,
        config: DisplayConfig,
        slot: Option<FrameSlot>,
    ) -> Result<Self, FilterError> {
        info!(
            color_format = ?config.color_format,
            orientation = config.orientation_degrees,
            readback = slot.is_some(),
            "Initializing display renderer"
        );

        let device = &context.device;

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("display_shader"),
            source: wgpu::ShaderSource::Wgsl(DISPLAY_SHADER.into()),
        });
        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(FilterError::Library(error.to_string()));
        }

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("display_bind_group_layout"),
            entries: &[
                // Frame texture
                wgpu::BindGroupLayoutEntry {
                    binding: 0,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Texture {
                        sample_type: wgpu::TextureSampleType::Float { filterable: true },
                        view_dimension: wgpu::TextureViewDimension::D2,
                        multisampled: false,
                    },
                    count: None,
                },
                // Sampler
                wgpu::BindGroupLayoutEntry {
                    binding: 1,
                    visibility: wgpu::ShaderStages::FRAGMENT,
                    ty: wgpu::BindingType::Sampler(wgpu::SamplerBindingType::Filtering),
                    count: None,
                },
            ],
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("display_pipeline_layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        device.push_error_scope(wgpu::ErrorFilter::Validation);
        let pipeline = device.create_render_pipeline(&wgpu::RenderPipelineDescriptor {
            label: Some("display_pipeline"),
            layout: Some(&pipeline_layout),
            vertex: wgpu::VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[Vertex::layout()],
                compilation_options: Default::default(),
            },
            primitive: wgpu::PrimitiveState::default(),
            depth_stencil: Some(wgpu::DepthStencilState {
                format: DisplayConfig::DEPTH_FORMAT,
                depth_write_enabled: true,
                depth_compare: wgpu::CompareFunction::Less,
                stencil: wgpu::StencilState::default(),
                bias: wgpu::DepthBiasState::default(),
            }),
            multisample: wgpu::MultisampleState {
                count: 1,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            fragment: Some(wgpu::FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: config.color_format.texture_format(),
                    blend: None,
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            multiview: None,
            cache: None,
        });
        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(FilterError::Pipeline(error.to_string()));
        }

        // Camera pixels map one to one onto the target
        let sampler = device.create_sampler(&wgpu::SamplerDescriptor {
            label: Some("display_sampler"),
            address_mode_u: wgpu::AddressMode::ClampToEdge,
            address_mode_v: wgpu::AddressMode::ClampToEdge,
            address_mode_w: wgpu::AddressMode::ClampToEdge,
            mag_filter: wgpu::FilterMode::Nearest,
            min_filter: wgpu::FilterMode::Nearest,
            mipmap_filter: wgpu::FilterMode::Nearest,
            ..Default::default()
        });

        let vertices = quad_vertices(config.orientation_degrees);
        let vertex_buffer = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("display_vertex_buffer"),
            size: std::mem::size_of_val(&vertices) as u64,
            usage: wgpu::BufferUsages::VERTEX | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        context
            .queue
            .write_buffer(&vertex_buffer, 0, bytemuck::cast_slice(&vertices));

        Ok(Self {
            context,
            config,
            pipeline,
            bind_group_layout,
            sampler,
            vertex_buffer,
            targets: None,
            slot,
            presented: 0,
        })
    }

    pub fn config(&self) -> &DisplayConfig {
        &self.config
    }

    /// Frames drawn so far
    pub fn presented(&self) -> u64 {
        self.presented
    }

    fn ensure_targets(&mut self, width: u32, height: u32) {
        let stale = self
            .targets
            .as_ref()
            .is_none_or(|t| t.dims.needs_update(width, height));

        if !stale {
            return;
        }

        debug!(width, height, "Allocating display targets");
        let device = &self.context.device;
        let size = wgpu::Extent3d {
            width,
            height,
            depth_or_array_layers: 1,
        };

        let color = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("display_color_target"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: self.config.color_format.texture_format(),
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });

        let depth = device.create_texture(&wgpu::TextureDescriptor {
            label: Some("display_depth_target"),
            size,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: DisplayConfig::DEPTH_FORMAT,
            usage: wgpu::TextureUsages::RENDER_ATTACHMENT,
            view_formats: &[],
        });

        let padded_row = (width * 4).next_multiple_of(wgpu::COPY_BYTES_PER_ROW_ALIGNMENT);
        let readback = device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("display_readback_buffer"),
            size: padded_row as u64 * height as u64,
            usage: wgpu::BufferUsages::COPY_DST | wgpu::BufferUsages::MAP_READ,
            mapped_at_creation: false,
        });

        self.targets = Some(TargetResources {
            dims: CachedDimensions::new(width, height),
            color,
            depth,
            readback,
            padded_row,
        });
    }
}

impl DisplaySink for WgpuDisplay {
    fn present(&mut self, texture: &GpuTexture) -> Result<(), FilterError> {
        let uploaded;
        let source = match texture.gpu_texture() {
            Some(source) => source,
            None => {
                uploaded = upload_bgra_texture(&self.context, texture.image(), "display_frame_texture")?;
                &uploaded
            }
        };

        let (width, height) = rotated_extent(
            texture.width(),
            texture.height(),
            self.config.orientation_degrees,
        );
        if width == 0 || height == 0 {
            return Err(FilterError::Texture("cannot present an empty frame".to_string()));
        }

        let clear_color = self.config.clear_color();
        let readback = self.slot.is_some();
        self.ensure_targets(width, height);
        let Some(targets) = self.targets.as_ref() else {
            return Err(FilterError::Texture("display targets missing".to_string()));
        };

        let device = &self.context.device;
        let source_view = source.create_view(&wgpu::TextureViewDescriptor::default());
        let color_view = targets.color.create_view(&wgpu::TextureViewDescriptor::default());
        let depth_view = targets.depth.create_view(&wgpu::TextureViewDescriptor::default());

        let bind_group = device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some("display_bind_group"),
            layout: &self.bind_group_layout,
            entries: &[
                wgpu::BindGroupEntry {
                    binding: 0,
                    resource: wgpu::BindingResource::TextureView(&source_view),
                },
                wgpu::BindGroupEntry {
                    binding: 1,
                    resource: wgpu::BindingResource::Sampler(&self.sampler),
                },
            ],
        });

        let mut encoder = device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("display_encoder"),
        });

        {
            let mut render_pass = encoder.begin_render_pass(&wgpu::RenderPassDescriptor {
                label: Some("display_render_pass"),
                color_attachments: &[Some(wgpu::RenderPassColorAttachment {
                    view: &color_view,
                    depth_slice: None,
                    resolve_target: None,
                    ops: wgpu::Operations {
                        load: wgpu::LoadOp::Clear(clear_color),
                        store: wgpu::StoreOp::Store,
                    },
                })],
                depth_stencil_attachment: Some(wgpu::RenderPassDepthStencilAttachment {
                    view: &depth_view,
                    depth_ops: Some(wgpu::Operations {
                        load: wgpu::LoadOp::Clear(1.0),
                        store: wgpu::StoreOp::Discard,
                    }),
                    stencil_ops: None,
                }),
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            render_pass.set_pipeline(&self.pipeline);
            render_pass.set_bind_group(0, Some(&bind_group), &[]);
            render_pass.set_vertex_buffer(0, self.vertex_buffer.slice(..));
            render_pass.draw(0..6, 0..1);
        }

        if readback {
            encoder.copy_texture_to_buffer(
                wgpu::TexelCopyTextureInfo {
                    texture: &targets.color,
                    mip_level: 0,
                    origin: wgpu::Origin3d::ZERO,
                    aspect: wgpu::TextureAspect::All,
                },
                wgpu::TexelCopyBufferInfo {
                    buffer: &targets.readback,
                    layout: wgpu::TexelCopyBufferLayout {
                        offset: 0,
                        bytes_per_row: Some(targets.padded_row),
                        rows_per_image: Some(height),
                    },
                },
                wgpu::Extent3d {
                    width,
                    height,
                    depth_or_array_layers: 1,
                },
            );
        }

        self.context.queue.submit(std::iter::once(encoder.finish()));

        if let Some(slot) = &self.slot {
            let pixels = pollster::block_on(read_buffer_async(device, &targets.readback))?;
            let rendered = PixelBuffer::new(
                width,
                height,
                self.config.color_format.pixel_format(),
                targets.padded_row,
                pixels,
            );
            slot.publish(rendered.freeze());
        }

        self.presented += 1;
        if self.presented % timing::FRAME_LOG_INTERVAL == 0 {
            debug!(frames = self.presented, width, height, "Display presenting");
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "wgpu"
    }
}
