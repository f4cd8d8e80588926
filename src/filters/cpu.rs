// SPDX-License-Identifier: MPL-2.0

//! CPU filter backend (fallback when no GPU adapter is available)
//!
//! Runs the same per-pixel arithmetic as the WGSL kernels, walking the
//! dispatch grid threadgroup by threadgroup with the same bounds check the
//! kernels use. Textures are the buffers themselves, so nothing is copied.

use super::{ComputeBackend, ComputePipeline, DispatchGrid, GpuTexture};
use crate::errors::FilterError;
use crate::media::{ImageBuffer, PixelBuffer, PixelFormat};

/// Threadgroup shape reported by CPU pipelines, matching a 16x16 GPU workgroup
const CPU_EXECUTION_WIDTH: u32 = 16;
const CPU_MAX_THREADS: u32 = 256;

type PixelOp = fn(f32, f32, f32) -> (f32, f32, f32);

/// Look up the CPU implementation of a kernel by entry-point name
fn kernel_op(kernel: &str) -> Option<(&'static str, PixelOp)> {
    match kernel {
        "invert_color" => Some(("invert_color", invert_color as PixelOp)),
        "complementary_color" => Some(("complementary_color", complementary_color as PixelOp)),
        "sepia" => Some(("sepia", sepia as PixelOp)),
        "grey_scale" => Some(("grey_scale", grey_scale as PixelOp)),
        _ => None,
    }
}

fn invert_color(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    (1.0 - r, 1.0 - g, 1.0 - b)
}

fn complementary_color(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let extremes = r.max(g).max(b) + r.min(g).min(b);
    (extremes - r, extremes - g, extremes - b)
}

fn sepia(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    (
        0.393 * r + 0.769 * g + 0.189 * b,
        0.349 * r + 0.686 * g + 0.168 * b,
        0.272 * r + 0.534 * g + 0.131 * b,
    )
}

fn grey_scale(r: f32, g: f32, b: f32) -> (f32, f32, f32) {
    let luma = 0.299 * r + 0.587 * g + 0.114 * b;
    (luma, luma, luma)
}

/// Same rounding as WGSL `pack4x8unorm`
#[inline]
fn to_unorm8(value: f32) -> u8 {
    (value.clamp(0.0, 1.0) * 255.0 + 0.5) as u8
}

/// A CPU "pipeline": the kernel function plus its threadgroup shape
#[derive(Debug, Clone)]
pub struct CpuPipeline {
    kernel: &'static str,
    op: PixelOp,
}

impl ComputePipeline for CpuPipeline {
    fn kernel_name(&self) -> &str {
        self.kernel
    }

    fn thread_execution_width(&self) -> u32 {
        CPU_EXECUTION_WIDTH
    }

    fn max_total_threads_per_threadgroup(&self) -> u32 {
        CPU_MAX_THREADS
    }
}

/// Filter backend running on the calling thread
#[derive(Debug, Default, Clone)]
pub struct CpuBackend;

impl CpuBackend {
    pub fn new() -> Self {
        Self
    }
}

impl ComputeBackend for CpuBackend {
    type Pipeline = CpuPipeline;

    fn name(&self) -> &'static str {
        "cpu"
    }

    fn make_pipeline(&self, kernel: &str) -> Result<CpuPipeline, FilterError> {
        let (kernel, op) =
            kernel_op(kernel).ok_or_else(|| FilterError::FunctionNotFound(kernel.to_string()))?;
        Ok(CpuPipeline { kernel, op })
    }

    fn make_texture(&self, image: &ImageBuffer) -> Result<GpuTexture, FilterError> {
        Ok(GpuTexture::from_image(image.clone()))
    }

    fn dispatch(
        &mut self,
        pipeline: &CpuPipeline,
        input: &GpuTexture,
        output: &mut PixelBuffer,
        grid: &DispatchGrid,
    ) -> Result<(), FilterError> {
        let source = input.image();
        if source.pixel_format() != PixelFormat::Bgra {
            return Err(FilterError::InvalidBufferType(source.pixel_format()));
        }
        if output.width() < grid.width || output.height() < grid.height {
            return Err(FilterError::TextureCache(format!(
                "output {}x{} smaller than grid {}x{}",
                output.width(),
                output.height(),
                grid.width,
                grid.height
            )));
        }

        let in_stride = source.stride() as usize;
        let out_stride = output.stride() as usize;
        let input_data = source.data();
        let output_data = output.data_mut().ok_or_else(|| {
            FilterError::TextureCache("output buffer is not writable".to_string())
        })?;

        let group = grid.threads_per_group;
        for group_y in 0..grid.groups_y {
            for group_x in 0..grid.groups_x {
                for local_y in 0..group.height {
                    let y = group_y * group.height + local_y;
                    if y >= grid.height {
                        break;
                    }
                    for local_x in 0..group.width {
                        let x = group_x * group.width + local_x;
                        if x >= grid.width {
                            break;
                        }

                        let src = y as usize * in_stride + x as usize * 4;
                        let dst = y as usize * out_stride + x as usize * 4;
                        let b = input_data[src] as f32 / 255.0;
                        let g = input_data[src + 1] as f32 / 255.0;
                        let r = input_data[src + 2] as f32 / 255.0;

                        let (r, g, b) = (pipeline.op)(r, g, b);
                        output_data[dst] = to_unorm8(b);
                        output_data[dst + 1] = to_unorm8(g);
                        output_data[dst + 2] = to_unorm8(r);
                        output_data[dst + 3] = input_data[src + 3];
                    }
                }
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::{FilterKind, FilterStage};

    /// 2x1 BGRA frame: one orange pixel, one half-transparent blue pixel
    fn sample_frame() -> ImageBuffer {
        let data = vec![0, 128, 255, 255, 255, 0, 0, 128];
        PixelBuffer::new(2, 1, PixelFormat::Bgra, 8, data).freeze()
    }

    #[test]
    fn test_unknown_kernel() {
        let err = CpuBackend::new().make_pipeline("blur").unwrap_err();
        assert_eq!(err, FilterError::FunctionNotFound("blur".to_string()));
    }

    #[test]
    fn test_invert() {
        let mut stage = FilterStage::new(CpuBackend::new());
        let output = stage.apply(&sample_frame(), FilterKind::InvertColor).unwrap();
        assert_eq!(output.image.pixel(0, 0), [255, 127, 0, 255]);
        assert_eq!(output.image.pixel(1, 0), [0, 255, 255, 128]);
    }

    #[test]
    fn test_grey_scale_channels_equal() {
        let mut stage = FilterStage::new(CpuBackend::new());
        let output = stage.apply(&sample_frame(), FilterKind::GreyScale).unwrap();
        let [b, g, r, a] = output.image.pixel(0, 0);
        assert_eq!(b, g);
        assert_eq!(g, r);
        assert_eq!(a, 255);
        // 0.299 * 1.0 + 0.587 * (128 / 255) = 0.5937
        assert_eq!(r, 151);
    }

    #[test]
    fn test_complementary_keeps_extremes() {
        let mut stage = FilterStage::new(CpuBackend::new());
        let output = stage
            .apply(&sample_frame(), FilterKind::ComplementaryColor)
            .unwrap();
        // Pure blue: max + min = 1, so blue becomes 0 and red/green become 1
        assert_eq!(output.image.pixel(1, 0), [0, 255, 255, 128]);
    }

    #[test]
    fn test_sepia_saturates() {
        let white = PixelBuffer::new(1, 1, PixelFormat::Bgra, 4, vec![255; 4]).freeze();
        let mut stage = FilterStage::new(CpuBackend::new());
        let output = stage.apply(&white, FilterKind::Sepia).unwrap();
        // Red and green rows sum above 1.0 and clamp; blue row sums to 0.937
        assert_eq!(output.image.pixel(0, 0), [239, 255, 255, 255]);
    }

    #[test]
    fn test_padded_input_stride() {
        let mut data = vec![0u8; 2 * 12];
        data[12..16].copy_from_slice(&[10, 20, 30, 255]);
        let frame = PixelBuffer::new(2, 2, PixelFormat::Bgra, 12, data).freeze();

        let mut stage = FilterStage::new(CpuBackend::new());
        let output = stage.apply(&frame, FilterKind::InvertColor).unwrap();
        assert_eq!(output.image.stride(), 8);
        assert_eq!(output.image.pixel(0, 1), [245, 235, 225, 255]);
    }
}
