// SPDX-License-Identifier: GPL-3.0-only

//! Per-frame colour filters
//!
//! [`FilterStage`] turns one input [`ImageBuffer`] into one output texture.
//! It owns a compute pipeline for the active [`FilterKind`] and a
//! [`PixelBufferPool`] for output buffers, both built lazily and both owned
//! only by the frame-delivery thread.
//!
//! ```text
//! FilterKind::None ──────────────▶ texture over the input buffer
//! FilterKind::Sepia ─▶ pipeline ─▶ pool buffer ─▶ dispatch ─▶ texture
//! ```
//!
//! The compute work is behind [`ComputeBackend`]: [`WgpuBackend`] runs the WGSL
//! kernels on the GPU, [`CpuBackend`] runs the same arithmetic on the CPU when
//! no adapter is available.

pub mod cpu;

pub use crate::shaders::WgpuBackend;
pub use cpu::CpuBackend;

use crate::errors::FilterError;
use crate::gpu::{GpuContext, wgpu};
use crate::media::{FormatDescription, ImageBuffer, PixelBuffer, PixelBufferPool, PoolConfig};
use crate::shaders::compute_dispatch_size;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The fixed set of per-frame transforms
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum FilterKind {
    /// Pass-through
    #[default]
    None,
    InvertColor,
    ComplementaryColor,
    Sepia,
    GreyScale,
}

impl FilterKind {
    /// All filters in cycling order
    pub const ALL: [FilterKind; 5] = [
        FilterKind::None,
        FilterKind::Sepia,
        FilterKind::GreyScale,
        FilterKind::InvertColor,
        FilterKind::ComplementaryColor,
    ];

    /// Stable numeric code, also the shell's number key
    pub fn code(&self) -> u8 {
        match self {
            FilterKind::None => 0,
            FilterKind::Sepia => 1,
            FilterKind::GreyScale => 2,
            FilterKind::InvertColor => 3,
            FilterKind::ComplementaryColor => 4,
        }
    }

    pub fn from_code(code: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|kind| kind.code() == code)
    }

    /// Compute entry point implementing this filter; `None` has none
    pub fn kernel_name(&self) -> Option<&'static str> {
        match self {
            FilterKind::None => None,
            FilterKind::InvertColor => Some("invert_color"),
            FilterKind::ComplementaryColor => Some("complementary_color"),
            FilterKind::Sepia => Some("sepia"),
            FilterKind::GreyScale => Some("grey_scale"),
        }
    }

    pub fn display_name(&self) -> &'static str {
        match self {
            FilterKind::None => "None",
            FilterKind::InvertColor => "Invert",
            FilterKind::ComplementaryColor => "Complementary",
            FilterKind::Sepia => "Sepia",
            FilterKind::GreyScale => "Grey",
        }
    }

    pub fn next(&self) -> Self {
        let index = Self::ALL.iter().position(|k| k == self).unwrap_or(0);
        Self::ALL[(index + 1) % Self::ALL.len()]
    }

    pub fn previous(&self) -> Self {
        let index = Self::ALL.iter().position(|k| k == self).unwrap_or(0);
        Self::ALL[(index + Self::ALL.len() - 1) % Self::ALL.len()]
    }
}

impl fmt::Display for FilterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.display_name())
    }
}

impl FromStr for FilterKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().replace(['-', '_', ' '], "").as_str() {
            "none" | "off" => Ok(FilterKind::None),
            "invert" | "invertcolor" => Ok(FilterKind::InvertColor),
            "complementary" | "complementarycolor" => Ok(FilterKind::ComplementaryColor),
            "sepia" => Ok(FilterKind::Sepia),
            "grey" | "gray" | "greyscale" | "grayscale" => Ok(FilterKind::GreyScale),
            other => match other.parse::<u8>().ok().and_then(FilterKind::from_code) {
                Some(kind) => Ok(kind),
                None => Err(format!("unknown filter '{}'", s)),
            },
        }
    }
}

/// A device-side view over an [`ImageBuffer`]
///
/// The CPU backend's textures are the buffer itself. GPU textures carry the
/// uploaded copy alongside the buffer they were made from.
#[derive(Clone)]
pub struct GpuTexture {
    image: ImageBuffer,
    texture: Option<Arc<wgpu::Texture>>,
}

impl GpuTexture {
    /// Zero-copy view: the texture is the buffer memory
    pub fn from_image(image: ImageBuffer) -> Self {
        Self {
            image,
            texture: None,
        }
    }

    pub fn with_gpu_texture(image: ImageBuffer, texture: wgpu::Texture) -> Self {
        Self {
            image,
            texture: Some(Arc::new(texture)),
        }
    }

    pub fn image(&self) -> &ImageBuffer {
        &self.image
    }

    pub fn gpu_texture(&self) -> Option<&wgpu::Texture> {
        self.texture.as_deref()
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

impl fmt::Debug for GpuTexture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GpuTexture")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("gpu_resident", &self.texture.is_some())
            .finish()
    }
}

/// Result of filtering one frame
#[derive(Debug, Clone)]
pub struct FilterOutput {
    /// Texture for the display path
    pub texture: GpuTexture,
    /// Buffer for the recording path; the input itself on pass-through
    pub image: ImageBuffer,
}

/// Threads per threadgroup
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ThreadgroupSize {
    pub width: u32,
    pub height: u32,
}

impl ThreadgroupSize {
    /// Execution width across, as many rows as the thread budget allows
    pub fn for_limits(execution_width: u32, max_total_threads: u32) -> Self {
        let width = execution_width.clamp(1, max_total_threads.max(1));
        Self {
            width,
            height: (max_total_threads / width).max(1),
        }
    }
}

/// Threadgroup layout covering a whole frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchGrid {
    pub width: u32,
    pub height: u32,
    pub threads_per_group: ThreadgroupSize,
    pub groups_x: u32,
    pub groups_y: u32,
}

impl DispatchGrid {
    pub fn covering<P: ComputePipeline + ?Sized>(width: u32, height: u32, pipeline: &P) -> Self {
        let threads_per_group = ThreadgroupSize::for_limits(
            pipeline.thread_execution_width(),
            pipeline.max_total_threads_per_threadgroup(),
        );
        Self {
            width,
            height,
            threads_per_group,
            groups_x: compute_dispatch_size(width, threads_per_group.width),
            groups_y: compute_dispatch_size(height, threads_per_group.height),
        }
    }
}

/// A compiled kernel, as reported by its backend
pub trait ComputePipeline {
    fn kernel_name(&self) -> &str;

    /// Preferred threadgroup width
    fn thread_execution_width(&self) -> u32;

    fn max_total_threads_per_threadgroup(&self) -> u32;
}

/// Device that can compile and run the filter kernels
pub trait ComputeBackend {
    type Pipeline: ComputePipeline;

    fn name(&self) -> &'static str;

    /// Compile the kernel named `kernel`
    fn make_pipeline(&self, kernel: &str) -> Result<Self::Pipeline, FilterError>;

    /// Wrap a buffer in a texture view
    fn make_texture(&self, image: &ImageBuffer) -> Result<GpuTexture, FilterError>;

    /// Run `pipeline` over `input`, writing into `output`, and wait for completion
    fn dispatch(
        &mut self,
        pipeline: &Self::Pipeline,
        input: &GpuTexture,
        output: &mut PixelBuffer,
        grid: &DispatchGrid,
    ) -> Result<(), FilterError>;
}

/// Filter stage with a lazily built pipeline and output pool
pub struct FilterStage<B: ComputeBackend> {
    backend: B,
    filter: FilterKind,
    pipeline: Option<B::Pipeline>,
    pipeline_dirty: bool,
    pipeline_builds: u64,
    pool: Option<PixelBufferPool>,
    pool_min: usize,
    pool_max: usize,
}

impl<B: ComputeBackend> FilterStage<B> {
    pub fn new(backend: B) -> Self {
        let defaults = PoolConfig::default();
        Self::with_pool_limits(backend, defaults.min_buffer_count, defaults.max_buffer_count)
    }

    pub fn with_pool_limits(backend: B, pool_min: usize, pool_max: usize) -> Self {
        Self {
            backend,
            filter: FilterKind::None,
            pipeline: None,
            pipeline_dirty: true,
            pipeline_builds: 0,
            pool: None,
            pool_min,
            pool_max,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn filter(&self) -> FilterKind {
        self.filter
    }

    /// Select the filter for subsequent frames; a change invalidates the pipeline
    pub fn set_filter(&mut self, filter: FilterKind) {
        if filter != self.filter {
            debug!(from = %self.filter, to = %filter, "Filter changed");
            self.filter = filter;
            self.invalidate_pipeline();
        }
    }

    /// Drop the cached pipeline; the next filtered frame rebuilds it
    pub fn invalidate_pipeline(&mut self) {
        self.pipeline = None;
        self.pipeline_dirty = true;
    }

    /// Whether the next filtered frame has to build a pipeline first
    pub fn needs_pipeline_rebuild(&self) -> bool {
        self.pipeline_dirty || self.pipeline.is_none()
    }

    /// Number of pipelines built over the stage's lifetime
    pub fn pipeline_builds(&self) -> u64 {
        self.pipeline_builds
    }

    /// Build the pipeline for the active filter if it is missing or stale
    pub fn prepare_pipeline(&mut self) -> Result<&B::Pipeline, FilterError> {
        let Some(kernel) = self.filter.kernel_name() else {
            return Err(FilterError::FunctionNotFound(format!(
                "{} has no kernel",
                self.filter
            )));
        };

        if self.needs_pipeline_rebuild() {
            let pipeline = self.backend.make_pipeline(kernel)?;
            self.pipeline_builds += 1;
            info!(
                kernel,
                backend = self.backend.name(),
                execution_width = pipeline.thread_execution_width(),
                max_threads = pipeline.max_total_threads_per_threadgroup(),
                "Built compute pipeline"
            );
            self.pipeline = Some(pipeline);
            self.pipeline_dirty = false;
        }

        self.pipeline
            .as_ref()
            .ok_or_else(|| FilterError::Pipeline(format!("no pipeline for {}", kernel)))
    }

    /// Make sure the output pool fits frames described by `desc`
    pub fn prepare_pool(
        &mut self,
        desc: &FormatDescription,
    ) -> Result<&PixelBufferPool, FilterError> {
        let stale = self.pool.as_ref().is_none_or(|pool| !pool.matches(desc));
        if stale {
            if self.pool.is_some() {
                info!(
                    width = desc.width,
                    height = desc.height,
                    "Frame format changed, rebuilding output pool"
                );
            }
            self.pool = None;
            let config = PoolConfig::from_format(desc, self.pool_min, self.pool_max);
            self.pool = Some(PixelBufferPool::new(config)?);
        }

        self.pool.as_ref().ok_or_else(|| {
            FilterError::PixelBufferAllocation("output pool unavailable".to_string())
        })
    }

    pub fn pool(&self) -> Option<&PixelBufferPool> {
        self.pool.as_ref()
    }

    /// Filter one frame
    ///
    /// With [`FilterKind::None`] the returned buffer is `frame` itself and no
    /// output buffer is taken from the pool.
    pub fn apply(
        &mut self,
        frame: &ImageBuffer,
        filter: FilterKind,
    ) -> Result<FilterOutput, FilterError> {
        self.set_filter(filter);

        if filter == FilterKind::None {
            return Ok(FilterOutput {
                texture: self.backend.make_texture(frame)?,
                image: frame.clone(),
            });
        }

        let desc = frame.format_description();
        self.prepare_pipeline()?;
        self.prepare_pool(&desc)?;

        let (Some(pipeline), Some(pool)) = (self.pipeline.as_ref(), self.pool.as_ref()) else {
            return Err(FilterError::Pipeline("filter resources missing".to_string()));
        };

        let mut output = pool.create_pixel_buffer()?;
        let input = self.backend.make_texture(frame)?;
        let grid = DispatchGrid::covering(desc.width, desc.height, pipeline);
        self.backend.dispatch(pipeline, &input, &mut output, &grid)?;

        let image = output.freeze();
        let texture = self.backend.make_texture(&image)?;
        Ok(FilterOutput { texture, image })
    }
}

/// Object-safe view of a [`FilterStage`], used where the backend is chosen at runtime
pub trait FrameFilter: Send {
    fn apply(
        &mut self,
        frame: &ImageBuffer,
        filter: FilterKind,
    ) -> Result<FilterOutput, FilterError>;

    fn pipeline_builds(&self) -> u64;

    fn backend_name(&self) -> &'static str;
}

impl<B> FrameFilter for FilterStage<B>
where
    B: ComputeBackend + Send,
    B::Pipeline: Send,
{
    fn apply(
        &mut self,
        frame: &ImageBuffer,
        filter: FilterKind,
    ) -> Result<FilterOutput, FilterError> {
        FilterStage::apply(self, frame, filter)
    }

    fn pipeline_builds(&self) -> u64 {
        FilterStage::pipeline_builds(self)
    }

    fn backend_name(&self) -> &'static str {
        self.backend.name()
    }
}

/// Which compute backend to use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ComputeBackendKind {
    /// GPU when an adapter is available, CPU otherwise
    #[default]
    Auto,
    Gpu,
    Cpu,
}

/// Build a filter stage for `kind`
///
/// `gpu` is the shared device, if one could be created. Asking for
/// [`ComputeBackendKind::Gpu`] without one is a device error.
pub fn create_frame_filter(
    kind: ComputeBackendKind,
    gpu: Option<&GpuContext>,
    pool_min: usize,
    pool_max: usize,
) -> Result<Box<dyn FrameFilter>, FilterError> {
    match (kind, gpu) {
        (ComputeBackendKind::Cpu, _) => Ok(Box::new(FilterStage::with_pool_limits(
            CpuBackend::new(),
            pool_min,
            pool_max,
        ))),
        (ComputeBackendKind::Gpu | ComputeBackendKind::Auto, Some(context)) => {
            Ok(Box::new(FilterStage::with_pool_limits(
                WgpuBackend::new(context.clone())?,
                pool_min,
                pool_max,
            )))
        }
        (ComputeBackendKind::Gpu, None) => {
            Err(FilterError::Device("no GPU adapter available".to_string()))
        }
        (ComputeBackendKind::Auto, None) => {
            warn!("No GPU available, filtering on the CPU");
            Ok(Box::new(FilterStage::with_pool_limits(
                CpuBackend::new(),
                pool_min,
                pool_max,
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::PixelFormat;
    use std::cell::Cell;

    struct CountingPipeline {
        kernel: String,
    }

    impl ComputePipeline for CountingPipeline {
        fn kernel_name(&self) -> &str {
            &self.kernel
        }

        fn thread_execution_width(&self) -> u32 {
            8
        }

        fn max_total_threads_per_threadgroup(&self) -> u32 {
            64
        }
    }

    #[derive(Default)]
    struct CountingBackend {
        dispatches: Cell<u32>,
        fail_pipeline: Cell<bool>,
        last_grid: Cell<Option<DispatchGrid>>,
    }

    impl ComputeBackend for CountingBackend {
        type Pipeline = CountingPipeline;

        fn name(&self) -> &'static str {
            "counting"
        }

        fn make_pipeline(&self, kernel: &str) -> Result<CountingPipeline, FilterError> {
            if self.fail_pipeline.get() {
                return Err(FilterError::Pipeline("refused".to_string()));
            }
            Ok(CountingPipeline {
                kernel: kernel.to_string(),
            })
        }

        fn make_texture(&self, image: &ImageBuffer) -> Result<GpuTexture, FilterError> {
            Ok(GpuTexture::from_image(image.clone()))
        }

        fn dispatch(
            &mut self,
            _pipeline: &CountingPipeline,
            _input: &GpuTexture,
            output: &mut PixelBuffer,
            grid: &DispatchGrid,
        ) -> Result<(), FilterError> {
            self.dispatches.set(self.dispatches.get() + 1);
            self.last_grid.set(Some(*grid));
            if let Some(data) = output.data_mut() {
                data.fill(0xAB);
            }
            Ok(())
        }
    }

    fn frame(width: u32, height: u32) -> ImageBuffer {
        PixelBuffer::zeroed(width, height, PixelFormat::Bgra).freeze()
    }

    #[test]
    fn test_filter_kind_codes_round_trip() {
        for kind in FilterKind::ALL {
            assert_eq!(FilterKind::from_code(kind.code()), Some(kind));
        }
        assert_eq!(FilterKind::from_code(9), None);
    }

    #[test]
    fn test_filter_kind_parsing() {
        assert_eq!("sepia".parse::<FilterKind>(), Ok(FilterKind::Sepia));
        assert_eq!("Gray-Scale".parse::<FilterKind>(), Ok(FilterKind::GreyScale));
        assert_eq!("3".parse::<FilterKind>(), Ok(FilterKind::InvertColor));
        assert!("blur".parse::<FilterKind>().is_err());
    }

    #[test]
    fn test_filter_cycle() {
        let mut kind = FilterKind::None;
        for _ in 0..FilterKind::ALL.len() {
            kind = kind.next();
        }
        assert_eq!(kind, FilterKind::None);
        assert_eq!(FilterKind::None.previous(), FilterKind::ComplementaryColor);
    }

    #[test]
    fn test_threadgroup_size_for_limits() {
        assert_eq!(
            ThreadgroupSize::for_limits(32, 1024),
            ThreadgroupSize {
                width: 32,
                height: 32
            }
        );
        assert_eq!(
            ThreadgroupSize::for_limits(0, 256),
            ThreadgroupSize {
                width: 1,
                height: 256
            }
        );
    }

    #[test]
    fn test_pass_through_returns_input() {
        let mut stage = FilterStage::new(CountingBackend::default());
        let input = frame(4, 4);

        let output = stage.apply(&input, FilterKind::None).unwrap();
        assert!(ImageBuffer::ptr_eq(&output.image, &input));
        assert!(stage.pool().is_none());
        assert_eq!(stage.pipeline_builds(), 0);
        assert_eq!(stage.backend().dispatches.get(), 0);
    }

    #[test]
    fn test_filtered_output_is_distinct() {
        let mut stage = FilterStage::new(CountingBackend::default());
        let input = frame(20, 10);

        let output = stage.apply(&input, FilterKind::Sepia).unwrap();
        assert!(!ImageBuffer::ptr_eq(&output.image, &input));
        assert_eq!(output.image.width(), 20);
        assert_eq!(output.image.height(), 10);
        assert_eq!(output.image.data()[0], 0xAB);

        let grid = stage.backend().last_grid.get().unwrap();
        assert_eq!(grid.threads_per_group.width, 8);
        assert_eq!(grid.threads_per_group.height, 8);
        assert_eq!((grid.groups_x, grid.groups_y), (3, 2));
    }

    #[test]
    fn test_pipeline_reused_until_filter_changes() {
        let mut stage = FilterStage::new(CountingBackend::default());
        let input = frame(4, 4);

        stage.apply(&input, FilterKind::Sepia).unwrap();
        stage.apply(&input, FilterKind::Sepia).unwrap();
        assert_eq!(stage.pipeline_builds(), 1);

        stage.apply(&input, FilterKind::GreyScale).unwrap();
        assert_eq!(stage.pipeline_builds(), 2);
    }

    #[test]
    fn test_invalidation_and_rebuild_are_separate_steps() {
        let mut stage = FilterStage::new(CountingBackend::default());
        stage.set_filter(FilterKind::InvertColor);
        assert!(stage.needs_pipeline_rebuild());

        stage.prepare_pipeline().unwrap();
        assert!(!stage.needs_pipeline_rebuild());

        stage.invalidate_pipeline();
        assert!(stage.needs_pipeline_rebuild());
        assert_eq!(stage.pipeline_builds(), 1);
    }

    #[test]
    fn test_pipeline_failure_is_reported_then_retried() {
        let mut stage = FilterStage::new(CountingBackend::default());
        let input = frame(4, 4);
        stage.backend().fail_pipeline.set(true);

        let err = stage.apply(&input, FilterKind::Sepia).unwrap_err();
        assert!(matches!(err, FilterError::Pipeline(_)));
        assert_eq!(stage.pipeline_builds(), 0);

        stage.backend().fail_pipeline.set(false);
        assert!(stage.apply(&input, FilterKind::Sepia).is_ok());
        assert_eq!(stage.pipeline_builds(), 1);
    }

    #[test]
    fn test_pool_rebuilt_on_dimension_change() {
        let mut stage = FilterStage::new(CountingBackend::default());
        stage.apply(&frame(4, 4), FilterKind::Sepia).unwrap();
        assert_eq!(stage.pool().unwrap().config().width, 4);

        let output = stage.apply(&frame(8, 2), FilterKind::Sepia).unwrap();
        assert_eq!(stage.pool().unwrap().config().width, 8);
        assert_eq!(output.image.width(), 8);
        assert_eq!(stage.pipeline_builds(), 1);
    }

    #[test]
    fn test_unsupported_input_format() {
        let mut stage = FilterStage::new(CountingBackend::default());
        let nv12 = PixelBuffer::new(4, 4, PixelFormat::Nv12, 4, vec![0; 24]).freeze();

        let err = stage.apply(&nv12, FilterKind::Sepia).unwrap_err();
        assert_eq!(err, FilterError::InvalidBufferType(PixelFormat::Nv12));

        // Pass-through does not care about the format
        assert!(stage.apply(&nv12, FilterKind::None).is_ok());
    }

    #[test]
    fn test_create_cpu_filter() {
        let filter = create_frame_filter(ComputeBackendKind::Cpu, None, 3, 8).unwrap();
        assert_eq!(filter.backend_name(), "cpu");

        let err = create_frame_filter(ComputeBackendKind::Gpu, None, 3, 8).err();
        assert!(matches!(err, Some(FilterError::Device(_))));
    }
}
