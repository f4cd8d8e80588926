// SPDX-License-Identifier: GPL-3.0-only

//! Production wiring of the capture pipeline from a [`Config`]

use super::controller::{CaptureController, CaptureServices, ControllerSettings};
use super::observer::CameraObserver;
use super::router::{FilterSelection, FrameRouter};
use crate::backends::SystemCameraPermissions;
use crate::backends::camera::{GstCaptureSession, GstDeviceDiscovery};
use crate::config::Config;
use crate::display::{DisplaySink, FrameSlot, LatestFrameSink, WgpuDisplay};
use crate::errors::AppError;
use crate::filters::{ComputeBackendKind, create_frame_filter};
use crate::gpu::{self, GpuContext};
use crate::pipelines::video::{GstWriterFactory, Recorder};
use crate::storage::VideosLibrary;
use std::sync::Arc;
use tracing::{info, warn};

/// Open the shared GPU device unless the CPU backend was requested
pub fn open_gpu(kind: ComputeBackendKind) -> Option<GpuContext> {
    if kind == ComputeBackendKind::Cpu {
        return None;
    }
    match gpu::create_device_blocking("filter-camera") {
        Ok(context) => Some(context),
        Err(e) => {
            warn!(error = %e, "No GPU device");
            None
        }
    }
}

/// Display for the shell: rendered on the GPU when possible
pub fn build_display(config: &Config, gpu: Option<&GpuContext>, slot: FrameSlot) -> Box<dyn DisplaySink> {
    if let Some(context) = gpu {
        match WgpuDisplay::new(context.clone(), config.display_config(), Some(slot.clone())) {
            Ok(display) => return Box::new(display),
            Err(e) => warn!(error = %e, "GPU display unavailable, showing filter output directly"),
        }
    }
    Box::new(LatestFrameSink::new(slot))
}

/// Build a controller over GStreamer, wgpu, the camera portal and the videos folder
///
/// Presented frames are published to `slot`.
pub fn build_controller(
    config: &Config,
    observer: Arc<dyn CameraObserver>,
    slot: FrameSlot,
) -> Result<CaptureController, AppError> {
    let gpu = open_gpu(config.compute_backend);
    let filter = create_frame_filter(
        config.compute_backend,
        gpu.as_ref(),
        config.pool_min_buffers,
        config.pool_max_buffers,
    )?;
    let display = build_display(config, gpu.as_ref(), slot);

    let library = Arc::new(VideosLibrary::new(config.library_dir()));
    let recorder = Recorder::new(
        Arc::new(GstWriterFactory::new()),
        library,
        Arc::clone(&observer),
        config.recorder_settings(),
    );
    let router = FrameRouter::new(filter, FilterSelection::new(config.filter), recorder, display);

    let services = CaptureServices {
        session: Box::new(GstCaptureSession::new()),
        discovery: Arc::new(GstDeviceDiscovery::new()),
        permissions: Arc::new(SystemCameraPermissions::new()),
        observer,
    };

    info!(
        backend = ?config.compute_backend,
        camera = %config.camera,
        filter = %config.filter,
        "Building capture pipeline"
    );
    CaptureController::new(
        services,
        router,
        ControllerSettings {
            initial_position: config.camera,
            frame_queue_depth: config.frame_queue_depth,
        },
    )
}
