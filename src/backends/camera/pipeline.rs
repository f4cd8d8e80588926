// SPDX-License-Identifier: MPL-2.0

//! GStreamer capture session
//!
//! One input is wired into `source ! videoconvert ! appsink` with BGRA caps
//! on the sink. The appsink callback maps each buffer without copying and
//! hands it to the frame-delivery channel with `try_send`, so a slow
//! consumer costs dropped frames, never a stalled streaming thread.

use super::CaptureSession;
use super::clock::SessionClock;
use super::types::{DeviceInput, DeviceSource, FrameSample, SampleSender};
use crate::constants::{pipeline, timing};
use crate::errors::CaptureError;
use crate::media::{ImageBuffer, PixelBuffer, PixelFormat};
use gstreamer::prelude::*;
use gstreamer_app::{AppSink, AppSinkCallbacks};
use gstreamer_video::{VideoFormat, VideoInfo};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::TrySendError;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Map a negotiated GStreamer format onto the pipeline's pixel formats
pub fn pixel_format_from_video(format: VideoFormat) -> PixelFormat {
    match format {
        VideoFormat::Bgra => PixelFormat::Bgra,
        VideoFormat::Rgba => PixelFormat::Rgba,
        VideoFormat::Nv12 => PixelFormat::Nv12,
        other => {
            let mut code = [b' '; 4];
            for (slot, byte) in code.iter_mut().zip(other.to_str().as_str().bytes()) {
                *slot = byte;
            }
            PixelFormat::Other(u32::from_le_bytes(code))
        }
    }
}

/// Wrap the sample's buffer as an image without copying
fn image_from_sample(sample: &gstreamer::Sample) -> Result<ImageBuffer, String> {
    let caps = sample.caps().ok_or("sample has no caps")?;
    let info = VideoInfo::from_caps(caps).map_err(|e| format!("invalid video caps: {}", e))?;
    let buffer = sample.buffer_owned().ok_or("sample has no buffer")?;
    if buffer.flags().contains(gstreamer::BufferFlags::CORRUPTED) {
        return Err("buffer marked as corrupted".to_string());
    }
    let map = buffer
        .into_mapped_buffer_readable()
        .map_err(|_| "failed to map buffer".to_string())?;

    Ok(PixelBuffer::from_mapped(
        info.width(),
        info.height(),
        pixel_format_from_video(info.format()),
        info.stride()[0] as u32,
        map,
    )
    .freeze())
}

/// A built, playing capture pipeline
struct CaptureStream {
    pipeline: gstreamer::Pipeline,
    appsink: AppSink,
}

impl CaptureStream {
    fn build(input: &DeviceInput, sender: SampleSender, clock: SessionClock) -> Result<Self, CaptureError> {
        gstreamer::init().map_err(|e| CaptureError::Backend(e.to_string()))?;

        let device = &input.device;
        info!(device = %device, element = device.source.element_name(), "Building capture pipeline");

        let source = match &device.source {
            DeviceSource::PipeWire { target_object } => gstreamer::ElementFactory::make("pipewiresrc")
                .name("source")
                .property("target-object", target_object.as_str())
                .build(),
            DeviceSource::V4l2 { path } => gstreamer::ElementFactory::make("v4l2src")
                .name("source")
                .property("device", path.as_str())
                .build(),
        }
        .map_err(|e| {
            CaptureError::InputCreation(format!("{}: {}", device.source.element_name(), e))
        })?;

        let convert = gstreamer::ElementFactory::make("videoconvert")
            .property("n-threads", pipeline::videoconvert_threads())
            .build()
            .map_err(|e| CaptureError::Backend(format!("videoconvert: {}", e)))?;

        let caps = gstreamer_video::VideoCapsBuilder::new()
            .format(VideoFormat::Bgra)
            .build();
        let appsink = AppSink::builder()
            .name("sink")
            .caps(&caps)
            .max_buffers(pipeline::MAX_BUFFERS)
            .drop(true)
            .sync(false)
            .build();
        appsink.set_property("enable-last-sample", false);

        let capture = gstreamer::Pipeline::with_name("filter-camera-capture");
        let elements = [&source, &convert, appsink.upcast_ref::<gstreamer::Element>()];
        capture
            .add_many(elements)
            .map_err(|e| CaptureError::Backend(format!("Failed to add elements: {}", e)))?;
        gstreamer::Element::link_many(elements)
            .map_err(|e| CaptureError::Backend(format!("Failed to link elements: {}", e)))?;

        let frames = Arc::new(AtomicU64::new(0));
        clock.stream_started();
        appsink.set_callbacks(
            AppSinkCallbacks::builder()
                .new_sample(move |sink| {
                    let frame_num = frames.fetch_add(1, Ordering::Relaxed);
                    let sample = sink.pull_sample().map_err(|_| gstreamer::FlowError::Eos)?;

                    let stream_time = sample
                        .buffer()
                        .and_then(|buffer| buffer.pts())
                        .or_else(|| sink.current_running_time())
                        .map(|time| Duration::from_nanos(time.nseconds()))
                        .unwrap_or_default();
                    let presentation_time = clock.stamp(stream_time);

                    let frame = match image_from_sample(&sample) {
                        Ok(image) => FrameSample::new(image, presentation_time),
                        Err(e) => {
                            if frame_num % timing::FRAME_LOG_INTERVAL == 0 {
                                warn!(frame = frame_num, error = %e, "Could not extract frame");
                            }
                            FrameSample {
                                image: None,
                                format: None,
                                presentation_time,
                            }
                        }
                    };

                    match sender.try_send(frame) {
                        Ok(()) => {}
                        Err(TrySendError::Full(_)) => {
                            if frame_num % timing::FRAME_LOG_INTERVAL == 0 {
                                debug!(frame = frame_num, "Frame dropped (delivery channel full)");
                            }
                        }
                        Err(TrySendError::Disconnected(_)) => {
                            debug!(frame = frame_num, "Frame delivery channel closed");
                        }
                    }

                    Ok(gstreamer::FlowSuccess::Ok)
                })
                .build(),
        );

        capture.set_state(gstreamer::State::Playing).map_err(|e| {
            CaptureError::Backend(format!("Failed to start capture pipeline: {}", e))
        })?;

        let (result, state, pending) =
            capture.state(gstreamer::ClockTime::from_seconds(timing::START_TIMEOUT_SECS));
        debug!(result = ?result, state = ?state, pending = ?pending, "Capture pipeline state");
        if result.is_err() {
            let _ = capture.set_state(gstreamer::State::Null);
            return Err(CaptureError::Backend(format!(
                "Capture pipeline failed to reach PLAYING for {}",
                device
            )));
        }

        Ok(Self {
            pipeline: capture,
            appsink,
        })
    }

    fn stop(self) {
        // Drop the callback first so the sender is released with it
        self.appsink.set_callbacks(AppSinkCallbacks::builder().build());

        if let Err(e) = self.pipeline.set_state(gstreamer::State::Null) {
            warn!(error = %e, "Failed to stop capture pipeline");
            return;
        }
        let (result, state, _) = self
            .pipeline
            .state(gstreamer::ClockTime::from_seconds(timing::STOP_TIMEOUT_SECS));
        debug!(result = ?result, state = ?state, "Capture pipeline stopped");
    }
}

/// Capture session backed by a GStreamer pipeline
///
/// The pipeline is rebuilt whenever a committed configuration changed the
/// input while the session was running. Every rebuilt stream stamps frames
/// on the same [`SessionClock`].
#[derive(Default)]
pub struct GstCaptureSession {
    inputs: Vec<DeviceInput>,
    sender: Option<SampleSender>,
    configuring: bool,
    inputs_changed: bool,
    clock: SessionClock,
    stream: Option<CaptureStream>,
}

impl GstCaptureSession {
    pub fn new() -> Self {
        Self::default()
    }

    fn start_stream(&mut self) -> Result<(), CaptureError> {
        let input = self.inputs.first().ok_or(CaptureError::NotConfigured)?;
        let sender = self.sender.clone().ok_or(CaptureError::NotConfigured)?;
        self.stream = Some(CaptureStream::build(input, sender, self.clock.clone())?);
        self.inputs_changed = false;
        Ok(())
    }
}

impl CaptureSession for GstCaptureSession {
    fn begin_configuration(&mut self) {
        self.configuring = true;
    }

    fn commit_configuration(&mut self) -> Result<(), CaptureError> {
        self.configuring = false;
        if self.stream.is_some() && self.inputs_changed {
            info!("Applying capture configuration");
            if let Some(stream) = self.stream.take() {
                stream.stop();
            }
            self.start_stream()?;
        }
        Ok(())
    }

    fn can_add_input(&self, input: &DeviceInput) -> bool {
        // One camera at a time
        self.inputs.is_empty() && !input.device.id.is_empty()
    }

    fn add_input(&mut self, input: DeviceInput) -> Result<(), CaptureError> {
        if !self.can_add_input(&input) {
            return Err(CaptureError::InputRejected(input.device.to_string()));
        }
        debug!(input = %input.device, configuring = self.configuring, "Adding input");
        self.inputs.push(input);
        self.inputs_changed = true;
        Ok(())
    }

    fn remove_input(&mut self, input_id: &str) -> Option<DeviceInput> {
        let index = self.inputs.iter().position(|i| i.id() == input_id)?;
        self.inputs_changed = true;
        Some(self.inputs.remove(index))
    }

    fn inputs(&self) -> &[DeviceInput] {
        &self.inputs
    }

    fn set_sample_sender(&mut self, sender: SampleSender) {
        self.sender = Some(sender);
    }

    fn has_sample_output(&self) -> bool {
        self.sender.is_some()
    }

    fn start_running(&mut self) -> Result<(), CaptureError> {
        if self.stream.is_some() {
            return Ok(());
        }
        self.start_stream().inspect_err(|e| {
            error!(error = %e, "Failed to start capture session");
        })
    }

    fn stop_running(&mut self) {
        if let Some(stream) = self.stream.take() {
            info!("Stopping capture session");
            stream.stop();
        }
    }

    fn is_running(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for GstCaptureSession {
    fn drop(&mut self) {
        self.stop_running();
    }
}
