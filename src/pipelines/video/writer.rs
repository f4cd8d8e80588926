// SPDX-License-Identifier: MPL-2.0

//! GStreamer container writer
//!
//! `appsrc ! videoconvert ! <h264 encoder> ! h264parse ! qtmux ! filesink`
//!
//! The appsrc is live and time-based. Its need-data/enough-data signals drive
//! the writer's readiness, which the recording session uses to drop frames
//! instead of queueing them.

use super::encoder_selection::select_h264_encoder;
use super::session::{ContainerWriter, VideoSettings, WriterFactory, WriterStatus};
use crate::constants::{recording, timing};
use crate::errors::RecordingError;
use crate::media::{ImageBuffer, PixelFormat};
use gstreamer as gst;
use gstreamer::prelude::*;
use gstreamer_app::{AppSrc, AppSrcCallbacks};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Image orientation tag value for a clockwise rotation
pub fn orientation_tag(degrees: u32) -> &'static str {
    match degrees % 360 {
        90 => "rotate-90",
        180 => "rotate-180",
        270 => "rotate-270",
        _ => "rotate-0",
    }
}

/// Bytes the appsrc may queue: [`recording::MAX_QUEUED_FRAMES`] packed
/// BGRA frames
pub fn queue_limit_bytes(width: u32, height: u32) -> u64 {
    u64::from(width) * u64::from(height) * 4 * recording::MAX_QUEUED_FRAMES
}

/// Frame memory handed to GStreamer without a copy
struct FrameBytes(ImageBuffer);

impl AsRef<[u8]> for FrameBytes {
    fn as_ref(&self) -> &[u8] {
        self.0.data()
    }
}

/// Creates [`GstWriter`]s
#[derive(Debug, Default, Clone)]
pub struct GstWriterFactory;

impl GstWriterFactory {
    pub fn new() -> Self {
        Self
    }
}

impl WriterFactory for GstWriterFactory {
    fn create_writer(
        &self,
        path: &Path,
        settings: &VideoSettings,
    ) -> Result<Box<dyn ContainerWriter>, RecordingError> {
        Ok(Box::new(GstWriter::new(path, settings)?))
    }
}

/// H.264 in a QuickTime container, fed frame by frame
pub struct GstWriter {
    pipeline: gst::Pipeline,
    appsrc: AppSrc,
    path: PathBuf,
    width: u32,
    height: u32,
    ready: Arc<AtomicBool>,
    failure: Arc<Mutex<Option<String>>>,
    status: WriterStatus,
}

impl GstWriter {
    pub fn new(path: &Path, settings: &VideoSettings) -> Result<Self, RecordingError> {
        gst::init().map_err(|e| RecordingError::WriterCreation(e.to_string()))?;

        info!(
            path = %path.display(),
            width = settings.width,
            height = settings.height,
            orientation = settings.orientation_degrees,
            "Creating container writer"
        );

        let creation = |what: &str, e: gst::glib::BoolError| {
            RecordingError::WriterCreation(format!("Failed to create {}: {}", what, e))
        };

        let caps = gstreamer_video::VideoCapsBuilder::new()
            .format(gstreamer_video::VideoFormat::Bgra)
            .width(settings.width as i32)
            .height(settings.height as i32)
            .framerate(gst::Fraction::new(0, 1))
            .build();

        let appsrc = AppSrc::builder()
            .name("frames")
            .caps(&caps)
            .format(gst::Format::Time)
            .is_live(settings.expects_media_data_in_real_time)
            .do_timestamp(false)
            .max_bytes(queue_limit_bytes(settings.width, settings.height))
            .block(false)
            .build();
        if appsrc.has_property("max-buffers") {
            appsrc.set_property("max-buffers", recording::MAX_QUEUED_FRAMES);
        }

        let convert = gst::ElementFactory::make("videoconvert")
            .build()
            .map_err(|e| creation("videoconvert", e))?;
        let selected = select_h264_encoder(settings.bitrate_kbps)?;

        let muxer = gst::ElementFactory::make("qtmux")
            .build()
            .map_err(|e| creation("qtmux", e))?;
        if muxer.has_property("trak-timescale") {
            muxer.set_property("trak-timescale", settings.timescale);
        }
        if muxer.has_property("streamable") {
            muxer.set_property("streamable", false);
        }
        if let Some(setter) = muxer.dynamic_cast_ref::<gst::TagSetter>() {
            setter.add_tag::<gst::tags::ImageOrientation>(
                &orientation_tag(settings.orientation_degrees),
                gst::TagMergeMode::Replace,
            );
        }

        let location = path
            .to_str()
            .ok_or_else(|| RecordingError::WriterCreation(format!("Non UTF-8 path {}", path.display())))?;
        let filesink = gst::ElementFactory::make("filesink")
            .property("location", location)
            .build()
            .map_err(|e| creation("filesink", e))?;

        let pipeline = gst::Pipeline::with_name("filter-camera-writer");
        let mut chain: Vec<&gst::Element> = vec![appsrc.upcast_ref(), &convert, &selected.encoder];
        if let Some(parser) = &selected.parser {
            chain.push(parser);
        }
        chain.push(&muxer);
        chain.push(&filesink);

        pipeline
            .add_many(chain.iter().copied())
            .map_err(|e| RecordingError::WriterCreation(format!("Failed to add elements: {}", e)))?;
        gst::Element::link_many(chain.iter().copied())
            .map_err(|e| RecordingError::WriterCreation(format!("Failed to link writer: {}", e)))?;

        let ready = Arc::new(AtomicBool::new(true));
        let need_ready = Arc::clone(&ready);
        let enough_ready = Arc::clone(&ready);
        appsrc.set_callbacks(
            AppSrcCallbacks::builder()
                .need_data(move |_, _| need_ready.store(true, Ordering::Release))
                .enough_data(move |_| enough_ready.store(false, Ordering::Release))
                .build(),
        );

        let failure = Arc::new(Mutex::new(None));
        let bus_failure = Arc::clone(&failure);
        let bus = pipeline
            .bus()
            .ok_or_else(|| RecordingError::WriterCreation("Writer pipeline has no bus".to_string()))?;
        bus.set_sync_handler(move |_, msg| {
            if let gst::MessageView::Error(err) = msg.view() {
                error!(
                    error = %err.error(),
                    debug = ?err.debug(),
                    source = ?err.src().map(|s| s.name()),
                    "Writer pipeline error"
                );
                if let Ok(mut failure) = bus_failure.lock() {
                    failure.get_or_insert_with(|| err.error().to_string());
                }
            }
            gst::BusSyncReply::Pass
        });

        pipeline.set_state(gst::State::Playing).map_err(|e| {
            let _ = pipeline.set_state(gst::State::Null);
            RecordingError::WriterCreation(format!("Failed to start writer: {}", e))
        })?;

        Ok(Self {
            pipeline,
            appsrc,
            path: path.to_path_buf(),
            width: settings.width,
            height: settings.height,
            ready,
            failure,
            status: WriterStatus::Writing,
        })
    }

    fn failure(&self) -> Option<String> {
        self.failure.lock().ok().and_then(|f| f.clone())
    }

    fn to_gst_buffer(&self, image: &ImageBuffer) -> Result<gst::Buffer, RecordingError> {
        if image.pixel_format() != PixelFormat::Bgra
            || image.width() != self.width
            || image.height() != self.height
        {
            return Err(RecordingError::WriterFailed(format!(
                "frame {}x{} {} does not match writer {}x{} BGRA",
                image.width(),
                image.height(),
                image.pixel_format(),
                self.width,
                self.height
            )));
        }

        if image.stride() == image.width() * 4 {
            Ok(gst::Buffer::from_slice(FrameBytes(image.clone())))
        } else {
            Ok(gst::Buffer::from_mut_slice(image.to_packed_vec()))
        }
    }
}

impl ContainerWriter for GstWriter {
    fn is_ready_for_more_media_data(&self) -> bool {
        self.status == WriterStatus::Writing && self.ready.load(Ordering::Acquire)
    }

    fn status(&self) -> WriterStatus {
        if self.failure().is_some() {
            WriterStatus::Failed
        } else {
            self.status
        }
    }

    fn error(&self) -> Option<String> {
        self.failure()
    }

    fn append(&mut self, image: &ImageBuffer, time: Duration) -> Result<(), RecordingError> {
        let mut buffer = self.to_gst_buffer(image)?;
        if let Some(buffer) = buffer.get_mut() {
            buffer.set_pts(gst::ClockTime::from_nseconds(time.as_nanos() as u64));
        }

        self.appsrc
            .push_buffer(buffer)
            .map(|_| ())
            .map_err(|e| RecordingError::WriterFailed(format!("push_buffer: {:?}", e)))
    }

    fn mark_as_finished(&mut self) {
        if let Err(e) = self.appsrc.end_of_stream() {
            warn!(error = ?e, "Failed to signal end of stream to writer");
        }
    }

    fn finish_writing(&mut self) -> Result<(), RecordingError> {
        let bus = self
            .pipeline
            .bus()
            .ok_or_else(|| RecordingError::WriterFailed("Writer pipeline has no bus".to_string()))?;

        debug!(path = %self.path.display(), "Waiting for writer to drain");
        let outcome = match bus.timed_pop_filtered(
            gst::ClockTime::from_seconds(timing::FINALIZE_TIMEOUT_SECS),
            &[gst::MessageType::Eos, gst::MessageType::Error],
        ) {
            Some(msg) => match msg.view() {
                gst::MessageView::Eos(..) => Ok(()),
                gst::MessageView::Error(err) => Err(err.error().to_string()),
                _ => Ok(()),
            },
            None => Err("timed out waiting for the container to finish".to_string()),
        };

        if let Err(e) = self.pipeline.set_state(gst::State::Null) {
            warn!(error = %e, "Failed to stop writer pipeline");
        }

        match outcome {
            Ok(()) => {
                self.status = WriterStatus::Completed;
                info!(path = %self.path.display(), "Container finished");
                Ok(())
            }
            Err(e) => {
                self.status = WriterStatus::Failed;
                Err(RecordingError::WriterFailed(e))
            }
        }
    }
}

impl Drop for GstWriter {
    fn drop(&mut self) {
        if self.status == WriterStatus::Writing {
            self.status = WriterStatus::Cancelled;
        }
        let _ = self.pipeline.set_state(gst::State::Null);
    }
}
