// SPDX-License-Identifier: GPL-3.0-only

//! Per-frame routing on the frame-delivery thread
//!
//! ```text
//! FrameSample ─▶ extract ─▶ FilterStage ─┬─▶ Recorder::update (output buffer)
//!                                       └─▶ DisplaySink::present (texture)
//! ```

use crate::backends::camera::FrameSample;
use crate::constants::timing;
use crate::display::DisplaySink;
use crate::filters::{FilterKind, FrameFilter, GpuTexture};
use crate::pipelines::video::{CaptureState, Recorder, RecordingControl};
use std::sync::Arc;
use std::sync::atomic::{AtomicU8, AtomicU64, Ordering};
use tracing::{debug, info, warn};

/// The active filter, written by the UI and read once per frame
#[derive(Debug, Clone, Default)]
pub struct FilterSelection {
    code: Arc<AtomicU8>,
}

impl FilterSelection {
    pub fn new(initial: FilterKind) -> Self {
        Self {
            code: Arc::new(AtomicU8::new(initial.code())),
        }
    }

    pub fn get(&self) -> FilterKind {
        FilterKind::from_code(self.code.load(Ordering::Acquire)).unwrap_or_default()
    }

    /// Takes effect from the next frame
    pub fn set(&self, kind: FilterKind) {
        self.code.store(kind.code(), Ordering::Release);
    }
}

/// Frame counters shared with the shell
#[derive(Debug, Default)]
pub struct FrameStats {
    delivered: AtomicU64,
    presented: AtomicU64,
    extraction_failures: AtomicU64,
    filter_failures: AtomicU64,
    display_failures: AtomicU64,
}

impl FrameStats {
    pub fn delivered(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    pub fn presented(&self) -> u64 {
        self.presented.load(Ordering::Relaxed)
    }

    /// Frames that never reached the display
    pub fn dropped(&self) -> u64 {
        self.extraction_failures.load(Ordering::Relaxed)
            + self.filter_failures.load(Ordering::Relaxed)
    }

    pub fn filter_failures(&self) -> u64 {
        self.filter_failures.load(Ordering::Relaxed)
    }

    pub fn display_failures(&self) -> u64 {
        self.display_failures.load(Ordering::Relaxed)
    }
}

/// Routes each captured frame through the filter to the recorder and display
pub struct FrameRouter {
    filter: Box<dyn FrameFilter>,
    selection: FilterSelection,
    recorder: Recorder,
    display: Box<dyn DisplaySink>,
    stats: Arc<FrameStats>,
}

impl FrameRouter {
    pub fn new(
        filter: Box<dyn FrameFilter>,
        selection: FilterSelection,
        recorder: Recorder,
        display: Box<dyn DisplaySink>,
    ) -> Self {
        let display_name = display.name();
        info!(
            backend = filter.backend_name(),
            display = display_name,
            filter = %selection.get(),
            "Frame router ready"
        );
        Self {
            filter,
            selection,
            recorder,
            display,
            stats: Arc::new(FrameStats::default()),
        }
    }

    pub fn selection(&self) -> FilterSelection {
        self.selection.clone()
    }

    pub fn recording_control(&self) -> RecordingControl {
        self.recorder.control()
    }

    pub fn recorder(&self) -> &Recorder {
        &self.recorder
    }

    pub fn stats(&self) -> Arc<FrameStats> {
        Arc::clone(&self.stats)
    }

    pub fn pipeline_builds(&self) -> u64 {
        self.filter.pipeline_builds()
    }

    /// Process one captured sample
    ///
    /// Returns the texture handed to the display, or `None` if the frame was
    /// dropped.
    pub fn on_frame(&mut self, sample: FrameSample) -> Option<GpuTexture> {
        let frame_number = self.stats.delivered.fetch_add(1, Ordering::Relaxed) + 1;

        let (image, format) = match sample.extract() {
            Ok(parts) => parts,
            Err(e) => {
                self.stats.extraction_failures.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, frame = frame_number, "Dropping frame without image data");
                return None;
            }
        };

        let kind = self.selection.get();
        let output = match self.filter.apply(image, kind) {
            Ok(output) => output,
            Err(e) => {
                let failures = self.stats.filter_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if failures % timing::FRAME_LOG_INTERVAL == 1 {
                    warn!(
                        error = %e,
                        filter = %kind,
                        failures,
                        "Filter failed, dropping frame"
                    );
                }
                return None;
            }
        };

        if frame_number % timing::FRAME_LOG_INTERVAL == 0 {
            debug!(
                frame = frame_number,
                width = format.width,
                height = format.height,
                format = %format.pixel_format,
                filter = %kind,
                time_ms = sample.presentation_time.as_millis() as u64,
                "Frame routed"
            );
        }

        if let Err(e) = self.recorder.update(&output.image, sample.presentation_time) {
            warn!(error = %e, "Recording update failed");
        }

        match self.display.present(&output.texture) {
            Ok(()) => {
                self.stats.presented.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                let failures = self.stats.display_failures.fetch_add(1, Ordering::Relaxed) + 1;
                if failures % timing::FRAME_LOG_INTERVAL == 1 {
                    warn!(error = %e, failures, "Display failed to present frame");
                }
            }
        }

        Some(output.texture)
    }
}

impl Drop for FrameRouter {
    fn drop(&mut self) {
        if self.recorder.state() != CaptureState::Idle {
            info!("Frame delivery stopped while recording, finalizing");
        }
        self.recorder.flush();
    }
}
