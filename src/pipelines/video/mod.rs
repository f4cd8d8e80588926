// SPDX-License-Identifier: MPL-2.0

//! Video recording
//!
//! - [`session`]: one recording and the container-writer seam
//! - [`recorder`]: the recording state machine and its UI handle
//! - [`writer`]: GStreamer H.264/QuickTime writer
//! - [`encoder_selection`]: hardware-first H.264 encoder choice

pub mod encoder_selection;
pub mod recorder;
pub mod session;
pub mod writer;

pub use encoder_selection::{EncoderSpec, available_encoders};
pub use recorder::{CaptureState, Recorder, RecorderSettings, RecordingControl};
pub use session::{
    AppendOutcome, ContainerWriter, RecordingSession, VideoSettings, WriterFactory, WriterStatus,
};
pub use writer::{GstWriter, GstWriterFactory};
