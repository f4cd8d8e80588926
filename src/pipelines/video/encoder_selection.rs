// SPDX-License-Identifier: MPL-2.0

//! H.264 encoder selection for the recording writer
//!
//! Hardware encoders are tried first, software ones after. The first element
//! GStreamer can instantiate wins.

use crate::errors::RecordingError;
use gstreamer as gst;
use gstreamer::prelude::*;
use tracing::{debug, info};

/// An H.264 encoder the writer knows how to configure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EncoderSpec {
    /// GStreamer element name
    pub element_name: &'static str,
    /// Display name for the shell
    pub display_name: &'static str,
    pub is_hardware: bool,
}

/// Encoders in order of preference
pub const H264_ENCODERS: [EncoderSpec; 4] = [
    EncoderSpec {
        element_name: "vah264enc",
        display_name: "VA-API H.264 (HW)",
        is_hardware: true,
    },
    EncoderSpec {
        element_name: "vaapih264enc",
        display_name: "VA-API H.264 (HW, legacy)",
        is_hardware: true,
    },
    EncoderSpec {
        element_name: "x264enc",
        display_name: "x264 H.264 (SW)",
        is_hardware: false,
    },
    EncoderSpec {
        element_name: "openh264enc",
        display_name: "OpenH264 H.264 (SW)",
        is_hardware: false,
    },
];

/// Parser between encoder and muxer
pub const H264_PARSER: &str = "h264parse";

/// Encoder and parser ready to be linked into a writer pipeline
pub struct SelectedEncoder {
    pub spec: EncoderSpec,
    pub encoder: gst::Element,
    pub parser: Option<gst::Element>,
}

/// Encoders installed on this system, in preference order
pub fn available_encoders() -> Vec<EncoderSpec> {
    if gst::init().is_err() {
        return Vec::new();
    }
    H264_ENCODERS
        .iter()
        .copied()
        .filter(|spec| gst::ElementFactory::find(spec.element_name).is_some())
        .collect()
}

/// Instantiate the best available encoder at `bitrate_kbps`
pub fn select_h264_encoder(bitrate_kbps: u32) -> Result<SelectedEncoder, RecordingError> {
    gst::init().map_err(|e| RecordingError::WriterCreation(e.to_string()))?;

    for spec in H264_ENCODERS {
        let encoder = match gst::ElementFactory::make(spec.element_name).build() {
            Ok(encoder) => encoder,
            Err(e) => {
                debug!(encoder = spec.element_name, error = %e, "Encoder not available");
                continue;
            }
        };
        configure_encoder(&encoder, spec.element_name, bitrate_kbps);

        let parser = match gst::ElementFactory::make(H264_PARSER).build() {
            Ok(parser) => Some(parser),
            Err(e) => {
                debug!(error = %e, "h264parse not available, linking encoder to muxer directly");
                None
            }
        };

        info!(encoder = spec.display_name, bitrate_kbps, "Selected video encoder");
        return Ok(SelectedEncoder {
            spec,
            encoder,
            parser,
        });
    }

    let tried: Vec<&str> = H264_ENCODERS.iter().map(|s| s.element_name).collect();
    Err(RecordingError::EncoderNotAvailable(tried.join(", ")))
}

/// Apply real-time, constant-bitrate settings for a given encoder element
fn configure_encoder(encoder: &gst::Element, element_name: &str, bitrate_kbps: u32) {
    match element_name {
        "x264enc" => {
            let _ = encoder.set_property_from_str("speed-preset", "veryfast");
            let _ = encoder.set_property_from_str("tune", "zerolatency");
            encoder.set_property("bitrate", bitrate_kbps);
        }
        "vaapih264enc" => {
            let _ = encoder.set_property_from_str("rate-control", "cbr");
            encoder.set_property("bitrate", bitrate_kbps);
        }
        "vah264enc" => {
            let _ = encoder.set_property_from_str("rate-control", "cbr");
            encoder.set_property("bitrate", bitrate_kbps);
        }
        "openh264enc" => {
            let _ = encoder.set_property_from_str("rate-control", "bitrate");
            encoder.set_property("bitrate", bitrate_kbps * 1000);
            let _ = encoder.set_property_from_str("usage-type", "camera");
        }
        _ => {}
    }
    debug!(encoder = element_name, bitrate_kbps, "Configured encoder");
}
