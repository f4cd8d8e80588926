// SPDX-License-Identifier: MPL-2.0

//! Camera discovery through the GStreamer device monitor
//!
//! The monitor lists both PipeWire nodes and bare V4L2 devices, whichever
//! providers are installed. libcamera-backed PipeWire nodes carry an
//! `api.libcamera.location`; everything else gets a position assigned in
//! enumeration order.

use super::DeviceDiscovery;
use super::types::{CameraPosition, CaptureDevice, DeviceInput, DeviceSource, DeviceType};
use crate::errors::CaptureError;
use gstreamer::prelude::*;
use std::path::Path;
use tracing::{debug, info, warn};

/// A device as the monitor reported it, before positions are assigned
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredDevice {
    pub name: String,
    pub source: DeviceSource,
    pub location: Option<CameraPosition>,
}

/// Give every device a position
///
/// Devices that report a location keep it. The rest take the first position
/// nobody has claimed yet (Back, then Front) and default to Back after that.
pub fn assign_positions(discovered: Vec<DiscoveredDevice>) -> Vec<CaptureDevice> {
    let mut claimed: Vec<CameraPosition> = discovered.iter().filter_map(|d| d.location).collect();

    discovered
        .into_iter()
        .map(|device| {
            let position = device.location.unwrap_or_else(|| {
                let position = [CameraPosition::Back, CameraPosition::Front]
                    .into_iter()
                    .find(|p| !claimed.contains(p))
                    .unwrap_or(CameraPosition::Back);
                claimed.push(position);
                position
            });

            let id = match &device.source {
                DeviceSource::PipeWire { target_object } => target_object.clone(),
                DeviceSource::V4l2 { path } => path.clone(),
            };

            CaptureDevice {
                id,
                name: device.name,
                position,
                device_type: DeviceType::WideAngleCamera,
                source: device.source,
            }
        })
        .collect()
}

/// Read a device property as text, whatever its GType
fn property_string(props: &gstreamer::StructureRef, key: &str) -> Option<String> {
    if let Ok(value) = props.get::<String>(key) {
        return Some(value);
    }
    if let Ok(value) = props.get::<u64>(key) {
        return Some(value.to_string());
    }
    if let Ok(value) = props.get::<i64>(key) {
        return Some(value.to_string());
    }
    if let Ok(value) = props.get::<u32>(key) {
        return Some(value.to_string());
    }
    props.get::<i32>(key).ok().map(|value| value.to_string())
}

fn describe(device: &gstreamer::Device) -> Option<DiscoveredDevice> {
    let name = device.display_name().to_string();
    let props = device.properties()?;

    let source = if let Some(serial) = property_string(&props, "object.serial") {
        DeviceSource::PipeWire {
            target_object: serial,
        }
    } else if let Some(path) =
        property_string(&props, "device.path").or_else(|| property_string(&props, "api.v4l2.path"))
    {
        DeviceSource::V4l2 { path }
    } else {
        debug!(name = %name, "Skipping device without a usable address");
        return None;
    };

    let location = property_string(&props, "api.libcamera.location")
        .and_then(|location| CameraPosition::from_location(&location));

    Some(DiscoveredDevice {
        name,
        source,
        location,
    })
}

/// [`DeviceDiscovery`] over `gst::DeviceMonitor` ("Video/Source")
#[derive(Debug, Default, Clone)]
pub struct GstDeviceDiscovery;

impl GstDeviceDiscovery {
    pub fn new() -> Self {
        Self
    }

    fn enumerate(&self) -> Result<Vec<CaptureDevice>, CaptureError> {
        gstreamer::init().map_err(|e| CaptureError::Backend(e.to_string()))?;

        let monitor = gstreamer::DeviceMonitor::new();
        let caps = gstreamer::Caps::new_empty_simple("video/x-raw");
        monitor.add_filter(Some("Video/Source"), Some(&caps));
        monitor
            .start()
            .map_err(|e| CaptureError::Backend(format!("Device monitor failed to start: {}", e)))?;
        let found = monitor.devices();
        monitor.stop();

        let discovered: Vec<DiscoveredDevice> = found.iter().filter_map(describe).collect();
        let devices = assign_positions(discovered);
        info!(count = devices.len(), "Enumerated cameras");
        for device in &devices {
            debug!(device = %device, "Camera");
        }
        Ok(devices)
    }
}

impl DeviceDiscovery for GstDeviceDiscovery {
    fn devices(&self) -> Vec<CaptureDevice> {
        self.enumerate().unwrap_or_else(|e| {
            warn!(error = %e, "Camera enumeration failed");
            Vec::new()
        })
    }

    fn make_input(&self, device: &CaptureDevice) -> Result<DeviceInput, CaptureError> {
        gstreamer::init().map_err(|e| CaptureError::Backend(e.to_string()))?;

        let element = device.source.element_name();
        if gstreamer::ElementFactory::find(element).is_none() {
            return Err(CaptureError::InputCreation(format!(
                "GStreamer element {} is not installed",
                element
            )));
        }
        if let DeviceSource::V4l2 { path } = &device.source
            && !Path::new(path).exists()
        {
            return Err(CaptureError::InputCreation(format!("{} does not exist", path)));
        }

        Ok(DeviceInput::new(device.clone()))
    }
}
