// SPDX-License-Identifier: GPL-3.0-only

//! Camera capture abstraction
//!
//! [`CaptureSession`] is the configure-then-run wiring between one device
//! input and the frame-delivery channel. [`DeviceDiscovery`] resolves a
//! camera for a position. GStreamer implements both; tests supply fakes.

pub mod clock;
pub mod discovery;
pub mod frame_loop;
pub mod pipeline;
pub mod types;

pub use clock::SessionClock;
pub use discovery::GstDeviceDiscovery;
pub use frame_loop::{CaptureLoopController, LoopAction, start_frame_delivery};
pub use pipeline::GstCaptureSession;
pub use types::*;

use crate::errors::CaptureError;

/// A capture session: inputs, a sample output and a running state
///
/// Input changes made between [`begin_configuration`](Self::begin_configuration)
/// and [`commit_configuration`](Self::commit_configuration) are applied
/// together. A running session never sees a state where the old input is
/// gone but the new one is not yet attached.
pub trait CaptureSession: Send {
    /// Open a configuration bracket
    fn begin_configuration(&mut self);

    /// Close the bracket and apply every change made inside it
    fn commit_configuration(&mut self) -> Result<(), CaptureError>;

    /// Whether `input` would be accepted right now
    fn can_add_input(&self, input: &DeviceInput) -> bool;

    fn add_input(&mut self, input: DeviceInput) -> Result<(), CaptureError>;

    /// Remove the input with this id, returning it if it was attached
    fn remove_input(&mut self, input_id: &str) -> Option<DeviceInput>;

    fn inputs(&self) -> &[DeviceInput];

    /// Route captured samples into `sender` (the sample output)
    fn set_sample_sender(&mut self, sender: SampleSender);

    fn has_sample_output(&self) -> bool;

    fn start_running(&mut self) -> Result<(), CaptureError>;

    fn stop_running(&mut self);

    fn is_running(&self) -> bool;
}

/// Camera lookup by type and position
pub trait DeviceDiscovery: Send + Sync {
    /// Every camera currently present
    fn devices(&self) -> Vec<CaptureDevice>;

    /// First camera of `device_type` at `position`
    fn default_device(
        &self,
        device_type: DeviceType,
        position: CameraPosition,
    ) -> Option<CaptureDevice> {
        self.devices()
            .into_iter()
            .find(|d| d.device_type == device_type && d.position == position)
    }

    /// Open `device` as a session input
    fn make_input(&self, device: &CaptureDevice) -> Result<DeviceInput, CaptureError>;
}

/// Resolve the camera for `position`, trying each [`DeviceType`] in order
pub fn find_device(discovery: &dyn DeviceDiscovery, position: CameraPosition) -> Option<CaptureDevice> {
    DeviceType::PREFERENCE
        .iter()
        .find_map(|device_type| discovery.default_device(*device_type, position))
}
