// SPDX-License-Identifier: GPL-3.0-only

//! Notifications from the capture pipeline to the shell

use crate::errors::CaptureError;
use std::path::{Path, PathBuf};
use std::sync::mpsc::Sender;
use tracing::debug;

/// Receiver of user-visible outcomes
///
/// Called from the session queue, the finalizer thread or the caller of
/// [`CaptureController::check_authorization`](super::CaptureController::check_authorization),
/// never from the frame-delivery thread's hot path.
pub trait CameraObserver: Send + Sync {
    fn on_access_granted(&self);

    /// Camera access is denied or restricted
    fn on_access_denied(&self, show_settings_prompt: bool);

    /// A finished recording could not be saved to the library
    fn on_save_failed(&self, prompt_retry_or_delete: bool);

    fn on_configuration_failed(&self, _error: &CaptureError) {}

    fn on_recording_saved(&self, _path: &Path) {}
}

/// Observer notifications as values
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CameraEvent {
    AccessGranted,
    AccessDenied { show_settings_prompt: bool },
    SaveFailed { prompt_retry_or_delete: bool },
    ConfigurationFailed(CaptureError),
    RecordingSaved(PathBuf),
}

/// Forwards notifications into a channel the shell drains on its own thread
#[derive(Debug, Clone)]
pub struct ChannelObserver {
    sender: Sender<CameraEvent>,
}

impl ChannelObserver {
    pub fn new(sender: Sender<CameraEvent>) -> Self {
        Self { sender }
    }

    fn send(&self, event: CameraEvent) {
        if self.sender.send(event).is_err() {
            debug!("Observer channel closed, dropping notification");
        }
    }
}

impl CameraObserver for ChannelObserver {
    fn on_access_granted(&self) {
        self.send(CameraEvent::AccessGranted);
    }

    fn on_access_denied(&self, show_settings_prompt: bool) {
        self.send(CameraEvent::AccessDenied {
            show_settings_prompt,
        });
    }

    fn on_save_failed(&self, prompt_retry_or_delete: bool) {
        self.send(CameraEvent::SaveFailed {
            prompt_retry_or_delete,
        });
    }

    fn on_configuration_failed(&self, error: &CaptureError) {
        self.send(CameraEvent::ConfigurationFailed(error.clone()));
    }

    fn on_recording_saved(&self, path: &Path) {
        self.send(CameraEvent::RecordingSaved(path.to_path_buf()));
    }
}
