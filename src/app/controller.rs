// SPDX-License-Identifier: GPL-3.0-only

//! Capture controller
//!
//! Owns the authorization lifecycle, the capture session and the
//! frame-delivery thread. Session wiring runs on a [`SessionQueue`]; frames
//! run on the `frame-delivery` thread through a [`FrameRouter`]; everything
//! else is a user intent that only flips shared state.

use super::observer::CameraObserver;
use super::router::{FilterSelection, FrameRouter, FrameStats};
use super::session_queue::SessionQueue;
use crate::backends::camera::{
    CameraPosition, CaptureLoopController, CaptureSession, DeviceDiscovery, DeviceInput,
    SampleSender, find_device, start_frame_delivery,
};
use crate::backends::{AuthorizationStatus, CameraPermissions};
use crate::errors::{AppError, CaptureError, RecordingError};
use crate::filters::FilterKind;
use crate::pipelines::video::{CaptureState, RecordingControl};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::sync_channel;
use std::sync::{Arc, Mutex};
use tracing::{debug, error, info, warn};

/// Platform collaborators the controller drives
pub struct CaptureServices {
    pub session: Box<dyn CaptureSession>,
    pub discovery: Arc<dyn DeviceDiscovery>,
    pub permissions: Arc<dyn CameraPermissions>,
    pub observer: Arc<dyn CameraObserver>,
}

#[derive(Debug, Clone, Copy)]
pub struct ControllerSettings {
    pub initial_position: CameraPosition,
    /// Frames buffered between the driver and the frame thread
    pub frame_queue_depth: usize,
}

impl Default for ControllerSettings {
    fn default() -> Self {
        Self {
            initial_position: CameraPosition::default(),
            frame_queue_depth: 2,
        }
    }
}

/// State the session queue jobs share with the controller
struct SessionState {
    session: Mutex<Box<dyn CaptureSession>>,
    discovery: Arc<dyn DeviceDiscovery>,
    observer: Arc<dyn CameraObserver>,
    position: Mutex<CameraPosition>,
    configured: AtomicBool,
    frame_sender: SampleSender,
}

/// Run `changes` inside one begin/commit bracket
///
/// The bracket is always closed, even when a change fails.
fn reconfigure<F>(session: &mut dyn CaptureSession, changes: F) -> Result<(), CaptureError>
where
    F: FnOnce(&mut dyn CaptureSession) -> Result<(), CaptureError>,
{
    session.begin_configuration();
    let result = changes(&mut *session);
    let committed = session.commit_configuration();
    result.and(committed)
}

fn attach(session: &mut dyn CaptureSession, input: DeviceInput) -> Result<(), CaptureError> {
    if !session.can_add_input(&input) {
        return Err(CaptureError::InputRejected(input.id().to_string()));
    }
    session.add_input(input)
}

fn detach_all(session: &mut dyn CaptureSession) {
    let current: Vec<String> = session.inputs().iter().map(|i| i.id().to_string()).collect();
    for id in current {
        if let Some(removed) = session.remove_input(&id) {
            debug!(input = %removed.device, "Removed input");
        }
    }
}

impl SessionState {
    fn position(&self) -> CameraPosition {
        self.position.lock().map(|p| *p).unwrap_or_default()
    }

    fn resolve_input(&self, position: CameraPosition) -> Result<DeviceInput, CaptureError> {
        let device = find_device(self.discovery.as_ref(), position)
            .ok_or_else(|| CaptureError::DeviceNotFound(position.to_string()))?;
        debug!(device = %device, "Resolved camera");
        self.discovery.make_input(&device)
    }

    fn report(&self, what: &str, error: &CaptureError) {
        error!(error = %error, "{} failed", what);
        self.observer.on_configuration_failed(error);
    }

    /// Wire the input and sample output, then start streaming
    fn configure(&self) -> Result<(), CaptureError> {
        if self
            .configured
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Capture session already configured");
            return Ok(());
        }

        let result = self.wire();
        match &result {
            Ok(()) => info!(position = %self.position(), "Capture session running"),
            Err(e) => {
                self.configured.store(false, Ordering::Release);
                self.report("Session setup", e);
            }
        }
        result
    }

    fn wire(&self) -> Result<(), CaptureError> {
        let input = self.resolve_input(self.position())?;
        let mut session = self
            .session
            .lock()
            .map_err(|_| CaptureError::Backend("capture session lock poisoned".to_string()))?;

        let sender = self.frame_sender.clone();
        reconfigure(session.as_mut(), move |session| {
            detach_all(session);
            attach(session, input)?;
            if !session.has_sample_output() {
                session.set_sample_sender(sender);
            }
            Ok(())
        })?;
        session.start_running()
    }

    /// Replace the active input with one for the other position
    fn switch_camera(&self) -> Result<CameraPosition, CaptureError> {
        let next = self.position().toggled();

        if !self.configured.load(Ordering::Acquire) {
            if let Ok(mut position) = self.position.lock() {
                *position = next;
            }
            debug!(position = %next, "Camera selection changed before setup");
            return Ok(next);
        }

        let input = self.resolve_input(next)?;
        let mut session = self
            .session
            .lock()
            .map_err(|_| CaptureError::Backend("capture session lock poisoned".to_string()))?;

        reconfigure(session.as_mut(), move |session| {
            detach_all(session);
            attach(session, input)
        })?;

        if let Ok(mut position) = self.position.lock() {
            *position = next;
        }
        info!(position = %next, "Switched camera");
        Ok(next)
    }

    fn stop(&self) {
        if let Ok(mut session) = self.session.lock()
            && session.is_running()
        {
            session.stop_running();
            info!("Capture session stopped");
        }
        self.configured.store(false, Ordering::Release);
    }
}

/// Owner of the capture pipeline and entry point for user intents
pub struct CaptureController {
    state: Arc<SessionState>,
    permissions: Arc<dyn CameraPermissions>,
    observer: Arc<dyn CameraObserver>,
    queue: SessionQueue,
    delivery: Mutex<Option<CaptureLoopController>>,
    selection: FilterSelection,
    recording: RecordingControl,
    stats: Arc<FrameStats>,
}

impl CaptureController {
    /// Start the frame-delivery thread and session queue
    ///
    /// No camera is touched until [`setup_session`](Self::setup_session).
    pub fn new(
        services: CaptureServices,
        router: FrameRouter,
        settings: ControllerSettings,
    ) -> Result<Self, AppError> {
        let selection = router.selection();
        let recording = router.recording_control();
        let stats = router.stats();

        let (frame_sender, frame_receiver) = sync_channel(settings.frame_queue_depth.max(1));
        let mut router = router;
        let delivery = start_frame_delivery("frame-delivery", frame_receiver, move |sample| {
            router.on_frame(sample);
        })?;
        let queue = SessionQueue::new("session-queue")?;

        info!(
            position = %settings.initial_position,
            queue_depth = settings.frame_queue_depth,
            "Capture controller created"
        );

        Ok(Self {
            state: Arc::new(SessionState {
                session: Mutex::new(services.session),
                discovery: services.discovery,
                observer: Arc::clone(&services.observer),
                position: Mutex::new(settings.initial_position),
                configured: AtomicBool::new(false),
                frame_sender,
            }),
            permissions: services.permissions,
            observer: services.observer,
            queue,
            delivery: Mutex::new(Some(delivery)),
            selection,
            recording,
            stats,
        })
    }

    /// Read camera permission and act on it
    ///
    /// Not determined asks the user (blocking until answered). Denied and
    /// restricted raise the access-denied path once. Authorized notifies the
    /// observer and retries a recording that is waiting to be saved.
    pub fn check_authorization(&self) -> AuthorizationStatus {
        let status = self.permissions.authorization_status();
        debug!(status = %status, "Camera authorization");

        match status {
            AuthorizationStatus::NotDetermined => {
                if self.permissions.request_access() {
                    self.access_granted();
                    AuthorizationStatus::Authorized
                } else {
                    self.access_denied();
                    AuthorizationStatus::Denied
                }
            }
            AuthorizationStatus::Restricted | AuthorizationStatus::Denied => {
                self.access_denied();
                status
            }
            AuthorizationStatus::Authorized => {
                self.access_granted();
                status
            }
            AuthorizationStatus::Unknown => {
                error!("Unexpected camera authorization status, treating as denied");
                self.access_denied();
                status
            }
        }
    }

    fn access_granted(&self) {
        info!("Camera access granted");
        self.observer.on_access_granted();
        if self.recording.has_pending() {
            self.save_pending_recording();
        }
    }

    fn access_denied(&self) {
        warn!("Camera access denied");
        self.observer.on_access_denied(true);
    }

    /// Check authorization and, once granted, set the session up
    pub fn start(&self) -> AuthorizationStatus {
        let status = self.check_authorization();
        if status == AuthorizationStatus::Authorized {
            self.setup_session();
        }
        status
    }

    /// Configure and start the capture session on the session queue
    ///
    /// A no-op once the session is configured.
    pub fn setup_session(&self) {
        let state = Arc::clone(&self.state);
        self.queue.dispatch(move || {
            let _ = state.configure();
        });
    }

    /// Flip between the front and back cameras on the session queue
    pub fn change_camera(&self) {
        let state = Arc::clone(&self.state);
        self.queue.dispatch(move || {
            if let Err(e) = state.switch_camera() {
                state.report("Camera switch", &e);
            }
        });
    }

    /// Select the filter for the next frame
    pub fn change_filter(&self, kind: FilterKind) {
        info!(filter = %kind, "Filter selected");
        self.selection.set(kind);
    }

    pub fn filter(&self) -> FilterKind {
        self.selection.get()
    }

    /// Idle → Start or Capturing → End; ignored while starting or finishing
    pub fn toggle_recording(&self) -> CaptureState {
        self.recording.toggle()
    }

    pub fn recording_state(&self) -> CaptureState {
        self.recording.state()
    }

    pub fn recording(&self) -> &RecordingControl {
        &self.recording
    }

    /// Retry saving a recording whose save failed
    ///
    /// The save runs off the calling thread; its outcome reaches the
    /// observer. Returns whether a retry was started.
    pub fn save_pending_recording(&self) -> bool {
        match self.recording.save_pending() {
            Ok(()) => true,
            Err(RecordingError::NoSession) => false,
            Err(e) => {
                warn!(error = %e, "Pending recording retry not started");
                false
            }
        }
    }

    /// Delete a recording whose save failed
    pub fn discard_pending_recording(&self) -> Result<(), RecordingError> {
        self.recording.discard_pending()
    }

    pub fn position(&self) -> CameraPosition {
        self.state.position()
    }

    pub fn is_configured(&self) -> bool {
        self.state.configured.load(Ordering::Acquire)
    }

    pub fn stats(&self) -> Arc<FrameStats> {
        Arc::clone(&self.stats)
    }

    /// Wait until queued configuration work has run
    pub fn wait_for_configuration(&self) {
        self.queue.wait_idle();
    }

    /// Stop capture and the frame thread; an active recording is finalized
    pub fn shutdown(&self) {
        let state = Arc::clone(&self.state);
        if self.queue.dispatch_sync(move || state.stop()).is_none() {
            self.state.stop();
        }

        let delivery = self.delivery.lock().ok().and_then(|mut d| d.take());
        if let Some(mut delivery) = delivery {
            delivery.stop();
            info!("Frame delivery stopped");
        }
        self.queue.shutdown();
    }
}

impl Drop for CaptureController {
    fn drop(&mut self) {
        self.shutdown();
    }
}
