// SPDX-License-Identifier: MPL-2.0

//! Recording controller: the Idle → Start → Capturing → End state machine
//!
//! [`Recorder`] lives on the frame-delivery thread and owns the active
//! [`RecordingSession`]. [`RecordingControl`] is the cloneable handle the UI
//! side uses to toggle recording and to retry or discard a recording whose
//! save failed. The state is a single atomic, so both sides agree on it
//! without a lock, and the single-session invariant follows from the
//! transitions themselves.

use super::session::{AppendOutcome, RecordingSession, VideoSettings, WriterFactory};
use crate::app::CameraObserver;
use crate::constants::{BitratePreset, timing};
use crate::errors::RecordingError;
use crate::media::{FormatDescription, ImageBuffer};
use crate::storage::MediaLibrary;
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Recording lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CaptureState {
    Idle = 0,
    /// Recording requested; the next frame opens the session
    Start = 1,
    Capturing = 2,
    /// Stop requested; the next frame hands the session to the finalizer
    End = 3,
}

impl CaptureState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => CaptureState::Start,
            2 => CaptureState::Capturing,
            3 => CaptureState::End,
            _ => CaptureState::Idle,
        }
    }
}

impl fmt::Display for CaptureState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CaptureState::Idle => "idle",
            CaptureState::Start => "starting",
            CaptureState::Capturing => "recording",
            CaptureState::End => "finishing",
        };
        write!(f, "{}", name)
    }
}

/// Settings the recorder applies to every new session
#[derive(Debug, Clone)]
pub struct RecorderSettings {
    /// App-private directory for in-progress files
    pub directory: PathBuf,
    pub bitrate: BitratePreset,
    pub orientation_degrees: u32,
}

/// State shared between the frame thread, the finalizer and the UI handle
struct RecorderShared {
    state: AtomicU8,
    /// A recording whose save failed, kept for retry or deletion
    pending: Mutex<Option<RecordingSession>>,
    /// File of the last recording, deleted when the next one starts
    previous: Mutex<Option<PathBuf>>,
    /// Running `recording-finalize` threads
    finalizers: Mutex<Vec<JoinHandle<()>>>,
    library: Arc<dyn MediaLibrary>,
    observer: Arc<dyn CameraObserver>,
}

impl RecorderShared {
    fn state(&self) -> CaptureState {
        CaptureState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn transition(&self, from: CaptureState, to: CaptureState) -> bool {
        let moved = self
            .state
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok();
        if moved {
            debug!(from = %from, to = %to, "Recording state");
        }
        moved
    }

    fn set_idle(&self) {
        self.state.store(CaptureState::Idle as u8, Ordering::Release);
        debug!("Recording state idle");
    }

    /// Finalize `session` and report the outcome to the observer
    ///
    /// A session that could not be saved becomes the pending recording.
    fn settle(&self, mut session: RecordingSession) -> bool {
        match session.finalize(self.library.as_ref()) {
            Ok(saved) => {
                if let Ok(mut previous) = self.previous.lock() {
                    *previous = Some(session.path().to_path_buf());
                }
                self.observer.on_recording_saved(&saved);
                true
            }
            Err(e) => {
                warn!(error = %e, file = session.filename(), "Recording kept for retry");
                if let Ok(mut pending) = self.pending.lock() {
                    *pending = Some(session);
                }
                false
            }
        }
    }

    /// Settle a session that just ended and return to Idle
    fn complete(&self, session: RecordingSession) {
        let saved = self.settle(session);
        self.set_idle();
        if !saved {
            self.observer.on_save_failed(true);
        }
    }
}

/// Run `job` with `session` on a `recording-finalize` thread
///
/// If the thread cannot be spawned the job runs on the calling thread.
fn spawn_finalizer(
    shared: &Arc<RecorderShared>,
    session: RecordingSession,
    job: fn(&RecorderShared, RecordingSession),
) {
    // The slot lets the session be recovered if the thread cannot start
    let session_slot = Arc::new(Mutex::new(Some(session)));
    let thread_slot = Arc::clone(&session_slot);
    let thread_shared = Arc::clone(shared);
    let spawned = thread::Builder::new()
        .name("recording-finalize".to_string())
        .spawn(move || {
            if let Some(session) = thread_slot.lock().ok().and_then(|mut s| s.take()) {
                job(thread_shared.as_ref(), session);
            }
        });

    match spawned {
        Ok(handle) => {
            if let Ok(mut finalizers) = shared.finalizers.lock() {
                finalizers.retain(|h| !h.is_finished());
                finalizers.push(handle);
            }
        }
        Err(e) => {
            warn!(error = %e, "Could not spawn finalizer, finalizing inline");
            if let Some(session) = session_slot.lock().ok().and_then(|mut s| s.take()) {
                job(shared.as_ref(), session);
            }
        }
    }
}

/// Frame-side recording controller
pub struct Recorder {
    shared: Arc<RecorderShared>,
    session: Option<RecordingSession>,
    /// Frame format the open session's writer was created for
    format: Option<FormatDescription>,
    factory: Arc<dyn WriterFactory>,
    settings: RecorderSettings,
}

impl Recorder {
    pub fn new(
        factory: Arc<dyn WriterFactory>,
        library: Arc<dyn MediaLibrary>,
        observer: Arc<dyn CameraObserver>,
        settings: RecorderSettings,
    ) -> Self {
        Self {
            shared: Arc::new(RecorderShared {
                state: AtomicU8::new(CaptureState::Idle as u8),
                pending: Mutex::new(None),
                previous: Mutex::new(None),
                finalizers: Mutex::new(Vec::new()),
                library,
                observer,
            }),
            session: None,
            format: None,
            factory,
            settings,
        }
    }

    /// UI-side handle sharing this recorder's state
    pub fn control(&self) -> RecordingControl {
        RecordingControl {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn state(&self) -> CaptureState {
        self.shared.state()
    }

    /// The active session, if one is open
    pub fn session(&self) -> Option<&RecordingSession> {
        self.session.as_ref()
    }

    /// Advance the state machine with one frame
    ///
    /// Called for every processed frame, in capture order.
    pub fn update(&mut self, output: &ImageBuffer, time: Duration) -> Result<(), RecordingError> {
        match self.shared.state() {
            CaptureState::Idle => Ok(()),
            CaptureState::Start => match self.begin(output, time) {
                Ok(()) => {
                    self.shared.transition(CaptureState::Start, CaptureState::Capturing);
                    self.append(output, time);
                    Ok(())
                }
                Err(e) => {
                    error!(error = %e, "Could not start recording");
                    self.shared.transition(CaptureState::Start, CaptureState::Idle);
                    Err(e)
                }
            },
            CaptureState::Capturing => {
                if self.format.is_some_and(|format| format != output.format_description()) {
                    // The writer cannot take frames of another size; close the file
                    warn!(
                        width = output.width(),
                        height = output.height(),
                        "Frame format changed, ending recording"
                    );
                    self.shared.transition(CaptureState::Capturing, CaptureState::End);
                    self.finish();
                    return Ok(());
                }
                self.append(output, time);
                Ok(())
            }
            CaptureState::End => {
                self.finish();
                Ok(())
            }
        }
    }

    /// Open a new session whose timeline starts at `first_frame_time`
    ///
    /// Rejected while a session is open. A recording still waiting for a
    /// save retry is discarded first, as is the previous recording's file.
    pub fn begin(&mut self, first_frame: &ImageBuffer, first_frame_time: Duration) -> Result<(), RecordingError> {
        if self.session.is_some() {
            return Err(RecordingError::AlreadyActive);
        }

        if let Some(stale) = self.shared.pending.lock().ok().and_then(|mut p| p.take()) {
            warn!(file = stale.filename(), "Discarding unsaved recording");
            if let Err(e) = stale.delete_video() {
                warn!(error = %e, "Failed to delete unsaved recording");
            }
        }
        if let Some(previous) = self.shared.previous.lock().ok().and_then(|mut p| p.take())
            && let Err(e) = std::fs::remove_file(&previous)
        {
            debug!(path = %previous.display(), error = %e, "Previous recording not removed");
        }

        let format = first_frame.format_description();
        let settings = VideoSettings::recommended(
            &format,
            self.settings.bitrate,
            self.settings.orientation_degrees,
        );
        self.session = Some(RecordingSession::begin(
            self.factory.as_ref(),
            &self.settings.directory,
            first_frame_time,
            &settings,
        )?);
        self.format = Some(format);
        Ok(())
    }

    fn append(&mut self, output: &ImageBuffer, time: Duration) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let AppendOutcome::NotReady = session.append(output, time)
            && session.frames_dropped() % timing::FRAME_LOG_INTERVAL == 1
        {
            debug!(dropped = session.frames_dropped(), "Writer busy, dropping frames");
        }
    }

    /// Hand the open session to a `recording-finalize` thread
    fn finish(&mut self) {
        self.format = None;
        let Some(session) = self.session.take() else {
            // Already handed off; the finalizer returns the state to Idle
            return;
        };

        info!(
            frames = session.frames_appended(),
            dropped = session.frames_dropped(),
            "Finalizing recording"
        );
        spawn_finalizer(&self.shared, session, RecorderShared::complete);
    }

    /// Finish an in-progress recording before shutdown and wait for it
    pub fn flush(&mut self) {
        match self.shared.state() {
            CaptureState::Capturing => {
                self.shared.transition(CaptureState::Capturing, CaptureState::End);
                self.finish();
            }
            CaptureState::End => self.finish(),
            CaptureState::Start => {
                self.shared.transition(CaptureState::Start, CaptureState::Idle);
            }
            CaptureState::Idle => {}
        }
        self.control().wait_for_finalize();
    }
}

/// Cloneable UI-side handle to a [`Recorder`]
#[derive(Clone)]
pub struct RecordingControl {
    shared: Arc<RecorderShared>,
}

impl RecordingControl {
    pub fn state(&self) -> CaptureState {
        self.shared.state()
    }

    /// Idle → Start or Capturing → End; a no-op in Start and End
    ///
    /// Returns the state after the call.
    pub fn toggle(&self) -> CaptureState {
        if self.shared.transition(CaptureState::Idle, CaptureState::Start) {
            info!("Recording requested");
            return CaptureState::Start;
        }
        if self.shared.transition(CaptureState::Capturing, CaptureState::End) {
            info!("Recording stop requested");
            return CaptureState::End;
        }
        let state = self.shared.state();
        debug!(state = %state, "Recording toggle ignored");
        state
    }

    pub fn has_pending(&self) -> bool {
        self.shared.pending.lock().map(|p| p.is_some()).unwrap_or(false)
    }

    /// Whether the pending recording is waiting on the user
    pub fn needs_alert(&self) -> bool {
        self.shared
            .pending
            .lock()
            .map(|p| p.as_ref().is_some_and(|s| s.needs_alert()))
            .unwrap_or(false)
    }

    /// Path of the pending recording's file
    pub fn pending_path(&self) -> Option<PathBuf> {
        self.shared
            .pending
            .lock()
            .ok()
            .and_then(|p| p.as_ref().map(|s| s.path().to_path_buf()))
    }

    /// Retry saving the pending recording on a `recording-finalize` thread
    ///
    /// Returns once the retry is under way. The outcome reaches the observer
    /// as `on_recording_saved`, or as `on_save_failed` with the recording
    /// pending again.
    pub fn save_pending(&self) -> Result<(), RecordingError> {
        let session = self
            .shared
            .pending
            .lock()
            .ok()
            .and_then(|mut p| p.take())
            .ok_or(RecordingError::NoSession)?;

        info!(file = session.filename(), "Retrying save of pending recording");
        spawn_finalizer(&self.shared, session, |shared, session| {
            if !shared.settle(session) {
                shared.observer.on_save_failed(true);
            }
        });
        Ok(())
    }

    /// Delete the pending recording's file and forget it
    pub fn discard_pending(&self) -> Result<(), RecordingError> {
        let session = self
            .shared
            .pending
            .lock()
            .ok()
            .and_then(|mut p| p.take())
            .ok_or(RecordingError::NoSession)?;
        session.delete_video()
    }

    /// Block until every running finalizer has completed
    pub fn wait_for_finalize(&self) {
        let handles = self
            .shared
            .finalizers
            .lock()
            .map(|mut f| std::mem::take(&mut *f))
            .unwrap_or_default();
        for handle in handles {
            if handle.join().is_err() {
                error!("Recording finalizer panicked");
                self.shared.set_idle();
            }
        }
    }
}

impl fmt::Debug for RecordingControl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingControl")
            .field("state", &self.state())
            .field("pending", &self.has_pending())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_round_trip() {
        for state in [
            CaptureState::Idle,
            CaptureState::Start,
            CaptureState::Capturing,
            CaptureState::End,
        ] {
            assert_eq!(CaptureState::from_u8(state as u8), state);
        }
        assert_eq!(CaptureState::from_u8(42), CaptureState::Idle);
    }
}
