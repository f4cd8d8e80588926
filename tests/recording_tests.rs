// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the recording state machine

mod common;

use common::{FakeLibrary, LogFactory, WriterLog, ready_writer_log, recorder_settings, solid_frame, temp_dir};
use filter_camera::app::{CameraEvent, ChannelObserver};
use filter_camera::errors::RecordingError;
use filter_camera::pipelines::video::{CaptureState, Recorder};
use std::path::PathBuf;
use std::sync::atomic::Ordering;
use std::sync::mpsc::{Receiver, channel};
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct Fixture {
    recorder: Recorder,
    writer: Arc<Mutex<WriterLog>>,
    library: Arc<FakeLibrary>,
    events: Receiver<CameraEvent>,
    directory: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let (sender, events) = channel();
        let writer = ready_writer_log();
        let library = Arc::new(FakeLibrary::default());
        let directory = temp_dir("recording");
        let recorder = Recorder::new(
            Arc::new(LogFactory(Arc::clone(&writer))),
            library.clone(),
            Arc::new(ChannelObserver::new(sender)),
            recorder_settings(directory.clone()),
        );
        Self {
            recorder,
            writer,
            library,
            events,
            directory,
        }
    }

    fn frame_at(&mut self, time: Duration) -> Result<(), RecordingError> {
        self.recorder.update(&solid_frame(8, 6, [0, 0, 0]), time)
    }

    /// Stop the recording and let the finalizer settle
    fn stop(&mut self, time: Duration) {
        assert_eq!(self.recorder.control().toggle(), CaptureState::End);
        self.frame_at(time).unwrap();
        self.recorder.control().wait_for_finalize();
    }
}

impl Drop for Fixture {
    fn drop(&mut self) {
        let _ = std::fs::remove_dir_all(&self.directory);
    }
}

#[test]
fn test_idle_frames_are_not_recorded() {
    let mut fixture = Fixture::new();
    fixture.frame_at(Duration::from_secs(1)).unwrap();

    assert_eq!(fixture.recorder.state(), CaptureState::Idle);
    assert!(fixture.recorder.session().is_none());
    assert!(fixture.writer.lock().unwrap().times.is_empty());
}

#[test]
fn test_timestamps_relative_to_first_frame() {
    let mut fixture = Fixture::new();
    let control = fixture.recorder.control();

    assert_eq!(control.toggle(), CaptureState::Start);
    fixture.frame_at(Duration::from_secs(100)).unwrap();
    assert_eq!(fixture.recorder.state(), CaptureState::Capturing);
    fixture.frame_at(Duration::from_millis(100_500)).unwrap();

    assert_eq!(
        fixture.writer.lock().unwrap().times,
        vec![Duration::ZERO, Duration::from_millis(500)]
    );

    fixture.stop(Duration::from_secs(101));
    assert_eq!(control.state(), CaptureState::Idle);
}

#[test]
fn test_writer_settings_follow_first_frame() {
    let mut fixture = Fixture::new();
    fixture.recorder.control().toggle();
    fixture.frame_at(Duration::ZERO).unwrap();

    let settings = fixture.writer.lock().unwrap().settings.clone().unwrap();
    assert_eq!((settings.width, settings.height), (8, 6));
    assert_eq!(settings.orientation_degrees, 90);
    assert!(settings.expects_media_data_in_real_time);
}

#[test]
fn test_toggle_ignored_while_finishing() {
    let mut fixture = Fixture::new();
    let control = fixture.recorder.control();

    control.toggle();
    fixture.frame_at(Duration::ZERO).unwrap();
    assert_eq!(control.toggle(), CaptureState::End);
    assert_eq!(control.toggle(), CaptureState::End);

    fixture.frame_at(Duration::from_secs(1)).unwrap();
    control.wait_for_finalize();
    assert_eq!(control.state(), CaptureState::Idle);
}

#[test]
fn test_only_one_session_at_a_time() {
    let mut fixture = Fixture::new();
    fixture.recorder.control().toggle();
    fixture.frame_at(Duration::ZERO).unwrap();

    let second = fixture
        .recorder
        .begin(&solid_frame(8, 6, [0, 0, 0]), Duration::from_secs(1));
    assert_eq!(second, Err(RecordingError::AlreadyActive));
}

#[test]
fn test_saved_recording_reaches_library() {
    let mut fixture = Fixture::new();
    fixture.recorder.control().toggle();
    fixture.frame_at(Duration::ZERO).unwrap();
    fixture.stop(Duration::from_secs(1));

    let saved = fixture.library.saved.lock().unwrap().clone();
    assert_eq!(saved.len(), 1);
    assert!(fixture.writer.lock().unwrap().finished);

    let events: Vec<CameraEvent> = fixture.events.try_iter().collect();
    assert_eq!(events, vec![CameraEvent::RecordingSaved(saved[0].clone())]);
    assert!(!fixture.recorder.control().has_pending());
}

#[test]
fn test_busy_writer_keeps_file_for_retry() {
    let mut fixture = Fixture::new();
    let control = fixture.recorder.control();
    control.toggle();
    fixture.frame_at(Duration::ZERO).unwrap();

    fixture.writer.lock().unwrap().ready = false;
    fixture.stop(Duration::from_secs(1));

    assert_eq!(control.state(), CaptureState::Idle);
    assert!(control.needs_alert());
    let path = control.pending_path().unwrap();
    assert!(path.exists());
    assert!(fixture.library.saved.lock().unwrap().is_empty());

    let events: Vec<CameraEvent> = fixture.events.try_iter().collect();
    assert_eq!(
        events,
        vec![CameraEvent::SaveFailed {
            prompt_retry_or_delete: true
        }]
    );

    fixture.writer.lock().unwrap().ready = true;
    control.save_pending().unwrap();
    control.wait_for_finalize();

    assert!(!control.has_pending());
    assert_eq!(*fixture.library.saved.lock().unwrap(), vec![path.clone()]);
    let events: Vec<CameraEvent> = fixture.events.try_iter().collect();
    assert_eq!(events, vec![CameraEvent::RecordingSaved(path)]);
}

#[test]
fn test_retry_finishes_on_finalizer_thread() {
    let mut fixture = Fixture::new();
    let control = fixture.recorder.control();
    control.toggle();
    fixture.frame_at(Duration::ZERO).unwrap();

    fixture.writer.lock().unwrap().ready = false;
    fixture.stop(Duration::from_secs(1));
    assert!(control.has_pending());

    fixture.writer.lock().unwrap().ready = true;
    control.save_pending().unwrap();
    control.wait_for_finalize();

    let writer = fixture.writer.lock().unwrap();
    assert!(writer.finished);
    assert_eq!(writer.finish_thread.as_deref(), Some("recording-finalize"));
}

#[test]
fn test_denied_library_then_discard() {
    let mut fixture = Fixture::new();
    let control = fixture.recorder.control();
    fixture.library.denied.store(true, Ordering::SeqCst);

    control.toggle();
    fixture.frame_at(Duration::ZERO).unwrap();
    fixture.stop(Duration::from_secs(1));

    let path = control.pending_path().unwrap();
    fixture.events.try_iter().for_each(drop);

    control.save_pending().unwrap();
    control.wait_for_finalize();
    assert!(control.has_pending());
    let events: Vec<CameraEvent> = fixture.events.try_iter().collect();
    assert_eq!(
        events,
        vec![CameraEvent::SaveFailed {
            prompt_retry_or_delete: true
        }]
    );

    control.discard_pending().unwrap();
    assert!(!control.has_pending());
    assert!(!path.exists());
    assert_eq!(control.discard_pending(), Err(RecordingError::NoSession));
    assert_eq!(control.save_pending(), Err(RecordingError::NoSession));
}

#[test]
fn test_new_recording_replaces_pending_one() {
    let mut fixture = Fixture::new();
    let control = fixture.recorder.control();
    fixture.library.denied.store(true, Ordering::SeqCst);

    control.toggle();
    fixture.frame_at(Duration::ZERO).unwrap();
    fixture.stop(Duration::from_secs(1));
    let stale = control.pending_path().unwrap();

    fixture.library.denied.store(false, Ordering::SeqCst);
    control.toggle();
    fixture.frame_at(Duration::from_secs(2)).unwrap();

    assert!(!stale.exists());
    assert!(!control.has_pending());
    assert_eq!(fixture.recorder.state(), CaptureState::Capturing);
}

#[test]
fn test_flush_finalizes_open_session() {
    let mut fixture = Fixture::new();
    fixture.recorder.control().toggle();
    fixture.frame_at(Duration::ZERO).unwrap();

    fixture.recorder.flush();

    assert_eq!(fixture.recorder.state(), CaptureState::Idle);
    assert!(fixture.writer.lock().unwrap().finished);
    assert_eq!(fixture.library.saved.lock().unwrap().len(), 1);
}

#[test]
fn test_format_change_ends_recording() {
    let mut fixture = Fixture::new();
    let control = fixture.recorder.control();
    control.toggle();
    fixture.frame_at(Duration::ZERO).unwrap();

    // A camera with another resolution takes over mid-recording
    fixture
        .recorder
        .update(&solid_frame(4, 4, [0, 0, 0]), Duration::from_millis(40))
        .unwrap();
    control.wait_for_finalize();

    assert_eq!(control.state(), CaptureState::Idle);
    assert!(fixture.recorder.session().is_none());
    let writer = fixture.writer.lock().unwrap();
    assert_eq!(writer.times, vec![Duration::ZERO]);
    assert!(writer.finished);
    drop(writer);
    assert_eq!(fixture.library.saved.lock().unwrap().len(), 1);

    // The next recording opens a writer for the new size
    control.toggle();
    fixture
        .recorder
        .update(&solid_frame(4, 4, [0, 0, 0]), Duration::from_secs(1))
        .unwrap();
    let settings = fixture.writer.lock().unwrap().settings.clone().unwrap();
    assert_eq!((settings.width, settings.height), (4, 4));
}
