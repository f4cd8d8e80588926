// SPDX-License-Identifier: GPL-3.0-only

//! In-memory stand-ins for the camera, permissions, writer and library

#![allow(dead_code)]

use filter_camera::app::{
    CameraEvent, CaptureController, CaptureServices, ChannelObserver, ControllerSettings,
    FilterSelection, FrameRouter,
};
use filter_camera::backends::camera::{
    CameraPosition, CaptureDevice, CaptureSession, DeviceDiscovery, DeviceInput, DeviceSource,
    DeviceType, FrameSample, SampleSender, SessionClock,
};
use filter_camera::backends::{AuthorizationStatus, CameraPermissions};
use filter_camera::constants::BitratePreset;
use filter_camera::display::{FrameSlot, LatestFrameSink};
use filter_camera::errors::{CaptureError, RecordingError};
use filter_camera::filters::{CpuBackend, FilterKind, FilterStage};
use filter_camera::media::{ImageBuffer, PixelBuffer, PixelFormat};
use filter_camera::pipelines::video::{
    ContainerWriter, Recorder, RecorderSettings, VideoSettings, WriterFactory, WriterStatus,
};
use filter_camera::storage::MediaLibrary;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::mpsc::{Receiver, channel};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

pub fn temp_dir(tag: &str) -> PathBuf {
    std::env::temp_dir().join(format!("filter-camera-{}-{}", tag, uuid::Uuid::new_v4()))
}

/// A BGRA frame whose pixels are all `(b, g, r, 255)`
pub fn solid_frame(width: u32, height: u32, bgr: [u8; 3]) -> ImageBuffer {
    let mut data = Vec::with_capacity((width * height * 4) as usize);
    for _ in 0..width * height {
        data.extend_from_slice(&[bgr[0], bgr[1], bgr[2], 255]);
    }
    PixelBuffer::new(width, height, PixelFormat::Bgra, width * 4, data).freeze()
}

/// Poll `done` until it holds or two seconds pass
pub fn eventually(done: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < Duration::from_secs(2) {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    done()
}

// Camera

pub fn device(id: &str, position: CameraPosition) -> CaptureDevice {
    CaptureDevice {
        id: id.to_string(),
        name: format!("{} camera", position),
        position,
        device_type: DeviceType::WideAngleCamera,
        source: DeviceSource::V4l2 {
            path: format!("/dev/{}", id),
        },
    }
}

pub struct FakeDiscovery(pub Vec<CaptureDevice>);

impl FakeDiscovery {
    /// A back camera `video0` and a front camera `video1`
    pub fn both() -> Self {
        Self(vec![
            device("video0", CameraPosition::Back),
            device("video1", CameraPosition::Front),
        ])
    }
}

impl DeviceDiscovery for FakeDiscovery {
    fn devices(&self) -> Vec<CaptureDevice> {
        self.0.clone()
    }

    fn make_input(&self, device: &CaptureDevice) -> Result<DeviceInput, CaptureError> {
        Ok(DeviceInput::new(device.clone()))
    }
}

/// What a [`FakeSession`] went through, visible to the test
#[derive(Default)]
pub struct SessionLog {
    pub starts: u32,
    pub stops: u32,
    pub running: bool,
    /// Input ids after each committed configuration
    pub commits: Vec<Vec<String>>,
    pub sender: Option<SampleSender>,
    /// Timeline the fake stream stamps delivered frames on
    pub clock: SessionClock,
}

impl SessionLog {
    pub fn current_inputs(&self) -> Vec<String> {
        self.commits.last().cloned().unwrap_or_default()
    }
}

pub struct FakeSession {
    inputs: Vec<DeviceInput>,
    log: Arc<Mutex<SessionLog>>,
}

impl FakeSession {
    pub fn new() -> (Self, Arc<Mutex<SessionLog>>) {
        let log = Arc::new(Mutex::new(SessionLog::default()));
        (
            Self {
                inputs: Vec::new(),
                log: Arc::clone(&log),
            },
            log,
        )
    }
}

impl CaptureSession for FakeSession {
    fn begin_configuration(&mut self) {}

    fn commit_configuration(&mut self) -> Result<(), CaptureError> {
        let ids: Vec<String> = self.inputs.iter().map(|i| i.id().to_string()).collect();
        let mut log = self.log.lock().unwrap();
        // A new input on a running session means a new stream
        if log.running && log.commits.last() != Some(&ids) {
            log.clock.stream_started();
        }
        log.commits.push(ids);
        Ok(())
    }

    fn can_add_input(&self, _input: &DeviceInput) -> bool {
        self.inputs.is_empty()
    }

    fn add_input(&mut self, input: DeviceInput) -> Result<(), CaptureError> {
        self.inputs.push(input);
        Ok(())
    }

    fn remove_input(&mut self, input_id: &str) -> Option<DeviceInput> {
        let index = self.inputs.iter().position(|i| i.id() == input_id)?;
        Some(self.inputs.remove(index))
    }

    fn inputs(&self) -> &[DeviceInput] {
        &self.inputs
    }

    fn set_sample_sender(&mut self, sender: SampleSender) {
        self.log.lock().unwrap().sender = Some(sender);
    }

    fn has_sample_output(&self) -> bool {
        self.log.lock().unwrap().sender.is_some()
    }

    fn start_running(&mut self) -> Result<(), CaptureError> {
        let mut log = self.log.lock().unwrap();
        log.starts += 1;
        log.running = true;
        log.clock.stream_started();
        Ok(())
    }

    fn stop_running(&mut self) {
        let mut log = self.log.lock().unwrap();
        log.stops += 1;
        log.running = false;
    }

    fn is_running(&self) -> bool {
        self.log.lock().unwrap().running
    }
}

/// Permissions with a fixed status and a scripted answer to the prompt
pub struct FakePermissions {
    status: Mutex<AuthorizationStatus>,
    answer: bool,
    requests: AtomicU32,
}

impl FakePermissions {
    pub fn new(status: AuthorizationStatus, answer: bool) -> Self {
        Self {
            status: Mutex::new(status),
            answer,
            requests: AtomicU32::new(0),
        }
    }

    pub fn requests(&self) -> u32 {
        self.requests.load(Ordering::SeqCst)
    }
}

impl CameraPermissions for FakePermissions {
    fn authorization_status(&self) -> AuthorizationStatus {
        *self.status.lock().unwrap()
    }

    fn request_access(&self) -> bool {
        self.requests.fetch_add(1, Ordering::SeqCst);
        *self.status.lock().unwrap() = if self.answer {
            AuthorizationStatus::Authorized
        } else {
            AuthorizationStatus::Denied
        };
        self.answer
    }
}

// Recording

#[derive(Default)]
pub struct WriterLog {
    pub times: Vec<Duration>,
    pub ready: bool,
    pub finished: bool,
    pub settings: Option<VideoSettings>,
    /// Settings of every writer created, oldest first
    pub created: Vec<VideoSettings>,
    /// Thread that ran the last `finish_writing`
    pub finish_thread: Option<String>,
}

pub fn ready_writer_log() -> Arc<Mutex<WriterLog>> {
    Arc::new(Mutex::new(WriterLog {
        ready: true,
        ..Default::default()
    }))
}

pub struct LogWriter(Arc<Mutex<WriterLog>>);

impl ContainerWriter for LogWriter {
    fn is_ready_for_more_media_data(&self) -> bool {
        self.0.lock().unwrap().ready
    }

    fn status(&self) -> WriterStatus {
        if self.0.lock().unwrap().finished {
            WriterStatus::Completed
        } else {
            WriterStatus::Writing
        }
    }

    fn error(&self) -> Option<String> {
        None
    }

    fn append(&mut self, _image: &ImageBuffer, time: Duration) -> Result<(), RecordingError> {
        self.0.lock().unwrap().times.push(time);
        Ok(())
    }

    fn mark_as_finished(&mut self) {}

    fn finish_writing(&mut self) -> Result<(), RecordingError> {
        let mut log = self.0.lock().unwrap();
        log.finished = true;
        log.finish_thread = std::thread::current().name().map(str::to_string);
        Ok(())
    }
}

/// Creates a placeholder file per recording and logs into one shared log
pub struct LogFactory(pub Arc<Mutex<WriterLog>>);

impl WriterFactory for LogFactory {
    fn create_writer(
        &self,
        path: &Path,
        settings: &VideoSettings,
    ) -> Result<Box<dyn ContainerWriter>, RecordingError> {
        std::fs::write(path, b"moov").map_err(|e| RecordingError::WriterCreation(e.to_string()))?;
        let mut log = self.0.lock().unwrap();
        log.settings = Some(settings.clone());
        log.created.push(settings.clone());
        Ok(Box::new(LogWriter(Arc::clone(&self.0))))
    }
}

/// Library that records saved files and can be switched to refuse access
#[derive(Default)]
pub struct FakeLibrary {
    pub denied: AtomicBool,
    pub saved: Mutex<Vec<PathBuf>>,
}

impl MediaLibrary for FakeLibrary {
    fn authorization_status(&self) -> AuthorizationStatus {
        if self.denied.load(Ordering::SeqCst) {
            AuthorizationStatus::Denied
        } else {
            AuthorizationStatus::Authorized
        }
    }

    fn request_authorization(&self) -> AuthorizationStatus {
        self.authorization_status()
    }

    fn save_video(&self, file: &Path) -> Result<PathBuf, RecordingError> {
        self.saved.lock().unwrap().push(file.to_path_buf());
        Ok(file.to_path_buf())
    }
}

pub fn recorder_settings(directory: PathBuf) -> RecorderSettings {
    RecorderSettings {
        directory,
        bitrate: BitratePreset::Low,
        orientation_degrees: 90,
    }
}

// Controller

/// A controller over fakes plus the handles a test inspects
pub struct Harness {
    pub controller: CaptureController,
    pub events: Receiver<CameraEvent>,
    pub session: Arc<Mutex<SessionLog>>,
    pub permissions: Arc<FakePermissions>,
    pub writer: Arc<Mutex<WriterLog>>,
    pub library: Arc<FakeLibrary>,
    pub slot: FrameSlot,
    pub directory: PathBuf,
}

impl Harness {
    pub fn new(permissions: FakePermissions, discovery: FakeDiscovery) -> Self {
        Self::with_position(permissions, discovery, CameraPosition::Back)
    }

    pub fn with_position(
        permissions: FakePermissions,
        discovery: FakeDiscovery,
        initial_position: CameraPosition,
    ) -> Self {
        let (sender, events) = channel();
        let observer = Arc::new(ChannelObserver::new(sender));
        let permissions = Arc::new(permissions);
        let (session, session_log) = FakeSession::new();
        let writer = ready_writer_log();
        let library = Arc::new(FakeLibrary::default());
        let slot = FrameSlot::new();
        let directory = temp_dir("harness");

        let recorder = Recorder::new(
            Arc::new(LogFactory(Arc::clone(&writer))),
            library.clone(),
            observer.clone(),
            recorder_settings(directory.clone()),
        );
        let router = FrameRouter::new(
            Box::new(FilterStage::new(CpuBackend::new())),
            FilterSelection::new(FilterKind::None),
            recorder,
            Box::new(LatestFrameSink::new(slot.clone())),
        );
        let controller = CaptureController::new(
            CaptureServices {
                session: Box::new(session),
                discovery: Arc::new(discovery),
                permissions: permissions.clone(),
                observer,
            },
            router,
            ControllerSettings {
                initial_position,
                frame_queue_depth: 8,
            },
        )
        .expect("controller");

        Self {
            controller,
            events,
            session: session_log,
            permissions,
            writer,
            library,
            slot,
            directory,
        }
    }

    pub fn events(&self) -> Vec<CameraEvent> {
        self.events.try_iter().collect()
    }

    /// Push a frame into the delivery channel as the driver would
    ///
    /// `stream_time` is the current stream's own timestamp; it is stamped on
    /// the session clock like a real capture stream does.
    pub fn deliver(&self, image: ImageBuffer, stream_time: Duration) {
        let (sender, time) = {
            let log = self.session.lock().unwrap();
            let sender = log.sender.clone().expect("sample output wired");
            (sender, log.clock.stamp(stream_time))
        };
        sender
            .send(FrameSample::new(image, time))
            .expect("frame thread running");
    }
}

impl Drop for Harness {
    fn drop(&mut self) {
        self.controller.shutdown();
        let _ = std::fs::remove_dir_all(&self.directory);
    }
}
