// SPDX-License-Identifier: GPL-3.0-only

//! One recording: a container writer plus its timeline and terminal flags
//!
//! A session starts at the first frame after the user asked to record. Every
//! appended frame is stamped relative to that first frame, so the container
//! timeline starts at zero and only moves forward.

use crate::backends::AuthorizationStatus;
use crate::constants::{BitratePreset, recording, timing};
use crate::errors::RecordingError;
use crate::media::{FormatDescription, ImageBuffer};
use crate::storage::MediaLibrary;
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Lifecycle of a container writer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriterStatus {
    Unknown,
    Writing,
    Completed,
    Failed,
    Cancelled,
}

/// Writer settings derived from the first frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VideoSettings {
    pub width: u32,
    pub height: u32,
    pub bitrate_kbps: u32,
    /// Media time units per second in the container
    pub timescale: u32,
    /// Clockwise rotation stored in the track so players display it upright
    pub orientation_degrees: u32,
    /// Input arrives live; the writer must not wait for data
    pub expects_media_data_in_real_time: bool,
}

impl VideoSettings {
    /// Recommended settings for frames of `format`
    pub fn recommended(format: &FormatDescription, preset: BitratePreset, orientation_degrees: u32) -> Self {
        Self {
            width: format.width,
            height: format.height,
            bitrate_kbps: preset.bitrate_kbps(format.width, format.height),
            timescale: recording::MEDIA_TIMESCALE,
            orientation_degrees: orientation_degrees % 360,
            expects_media_data_in_real_time: true,
        }
    }
}

/// Serializes timestamped frames into a movie file
pub trait ContainerWriter: Send {
    /// Whether the writer input accepts another frame right now
    fn is_ready_for_more_media_data(&self) -> bool;

    fn status(&self) -> WriterStatus;

    /// Description of the failure when [`status`](Self::status) is `Failed`
    fn error(&self) -> Option<String>;

    /// Append a frame at `time` on the zero-based session timeline
    fn append(&mut self, image: &ImageBuffer, time: Duration) -> Result<(), RecordingError>;

    /// Signal that no more frames will be appended
    fn mark_as_finished(&mut self);

    /// Flush and close the file. Blocks until the container is complete.
    fn finish_writing(&mut self) -> Result<(), RecordingError>;
}

/// Opens container writers
pub trait WriterFactory: Send + Sync {
    fn create_writer(
        &self,
        path: &Path,
        settings: &VideoSettings,
    ) -> Result<Box<dyn ContainerWriter>, RecordingError>;
}

/// What happened to an appended frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// Written at this session-relative time
    Appended(Duration),
    /// The writer was busy; the frame was dropped
    NotReady,
    /// The frame's time was not after the last appended one
    OutOfOrder,
    /// The writer rejected the frame
    Failed,
}

/// A recording in progress or awaiting hand-off to the media library
pub struct RecordingSession {
    writer: Box<dyn ContainerWriter>,
    base_time: Duration,
    last_time: Option<Duration>,
    path: PathBuf,
    filename: String,
    finished: bool,
    saved: bool,
    needs_alert: bool,
    appended: u64,
    dropped: u64,
}

impl RecordingSession {
    /// Open a writer for a new uniquely named file in `directory`
    ///
    /// `first_frame_time` becomes the zero point of the session timeline.
    pub fn begin(
        factory: &dyn WriterFactory,
        directory: &Path,
        first_frame_time: Duration,
        settings: &VideoSettings,
    ) -> Result<Self, RecordingError> {
        std::fs::create_dir_all(directory).map_err(|e| {
            RecordingError::WriterCreation(format!("{}: {}", directory.display(), e))
        })?;

        let filename = format!("{}.{}", uuid::Uuid::new_v4(), recording::FILE_EXTENSION);
        let path = directory.join(&filename);
        let writer = factory.create_writer(&path, settings)?;

        info!(
            path = %path.display(),
            width = settings.width,
            height = settings.height,
            bitrate_kbps = settings.bitrate_kbps,
            "Recording session started"
        );

        Ok(Self {
            writer,
            base_time: first_frame_time,
            last_time: None,
            path,
            filename,
            finished: false,
            saved: false,
            needs_alert: false,
            appended: 0,
            dropped: 0,
        })
    }

    /// Append a frame captured at `presentation_time`
    ///
    /// Frames are never buffered or retried: a busy writer drops the frame.
    pub fn append(&mut self, image: &ImageBuffer, presentation_time: Duration) -> AppendOutcome {
        let Some(relative) = presentation_time.checked_sub(self.base_time) else {
            self.dropped += 1;
            debug!(?presentation_time, base = ?self.base_time, "Frame before session start dropped");
            return AppendOutcome::OutOfOrder;
        };
        if self.last_time.is_some_and(|last| relative <= last) {
            self.dropped += 1;
            debug!(?relative, last = ?self.last_time, "Out-of-order frame dropped");
            return AppendOutcome::OutOfOrder;
        }
        if !self.writer.is_ready_for_more_media_data() {
            self.dropped += 1;
            return AppendOutcome::NotReady;
        }

        match self.writer.append(image, relative) {
            Ok(()) => {
                self.last_time = Some(relative);
                self.appended += 1;
                AppendOutcome::Appended(relative)
            }
            Err(e) => {
                self.dropped += 1;
                if self.dropped % timing::FRAME_LOG_INTERVAL == 1 {
                    warn!(error = %e, dropped = self.dropped, "Writer rejected frame");
                }
                AppendOutcome::Failed
            }
        }
    }

    /// Close the writer and hand the file to the media library
    ///
    /// On any failure `needs_alert` is set and the file stays on disk so the
    /// caller can offer a retry or a delete.
    pub fn finalize(&mut self, library: &dyn MediaLibrary) -> Result<PathBuf, RecordingError> {
        let result = self.finish().and_then(|()| self.save_to_library(library));
        match &result {
            Ok(saved) => info!(path = %saved.display(), frames = self.appended, dropped = self.dropped, "Recording saved"),
            Err(e) => {
                self.needs_alert = true;
                warn!(error = %e, path = %self.path.display(), "Recording not saved");
            }
        }
        result
    }

    fn finish(&mut self) -> Result<(), RecordingError> {
        if self.finished {
            return Ok(());
        }
        if self.writer.status() == WriterStatus::Failed {
            return Err(RecordingError::WriterFailed(
                self.writer.error().unwrap_or_else(|| "unknown writer error".to_string()),
            ));
        }
        if !self.writer.is_ready_for_more_media_data() {
            return Err(RecordingError::WriterNotReady);
        }

        self.writer.mark_as_finished();
        self.writer.finish_writing()?;
        self.finished = true;
        Ok(())
    }

    fn save_to_library(&mut self, library: &dyn MediaLibrary) -> Result<PathBuf, RecordingError> {
        let status = match library.authorization_status() {
            AuthorizationStatus::NotDetermined => library.request_authorization(),
            status => status,
        };
        if status != AuthorizationStatus::Authorized {
            return Err(RecordingError::LibraryAccessDenied);
        }

        let saved = library.save_video(&self.path)?;
        self.saved = true;
        self.needs_alert = false;
        Ok(saved)
    }

    /// Remove the backing file. A file that is already gone is not an error.
    pub fn delete_video(&self) -> Result<(), RecordingError> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(path = %self.path.display(), "Recording deleted");
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                warn!(path = %self.path.display(), "Recording file already gone");
                Ok(())
            }
            Err(e) => Err(RecordingError::DeleteFailed(format!("{}: {}", self.path.display(), e))),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    pub fn base_time(&self) -> Duration {
        self.base_time
    }

    pub fn is_finished(&self) -> bool {
        self.finished
    }

    pub fn is_saved(&self) -> bool {
        self.saved
    }

    pub fn needs_alert(&self) -> bool {
        self.needs_alert
    }

    pub fn frames_appended(&self) -> u64 {
        self.appended
    }

    pub fn frames_dropped(&self) -> u64 {
        self.dropped
    }
}

impl fmt::Debug for RecordingSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RecordingSession")
            .field("path", &self.path)
            .field("base_time", &self.base_time)
            .field("finished", &self.finished)
            .field("saved", &self.saved)
            .field("needs_alert", &self.needs_alert)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{PixelBuffer, PixelFormat};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Log {
        times: Vec<Duration>,
        ready: bool,
        failed: bool,
        finished: bool,
    }

    struct LogWriter(Arc<Mutex<Log>>);

    impl ContainerWriter for LogWriter {
        fn is_ready_for_more_media_data(&self) -> bool {
            self.0.lock().unwrap().ready
        }

        fn status(&self) -> WriterStatus {
            if self.0.lock().unwrap().failed {
                WriterStatus::Failed
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
            self.0.lock().unwrap().finished = true;
            Ok(())
        }
    }

    struct LogFactory(Arc<Mutex<Log>>);

    impl WriterFactory for LogFactory {
        fn create_writer(
            &self,
            path: &Path,
            _settings: &VideoSettings,
        ) -> Result<Box<dyn ContainerWriter>, RecordingError> {
            std::fs::write(path, b"moov").map_err(|e| RecordingError::WriterCreation(e.to_string()))?;
            Ok(Box::new(LogWriter(Arc::clone(&self.0))))
        }
    }

    struct Library(AuthorizationStatus);

    impl MediaLibrary for Library {
        fn authorization_status(&self) -> AuthorizationStatus {
            self.0
        }

        fn request_authorization(&self) -> AuthorizationStatus {
            self.0
        }

        fn save_video(&self, file: &Path) -> Result<PathBuf, RecordingError> {
            Ok(file.to_path_buf())
        }
    }

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("filter-camera-session-{}", uuid::Uuid::new_v4()))
    }

    fn settings() -> VideoSettings {
        let format = FormatDescription::new(4, 4, PixelFormat::Bgra);
        VideoSettings::recommended(&format, BitratePreset::Medium, 90)
    }

    fn frame() -> ImageBuffer {
        PixelBuffer::zeroed(4, 4, PixelFormat::Bgra).freeze()
    }

    fn ready_log() -> Arc<Mutex<Log>> {
        Arc::new(Mutex::new(Log {
            ready: true,
            ..Default::default()
        }))
    }

    #[test]
    fn test_relative_timestamps() {
        let log = ready_log();
        let dir = temp_dir();
        let base = Duration::from_secs(100);
        let mut session =
            RecordingSession::begin(&LogFactory(Arc::clone(&log)), &dir, base, &settings()).unwrap();

        assert_eq!(session.append(&frame(), base), AppendOutcome::Appended(Duration::ZERO));
        assert_eq!(
            session.append(&frame(), base + Duration::from_millis(500)),
            AppendOutcome::Appended(Duration::from_millis(500))
        );
        assert_eq!(
            log.lock().unwrap().times,
            vec![Duration::ZERO, Duration::from_millis(500)]
        );
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_out_of_order_dropped() {
        let log = ready_log();
        let dir = temp_dir();
        let base = Duration::from_secs(1);
        let mut session =
            RecordingSession::begin(&LogFactory(Arc::clone(&log)), &dir, base, &settings()).unwrap();

        session.append(&frame(), base + Duration::from_millis(40));
        assert_eq!(
            session.append(&frame(), base + Duration::from_millis(40)),
            AppendOutcome::OutOfOrder
        );
        assert_eq!(
            session.append(&frame(), Duration::from_millis(10)),
            AppendOutcome::OutOfOrder
        );
        assert_eq!(session.frames_dropped(), 2);
        assert_eq!(log.lock().unwrap().times.len(), 1);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_busy_writer_drops_frame() {
        let log = Arc::new(Mutex::new(Log::default()));
        let dir = temp_dir();
        let mut session =
            RecordingSession::begin(&LogFactory(Arc::clone(&log)), &dir, Duration::ZERO, &settings())
                .unwrap();

        assert_eq!(session.append(&frame(), Duration::ZERO), AppendOutcome::NotReady);
        assert!(log.lock().unwrap().times.is_empty());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_finalize_not_ready_keeps_file() {
        let log = Arc::new(Mutex::new(Log::default()));
        let dir = temp_dir();
        let mut session =
            RecordingSession::begin(&LogFactory(Arc::clone(&log)), &dir, Duration::ZERO, &settings())
                .unwrap();

        let result = session.finalize(&Library(AuthorizationStatus::Authorized));
        assert_eq!(result, Err(RecordingError::WriterNotReady));
        assert!(session.needs_alert());
        assert!(session.path().exists());
        assert!(!log.lock().unwrap().finished);
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_finalize_denied_library() {
        let log = ready_log();
        let dir = temp_dir();
        let mut session =
            RecordingSession::begin(&LogFactory(Arc::clone(&log)), &dir, Duration::ZERO, &settings())
                .unwrap();

        let result = session.finalize(&Library(AuthorizationStatus::Denied));
        assert_eq!(result, Err(RecordingError::LibraryAccessDenied));
        assert!(session.is_finished());
        assert!(session.needs_alert());
        assert!(session.path().exists());

        // Retry once access is granted, without finishing the writer twice
        let saved = session.finalize(&Library(AuthorizationStatus::Authorized)).unwrap();
        assert_eq!(saved, session.path());
        assert!(session.is_saved());
        assert!(!session.needs_alert());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_delete_tolerates_missing_file() {
        let log = ready_log();
        let dir = temp_dir();
        let session =
            RecordingSession::begin(&LogFactory(Arc::clone(&log)), &dir, Duration::ZERO, &settings())
                .unwrap();

        session.delete_video().unwrap();
        assert!(!session.path().exists());
        session.delete_video().unwrap();
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_settings_from_format() {
        let format = FormatDescription::new(1920, 1080, PixelFormat::Bgra);
        let settings = VideoSettings::recommended(&format, BitratePreset::Medium, 450);
        assert_eq!(settings.timescale, 600);
        assert_eq!(settings.orientation_degrees, 90);
        assert!(settings.expects_media_data_in_real_time);
        assert_eq!(
            settings.bitrate_kbps,
            BitratePreset::Medium.bitrate_kbps(1920, 1080)
        );
    }
}
