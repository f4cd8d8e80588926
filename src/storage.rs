// SPDX-License-Identifier: MPL-2.0

//! Storage locations and the media library
//!
//! Recordings are written to an app-private directory first. A finished
//! recording is then copied into the user's videos folder, which plays the
//! role of the media library. The private copy is kept until the next
//! recording starts.

use crate::backends::AuthorizationStatus;
use crate::constants::recording;
use crate::errors::RecordingError;
use std::ffi::CString;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Persistent store for finished videos
pub trait MediaLibrary: Send + Sync {
    fn authorization_status(&self) -> AuthorizationStatus;

    /// Ask for access and return the resulting status
    fn request_authorization(&self) -> AuthorizationStatus;

    /// Copy `file` into the library, returning where it ended up
    fn save_video(&self, file: &Path) -> Result<PathBuf, RecordingError>;
}

/// App-private directory for in-progress recordings
pub fn default_recordings_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(recording::DIRECTORY_NAME)
        .join("recordings")
}

/// Library directory inside the user's videos folder
pub fn default_library_dir() -> PathBuf {
    dirs::video_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Videos")))
        .unwrap_or_else(std::env::temp_dir)
        .join(recording::DIRECTORY_NAME)
}

/// Library file name for a video saved at `timestamp`
pub fn library_filename(timestamp: chrono::DateTime<chrono::Local>) -> String {
    format!(
        "VID_{}.{}",
        timestamp.format("%Y%m%d_%H%M%S"),
        recording::FILE_EXTENSION
    )
}

fn is_writable(path: &Path) -> bool {
    CString::new(path.to_string_lossy().as_bytes())
        .map(|c_path| unsafe { libc::access(c_path.as_ptr(), libc::W_OK) == 0 })
        .unwrap_or(false)
}


/// Media library backed by a directory (XDG videos folder by default)
#[derive(Debug, Clone)]
pub struct VideosLibrary {
    directory: PathBuf,
}

impl VideosLibrary {
    pub fn new(directory: PathBuf) -> Self {
        Self { directory }
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    /// First free name for `filename` in the library
    fn unique_target(&self, filename: &str) -> PathBuf {
        let candidate = self.directory.join(filename);
        if !candidate.exists() {
            return candidate;
        }
        let path = Path::new(filename);
        let stem = path.file_stem().map(|s| s.to_string_lossy()).unwrap_or_default();
        let ext = path.extension().map(|s| s.to_string_lossy()).unwrap_or_default();
        (1..)
            .map(|n| self.directory.join(format!("{}_{}.{}", stem, n, ext)))
            .find(|p| !p.exists())
            .unwrap_or(candidate)
    }
}

impl Default for VideosLibrary {
    fn default() -> Self {
        Self::new(default_library_dir())
    }
}

impl MediaLibrary for VideosLibrary {
    fn authorization_status(&self) -> AuthorizationStatus {
        if !self.directory.exists() {
            AuthorizationStatus::NotDetermined
        } else if is_writable(&self.directory) {
            AuthorizationStatus::Authorized
        } else {
            AuthorizationStatus::Denied
        }
    }

    fn request_authorization(&self) -> AuthorizationStatus {
        if let Err(e) = std::fs::create_dir_all(&self.directory) {
            debug!(dir = %self.directory.display(), error = %e, "Cannot create library directory");
            return AuthorizationStatus::Denied;
        }
        self.authorization_status()
    }

    fn save_video(&self, file: &Path) -> Result<PathBuf, RecordingError> {
        let target = self.unique_target(&library_filename(chrono::Local::now()));
        std::fs::copy(file, &target)
            .map_err(|e| RecordingError::SaveFailed(format!("{}: {}", target.display(), e)))?;
        info!(from = %file.display(), to = %target.display(), "Video added to library");
        Ok(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn temp_dir() -> PathBuf {
        std::env::temp_dir().join(format!("filter-camera-storage-{}", uuid::Uuid::new_v4()))
    }

    #[test]
    fn test_library_filename() {
        let timestamp = chrono::Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        assert_eq!(library_filename(timestamp), "VID_20240309_140507.mov");
    }

    #[test]
    fn test_authorization_follows_directory() {
        let dir = temp_dir();
        let library = VideosLibrary::new(dir.clone());
        assert_eq!(library.authorization_status(), AuthorizationStatus::NotDetermined);
        assert_eq!(library.request_authorization(), AuthorizationStatus::Authorized);
        assert!(dir.exists());
        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_save_copies_without_overwriting() {
        let dir = temp_dir();
        let library = VideosLibrary::new(dir.join("library"));
        library.request_authorization();

        let source = dir.join("recording.mov");
        std::fs::write(&source, b"mdat").unwrap();

        let first = library.save_video(&source).unwrap();
        let second = library.save_video(&source).unwrap();
        assert_ne!(first, second);
        assert!(source.exists());
        assert_eq!(std::fs::read(&second).unwrap(), b"mdat");
        let _ = std::fs::remove_dir_all(dir);
    }
}
