// SPDX-License-Identifier: GPL-3.0-only

//! Camera access authorization
//!
//! Inside Flatpak, camera access is granted through the XDG desktop portal
//! (`org.freedesktop.portal.Camera`). Outside the sandbox there is no
//! dialog: access is whatever the video device nodes allow the current user.

use crate::constants::{app_info, timing};
use futures::StreamExt;
use std::collections::HashMap;
use std::ffi::CString;
use std::fmt;
use std::sync::Mutex;
use tracing::{debug, info, warn};
use zbus::zvariant::{OwnedValue, Value};

/// Platform permission state for a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthorizationStatus {
    /// The user has not been asked yet
    NotDetermined,
    /// Access is blocked by policy and cannot be requested
    Restricted,
    /// The user refused access
    Denied,
    Authorized,
    /// The platform returned something this build does not understand
    Unknown,
}

impl fmt::Display for AuthorizationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AuthorizationStatus::NotDetermined => "not determined",
            AuthorizationStatus::Restricted => "restricted",
            AuthorizationStatus::Denied => "denied",
            AuthorizationStatus::Authorized => "authorized",
            AuthorizationStatus::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

/// Camera permission queries and requests
pub trait CameraPermissions: Send + Sync {
    fn authorization_status(&self) -> AuthorizationStatus;

    /// Ask for access; blocks until the user answers. Returns whether access
    /// was granted.
    fn request_access(&self) -> bool;
}

/// Classify device nodes by accessibility
///
/// `nodes` yields `(exists, readable_and_writable)` per node.
pub fn status_from_nodes(nodes: impl IntoIterator<Item = (bool, bool)>) -> AuthorizationStatus {
    let mut any = false;
    for (exists, accessible) in nodes {
        if !exists {
            continue;
        }
        if accessible {
            return AuthorizationStatus::Authorized;
        }
        any = true;
    }
    if any {
        AuthorizationStatus::Denied
    } else {
        // Nothing to gate: PipeWire mediates libcamera devices itself
        AuthorizationStatus::Authorized
    }
}

/// Map an `org.freedesktop.portal.Request::Response` code
pub fn status_from_portal_response(response: u32) -> AuthorizationStatus {
    match response {
        0 => AuthorizationStatus::Authorized,
        1 => AuthorizationStatus::Denied,
        2 => AuthorizationStatus::Restricted,
        _ => AuthorizationStatus::Unknown,
    }
}

fn video_node_access() -> Vec<(bool, bool)> {
    let Ok(entries) = std::fs::read_dir("/dev") else {
        return Vec::new();
    };

    entries
        .flatten()
        .filter(|entry| entry.file_name().to_string_lossy().starts_with("video"))
        .map(|entry| {
            let path = entry.path();
            let accessible = CString::new(path.to_string_lossy().as_bytes())
                .map(|c_path| unsafe { libc::access(c_path.as_ptr(), libc::R_OK | libc::W_OK) == 0 })
                .unwrap_or(false);
            (true, accessible)
        })
        .collect()
}

async fn portal_access_camera() -> Result<u32, String> {
    let connection = zbus::Connection::session()
        .await
        .map_err(|e| format!("Failed to connect to session D-Bus: {}", e))?;

    // The request object path is predictable from our unique name and token,
    // so subscribe to its Response before calling to avoid missing it
    let token = format!("filter_camera_{}", uuid::Uuid::new_v4().simple());
    let sender = connection
        .unique_name()
        .ok_or("D-Bus connection has no unique name")?
        .as_str()
        .trim_start_matches(':')
        .replace('.', "_");
    let request_path = format!("/org/freedesktop/portal/desktop/request/{}/{}", sender, token);

    let request = zbus::Proxy::new(
        &connection,
        "org.freedesktop.portal.Desktop",
        request_path.as_str(),
        "org.freedesktop.portal.Request",
    )
    .await
    .map_err(|e| format!("Failed to create request proxy: {}", e))?;
    let mut responses = request
        .receive_signal("Response")
        .await
        .map_err(|e| format!("Failed to subscribe to portal response: {}", e))?;

    let camera = zbus::Proxy::new(
        &connection,
        "org.freedesktop.portal.Desktop",
        "/org/freedesktop/portal/desktop",
        "org.freedesktop.portal.Camera",
    )
    .await
    .map_err(|e| format!("Failed to create camera portal proxy: {}", e))?;

    let mut options: HashMap<&str, Value> = HashMap::new();
    options.insert("handle_token", Value::new(token.as_str()));
    let handle: zbus::zvariant::OwnedObjectPath = camera
        .call("AccessCamera", &(options,))
        .await
        .map_err(|e| format!("AccessCamera failed: {}", e))?;
    debug!(handle = %handle, "Camera portal request sent");

    let message = tokio::time::timeout(timing::PORTAL_TIMEOUT, responses.next())
        .await
        .map_err(|_| "Timed out waiting for the camera portal".to_string())?
        .ok_or("Camera portal closed the request")?;
    let (response, _results): (u32, HashMap<String, OwnedValue>) = message
        .body()
        .deserialize()
        .map_err(|e| format!("Malformed portal response: {}", e))?;
    Ok(response)
}

/// Permissions of the running system
#[derive(Debug, Default)]
pub struct SystemCameraPermissions {
    portal_answer: Mutex<Option<AuthorizationStatus>>,
}

impl SystemCameraPermissions {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CameraPermissions for SystemCameraPermissions {
    fn authorization_status(&self) -> AuthorizationStatus {
        if app_info::is_flatpak() {
            // The portal only answers requests; the answer is remembered
            return self
                .portal_answer
                .lock()
                .ok()
                .and_then(|answer| *answer)
                .unwrap_or(AuthorizationStatus::NotDetermined);
        }
        status_from_nodes(video_node_access())
    }

    fn request_access(&self) -> bool {
        if !app_info::is_flatpak() {
            return self.authorization_status() == AuthorizationStatus::Authorized;
        }

        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
        {
            Ok(runtime) => runtime,
            Err(e) => {
                warn!(error = %e, "Failed to create runtime for portal request");
                return false;
            }
        };

        let status = match runtime.block_on(portal_access_camera()) {
            Ok(response) => status_from_portal_response(response),
            Err(e) => {
                warn!(error = %e, "Camera portal request failed");
                AuthorizationStatus::Unknown
            }
        };
        info!(status = %status, "Camera portal answered");

        if let Ok(mut answer) = self.portal_answer.lock() {
            *answer = Some(status);
        }
        status == AuthorizationStatus::Authorized
    }
}
