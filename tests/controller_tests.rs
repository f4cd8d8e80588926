// SPDX-License-Identifier: GPL-3.0-only

//! Integration tests for the capture controller over fake platform services

mod common;

use common::{FakeDiscovery, FakePermissions, Harness, device, eventually, solid_frame};
use filter_camera::app::CameraEvent;
use filter_camera::backends::AuthorizationStatus;
use filter_camera::backends::camera::CameraPosition;
use filter_camera::errors::CaptureError;
use filter_camera::filters::FilterKind;
use filter_camera::pipelines::video::CaptureState;
use std::time::Duration;

fn authorized() -> FakePermissions {
    FakePermissions::new(AuthorizationStatus::Authorized, true)
}

#[test]
fn test_denied_access_reports_once_and_never_starts() {
    let harness = Harness::new(
        FakePermissions::new(AuthorizationStatus::Denied, false),
        FakeDiscovery::both(),
    );

    assert_eq!(harness.controller.start(), AuthorizationStatus::Denied);
    harness.controller.wait_for_configuration();

    assert_eq!(
        harness.events(),
        vec![CameraEvent::AccessDenied {
            show_settings_prompt: true
        }]
    );
    assert_eq!(harness.session.lock().unwrap().starts, 0);
    assert_eq!(harness.permissions.requests(), 0);
    assert!(!harness.controller.is_configured());
}

#[test]
fn test_restricted_access_is_treated_as_denied() {
    let harness = Harness::new(
        FakePermissions::new(AuthorizationStatus::Restricted, true),
        FakeDiscovery::both(),
    );

    assert_eq!(harness.controller.start(), AuthorizationStatus::Restricted);
    harness.controller.wait_for_configuration();

    assert_eq!(harness.events().len(), 1);
    assert_eq!(harness.session.lock().unwrap().starts, 0);
}

#[test]
fn test_unknown_status_takes_denied_path() {
    let harness = Harness::new(
        FakePermissions::new(AuthorizationStatus::Unknown, true),
        FakeDiscovery::both(),
    );

    assert_eq!(harness.controller.start(), AuthorizationStatus::Unknown);
    harness.controller.wait_for_configuration();

    assert_eq!(
        harness.events(),
        vec![CameraEvent::AccessDenied {
            show_settings_prompt: true
        }]
    );
    assert_eq!(harness.permissions.requests(), 0);
    assert_eq!(harness.session.lock().unwrap().starts, 0);
    assert!(!harness.controller.is_configured());
}

#[test]
fn test_prompt_granted_starts_session() {
    let harness = Harness::new(
        FakePermissions::new(AuthorizationStatus::NotDetermined, true),
        FakeDiscovery::both(),
    );

    assert_eq!(harness.controller.start(), AuthorizationStatus::Authorized);
    harness.controller.wait_for_configuration();

    assert_eq!(harness.permissions.requests(), 1);
    assert_eq!(harness.events(), vec![CameraEvent::AccessGranted]);
    assert!(harness.controller.is_configured());

    let log = harness.session.lock().unwrap();
    assert_eq!(log.starts, 1);
    assert_eq!(log.current_inputs(), vec!["video0".to_string()]);
    assert!(log.sender.is_some());
}

#[test]
fn test_prompt_refused_reports_denied() {
    let harness = Harness::new(
        FakePermissions::new(AuthorizationStatus::NotDetermined, false),
        FakeDiscovery::both(),
    );

    assert_eq!(harness.controller.start(), AuthorizationStatus::Denied);
    harness.controller.wait_for_configuration();

    assert_eq!(harness.permissions.requests(), 1);
    assert_eq!(
        harness.events(),
        vec![CameraEvent::AccessDenied {
            show_settings_prompt: true
        }]
    );
    assert_eq!(harness.session.lock().unwrap().starts, 0);
}

#[test]
fn test_setup_is_idempotent() {
    let harness = Harness::new(authorized(), FakeDiscovery::both());

    harness.controller.start();
    harness.controller.setup_session();
    harness.controller.setup_session();
    harness.controller.wait_for_configuration();

    let log = harness.session.lock().unwrap();
    assert_eq!(log.starts, 1);
    assert_eq!(log.commits.len(), 1);
}

#[test]
fn test_switch_leaves_exactly_one_input() {
    let harness = Harness::new(authorized(), FakeDiscovery::both());
    harness.controller.start();
    harness.controller.wait_for_configuration();

    harness.controller.change_camera();
    harness.controller.wait_for_configuration();

    assert_eq!(harness.controller.position(), CameraPosition::Front);
    let log = harness.session.lock().unwrap();
    assert_eq!(log.current_inputs(), vec!["video1".to_string()]);
    // No committed configuration ever held both cameras
    assert!(log.commits.iter().all(|inputs| inputs.len() <= 1));
    // Switching does not restart the session
    assert_eq!(log.starts, 1);
}

#[test]
fn test_switch_back_and_forth() {
    let harness = Harness::new(authorized(), FakeDiscovery::both());
    harness.controller.start();
    harness.controller.change_camera();
    harness.controller.change_camera();
    harness.controller.wait_for_configuration();

    assert_eq!(harness.controller.position(), CameraPosition::Back);
    assert_eq!(
        harness.session.lock().unwrap().current_inputs(),
        vec!["video0".to_string()]
    );
}

#[test]
fn test_switch_to_missing_camera_keeps_current_one() {
    let harness = Harness::new(
        authorized(),
        FakeDiscovery(vec![device("video0", CameraPosition::Back)]),
    );
    harness.controller.start();
    harness.controller.wait_for_configuration();
    harness.events();

    harness.controller.change_camera();
    harness.controller.wait_for_configuration();

    assert_eq!(harness.controller.position(), CameraPosition::Back);
    assert_eq!(
        harness.session.lock().unwrap().current_inputs(),
        vec!["video0".to_string()]
    );
    assert_eq!(
        harness.events(),
        vec![CameraEvent::ConfigurationFailed(CaptureError::DeviceNotFound(
            "front".to_string()
        ))]
    );
}

#[test]
fn test_switch_before_setup_selects_initial_camera() {
    let harness = Harness::new(authorized(), FakeDiscovery::both());

    harness.controller.change_camera();
    harness.controller.wait_for_configuration();
    assert_eq!(harness.controller.position(), CameraPosition::Front);
    assert!(harness.session.lock().unwrap().commits.is_empty());

    harness.controller.start();
    harness.controller.wait_for_configuration();
    assert_eq!(
        harness.session.lock().unwrap().current_inputs(),
        vec!["video1".to_string()]
    );
}

#[test]
fn test_missing_camera_fails_setup_and_allows_retry() {
    let harness = Harness::with_position(
        authorized(),
        FakeDiscovery(vec![device("video0", CameraPosition::Back)]),
        CameraPosition::Front,
    );

    harness.controller.start();
    harness.controller.wait_for_configuration();

    assert!(!harness.controller.is_configured());
    assert_eq!(harness.session.lock().unwrap().starts, 0);
    let events = harness.events();
    assert!(events.contains(&CameraEvent::ConfigurationFailed(
        CaptureError::DeviceNotFound("front".to_string())
    )));

    // Flipping to the camera that exists lets setup succeed
    harness.controller.change_camera();
    harness.controller.setup_session();
    harness.controller.wait_for_configuration();
    assert!(harness.controller.is_configured());
    assert_eq!(harness.session.lock().unwrap().starts, 1);
}

#[test]
fn test_frames_reach_display() {
    let harness = Harness::new(authorized(), FakeDiscovery::both());
    harness.controller.start();
    harness.controller.wait_for_configuration();

    harness.deliver(solid_frame(4, 4, [10, 20, 30]), Duration::from_millis(0));
    assert!(eventually(|| harness.slot.generation() == 1));

    let shown = harness.slot.latest().unwrap();
    assert_eq!(shown.pixel(0, 0), [10, 20, 30, 255]);
    assert_eq!(harness.controller.stats().presented(), 1);
}

#[test]
fn test_filter_change_applies_to_next_frame() {
    let harness = Harness::new(authorized(), FakeDiscovery::both());
    harness.controller.start();
    harness.controller.wait_for_configuration();

    harness.controller.change_filter(FilterKind::InvertColor);
    assert_eq!(harness.controller.filter(), FilterKind::InvertColor);

    harness.deliver(solid_frame(4, 4, [10, 20, 30]), Duration::from_millis(0));
    assert!(eventually(|| harness.slot.generation() == 1));

    let shown = harness.slot.latest().unwrap();
    assert_eq!(shown.pixel(0, 0), [245, 235, 225, 255]);
    assert_eq!(harness.controller.stats().filter_failures(), 0);
}

#[test]
fn test_toggle_ignored_while_starting() {
    let harness = Harness::new(authorized(), FakeDiscovery::both());
    harness.controller.start();
    harness.controller.wait_for_configuration();

    assert_eq!(harness.controller.toggle_recording(), CaptureState::Start);
    // No frame has arrived yet, so the request is still pending
    assert_eq!(harness.controller.toggle_recording(), CaptureState::Start);
    assert_eq!(harness.controller.recording_state(), CaptureState::Start);
}

#[test]
fn test_recording_through_controller() {
    let harness = Harness::new(authorized(), FakeDiscovery::both());
    harness.controller.start();
    harness.controller.wait_for_configuration();
    harness.events();

    harness.controller.toggle_recording();
    harness.deliver(solid_frame(4, 4, [1, 2, 3]), Duration::from_secs(10));
    assert!(eventually(
        || harness.controller.recording_state() == CaptureState::Capturing
    ));
    harness.deliver(solid_frame(4, 4, [1, 2, 3]), Duration::from_millis(10_500));
    assert!(eventually(|| harness.writer.lock().unwrap().times.len() == 2));

    assert_eq!(harness.controller.toggle_recording(), CaptureState::End);
    assert_eq!(harness.controller.toggle_recording(), CaptureState::End);
    harness.deliver(solid_frame(4, 4, [1, 2, 3]), Duration::from_secs(11));
    assert!(eventually(
        || harness.controller.recording_state() == CaptureState::Idle
    ));

    let writer = harness.writer.lock().unwrap();
    assert_eq!(
        writer.times,
        vec![Duration::ZERO, Duration::from_millis(500)]
    );
    assert!(writer.finished);
    drop(writer);

    assert_eq!(harness.library.saved.lock().unwrap().len(), 1);
    assert!(
        harness
            .events()
            .iter()
            .any(|e| matches!(e, CameraEvent::RecordingSaved(_)))
    );
}

#[test]
fn test_shutdown_finalizes_active_recording() {
    let harness = Harness::new(authorized(), FakeDiscovery::both());
    harness.controller.start();
    harness.controller.wait_for_configuration();

    harness.controller.toggle_recording();
    harness.deliver(solid_frame(4, 4, [1, 2, 3]), Duration::from_secs(1));
    assert!(eventually(
        || harness.controller.recording_state() == CaptureState::Capturing
    ));

    harness.controller.shutdown();

    assert!(harness.writer.lock().unwrap().finished);
    assert_eq!(harness.controller.recording_state(), CaptureState::Idle);
    assert!(!harness.session.lock().unwrap().running);
}

#[test]
fn test_switch_during_recording_keeps_timeline_increasing() {
    let harness = Harness::new(authorized(), FakeDiscovery::both());
    harness.controller.start();
    harness.controller.wait_for_configuration();

    harness.controller.toggle_recording();
    harness.deliver(solid_frame(4, 4, [1, 2, 3]), Duration::from_secs(10));
    assert!(eventually(
        || harness.controller.recording_state() == CaptureState::Capturing
    ));
    harness.deliver(solid_frame(4, 4, [1, 2, 3]), Duration::from_millis(10_500));
    assert!(eventually(|| harness.writer.lock().unwrap().times.len() == 2));

    harness.controller.change_camera();
    harness.controller.wait_for_configuration();
    assert_eq!(harness.controller.recording_state(), CaptureState::Capturing);

    // The new camera's stream counts from zero again
    harness.deliver(solid_frame(4, 4, [1, 2, 3]), Duration::from_millis(30));
    harness.deliver(solid_frame(4, 4, [1, 2, 3]), Duration::from_millis(60));
    assert!(eventually(|| harness.writer.lock().unwrap().times.len() == 4));

    let times = harness.writer.lock().unwrap().times.clone();
    assert!(times.windows(2).all(|pair| pair[0] < pair[1]), "{:?}", times);
    assert!(times[2] > Duration::from_millis(500));
    assert_eq!(
        harness.session.lock().unwrap().current_inputs(),
        vec!["video1".to_string()]
    );
}
