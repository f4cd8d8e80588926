// SPDX-License-Identifier: GPL-3.0-only

//! CLI commands for camera operations
//!
//! This module provides command-line functionality for:
//! - Listing available cameras
//! - Recording a filtered video without the terminal shell

use filter_camera::app::{CameraEvent, ChannelObserver, build_controller};
use filter_camera::backends::AuthorizationStatus;
use filter_camera::backends::camera::{
    CameraPosition, DeviceDiscovery, GstDeviceDiscovery, find_device,
};
use filter_camera::config::Config;
use filter_camera::display::FrameSlot;
use filter_camera::pipelines::video::{CaptureState, available_encoders};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::channel;
use std::time::{Duration, Instant};

/// List all available cameras and the encoders a recording could use
pub fn list_cameras() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize GStreamer
    gstreamer::init()?;

    let discovery = GstDeviceDiscovery::new();
    let cameras = discovery.devices();

    if cameras.is_empty() {
        println!("No cameras found.");
    } else {
        println!("Available cameras:");
        println!();
        for camera in &cameras {
            println!("  [{}] {}", camera.position, camera.name);
            println!("      Source: {}  Id: {}", camera.source.element_name(), camera.id);
        }
        println!();
        for position in [CameraPosition::Back, CameraPosition::Front] {
            match find_device(&discovery, position) {
                Some(device) => println!("  {} camera: {}", position, device.name),
                None => println!("  {} camera: none", position),
            }
        }
        println!();
    }

    let encoders = available_encoders();
    if encoders.is_empty() {
        println!("No H.264 encoder installed; recording is unavailable.");
    } else {
        let names: Vec<String> = encoders
            .iter()
            .map(|e| {
                if e.is_hardware {
                    format!("{} (hardware)", e.display_name)
                } else {
                    e.display_name.to_string()
                }
            })
            .collect();
        println!("Encoders: {}", names.join(", "));
    }

    Ok(())
}

/// Wait for `done`, giving up after `timeout` or on Ctrl+C
fn wait_until(stop: &AtomicBool, timeout: Duration, done: impl Fn() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if done() {
            return true;
        }
        if stop.load(Ordering::SeqCst) {
            return false;
        }
        std::thread::sleep(Duration::from_millis(50));
    }
    done()
}

/// Record `duration` seconds through the configured filter
pub fn record_video(config: Config, duration: u64) -> Result<(), Box<dyn std::error::Error>> {
    // Initialize GStreamer
    gstreamer::init()?;

    let (events_tx, events_rx) = channel();
    let controller = build_controller(
        &config,
        Arc::new(ChannelObserver::new(events_tx)),
        FrameSlot::new(),
    )?;

    if controller.start() != AuthorizationStatus::Authorized {
        return Err("Camera access denied".into());
    }

    // Set up Ctrl+C handler
    let stop_flag = Arc::new(AtomicBool::new(false));
    let stop_flag_clone = stop_flag.clone();
    ctrlc::set_handler(move || {
        stop_flag_clone.store(true, Ordering::SeqCst);
    })?;

    controller.wait_for_configuration();
    if !controller.is_configured() {
        for event in events_rx.try_iter() {
            if let CameraEvent::ConfigurationFailed(e) = event {
                return Err(e.into());
            }
        }
        return Err("Camera session could not be configured".into());
    }
    println!(
        "Using {} camera, filter {}",
        controller.position(),
        controller.filter()
    );

    controller.toggle_recording();
    let started = wait_until(&stop_flag, Duration::from_secs(5), || {
        controller.recording_state() == CaptureState::Capturing
    });
    if !started {
        return Err("Recording did not start (no frames or no encoder)".into());
    }

    // Wait for duration or Ctrl+C
    println!();
    println!("Recording... (press Ctrl+C to stop early)");
    let start = Instant::now();
    let target_duration = Duration::from_secs(duration);

    while start.elapsed() < target_duration {
        if stop_flag.load(Ordering::SeqCst) {
            println!();
            println!("Stopping early...");
            break;
        }

        // Print progress
        let elapsed = start.elapsed().as_secs();
        print!("\rRecording: {:02}:{:02}", elapsed / 60, elapsed % 60);
        std::io::Write::flush(&mut std::io::stdout())?;

        std::thread::sleep(Duration::from_millis(100));
    }
    println!();

    // Stop recording
    controller.toggle_recording();
    let never = AtomicBool::new(false);
    wait_until(&never, Duration::from_secs(15), || {
        controller.recording_state() == CaptureState::Idle
    });
    controller.shutdown();

    for event in events_rx.try_iter() {
        match event {
            CameraEvent::RecordingSaved(path) => println!("Video saved: {}", path.display()),
            CameraEvent::SaveFailed { .. } => {
                if let Some(path) = controller.recording().pending_path() {
                    println!("Video could not be added to the library; kept at {}", path.display());
                }
            }
            _ => {}
        }
    }

    Ok(())
}
