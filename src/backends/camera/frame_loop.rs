// SPDX-License-Identifier: GPL-3.0-only

//! Frame-delivery thread lifecycle
//!
//! The capture driver pushes samples into a bounded channel from its own
//! streaming thread. A single named delivery thread drains that channel and
//! runs the per-frame pipeline, so frames are processed strictly in capture
//! order and the driver never waits on filtering, display or recording.

use super::types::FrameSample;
use crate::constants::timing;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError};
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// Action returned by a loop iteration
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Keep running
    Continue,
    /// Leave the loop
    Stop,
}

/// Controller for a loop running on its own named thread
///
/// The loop stops when the closure returns [`LoopAction::Stop`], when
/// [`stop`](Self::stop) is called, or when the controller is dropped.
pub struct CaptureLoopController {
    thread_handle: Option<JoinHandle<()>>,
    stop_signal: Arc<AtomicBool>,
    name: String,
}

impl CaptureLoopController {
    /// Spawn a thread called `name` that calls `loop_fn` until told to stop
    pub fn start<F>(name: &str, mut loop_fn: F) -> io::Result<Self>
    where
        F: FnMut() -> LoopAction + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop_signal);
        let thread_name = name.to_string();

        info!(name = %name, "Starting loop thread");

        let thread_handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                while !thread_stop.load(Ordering::SeqCst) {
                    if loop_fn() == LoopAction::Stop {
                        debug!(name = %thread_name, "Loop requested stop");
                        break;
                    }
                }

                info!(name = %thread_name, "Loop thread exiting");
            })?;

        Ok(Self {
            thread_handle: Some(thread_handle),
            stop_signal,
            name: name.to_string(),
        })
    }

    /// Whether the thread is still alive
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Ask the loop to stop without waiting for it
    pub fn request_stop(&self) {
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Stop the loop and wait for the thread
    pub fn stop(&mut self) {
        self.request_stop();
        self.join();
    }

    /// Wait for the thread without signalling it
    pub fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take()
            && let Err(e) = handle.join()
        {
            warn!(name = %self.name, "Loop thread panicked: {:?}", e);
        }
    }
}

impl Drop for CaptureLoopController {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            debug!(name = %self.name, "Loop controller dropped, stopping thread");
            self.stop();
        }
    }
}

/// Run `on_sample` for every sample received, in order, on a dedicated thread
///
/// The thread wakes every [`timing::FRAME_POLL_INTERVAL`] to notice a stop
/// request, and exits on its own once every sender is gone.
pub fn start_frame_delivery<F>(
    name: &str,
    receiver: Receiver<FrameSample>,
    mut on_sample: F,
) -> io::Result<CaptureLoopController>
where
    F: FnMut(FrameSample) + Send + 'static,
{
    CaptureLoopController::start(name, move || {
        match receiver.recv_timeout(timing::FRAME_POLL_INTERVAL) {
            Ok(sample) => {
                on_sample(sample);
                LoopAction::Continue
            }
            Err(RecvTimeoutError::Timeout) => LoopAction::Continue,
            Err(RecvTimeoutError::Disconnected) => LoopAction::Stop,
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{PixelBuffer, PixelFormat};
    use std::sync::Mutex;
    use std::sync::atomic::AtomicU32;
    use std::sync::mpsc::sync_channel;
    use std::time::Duration;

    #[test]
    fn test_loop_stops_itself() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let mut controller = CaptureLoopController::start("test-loop", move || {
            if counter_clone.fetch_add(1, Ordering::SeqCst) >= 10 {
                LoopAction::Stop
            } else {
                LoopAction::Continue
            }
        })
        .unwrap();

        controller.join();
        assert_eq!(counter.load(Ordering::SeqCst), 11);
    }

    #[test]
    fn test_stop_signal() {
        let counter = Arc::new(AtomicU32::new(0));
        let counter_clone = Arc::clone(&counter);

        let mut controller = CaptureLoopController::start("test-stop", move || {
            counter_clone.fetch_add(1, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(5));
            LoopAction::Continue
        })
        .unwrap();

        thread::sleep(Duration::from_millis(30));
        controller.stop();
        assert!(counter.load(Ordering::SeqCst) > 0);
        assert!(!controller.is_running());
    }

    #[test]
    fn test_delivery_preserves_order() {
        let (sender, receiver) = sync_channel(8);
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);

        let mut controller = start_frame_delivery("test-delivery", receiver, move |sample| {
            seen_clone.lock().unwrap().push(sample.presentation_time);
        })
        .unwrap();

        for ms in [0u64, 33, 66, 100] {
            let image = PixelBuffer::zeroed(1, 1, PixelFormat::Bgra).freeze();
            sender
                .send(FrameSample::new(image, Duration::from_millis(ms)))
                .unwrap();
        }
        drop(sender);
        controller.join();

        let seen = seen.lock().unwrap();
        let expected: Vec<Duration> = [0u64, 33, 66, 100]
            .iter()
            .map(|ms| Duration::from_millis(*ms))
            .collect();
        assert_eq!(*seen, expected);
    }
}
