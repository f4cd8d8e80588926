// SPDX-License-Identifier: GPL-3.0-only

//! Session timeline shared by every capture stream
//!
//! Each rebuilt capture pipeline restarts its buffer timestamps near zero.
//! [`SessionClock`] maps those per-stream timestamps onto one timeline that
//! lives as long as the capture session, so a camera switch never moves
//! presentation times backwards.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::debug;

/// Gap inserted between the last frame of one stream and the next stream
pub const STREAM_CONTINUITY_GAP: Duration = Duration::from_millis(1);

#[derive(Debug)]
struct ClockState {
    epoch: Instant,
    offset: Duration,
    last: Option<Duration>,
}

/// Monotonic presentation clock for one capture session
///
/// Cloning shares the clock. The streaming thread stamps frames while the
/// session thread restarts the timeline for a new stream.
#[derive(Debug, Clone)]
pub struct SessionClock {
    state: Arc<Mutex<ClockState>>,
}

impl Default for SessionClock {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionClock {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(ClockState {
                epoch: Instant::now(),
                offset: Duration::ZERO,
                last: None,
            })),
        }
    }

    /// A new stream starts; its timestamps count from zero again
    ///
    /// The stream is placed at the wall time elapsed since the session
    /// started, and never before the last stamped frame.
    pub fn stream_started(&self) {
        let Ok(mut state) = self.state.lock() else {
            return;
        };
        let elapsed = state.epoch.elapsed();
        state.offset = match state.last {
            Some(last) => elapsed.max(last + STREAM_CONTINUITY_GAP),
            None => elapsed,
        };
        debug!(offset = ?state.offset, "Capture stream timeline restarted");
    }

    /// Session time of a frame with stream timestamp `stream_time`
    pub fn stamp(&self, stream_time: Duration) -> Duration {
        let Ok(mut state) = self.state.lock() else {
            return stream_time;
        };
        let time = state.offset + stream_time;
        state.last = Some(state.last.map_or(time, |last| last.max(time)));
        time
    }
}
