// SPDX-License-Identifier: GPL-3.0-only

//! Terminal shell
//!
//! Renders the presented frame to the terminal using Unicode half-block
//! characters for improved vertical resolution, and turns key presses into
//! controller intents.

use crate::app::{CameraEvent, CaptureController, ChannelObserver, FrameStats, build_controller};
use crate::backends::AuthorizationStatus;
use crate::config::Config;
use crate::display::FrameSlot;
use crate::errors::AppError;
use crate::filters::FilterKind;
use crate::media::{ImageBuffer, PixelFormat};
use crate::pipelines::video::CaptureState;

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind, KeyModifiers},
    execute,
    terminal::{EnterAlternateScreen, LeaveAlternateScreen, disable_raw_mode, enable_raw_mode},
};
use ratatui::{
    Terminal, backend::CrosstermBackend, buffer::Buffer, layout::Rect, style::Color,
    widgets::Widget,
};
use std::io::{self, stdout};
use std::sync::Arc;
use std::sync::mpsc::{Receiver, channel};
use std::time::Duration;
use tracing::{error, info};

/// Run the terminal shell until the user quits
pub fn run(config: Config) -> Result<(), AppError> {
    gstreamer::init().map_err(|e| AppError::Other(e.to_string()))?;

    let (events_tx, events_rx) = channel();
    let slot = FrameSlot::new();
    let controller = build_controller(&config, Arc::new(ChannelObserver::new(events_tx)), slot.clone())?;

    // Set up terminal
    enable_raw_mode()?;
    let mut stdout = stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Run the app
    let result = run_app(&mut terminal, &controller, &slot, &events_rx);

    controller.shutdown();

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    result
}

/// What the status bar is showing
#[derive(Debug, Clone, PartialEq, Eq)]
enum Notice {
    Keys,
    Help,
    Message(String),
    /// Save failed; waiting for retry or delete
    PendingSave,
    AccessDenied,
}

impl Notice {
    fn text(&self) -> String {
        match self {
            Notice::Keys => "'r' record | 's' switch | 'f'/'F' filter | 'h' help | 'q' quit".to_string(),
            Notice::Help => {
                "r: Start/stop recording | s: Switch camera | f/F: Next/previous filter | 0-4: Pick filter | y: Retry save | d: Delete unsaved | q/Ctrl+C: Quit"
                    .to_string()
            }
            Notice::Message(message) => message.clone(),
            Notice::PendingSave => {
                "Recording could not be saved. 'y' retry | 'd' delete".to_string()
            }
            Notice::AccessDenied => {
                "Camera access denied. Allow camera access in system settings, then restart. 'q' quit"
                    .to_string()
            }
        }
    }
}

/// Apply an observer notification to the status bar
fn notice_for(event: CameraEvent) -> Notice {
    match event {
        CameraEvent::AccessGranted => Notice::Keys,
        CameraEvent::AccessDenied { .. } => Notice::AccessDenied,
        CameraEvent::SaveFailed {
            prompt_retry_or_delete: true,
        } => Notice::PendingSave,
        CameraEvent::SaveFailed { .. } => Notice::Message("Recording could not be saved".to_string()),
        CameraEvent::ConfigurationFailed(e) => Notice::Message(format!("Camera error: {}", e)),
        CameraEvent::RecordingSaved(path) => Notice::Message(format!("Saved: {}", path.display())),
    }
}

fn run_app(
    terminal: &mut Terminal<CrosstermBackend<io::Stdout>>,
    controller: &CaptureController,
    slot: &FrameSlot,
    events: &Receiver<CameraEvent>,
) -> Result<(), AppError> {
    let status = controller.start();
    info!(status = %status, "Terminal shell started");

    let mut notice = if status == AuthorizationStatus::Authorized {
        Notice::Keys
    } else {
        Notice::AccessDenied
    };
    let stats = controller.stats();

    loop {
        for event in events.try_iter() {
            notice = notice_for(event);
        }

        let frame = FrameWidget {
            frame: slot.latest(),
        };
        let status_line = StatusLine {
            state: controller.recording_state(),
            filter: controller.filter(),
            camera: controller.position().to_string(),
            stats: &stats,
            message: notice.text(),
        };

        // Draw
        terminal.draw(|f| {
            let area = f.area();

            // Reserve bottom line for status
            let camera_area = Rect {
                x: area.x,
                y: area.y,
                width: area.width,
                height: area.height.saturating_sub(1),
            };
            f.render_widget(&frame, camera_area);

            let status_area = Rect {
                x: area.x,
                y: area.height.saturating_sub(1),
                width: area.width,
                height: 1,
            };
            f.render_widget(status_line, status_area);
        })?;

        // Handle input with timeout for frame updates
        if event::poll(Duration::from_millis(16))?
            && let Event::Key(key) = event::read()?
            && key.kind == KeyEventKind::Press
        {
            // Ctrl+C to quit
            if key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL) {
                break;
            }

            match key.code {
                KeyCode::Char('q') => break,
                KeyCode::Char('r') => {
                    let state = controller.toggle_recording();
                    notice = Notice::Message(format!("Recording {}", state));
                }
                KeyCode::Char('s') => {
                    controller.change_camera();
                    slot.clear();
                    notice = Notice::Keys;
                }
                KeyCode::Char('f') => controller.change_filter(controller.filter().next()),
                KeyCode::Char('F') => controller.change_filter(controller.filter().previous()),
                KeyCode::Char(c @ '0'..='9') => {
                    if let Some(kind) = c.to_digit(10).and_then(|d| FilterKind::from_code(d as u8)) {
                        controller.change_filter(kind);
                    }
                }
                KeyCode::Char('y') if controller.recording().has_pending() => {
                    if controller.save_pending_recording() {
                        notice = Notice::Message("Saving recording...".to_string());
                    }
                }
                KeyCode::Char('d') if controller.recording().has_pending() => {
                    notice = match controller.discard_pending_recording() {
                        Ok(()) => Notice::Message("Unsaved recording deleted".to_string()),
                        Err(e) => {
                            error!(error = %e, "Failed to delete recording");
                            Notice::Message(format!("Error: {}", e))
                        }
                    };
                }
                KeyCode::Char('h') => {
                    notice = if notice == Notice::Help {
                        Notice::Keys
                    } else {
                        Notice::Help
                    };
                }
                _ => {}
            }
        }
    }

    Ok(())
}

/// Widget that renders a frame using half-block characters
struct FrameWidget {
    frame: Option<ImageBuffer>,
}

impl Widget for &FrameWidget {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let frame = match &self.frame {
            Some(frame) if frame.width() > 0 && frame.height() > 0 => frame,
            _ => {
                // No frame yet - show placeholder
                let msg = "Waiting for camera...";
                let x = area.x + (area.width.saturating_sub(msg.len() as u16)) / 2;
                let y = area.y + area.height / 2;
                if y < area.y + area.height && x < area.x + area.width {
                    buf.set_string(x, y, msg, ratatui::style::Style::default());
                }
                return;
            }
        };

        let (display_width, display_height) =
            fit_half_blocks(frame.width(), frame.height(), area.width, area.height);
        if display_width == 0 || display_height == 0 {
            return;
        }

        // Center the image
        let x_offset = area.x + (area.width.saturating_sub(display_width)) / 2;
        let y_offset = area.y + (area.height.saturating_sub(display_height)) / 2;

        // Scale factors
        let x_scale = frame.width() as f64 / display_width as f64;
        let y_scale = frame.height() as f64 / (display_height * 2) as f64;

        // Each terminal cell shows the upper pixel as fg and the lower as bg
        for ty in 0..display_height {
            for tx in 0..display_width {
                let term_x = x_offset + tx;
                let term_y = y_offset + ty;

                let src_x = (tx as f64 * x_scale) as u32;
                let src_y_top = (ty as f64 * 2.0 * y_scale) as u32;
                let src_y_bottom = ((ty as f64 * 2.0 + 1.0) * y_scale) as u32;

                if let Some(cell) = buf.cell_mut((term_x, term_y)) {
                    let (r, g, b) = sample_pixel_rgb(frame, src_x, src_y_top);
                    let (br, bg, bb) = sample_pixel_rgb(frame, src_x, src_y_bottom);
                    cell.set_char('▀');
                    cell.set_fg(Color::Rgb(r, g, b));
                    cell.set_bg(Color::Rgb(br, bg, bb));
                }
            }
        }
    }
}

/// Cells covered by a `width`x`height` frame scaled into `cols`x`rows`
///
/// Each cell holds two vertical pixels.
fn fit_half_blocks(width: u32, height: u32, cols: u16, rows: u16) -> (u16, u16) {
    let frame_aspect = width as f64 / height as f64;
    let term_width = cols as f64;
    let term_height = (rows as f64) * 2.0;

    if term_width / term_height > frame_aspect {
        // Terminal is wider - fit to height
        let w = term_height * frame_aspect;
        (w as u16, rows)
    } else {
        // Terminal is taller - fit to width
        let h = term_width / frame_aspect;
        (cols, (h / 2.0) as u16)
    }
}

fn sample_pixel_rgb(frame: &ImageBuffer, x: u32, y: u32) -> (u8, u8, u8) {
    let x = x.min(frame.width() - 1);
    let y = y.min(frame.height() - 1);

    match frame.pixel_format() {
        PixelFormat::Bgra => {
            let [b, g, r, _] = frame.pixel(x, y);
            (r, g, b)
        }
        PixelFormat::Rgba => {
            let [r, g, b, _] = frame.pixel(x, y);
            (r, g, b)
        }
        PixelFormat::Nv12 => {
            let idx = (y * frame.stride() + x) as usize;
            let luma = frame.data().get(idx).copied().unwrap_or(0);
            (luma, luma, luma)
        }
        PixelFormat::Other(_) => (0, 0, 0),
    }
}

/// Status bar widget
struct StatusLine<'a> {
    state: CaptureState,
    filter: FilterKind,
    camera: String,
    stats: &'a Arc<FrameStats>,
    message: String,
}

impl StatusLine<'_> {
    fn left(&self) -> String {
        let recording = match self.state {
            CaptureState::Idle => String::new(),
            state => format!("● {} | ", state),
        };
        format!(
            "{}{} | {} | dropped {} | ",
            recording,
            self.camera,
            self.filter.display_name(),
            self.stats.dropped()
        )
    }
}

impl Widget for StatusLine<'_> {
    fn render(self, area: Rect, buf: &mut Buffer) {
        let background = if self.state == CaptureState::Idle {
            Color::DarkGray
        } else {
            Color::Red
        };

        // Fill background
        for x in area.x..area.x + area.width {
            if let Some(cell) = buf.cell_mut((x, area.y)) {
                cell.set_char(' ');
                cell.set_bg(background);
            }
        }

        let text: String = format!("{}{}", self.left(), self.message)
            .chars()
            .take(area.width as usize)
            .collect();

        buf.set_string(
            area.x,
            area.y,
            text,
            ratatui::style::Style::default()
                .fg(Color::White)
                .bg(background),
        );
    }
}
