//! Audio-reactive cell grid
//!
//! The terminal is the viewport: one column is one horizontal unit and one
//! row counts as two vertical units, so a pitch of N gives cells of N
//! columns by N/2 rows, roughly square on screen.
//!
//! # Keybindings
//! - 1-9, 0: Frame rate
//! - +/-: Cell pitch
//! - [/]: Gain
//! - d: Threshold damping (1, 2, 4)
//! - s: Toggle refresh / interval scheduling
//! - Shift+0-9: Color scheme (Shift+8 for per-cell hue)
//! - Space: Pause
//! - ?: Help
//! - q/Esc: Quit

use std::time::Duration;

use crossterm::event::KeyCode;
use crossterm::style::Color;

use super::{cadence_for_digit, step_gain, AudioHost, KeyOutcome, TapSource, VizState};
use crate::colors::{cell_color, scheme_color};
use crate::engine::animator::brightness;
use crate::engine::scheduler::SystemClock;
use crate::engine::session::VisualizerSession;
use crate::engine::CellState;
use crate::error::Result;
use crate::help;
use crate::settings::{Prefs, VisualizerOptions};
use crate::terminal::{Input, Terminal};

/// Longest the loop sleeps without checking for input or a new size
const IDLE_POLL: Duration = Duration::from_millis(100);
/// Largest cell pitch reachable with the +/- keys
const MAX_PITCH: u32 = 64;
/// Glyph for a lit cell
const CELL_GLYPH: char = '█';

/// Viewport in grid units for a terminal of `cols` x `rows`.
pub fn viewport(cols: u16, rows: u16) -> (u32, u32) {
    (cols as u32, rows as u32 * 2)
}

/// Terminal rectangle (x, y, w, h) covered by cell (col, row) at `pitch`.
pub fn cell_rect(col: u32, row: u32, pitch: u32) -> (i32, i32, i32, i32) {
    let x = (col * pitch) as i32;
    let y0 = (row * pitch / 2) as i32;
    let y1 = ((row + 1) * pitch / 2) as i32;
    let w = if pitch >= 3 { pitch - 1 } else { pitch } as i32;
    (x, y0, w, (y1 - y0).max(1))
}

/// Next damping in the 1, 2, 4 cycle.
pub fn next_damping(damping: f32) -> f32 {
    if damping < 1.5 {
        2.0
    } else if damping < 3.0 {
        4.0
    } else {
        1.0
    }
}

pub fn run(mut options: VisualizerOptions, mut prefs: Prefs, source: TapSource) -> Result<()> {
    let mut term = Terminal::new(true)?;
    let (cols, rows) = term.size();
    let mut session = VisualizerSession::new(&options, viewport(cols, rows), SystemClock::new());
    let mut state = VizState::new(options.color_scheme);
    let mut audio = AudioHost::new(source, options.analysis, options.gain);

    if let Some(tap) = audio.begin() {
        session.attach_tap(tap);
    }
    session.start();

    let frame_period = Duration::from_secs_f32(1.0 / options.refresh_hz);
    let mut last_paint: Option<Duration> = None;
    let mut needs_paint = true;

    loop {
        if let Some(tap) = audio.poll() {
            session.attach_tap(tap);
        }
        if term.refresh_size()? {
            let (cols, rows) = term.size();
            let (w, h) = viewport(cols, rows);
            session.observe_resize(w, h);
            needs_paint = true;
        }

        needs_paint |= session.pump();

        let now = session.now();
        let animating = session.cells().excited_count() > 0;
        let frame_due = last_paint.map_or(true, |t| now.saturating_sub(t) >= frame_period);
        if (needs_paint || animating) && frame_due {
            paint(&mut term, &session, &state, &audio, now);
            term.present()?;
            last_paint = Some(now);
            needs_paint = false;
        }

        let mut timeout = session
            .next_deadline()
            .map_or(IDLE_POLL, |d| d.saturating_sub(now))
            .min(IDLE_POLL);
        if animating || needs_paint || audio.is_pending() {
            timeout = timeout.min(frame_period);
        }

        let code = match term.wait_input(timeout)? {
            Some(Input::Key(code, _)) => code,
            Some(Input::Resize(..)) | None => continue,
        };
        needs_paint = true;

        if audio.notice().is_some() {
            match code {
                KeyCode::Char('q') | KeyCode::Esc => break,
                KeyCode::Char('r') => {
                    if let Some(tap) = audio.retry() {
                        session.attach_tap(tap);
                    }
                }
                _ => {}
            }
            continue;
        }

        let changed = match state.handle_key(code) {
            KeyOutcome::Quit => break,
            KeyOutcome::Handled(changed) => {
                if code == KeyCode::Char(' ') {
                    if state.paused {
                        session.pause();
                    } else {
                        session.resume();
                    }
                }
                options.color_scheme = state.colors.scheme;
                changed
            }
            KeyOutcome::Unhandled(code) => apply_key(code, &mut options, &mut session),
        };
        if changed {
            options.write_prefs(&mut prefs);
            if let Err(err) = prefs.save() {
                tracing::warn!(%err, "could not save prefs");
            }
        }
    }

    session.stop();
    Ok(())
}

/// Grid-specific keys. Returns true if an option changed.
fn apply_key(
    code: KeyCode,
    options: &mut VisualizerOptions,
    session: &mut VisualizerSession<SystemClock>,
) -> bool {
    match code {
        KeyCode::Char(c) if cadence_for_digit(c).is_some() => {
            let hz = cadence_for_digit(c).unwrap_or(options.frame_rate);
            options.frame_rate = hz;
            session.set_cadence(hz);
        }
        KeyCode::Char('+') | KeyCode::Char('=') => {
            options.cell_pitch = (options.cell_pitch + 1).min(MAX_PITCH);
            session.set_pitch(options.cell_pitch);
        }
        KeyCode::Char('-') | KeyCode::Char('_') => {
            options.cell_pitch = options.cell_pitch.saturating_sub(1).max(1);
            session.set_pitch(options.cell_pitch);
        }
        KeyCode::Char('[') | KeyCode::Char(']') => {
            options.gain = step_gain(options.gain, code == KeyCode::Char(']'));
            session.set_gain(options.gain);
        }
        KeyCode::Char('d') => {
            options.threshold_damping = next_damping(options.threshold_damping);
            session.set_damping(options.threshold_damping);
        }
        KeyCode::Char('s') => {
            options.scheduler = options.scheduler.toggled();
            session.set_scheduler(options.scheduler);
        }
        _ => return false,
    }
    true
}

fn paint(
    term: &mut Terminal,
    session: &VisualizerSession<SystemClock>,
    state: &VizState,
    audio: &AudioHost,
    now: Duration,
) {
    term.clear();
    let grid = *session.grid();
    for (index, cell) in session.cells().states().enumerate() {
        let CellState::Excited { hue, .. } = cell else {
            continue;
        };
        let level = brightness(&cell, now);
        if level <= 0.0 {
            continue;
        }
        let Some((col, row)) = grid.position(index) else {
            continue;
        };
        let (x, y, w, h) = cell_rect(col, row, grid.pitch);
        let color = cell_color(state.colors.scheme, hue, level);
        term.fill_rect(x, y, w, h, CELL_GLYPH, Some(color));
    }

    let (_, height) = term.size();
    let status_y = height as i32 - 1;
    if state.paused {
        let (color, bold) = scheme_color(state.colors.scheme, 3, true);
        term.set_str(1, status_y, " PAUSED ", Some(color), bold);
    } else if !session.has_tap() && audio.is_pending() {
        term.set_str(1, status_y, " waiting for microphone… ", Some(Color::DarkGrey), false);
    }

    if state.show_help {
        help::render_help_overlay(term, help::GRID_HELP);
    }
    if let Some(notice) = audio.notice() {
        help::render_notice(term, &notice);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rows_count_double() {
        assert_eq!(viewport(80, 24), (80, 48));
    }

    #[test]
    fn cells_leave_a_gutter_at_larger_pitch() {
        assert_eq!(cell_rect(0, 0, 8), (0, 0, 7, 4));
        assert_eq!(cell_rect(2, 3, 8), (16, 12, 7, 4));
        assert_eq!(cell_rect(1, 1, 2), (2, 1, 2, 1));
        // odd pitch alternates row heights
        assert_eq!(cell_rect(0, 0, 3), (0, 0, 2, 1));
        assert_eq!(cell_rect(0, 1, 3), (0, 1, 2, 2));
    }

    #[test]
    fn damping_cycles() {
        assert_eq!(next_damping(1.0), 2.0);
        assert_eq!(next_damping(2.0), 4.0);
        assert_eq!(next_damping(4.0), 1.0);
        assert_eq!(next_damping(3.3), 1.0);
    }
}
