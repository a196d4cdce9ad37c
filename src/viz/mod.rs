//! Terminal front ends
//!
//! Each mode is its own module with a `run()` function.

pub mod grid;
pub mod presets;

use crossterm::event::KeyCode;

use crate::audio::{AnalysisMode, AudioSource, AudioTap, SyntheticTap};
use crate::colors::ColorState;

/// Where audio comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TapSource {
    Microphone,
    /// Seeded synthetic bursts, no hardware needed
    Demo { seed: u64 },
}

/// What a key press meant for the shared controls
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyOutcome {
    Quit,
    /// Handled here; `true` if something worth persisting changed
    Handled(bool),
    /// Left for the mode to interpret
    Unhandled(KeyCode),
}

/// Runtime state for interactive controls (shared by all modes)
pub struct VizState {
    pub paused: bool,
    pub show_help: bool,
    pub colors: ColorState,
}

impl VizState {
    pub fn new(color_scheme: u8) -> Self {
        Self {
            paused: false,
            show_help: false,
            colors: ColorState::new(color_scheme),
        }
    }

    pub fn handle_key(&mut self, code: KeyCode) -> KeyOutcome {
        match code {
            KeyCode::Char('q') | KeyCode::Esc => KeyOutcome::Quit,
            KeyCode::Char(' ') => {
                self.paused = !self.paused;
                KeyOutcome::Handled(false)
            }
            KeyCode::Char('?') => {
                self.show_help = !self.show_help;
                KeyOutcome::Handled(false)
            }
            // Shift+number produces symbols - use these for color schemes
            code if self.colors.handle_key(code) => KeyOutcome::Handled(true),
            code => KeyOutcome::Unhandled(code),
        }
    }
}

/// Frame rate for a number key: 1 is fastest, 0 slowest.
pub fn cadence_for_digit(c: char) -> Option<f32> {
    Some(match c {
        '1' => 60.0,
        '2' => 30.0,
        '3' => 24.0,
        '4' => 20.0,
        '5' => 15.0,
        '6' => 12.0,
        '7' => 10.0,
        '8' => 6.0,
        '9' => 4.0,
        '0' => 2.0,
        _ => return None,
    })
}

/// Gain after one `[` (down) or `]` (up) press.
pub fn step_gain(gain: f32, up: bool) -> f32 {
    let next = if up { gain * 1.25 } else { gain / 1.25 };
    next.clamp(0.05, 200.0)
}

/// Owns audio acquisition for a run loop and remembers its failure.
pub struct AudioHost {
    source: AudioSource,
    kind: TapSource,
    mode: AnalysisMode,
    gain: f32,
    notice: Option<String>,
}

impl AudioHost {
    pub fn new(kind: TapSource, mode: AnalysisMode, gain: f32) -> Self {
        Self {
            source: AudioSource::new(mode, gain),
            kind,
            mode,
            gain,
            notice: None,
        }
    }

    /// Starts acquisition. A demo tap is ready at once; a microphone
    /// arrives later through [`AudioHost::poll`].
    pub fn begin(&mut self) -> Option<Box<dyn AudioTap>> {
        match self.kind {
            TapSource::Demo { seed } => {
                tracing::info!(seed, "using synthetic audio");
                Some(Box::new(SyntheticTap::new(seed, self.mode, self.gain)))
            }
            TapSource::Microphone => {
                if let Err(err) = self.source.acquire() {
                    self.notice = Some(err.to_string());
                }
                None
            }
        }
    }

    pub fn poll(&mut self) -> Option<Box<dyn AudioTap>> {
        match self.source.poll()? {
            Ok(tap) => {
                tracing::info!(device = tap.device_name(), "audio input ready");
                Some(Box::new(tap))
            }
            Err(err) => {
                self.notice = Some(err.to_string());
                None
            }
        }
    }

    /// User-triggered retry after a refusal.
    pub fn retry(&mut self) -> Option<Box<dyn AudioTap>> {
        self.notice = None;
        self.begin()
    }

    pub fn is_pending(&self) -> bool {
        self.source.is_pending()
    }

    pub fn notice(&self) -> Option<String> {
        self.notice
            .as_ref()
            .map(|msg| format!("Microphone unavailable\n\n{}\n\nr  retry    q  quit", msg))
    }
}
