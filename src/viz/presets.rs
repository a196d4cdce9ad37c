//! Preset visualizer mode
//!
//! A field of layered sine waves is evaluated on a coarse mesh and sampled
//! onto terminal cells. Each preset is one seeded parameter set; switching
//! presets crossfades the parameters over the blend time. The audio level
//! drives brightness and speed.
//!
//! # Keybindings
//! - n/p: Next / previous preset
//! - m: Cycle mesh size
//! - a: Auto-advance on/off
//! - r: Randomize on/off
//! - [/]: Gain
//! - Shift+0-9: Color scheme
//! - Space: Pause
//! - q/Esc: Quit

use std::time::{Duration, Instant};

use crossterm::event::KeyCode;
use rand::prelude::*;

use super::{step_gain, AudioHost, KeyOutcome, TapSource, VizState};
use crate::audio::AudioTap;
use crate::colors::cell_color;
use crate::engine::extractor::peak_deviation;
use crate::engine::scheduler::{Clock, FrameScheduler, RefreshThrottled, SystemClock, Task, TickOutcome, TimerId, Timers};
use crate::error::Result;
use crate::help;
use crate::settings::{PresetOptions, Prefs};
use crate::terminal::{Input, Terminal};

/// Mesh resolutions as (columns, rows)
pub const MESH_SIZES: [(u32, u32); 6] = [(24, 18), (32, 24), (48, 36), (64, 48), (96, 72), (128, 96)];
/// Mesh used when none is configured
pub const DEFAULT_MESH: usize = 5;
/// Built-in presets
pub const PRESET_COUNT: usize = 12;

const IDLE_POLL: Duration = Duration::from_millis(100);
const RAMP: [char; 9] = [' ', '.', ':', ';', 'o', 'O', '0', '@', '#'];

/// Renderer driven by an audio level, switchable between presets.
pub trait PresetVisualizer {
    fn render(&mut self, term: &mut Terminal, level: f32);

    /// Switches to `index`, crossfading over `blend`.
    fn load_preset(&mut self, index: usize, blend: Duration);

    fn set_mesh_size(&mut self, rows: u32, cols: u32);

    fn preset_count(&self) -> usize;

    fn preset_name(&self, index: usize) -> String;
}

/// Picks the preset that follows the current one.
pub struct PresetRotation {
    count: usize,
    current: usize,
    randomize: bool,
    rng: StdRng,
}

impl PresetRotation {
    pub fn new(count: usize, randomize: bool, seed: u64) -> Self {
        Self {
            count: count.max(1),
            current: 0,
            randomize,
            rng: StdRng::seed_from_u64(seed),
        }
    }

    pub fn current(&self) -> usize {
        self.current
    }

    pub fn randomize(&self) -> bool {
        self.randomize
    }

    pub fn set_randomize(&mut self, randomize: bool) {
        self.randomize = randomize;
    }

    /// Sequential, or uniformly random among all presets but the current.
    pub fn next(&mut self) -> usize {
        self.current = if self.count == 1 {
            0
        } else if self.randomize {
            let pick = self.rng.gen_range(0..self.count - 1);
            if pick >= self.current {
                pick + 1
            } else {
                pick
            }
        } else {
            (self.current + 1) % self.count
        };
        self.current
    }

    pub fn previous(&mut self) -> usize {
        self.current = (self.current + self.count - 1) % self.count;
        self.current
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
struct PlasmaParams {
    freq: [f64; 4],
    phase: [f64; 4],
    center: (f64, f64),
    time_mult: [f64; 3],
    hue_shift: f64,
}

impl PlasmaParams {
    fn random(rng: &mut StdRng) -> Self {
        Self {
            freq: [
                rng.gen_range(6.0..14.0),
                rng.gen_range(6.0..14.0),
                rng.gen_range(3.0..8.0),
                rng.gen_range(6.0..14.0),
            ],
            phase: [
                rng.gen_range(0.0..6.28),
                rng.gen_range(0.0..6.28),
                rng.gen_range(0.0..6.28),
                rng.gen_range(0.0..6.28),
            ],
            center: (rng.gen_range(0.3..0.7), rng.gen_range(0.3..0.7)),
            time_mult: [
                rng.gen_range(0.7..1.3),
                rng.gen_range(1.2..1.8),
                rng.gen_range(0.3..0.7),
            ],
            hue_shift: rng.gen_range(0.0..360.0),
        }
    }

    fn lerp(&self, to: &Self, t: f64) -> Self {
        if t >= 1.0 {
            return *to;
        }
        let mix = |a: f64, b: f64| a + (b - a) * t;
        Self {
            freq: std::array::from_fn(|i| mix(self.freq[i], to.freq[i])),
            phase: std::array::from_fn(|i| mix(self.phase[i], to.phase[i])),
            center: (mix(self.center.0, to.center.0), mix(self.center.1, to.center.1)),
            time_mult: std::array::from_fn(|i| mix(self.time_mult[i], to.time_mult[i])),
            hue_shift: mix(self.hue_shift, to.hue_shift),
        }
    }

    /// Field value in 0..=1 at normalized position (fx, fy).
    fn sample(&self, fx: f64, fy: f64, time: f64) -> f64 {
        let [m1, m2, m3] = self.time_mult;
        let v1 = (fx * self.freq[0] + self.phase[0] + time * m1).sin();
        let v2 = (fy * self.freq[1] + self.phase[1] + time * m2).sin();
        let v3 = ((fx + fy) * self.freq[2] + self.phase[2] + time * m3).sin();
        let dx = fx - self.center.0;
        let dy = fy - self.center.1;
        let v4 = ((dx * dx + dy * dy).sqrt() * self.freq[3] + self.phase[3] - time * m1).sin();
        ((v1 + v2 + v3 + v4) * 0.25 + 1.0) * 0.5
    }
}

/// Built-in plasma presets.
pub struct PlasmaVisualizer {
    presets: Vec<PlasmaParams>,
    from: PlasmaParams,
    index: usize,
    blend: Duration,
    blend_elapsed: Duration,
    mesh: (u32, u32),
    values: Vec<f64>,
    time: f64,
    level: f32,
    scheme: u8,
    last_render: Option<Instant>,
}

impl PlasmaVisualizer {
    pub fn new(seed: u64, color_scheme: u8) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let presets: Vec<PlasmaParams> = (0..PRESET_COUNT).map(|_| PlasmaParams::random(&mut rng)).collect();
        let from = presets[0];
        let (cols, rows) = MESH_SIZES[DEFAULT_MESH];
        Self {
            presets,
            from,
            index: 0,
            blend: Duration::ZERO,
            blend_elapsed: Duration::ZERO,
            mesh: (rows, cols),
            values: Vec::new(),
            time: 0.0,
            level: 0.0,
            scheme: color_scheme,
            last_render: None,
        }
    }

    pub fn set_color_scheme(&mut self, scheme: u8) {
        self.scheme = scheme;
    }

    pub fn current_preset(&self) -> usize {
        self.index
    }

    /// 0.0 at the start of a crossfade, 1.0 once it completed.
    pub fn blend_progress(&self) -> f64 {
        if self.blend.is_zero() {
            return 1.0;
        }
        (self.blend_elapsed.as_secs_f64() / self.blend.as_secs_f64()).min(1.0)
    }

    fn params(&self) -> PlasmaParams {
        self.from.lerp(&self.presets[self.index], self.blend_progress())
    }

    /// Moves the animation forward by `dt` at audio `level` (0..=1).
    pub fn advance(&mut self, dt: Duration, level: f32) {
        self.level = level.clamp(0.0, 1.0);
        self.blend_elapsed = (self.blend_elapsed + dt).min(self.blend.max(dt));
        // louder is faster
        self.time += dt.as_secs_f64() * 2.0 * (0.4 + 1.6 * self.level as f64);

        let params = self.params();
        let (rows, cols) = self.mesh;
        self.values.clear();
        for r in 0..rows {
            let fy = r as f64 / rows.max(1) as f64;
            for c in 0..cols {
                let fx = c as f64 / cols.max(1) as f64;
                self.values.push(params.sample(fx, fy, self.time));
            }
        }
    }

    /// Mesh value nearest to terminal cell (x, y) on a `w` x `h` screen.
    fn value_at(&self, x: u16, y: u16, w: u16, h: u16) -> f64 {
        let (rows, cols) = self.mesh;
        let c = (x as u32 * cols / w.max(1) as u32).min(cols.saturating_sub(1));
        let r = (y as u32 * rows / h.max(1) as u32).min(rows.saturating_sub(1));
        self.values
            .get((r * cols + c) as usize)
            .copied()
            .unwrap_or(0.0)
    }
}

impl PresetVisualizer for PlasmaVisualizer {
    fn render(&mut self, term: &mut Terminal, level: f32) {
        let now = Instant::now();
        let dt = self.last_render.map_or(Duration::ZERO, |t| now - t);
        self.last_render = Some(now);
        self.advance(dt, level);

        let hue_shift = self.params().hue_shift;
        let (width, height) = term.size();
        let gain = 0.35 + 0.65 * self.level as f64;
        for y in 0..height {
            for x in 0..width {
                let v = self.value_at(x, y, width, height) * gain;
                let idx = ((v * (RAMP.len() - 1) as f64) as usize).min(RAMP.len() - 1);
                let hue = (v * 360.0 + hue_shift) as f32;
                let color = cell_color(self.scheme, hue, v as f32);
                term.set(x as i32, y as i32, RAMP[idx], Some(color), v > 0.7);
            }
        }
    }

    fn load_preset(&mut self, index: usize, blend: Duration) {
        self.from = self.params();
        self.index = index % self.presets.len();
        self.blend = blend;
        self.blend_elapsed = Duration::ZERO;
        tracing::info!(preset = self.index, blend_ms = blend.as_millis() as u64, "preset loaded");
    }

    fn set_mesh_size(&mut self, rows: u32, cols: u32) {
        self.mesh = (rows.max(1), cols.max(1));
        self.values.clear();
    }

    fn preset_count(&self) -> usize {
        self.presets.len()
    }

    fn preset_name(&self, index: usize) -> String {
        format!("plasma-{:02}", index % self.presets.len().max(1))
    }
}

/// Loudness of a tap snapshot in 0..=1.
pub fn level_of(buffer: &[u8], baseline: u8) -> f32 {
    let span = if baseline == 0 { 255.0 } else { 128.0 };
    (peak_deviation(buffer, baseline) as f32 / span).min(1.0)
}

pub fn run(mut options: PresetOptions, mut prefs: Prefs, source: TapSource, seed: u64) -> Result<()> {
    let mut term = Terminal::new(true)?;
    let clock = SystemClock::new();
    let mut timers = Timers::new();
    let mut scheduler = FrameScheduler::new(options.frame_rate, Box::new(RefreshThrottled::new(options.refresh_hz)));
    let mut state = VizState::new(options.color_scheme);
    let mut audio = AudioHost::new(source, crate::audio::AnalysisMode::Waveform, options.gain);
    let mut tap: Option<Box<dyn AudioTap>> = audio.begin();

    let mut viz = PlasmaVisualizer::new(seed, options.color_scheme);
    let (cols, rows) = MESH_SIZES[options.mesh];
    viz.set_mesh_size(rows, cols);
    let mut rotation = PresetRotation::new(viz.preset_count(), options.randomize, seed ^ 0x5eed);
    viz.load_preset(rotation.current(), Duration::ZERO);

    let blend = Duration::try_from_secs_f32(options.blend_secs).unwrap_or(Duration::ZERO);
    let mut advance: Option<TimerId> = None;
    arm_advance(&mut advance, &mut timers, clock.now(), &options);
    scheduler.start(&mut timers, clock.now());

    let mut buffer = Vec::new();
    loop {
        if let Some(new_tap) = audio.poll() {
            tap = Some(new_tap);
        }
        if let Some(t) = tap.as_mut() {
            t.set_gain(options.gain);
        }
        if term.refresh_size()? {
            term.clear_screen()?;
        }

        let now = clock.now();
        while let Some((id, task)) = timers.pop_due(now) {
            match task {
                Task::Tick { chain } => {
                    if scheduler.begin_tick(chain, now) == TickOutcome::Run && !state.paused {
                        let level = match tap.as_mut() {
                            Some(t) => {
                                t.read(&mut buffer);
                                level_of(&buffer, t.baseline())
                            }
                            None => 0.0,
                        };
                        term.clear();
                        viz.set_color_scheme(state.colors.scheme);
                        viz.render(&mut term, level);
                        let name = viz.preset_name(viz.current_preset());
                        let (_, h) = term.size();
                        term.set_str(1, h as i32 - 1, &format!(" {} ", name), None, false);
                        if state.show_help {
                            help::render_help_overlay(&mut term, help::PRESET_HELP);
                        }
                        if let Some(notice) = audio.notice() {
                            help::render_notice(&mut term, &notice);
                        }
                        term.present()?;
                    }
                    scheduler.finish_tick(&mut timers, clock.now());
                }
                Task::PresetAdvance if advance == Some(id) => {
                    advance = None;
                    viz.load_preset(rotation.next(), blend);
                    arm_advance(&mut advance, &mut timers, now, &options);
                }
                other => tracing::trace!(?other, "ignored task"),
            }
        }

        let timeout = timers
            .next_deadline()
            .map_or(IDLE_POLL, |d| d.saturating_sub(clock.now()))
            .min(IDLE_POLL);
        let code = match term.wait_input(timeout)? {
            Some(Input::Key(code, _)) => code,
            _ => continue,
        };

        if audio.notice().is_some() {
            match code {
                KeyCode::Char('q') | KeyCode::Esc => break,
                KeyCode::Char('r') => {
                    if let Some(new_tap) = audio.retry() {
                        tap = Some(new_tap);
                    }
                }
                _ => {}
            }
            continue;
        }

        let now = clock.now();
        let changed = match state.handle_key(code) {
            KeyOutcome::Quit => break,
            KeyOutcome::Handled(changed) => {
                options.color_scheme = state.colors.scheme;
                changed
            }
            KeyOutcome::Unhandled(KeyCode::Char('n')) => {
                viz.load_preset(rotation.next(), blend);
                arm_advance(&mut advance, &mut timers, now, &options);
                false
            }
            KeyOutcome::Unhandled(KeyCode::Char('p')) => {
                viz.load_preset(rotation.previous(), blend);
                arm_advance(&mut advance, &mut timers, now, &options);
                false
            }
            KeyOutcome::Unhandled(KeyCode::Char('m')) => {
                options.mesh = (options.mesh + 1) % MESH_SIZES.len();
                let (cols, rows) = MESH_SIZES[options.mesh];
                viz.set_mesh_size(rows, cols);
                true
            }
            KeyOutcome::Unhandled(KeyCode::Char('a')) => {
                options.auto_advance = !options.auto_advance;
                arm_advance(&mut advance, &mut timers, now, &options);
                true
            }
            KeyOutcome::Unhandled(KeyCode::Char('r')) => {
                options.randomize = !options.randomize;
                rotation.set_randomize(options.randomize);
                true
            }
            KeyOutcome::Unhandled(code @ (KeyCode::Char('[') | KeyCode::Char(']'))) => {
                options.gain = step_gain(options.gain, code == KeyCode::Char(']'));
                true
            }
            KeyOutcome::Unhandled(_) => false,
        };
        if changed {
            options.write_prefs(&mut prefs);
            if let Err(err) = prefs.save() {
                tracing::warn!(%err, "could not save prefs");
            }
        }
    }

    scheduler.stop(&mut timers);
    if let Some(t) = tap.as_mut() {
        t.suspend();
    }
    Ok(())
}

/// Cancels any pending advance and, if rotation is on, arms a fresh one.
fn arm_advance(slot: &mut Option<TimerId>, timers: &mut Timers, now: Duration, options: &PresetOptions) {
    if let Some(id) = slot.take() {
        timers.cancel(id);
    }
    let Some(period) = options.advance_period() else {
        return;
    };
    match now.checked_add(period) {
        Some(at) => *slot = Some(timers.schedule_at(at, Task::PresetAdvance)),
        None => tracing::warn!(secs = period.as_secs(), "auto-advance period out of range"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequential_rotation_wraps() {
        let mut rotation = PresetRotation::new(3, false, 0);
        assert_eq!(rotation.next(), 1);
        assert_eq!(rotation.next(), 2);
        assert_eq!(rotation.next(), 0);
        assert_eq!(rotation.previous(), 2);
    }

    #[test]
    fn random_rotation_never_repeats_current() {
        let mut rotation = PresetRotation::new(5, true, 42);
        let mut seen = [false; 5];
        let mut prev = rotation.current();
        for _ in 0..200 {
            let next = rotation.next();
            assert_ne!(next, prev);
            assert!(next < 5);
            seen[next] = true;
            prev = next;
        }
        assert!(seen.iter().all(|&s| s));
    }

    #[test]
    fn single_preset_stays_put() {
        let mut rotation = PresetRotation::new(1, true, 0);
        assert_eq!(rotation.next(), 0);
    }

    #[test]
    fn crossfade_completes_after_blend_time() {
        let mut viz = PlasmaVisualizer::new(9, 8);
        viz.load_preset(3, Duration::from_secs(1));
        assert_eq!(viz.blend_progress(), 0.0);
        viz.advance(Duration::from_millis(500), 0.0);
        assert!((viz.blend_progress() - 0.5).abs() < 1e-9);
        viz.advance(Duration::from_millis(700), 0.0);
        assert_eq!(viz.blend_progress(), 1.0);
        assert_eq!(viz.params(), viz.presets[3]);
    }

    #[test]
    fn zero_blend_switches_at_once() {
        let mut viz = PlasmaVisualizer::new(9, 8);
        viz.load_preset(2, Duration::ZERO);
        assert_eq!(viz.params(), viz.presets[2]);
    }

    #[test]
    fn mesh_values_fill_the_mesh() {
        let mut viz = PlasmaVisualizer::new(1, 8);
        viz.set_mesh_size(18, 24);
        viz.advance(Duration::from_millis(16), 0.5);
        assert_eq!(viz.values.len(), 18 * 24);
        assert!(viz.values.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn level_scales_with_baseline() {
        assert_eq!(level_of(&[128; 16], 128), 0.0);
        assert_eq!(level_of(&[0, 128], 128), 1.0);
        assert_eq!(level_of(&[255], 0), 1.0);
    }

    #[test]
    fn advance_timer_is_rearmed_not_duplicated() {
        let mut timers = Timers::new();
        let options = PresetOptions {
            auto_advance: true,
            ..Default::default()
        };
        let mut slot = None;
        arm_advance(&mut slot, &mut timers, Duration::ZERO, &options);
        arm_advance(&mut slot, &mut timers, Duration::from_secs(3), &options);
        assert_eq!(timers.count(|t| *t == Task::PresetAdvance), 1);
        assert_eq!(timers.next_deadline(), Some(Duration::from_secs(18)));
    }

    #[test]
    fn oversized_advance_period_never_overflows() {
        let mut prefs = Prefs::empty("unused.toml");
        prefs.set("auto_advance", "true");
        prefs.set("auto_advance_secs", u64::MAX.to_string());
        let options = PresetOptions::from_prefs(&prefs);
        let mut timers = Timers::new();
        let mut slot = None;
        arm_advance(&mut slot, &mut timers, Duration::from_secs(5), &options);
        assert_eq!(
            timers.next_deadline(),
            Some(Duration::from_secs(5 + crate::settings::MAX_AUTO_ADVANCE_SECS))
        );

        // unclamped options are refused rather than wrapping
        let raw = PresetOptions {
            auto_advance: true,
            auto_advance_secs: u64::MAX,
            ..Default::default()
        };
        let mut slot = None;
        let mut timers = Timers::new();
        arm_advance(&mut slot, &mut timers, Duration::from_secs(5), &raw);
        assert!(slot.is_none());
        assert!(timers.is_empty());
    }

    #[test]
    fn mesh_presets_match_resolutions() {
        assert_eq!(MESH_SIZES[DEFAULT_MESH], (128, 96));
        assert_eq!(MESH_SIZES.len(), 6);
    }
}
