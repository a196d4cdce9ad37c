//! One visualizer session: the owner of every piece of pipeline state.
//!
//! The host feeds it viewport sizes and calls [`VisualizerSession::pump`]
//! whenever the next deadline passes. Within a tick the order is fixed:
//! apply any staged layout, read the tap, extract, map, excite.

use std::time::Duration;

use super::animator::CellAnimator;
use super::extractor::{ticks_per_round, ExcitationExtractor, ExtractorOptions};
use super::mapper::{map_samples, MapperOptions};
use super::scheduler::{Clock, FrameScheduler, ScheduleState, SchedulerKind, Task, TickOutcome, Timers};
use super::sizing::{GridConfig, GridLayout, SizingController};
use crate::audio::AudioTap;
use crate::settings::VisualizerOptions;

pub struct VisualizerSession<C: Clock> {
    clock: C,
    timers: Timers,
    scheduler: FrameScheduler,
    sizing: SizingController,
    extractor: ExcitationExtractor,
    mapper: MapperOptions,
    animator: CellAnimator,
    tap: Option<Box<dyn AudioTap>>,
    buffer: Vec<u8>,
    refresh_hz: f32,
    round_ms: u64,
    gain: f32,
    live: bool,
}

impl<C: Clock> VisualizerSession<C> {
    pub fn new(options: &VisualizerOptions, viewport: (u32, u32), clock: C) -> Self {
        let sizing = SizingController::new(options.cell_pitch, viewport, options.resize_debounce());
        let cells = sizing.layout().grid.cell_count;
        let extractor = ExcitationExtractor::new(ExtractorOptions {
            baseline: options.analysis.baseline(),
            history_len: options.history_length,
            damping: options.threshold_damping,
            stat: options.threshold_stat,
            ticks_per_round: ticks_per_round(options.frame_rate, options.history_round_ms),
        });
        Self {
            clock,
            timers: Timers::new(),
            scheduler: FrameScheduler::new(
                options.frame_rate,
                options.scheduler.discipline(options.refresh_hz),
            ),
            sizing,
            extractor,
            mapper: MapperOptions {
                baseline: options.analysis.baseline(),
                hue_mapping: options.hue_mapping,
                hue_range: options.hue_range,
            },
            animator: CellAnimator::new(cells, options.decay_scale),
            tap: None,
            buffer: Vec::new(),
            refresh_hz: options.refresh_hz,
            round_ms: options.history_round_ms,
            gain: options.gain,
            live: true,
        }
    }

    /// Installs the audio tap, releasing any previous one.
    pub fn attach_tap(&mut self, mut tap: Box<dyn AudioTap>) {
        if let Some(mut old) = self.tap.take() {
            old.suspend();
        }
        tap.set_window_size(self.sizing.layout().window.fft_size);
        tap.set_gain(self.gain);
        let baseline = tap.baseline();
        self.extractor.set_baseline(baseline);
        self.mapper.baseline = baseline;
        self.tap = Some(tap);
    }

    pub fn has_tap(&self) -> bool {
        self.tap.is_some()
    }

    /// Starts (or restarts) the single tick chain.
    pub fn start(&mut self) {
        let now = self.clock.now();
        if !self.live {
            self.animator.rebuild(self.sizing.layout().grid.cell_count, &mut self.timers);
            self.live = true;
        }
        self.scheduler.start(&mut self.timers, now);
        tracing::info!(cells = self.animator.len(), "visualizer session started");
    }

    /// Halts ticking but leaves lit cells to fade out.
    pub fn pause(&mut self) {
        self.scheduler.stop(&mut self.timers);
    }

    pub fn resume(&mut self) {
        if self.live && !self.scheduler.is_active() {
            let now = self.clock.now();
            self.scheduler.start(&mut self.timers, now);
        }
    }

    /// Ends the session: no more ticks, no pending decays, tap released.
    /// A suspended tap cannot be revived, so restarting needs a fresh
    /// [`VisualizerSession::attach_tap`].
    pub fn stop(&mut self) {
        self.scheduler.stop(&mut self.timers);
        self.animator.teardown(&mut self.timers);
        if let Some(mut tap) = self.tap.take() {
            tap.suspend();
        }
        self.live = false;
        tracing::info!("visualizer session stopped");
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn is_running(&self) -> bool {
        self.scheduler.is_active()
    }

    pub fn observe_resize(&mut self, width: u32, height: u32) {
        let now = self.clock.now();
        self.sizing.observe(width, height, now, &mut self.timers);
    }

    pub fn set_cadence(&mut self, hz: f32) {
        self.scheduler.set_cadence(hz);
        let hz = self.scheduler.state().cadence_hz;
        self.extractor.set_ticks_per_round(ticks_per_round(hz, self.round_ms));
    }

    pub fn set_pitch(&mut self, pitch: u32) {
        self.sizing.set_pitch(pitch.max(1));
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain;
        if let Some(tap) = self.tap.as_mut() {
            tap.set_gain(gain);
        }
    }

    pub fn set_damping(&mut self, damping: f32) {
        self.extractor.set_damping(damping);
    }

    pub fn set_decay_scale(&mut self, scale: f32) {
        self.animator.set_decay_scale(scale);
    }

    pub fn set_scheduler(&mut self, kind: SchedulerKind) {
        if kind == self.scheduler.kind() {
            return;
        }
        let now = self.clock.now();
        self.scheduler
            .set_discipline(kind.discipline(self.refresh_hz), &mut self.timers, now);
        tracing::info!(discipline = %kind, "scheduler discipline changed");
    }

    /// Runs every timer due by now. Returns true if visual state changed.
    pub fn pump(&mut self) -> bool {
        let now = self.clock.now();
        let mut dirty = false;
        while let Some((id, task)) = self.timers.pop_due(now) {
            match task {
                Task::Tick { chain } => dirty |= self.tick(chain),
                Task::Decay { cell, generation } => {
                    dirty |= self.animator.decay(id, cell, generation);
                }
                Task::ResizeSettled => self.sizing.settle(id),
                Task::PresetAdvance => {
                    tracing::trace!("preset advance ignored by grid session");
                }
            }
        }
        dirty
    }

    pub fn next_deadline(&mut self) -> Option<Duration> {
        self.timers.next_deadline()
    }

    pub fn now(&self) -> Duration {
        self.clock.now()
    }

    pub fn cells(&self) -> &CellAnimator {
        &self.animator
    }

    /// Grid the cells currently belong to.
    pub fn grid(&self) -> &GridConfig {
        &self.sizing.layout().grid
    }

    pub fn layout(&self) -> &GridLayout {
        self.sizing.layout()
    }

    pub fn threshold(&self) -> u32 {
        self.extractor.threshold()
    }

    pub fn last_peak(&self) -> u8 {
        self.extractor.last_peak()
    }

    pub fn schedule(&self) -> &ScheduleState {
        self.scheduler.state()
    }

    pub fn scheduler_kind(&self) -> SchedulerKind {
        self.scheduler.kind()
    }

    pub fn timers(&self) -> &Timers {
        &self.timers
    }

    fn tick(&mut self, chain: u64) -> bool {
        let now = self.clock.now();
        let dirty = match self.scheduler.begin_tick(chain, now) {
            TickOutcome::Run => self.run_pipeline(now),
            TickOutcome::Skip => false,
            TickOutcome::Stopped => return false,
            TickOutcome::Stale => {
                tracing::trace!(chain, "stale tick discarded");
                return false;
            }
        };
        let done = self.clock.now();
        self.scheduler.finish_tick(&mut self.timers, done);
        dirty
    }

    fn run_pipeline(&mut self, now: Duration) -> bool {
        let mut dirty = false;
        if let Some(layout) = self.sizing.take_staged() {
            self.animator.rebuild(layout.grid.cell_count, &mut self.timers);
            if let Some(tap) = self.tap.as_mut() {
                tap.set_window_size(layout.window.fft_size);
            }
            tracing::info!(
                columns = layout.grid.columns,
                rows = layout.grid.rows,
                cells = layout.grid.cell_count,
                fft_size = layout.window.fft_size,
                "grid layout applied"
            );
            dirty = true;
        }

        let Some(tap) = self.tap.as_mut() else {
            return dirty;
        };
        tap.read(&mut self.buffer);
        self.extractor.sample(&self.buffer);

        let cells = self.animator.len();
        if cells == 0 {
            tracing::trace!("grid has no cells, nothing to excite");
            return dirty;
        }
        let threshold = self.extractor.threshold();
        for event in map_samples(&self.buffer, threshold, cells, &self.mapper) {
            self.animator
                .excite(event.cell, event.intensity, event.hue, now, &mut self.timers);
            dirty = true;
        }
        dirty
    }
}
