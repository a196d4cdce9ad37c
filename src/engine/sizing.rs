//! Grid sizing and analysis resolution.
//!
//! Viewport changes arrive in bursts. [`SizingController::observe`] restarts
//! a quiet-period timer on every report; only when the timer settles is a
//! new [`GridLayout`] computed. The layout pairs the cell grid with the
//! analysis window so both change together, and it is only staged here:
//! the session picks it up at the start of its next tick.

use std::time::Duration;

use super::scheduler::{Task, TimerId, Timers};

/// Smallest analysis window (FFT size)
pub const MIN_FFT_SIZE: usize = 128;
/// Largest analysis window (FFT size)
pub const MAX_FFT_SIZE: usize = 16384;
/// Quiet period before a resize burst is acted upon
pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(50);

/// Cell grid derived from a viewport and a cell pitch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridConfig {
    pub pitch: u32,
    pub viewport_width: u32,
    pub viewport_height: u32,
    pub columns: u32,
    pub rows: u32,
    pub cell_count: usize,
}

impl GridConfig {
    pub fn compute(pitch: u32, viewport_width: u32, viewport_height: u32) -> Self {
        let (columns, rows) = if pitch == 0 {
            (0, 0)
        } else {
            (viewport_width / pitch, viewport_height / pitch)
        };
        Self {
            pitch,
            viewport_width,
            viewport_height,
            columns,
            rows,
            cell_count: columns as usize * rows as usize,
        }
    }

    /// Column and row of cell `index`, filled row by row.
    pub fn position(&self, index: usize) -> Option<(u32, u32)> {
        if index >= self.cell_count {
            return None;
        }
        let cols = self.columns as usize;
        Some(((index % cols) as u32, (index / cols) as u32))
    }
}

/// Analyser resolution: `fft_size` samples in, `fft_size / 2` values out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AnalysisWindow {
    pub fft_size: usize,
}

impl AnalysisWindow {
    /// Smallest window whose bin count covers `cells`, within bounds.
    pub fn for_cells(cells: usize) -> Self {
        let bins = cells.max(1).next_power_of_two();
        let fft_size = bins.saturating_mul(2).clamp(MIN_FFT_SIZE, MAX_FFT_SIZE);
        Self { fft_size }
    }

    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }
}

/// Grid and window, always computed and applied together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridLayout {
    pub grid: GridConfig,
    pub window: AnalysisWindow,
}

impl GridLayout {
    pub fn compute(pitch: u32, viewport_width: u32, viewport_height: u32) -> Self {
        let grid = GridConfig::compute(pitch, viewport_width, viewport_height);
        Self {
            grid,
            window: AnalysisWindow::for_cells(grid.cell_count),
        }
    }
}

pub struct SizingController {
    pitch: u32,
    debounce: Duration,
    viewport: (u32, u32),
    applied: GridLayout,
    staged: Option<GridLayout>,
    pending: Option<(u32, u32)>,
    timer: Option<TimerId>,
}

impl SizingController {
    pub fn new(pitch: u32, viewport: (u32, u32), debounce: Duration) -> Self {
        Self {
            pitch,
            debounce,
            viewport,
            applied: GridLayout::compute(pitch, viewport.0, viewport.1),
            staged: None,
            pending: None,
            timer: None,
        }
    }

    /// Layout the pipeline is currently running with.
    pub fn layout(&self) -> &GridLayout {
        &self.applied
    }

    pub fn has_staged(&self) -> bool {
        self.staged.is_some()
    }

    /// Records a viewport report and restarts the quiet-period timer.
    pub fn observe(&mut self, width: u32, height: u32, now: Duration, timers: &mut Timers) {
        if let Some(id) = self.timer.take() {
            timers.cancel(id);
        }
        self.pending = Some((width, height));
        self.timer = Some(timers.schedule_at(now + self.debounce, Task::ResizeSettled));
    }

    /// Handles a fired [`Task::ResizeSettled`].
    pub fn settle(&mut self, id: TimerId) {
        if self.timer != Some(id) {
            return;
        }
        self.timer = None;
        if let Some(viewport) = self.pending.take() {
            self.viewport = viewport;
            self.restage();
        }
    }

    /// Pitch changes are staged at once, against the last settled viewport.
    pub fn set_pitch(&mut self, pitch: u32) {
        if pitch != self.pitch {
            self.pitch = pitch;
            self.restage();
        }
    }

    /// Hands over the staged layout, if any, and makes it current.
    pub fn take_staged(&mut self) -> Option<GridLayout> {
        let layout = self.staged.take()?;
        self.applied = layout;
        Some(layout)
    }

    fn restage(&mut self) {
        let target = GridLayout::compute(self.pitch, self.viewport.0, self.viewport.1);
        if target == self.applied {
            self.staged = None;
        } else {
            tracing::debug!(
                columns = target.grid.columns,
                rows = target.grid.rows,
                cells = target.grid.cell_count,
                fft_size = target.window.fft_size,
                "grid layout staged"
            );
            self.staged = Some(target);
        }
    }
}
