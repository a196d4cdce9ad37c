//! Per-cell flash and decay state.
//!
//! Cells are owned by index. Exciting a cell turns it on immediately and
//! arms a decay timer of `intensity * decay_scale` milliseconds; a newer
//! excite replaces the older one and re-arms the timer from its own call
//! time. A resize or teardown bumps the grid generation, which makes any
//! decay still in flight a no-op.

use std::time::Duration;

use super::scheduler::{Task, TimerId, Timers};

/// Default decay, in milliseconds per unit of intensity
pub const DEFAULT_DECAY_SCALE: f32 = 5.0;
/// Time for an excited cell to reach full colour
pub const FLASH_TRANSITION: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CellState {
    Idle,
    Excited {
        intensity: u8,
        hue: f32,
        at: Duration,
        until: Duration,
    },
}

impl CellState {
    pub fn is_excited(&self) -> bool {
        matches!(self, CellState::Excited { .. })
    }
}

#[derive(Debug, Clone, Copy)]
struct Slot {
    state: CellState,
    decay: Option<TimerId>,
}

impl Slot {
    const IDLE: Slot = Slot {
        state: CellState::Idle,
        decay: None,
    };
}

pub struct CellAnimator {
    cells: Vec<Slot>,
    decay_scale: f32,
    generation: u64,
    live: bool,
    excites: u64,
}

impl CellAnimator {
    pub fn new(cell_count: usize, decay_scale: f32) -> Self {
        Self {
            cells: vec![Slot::IDLE; cell_count],
            decay_scale: sanitize_scale(decay_scale),
            generation: 0,
            live: true,
            excites: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }

    pub fn state(&self, cell: usize) -> Option<CellState> {
        self.cells.get(cell).map(|s| s.state)
    }

    pub fn states(&self) -> impl Iterator<Item = CellState> + '_ {
        self.cells.iter().map(|s| s.state)
    }

    pub fn excited_count(&self) -> usize {
        self.cells.iter().filter(|s| s.state.is_excited()).count()
    }

    /// Total excite calls applied since creation.
    pub fn excite_count(&self) -> u64 {
        self.excites
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn set_decay_scale(&mut self, scale: f32) {
        self.decay_scale = sanitize_scale(scale);
    }

    pub fn decay_for(&self, intensity: u8) -> Duration {
        let micros = intensity as f64 * self.decay_scale as f64 * 1000.0;
        Duration::from_micros(micros.round() as u64)
    }

    /// Flashes `cell`. Out-of-range cells and torn-down grids are ignored.
    pub fn excite(&mut self, cell: usize, intensity: u8, hue: f32, now: Duration, timers: &mut Timers) {
        if !self.live {
            return;
        }
        let until = now + self.decay_for(intensity);
        let generation = self.generation;
        let Some(slot) = self.cells.get_mut(cell) else {
            return;
        };
        if let Some(old) = slot.decay.take() {
            timers.cancel(old);
        }
        slot.state = CellState::Excited {
            intensity,
            hue,
            at: now,
            until,
        };
        slot.decay = Some(timers.schedule_at(until, Task::Decay { cell, generation }));
        self.excites += 1;
    }

    /// Handles a fired [`Task::Decay`]. Returns true if a cell went idle.
    pub fn decay(&mut self, id: TimerId, cell: usize, generation: u64) -> bool {
        if !self.live || generation != self.generation {
            tracing::trace!(cell, generation, "stale decay discarded");
            return false;
        }
        match self.cells.get_mut(cell) {
            Some(slot) if slot.decay == Some(id) => {
                slot.decay = None;
                slot.state = CellState::Idle;
                true
            }
            _ => false,
        }
    }

    /// Discards every cell and recreates `cell_count` idle ones.
    pub fn rebuild(&mut self, cell_count: usize, timers: &mut Timers) {
        self.cancel_decays(timers);
        self.generation += 1;
        self.cells = vec![Slot::IDLE; cell_count];
        self.live = true;
    }

    /// Cancels pending decays and refuses further mutation.
    pub fn teardown(&mut self, timers: &mut Timers) {
        self.cancel_decays(timers);
        self.generation += 1;
        self.live = false;
        for slot in &mut self.cells {
            slot.state = CellState::Idle;
        }
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    fn cancel_decays(&mut self, timers: &mut Timers) {
        for slot in &mut self.cells {
            if let Some(id) = slot.decay.take() {
                timers.cancel(id);
            }
        }
    }
}

fn sanitize_scale(scale: f32) -> f32 {
    if scale.is_finite() && scale > 0.0 {
        scale
    } else {
        DEFAULT_DECAY_SCALE
    }
}

/// Brightness of a cell at `now`: 1.0 right after the flash transition,
/// falling linearly to 0.0 at its decay deadline.
pub fn brightness(state: &CellState, now: Duration) -> f32 {
    match *state {
        CellState::Idle => 0.0,
        CellState::Excited { at, until, .. } => {
            let lit = at + FLASH_TRANSITION;
            if now <= lit || until <= lit {
                return 1.0;
            }
            let span = (until - lit).as_secs_f32();
            let gone = (now.min(until) - lit).as_secs_f32();
            (1.0 - gone / span).clamp(0.0, 1.0)
        }
    }
}
