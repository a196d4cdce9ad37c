//! End-to-end session scenarios on a hand-driven clock.

use std::cell::RefCell;
use std::rc::Rc;
use std::time::Duration;

use ledgrid::audio::{AcquireStatus, AnalysisMode, AudioSource, AudioTap, SyntheticTap};
use ledgrid::engine::{Clock, ManualClock, SchedulerKind, Task, VisualizerSession};
use ledgrid::settings::VisualizerOptions;

/// Tap whose buffer the test can swap between ticks.
#[derive(Clone)]
struct ScriptedTap {
    buffer: Rc<RefCell<Vec<u8>>>,
    reads: Rc<RefCell<usize>>,
    window: usize,
}

impl ScriptedTap {
    fn silent(len: usize) -> Self {
        Self {
            buffer: Rc::new(RefCell::new(vec![128; len])),
            reads: Rc::new(RefCell::new(0)),
            window: 0,
        }
    }

    fn set(&self, buffer: Vec<u8>) {
        *self.buffer.borrow_mut() = buffer;
    }

    fn reads(&self) -> usize {
        *self.reads.borrow()
    }
}

impl AudioTap for ScriptedTap {
    fn window_size(&self) -> usize {
        self.window
    }

    fn set_window_size(&mut self, fft_size: usize) {
        self.window = fft_size;
    }

    fn set_gain(&mut self, _gain: f32) {}

    fn baseline(&self) -> u8 {
        128
    }

    fn read(&mut self, out: &mut Vec<u8>) {
        *self.reads.borrow_mut() += 1;
        out.clear();
        out.extend_from_slice(&self.buffer.borrow());
    }
}

fn ms(n: u64) -> Duration {
    Duration::from_millis(n)
}

fn options() -> VisualizerOptions {
    VisualizerOptions {
        history_round_ms: 0,
        ..Default::default()
    }
}

/// Advances the clock deadline by deadline up to `end`, recording the times
/// at which the tap was read.
fn run_until(
    session: &mut VisualizerSession<ManualClock>,
    clock: &ManualClock,
    tap: &ScriptedTap,
    end: Duration,
) -> Vec<Duration> {
    let mut reads = Vec::new();
    while let Some(at) = session.next_deadline() {
        if at > end {
            break;
        }
        clock.set(at);
        let before = tap.reads();
        session.pump();
        if tap.reads() > before {
            reads.push(at);
        }
        let ticks = session.timers().count(|t| matches!(t, Task::Tick { .. }));
        assert!(ticks <= 1, "{} tick chains pending", ticks);
    }
    clock.set(end);
    reads
}

/// 16 cells at pitch 8.
fn sixteen_cell_session(clock: &ManualClock) -> (VisualizerSession<ManualClock>, ScriptedTap) {
    let mut session = VisualizerSession::new(&options(), (32, 32), clock.clone());
    let tap = ScriptedTap::silent(512);
    session.attach_tap(Box::new(tap.clone()));
    (session, tap)
}

#[test]
fn silence_excites_nothing() {
    let clock = ManualClock::new();
    let (mut session, tap) = sixteen_cell_session(&clock);
    session.start();
    let reads = run_until(&mut session, &clock, &tap, ms(2000));
    assert_eq!(reads.len(), 20);
    assert_eq!(session.cells().excite_count(), 0);
    assert_eq!(session.threshold(), 0);
}

#[test]
fn spike_after_quiet_lights_its_cell() {
    let clock = ManualClock::new();
    let (mut session, tap) = sixteen_cell_session(&clock);
    // a quieter round first so the history holds a low floor
    let mut murmur = vec![128u8; 512];
    murmur[0] = 138;
    tap.set(murmur);
    session.start();
    run_until(&mut session, &clock, &tap, ms(100));
    assert_eq!(session.threshold(), 10);
    assert_eq!(session.cells().excite_count(), 0);

    // with damping 4 a spike clears the floor it raises
    session.set_damping(4.0);
    let mut spike = vec![128u8; 512];
    spike[256] = 200;
    tap.set(spike);
    run_until(&mut session, &clock, &tap, ms(200));
    assert_eq!(session.cells().excite_count(), 1);
    let lit: Vec<usize> = session
        .cells()
        .states()
        .enumerate()
        .filter(|(_, s)| s.is_excited())
        .map(|(i, _)| i)
        .collect();
    assert_eq!(lit, vec![8]);

    // 72 units at 5ms each
    tap.set(vec![128; 512]);
    run_until(&mut session, &clock, &tap, ms(200 + 359));
    assert!(session.cells().state(8).unwrap().is_excited());
    run_until(&mut session, &clock, &tap, ms(200 + 360));
    assert!(!session.cells().state(8).unwrap().is_excited());
}

#[test]
fn fixed_interval_ticks_every_hundred_ms() {
    let clock = ManualClock::new();
    let (mut session, tap) = sixteen_cell_session(&clock);
    assert_eq!(session.scheduler_kind(), SchedulerKind::Interval);
    session.start();
    let reads = run_until(&mut session, &clock, &tap, ms(350));
    assert_eq!(reads, vec![ms(100), ms(200), ms(300)]);
}

#[test]
fn refresh_throttled_runs_at_cadence() {
    let clock = ManualClock::new();
    let opts = VisualizerOptions {
        scheduler: SchedulerKind::Refresh,
        refresh_hz: 50.0,
        ..options()
    };
    let mut session = VisualizerSession::new(&opts, (32, 32), clock.clone());
    let tap = ScriptedTap::silent(512);
    session.attach_tap(Box::new(tap.clone()));
    session.start();
    let reads = run_until(&mut session, &clock, &tap, ms(420));
    assert_eq!(reads, vec![ms(20), ms(120), ms(220), ms(320), ms(420)]);
}

#[test]
fn restarting_never_duplicates_the_chain() {
    let clock = ManualClock::new();
    let (mut session, tap) = sixteen_cell_session(&clock);
    session.start();
    clock.set(ms(30));
    session.start();
    session.start();
    let reads = run_until(&mut session, &clock, &tap, ms(250));
    assert_eq!(reads, vec![ms(130), ms(230)]);
}

#[test]
fn collapse_to_zero_cells_is_harmless() {
    let clock = ManualClock::new();
    let opts = VisualizerOptions {
        cell_pitch: 80,
        ..options()
    };
    let mut session = VisualizerSession::new(&opts, (1024, 768), clock.clone());
    let tap = ScriptedTap::silent(512);
    session.attach_tap(Box::new(tap.clone()));
    assert_eq!(session.grid().cell_count, 108);
    session.start();

    session.observe_resize(0, 0);
    run_until(&mut session, &clock, &tap, ms(100));
    assert_eq!(session.grid().cell_count, 0);
    assert!(session.cells().is_empty());

    let mut loud = vec![128u8; 512];
    loud.iter_mut().step_by(3).for_each(|v| *v = 250);
    tap.set(loud);
    let reads = run_until(&mut session, &clock, &tap, ms(1000));
    assert!(!reads.is_empty());
    assert_eq!(session.cells().excite_count(), 0);
    assert!(session.is_running());
}

#[test]
fn same_size_twice_keeps_cell_state() {
    let clock = ManualClock::new();
    let opts = VisualizerOptions {
        threshold_damping: 4.0,
        ..options()
    };
    let mut session = VisualizerSession::new(&opts, (32, 32), clock.clone());
    let tap = ScriptedTap::silent(512);
    session.attach_tap(Box::new(tap.clone()));
    session.start();

    session.observe_resize(48, 48);
    run_until(&mut session, &clock, &tap, ms(100));
    let grid = *session.grid();
    assert_eq!(grid.cell_count, 36);
    let generation = session.cells().generation();

    // 36 cells walk the buffer at a stride of 14
    let mut spike = vec![128u8; 512];
    spike[252] = 200;
    tap.set(spike);
    run_until(&mut session, &clock, &tap, ms(200));
    assert_eq!(session.cells().excited_count(), 1);
    assert!(session.cells().state(17).unwrap().is_excited());

    session.observe_resize(48, 48);
    run_until(&mut session, &clock, &tap, ms(260));
    assert_eq!(*session.grid(), grid);
    assert_eq!(session.cells().generation(), generation);
    assert_eq!(session.cells().excited_count(), 1);
}

#[test]
fn resize_bursts_apply_once_at_a_tick_boundary() {
    let clock = ManualClock::new();
    let (mut session, tap) = sixteen_cell_session(&clock);
    session.start();
    for (t, w) in [(10, 40), (20, 48), (30, 64)] {
        clock.set(ms(t));
        session.observe_resize(w, 32);
        session.pump();
    }
    // settled at 80ms, applied by the tick at 100ms
    clock.set(ms(80));
    session.pump();
    assert_eq!(session.grid().cell_count, 16);
    run_until(&mut session, &clock, &tap, ms(100));
    assert_eq!(session.grid().columns, 8);
    assert_eq!(session.cells().len(), 32);
    assert_eq!(session.layout().window.fft_size, 128);
}

#[test]
fn stop_cancels_decays_and_ticks() {
    let clock = ManualClock::new();
    let opts = VisualizerOptions {
        threshold_damping: 4.0,
        ..options()
    };
    let mut session = VisualizerSession::new(&opts, (32, 32), clock.clone());
    let tap = ScriptedTap::silent(512);
    let mut spike = vec![128u8; 512];
    spike[256] = 200;
    tap.set(spike);
    session.attach_tap(Box::new(tap.clone()));
    session.start();
    run_until(&mut session, &clock, &tap, ms(100));
    assert!(session.timers().count(|t| matches!(t, Task::Decay { .. })) > 0);

    session.stop();
    assert!(session.timers().is_empty());
    assert!(!session.is_live());
    let reads = run_until(&mut session, &clock, &tap, ms(5000));
    assert!(reads.is_empty());
    assert_eq!(session.cells().excited_count(), 0);
}

#[test]
fn restart_after_stop_rebuilds_cells() {
    let clock = ManualClock::new();
    let (mut session, tap) = sixteen_cell_session(&clock);
    session.start();
    session.stop();
    assert!(!session.has_tap());

    // the released tap is not read again
    session.start();
    assert!(session.is_live());
    let stale = run_until(&mut session, &clock, &tap, ms(100));
    assert!(stale.is_empty());
    assert_eq!(session.cells().len(), 16);

    let fresh = ScriptedTap::silent(512);
    session.attach_tap(Box::new(fresh.clone()));
    let reads = run_until(&mut session, &clock, &fresh, ms(200));
    assert_eq!(reads, vec![ms(200)]);
}

#[test]
fn synthetic_tap_drives_the_grid() {
    let clock = ManualClock::new();
    let opts = VisualizerOptions {
        threshold_damping: 4.0,
        ..options()
    };
    let mut session = VisualizerSession::new(&opts, (64, 64), clock.clone());
    session.attach_tap(Box::new(SyntheticTap::new(11, AnalysisMode::Waveform, 10.0)));
    session.start();
    while let Some(at) = session.next_deadline() {
        if at > ms(5000) {
            break;
        }
        clock.set(at);
        session.pump();
    }
    assert!(session.cells().excite_count() > 0);
    assert_eq!(session.now(), clock.now());
}

#[test]
fn pending_acquisition_is_not_duplicated() {
    // the device probe runs off-thread, so this holds with or without hardware
    let mut source = AudioSource::new(AnalysisMode::Waveform, 1.0);
    assert_eq!(source.acquire().unwrap(), AcquireStatus::Started);
    assert!(source.is_pending());
    assert_eq!(source.acquire().unwrap(), AcquireStatus::AlreadyPending);
    assert_eq!(source.attempts(), 1);
}
