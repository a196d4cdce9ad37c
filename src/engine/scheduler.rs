//! Frame scheduling on a single-threaded event loop.
//!
//! Everything the visualizer does happens when a timer in [`Timers`] comes
//! due: frame ticks, cell decays, the settled end of a resize burst. Two
//! interchangeable [`Discipline`]s decide when the next frame tick fires:
//!
//! - [`RefreshThrottled`] fires on every display refresh and skips work
//!   until a full cadence interval has passed since the last executed tick.
//! - [`FixedInterval`] fires exactly one cadence interval after the previous
//!   tick completed, with no drift correction.
//!
//! [`FrameScheduler`] owns the only tick chain. Starting it again cancels
//! the pending tick first, so two chains can never run side by side.

use std::cell::Cell;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::fmt;
use std::rc::Rc;
use std::str::FromStr;
use std::time::{Duration, Instant};

/// Lowest cadence accepted by the scheduler (Hz)
pub const MIN_CADENCE_HZ: f32 = 1.0;
/// Highest cadence accepted by the scheduler (Hz)
pub const MAX_CADENCE_HZ: f32 = 120.0;
/// Display refresh assumed when none is configured
pub const DEFAULT_REFRESH_HZ: f32 = 60.0;
/// Fastest refresh a throttled chain will poll at
pub const MAX_REFRESH_HZ: f32 = 480.0;

/// Monotonic time source, measured from an arbitrary session origin.
pub trait Clock {
    fn now(&self) -> Duration;
}

/// Wall clock backed by [`Instant`].
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self { origin: Instant::now() }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Hand-driven clock for deterministic runs. Clones share the same time.
#[derive(Clone, Default)]
pub struct ManualClock {
    now: Rc<Cell<Duration>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, t: Duration) {
        self.now.set(t);
    }

    pub fn advance(&self, d: Duration) {
        self.now.set(self.now.get() + d);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.now.get()
    }
}

/// Cancel token for a scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerId(u64);

/// Work the event loop can be asked to do later.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Task {
    /// Frame tick belonging to tick chain `chain`
    Tick { chain: u64 },
    /// Return cell `cell` to idle, if the grid is still `generation`
    Decay { cell: usize, generation: u64 },
    /// A resize burst has been quiet for the debounce period
    ResizeSettled,
    /// Switch to the next preset
    PresetAdvance,
}

/// Timer queue ordered by deadline, then by scheduling order.
///
/// Cancelled entries stay in the heap and are skipped when they surface.
#[derive(Default)]
pub struct Timers {
    queue: BinaryHeap<Reverse<(Duration, u64)>>,
    tasks: HashMap<u64, Task>,
    next_id: u64,
}

impl Timers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn schedule_at(&mut self, at: Duration, task: Task) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        self.queue.push(Reverse((at, id)));
        self.tasks.insert(id, task);
        TimerId(id)
    }

    /// Returns false if the timer already fired or was cancelled.
    pub fn cancel(&mut self, id: TimerId) -> bool {
        self.tasks.remove(&id.0).is_some()
    }

    /// Deadline of the earliest live timer.
    pub fn next_deadline(&mut self) -> Option<Duration> {
        self.discard_cancelled();
        self.queue.peek().map(|Reverse((at, _))| *at)
    }

    /// Removes and returns the earliest timer due at or before `now`.
    pub fn pop_due(&mut self, now: Duration) -> Option<(TimerId, Task)> {
        self.discard_cancelled();
        let Reverse((at, id)) = *self.queue.peek()?;
        if at > now {
            return None;
        }
        self.queue.pop();
        self.tasks.remove(&id).map(|task| (TimerId(id), task))
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Number of live timers whose task satisfies `pred`.
    pub fn count(&self, pred: impl Fn(&Task) -> bool) -> usize {
        self.tasks.values().filter(|t| pred(t)).count()
    }

    fn discard_cancelled(&mut self) {
        while let Some(Reverse((_, id))) = self.queue.peek() {
            if self.tasks.contains_key(id) {
                break;
            }
            self.queue.pop();
        }
    }
}

/// Strategy deciding when frame ticks fire.
pub trait Discipline {
    fn kind(&self) -> SchedulerKind;

    /// Whether an opportunity firing at `now` should execute the pipeline.
    fn is_due(&self, now: Duration, last_tick: Option<Duration>, interval: Duration) -> bool;

    /// Arms the next opportunity and returns its cancel token.
    fn schedule_next(
        &self,
        timers: &mut Timers,
        now: Duration,
        interval: Duration,
        task: Task,
    ) -> TimerId;
}

/// Fires on every display refresh, doing work at most once per interval.
pub struct RefreshThrottled {
    refresh_period: Duration,
}

impl RefreshThrottled {
    pub fn new(refresh_hz: f32) -> Self {
        let hz = if refresh_hz.is_finite() {
            refresh_hz.clamp(1.0, MAX_REFRESH_HZ)
        } else {
            DEFAULT_REFRESH_HZ
        };
        Self {
            refresh_period: hz_to_period(hz),
        }
    }
}

impl Discipline for RefreshThrottled {
    fn kind(&self) -> SchedulerKind {
        SchedulerKind::Refresh
    }

    fn is_due(&self, now: Duration, last_tick: Option<Duration>, interval: Duration) -> bool {
        match last_tick {
            Some(last) => now.saturating_sub(last) >= interval,
            None => true,
        }
    }

    fn schedule_next(
        &self,
        timers: &mut Timers,
        now: Duration,
        _interval: Duration,
        task: Task,
    ) -> TimerId {
        timers.schedule_at(now + self.refresh_period, task)
    }
}

/// Fires one interval after the previous tick completed.
pub struct FixedInterval;

impl Discipline for FixedInterval {
    fn kind(&self) -> SchedulerKind {
        SchedulerKind::Interval
    }

    fn is_due(&self, _now: Duration, _last_tick: Option<Duration>, _interval: Duration) -> bool {
        true
    }

    fn schedule_next(
        &self,
        timers: &mut Timers,
        now: Duration,
        interval: Duration,
        task: Task,
    ) -> TimerId {
        timers.schedule_at(now + interval, task)
    }
}

/// Selectable scheduling discipline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerKind {
    Refresh,
    Interval,
}

impl SchedulerKind {
    pub fn discipline(self, refresh_hz: f32) -> Box<dyn Discipline> {
        match self {
            SchedulerKind::Refresh => Box::new(RefreshThrottled::new(refresh_hz)),
            SchedulerKind::Interval => Box::new(FixedInterval),
        }
    }

    pub fn toggled(self) -> Self {
        match self {
            SchedulerKind::Refresh => SchedulerKind::Interval,
            SchedulerKind::Interval => SchedulerKind::Refresh,
        }
    }
}

impl fmt::Display for SchedulerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            SchedulerKind::Refresh => "refresh",
            SchedulerKind::Interval => "interval",
        })
    }
}

impl FromStr for SchedulerKind {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "refresh" | "raf" | "vsync" => Ok(SchedulerKind::Refresh),
            "interval" | "timeout" | "fixed" => Ok(SchedulerKind::Interval),
            _ => Err(()),
        }
    }
}

/// Scheduler bookkeeping. `active == false` ends the chain at its next tick.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScheduleState {
    pub cadence_hz: f32,
    pub last_tick: Option<Duration>,
    pub active: bool,
}

/// What a firing tick opportunity should do.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Execute the pipeline
    Run,
    /// Too early; the opportunity only re-arms
    Skip,
    /// The chain has been stopped
    Stopped,
    /// Opportunity from a chain that has since been replaced
    Stale,
}

/// Owner of the single frame tick chain.
pub struct FrameScheduler {
    state: ScheduleState,
    discipline: Box<dyn Discipline>,
    pending: Option<TimerId>,
    chain: u64,
}

impl FrameScheduler {
    pub fn new(cadence_hz: f32, discipline: Box<dyn Discipline>) -> Self {
        Self {
            state: ScheduleState {
                cadence_hz: clamp_cadence(cadence_hz),
                last_tick: None,
                active: false,
            },
            discipline,
            pending: None,
            chain: 0,
        }
    }

    pub fn state(&self) -> &ScheduleState {
        &self.state
    }

    pub fn is_active(&self) -> bool {
        self.state.active
    }

    pub fn kind(&self) -> SchedulerKind {
        self.discipline.kind()
    }

    pub fn interval(&self) -> Duration {
        hz_to_period(self.state.cadence_hz)
    }

    /// Takes effect when the next opportunity is armed.
    pub fn set_cadence(&mut self, hz: f32) {
        self.state.cadence_hz = clamp_cadence(hz);
    }

    /// Swaps the discipline; a running chain is restarted under the new one.
    pub fn set_discipline(&mut self, discipline: Box<dyn Discipline>, timers: &mut Timers, now: Duration) {
        self.discipline = discipline;
        if self.state.active {
            self.start(timers, now);
        }
    }

    /// Starts a fresh tick chain, cancelling any pending tick first.
    pub fn start(&mut self, timers: &mut Timers, now: Duration) {
        self.cancel_pending(timers);
        self.chain += 1;
        self.state.active = true;
        self.state.last_tick = None;
        self.arm(timers, now);
        tracing::debug!(
            chain = self.chain,
            discipline = %self.discipline.kind(),
            cadence_hz = self.state.cadence_hz,
            "tick chain started"
        );
    }

    pub fn stop(&mut self, timers: &mut Timers) {
        self.state.active = false;
        self.cancel_pending(timers);
    }

    /// Called when a [`Task::Tick`] fires.
    pub fn begin_tick(&mut self, chain: u64, now: Duration) -> TickOutcome {
        if chain != self.chain {
            return TickOutcome::Stale;
        }
        self.pending = None;
        if !self.state.active {
            return TickOutcome::Stopped;
        }
        let interval = self.interval();
        if self.discipline.is_due(now, self.state.last_tick, interval) {
            self.state.last_tick = Some(now);
            TickOutcome::Run
        } else {
            TickOutcome::Skip
        }
    }

    /// Re-arms the chain after a tick; `now` is read after the work is done.
    pub fn finish_tick(&mut self, timers: &mut Timers, now: Duration) {
        if self.state.active && self.pending.is_none() {
            self.arm(timers, now);
        }
    }

    fn arm(&mut self, timers: &mut Timers, now: Duration) {
        let task = Task::Tick { chain: self.chain };
        let id = self.discipline.schedule_next(timers, now, self.interval(), task);
        self.pending = Some(id);
    }

    fn cancel_pending(&mut self, timers: &mut Timers) {
        if let Some(id) = self.pending.take() {
            timers.cancel(id);
        }
    }
}

fn clamp_cadence(hz: f32) -> f32 {
    if hz.is_finite() {
        hz.clamp(MIN_CADENCE_HZ, MAX_CADENCE_HZ)
    } else {
        MIN_CADENCE_HZ
    }
}

fn hz_to_period(hz: f32) -> Duration {
    Duration::from_secs_f64(1.0 / hz as f64)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ms(n: u64) -> Duration {
        Duration::from_millis(n)
    }

    /// Drives a scheduler with no pipeline attached, returning run times.
    fn drive(sched: &mut FrameScheduler, timers: &mut Timers, end: Duration) -> Vec<Duration> {
        let mut runs = Vec::new();
        while let Some(at) = timers.next_deadline() {
            if at > end {
                break;
            }
            let (_, task) = timers.pop_due(at).unwrap();
            if let Task::Tick { chain } = task {
                if sched.begin_tick(chain, at) == TickOutcome::Run {
                    runs.push(at);
                }
                sched.finish_tick(timers, at);
            }
        }
        runs
    }

    #[test]
    fn timers_fire_in_deadline_order() {
        let mut timers = Timers::new();
        timers.schedule_at(ms(30), Task::ResizeSettled);
        timers.schedule_at(ms(10), Task::PresetAdvance);
        assert_eq!(timers.pop_due(ms(5)), None);
        let (_, first) = timers.pop_due(ms(40)).unwrap();
        assert_eq!(first, Task::PresetAdvance);
        let (_, second) = timers.pop_due(ms(40)).unwrap();
        assert_eq!(second, Task::ResizeSettled);
        assert!(timers.is_empty());
    }

    #[test]
    fn cancelled_timers_never_fire() {
        let mut timers = Timers::new();
        let id = timers.schedule_at(ms(10), Task::ResizeSettled);
        timers.schedule_at(ms(20), Task::PresetAdvance);
        assert!(timers.cancel(id));
        assert!(!timers.cancel(id));
        assert_eq!(timers.next_deadline(), Some(ms(20)));
        let (_, task) = timers.pop_due(ms(100)).unwrap();
        assert_eq!(task, Task::PresetAdvance);
    }

    #[test]
    fn fixed_interval_ticks_every_period() {
        let mut timers = Timers::new();
        let mut sched = FrameScheduler::new(10.0, Box::new(FixedInterval));
        sched.start(&mut timers, ms(0));
        let runs = drive(&mut sched, &mut timers, ms(350));
        assert_eq!(runs, vec![ms(100), ms(200), ms(300)]);
    }

    #[test]
    fn throttled_skips_until_interval_elapsed() {
        let mut timers = Timers::new();
        let mut sched = FrameScheduler::new(10.0, Box::new(RefreshThrottled::new(50.0)));
        sched.start(&mut timers, ms(0));
        let runs = drive(&mut sched, &mut timers, ms(420));
        // refresh every 20ms; first opportunity runs, then every 100ms
        assert_eq!(runs, vec![ms(20), ms(120), ms(220), ms(320), ms(420)]);
    }

    #[test]
    fn restart_keeps_a_single_chain() {
        let mut timers = Timers::new();
        let mut sched = FrameScheduler::new(10.0, Box::new(FixedInterval));
        sched.start(&mut timers, ms(0));
        sched.start(&mut timers, ms(5));
        sched.start(&mut timers, ms(7));
        assert_eq!(timers.count(|t| matches!(t, Task::Tick { .. })), 1);
        let runs = drive(&mut sched, &mut timers, ms(250));
        assert_eq!(runs, vec![ms(107), ms(207)]);
    }

    #[test]
    fn stop_ends_the_chain() {
        let mut timers = Timers::new();
        let mut sched = FrameScheduler::new(10.0, Box::new(FixedInterval));
        sched.start(&mut timers, ms(0));
        sched.stop(&mut timers);
        assert!(!sched.is_active());
        assert!(timers.is_empty());
        assert!(drive(&mut sched, &mut timers, ms(1000)).is_empty());
    }

    #[test]
    fn stale_chain_is_rejected() {
        let mut sched = FrameScheduler::new(10.0, Box::new(FixedInterval));
        let mut timers = Timers::new();
        sched.start(&mut timers, ms(0));
        sched.start(&mut timers, ms(0));
        assert_eq!(sched.begin_tick(1, ms(100)), TickOutcome::Stale);
        assert_eq!(sched.begin_tick(2, ms(100)), TickOutcome::Run);
    }

    #[test]
    fn cadence_is_clamped() {
        let mut sched = FrameScheduler::new(500.0, Box::new(FixedInterval));
        assert_eq!(sched.state().cadence_hz, MAX_CADENCE_HZ);
        sched.set_cadence(0.0);
        assert_eq!(sched.state().cadence_hz, MIN_CADENCE_HZ);
        sched.set_cadence(f32::NAN);
        assert_eq!(sched.state().cadence_hz, MIN_CADENCE_HZ);
    }

    #[test]
    fn scheduler_kind_parses() {
        assert_eq!("refresh".parse(), Ok(SchedulerKind::Refresh));
        assert_eq!("Interval".parse(), Ok(SchedulerKind::Interval));
        assert!("sometimes".parse::<SchedulerKind>().is_err());
        assert_eq!(SchedulerKind::Refresh.toggled(), SchedulerKind::Interval);
    }

    #[test]
    fn manual_clock_clones_share_time() {
        let clock = ManualClock::new();
        let other = clock.clone();
        clock.advance(ms(15));
        assert_eq!(other.now(), ms(15));
        other.set(ms(3));
        assert_eq!(clock.now(), ms(3));
    }
}
