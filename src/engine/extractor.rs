//! Excitation extraction and the adaptive noise floor.
//!
//! Every tick the extractor measures how far the loudest sample of the
//! snapshot strays from the silence baseline. Once per sampling round that
//! peak is pushed into a fixed-length [`ThresholdHistory`], and the
//! threshold used for mapping is derived from the history:
//!
//! ```text
//! threshold = ceil(stat(history) / damping)
//! ```
//!
//! Rounds are counted in ticks so a scheduler running faster than the round
//! cadence does not over-weight the history.

use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;

/// Byte value of a silent waveform sample
pub const SILENCE_BASELINE: u8 = 128;
/// Rounds remembered by the noise floor
pub const DEFAULT_HISTORY_LEN: usize = 10;
/// Thresholds at or below this are treated as background jitter
pub const SUPPRESS_THRESHOLD: u32 = 2;

/// Largest absolute distance of any sample from `baseline`.
pub fn peak_deviation(buffer: &[u8], baseline: u8) -> u8 {
    buffer
        .iter()
        .map(|&v| v.abs_diff(baseline))
        .max()
        .unwrap_or(0)
}

/// Fixed-length ring of recent per-round peaks, zero-filled at creation.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdHistory {
    values: VecDeque<u8>,
}

impl ThresholdHistory {
    pub fn new(len: usize) -> Self {
        let len = len.max(1);
        Self {
            values: std::iter::repeat(0).take(len).collect(),
        }
    }

    /// Evicts the oldest entry and appends `peak`.
    pub fn push(&mut self, peak: u8) {
        self.values.pop_front();
        self.values.push_back(peak);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn max(&self) -> u8 {
        self.values.iter().copied().max().unwrap_or(0)
    }

    /// Nearest-rank percentile (0-100) of the stored peaks.
    pub fn percentile(&self, pct: u8) -> u8 {
        let mut sorted: Vec<u8> = self.values.iter().copied().collect();
        sorted.sort_unstable();
        let pct = pct.min(100) as usize;
        let rank = (pct * sorted.len()).div_ceil(100).max(1);
        sorted[rank - 1]
    }

    /// Oldest first.
    pub fn iter(&self) -> impl Iterator<Item = u8> + '_ {
        self.values.iter().copied()
    }
}

/// Statistic of the history the threshold is derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThresholdStat {
    Max,
    Percentile(u8),
}

impl ThresholdStat {
    fn apply(self, history: &ThresholdHistory) -> u8 {
        match self {
            ThresholdStat::Max => history.max(),
            ThresholdStat::Percentile(p) => history.percentile(p),
        }
    }
}

impl fmt::Display for ThresholdStat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThresholdStat::Max => f.write_str("max"),
            ThresholdStat::Percentile(p) => write!(f, "p{}", p),
        }
    }
}

impl FromStr for ThresholdStat {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_ascii_lowercase();
        if s == "max" {
            return Ok(ThresholdStat::Max);
        }
        let pct: u8 = s.strip_prefix('p').ok_or(())?.parse().map_err(|_| ())?;
        if pct > 100 {
            return Err(());
        }
        Ok(ThresholdStat::Percentile(pct))
    }
}

/// Tunables for [`ExcitationExtractor`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExtractorOptions {
    pub baseline: u8,
    pub history_len: usize,
    pub damping: f32,
    pub stat: ThresholdStat,
    /// Ticks per sampling round; 1 updates the history every tick
    pub ticks_per_round: u32,
}

impl Default for ExtractorOptions {
    fn default() -> Self {
        Self {
            baseline: SILENCE_BASELINE,
            history_len: DEFAULT_HISTORY_LEN,
            damping: 1.0,
            stat: ThresholdStat::Max,
            ticks_per_round: 1,
        }
    }
}

pub struct ExcitationExtractor {
    options: ExtractorOptions,
    history: ThresholdHistory,
    ticks: u64,
    last_peak: u8,
    threshold: u32,
}

impl ExcitationExtractor {
    pub fn new(options: ExtractorOptions) -> Self {
        Self {
            history: ThresholdHistory::new(options.history_len),
            options,
            ticks: 0,
            last_peak: 0,
            threshold: 0,
        }
    }

    /// Measures one snapshot and returns its peak deviation.
    ///
    /// The history advances only on the first tick of each round; the
    /// threshold is re-derived every call.
    pub fn sample(&mut self, buffer: &[u8]) -> u8 {
        let peak = peak_deviation(buffer, self.options.baseline);
        let per_round = self.options.ticks_per_round.max(1) as u64;
        if self.ticks % per_round == 0 {
            self.history.push(peak);
        }
        self.ticks += 1;
        self.last_peak = peak;
        self.threshold = self.derive_threshold();
        peak
    }

    /// Current adaptive threshold.
    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    pub fn last_peak(&self) -> u8 {
        self.last_peak
    }

    pub fn history(&self) -> &ThresholdHistory {
        &self.history
    }

    pub fn options(&self) -> &ExtractorOptions {
        &self.options
    }

    pub fn baseline(&self) -> u8 {
        self.options.baseline
    }

    pub fn set_damping(&mut self, damping: f32) {
        self.options.damping = sanitize_damping(damping);
        self.threshold = self.derive_threshold();
    }

    /// Changing the baseline (analysis mode switch) starts a fresh history.
    pub fn set_baseline(&mut self, baseline: u8) {
        if baseline != self.options.baseline {
            self.options.baseline = baseline;
            self.history = ThresholdHistory::new(self.options.history_len);
            self.threshold = 0;
        }
    }

    pub fn set_ticks_per_round(&mut self, ticks: u32) {
        self.options.ticks_per_round = ticks.max(1);
    }

    fn derive_threshold(&self) -> u32 {
        let stat = self.options.stat.apply(&self.history) as f32;
        (stat / sanitize_damping(self.options.damping)).ceil() as u32
    }
}

fn sanitize_damping(damping: f32) -> f32 {
    if damping.is_finite() && damping > 0.0 {
        damping
    } else {
        1.0
    }
}

/// Ticks in one round of `round_ms` at `cadence_hz`, at least one.
pub fn ticks_per_round(cadence_hz: f32, round_ms: u64) -> u32 {
    let ticks = (cadence_hz as f64 * round_ms as f64 / 1000.0).round();
    if ticks.is_finite() && ticks >= 1.0 {
        ticks as u32
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn silence_has_no_deviation() {
        assert_eq!(peak_deviation(&[128; 512], SILENCE_BASELINE), 0);
        assert_eq!(peak_deviation(&[], SILENCE_BASELINE), 0);
    }

    #[test]
    fn deviation_is_symmetric() {
        assert_eq!(peak_deviation(&[128, 100, 150], SILENCE_BASELINE), 28);
        assert_eq!(peak_deviation(&[0, 128], SILENCE_BASELINE), 128);
        assert_eq!(peak_deviation(&[255], SILENCE_BASELINE), 127);
    }

    #[test]
    fn history_starts_zero_filled() {
        let history = ThresholdHistory::new(10);
        assert_eq!(history.len(), 10);
        assert!(history.iter().all(|v| v == 0));
    }

    #[test]
    fn history_evicts_oldest() {
        let mut history = ThresholdHistory::new(3);
        for v in [5, 9, 7, 2] {
            history.push(v);
        }
        assert_eq!(history.iter().collect::<Vec<_>>(), vec![9, 7, 2]);
        assert_eq!(history.max(), 9);
    }

    #[test]
    fn percentile_uses_nearest_rank() {
        let mut history = ThresholdHistory::new(4);
        for v in [40, 10, 30, 20] {
            history.push(v);
        }
        assert_eq!(history.percentile(50), 20);
        assert_eq!(history.percentile(75), 30);
        assert_eq!(history.percentile(100), 40);
        assert_eq!(history.percentile(0), 10);
    }

    #[test]
    fn threshold_divides_by_damping_and_rounds_up() {
        let mut ex = ExcitationExtractor::new(ExtractorOptions {
            damping: 4.0,
            ..Default::default()
        });
        let mut buf = vec![128u8; 64];
        buf[3] = 128 + 45;
        assert_eq!(ex.sample(&buf), 45);
        assert_eq!(ex.threshold(), 12);
        ex.set_damping(2.0);
        assert_eq!(ex.threshold(), 23);
    }

    #[test]
    fn history_only_advances_once_per_round() {
        let mut ex = ExcitationExtractor::new(ExtractorOptions {
            ticks_per_round: 3,
            ..Default::default()
        });
        let mut loud = vec![128u8; 8];
        loud[0] = 228;
        ex.sample(&loud);
        ex.sample(&[128; 8]);
        ex.sample(&[128; 8]);
        assert_eq!(ex.history().iter().filter(|&v| v != 0).count(), 1);
        ex.sample(&[128; 8]);
        assert_eq!(ex.history().iter().last(), Some(0));
        assert_eq!(ex.threshold(), 100);
    }

    #[test]
    fn threshold_decays_after_silence() {
        let mut ex = ExcitationExtractor::new(ExtractorOptions {
            history_len: 3,
            ..Default::default()
        });
        let mut loud = vec![128u8; 8];
        loud[1] = 10;
        ex.sample(&loud);
        assert_eq!(ex.threshold(), 118);
        for _ in 0..3 {
            ex.sample(&[128; 8]);
        }
        assert_eq!(ex.threshold(), 0);
    }

    #[test]
    fn invalid_damping_falls_back_to_one() {
        let mut ex = ExcitationExtractor::new(ExtractorOptions::default());
        ex.set_damping(0.0);
        assert_eq!(ex.options().damping, 1.0);
        ex.set_damping(f32::INFINITY);
        assert_eq!(ex.options().damping, 1.0);
    }

    #[test]
    fn baseline_change_resets_history() {
        let mut ex = ExcitationExtractor::new(ExtractorOptions::default());
        ex.sample(&[0, 255]);
        assert!(ex.threshold() > 0);
        ex.set_baseline(0);
        assert_eq!(ex.threshold(), 0);
        assert_eq!(ex.history().max(), 0);
    }

    #[test]
    fn ticks_per_round_follows_cadence() {
        assert_eq!(ticks_per_round(10.0, 1000), 10);
        assert_eq!(ticks_per_round(30.0, 500), 15);
        assert_eq!(ticks_per_round(10.0, 0), 1);
        assert_eq!(ticks_per_round(1.0, 100), 1);
    }

    #[test]
    fn threshold_stat_parses() {
        assert_eq!("max".parse(), Ok(ThresholdStat::Max));
        assert_eq!("p90".parse(), Ok(ThresholdStat::Percentile(90)));
        assert!("p101".parse::<ThresholdStat>().is_err());
        assert!("median".parse::<ThresholdStat>().is_err());
        assert_eq!(ThresholdStat::Percentile(75).to_string(), "p75");
    }

    proptest! {
        #[test]
        fn history_length_is_fixed(len in 1usize..32, pushes in proptest::collection::vec(any::<u8>(), 0..100)) {
            let mut history = ThresholdHistory::new(len);
            for p in pushes {
                history.push(p);
                prop_assert_eq!(history.len(), len);
            }
            prop_assert_eq!(history.len(), len);
        }

        #[test]
        fn uniform_silence_never_deviates(len in 1usize..4096) {
            let buf = vec![SILENCE_BASELINE; len];
            prop_assert_eq!(peak_deviation(&buf, SILENCE_BASELINE), 0);
        }
    }
}
