//! Seeded stand-in for a microphone.
//!
//! Produces bursts of decaying sine partials so the grid can be exercised
//! without any audio hardware. Time advances by one analysis window per
//! read, independent of the wall clock.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::analysis::{AnalysisMode, Analyser, DEFAULT_SAMPLE_RATE};
use super::AudioTap;
use crate::engine::sizing::MIN_FFT_SIZE;

/// Voices sounding at once, at most
const MAX_VOICES: usize = 6;
/// Chance per read that a new burst starts
const BURST_CHANCE: f64 = 0.35;

#[derive(Debug, Clone)]
struct Voice {
    freq: f32,
    amp: f32,
    /// Amplitude multiplier per sample
    decay: f32,
    phase: f32,
}

pub struct SyntheticTap {
    rng: StdRng,
    voices: Vec<Voice>,
    analyser: Analyser,
    samples: Vec<f32>,
    suspended: bool,
}

impl SyntheticTap {
    pub fn new(seed: u64, mode: AnalysisMode, gain: f32) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
            voices: Vec::with_capacity(MAX_VOICES),
            analyser: Analyser::new(mode, MIN_FFT_SIZE, gain, DEFAULT_SAMPLE_RATE),
            samples: Vec::new(),
            suspended: false,
        }
    }

    fn maybe_spawn(&mut self) {
        if self.voices.len() >= MAX_VOICES || !self.rng.gen_bool(BURST_CHANCE) {
            return;
        }
        let partials = self.rng.gen_range(1..=3);
        let root = self.rng.gen_range(60.0..900.0f32);
        let amp = self.rng.gen_range(0.01..0.08f32);
        // 40-400ms half-life
        let half_life = self.rng.gen_range(0.04..0.4f32) * DEFAULT_SAMPLE_RATE as f32;
        let decay = 0.5f32.powf(1.0 / half_life);
        for k in 1..=partials {
            if self.voices.len() >= MAX_VOICES {
                break;
            }
            self.voices.push(Voice {
                freq: root * k as f32,
                amp: amp / k as f32,
                decay,
                phase: 0.0,
            });
        }
    }

    fn render(&mut self, n: usize) {
        let step = std::f32::consts::TAU / DEFAULT_SAMPLE_RATE as f32;
        self.samples.clear();
        self.samples.resize(n, 0.0);
        for voice in &mut self.voices {
            let inc = voice.freq * step;
            for s in self.samples.iter_mut() {
                *s += voice.phase.sin() * voice.amp;
                voice.phase = (voice.phase + inc) % std::f32::consts::TAU;
                voice.amp *= voice.decay;
            }
        }
        self.voices.retain(|v| v.amp > 1e-4);
    }
}

impl AudioTap for SyntheticTap {
    fn window_size(&self) -> usize {
        self.analyser.fft_size()
    }

    fn set_window_size(&mut self, fft_size: usize) {
        self.analyser.set_fft_size(fft_size);
    }

    fn set_gain(&mut self, gain: f32) {
        self.analyser.set_gain(gain);
    }

    fn baseline(&self) -> u8 {
        self.analyser.mode().baseline()
    }

    fn read(&mut self, out: &mut Vec<u8>) {
        if self.suspended {
            out.clear();
            out.resize(self.analyser.fft_size() / 2, self.baseline());
            return;
        }
        self.maybe_spawn();
        let n = self.analyser.fft_size();
        self.render(n);
        self.analyser.analyse(&self.samples, out);
    }

    fn suspend(&mut self) {
        self.suspended = true;
        self.voices.clear();
    }
}
