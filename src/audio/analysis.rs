//! Conversion of float samples into analyser bytes.
//!
//! Two conventions, matching what a browser analyser node exposes:
//! waveform bytes centre on 128, spectrum bytes are decibels scaled onto
//! 0-255 with silence at 0.

use std::fmt;
use std::str::FromStr;

use spectrum_analyzer::scaling::divide_by_N;
use spectrum_analyzer::windows::hann_window;
use spectrum_analyzer::{samples_fft_to_spectrum, FrequencyLimit};

use crate::engine::extractor::SILENCE_BASELINE;
use crate::engine::sizing::{MAX_FFT_SIZE, MIN_FFT_SIZE};

/// Decibel level mapped to byte 0 in spectrum mode
pub const MIN_DECIBELS: f32 = -100.0;
/// Decibel level mapped to byte 255 in spectrum mode
pub const MAX_DECIBELS: f32 = -30.0;
/// Default capture rate when a device does not report one
pub const DEFAULT_SAMPLE_RATE: u32 = 44_100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisMode {
    /// Time-domain samples
    Waveform,
    /// Frequency magnitudes
    Spectrum,
}

impl AnalysisMode {
    pub fn baseline(self) -> u8 {
        match self {
            AnalysisMode::Waveform => SILENCE_BASELINE,
            AnalysisMode::Spectrum => 0,
        }
    }
}

impl fmt::Display for AnalysisMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            AnalysisMode::Waveform => "waveform",
            AnalysisMode::Spectrum => "spectrum",
        })
    }
}

impl FromStr for AnalysisMode {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "waveform" | "time" => Ok(AnalysisMode::Waveform),
            "spectrum" | "frequency" => Ok(AnalysisMode::Spectrum),
            _ => Err(()),
        }
    }
}

/// Gain stage plus byte conversion for one window size.
#[derive(Debug, Clone)]
pub struct Analyser {
    mode: AnalysisMode,
    fft_size: usize,
    gain: f32,
    sample_rate: u32,
    scratch: Vec<f32>,
}

impl Analyser {
    pub fn new(mode: AnalysisMode, fft_size: usize, gain: f32, sample_rate: u32) -> Self {
        Self {
            mode,
            fft_size: clamp_window(fft_size),
            gain: sanitize_gain(gain),
            sample_rate: sample_rate.max(1),
            scratch: Vec::new(),
        }
    }

    pub fn mode(&self) -> AnalysisMode {
        self.mode
    }

    pub fn fft_size(&self) -> usize {
        self.fft_size
    }

    pub fn bin_count(&self) -> usize {
        self.fft_size / 2
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn set_fft_size(&mut self, fft_size: usize) {
        self.fft_size = clamp_window(fft_size);
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.gain = sanitize_gain(gain);
    }

    /// Converts the most recent `fft_size` samples into `bin_count` bytes.
    ///
    /// Shorter input is treated as preceded by silence.
    pub fn analyse(&mut self, samples: &[f32], out: &mut Vec<u8>) {
        let n = self.fft_size;
        self.scratch.clear();
        self.scratch.resize(n.saturating_sub(samples.len()), 0.0);
        let recent = &samples[samples.len().saturating_sub(n)..];
        let gain = self.gain;
        self.scratch
            .extend(recent.iter().map(|&s| if s.is_finite() { s * gain } else { 0.0 }));

        match self.mode {
            AnalysisMode::Waveform => waveform_bytes(&self.scratch[n / 2..], out),
            AnalysisMode::Spectrum => spectrum_bytes(&self.scratch, self.sample_rate, n / 2, out),
        }
    }
}

/// `128 + 128 * s`, clamped.
pub fn waveform_bytes(samples: &[f32], out: &mut Vec<u8>) {
    out.clear();
    out.extend(
        samples
            .iter()
            .map(|&s| (128.0 + s * 128.0).round().clamp(0.0, 255.0) as u8),
    );
}

/// Hann-windowed magnitude spectrum in decibels, resampled to `bins` bytes.
pub fn spectrum_bytes(samples: &[f32], sample_rate: u32, bins: usize, out: &mut Vec<u8>) {
    out.clear();
    let windowed = hann_window(samples);
    let spectrum = match samples_fft_to_spectrum(
        &windowed,
        sample_rate,
        FrequencyLimit::All,
        Some(&divide_by_N),
    ) {
        Ok(s) => s,
        Err(err) => {
            tracing::trace!(?err, "spectrum unavailable, reporting silence");
            out.resize(bins, 0);
            return;
        }
    };

    let data = spectrum.data();
    if data.is_empty() {
        out.resize(bins, 0);
        return;
    }
    let span = MAX_DECIBELS - MIN_DECIBELS;
    for bin in 0..bins {
        let idx = (bin * data.len() / bins.max(1)).min(data.len() - 1);
        let magnitude = data[idx].1.val().max(1e-10);
        let db = 20.0 * magnitude.log10();
        let scaled = (db - MIN_DECIBELS) / span * 255.0;
        out.push(scaled.clamp(0.0, 255.0) as u8);
    }
}

fn clamp_window(fft_size: usize) -> usize {
    fft_size
        .clamp(MIN_FFT_SIZE, MAX_FFT_SIZE)
        .next_power_of_two()
        .min(MAX_FFT_SIZE)
}

fn sanitize_gain(gain: f32) -> f32 {
    if gain.is_finite() && gain > 0.0 {
        gain
    } else {
        1.0
    }
}
