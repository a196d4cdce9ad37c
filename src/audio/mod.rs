//! Audio taps: live sources of byte snapshots for the visualizer.

pub mod analysis;
pub mod capture;
pub mod synthetic;

pub use analysis::{AnalysisMode, Analyser};
pub use capture::{AcquireStatus, AudioSource, CaptureTap};
pub use synthetic::SyntheticTap;

/// A continuously updating source of analyser output.
///
/// Reads never block: they return whatever the latest snapshot is.
pub trait AudioTap {
    /// Current analysis window (FFT size), a power of two.
    fn window_size(&self) -> usize;

    /// Changes the analysis window without restarting capture.
    fn set_window_size(&mut self, fft_size: usize);

    fn set_gain(&mut self, gain: f32);

    /// Byte value this tap produces for silence.
    fn baseline(&self) -> u8;

    /// Replaces `out` with the latest `window_size() / 2` byte values.
    fn read(&mut self, out: &mut Vec<u8>);

    /// Releases the underlying device, if any. Later reads return silence.
    fn suspend(&mut self) {}
}
