//! Microphone capture through cpal.
//!
//! Acquisition is asynchronous: the slow part (negotiating the device's
//! input config, which can hang on a bad device) runs on a helper thread and
//! reports back through a channel that the event loop polls. Only one
//! acquisition can be in flight; asking again while one is pending is a
//! no-op.

use std::fs::File;
use std::os::unix::io::AsRawFd;
use std::sync::mpsc::{self, Receiver, TryRecvError};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, FromSample, Sample, SampleFormat, SizedSample, Stream, StreamConfig, SupportedStreamConfig};

use super::analysis::{AnalysisMode, Analyser};
use super::AudioTap;
use crate::engine::sizing::MAX_FFT_SIZE;
use crate::error::{Result, VizError};

/// How long device config negotiation may take before acquisition fails
pub const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(2);

/// Mono ring of the most recent captured samples.
pub struct SampleRing {
    samples: Vec<f32>,
    write_pos: usize,
}

impl SampleRing {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: vec![0.0; capacity.max(1)],
            write_pos: 0,
        }
    }

    pub fn push(&mut self, sample: f32) {
        self.samples[self.write_pos] = sample;
        self.write_pos = (self.write_pos + 1) % self.samples.len();
    }

    /// Copies the newest `n` samples into `out`, oldest first.
    pub fn copy_latest(&self, n: usize, out: &mut Vec<f32>) {
        let cap = self.samples.len();
        let n = n.min(cap);
        out.clear();
        let start = (self.write_pos + cap - n) % cap;
        for i in 0..n {
            out.push(self.samples[(start + i) % cap]);
        }
    }

    pub fn clear(&mut self) {
        self.samples.iter_mut().for_each(|s| *s = 0.0);
    }
}

/// RAII guard that points stderr at /dev/null while ALSA enumerates
/// devices, so its diagnostics cannot scribble over the terminal.
struct StderrSuppressor {
    saved_fd: i32,
    _dev_null: File,
}

impl StderrSuppressor {
    fn new() -> Option<Self> {
        let dev_null = File::open("/dev/null").ok()?;
        let saved_fd = unsafe { libc::dup(2) };
        if saved_fd < 0 {
            return None;
        }
        if unsafe { libc::dup2(dev_null.as_raw_fd(), 2) } < 0 {
            unsafe {
                libc::close(saved_fd);
            }
            return None;
        }
        Some(Self {
            saved_fd,
            _dev_null: dev_null,
        })
    }
}

impl Drop for StderrSuppressor {
    fn drop(&mut self) {
        unsafe {
            libc::dup2(self.saved_fd, 2);
            libc::close(self.saved_fd);
        }
    }
}

/// What the helper thread hands back: a device and its input config.
struct Negotiated {
    device: Device,
    name: String,
    config: SupportedStreamConfig,
}

type Negotiation = std::result::Result<Negotiated, String>;

/// Finds the default input device and asks it for its input config.
/// Runs on the helper thread; either step can stall on a bad device.
fn negotiate_default_input() -> Negotiation {
    let host = cpal::default_host();
    tracing::info!(host = ?host.id(), "acquiring audio input");
    let device = host
        .default_input_device()
        .ok_or_else(|| "no audio input device found".to_string())?;
    let name = device.name().unwrap_or_else(|_| "unknown".to_string());
    let config = device
        .default_input_config()
        .map_err(|e| format!("no supported input config: {}", e))?;
    Ok(Negotiated { device, name, config })
}

struct PendingAcquisition {
    rx: Receiver<Negotiation>,
    deadline: Instant,
    /// Held until the acquisition resolves one way or the other
    _quiet: Option<StderrSuppressor>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AcquireStatus {
    Started,
    AlreadyPending,
}

/// The audio acquisition collaborator.
pub struct AudioSource {
    pending: Option<PendingAcquisition>,
    negotiate: fn() -> Negotiation,
    quiet_stderr: bool,
    attempts: u32,
    mode: AnalysisMode,
    gain: f32,
}

impl AudioSource {
    pub fn new(mode: AnalysisMode, gain: f32) -> Self {
        Self {
            pending: None,
            negotiate: negotiate_default_input,
            quiet_stderr: true,
            attempts: 0,
            mode,
            gain,
        }
    }

    pub fn is_pending(&self) -> bool {
        self.pending.is_some()
    }

    /// Acquisitions actually started so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Begins acquiring the default input device. The outcome arrives
    /// through [`AudioSource::poll`].
    pub fn acquire(&mut self) -> Result<AcquireStatus> {
        if self.pending.is_some() {
            tracing::debug!("acquisition already pending, ignoring request");
            return Ok(AcquireStatus::AlreadyPending);
        }

        let quiet = if self.quiet_stderr {
            StderrSuppressor::new()
        } else {
            None
        };
        let (tx, rx) = mpsc::channel();
        let negotiate = self.negotiate;
        std::thread::Builder::new()
            .name("audio-probe".into())
            .spawn(move || {
                let _ = tx.send(negotiate());
            })?;

        self.attempts += 1;
        self.pending = Some(PendingAcquisition {
            rx,
            deadline: Instant::now() + ACQUIRE_TIMEOUT,
            _quiet: quiet,
        });
        Ok(AcquireStatus::Started)
    }

    /// Completes a pending acquisition if the helper has answered.
    ///
    /// Returns `None` while still waiting or when nothing is pending.
    pub fn poll(&mut self) -> Option<Result<CaptureTap>> {
        let pending = self.pending.as_ref()?;
        let negotiated = match pending.rx.try_recv() {
            Ok(Ok(negotiated)) => negotiated,
            Ok(Err(msg)) => return self.fail(msg),
            Err(TryRecvError::Disconnected) => return self.fail("device probe ended unexpectedly".into()),
            Err(TryRecvError::Empty) => {
                if Instant::now() >= pending.deadline {
                    return self.fail(format!("device config timed out after {:?}", ACQUIRE_TIMEOUT));
                }
                return None;
            }
        };

        // stderr stays quiet until the stream is built
        let pending = self.pending.take()?;
        let tap = self.open(negotiated);
        drop(pending);
        Some(tap)
    }

    fn open(&self, negotiated: Negotiated) -> Result<CaptureTap> {
        let Negotiated { device, name, config: supported } = negotiated;
        let sample_rate = supported.sample_rate().0;
        let format = supported.sample_format();
        let config: StreamConfig = supported.into();
        if config.channels == 0 {
            return Err(VizError::PermissionDenied("device reported 0 channels".into()));
        }
        tracing::info!(
            device = %name,
            sample_rate,
            channels = config.channels,
            ?format,
            "opening input stream"
        );

        let ring = Arc::new(Mutex::new(SampleRing::new(MAX_FFT_SIZE)));
        let stream = match format {
            SampleFormat::F32 => build_stream::<f32>(&device, &config, Arc::clone(&ring)),
            SampleFormat::I16 => build_stream::<i16>(&device, &config, Arc::clone(&ring)),
            SampleFormat::U16 => build_stream::<u16>(&device, &config, Arc::clone(&ring)),
            SampleFormat::I32 => build_stream::<i32>(&device, &config, Arc::clone(&ring)),
            other => {
                return Err(VizError::PermissionDenied(format!(
                    "unsupported sample format {:?}",
                    other
                )))
            }
        }
        .map_err(|e| VizError::PermissionDenied(e.to_string()))?;

        stream
            .play()
            .map_err(|e| VizError::PermissionDenied(format!("failed to start audio: {}", e)))?;

        Ok(CaptureTap {
            ring,
            analyser: Analyser::new(self.mode, crate::engine::sizing::MIN_FFT_SIZE, self.gain, sample_rate),
            scratch: Vec::with_capacity(MAX_FFT_SIZE),
            stream: Some(stream),
            device_name: name,
        })
    }

    fn fail(&mut self, msg: String) -> Option<Result<CaptureTap>> {
        self.pending = None;
        tracing::warn!(%msg, "audio acquisition failed");
        Some(Err(VizError::PermissionDenied(msg)))
    }
}

fn build_stream<T>(
    device: &Device,
    config: &StreamConfig,
    ring: Arc<Mutex<SampleRing>>,
) -> std::result::Result<Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    f32: FromSample<T>,
{
    let channels = config.channels as usize;
    device.build_input_stream(
        config,
        move |data: &[T], _: &cpal::InputCallbackInfo| {
            if let Ok(mut ring) = ring.lock() {
                for frame in data.chunks(channels) {
                    let sum: f32 = frame.iter().map(|&s| s.to_sample::<f32>()).sum();
                    ring.push(sum / frame.len() as f32);
                }
            }
        },
        |err| tracing::warn!(%err, "audio stream error"),
        None,
    )
}

/// Live microphone tap. The stream only writes; gain and analysis happen
/// on read.
pub struct CaptureTap {
    ring: Arc<Mutex<SampleRing>>,
    analyser: Analyser,
    scratch: Vec<f32>,
    stream: Option<Stream>,
    device_name: String,
}

impl CaptureTap {
    pub fn device_name(&self) -> &str {
        &self.device_name
    }
}

impl AudioTap for CaptureTap {
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
        match self.ring.lock() {
            Ok(ring) => ring.copy_latest(self.analyser.fft_size(), &mut self.scratch),
            Err(_) => self.scratch.clear(),
        }
        self.analyser.analyse(&self.scratch, out);
    }

    fn suspend(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.pause();
            tracing::info!(device = %self.device_name, "input stream released");
        }
        if let Ok(mut ring) = self.ring.lock() {
            ring.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ring_returns_latest_in_order() {
        let mut ring = SampleRing::new(4);
        for s in [1.0, 2.0, 3.0, 4.0, 5.0, 6.0] {
            ring.push(s);
        }
        let mut out = Vec::new();
        ring.copy_latest(3, &mut out);
        assert_eq!(out, vec![4.0, 5.0, 6.0]);
        ring.copy_latest(10, &mut out);
        assert_eq!(out, vec![3.0, 4.0, 5.0, 6.0]);
    }

    #[test]
    fn ring_clear_silences() {
        let mut ring = SampleRing::new(4);
        ring.push(0.5);
        ring.clear();
        let mut out = Vec::new();
        ring.copy_latest(4, &mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn fresh_source_has_nothing_pending() {
        let mut source = AudioSource::new(AnalysisMode::Waveform, 1.0);
        assert!(!source.is_pending());
        assert!(source.poll().is_none());
    }

    fn silent_device() -> Negotiation {
        std::thread::sleep(Duration::from_secs(3600));
        Err("never answered".into())
    }

    fn refusing_device() -> Negotiation {
        Err("permission denied by host".into())
    }

    fn source_with(negotiate: fn() -> Negotiation) -> AudioSource {
        AudioSource {
            negotiate,
            quiet_stderr: false,
            ..AudioSource::new(AnalysisMode::Waveform, 1.0)
        }
    }

    #[test]
    fn second_acquire_while_pending_starts_nothing() {
        let mut source = source_with(silent_device);
        assert_eq!(source.acquire().unwrap(), AcquireStatus::Started);
        assert_eq!(source.acquire().unwrap(), AcquireStatus::AlreadyPending);
        assert_eq!(source.acquire().unwrap(), AcquireStatus::AlreadyPending);
        assert_eq!(source.attempts(), 1);
        assert!(source.is_pending());
        assert!(source.poll().is_none());
    }

    #[test]
    fn stalled_negotiation_times_out_as_permission_denied() {
        let mut source = source_with(silent_device);
        source.acquire().unwrap();
        if let Some(pending) = source.pending.as_mut() {
            pending.deadline = Instant::now();
        }
        assert!(matches!(source.poll(), Some(Err(VizError::PermissionDenied(_)))));
        assert!(!source.is_pending());

        // a manual retry starts a fresh acquisition
        assert_eq!(source.acquire().unwrap(), AcquireStatus::Started);
        assert_eq!(source.attempts(), 2);
    }

    #[test]
    fn stderr_stays_quiet_until_acquisition_resolves() {
        let mut source = AudioSource {
            quiet_stderr: true,
            ..source_with(silent_device)
        };
        source.acquire().unwrap();
        let pending = source.pending.as_mut().unwrap();
        assert!(pending._quiet.is_some());
        pending.deadline = Instant::now();
        assert!(source.poll().is_some());
        assert!(source.pending.is_none());
    }

    #[test]
    fn refusal_surfaces_through_poll() {
        let mut source = source_with(refusing_device);
        source.acquire().unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        let outcome = loop {
            if let Some(outcome) = source.poll() {
                break outcome;
            }
            assert!(Instant::now() < deadline, "no answer from the helper");
            std::thread::sleep(Duration::from_millis(5));
        };
        match outcome {
            Err(VizError::PermissionDenied(msg)) => assert!(msg.contains("permission denied")),
            _ => panic!("expected a refusal"),
        }
        assert!(!source.is_pending());
    }
}
