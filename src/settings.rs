//! Persisted preferences.
//!
//! Stored as a flat TOML table of string values, one key per option. A
//! missing file or key means "use the default"; there is no schema version.
//! Typed option structs read from the table and write every field back.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::Deserialize;

use crate::audio::AnalysisMode;
use crate::engine::extractor::{ThresholdStat, DEFAULT_HISTORY_LEN};
use crate::engine::mapper::HueMapping;
use crate::engine::scheduler::{SchedulerKind, DEFAULT_REFRESH_HZ, MAX_CADENCE_HZ, MAX_REFRESH_HZ, MIN_CADENCE_HZ};
use crate::error::{Result, VizError};

/// Preference keys and their defaults, in display order.
pub const DEFAULTS: &[(&str, &str)] = &[
    ("frame_rate", "10"),
    ("cell_pitch", "8"),
    ("gain", "10"),
    ("threshold_damping", "1"),
    ("threshold_stat", "max"),
    ("history_length", "10"),
    ("history_round_ms", "1000"),
    ("decay_scale", "5"),
    ("hue_mapping", "ratio"),
    ("hue_range", "360"),
    ("scheduler", "interval"),
    ("refresh_hz", "60"),
    ("resize_debounce_ms", "50"),
    ("analysis", "waveform"),
    ("color_scheme", "8"),
    ("preset_frame_rate", "15"),
    ("mesh", "5"),
    ("preset_blend_secs", "1"),
    ("auto_advance_secs", "15"),
    ("auto_advance", "false"),
    ("randomize", "false"),
    ("preset_gain", "1.85"),
];

/// Longest crossfade between presets
pub const MAX_BLEND_SECS: f32 = 60.0;
/// Longest auto-advance period, one day
pub const MAX_AUTO_ADVANCE_SECS: u64 = 86_400;
/// Longest resize quiet period
pub const MAX_RESIZE_DEBOUNCE_MS: u64 = 10_000;

pub fn default_for(key: &str) -> Option<&'static str> {
    DEFAULTS.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

/// A value as found on disk. Hand-edited files may hold bare numbers or
/// booleans; everything is kept as a string.
#[derive(Deserialize)]
#[serde(untagged)]
enum StoredValue {
    Text(String),
    Other(toml::Value),
}

impl From<StoredValue> for String {
    fn from(value: StoredValue) -> Self {
        match value {
            StoredValue::Text(s) => s,
            StoredValue::Other(v) => v.to_string(),
        }
    }
}

/// Flat key to string store backed by a TOML file.
#[derive(Debug, Clone, PartialEq)]
pub struct Prefs {
    path: PathBuf,
    values: BTreeMap<String, String>,
}

impl Prefs {
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("ledgrid")
            .join("prefs.toml")
    }

    /// Empty store that will save to `path`.
    pub fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn load(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        if !path.exists() {
            return Ok(Self::empty(path));
        }
        let content = fs::read_to_string(&path)?;
        let table: BTreeMap<String, StoredValue> = toml::from_str(&content)?;
        let values = table.into_iter().map(|(k, v)| (k, v.into())).collect();
        Ok(Self { path, values })
    }

    /// Like [`Prefs::load`], but a broken file yields an empty store.
    pub fn load_or_default(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        match Self::load(&path) {
            Ok(prefs) => prefs,
            Err(err) => {
                tracing::warn!(path = %path.display(), %err, "prefs unreadable, using defaults");
                Self::empty(path)
            }
        }
    }

    pub fn save(&self) -> Result<()> {
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() {
                fs::create_dir_all(dir)?;
            }
        }
        let content = toml::to_string(&self.values)?;
        fs::write(&self.path, content)?;
        tracing::debug!(path = %self.path.display(), keys = self.values.len(), "prefs saved");
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(String::as_str)
    }

    pub fn set(&mut self, key: &str, value: impl Into<String>) {
        self.values.insert(key.to_string(), value.into());
    }

    /// Checks `value` against the key's type before storing it.
    pub fn set_checked(&mut self, key: &str, value: &str) -> Result<()> {
        validate(key, value)?;
        self.set(key, value.trim());
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.values.remove(key)
    }

    pub fn reset(&mut self) {
        self.values.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.values.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parsed value of `key`, or `default` when absent or unparsable.
    pub fn read<T: FromStr>(&self, key: &str, default: T) -> T {
        match self.get(key) {
            None => default,
            Some(raw) => match raw.trim().parse() {
                Ok(v) => v,
                Err(_) => {
                    tracing::warn!(key, value = raw, "ignoring unparsable pref");
                    default
                }
            },
        }
    }
}

/// Rejects unknown keys and values that do not parse as the key's type.
pub fn validate(key: &str, value: &str) -> Result<()> {
    let value = value.trim();
    let ok = match key {
        "frame_rate" | "gain" | "threshold_damping" | "decay_scale" | "hue_range" | "refresh_hz"
        | "preset_frame_rate" | "preset_blend_secs" | "preset_gain" => {
            value.parse::<f32>().map(|v| v.is_finite()).unwrap_or(false)
        }
        "cell_pitch" | "history_length" | "history_round_ms" | "resize_debounce_ms" | "mesh"
        | "auto_advance_secs" => value.parse::<u64>().is_ok(),
        "color_scheme" => value.parse::<u8>().is_ok(),
        "auto_advance" | "randomize" => value.parse::<bool>().is_ok(),
        "threshold_stat" => value.parse::<ThresholdStat>().is_ok(),
        "hue_mapping" => value.parse::<HueMapping>().is_ok(),
        "scheduler" => value.parse::<SchedulerKind>().is_ok(),
        "analysis" => value.parse::<AnalysisMode>().is_ok(),
        _ => false,
    };
    if ok {
        Ok(())
    } else {
        Err(VizError::InvalidOption {
            key: key.to_string(),
            value: value.to_string(),
        })
    }
}

fn positive_or(v: f32, default: f32) -> f32 {
    if v.is_finite() && v > 0.0 {
        v
    } else {
        default
    }
}

/// Options of the audio-reactive grid.
#[derive(Debug, Clone, PartialEq)]
pub struct VisualizerOptions {
    pub frame_rate: f32,
    pub cell_pitch: u32,
    pub gain: f32,
    pub threshold_damping: f32,
    pub threshold_stat: ThresholdStat,
    pub history_length: usize,
    pub history_round_ms: u64,
    pub decay_scale: f32,
    pub hue_mapping: HueMapping,
    pub hue_range: f32,
    pub scheduler: SchedulerKind,
    pub refresh_hz: f32,
    pub resize_debounce_ms: u64,
    pub analysis: AnalysisMode,
    pub color_scheme: u8,
}

impl Default for VisualizerOptions {
    fn default() -> Self {
        Self {
            frame_rate: 10.0,
            cell_pitch: 8,
            gain: 10.0,
            threshold_damping: 1.0,
            threshold_stat: ThresholdStat::Max,
            history_length: DEFAULT_HISTORY_LEN,
            history_round_ms: 1000,
            decay_scale: 5.0,
            hue_mapping: HueMapping::Ratio,
            hue_range: 360.0,
            scheduler: SchedulerKind::Interval,
            refresh_hz: DEFAULT_REFRESH_HZ,
            resize_debounce_ms: 50,
            analysis: AnalysisMode::Waveform,
            color_scheme: 8,
        }
    }
}

impl VisualizerOptions {
    pub fn from_prefs(prefs: &Prefs) -> Self {
        let d = Self::default();
        Self {
            frame_rate: prefs.read("frame_rate", d.frame_rate),
            cell_pitch: prefs.read("cell_pitch", d.cell_pitch),
            gain: prefs.read("gain", d.gain),
            threshold_damping: prefs.read("threshold_damping", d.threshold_damping),
            threshold_stat: prefs.read("threshold_stat", d.threshold_stat),
            history_length: prefs.read("history_length", d.history_length),
            history_round_ms: prefs.read("history_round_ms", d.history_round_ms),
            decay_scale: prefs.read("decay_scale", d.decay_scale),
            hue_mapping: prefs.read("hue_mapping", d.hue_mapping),
            hue_range: prefs.read("hue_range", d.hue_range),
            scheduler: prefs.read("scheduler", d.scheduler),
            refresh_hz: prefs.read("refresh_hz", d.refresh_hz),
            resize_debounce_ms: prefs.read("resize_debounce_ms", d.resize_debounce_ms),
            analysis: prefs.read("analysis", d.analysis),
            color_scheme: prefs.read("color_scheme", d.color_scheme),
        }
        .clamped()
    }

    /// Pulls every field into its accepted range.
    pub fn clamped(mut self) -> Self {
        let d = Self::default();
        self.frame_rate = if self.frame_rate.is_finite() {
            self.frame_rate.clamp(MIN_CADENCE_HZ, MAX_CADENCE_HZ)
        } else {
            d.frame_rate
        };
        self.cell_pitch = self.cell_pitch.max(1);
        self.gain = positive_or(self.gain, d.gain);
        self.threshold_damping = positive_or(self.threshold_damping, d.threshold_damping);
        self.history_length = self.history_length.max(1);
        self.decay_scale = positive_or(self.decay_scale, d.decay_scale);
        if !self.hue_range.is_finite() {
            self.hue_range = d.hue_range;
        }
        self.refresh_hz = positive_or(self.refresh_hz, d.refresh_hz).clamp(1.0, MAX_REFRESH_HZ);
        self.resize_debounce_ms = self.resize_debounce_ms.min(MAX_RESIZE_DEBOUNCE_MS);
        self.color_scheme = self.color_scheme.min(9);
        self
    }

    pub fn resize_debounce(&self) -> Duration {
        Duration::from_millis(self.resize_debounce_ms)
    }

    pub fn write_prefs(&self, prefs: &mut Prefs) {
        prefs.set("frame_rate", self.frame_rate.to_string());
        prefs.set("cell_pitch", self.cell_pitch.to_string());
        prefs.set("gain", self.gain.to_string());
        prefs.set("threshold_damping", self.threshold_damping.to_string());
        prefs.set("threshold_stat", self.threshold_stat.to_string());
        prefs.set("history_length", self.history_length.to_string());
        prefs.set("history_round_ms", self.history_round_ms.to_string());
        prefs.set("decay_scale", self.decay_scale.to_string());
        prefs.set("hue_mapping", self.hue_mapping.to_string());
        prefs.set("hue_range", self.hue_range.to_string());
        prefs.set("scheduler", self.scheduler.to_string());
        prefs.set("refresh_hz", self.refresh_hz.to_string());
        prefs.set("resize_debounce_ms", self.resize_debounce_ms.to_string());
        prefs.set("analysis", self.analysis.to_string());
        prefs.set("color_scheme", self.color_scheme.to_string());
    }
}

/// Options of the preset visualizer mode.
#[derive(Debug, Clone, PartialEq)]
pub struct PresetOptions {
    pub frame_rate: f32,
    pub mesh: usize,
    pub blend_secs: f32,
    pub auto_advance_secs: u64,
    pub auto_advance: bool,
    pub randomize: bool,
    pub gain: f32,
    pub refresh_hz: f32,
    pub color_scheme: u8,
}

impl Default for PresetOptions {
    fn default() -> Self {
        Self {
            frame_rate: 15.0,
            mesh: 5,
            blend_secs: 1.0,
            auto_advance_secs: 15,
            auto_advance: false,
            randomize: false,
            gain: 1.85,
            refresh_hz: DEFAULT_REFRESH_HZ,
            color_scheme: 8,
        }
    }
}

impl PresetOptions {
    pub fn from_prefs(prefs: &Prefs) -> Self {
        let d = Self::default();
        Self {
            frame_rate: prefs.read("preset_frame_rate", d.frame_rate),
            mesh: prefs.read("mesh", d.mesh),
            blend_secs: prefs.read("preset_blend_secs", d.blend_secs),
            auto_advance_secs: prefs.read("auto_advance_secs", d.auto_advance_secs),
            auto_advance: prefs.read("auto_advance", d.auto_advance),
            randomize: prefs.read("randomize", d.randomize),
            gain: prefs.read("preset_gain", d.gain),
            refresh_hz: prefs.read("refresh_hz", d.refresh_hz),
            color_scheme: prefs.read("color_scheme", d.color_scheme),
        }
        .clamped()
    }

    pub fn clamped(mut self) -> Self {
        let d = Self::default();
        self.frame_rate = if self.frame_rate.is_finite() {
            self.frame_rate.clamp(MIN_CADENCE_HZ, MAX_CADENCE_HZ)
        } else {
            d.frame_rate
        };
        self.mesh = self.mesh.min(crate::viz::presets::MESH_SIZES.len() - 1);
        self.blend_secs = if self.blend_secs.is_finite() {
            self.blend_secs.clamp(0.0, MAX_BLEND_SECS)
        } else {
            d.blend_secs
        };
        self.auto_advance_secs = self.auto_advance_secs.min(MAX_AUTO_ADVANCE_SECS);
        self.gain = positive_or(self.gain, d.gain);
        self.refresh_hz = positive_or(self.refresh_hz, d.refresh_hz).clamp(1.0, MAX_REFRESH_HZ);
        self.color_scheme = self.color_scheme.min(9);
        self
    }

    /// `None` when rotation is off.
    pub fn advance_period(&self) -> Option<Duration> {
        if self.auto_advance && self.auto_advance_secs > 0 {
            Some(Duration::from_secs(self.auto_advance_secs))
        } else {
            None
        }
    }

    pub fn write_prefs(&self, prefs: &mut Prefs) {
        prefs.set("preset_frame_rate", self.frame_rate.to_string());
        prefs.set("mesh", self.mesh.to_string());
        prefs.set("preset_blend_secs", self.blend_secs.to_string());
        prefs.set("auto_advance_secs", self.auto_advance_secs.to_string());
        prefs.set("auto_advance", self.auto_advance.to_string());
        prefs.set("randomize", self.randomize.to_string());
        prefs.set("preset_gain", self.gain.to_string());
        prefs.set("color_scheme", self.color_scheme.to_string());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_file_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let prefs = Prefs::load(dir.path().join("nope.toml")).unwrap();
        assert_eq!(prefs.iter().count(), 0);
        assert_eq!(VisualizerOptions::from_prefs(&prefs), VisualizerOptions::default());
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("prefs.toml");
        let mut prefs = Prefs::empty(&path);
        prefs.set("frame_rate", "30");
        prefs.set("scheduler", "refresh");
        prefs.save().unwrap();

        let loaded = Prefs::load(&path).unwrap();
        assert_eq!(loaded, prefs);
        let opts = VisualizerOptions::from_prefs(&loaded);
        assert_eq!(opts.frame_rate, 30.0);
        assert_eq!(opts.scheduler, SchedulerKind::Refresh);
    }

    #[test]
    fn non_string_values_are_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.toml");
        fs::write(&path, "cell_pitch = 12\nrandomize = true\n").unwrap();
        let prefs = Prefs::load(&path).unwrap();
        assert_eq!(prefs.get("cell_pitch"), Some("12"));
        assert!(PresetOptions::from_prefs(&prefs).randomize);
    }

    #[test]
    fn garbage_value_falls_back_to_default() {
        let mut prefs = Prefs::empty("unused.toml");
        prefs.set("gain", "loud");
        prefs.set("analysis", "spectrum");
        let opts = VisualizerOptions::from_prefs(&prefs);
        assert_eq!(opts.gain, 10.0);
        assert_eq!(opts.analysis, AnalysisMode::Spectrum);
    }

    #[test]
    fn out_of_range_values_are_clamped() {
        let mut prefs = Prefs::empty("unused.toml");
        prefs.set("frame_rate", "1000");
        prefs.set("cell_pitch", "0");
        prefs.set("threshold_damping", "-2");
        prefs.set("mesh", "42");
        let opts = VisualizerOptions::from_prefs(&prefs);
        assert_eq!(opts.frame_rate, MAX_CADENCE_HZ);
        assert_eq!(opts.cell_pitch, 1);
        assert_eq!(opts.threshold_damping, 1.0);
        assert_eq!(PresetOptions::from_prefs(&prefs).mesh, 5);
    }

    #[test]
    fn broken_file_loads_as_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("prefs.toml");
        fs::write(&path, "this is = = not toml").unwrap();
        assert!(matches!(Prefs::load(&path), Err(VizError::Prefs(_))));
        assert_eq!(Prefs::load_or_default(&path).iter().count(), 0);
    }

    #[test]
    fn write_prefs_covers_every_default_key() {
        let mut prefs = Prefs::empty("unused.toml");
        VisualizerOptions::default().write_prefs(&mut prefs);
        PresetOptions::default().write_prefs(&mut prefs);
        for (key, _) in DEFAULTS {
            assert!(prefs.get(key).is_some(), "{} not written", key);
        }
        assert_eq!(VisualizerOptions::from_prefs(&prefs), VisualizerOptions::default());
        assert_eq!(PresetOptions::from_prefs(&prefs), PresetOptions::default());
    }

    #[test]
    fn defaults_table_matches_typed_defaults() {
        let mut prefs = Prefs::empty("unused.toml");
        for (key, value) in DEFAULTS {
            prefs.set(key, *value);
        }
        assert_eq!(VisualizerOptions::from_prefs(&prefs), VisualizerOptions::default());
        assert_eq!(PresetOptions::from_prefs(&prefs), PresetOptions::default());
    }

    #[test]
    fn set_checked_rejects_bad_input() {
        let mut prefs = Prefs::empty("unused.toml");
        assert!(prefs.set_checked("frame_rate", "24").is_ok());
        assert!(matches!(
            prefs.set_checked("frame_rate", "fast"),
            Err(VizError::InvalidOption { .. })
        ));
        assert!(prefs.set_checked("no_such_key", "1").is_err());
        assert!(prefs.set_checked("threshold_stat", "p90").is_ok());
        assert_eq!(prefs.get("frame_rate"), Some("24"));
    }

    #[test]
    fn advance_period_requires_toggle() {
        let mut opts = PresetOptions::default();
        assert_eq!(opts.advance_period(), None);
        opts.auto_advance = true;
        assert_eq!(opts.advance_period(), Some(Duration::from_secs(15)));
        opts.auto_advance_secs = 0;
        assert_eq!(opts.advance_period(), None);
    }

    #[test]
    fn extreme_durations_are_capped() {
        let mut prefs = Prefs::empty("unused.toml");
        prefs.set_checked("auto_advance_secs", &u64::MAX.to_string()).unwrap();
        prefs.set_checked("preset_blend_secs", "1e30").unwrap();
        prefs.set_checked("resize_debounce_ms", &u64::MAX.to_string()).unwrap();
        prefs.set("auto_advance", "true");

        let presets = PresetOptions::from_prefs(&prefs);
        assert_eq!(presets.auto_advance_secs, MAX_AUTO_ADVANCE_SECS);
        assert_eq!(presets.blend_secs, MAX_BLEND_SECS);
        assert_eq!(presets.advance_period(), Some(Duration::from_secs(MAX_AUTO_ADVANCE_SECS)));

        let grid = VisualizerOptions::from_prefs(&prefs);
        assert_eq!(grid.resize_debounce(), Duration::from_millis(MAX_RESIZE_DEBOUNCE_MS));
    }
}
