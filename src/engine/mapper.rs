//! Mapping of buffer samples onto grid cells.
//!
//! The buffer is walked at a stride of `floor(len / cells)`. A visited
//! sample further than `threshold` from the baseline excites the cell at
//! `floor(cells * index / len)`, so the left-to-right, top-to-bottom order
//! of the grid follows the order of the buffer.

use std::fmt;
use std::str::FromStr;

use super::extractor::{SILENCE_BASELINE, SUPPRESS_THRESHOLD};

/// Signal that one cell should flash.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExcitationEvent {
    pub cell: usize,
    /// Distance of the triggering sample from the baseline
    pub intensity: u8,
    /// Hue in degrees, `[0, 360)`
    pub hue: f32,
}

/// How threshold and intensity combine into a hue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HueMapping {
    /// `threshold / intensity * range`
    Ratio,
    /// `threshold * intensity * range`
    Product,
}

impl fmt::Display for HueMapping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HueMapping::Ratio => "ratio",
            HueMapping::Product => "product",
        })
    }
}

impl FromStr for HueMapping {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ratio" | "divide" => Ok(HueMapping::Ratio),
            "product" | "multiply" => Ok(HueMapping::Product),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MapperOptions {
    pub baseline: u8,
    pub hue_mapping: HueMapping,
    pub hue_range: f32,
}

impl Default for MapperOptions {
    fn default() -> Self {
        Self {
            baseline: SILENCE_BASELINE,
            hue_mapping: HueMapping::Ratio,
            hue_range: 360.0,
        }
    }
}

impl MapperOptions {
    pub fn hue(&self, threshold: u32, intensity: u8) -> f32 {
        let t = threshold as f32;
        let i = intensity.max(1) as f32;
        let raw = match self.hue_mapping {
            HueMapping::Ratio => t / i * self.hue_range,
            HueMapping::Product => t * i * self.hue_range,
        };
        if raw.is_finite() {
            raw.rem_euclid(360.0)
        } else {
            0.0
        }
    }
}

/// Cell for sample `index` of a `len`-long buffer, if the grid has cells.
pub fn cell_for_sample(index: usize, len: usize, cells: usize) -> Option<usize> {
    if cells == 0 || len == 0 || index >= len {
        return None;
    }
    Some((cells as u64 * index as u64 / len as u64) as usize)
}

/// Sampling stride for `len` samples over `cells` cells, never zero.
pub fn stride(len: usize, cells: usize) -> usize {
    if cells == 0 {
        return len.max(1);
    }
    (len / cells).max(1)
}

/// Lazily maps `buffer` to excitation events.
///
/// Yields nothing when the grid is empty or `threshold` is within the
/// jitter floor.
pub fn map_samples<'a>(
    buffer: &'a [u8],
    threshold: u32,
    cells: usize,
    options: &'a MapperOptions,
) -> Excitations<'a> {
    let suppressed = cells == 0 || buffer.is_empty() || threshold <= SUPPRESS_THRESHOLD;
    Excitations {
        buffer,
        threshold,
        cells,
        options,
        stride: stride(buffer.len(), cells),
        next: if suppressed { buffer.len() } else { 0 },
    }
}

pub struct Excitations<'a> {
    buffer: &'a [u8],
    threshold: u32,
    cells: usize,
    options: &'a MapperOptions,
    stride: usize,
    next: usize,
}

impl Iterator for Excitations<'_> {
    type Item = ExcitationEvent;

    fn next(&mut self) -> Option<Self::Item> {
        let len = self.buffer.len();
        while self.next < len {
            let index = self.next;
            self.next += self.stride;

            let intensity = self.buffer[index].abs_diff(self.options.baseline);
            if (intensity as u32) <= self.threshold {
                continue;
            }
            let cell = cell_for_sample(index, len, self.cells)?;
            return Some(ExcitationEvent {
                cell,
                intensity,
                hue: self.options.hue(self.threshold, intensity),
            });
        }
        None
    }
}
