//! Audio-reactive cell grid visualizer for the terminal.
//!
//! Microphone samples drive a grid of cells that flash and fade with the
//! sound. The pipeline lives in [`engine`]; [`viz`] hosts it in a terminal.

pub mod audio;
pub mod colors;
pub mod engine;
pub mod error;
pub mod help;
pub mod logging;
pub mod settings;
pub mod terminal;
pub mod viz;

pub use error::{Result, VizError};
