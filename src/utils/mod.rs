//! Shared utilities.

pub mod duration;

pub use duration::{parse_duration, parse_duration_to_seconds};
