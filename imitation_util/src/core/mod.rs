//! Core statistics types shared by the normalization layers.

pub mod running_stats;

pub use running_stats::{Cumulative, ExponentialDecay, NormRule, NormalizerState, UpdateRule};
