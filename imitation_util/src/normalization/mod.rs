//! Normalization layers driven by running statistics.
//!
//! - [`RunningNorm`]: cumulative mean/variance over every batch seen
//! - [`EmaNorm`]: exponentially weighted mean/variance
//! - [`InputNorm`]: burn module whose statistics are saved with the network
//! - [`SharedNormalizer`]: run-time-selected normalizer behind a shared lock
//!
//! # Usage
//!
//! ```ignore
//! let mut norm = EmaNorm::new(obs_dim, 0.99, false)?;
//! let normalized = norm.forward(obs)?;
//! ```

mod layer;
mod normalizer;

pub use layer::InputNorm;
pub use normalizer::{
    EmaNorm, NormConfig, Normalizer, RunningNorm, SharedNormalizer, TrainingModeGuard,
};
