//! Input normalization layers backed by running statistics.
//!
//! Similar in spirit to batch or layer normalization, except that the
//! statistics come from every batch seen during training rather than from the
//! current batch alone. This mirrors the common RL practice of normalizing
//! environment observations with running estimates.
//!
//! # Usage
//!
//! ```ignore
//! let mut norm = RunningNorm::new(4);
//!
//! // Training: statistics are updated first, then the batch is normalized
//! let y = norm.forward(obs)?;
//!
//! // Evaluation: statistics are frozen for the guard's lifetime
//! {
//!     let mut frozen = norm.evaluating();
//!     let y = frozen.forward(obs)?;
//! }
//! ```
//!
//! # Gradients
//!
//! Statistics are plain `f64` buffers kept outside the autodiff graph. The
//! update reads the batch through `into_data`, and the transform treats mean
//! and scale as constant tensors, so gradients flow through
//! `(x - mean) / sqrt(var + eps)` and never into the statistics.

use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use burn::prelude::*;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::core::{Cumulative, ExponentialDecay, NormRule, NormalizerState, UpdateRule};
use crate::error::{Result, UtilError};

/// Configuration shared by all normalizer variants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormConfig {
    /// Inputs are rescaled by `1 / sqrt(running_var + eps)`.
    pub eps: f64,
    /// Whether `forward` updates the statistics.
    pub training: bool,
}

impl Default for NormConfig {
    fn default() -> Self {
        Self {
            eps: 1e-5,
            training: true,
        }
    }
}

impl NormConfig {
    /// Create a new config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set epsilon for numerical stability.
    pub fn with_eps(mut self, eps: f64) -> Self {
        self.eps = eps;
        self
    }

    /// Set the initial training mode.
    pub fn with_training(mut self, training: bool) -> Self {
        self.training = training;
        self
    }
}

/// Normalizes inputs to zero mean and unit variance using running statistics.
///
/// The update strategy is the type parameter: see [`RunningNorm`] and
/// [`EmaNorm`], or [`NormRule`] to pick one at run time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Normalizer<R: UpdateRule> {
    state: NormalizerState,
    rule: R,
    config: NormConfig,
}

/// Normalizer weighting every sample ever seen equally.
pub type RunningNorm = Normalizer<Cumulative>;

/// Normalizer with exponentially decaying weight on past samples.
pub type EmaNorm = Normalizer<ExponentialDecay>;

impl Normalizer<Cumulative> {
    /// Create a cumulative normalizer with default config.
    pub fn new(num_features: usize) -> Self {
        Self::with_rule(num_features, Cumulative, NormConfig::default())
    }

    /// Create a cumulative normalizer with a custom epsilon.
    pub fn with_eps(num_features: usize, eps: f64) -> Self {
        Self::with_rule(num_features, Cumulative, NormConfig::default().with_eps(eps))
    }
}

impl Normalizer<ExponentialDecay> {
    /// Create an exponential-decay normalizer with default config.
    ///
    /// Fails if `decay` is not in the open interval (0, 1).
    pub fn new(num_features: usize, decay: f64, decay_within_batch: bool) -> Result<Self> {
        Self::with_config(num_features, decay, decay_within_batch, NormConfig::default())
    }

    /// Create an exponential-decay normalizer with custom config.
    pub fn with_config(
        num_features: usize,
        decay: f64,
        decay_within_batch: bool,
        config: NormConfig,
    ) -> Result<Self> {
        let rule = ExponentialDecay::new(decay, decay_within_batch)?;
        Ok(Self::with_rule(num_features, rule, config))
    }
}

impl<R: UpdateRule> Normalizer<R> {
    /// Create a normalizer from any update rule.
    pub fn with_rule(num_features: usize, rule: R, config: NormConfig) -> Self {
        Self {
            state: NormalizerState::new(num_features),
            rule,
            config,
        }
    }

    /// Number of features (length of the non-batch dimension).
    pub fn num_features(&self) -> usize {
        self.state.num_features()
    }

    /// Underlying statistics, e.g. for checkpointing.
    pub fn state(&self) -> &NormalizerState {
        &self.state
    }

    /// Running mean per feature.
    pub fn running_mean(&self) -> &[f64] {
        self.state.running_mean()
    }

    /// Running variance per feature.
    pub fn running_var(&self) -> &[f64] {
        self.state.running_var()
    }

    /// Number of samples folded into the statistics.
    pub fn count(&self) -> u64 {
        self.state.count()
    }

    /// Epsilon added to the variance before taking the square root.
    pub fn eps(&self) -> f64 {
        self.config.eps
    }

    /// Update rule.
    pub fn rule(&self) -> &R {
        &self.rule
    }

    /// Whether `forward` updates the statistics.
    pub fn is_training(&self) -> bool {
        self.config.training
    }

    /// Set training mode.
    pub fn set_training(&mut self, training: bool) {
        self.config.training = training;
    }

    /// Replace the statistics, e.g. when restoring a checkpoint.
    pub fn load_state(&mut self, state: NormalizerState) -> Result<()> {
        if state.num_features() != self.num_features() {
            return Err(UtilError::ShapeMismatch {
                expected: vec![self.num_features()],
                actual: vec![state.num_features()],
            });
        }
        self.state = state;
        Ok(())
    }

    /// Reset statistics to the identity transform.
    pub fn reset_running_stats(&mut self) {
        log::debug!(
            "Resetting running stats ({} features, {} samples seen)",
            self.num_features(),
            self.count()
        );
        self.state.reset();
    }

    /// Update statistics with a flattened batch `[row0, row1, ...]`.
    ///
    /// Each row has `num_features` values. An empty batch is a no-op.
    pub fn update_stats(&mut self, batch: &[f32]) -> Result<()> {
        let dim = self.num_features();
        let batch_size = self.rows_in(batch.len())?;
        let values: Vec<f64> = batch.iter().map(|&x| x as f64).collect();
        debug_assert_eq!(values.len(), batch_size * dim);
        self.fold(&values, batch_size);
        Ok(())
    }

    /// Update statistics with a `[batch_size, num_features]` tensor.
    ///
    /// The tensor is read through `into_data`, outside any autodiff graph.
    pub fn update_stats_tensor<B: Backend>(&mut self, batch: &Tensor<B, 2>) -> Result<()> {
        let [batch_size, dim] = batch.dims();
        self.check_width(batch_size, dim)?;
        let values: Vec<f64> = batch.clone().into_data().iter::<f64>().collect();
        self.fold(&values, batch_size);
        Ok(())
    }

    /// Normalize a flattened batch without touching the statistics.
    pub fn normalize(&self, batch: &[f32]) -> Result<Vec<f32>> {
        let dim = self.num_features();
        self.rows_in(batch.len())?;
        let std = self.state.std_vec(self.config.eps);
        let mean = self.state.running_mean();

        Ok(batch
            .chunks_exact(dim.max(1))
            .flat_map(|row| {
                row.iter()
                    .zip(mean)
                    .zip(&std)
                    .map(|((&x, &m), &s)| ((x as f64 - m) / s) as f32)
            })
            .collect())
    }

    /// Normalize a `[batch_size, num_features]` tensor without touching the
    /// statistics.
    pub fn normalize_tensor<B: Backend>(&self, x: Tensor<B, 2>) -> Result<Tensor<B, 2>> {
        let [batch_size, dim] = x.dims();
        self.check_width(batch_size, dim)?;
        Ok(self.apply(x))
    }

    /// Update statistics if in training mode, then return the normalized `x`.
    pub fn forward<B: Backend>(&mut self, x: Tensor<B, 2>) -> Result<Tensor<B, 2>> {
        if self.config.training {
            self.update_stats_tensor(&x)?;
        }
        self.normalize_tensor(x)
    }

    /// Temporarily switch training mode; the previous mode is restored when
    /// the guard is dropped.
    pub fn training_mode(&mut self, mode: bool) -> TrainingModeGuard<'_, R> {
        let previous = self.config.training;
        self.config.training = mode;
        TrainingModeGuard {
            normalizer: self,
            previous,
        }
    }

    /// Shorthand for `training_mode(true)`.
    pub fn training(&mut self) -> TrainingModeGuard<'_, R> {
        self.training_mode(true)
    }

    /// Shorthand for `training_mode(false)`.
    pub fn evaluating(&mut self) -> TrainingModeGuard<'_, R> {
        self.training_mode(false)
    }

    /// `(x - mean) / sqrt(var + eps)` with the statistics as constants.
    fn apply<B: Backend>(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let device = x.device();
        let dim = self.num_features();

        let mean: Vec<f32> = self.state.running_mean().iter().map(|&m| m as f32).collect();
        let std: Vec<f32> = self
            .state
            .std_vec(self.config.eps)
            .into_iter()
            .map(|s| s as f32)
            .collect();

        let mean = Tensor::<B, 1>::from_floats(mean.as_slice(), &device).reshape([1, dim]);
        let std = Tensor::<B, 1>::from_floats(std.as_slice(), &device).reshape([1, dim]);

        (x - mean) / std
    }

    fn fold(&mut self, values: &[f64], batch_size: usize) {
        if batch_size == 0 || self.num_features() == 0 {
            return;
        }
        self.rule.update(&mut self.state, values, batch_size);
    }

    fn rows_in(&self, len: usize) -> Result<usize> {
        let dim = self.num_features();
        if dim == 0 {
            return if len == 0 {
                Ok(0)
            } else {
                Err(UtilError::ShapeMismatch {
                    expected: vec![0],
                    actual: vec![len],
                })
            };
        }
        if len % dim != 0 {
            return Err(UtilError::ShapeMismatch {
                expected: vec![len / dim, dim],
                actual: vec![len],
            });
        }
        Ok(len / dim)
    }

    fn check_width(&self, batch_size: usize, dim: usize) -> Result<()> {
        if dim != self.num_features() {
            return Err(UtilError::ShapeMismatch {
                expected: vec![batch_size, self.num_features()],
                actual: vec![batch_size, dim],
            });
        }
        Ok(())
    }
}

impl Normalizer<NormRule> {
    /// Create a normalizer whose update rule is chosen at run time.
    pub fn from_rule(num_features: usize, rule: impl Into<NormRule>, config: NormConfig) -> Self {
        Self::with_rule(num_features, rule.into(), config)
    }
}

/// Scoped training-mode switch returned by [`Normalizer::training_mode`].
pub struct TrainingModeGuard<'a, R: UpdateRule> {
    normalizer: &'a mut Normalizer<R>,
    previous: bool,
}

impl<R: UpdateRule> Deref for TrainingModeGuard<'_, R> {
    type Target = Normalizer<R>;

    fn deref(&self) -> &Self::Target {
        self.normalizer
    }
}

impl<R: UpdateRule> DerefMut for TrainingModeGuard<'_, R> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.normalizer
    }
}

impl<R: UpdateRule> Drop for TrainingModeGuard<'_, R> {
    fn drop(&mut self) {
        self.normalizer.config.training = self.previous;
    }
}

/// Shared handle to a run-time-selected normalizer.
///
/// Lets several owners, e.g. environment workers and a training loop, read
/// one set of statistics. Clones share the statistics; the training loop is
/// expected to be the only writer. Networks use
/// [`InputNorm`](super::InputNorm) instead, whose statistics belong to the
/// module record.
#[derive(Debug, Clone)]
pub struct SharedNormalizer {
    inner: Arc<RwLock<Normalizer<NormRule>>>,
}

impl SharedNormalizer {
    /// Wrap a normalizer.
    pub fn new(normalizer: Normalizer<NormRule>) -> Self {
        Self {
            inner: Arc::new(RwLock::new(normalizer)),
        }
    }

    /// Update statistics (in training mode) and normalize.
    pub fn forward<B: Backend>(&self, x: Tensor<B, 2>) -> Result<Tensor<B, 2>> {
        self.inner.write().forward(x)
    }

    /// Normalize without updating statistics.
    pub fn normalize_tensor<B: Backend>(&self, x: Tensor<B, 2>) -> Result<Tensor<B, 2>> {
        self.inner.read().normalize_tensor(x)
    }

    /// Update statistics with a flattened batch.
    pub fn update_stats(&self, batch: &[f32]) -> Result<()> {
        self.inner.write().update_stats(batch)
    }

    /// Number of features.
    pub fn num_features(&self) -> usize {
        self.inner.read().num_features()
    }

    /// Number of samples seen.
    pub fn count(&self) -> u64 {
        self.inner.read().count()
    }

    /// Whether `forward` updates the statistics.
    pub fn is_training(&self) -> bool {
        self.inner.read().is_training()
    }

    /// Set training mode.
    pub fn set_training(&self, training: bool) {
        self.inner.write().set_training(training);
    }

    /// Reset statistics to the identity transform.
    pub fn reset_running_stats(&self) {
        self.inner.write().reset_running_stats();
    }

    /// Get a snapshot of the current normalizer.
    pub fn snapshot(&self) -> Normalizer<NormRule> {
        self.inner.read().clone()
    }
}
