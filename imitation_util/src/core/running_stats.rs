//! Running mean/variance statistics with pluggable update rules.
//!
//! [`NormalizerState`] holds the per-feature running mean, running variance
//! and sample count. An [`UpdateRule`] folds a new batch into that state:
//!
//! - [`Cumulative`]: every sample ever seen carries equal weight. Batches are
//!   merged with the pairwise formula of Chan et al. (1979), so the result is
//!   independent of how the data was split into batches.
//! - [`ExponentialDecay`]: past data decays geometrically, either batch by
//!   batch or sample by sample within a batch.
//!
//! # Example
//! ```ignore
//! use imitation_util::core::{Cumulative, NormalizerState, UpdateRule};
//!
//! let mut state = NormalizerState::new(2);
//! Cumulative.update(&mut state, &[1.0, 2.0, 3.0, 4.0], 2);
//! assert_eq!(state.running_mean(), &[2.0, 3.0]);
//! ```

use serde::{Deserialize, Serialize};

use crate::error::{Result, UtilError};

/// Per-feature running statistics.
///
/// A fresh state is the identity transform: mean 0, variance 1, count 0.
///
/// Deserialization goes through [`NormalizerState::from_parts`], so a stored
/// state with mismatched buffers or a negative variance is rejected on load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawNormalizerState")]
pub struct NormalizerState {
    /// Running mean per feature
    running_mean: Vec<f64>,
    /// Running (population) variance per feature, always >= 0
    running_var: Vec<f64>,
    /// Number of samples folded in so far
    count: u64,
}

impl NormalizerState {
    /// Create the identity state for `num_features` features.
    pub fn new(num_features: usize) -> Self {
        Self {
            running_mean: vec![0.0; num_features],
            running_var: vec![1.0; num_features],
            count: 0,
        }
    }

    /// Build a state from stored buffers.
    ///
    /// Fails with [`UtilError::ShapeMismatch`] if the buffers differ in length
    /// and with [`UtilError::InvalidArgument`] if any variance is negative or NaN.
    pub fn from_parts(running_mean: Vec<f64>, running_var: Vec<f64>, count: u64) -> Result<Self> {
        if running_var.len() != running_mean.len() {
            return Err(UtilError::ShapeMismatch {
                expected: vec![running_mean.len()],
                actual: vec![running_var.len()],
            });
        }
        if let Some(v) = running_var.iter().find(|&&v| !(v >= 0.0)) {
            return Err(UtilError::invalid(
                "running_var",
                format!("variance must be non-negative, got {}", v),
            ));
        }
        Ok(Self {
            running_mean,
            running_var,
            count,
        })
    }

    /// Number of features tracked.
    pub fn num_features(&self) -> usize {
        self.running_mean.len()
    }

    /// Running mean per feature.
    pub fn running_mean(&self) -> &[f64] {
        &self.running_mean
    }

    /// Running variance per feature.
    pub fn running_var(&self) -> &[f64] {
        &self.running_var
    }

    /// Number of samples seen.
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Scale factors `sqrt(running_var + eps)` used by the normalizing transform.
    pub fn std_vec(&self, eps: f64) -> Vec<f64> {
        self.running_var.iter().map(|&v| (v + eps).sqrt()).collect()
    }

    /// Reset to the identity transform.
    pub fn reset(&mut self) {
        self.running_mean.fill(0.0);
        self.running_var.fill(1.0);
        self.count = 0;
    }
}

#[derive(Deserialize)]
struct RawNormalizerState {
    running_mean: Vec<f64>,
    running_var: Vec<f64>,
    count: u64,
}

impl TryFrom<RawNormalizerState> for NormalizerState {
    type Error = UtilError;

    fn try_from(raw: RawNormalizerState) -> Result<Self> {
        Self::from_parts(raw.running_mean, raw.running_var, raw.count)
    }
}

/// Strategy for folding a batch into a [`NormalizerState`].
///
/// `batch` is row-major with `batch_size` rows of `state.num_features()`
/// values each. Callers guarantee `batch_size > 0` and a matching length.
pub trait UpdateRule: Clone + std::fmt::Debug + Send + Sync + 'static {
    /// Update `state` in place with `batch`.
    fn update(&self, state: &mut NormalizerState, batch: &[f64], batch_size: usize);
}

/// Equal weight for every sample ever seen.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Cumulative;

impl UpdateRule for Cumulative {
    fn update(&self, state: &mut NormalizerState, batch: &[f64], batch_size: usize) {
        let dim = state.num_features();
        debug_assert_eq!(batch.len(), batch_size * dim);

        let (batch_mean, batch_var) = batch_moments(batch, batch_size, dim);
        let prev_count = state.count as f64;
        let batch_count = batch_size as f64;
        let tot_count = prev_count + batch_count;

        for i in 0..dim {
            let delta = batch_mean[i] - state.running_mean[i];
            state.running_mean[i] += delta * batch_count / tot_count;

            // M2_combined = M2_a + M2_b + delta^2 * n_a * n_b / (n_a + n_b)
            let m2 = state.running_var[i] * prev_count
                + batch_var[i] * batch_count
                + delta * delta * prev_count * batch_count / tot_count;
            state.running_var[i] = m2 / tot_count;
        }

        state.count += batch_size as u64;
    }
}

/// Exponentially decaying weight on past samples.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExponentialDecay {
    decay: f64,
    decay_within_batch: bool,
}

impl ExponentialDecay {
    /// Create a decay rule.
    ///
    /// # Arguments
    /// * `decay` - Weight kept by past data per step, in the open interval (0, 1)
    /// * `decay_within_batch` - Decay sample by sample inside a batch instead of
    ///   weighting the batch uniformly
    pub fn new(decay: f64, decay_within_batch: bool) -> Result<Self> {
        // Negated comparison so NaN is rejected too.
        if !(decay > 0.0 && decay < 1.0) {
            return Err(UtilError::invalid(
                "decay",
                format!("must be between 0 and 1, got {}", decay),
            ));
        }
        Ok(Self {
            decay,
            decay_within_batch,
        })
    }

    /// Decay factor.
    pub fn decay(&self) -> f64 {
        self.decay
    }

    /// Whether samples decay within a batch.
    pub fn decay_within_batch(&self) -> bool {
        self.decay_within_batch
    }

    /// Raw per-row weights before the first-update / running-weight adjustment.
    ///
    /// Within-batch decay gives the geometric progression
    /// `decay^(B-1), ..., decay, 1` (newest row last); otherwise `1/B` each.
    fn row_weights(&self, batch_size: usize) -> Vec<f64> {
        if self.decay_within_batch {
            (0..batch_size)
                .map(|i| self.decay.powi((batch_size - 1 - i) as i32))
                .collect()
        } else {
            vec![1.0 / batch_size as f64; batch_size]
        }
    }
}

impl UpdateRule for ExponentialDecay {
    fn update(&self, state: &mut NormalizerState, batch: &[f64], batch_size: usize) {
        let dim = state.num_features();
        debug_assert_eq!(batch.len(), batch_size * dim);

        let mut weights = self.row_weights(batch_size);
        let alpha = 1.0 - self.decay;

        if state.count == 0 {
            if self.decay_within_batch {
                // The oldest row absorbs the mass of the (empty) past, so the
                // weights sum to 1 after this.
                for w in weights.iter_mut().skip(1) {
                    *w *= alpha;
                }
            }

            for j in 0..dim {
                let mean: f64 = batch
                    .chunks_exact(dim)
                    .zip(&weights)
                    .map(|(row, &w)| w * row[j])
                    .sum();
                let var = if batch_size > 1 {
                    batch
                        .chunks_exact(dim)
                        .zip(&weights)
                        .map(|(row, &w)| w * (row[j] - mean).powi(2))
                        .sum()
                } else {
                    0.0
                };
                state.running_mean[j] = mean;
                state.running_var[j] = var;
            }
        } else {
            let running_weight = if self.decay_within_batch {
                self.decay * weights[0]
            } else {
                self.decay
            };
            for w in &mut weights {
                *w *= alpha;
            }
            // running_weight + sum(weights) == 1

            for j in 0..dim {
                let mean = state.running_mean[j];
                // E[x^2] = Var + mean^2 holds under any weighting scheme.
                let mut second_moment = running_weight * (state.running_var[j] + mean * mean);
                let mut new_mean = running_weight * mean;
                for (row, &w) in batch.chunks_exact(dim).zip(&weights) {
                    let x = row[j];
                    new_mean += w * x;
                    second_moment += w * x * x;
                }
                state.running_mean[j] = new_mean;
                state.running_var[j] = (second_moment - new_mean * new_mean).max(0.0);
            }
        }

        state.count += batch_size as u64;
    }
}

/// Update rule selected at run time.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum NormRule {
    /// See [`Cumulative`].
    Cumulative(Cumulative),
    /// See [`ExponentialDecay`].
    ExponentialDecay(ExponentialDecay),
}

impl UpdateRule for NormRule {
    fn update(&self, state: &mut NormalizerState, batch: &[f64], batch_size: usize) {
        match self {
            NormRule::Cumulative(rule) => rule.update(state, batch, batch_size),
            NormRule::ExponentialDecay(rule) => rule.update(state, batch, batch_size),
        }
    }
}

impl From<Cumulative> for NormRule {
    fn from(rule: Cumulative) -> Self {
        NormRule::Cumulative(rule)
    }
}

impl From<ExponentialDecay> for NormRule {
    fn from(rule: ExponentialDecay) -> Self {
        NormRule::ExponentialDecay(rule)
    }
}

/// Per-feature mean and population variance of a row-major batch.
pub(crate) fn batch_moments(batch: &[f64], batch_size: usize, dim: usize) -> (Vec<f64>, Vec<f64>) {
    let n = batch_size as f64;
    let mut mean = vec![0.0; dim];
    for row in batch.chunks_exact(dim) {
        for (m, &x) in mean.iter_mut().zip(row) {
            *m += x;
        }
    }
    for m in &mut mean {
        *m /= n;
    }

    let mut var = vec![0.0; dim];
    for row in batch.chunks_exact(dim) {
        for ((v, &x), &m) in var.iter_mut().zip(row).zip(&mean) {
            *v += (x - m) * (x - m);
        }
    }
    for v in &mut var {
        *v /= n;
    }

    (mean, var)
}
