//! Input normalization as a burn module.
//!
//! [`InputNorm`] holds the same statistics as [`Normalizer`](super::Normalizer)
//! but stores them in `RunningState` buffers, the way burn's `BatchNorm`
//! stores its running mean and variance. The buffers are part of the module
//! record, so a network saved with `into_record` and a recorder restores its
//! normalization along with its weights. `valid()` hands out an inner-backend
//! copy with its own buffers.
//!
//! The update itself runs on the host with an [`UpdateRule`], so the layer
//! and the standalone normalizers produce the same statistics.

use burn::module::{Ignored, RunningState};
use burn::prelude::*;

use crate::core::{NormRule, NormalizerState, UpdateRule};
use crate::error::{Result, UtilError};

/// Running-statistics input normalization layer.
#[derive(Module, Debug)]
pub struct InputNorm<B: Backend> {
    running_mean: RunningState<Tensor<B, 1>>,
    running_var: RunningState<Tensor<B, 1>>,
    /// Single element holding the sample count.
    count: RunningState<Tensor<B, 1>>,
    rule: Ignored<NormRule>,
    eps: Ignored<f64>,
    training: Ignored<bool>,
    num_features: Ignored<usize>,
}

impl<B: Backend> InputNorm<B> {
    /// Create an identity layer for `num_features` inputs, in training mode.
    pub fn new(num_features: usize, rule: impl Into<NormRule>, eps: f64, device: &B::Device) -> Self {
        Self {
            running_mean: RunningState::new(Tensor::zeros([num_features], device)),
            running_var: RunningState::new(Tensor::ones([num_features], device)),
            count: RunningState::new(Tensor::zeros([1], device)),
            rule: Ignored(rule.into()),
            eps: Ignored(eps),
            training: Ignored(true),
            num_features: Ignored(num_features),
        }
    }

    /// Number of features.
    pub fn num_features(&self) -> usize {
        *self.num_features
    }

    /// Update rule.
    pub fn rule(&self) -> &NormRule {
        &self.rule
    }

    /// Whether `forward` updates the statistics.
    pub fn is_training(&self) -> bool {
        *self.training
    }

    /// Set training mode.
    pub fn set_training(&mut self, training: bool) {
        self.training = Ignored(training);
    }

    /// Copy of the current statistics.
    ///
    /// Fails if the buffers were loaded from a record of another width or
    /// with a negative variance.
    pub fn state(&self) -> Result<NormalizerState> {
        let mean: Vec<f64> = self.running_mean.value_sync().into_data().iter::<f64>().collect();
        let var: Vec<f64> = self.running_var.value_sync().into_data().iter::<f64>().collect();
        let count = self
            .count
            .value_sync()
            .into_data()
            .iter::<f64>()
            .next()
            .unwrap_or(0.0);

        if mean.len() != self.num_features() {
            return Err(UtilError::ShapeMismatch {
                expected: vec![self.num_features()],
                actual: vec![mean.len()],
            });
        }
        NormalizerState::from_parts(mean, var, count.max(0.0).round() as u64)
    }

    /// Number of samples folded into the statistics.
    pub fn count(&self) -> u64 {
        self.state().map(|state| state.count()).unwrap_or(0)
    }

    /// Replace the statistics, e.g. with ones computed by a standalone
    /// normalizer.
    pub fn load_state(&self, state: &NormalizerState) -> Result<()> {
        if state.num_features() != self.num_features() {
            return Err(UtilError::ShapeMismatch {
                expected: vec![self.num_features()],
                actual: vec![state.num_features()],
            });
        }
        let device = self.running_mean.value().device();
        self.store(state, &device);
        Ok(())
    }

    /// Update statistics with a `[batch_size, num_features]` tensor.
    ///
    /// The tensor is read through `into_data`, outside any autodiff graph.
    pub fn update_stats(&self, batch: &Tensor<B, 2>) -> Result<()> {
        let [batch_size, dim] = batch.dims();
        if dim != self.num_features() {
            return Err(UtilError::ShapeMismatch {
                expected: vec![batch_size, self.num_features()],
                actual: vec![batch_size, dim],
            });
        }
        if batch_size == 0 || dim == 0 {
            return Ok(());
        }

        let mut state = self.state()?;
        let values: Vec<f64> = batch.clone().into_data().iter::<f64>().collect();
        self.rule.0.update(&mut state, &values, batch_size);
        self.store(&state, &batch.device());
        Ok(())
    }

    /// `(x - mean) / sqrt(var + eps)` without touching the statistics.
    pub fn normalize(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        let dim = self.num_features();
        let mean = self.running_mean.value_sync().reshape([1, dim]);
        let std = self
            .running_var
            .value_sync()
            .add_scalar(*self.eps)
            .sqrt()
            .reshape([1, dim]);
        (x - mean) / std
    }

    /// Update statistics if in training mode, then normalize.
    ///
    /// A failed update (statistics restored from an unusable record) is
    /// logged and the batch is normalized with the stored values.
    pub fn forward(&self, x: Tensor<B, 2>) -> Tensor<B, 2> {
        if *self.training {
            if let Err(err) = self.update_stats(&x) {
                log::warn!("Input normalizer update skipped: {}", err);
            }
        }
        self.normalize(x)
    }

    fn store(&self, state: &NormalizerState, device: &B::Device) {
        let mean: Vec<f32> = state.running_mean().iter().map(|&m| m as f32).collect();
        let var: Vec<f32> = state.running_var().iter().map(|&v| v as f32).collect();

        self.running_mean
            .update(Tensor::from_floats(mean.as_slice(), device));
        self.running_var
            .update(Tensor::from_floats(var.as_slice(), device));
        self.count
            .update(Tensor::from_floats([state.count() as f32], device));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Cumulative, ExponentialDecay};
    use crate::normalization::{NormConfig, Normalizer};
    use burn::backend::{Autodiff, NdArray};
    use burn::module::AutodiffModule;
    use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder};

    type TestBackend = NdArray<f32>;

    fn get_device() -> <TestBackend as Backend>::Device {
        Default::default()
    }

    fn to_vec<B: Backend>(t: Tensor<B, 2>) -> Vec<f32> {
        t.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_fresh_layer_is_identity() {
        let device = get_device();
        let mut norm = InputNorm::<TestBackend>::new(2, Cumulative, 0.0, &device);
        norm.set_training(false);

        let x = Tensor::<TestBackend, 2>::from_floats([[1.0, -2.0], [3.0, 4.0]], &device);
        assert_eq!(to_vec(norm.forward(x)), vec![1.0, -2.0, 3.0, 4.0]);
        assert_eq!(norm.count(), 0);
    }

    #[test]
    fn test_matches_standalone_normalizer() {
        let device = get_device();
        let rule = ExponentialDecay::new(0.9, true).unwrap();
        let layer = InputNorm::<TestBackend>::new(2, rule, 1e-5, &device);
        let mut reference = Normalizer::from_rule(2, rule, NormConfig::new());

        for batch in [[[1.0, 2.0], [3.0, 5.0]], [[-1.0, 0.5], [2.0, 8.0]]] {
            let x = Tensor::<TestBackend, 2>::from_floats(batch, &device);
            let ours = to_vec(layer.forward(x.clone()));
            let theirs = to_vec(reference.forward(x).unwrap());
            for (a, b) in ours.iter().zip(&theirs) {
                assert!((a - b).abs() < 1e-4, "{} vs {}", a, b);
            }
        }

        let state = layer.state().unwrap();
        assert_eq!(state.count(), reference.count());
        for (a, b) in state.running_var().iter().zip(reference.running_var()) {
            assert!((a - b).abs() < 1e-4);
        }
    }

    #[test]
    fn test_eval_mode_freezes_stats() {
        let device = get_device();
        let mut norm = InputNorm::<TestBackend>::new(1, Cumulative, 1e-5, &device);
        norm.set_training(false);

        norm.forward(Tensor::from_floats([[5.0], [7.0]], &device));
        assert_eq!(norm.count(), 0);
        assert_eq!(norm.state().unwrap(), NormalizerState::new(1));
    }

    #[test]
    fn test_statistics_survive_record_round_trip() {
        let device = get_device();
        let norm = InputNorm::<TestBackend>::new(2, Cumulative, 1e-5, &device);
        norm.forward(Tensor::from_floats([[0.0, 10.0], [2.0, 30.0]], &device));

        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let bytes = recorder.record(norm.clone().into_record(), ()).unwrap();

        let fresh = InputNorm::<TestBackend>::new(2, Cumulative, 1e-5, &device);
        let restored = fresh.load_record(recorder.load(bytes, &device).unwrap());

        let state = restored.state().unwrap();
        assert_eq!(state.count(), 2);
        assert_eq!(state.running_mean(), &[1.0, 20.0]);
        assert_eq!(state.running_var(), &[1.0, 100.0]);
    }

    #[test]
    fn test_valid_copy_does_not_share_buffers() {
        type AdBackend = Autodiff<NdArray<f32>>;
        let device = Default::default();
        let norm = InputNorm::<AdBackend>::new(1, Cumulative, 1e-5, &device);
        norm.forward(Tensor::from_floats([[1.0], [3.0]], &device));

        let inner = norm.valid();
        inner.forward(Tensor::from_floats([[100.0]], &device));

        assert_eq!(norm.count(), 2);
        assert_eq!(inner.count(), 3);
    }

    #[test]
    fn test_gradient_does_not_touch_statistics() {
        type AdBackend = Autodiff<NdArray<f32>>;
        let device = Default::default();
        let norm = InputNorm::<AdBackend>::new(2, Cumulative, 1e-5, &device);

        let x = Tensor::<AdBackend, 2>::from_floats([[1.0, 2.0], [3.0, 4.0]], &device)
            .require_grad();
        let grads = norm.forward(x.clone()).sum().backward();
        let grad = x.grad(&grads).unwrap();

        let expected = 1.0 / (1.0f32 + 1e-5).sqrt();
        for g in grad.into_data().to_vec::<f32>().unwrap() {
            assert!((g - expected).abs() < 1e-5);
        }
    }

    #[test]
    fn test_load_state_checks_width() {
        let device = get_device();
        let norm = InputNorm::<TestBackend>::new(2, Cumulative, 1e-5, &device);
        assert!(matches!(
            norm.load_state(&NormalizerState::new(3)),
            Err(UtilError::ShapeMismatch { .. })
        ));

        let state = NormalizerState::from_parts(vec![1.0, -1.0], vec![4.0, 0.25], 8).unwrap();
        norm.load_state(&state).unwrap();
        assert_eq!(norm.state().unwrap(), state);
    }

    #[test]
    fn test_wrong_width_update_rejected() {
        let device = get_device();
        let norm = InputNorm::<TestBackend>::new(3, Cumulative, 1e-5, &device);
        let x = Tensor::<TestBackend, 2>::zeros([4, 2], &device);
        assert!(matches!(
            norm.update_stats(&x),
            Err(UtilError::ShapeMismatch { .. })
        ));
        assert_eq!(norm.count(), 0);
    }
}
