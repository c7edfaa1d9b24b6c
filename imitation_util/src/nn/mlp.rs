//! Multi-layer perceptron builder.
//!
//! Assembles the usual imitation-learning network: optional input
//! normalization, a stack of dense layers with activation and dropout, and a
//! final dense layer, optionally squeezed to a `[batch]` vector.
//!
//! # Usage
//!
//! ```ignore
//! use imitation_util::nn::{Activation, InputNormalization, MlpConfig};
//!
//! let reward_net: Mlp<Backend> = MlpConfig::new(obs_dim + act_dim, vec![32, 32])
//!     .with_name("reward")
//!     .with_activation(Activation::Tanh)
//!     .with_squeeze_output(true)
//!     .with_normalize_input(Some(InputNormalization::running()))
//!     .init(&device)?;
//!
//! let rewards = reward_net.forward_squeezed(inputs); // [batch]
//! ```
//!
//! # Layer Layout
//!
//! With name `"reward"` and two hidden layers the layers are, in order:
//! `reward_normalize_input`, `reward_dense0`, `reward_act0`, `reward_dense1`,
//! `reward_act1`, `reward_dense_final`, `reward_squeeze`.

use burn::module::Ignored;
use burn::nn::{Dropout, DropoutConfig, Linear, LinearConfig};
use burn::prelude::*;
use burn::tensor::activation;
use serde::{Deserialize, Serialize};

use crate::core::{Cumulative, ExponentialDecay, NormRule};
use crate::error::{Result, UtilError};
use crate::normalization::{InputNorm, NormConfig, Normalizer};

/// Activation applied after each hidden layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub enum Activation {
    #[default]
    Relu,
    Tanh,
    Sigmoid,
    Gelu,
    /// No activation; hidden layers stay linear.
    Identity,
}

impl Activation {
    /// Apply the activation element-wise.
    pub fn apply<B: Backend, const D: usize>(self, x: Tensor<B, D>) -> Tensor<B, D> {
        match self {
            Activation::Relu => activation::relu(x),
            Activation::Tanh => activation::tanh(x),
            Activation::Sigmoid => activation::sigmoid(x),
            Activation::Gelu => activation::gelu(x),
            Activation::Identity => x,
        }
    }

    fn is_identity(self) -> bool {
        matches!(self, Activation::Identity)
    }
}

/// Input normalization layer placed in front of the first dense layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum InputNormalization {
    /// Cumulative running mean/variance.
    Running { eps: f64 },
    /// Exponentially weighted running mean/variance.
    Ema {
        decay: f64,
        decay_within_batch: bool,
        eps: f64,
    },
}

impl InputNormalization {
    /// Cumulative normalization with default epsilon.
    pub fn running() -> Self {
        InputNormalization::Running { eps: 1e-5 }
    }

    /// Exponential normalization with default epsilon.
    pub fn ema(decay: f64, decay_within_batch: bool) -> Self {
        InputNormalization::Ema {
            decay,
            decay_within_batch,
            eps: 1e-5,
        }
    }

    /// Update rule for this variant.
    ///
    /// Fails if an EMA decay is outside (0, 1).
    pub fn rule(&self) -> Result<NormRule> {
        match *self {
            InputNormalization::Running { .. } => Ok(Cumulative.into()),
            InputNormalization::Ema {
                decay,
                decay_within_batch,
                ..
            } => Ok(ExponentialDecay::new(decay, decay_within_batch)?.into()),
        }
    }

    /// Epsilon added to the variance.
    pub fn eps(&self) -> f64 {
        match *self {
            InputNormalization::Running { eps } | InputNormalization::Ema { eps, .. } => eps,
        }
    }

    /// Build a standalone normalizer for `num_features` inputs.
    pub fn build(&self, num_features: usize) -> Result<Normalizer<NormRule>> {
        Ok(Normalizer::from_rule(
            num_features,
            self.rule()?,
            NormConfig::new().with_eps(self.eps()),
        ))
    }

    /// Build the network layer for `num_features` inputs.
    pub fn init<B: Backend>(&self, num_features: usize, device: &B::Device) -> Result<InputNorm<B>> {
        Ok(InputNorm::new(num_features, self.rule()?, self.eps(), device))
    }
}

/// Configuration for [`Mlp`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MlpConfig {
    /// Size of each input vector.
    pub in_size: usize,
    /// Hidden layer sizes. Empty builds a linear function approximator.
    pub hid_sizes: Vec<usize>,
    /// Size of each output vector.
    pub out_size: usize,
    /// Prefix for layer names.
    pub name: Option<String>,
    /// Activation after hidden layers.
    pub activation: Activation,
    /// Dropout probability after each hidden layer (0 disables dropout).
    pub dropout_prob: f64,
    /// Squeeze a `[batch, 1]` output to `[batch]`. Requires `out_size == 1`.
    pub squeeze_output: bool,
    /// Flatten every non-batch axis of the input.
    pub flatten_input: bool,
    /// Optional input normalization.
    pub normalize_input: Option<InputNormalization>,
}

impl MlpConfig {
    /// Create a config with a single output and ReLU activations.
    pub fn new(in_size: usize, hid_sizes: Vec<usize>) -> Self {
        Self {
            in_size,
            hid_sizes,
            out_size: 1,
            name: None,
            activation: Activation::default(),
            dropout_prob: 0.0,
            squeeze_output: false,
            flatten_input: false,
            normalize_input: None,
        }
    }

    /// Set the output size.
    pub fn with_out_size(mut self, out_size: usize) -> Self {
        self.out_size = out_size;
        self
    }

    /// Set the layer name prefix.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the hidden activation.
    pub fn with_activation(mut self, activation: Activation) -> Self {
        self.activation = activation;
        self
    }

    /// Set the dropout probability.
    pub fn with_dropout_prob(mut self, prob: f64) -> Self {
        self.dropout_prob = prob;
        self
    }

    /// Squeeze the output to one dimension.
    pub fn with_squeeze_output(mut self, squeeze: bool) -> Self {
        self.squeeze_output = squeeze;
        self
    }

    /// Flatten inputs along every non-batch axis.
    pub fn with_flatten_input(mut self, flatten: bool) -> Self {
        self.flatten_input = flatten;
        self
    }

    /// Set the input normalization layer.
    pub fn with_normalize_input(mut self, norm: Option<InputNormalization>) -> Self {
        self.normalize_input = norm;
        self
    }

    /// Check the configuration for inconsistencies.
    pub fn validate(&self) -> Result<()> {
        if self.squeeze_output && self.out_size != 1 {
            return Err(UtilError::invalid(
                "squeeze_output",
                "squeeze_output is only applicable when out_size=1",
            ));
        }
        if !(0.0..1.0).contains(&self.dropout_prob) {
            return Err(UtilError::invalid(
                "dropout_prob",
                format!("must be in [0, 1), got {}", self.dropout_prob),
            ));
        }
        Ok(())
    }

    /// Names of the layers this config builds, in forward order.
    pub fn layer_names(&self) -> Vec<String> {
        let prefix = match &self.name {
            Some(name) => format!("{}_", name),
            None => String::new(),
        };

        let mut names = Vec::new();
        if self.flatten_input {
            names.push(format!("{}flatten", prefix));
        }
        if self.normalize_input.is_some() {
            names.push(format!("{}normalize_input", prefix));
        }
        for i in 0..self.hid_sizes.len() {
            names.push(format!("{}dense{}", prefix, i));
            if !self.activation.is_identity() {
                names.push(format!("{}act{}", prefix, i));
            }
            if self.dropout_prob > 0.0 {
                names.push(format!("{}dropout{}", prefix, i));
            }
        }
        names.push(format!("{}dense_final", prefix));
        if self.squeeze_output {
            names.push(format!("{}squeeze", prefix));
        }
        names
    }

    /// Initialize the network.
    pub fn init<B: Backend>(&self, device: &B::Device) -> Result<Mlp<B>> {
        self.validate()?;

        let input_norm = match &self.normalize_input {
            Some(norm) => Some(norm.init(self.in_size, device)?),
            None => None,
        };

        let mut hidden = Vec::with_capacity(self.hid_sizes.len());
        let mut prev_size = self.in_size;
        for &size in &self.hid_sizes {
            hidden.push(LinearConfig::new(prev_size, size).init(device));
            prev_size = size;
        }
        let output = LinearConfig::new(prev_size, self.out_size).init(device);

        let dropout = if self.dropout_prob > 0.0 {
            Some(DropoutConfig::new(self.dropout_prob).init())
        } else {
            None
        };

        Ok(Mlp {
            hidden,
            output,
            dropout,
            input_norm,
            activation: Ignored(self.activation),
            layer_names: Ignored(self.layer_names()),
            in_size: Ignored(self.in_size),
            out_size: Ignored(self.out_size),
            squeeze_output: Ignored(self.squeeze_output),
            flatten_input: Ignored(self.flatten_input),
        })
    }
}

/// Multi-layer perceptron built by [`MlpConfig`].
///
/// Input normalization statistics are part of the module record.
#[derive(Module, Debug)]
pub struct Mlp<B: Backend> {
    hidden: Vec<Linear<B>>,
    output: Linear<B>,
    dropout: Option<Dropout>,
    input_norm: Option<InputNorm<B>>,
    activation: Ignored<Activation>,
    layer_names: Ignored<Vec<String>>,
    in_size: Ignored<usize>,
    out_size: Ignored<usize>,
    squeeze_output: Ignored<bool>,
    flatten_input: Ignored<bool>,
}

impl<B: Backend> Mlp<B> {
    /// Forward pass: `[batch, in_size]` to `[batch, out_size]`.
    ///
    /// In training mode the input normalizer (if any) updates its statistics
    /// before normalizing.
    ///
    /// # Panics
    /// Panics if the input width differs from `in_size`.
    pub fn forward(&self, input: Tensor<B, 2>) -> Tensor<B, 2> {
        let [_, width] = input.dims();
        assert_eq!(width, *self.in_size, "Input dimension mismatch");

        let mut x = match &self.input_norm {
            Some(norm) => norm.forward(input),
            None => input,
        };

        for layer in &self.hidden {
            x = self.activation.0.apply(layer.forward(x));
            if let Some(dropout) = &self.dropout {
                x = dropout.forward(x);
            }
        }

        self.output.forward(x)
    }

    /// Forward pass squeezed to `[batch]`.
    ///
    /// # Panics
    /// Panics unless the network was built with `squeeze_output`.
    pub fn forward_squeezed(&self, input: Tensor<B, 2>) -> Tensor<B, 1> {
        assert!(*self.squeeze_output, "Network was not built with squeeze_output");
        self.forward(input).flatten(0, 1)
    }

    /// Forward pass for inputs with several non-batch axes, e.g. small images.
    ///
    /// Axes `1..D` are flattened before the dense layers.
    ///
    /// # Panics
    /// Panics if `D > 2` and the network was not built with `flatten_input`.
    pub fn forward_flat<const D: usize>(&self, input: Tensor<B, D>) -> Tensor<B, 2> {
        assert!(
            D == 2 || *self.flatten_input,
            "Network was not built with flatten_input"
        );
        self.forward(input.flatten(1, D - 1))
    }

    /// Switch the input normalizer between training and evaluation.
    pub fn set_training(&mut self, training: bool) {
        if let Some(norm) = &mut self.input_norm {
            norm.set_training(training);
        }
    }

    /// Input normalization layer, if the network has one.
    pub fn input_normalizer(&self) -> Option<&InputNorm<B>> {
        self.input_norm.as_ref()
    }

    /// Layer names in forward order.
    pub fn layer_names(&self) -> &[String] {
        &self.layer_names
    }

    /// Input size.
    pub fn in_size(&self) -> usize {
        *self.in_size
    }

    /// Output size.
    pub fn out_size(&self) -> usize {
        *self.out_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::record::{BinBytesRecorder, FullPrecisionSettings, Recorder};
    use burn::tensor::Distribution;

    type TestBackend = NdArray<f32>;

    fn get_device() -> <TestBackend as Backend>::Device {
        Default::default()
    }

    #[test]
    fn test_mlp_forward_shape() {
        let device = get_device();
        let mlp: Mlp<TestBackend> = MlpConfig::new(4, vec![8, 8])
            .with_out_size(3)
            .init(&device)
            .unwrap();

        let input = Tensor::random([5, 4], Distribution::Normal(0.0, 1.0), &device);
        assert_eq!(mlp.forward(input).dims(), [5, 3]);
    }

    #[test]
    fn test_linear_approximator_without_hidden_layers() {
        let device = get_device();
        let mlp: Mlp<TestBackend> = MlpConfig::new(4, vec![]).init(&device).unwrap();

        // weight 4x1 + bias 1
        assert_eq!(mlp.num_params(), 5);
        assert_eq!(mlp.layer_names(), &["dense_final".to_string()]);
    }

    #[test]
    fn test_param_count() {
        let device = get_device();
        let mlp: Mlp<TestBackend> = MlpConfig::new(4, vec![3]).init(&device).unwrap();
        // (4*3 + 3) + (3*1 + 1)
        assert_eq!(mlp.num_params(), 19);
    }

    #[test]
    fn test_layer_names_with_prefix() {
        let config = MlpConfig::new(2, vec![16, 16])
            .with_name("reward")
            .with_dropout_prob(0.1)
            .with_squeeze_output(true)
            .with_flatten_input(true)
            .with_normalize_input(Some(InputNormalization::running()));

        let expected = [
            "reward_flatten",
            "reward_normalize_input",
            "reward_dense0",
            "reward_act0",
            "reward_dropout0",
            "reward_dense1",
            "reward_act1",
            "reward_dropout1",
            "reward_dense_final",
            "reward_squeeze",
        ];
        assert_eq!(config.layer_names(), expected);
    }

    #[test]
    fn test_identity_activation_has_no_act_layers() {
        let config = MlpConfig::new(2, vec![4]).with_activation(Activation::Identity);
        assert_eq!(config.layer_names(), vec!["dense0", "dense_final"]);
    }

    #[test]
    fn test_squeeze_requires_single_output() {
        let device = get_device();
        let result = MlpConfig::new(2, vec![4])
            .with_out_size(2)
            .with_squeeze_output(true)
            .init::<TestBackend>(&device);
        assert!(matches!(
            result,
            Err(UtilError::InvalidArgument { param: "squeeze_output", .. })
        ));
    }

    #[test]
    fn test_invalid_dropout_rejected() {
        let config = MlpConfig::new(2, vec![4]).with_dropout_prob(1.0);
        assert!(config.validate().is_err());
        let config = MlpConfig::new(2, vec![4]).with_dropout_prob(-0.1);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_forward_squeezed() {
        let device = get_device();
        let mlp: Mlp<TestBackend> = MlpConfig::new(3, vec![5])
            .with_squeeze_output(true)
            .init(&device)
            .unwrap();

        let input = Tensor::random([7, 3], Distribution::Normal(0.0, 1.0), &device);
        assert_eq!(mlp.forward_squeezed(input).dims(), [7]);
    }

    #[test]
    fn test_forward_flat() {
        let device = get_device();
        let mlp: Mlp<TestBackend> = MlpConfig::new(12, vec![4])
            .with_flatten_input(true)
            .init(&device)
            .unwrap();

        let input = Tensor::<TestBackend, 3>::random([2, 3, 4], Distribution::Default, &device);
        assert_eq!(mlp.forward_flat(input).dims(), [2, 1]);
    }

    #[test]
    fn test_input_normalization_tracks_training_mode() {
        let device = get_device();
        let mut mlp: Mlp<TestBackend> = MlpConfig::new(2, vec![4])
            .with_normalize_input(Some(InputNormalization::ema(0.9, true)))
            .init(&device)
            .unwrap();

        let input = Tensor::<TestBackend, 2>::from_floats([[1.0, 2.0], [3.0, 4.0]], &device);

        mlp.forward(input.clone());
        assert_eq!(mlp.input_normalizer().unwrap().count(), 2);

        mlp.set_training(false);
        mlp.forward(input);
        assert_eq!(mlp.input_normalizer().unwrap().count(), 2);
    }

    #[test]
    fn test_normalization_survives_record_round_trip() {
        let device = get_device();
        let config = MlpConfig::new(2, vec![4])
            .with_normalize_input(Some(InputNormalization::running()));
        let mut trained: Mlp<TestBackend> = config.init(&device).unwrap();

        for batch in [[[0.0, 10.0], [2.0, 30.0]], [[5.0, -4.0], [1.0, 12.0]]] {
            trained.forward(Tensor::from_floats(batch, &device));
        }
        trained.set_training(false);

        let recorder = BinBytesRecorder::<FullPrecisionSettings>::default();
        let bytes = recorder.record(trained.clone().into_record(), ()).unwrap();
        let mut restored = config
            .init::<TestBackend>(&device)
            .unwrap()
            .load_record(recorder.load(bytes, &device).unwrap());
        restored.set_training(false);

        assert_eq!(
            restored.input_normalizer().unwrap().state().unwrap(),
            trained.input_normalizer().unwrap().state().unwrap()
        );
        assert_eq!(restored.input_normalizer().unwrap().count(), 4);

        let eval_input = Tensor::<TestBackend, 2>::from_floats([[3.0, 7.0], [-1.0, 20.0]], &device);
        let expected = trained.forward(eval_input.clone()).into_data().to_vec::<f32>().unwrap();
        let actual = restored.forward(eval_input).into_data().to_vec::<f32>().unwrap();
        assert_eq!(expected, actual);
    }

    #[test]
    fn test_bad_ema_decay_fails_init() {
        let device = get_device();
        let result = MlpConfig::new(2, vec![4])
            .with_normalize_input(Some(InputNormalization::ema(1.5, false)))
            .init::<TestBackend>(&device);
        assert!(result.is_err());
    }

    #[test]
    #[should_panic(expected = "Input dimension mismatch")]
    fn test_wrong_input_width_panics() {
        let device = get_device();
        let mlp: Mlp<TestBackend> = MlpConfig::new(3, vec![2]).init(&device).unwrap();
        mlp.forward(Tensor::zeros([1, 4], &device));
    }
}
