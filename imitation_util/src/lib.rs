//! # imitation_util: building blocks for imitation learning
//!
//! Numeric utilities shared by imitation-learning algorithms written on
//! [`burn`].
//!
//! ## Components
//!
//! - **Input normalization** ([`normalization`]): layers that normalize inputs
//!   with running statistics. [`RunningNorm`] weights every sample equally;
//!   [`EmaNorm`] decays old samples exponentially.
//! - **MLP builder** ([`nn`]): [`MlpConfig`] assembles dense layers,
//!   activations, dropout and optional input normalization into an [`Mlp`].
//! - **Vectorized environments** ([`environment`]): [`make_vec_env`] builds
//!   seeded, time-limited, monitored copies of a registered environment.
//! - **Utilities** ([`util`]): sum-preserving rounding ([`oric`]), chunked
//!   tensor norms ([`tensor_iter_norm`]), k-NN state entropy
//!   ([`compute_state_entropy`]), seeds ([`make_seeds`]) and endless
//!   iteration ([`endless_iter`]).
//!
//! ## Usage
//!
//! ```rust,ignore
//! use imitation_util::{InputNormalization, MlpConfig, RunningNorm};
//!
//! let mut norm = RunningNorm::new(obs_dim);
//! let normalized = norm.forward(obs)?;
//!
//! let reward_net = MlpConfig::new(obs_dim, vec![32, 32])
//!     .with_squeeze_output(true)
//!     .with_normalize_input(Some(InputNormalization::running()))
//!     .init::<B>(&device)?;
//! ```
//!
//! ## Logging
//!
//! Events go through the [`log`] facade; install any logger to see them.

pub mod core;
pub mod environment;
pub mod error;
pub mod nn;
pub mod normalization;
pub mod util;

// Re-export commonly used types
pub use error::{Result, UtilError};

pub use crate::core::{Cumulative, ExponentialDecay, NormRule, NormalizerState, UpdateRule};
pub use normalization::{
    EmaNorm, InputNorm, NormConfig, Normalizer, RunningNorm, SharedNormalizer,
    TrainingModeGuard,
};

pub use nn::{Activation, InputNormalization, Mlp, MlpConfig};

pub use environment::{
    make_vec_env, CartPole, Env, EnvRegistry, EnvSpec, EnvStep, Monitor, ResetMask, StepResult,
    TimeLimit, VecEnv, VecEnvConfig, VectorizedEnv,
};

pub use util::{
    compute_state_entropy, endless_iter, get_first_iter_element, make_seed, make_seeds,
    make_unique_timestamp, oric, tensor_iter_norm, tensor_norm, vector_norm, NormOrder,
    STATE_ENTROPY_BATCH_SIZE,
};
