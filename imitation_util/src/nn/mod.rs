//! Neural network building blocks.

mod mlp;

pub use mlp::{Activation, InputNormalization, Mlp, MlpConfig};
