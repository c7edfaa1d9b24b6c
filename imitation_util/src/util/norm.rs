//! Lp norms over slices, tensors and streams of tensor chunks.
//!
//! The norm of a concatenation equals the norm of the per-chunk norms:
//! `‖[x, y]‖_p = ‖(‖x‖_p, ‖y‖_p)‖_p`. This lets [`tensor_iter_norm`] compute the
//! norm of a large vector, e.g. every parameter of a network, without ever
//! materializing it.

use burn::prelude::*;
use serde::{Deserialize, Serialize};

use crate::error::{Result, UtilError};

/// Order of an Lp norm. Any non-zero real, including ±∞.
///
/// `∞` is the largest absolute value, `-∞` the smallest.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NormOrder(f64);

impl NormOrder {
    /// Manhattan norm.
    pub const L1: NormOrder = NormOrder(1.0);
    /// Euclidean norm.
    pub const L2: NormOrder = NormOrder(2.0);
    /// Max-abs norm.
    pub const INF: NormOrder = NormOrder(f64::INFINITY);
    /// Min-abs norm.
    pub const NEG_INF: NormOrder = NormOrder(f64::NEG_INFINITY);

    /// Validate a norm order. Rejects 0 and NaN.
    pub fn new(ord: f64) -> Result<Self> {
        if ord == 0.0 {
            return Err(UtilError::invalid(
                "ord",
                "cannot compute p-norms for p=0",
            ));
        }
        if ord.is_nan() {
            return Err(UtilError::invalid("ord", "norm order must not be NaN"));
        }
        Ok(Self(ord))
    }

    /// Raw order value.
    pub fn value(self) -> f64 {
        self.0
    }
}

impl Default for NormOrder {
    fn default() -> Self {
        Self::L2
    }
}

impl TryFrom<f64> for NormOrder {
    type Error = UtilError;

    fn try_from(ord: f64) -> Result<Self> {
        Self::new(ord)
    }
}

/// Lp norm of a slice.
pub fn vector_norm(values: &[f64], ord: NormOrder) -> f64 {
    let p = ord.value();
    if p == f64::INFINITY {
        values.iter().fold(0.0, |acc, x| acc.max(x.abs()))
    } else if p == f64::NEG_INFINITY {
        values.iter().fold(f64::INFINITY, |acc, x| acc.min(x.abs()))
    } else if p == 1.0 {
        values.iter().map(|x| x.abs()).sum()
    } else if p == 2.0 {
        values.iter().map(|x| x * x).sum::<f64>().sqrt()
    } else {
        values
            .iter()
            .map(|x| x.abs().powf(p))
            .sum::<f64>()
            .powf(1.0 / p)
    }
}

/// Lp norm of all elements of a tensor, flattened.
pub fn tensor_norm<B: Backend, const D: usize>(tensor: Tensor<B, D>, ord: NormOrder) -> f64 {
    let values: Vec<f64> = tensor.into_data().iter::<f64>().collect();
    vector_norm(&values, ord)
}

/// Lp norm of the concatenation of a stream of tensors.
///
/// Each chunk is reduced to its own norm and the result is the norm of those
/// chunk norms. Fails if `ord` is 0 or NaN.
pub fn tensor_iter_norm<B, const D: usize, I>(tensors: I, ord: f64) -> Result<f64>
where
    B: Backend,
    I: IntoIterator<Item = Tensor<B, D>>,
{
    let ord = NormOrder::new(ord)?;
    let norms: Vec<f64> = tensors
        .into_iter()
        .map(|tensor| tensor_norm(tensor, ord))
        .collect();
    Ok(vector_norm(&norms, ord))
}
