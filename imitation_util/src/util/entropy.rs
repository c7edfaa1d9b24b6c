//! k-nearest-neighbour state entropy.

use burn::prelude::*;

use crate::error::{Result, UtilError};

/// Reference rows compared against the queries at a time.
pub const STATE_ENTROPY_BATCH_SIZE: usize = 500;

/// Distance from each observation in `obs` to its k-th nearest neighbour in
/// `all_obs`, a proxy for the local state entropy.
///
/// Distances are Euclidean over every non-batch axis. The `(k + 1)`-th
/// smallest distance is returned so that, when `obs` is drawn from `all_obs`,
/// each query's zero distance to itself is skipped.
///
/// Reference rows are processed [`STATE_ENTROPY_BATCH_SIZE`] at a time to bound
/// the size of the pairwise difference tensor. The result is detached from
/// any autodiff graph.
///
/// # Errors
/// - `ShapeMismatch` if the non-batch shapes of `obs` and `all_obs` differ
/// - `InvalidArgument` if the tensors have no non-batch axis, or if
///   `all_obs` has fewer than `k + 1` rows
pub fn compute_state_entropy<B: Backend, const D: usize>(
    obs: Tensor<B, D>,
    all_obs: Tensor<B, D>,
    k: usize,
) -> Result<Tensor<B, 1>> {
    if D < 2 {
        return Err(UtilError::invalid(
            "obs",
            "observations need a batch axis and at least one feature axis",
        ));
    }

    let obs_dims = obs.dims();
    let all_dims = all_obs.dims();
    if obs_dims[1..] != all_dims[1..] {
        return Err(UtilError::ShapeMismatch {
            expected: all_dims[1..].to_vec(),
            actual: obs_dims[1..].to_vec(),
        });
    }

    let n_obs = obs_dims[0];
    let n_all = all_dims[0];
    if k + 1 > n_all {
        return Err(UtilError::invalid(
            "k",
            format!("need at least {} reference observations, got {}", k + 1, n_all),
        ));
    }

    let obs: Tensor<B, 2> = obs.detach().flatten(1, D - 1);
    let all_obs: Tensor<B, 2> = all_obs.detach().flatten(1, D - 1);
    let [_, features] = obs.dims();

    let mut dists = Vec::with_capacity(n_all.div_ceil(STATE_ENTROPY_BATCH_SIZE));
    for start in (0..n_all).step_by(STATE_ENTROPY_BATCH_SIZE) {
        let end = (start + STATE_ENTROPY_BATCH_SIZE).min(n_all);
        let chunk_len = end - start;

        let reference = all_obs
            .clone()
            .slice([start..end, 0..features])
            .unsqueeze_dim::<3>(0)
            .repeat_dim(0, n_obs);
        let queries = obs.clone().unsqueeze_dim::<3>(1).repeat_dim(1, chunk_len);

        let diff = queries - reference;
        let distances = (diff.clone() * diff)
            .sum_dim(2)
            .sqrt()
            .reshape([n_obs, chunk_len]);
        dists.push(distances);
    }

    let all_dists = Tensor::cat(dists, 1).sort(1);
    Ok(all_dists.slice([0..n_obs, k..k + 1]).reshape([n_obs]))
}
