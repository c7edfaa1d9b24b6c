//! Seed and run-identifier generation.

use rand::Rng;

/// Largest seed produced by [`make_seed`], `2^31 - 2`.
pub const MAX_SEED: u32 = (1 << 31) - 2;

/// Draw one seed uniformly from `[0, MAX_SEED]`.
pub fn make_seed<R: Rng + ?Sized>(rng: &mut R) -> u32 {
    rng.gen_range(0..=MAX_SEED)
}

/// Draw `n` independent seeds uniformly from `[0, MAX_SEED]`.
///
/// Reproducible for a fixed generator state.
pub fn make_seeds<R: Rng + ?Sized>(rng: &mut R, n: usize) -> Vec<u32> {
    (0..n).map(|_| make_seed(rng)).collect()
}

/// Local timestamp with a short random suffix, e.g. `20240131_142501_3fa9c2`.
pub fn make_unique_timestamp() -> String {
    let timestamp = chrono::Local::now().format("%Y%m%d_%H%M%S");
    let suffix = uuid::Uuid::new_v4().simple().to_string();
    format!("{}_{}", timestamp, &suffix[..6])
}
