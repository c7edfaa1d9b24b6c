//! Small numeric and iteration utilities.

pub mod entropy;
pub mod iter;
pub mod norm;
pub mod rounding;
pub mod seeds;

pub use entropy::{compute_state_entropy, STATE_ENTROPY_BATCH_SIZE};
pub use iter::{endless_iter, get_first_iter_element};
pub use norm::{tensor_iter_norm, tensor_norm, vector_norm, NormOrder};
pub use rounding::oric;
pub use seeds::{make_seed, make_seeds, make_unique_timestamp, MAX_SEED};
