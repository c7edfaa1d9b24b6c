//! Environment abstraction and vectorized-environment construction.
//!
//! A single environment implements [`Env`]. [`make_vec_env`] builds `n_envs`
//! copies of a registered environment, wraps each one with [`TimeLimit`],
//! [`Monitor`] and any caller-supplied wrappers, seeds it, and collects the
//! result in a [`VecEnv`] behind the [`VectorizedEnv`] interface.

mod cartpole;
mod vec_env;
mod wrappers;

pub use cartpole::CartPole;
pub use vec_env::{make_vec_env, EnvFactory, EnvRegistry, EnvSpec, PostWrapper, VecEnv, VecEnvConfig};
pub use wrappers::{EpisodeStats, Monitor, TimeLimit};

/// Outcome of stepping a single environment.
#[derive(Debug, Clone, PartialEq)]
pub struct EnvStep {
    /// Observation after the step [obs_size]
    pub observation: Vec<f32>,
    /// Reward received
    pub reward: f32,
    /// Episode ended due to goal/failure
    pub terminated: bool,
    /// Episode ended due to time limit
    pub truncated: bool,
}

impl EnvStep {
    /// Terminal OR truncated.
    pub fn done(&self) -> bool {
        self.terminated || self.truncated
    }
}

/// A single environment.
///
/// Actions are passed as `f32` slices; discrete environments read the action
/// index from the first element.
pub trait Env: Send {
    /// Size of the observation vector.
    fn observation_size(&self) -> usize;

    /// Number of discrete actions.
    fn num_actions(&self) -> usize;

    /// Start a new episode and return the first observation.
    ///
    /// `Some(seed)` reseeds the environment's random generator; `None`
    /// continues from its current state.
    fn reset(&mut self, seed: Option<u64>) -> Vec<f32>;

    /// Advance one step. Does not auto-reset on episode end.
    fn step(&mut self, action: &[f32]) -> EnvStep;
}

impl<E: Env + ?Sized> Env for Box<E> {
    fn observation_size(&self) -> usize {
        (**self).observation_size()
    }

    fn num_actions(&self) -> usize {
        (**self).num_actions()
    }

    fn reset(&mut self, seed: Option<u64>) -> Vec<f32> {
        (**self).reset(seed)
    }

    fn step(&mut self, action: &[f32]) -> EnvStep {
        (**self).step(action)
    }
}

/// Result from stepping vectorized environments.
#[derive(Debug, Clone)]
pub struct StepResult {
    /// Observations after step [n_envs * obs_size] (flattened)
    pub observations: Vec<f32>,
    /// Rewards received [n_envs]
    pub rewards: Vec<f32>,
    /// Terminal flags [n_envs]
    pub terminals: Vec<bool>,
    /// Truncation flags [n_envs]
    pub truncations: Vec<bool>,
}

impl StepResult {
    /// Gather per-env steps into flattened buffers.
    pub fn from_steps(steps: Vec<EnvStep>) -> Self {
        let n = steps.len();
        let mut result = Self {
            observations: Vec::new(),
            rewards: Vec::with_capacity(n),
            terminals: Vec::with_capacity(n),
            truncations: Vec::with_capacity(n),
        };
        for step in steps {
            result.observations.extend_from_slice(&step.observation);
            result.rewards.push(step.reward);
            result.terminals.push(step.terminated);
            result.truncations.push(step.truncated);
        }
        result
    }

    /// Get done flags (terminal OR truncated).
    pub fn dones(&self) -> Vec<bool> {
        self.terminals
            .iter()
            .zip(self.truncations.iter())
            .map(|(&t, &tr)| t || tr)
            .collect()
    }
}

/// Mask indicating which environments need reset.
#[derive(Debug, Clone)]
pub struct ResetMask {
    mask: Vec<bool>,
}

impl ResetMask {
    /// Create from done flags.
    pub fn from_dones(dones: &[bool]) -> Self {
        Self {
            mask: dones.to_vec(),
        }
    }

    /// Create from step result.
    pub fn from_step_result(result: &StepResult) -> Self {
        Self::from_dones(&result.dones())
    }

    /// Check if any environment needs reset.
    pub fn any(&self) -> bool {
        self.mask.iter().any(|&x| x)
    }

    /// Get the underlying mask.
    pub fn as_slice(&self) -> &[bool] {
        &self.mask
    }

    /// Number of environments that need reset.
    pub fn count(&self) -> usize {
        self.mask.iter().filter(|&&x| x).count()
    }
}

/// A batch of environments stepped together.
pub trait VectorizedEnv: Send {
    /// Number of environments.
    fn n_envs(&self) -> usize;

    /// Size of observation vector for a single environment.
    fn obs_size(&self) -> usize;

    /// Number of discrete actions.
    fn n_actions(&self) -> usize;

    /// Write current observations to buffer.
    ///
    /// Buffer must have size `n_envs * obs_size`, laid out as
    /// `[env0_obs, env1_obs, ...]`.
    fn write_observations(&self, buffer: &mut [f32]);

    /// Step all environments. `actions` holds one equally sized chunk per env.
    ///
    /// Finished environments are not reset; call `reset_envs`.
    fn step(&mut self, actions: &[f32]) -> StepResult;

    /// Reset the environments selected by `mask`; env `i` gets `seed + i`.
    fn reset_envs(&mut self, mask: &ResetMask, seed: u64);

    /// Reset all environments; env `i` gets `seed + i`.
    fn reset_all(&mut self, seed: u64);

    /// Get current observations as a new vector.
    fn get_observations(&self) -> Vec<f32> {
        let mut buffer = vec![0.0f32; self.n_envs() * self.obs_size()];
        self.write_observations(&mut buffer);
        buffer
    }
}
