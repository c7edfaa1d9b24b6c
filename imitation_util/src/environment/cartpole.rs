//! Classic CartPole balancing task.

use rand::{Rng, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;

use super::{Env, EnvStep};

const GRAVITY: f32 = 9.8;
const CART_MASS: f32 = 1.0;
const POLE_MASS: f32 = 0.1;
const POLE_LENGTH: f32 = 0.5;
const FORCE_MAG: f32 = 10.0;
const DT: f32 = 0.02;
const X_THRESHOLD: f32 = 2.4;
const THETA_THRESHOLD: f32 = 12.0 * std::f32::consts::PI / 180.0;
const INIT_RANGE: f32 = 0.05;

/// Cart-pole with two discrete actions (0 pushes left, 1 pushes right).
///
/// Observation is `[x, x_dot, theta, theta_dot]`. Reward is 1 for every step
/// that does not end the episode. The environment itself never truncates;
/// wrap it in a [`TimeLimit`](super::TimeLimit) for that.
#[derive(Debug, Clone)]
pub struct CartPole {
    state: [f32; 4],
    rng: Xoshiro256StarStar,
}

impl CartPole {
    /// Create a new environment. Call `reset` before stepping.
    pub fn new() -> Self {
        Self {
            state: [0.0; 4],
            rng: Xoshiro256StarStar::seed_from_u64(0),
        }
    }

    /// Current `[x, x_dot, theta, theta_dot]`.
    pub fn state(&self) -> [f32; 4] {
        self.state
    }

    fn random_uniform(&mut self, low: f32, high: f32) -> f32 {
        self.rng.gen::<f32>() * (high - low) + low
    }
}

impl Default for CartPole {
    fn default() -> Self {
        Self::new()
    }
}

impl Env for CartPole {
    fn observation_size(&self) -> usize {
        4
    }

    fn num_actions(&self) -> usize {
        2
    }

    fn reset(&mut self, seed: Option<u64>) -> Vec<f32> {
        if let Some(seed) = seed {
            self.rng = Xoshiro256StarStar::seed_from_u64(seed);
        }
        for i in 0..4 {
            self.state[i] = self.random_uniform(-INIT_RANGE, INIT_RANGE);
        }
        self.state.to_vec()
    }

    fn step(&mut self, action: &[f32]) -> EnvStep {
        let action = action.first().copied().unwrap_or(0.0);
        let force = if action as i32 == 1 { FORCE_MAG } else { -FORCE_MAG };

        let [x, x_dot, theta, theta_dot] = self.state;
        let cos_theta = theta.cos();
        let sin_theta = theta.sin();

        let total_mass = CART_MASS + POLE_MASS;
        let pole_mass_length = POLE_MASS * POLE_LENGTH;

        let temp = (force + pole_mass_length * theta_dot * theta_dot * sin_theta) / total_mass;
        let denom = POLE_LENGTH * (4.0 / 3.0 - POLE_MASS * cos_theta * cos_theta / total_mass);
        let theta_acc = (GRAVITY * sin_theta - cos_theta * temp) / denom.max(1e-6);
        let x_acc = temp - pole_mass_length * theta_acc * cos_theta / total_mass;

        self.state = [
            x + DT * x_dot,
            x_dot + DT * x_acc,
            theta + DT * theta_dot,
            theta_dot + DT * theta_acc,
        ];

        let terminated = self.state[0].abs() > X_THRESHOLD || self.state[2].abs() > THETA_THRESHOLD;

        EnvStep {
            observation: self.state.to_vec(),
            reward: 1.0,
            terminated,
            truncated: false,
        }
    }
}
