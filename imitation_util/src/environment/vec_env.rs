//! Environment registry and vectorized-environment construction.

use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

use rand::Rng;
use rayon::prelude::*;

use super::{CartPole, Env, EnvStep, Monitor, ResetMask, StepResult, TimeLimit, VectorizedEnv};
use crate::error::{Result, UtilError};
use crate::util::make_seeds;

/// Builds a fresh, unwrapped environment.
pub type EnvFactory = Arc<dyn Fn() -> Box<dyn Env> + Send + Sync>;

/// Wraps environment number `i`; applied after `TimeLimit` and `Monitor`.
pub type PostWrapper = Arc<dyn Fn(Box<dyn Env>, usize) -> Box<dyn Env> + Send + Sync>;

/// A registered environment.
#[derive(Clone)]
pub struct EnvSpec {
    /// Registry id, e.g. `"CartPole-v1"`.
    pub id: String,
    /// Default episode step limit.
    pub max_episode_steps: Option<usize>,
    factory: EnvFactory,
}

impl EnvSpec {
    /// Create a spec from an id, a default step limit and a constructor.
    pub fn new<F>(id: impl Into<String>, max_episode_steps: Option<usize>, factory: F) -> Self
    where
        F: Fn() -> Box<dyn Env> + Send + Sync + 'static,
    {
        Self {
            id: id.into(),
            max_episode_steps,
            factory: Arc::new(factory),
        }
    }

    /// Build a fresh unwrapped environment.
    pub fn make(&self) -> Box<dyn Env> {
        (self.factory)()
    }
}

impl fmt::Debug for EnvSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EnvSpec")
            .field("id", &self.id)
            .field("max_episode_steps", &self.max_episode_steps)
            .finish_non_exhaustive()
    }
}

/// Environments available to [`make_vec_env`], by id.
#[derive(Debug, Clone)]
pub struct EnvRegistry {
    specs: HashMap<String, EnvSpec>,
}

impl Default for EnvRegistry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register(EnvSpec::new("CartPole-v1", Some(500), || {
            Box::new(CartPole::new())
        }));
        registry
    }
}

impl EnvRegistry {
    /// Registry with the built-in environments.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with no environments.
    pub fn empty() -> Self {
        Self {
            specs: HashMap::new(),
        }
    }

    /// Add a spec, returning the one it replaces.
    pub fn register(&mut self, spec: EnvSpec) -> Option<EnvSpec> {
        self.specs.insert(spec.id.clone(), spec)
    }

    /// Look up a spec by id.
    pub fn spec(&self, id: &str) -> Result<&EnvSpec> {
        self.specs.get(id).ok_or_else(|| {
            UtilError::invalid("env_name", format!("no environment registered as '{}'", id))
        })
    }

    /// Whether `id` is registered.
    pub fn contains(&self, id: &str) -> bool {
        self.specs.contains_key(id)
    }

    /// Registered ids, sorted.
    pub fn ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.specs.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }
}

/// Configuration for [`make_vec_env`].
#[derive(Clone)]
pub struct VecEnvConfig {
    /// Number of environment copies.
    pub n_envs: usize,
    /// Step environments on the rayon thread pool.
    pub parallel: bool,
    /// Write monitor CSV files under `{log_dir}/monitor/`.
    pub log_dir: Option<PathBuf>,
    /// Episode step limit; overrides the spec's default.
    pub max_episode_steps: Option<usize>,
    /// Wrappers applied in order after `Monitor`.
    pub post_wrappers: Vec<PostWrapper>,
}

impl Default for VecEnvConfig {
    fn default() -> Self {
        Self {
            n_envs: 8,
            parallel: false,
            log_dir: None,
            max_episode_steps: None,
            post_wrappers: Vec::new(),
        }
    }
}

impl VecEnvConfig {
    /// Create a new config with default settings.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set number of environments.
    pub fn with_n_envs(mut self, n: usize) -> Self {
        self.n_envs = n;
        self
    }

    /// Enable parallel stepping.
    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    /// Set the monitor log directory.
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = Some(dir.into());
        self
    }

    /// Set the episode step limit.
    pub fn with_max_episode_steps(mut self, steps: usize) -> Self {
        self.max_episode_steps = Some(steps);
        self
    }

    /// Append a post-wrapper.
    pub fn with_post_wrapper<F>(mut self, wrapper: F) -> Self
    where
        F: Fn(Box<dyn Env>, usize) -> Box<dyn Env> + Send + Sync + 'static,
    {
        self.post_wrappers.push(Arc::new(wrapper));
        self
    }
}

impl fmt::Debug for VecEnvConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("VecEnvConfig")
            .field("n_envs", &self.n_envs)
            .field("parallel", &self.parallel)
            .field("log_dir", &self.log_dir)
            .field("max_episode_steps", &self.max_episode_steps)
            .field("post_wrappers", &self.post_wrappers.len())
            .finish()
    }
}

/// A batch of boxed environments stepped in lockstep.
pub struct VecEnv {
    envs: Vec<Box<dyn Env>>,
    observations: Vec<f32>,
    seeds: Vec<u32>,
    obs_size: usize,
    n_actions: usize,
    parallel: bool,
}

impl VecEnv {
    /// Collect already-built environments. Observations stay zero until reset.
    ///
    /// Fails if `envs` is empty or the environments disagree on their
    /// observation size.
    pub fn from_envs(envs: Vec<Box<dyn Env>>, parallel: bool) -> Result<Self> {
        let first = envs
            .first()
            .ok_or_else(|| UtilError::invalid("n_envs", "must be at least 1"))?;
        let obs_size = first.observation_size();
        let n_actions = first.num_actions();

        if let Some(other) = envs.iter().find(|e| e.observation_size() != obs_size) {
            return Err(UtilError::ShapeMismatch {
                expected: vec![obs_size],
                actual: vec![other.observation_size()],
            });
        }

        Ok(Self {
            observations: vec![0.0; envs.len() * obs_size],
            seeds: Vec::new(),
            envs,
            obs_size,
            n_actions,
            parallel,
        })
    }

    /// Seeds drawn by [`make_vec_env`], one per environment.
    pub fn seeds(&self) -> &[u32] {
        &self.seeds
    }

    /// Whether environments are stepped on the rayon pool.
    pub fn is_parallel(&self) -> bool {
        self.parallel
    }

    /// Reset every environment with its own seed.
    ///
    /// # Panics
    /// Panics if `seeds.len() != n_envs`.
    pub fn reset_with_seeds(&mut self, seeds: &[u64]) -> Vec<f32> {
        assert_eq!(seeds.len(), self.envs.len(), "One seed per environment");
        for (i, &seed) in seeds.iter().enumerate() {
            self.reset_single(i, Some(seed));
        }
        self.observations.clone()
    }

    /// Reset every environment without reseeding.
    pub fn reset(&mut self) -> Vec<f32> {
        for i in 0..self.envs.len() {
            self.reset_single(i, None);
        }
        self.observations.clone()
    }

    fn reset_single(&mut self, idx: usize, seed: Option<u64>) {
        let obs = self.envs[idx].reset(seed);
        self.observations[idx * self.obs_size..(idx + 1) * self.obs_size].copy_from_slice(&obs);
    }
}

impl VectorizedEnv for VecEnv {
    fn n_envs(&self) -> usize {
        self.envs.len()
    }

    fn obs_size(&self) -> usize {
        self.obs_size
    }

    fn n_actions(&self) -> usize {
        self.n_actions
    }

    fn write_observations(&self, buffer: &mut [f32]) {
        buffer.copy_from_slice(&self.observations);
    }

    fn step(&mut self, actions: &[f32]) -> StepResult {
        let n_envs = self.envs.len();
        assert!(
            !actions.is_empty() && actions.len() % n_envs == 0,
            "Expected an equal action chunk per environment, got {} values for {} envs",
            actions.len(),
            n_envs
        );
        let chunk = actions.len() / n_envs;

        let steps: Vec<EnvStep> = if self.parallel {
            self.envs
                .par_iter_mut()
                .zip(actions.par_chunks(chunk))
                .map(|(env, action)| env.step(action))
                .collect()
        } else {
            self.envs
                .iter_mut()
                .zip(actions.chunks(chunk))
                .map(|(env, action)| env.step(action))
                .collect()
        };

        let result = StepResult::from_steps(steps);
        self.observations.copy_from_slice(&result.observations);
        result
    }

    fn reset_envs(&mut self, mask: &ResetMask, seed: u64) {
        for (i, &reset) in mask.as_slice().iter().enumerate() {
            if reset {
                self.reset_single(i, Some(seed.wrapping_add(i as u64)));
            }
        }
    }

    fn reset_all(&mut self, seed: u64) {
        for i in 0..self.envs.len() {
            self.reset_single(i, Some(seed.wrapping_add(i as u64)));
        }
    }
}

/// Build `config.n_envs` seeded copies of the registered environment `env_name`.
///
/// Each copy is wrapped, innermost first, in a [`TimeLimit`] (the config's
/// `max_episode_steps`, else the spec's), a [`Monitor`] (writing
/// `{log_dir}/monitor/mon{i:03}.monitor.csv` when `log_dir` is set), and then
/// each post-wrapper in order. Every copy is reset with its own seed from
/// [`make_seeds`], so the result is reproducible for a fixed `rng` state.
///
/// # Errors
/// - `InvalidArgument` if `env_name` is not registered or `n_envs` is 0
/// - `Io` if the monitor directory or files cannot be created
pub fn make_vec_env<R: Rng + ?Sized>(
    registry: &EnvRegistry,
    env_name: &str,
    rng: &mut R,
    config: VecEnvConfig,
) -> Result<VecEnv> {
    let spec = registry.spec(env_name)?;
    if config.n_envs == 0 {
        return Err(UtilError::invalid("n_envs", "must be at least 1"));
    }

    let max_episode_steps = match (config.max_episode_steps, spec.max_episode_steps) {
        (Some(requested), Some(default)) if requested != default => {
            log::warn!(
                "Overriding {} step limit: {} -> {}",
                spec.id,
                default,
                requested
            );
            Some(requested)
        }
        (requested, default) => requested.or(default),
    };

    let monitor_dir = match &config.log_dir {
        Some(dir) => {
            let dir = dir.join("monitor");
            std::fs::create_dir_all(&dir)?;
            Some(dir)
        }
        None => None,
    };

    let seeds = make_seeds(rng, config.n_envs);

    let build = |i: usize| -> Result<Box<dyn Env>> {
        let mut env = spec.make();
        if let Some(limit) = max_episode_steps {
            env = Box::new(TimeLimit::new(env, limit));
        }
        env = match &monitor_dir {
            Some(dir) => {
                let path = dir.join(format!("mon{:03}.monitor.csv", i));
                Box::new(Monitor::with_log_file(env, path, &spec.id)?)
            }
            None => Box::new(Monitor::new(env)),
        };
        for wrapper in &config.post_wrappers {
            env = wrapper(env, i);
        }
        Ok(env)
    };

    let envs: Vec<Box<dyn Env>> = if config.parallel {
        (0..config.n_envs).into_par_iter().map(build).collect::<Result<_>>()?
    } else {
        (0..config.n_envs).map(build).collect::<Result<_>>()?
    };

    let mut vec_env = VecEnv::from_envs(envs, config.parallel)?;
    let env_seeds: Vec<u64> = seeds.iter().map(|&s| s as u64).collect();
    vec_env.reset_with_seeds(&env_seeds);
    vec_env.seeds = seeds;

    log::debug!(
        "Built {} x {} (parallel={}, max_episode_steps={:?})",
        vec_env.n_envs(),
        spec.id,
        config.parallel,
        max_episode_steps
    );

    Ok(vec_env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use rand::SeedableRng;
    use rand_xoshiro::Xoshiro256StarStar;

    fn rng(seed: u64) -> Xoshiro256StarStar {
        Xoshiro256StarStar::seed_from_u64(seed)
    }

    #[test]
    fn test_make_vec_env_cartpole() {
        let registry = EnvRegistry::new();
        let env = make_vec_env(
            &registry,
            "CartPole-v1",
            &mut rng(0),
            VecEnvConfig::new().with_n_envs(4),
        )
        .unwrap();

        assert_eq!(env.n_envs(), 4);
        assert_eq!(env.obs_size(), 4);
        assert_eq!(env.n_actions(), 2);
        assert_eq!(env.seeds().len(), 4);

        let obs = env.get_observations();
        assert_eq!(obs.len(), 16);
        assert!(obs.iter().all(|v| v.abs() <= 0.05));
        // distinct seeds give distinct starting states
        assert_ne!(obs[0..4], obs[4..8]);
    }

    #[test]
    fn test_make_vec_env_reproducible() {
        let registry = EnvRegistry::new();
        let config = VecEnvConfig::new().with_n_envs(3);
        let a = make_vec_env(&registry, "CartPole-v1", &mut rng(5), config.clone()).unwrap();
        let b = make_vec_env(&registry, "CartPole-v1", &mut rng(5), config).unwrap();
        assert_eq!(a.seeds(), b.seeds());
        assert_eq!(a.get_observations(), b.get_observations());
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let registry = EnvRegistry::new();
        let mut seq = make_vec_env(
            &registry,
            "CartPole-v1",
            &mut rng(9),
            VecEnvConfig::new().with_n_envs(4),
        )
        .unwrap();
        let mut par = make_vec_env(
            &registry,
            "CartPole-v1",
            &mut rng(9),
            VecEnvConfig::new().with_n_envs(4).with_parallel(true),
        )
        .unwrap();
        assert!(par.is_parallel());

        let actions = [1.0, 0.0, 1.0, 0.0];
        for _ in 0..5 {
            let a = seq.step(&actions);
            let b = par.step(&actions);
            assert_eq!(a.observations, b.observations);
            assert_eq!(a.rewards, b.rewards);
        }
    }

    #[test]
    fn test_explicit_step_limit_wins() {
        let registry = EnvRegistry::new();
        let mut env = make_vec_env(
            &registry,
            "CartPole-v1",
            &mut rng(1),
            VecEnvConfig::new().with_n_envs(2).with_max_episode_steps(3),
        )
        .unwrap();

        // alternating pushes keep the pole up for three steps
        let mut result = env.step(&[1.0, 1.0]);
        assert!(!result.truncations.iter().any(|&t| t));
        env.step(&[0.0, 0.0]);
        result = env.step(&[1.0, 1.0]);
        assert_eq!(result.truncations, vec![true, true]);

        let mask = ResetMask::from_step_result(&result);
        env.reset_envs(&mask, 0);
        let result = env.step(&[0.0, 0.0]);
        assert_eq!(result.truncations, vec![false, false]);
    }

    #[test]
    fn test_reset_seed_offsets_wrap() {
        let registry = EnvRegistry::new();
        let config = VecEnvConfig::new().with_n_envs(3);
        let mut wrapped = make_vec_env(&registry, "CartPole-v1", &mut rng(2), config.clone()).unwrap();
        let mut explicit = make_vec_env(&registry, "CartPole-v1", &mut rng(2), config).unwrap();

        wrapped.reset_all(u64::MAX);
        let expected = explicit.reset_with_seeds(&[u64::MAX, 0, 1]);
        assert_eq!(wrapped.get_observations(), expected);

        // env 2 gets u64::MAX + 2, i.e. seed 1 again
        wrapped.reset_envs(&ResetMask::from_dones(&[false, false, true]), u64::MAX);
        assert_eq!(wrapped.get_observations(), expected);
    }

    #[test]
    fn test_unknown_env_rejected() {
        let registry = EnvRegistry::new();
        let result = make_vec_env(&registry, "Nope-v0", &mut rng(0), VecEnvConfig::new());
        assert!(matches!(
            result,
            Err(UtilError::InvalidArgument { param: "env_name", .. })
        ));
    }

    #[test]
    fn test_zero_envs_rejected() {
        let registry = EnvRegistry::new();
        let result = make_vec_env(
            &registry,
            "CartPole-v1",
            &mut rng(0),
            VecEnvConfig::new().with_n_envs(0),
        );
        assert!(matches!(
            result,
            Err(UtilError::InvalidArgument { param: "n_envs", .. })
        ));
    }

    #[test]
    fn test_monitor_files_written() {
        let dir = tempfile::tempdir().unwrap();
        let registry = EnvRegistry::new();
        let mut env = make_vec_env(
            &registry,
            "CartPole-v1",
            &mut rng(0),
            VecEnvConfig::new()
                .with_n_envs(3)
                .with_log_dir(dir.path())
                .with_max_episode_steps(2),
        )
        .unwrap();

        env.step(&[1.0, 0.0, 1.0]);
        env.step(&[0.0, 1.0, 0.0]);
        drop(env);

        for i in 0..3 {
            let path = dir.path().join("monitor").join(format!("mon{:03}.monitor.csv", i));
            let content = std::fs::read_to_string(&path).unwrap();
            let lines: Vec<&str> = content.lines().collect();
            assert_eq!(lines.len(), 3, "{}", content);
            assert!(lines[0].contains("CartPole-v1"));
            assert!(lines[2].starts_with("2.000000,2,"));
        }
    }

    #[test]
    fn test_post_wrappers_see_each_index() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_by_wrapper = Arc::clone(&seen);

        let registry = EnvRegistry::new();
        let config = VecEnvConfig::new()
            .with_n_envs(3)
            .with_post_wrapper(move |env, i| {
                seen_by_wrapper.lock().push(i);
                env
            })
            .with_post_wrapper(|env, _| Box::new(TimeLimit::new(env, 1)) as Box<dyn Env>);

        let mut env = make_vec_env(&registry, "CartPole-v1", &mut rng(0), config).unwrap();
        assert_eq!(*seen.lock(), vec![0, 1, 2]);

        // outermost wrapper truncates after one step
        let result = env.step(&[0.0, 0.0, 0.0]);
        assert_eq!(result.truncations, vec![true, true, true]);
    }

    #[test]
    fn test_custom_registration() {
        let mut registry = EnvRegistry::empty();
        assert!(!registry.contains("CartPole-v1"));

        registry.register(EnvSpec::new("ShortPole-v0", Some(10), || {
            Box::new(CartPole::new())
        }));
        assert_eq!(registry.ids(), vec!["ShortPole-v0"]);

        let env = make_vec_env(
            &registry,
            "ShortPole-v0",
            &mut rng(0),
            VecEnvConfig::new().with_n_envs(1),
        )
        .unwrap();
        assert_eq!(env.n_envs(), 1);
    }

    #[test]
    fn test_from_envs_rejects_empty() {
        assert!(VecEnv::from_envs(Vec::new(), false).is_err());
    }
}
