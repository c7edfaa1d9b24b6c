//! Environment wrappers: episode time limits and episode monitoring.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::time::Instant;

use serde::{Deserialize, Serialize};

use super::{Env, EnvStep};
use crate::error::Result;

/// Truncates episodes after a fixed number of steps.
#[derive(Debug, Clone)]
pub struct TimeLimit<E> {
    env: E,
    max_episode_steps: usize,
    elapsed_steps: usize,
}

impl<E: Env> TimeLimit<E> {
    /// Wrap `env` with a step limit.
    pub fn new(env: E, max_episode_steps: usize) -> Self {
        Self {
            env,
            max_episode_steps,
            elapsed_steps: 0,
        }
    }

    /// Step limit.
    pub fn max_episode_steps(&self) -> usize {
        self.max_episode_steps
    }

    /// Steps taken in the current episode.
    pub fn elapsed_steps(&self) -> usize {
        self.elapsed_steps
    }

    /// Get a reference to the wrapped environment.
    pub fn inner(&self) -> &E {
        &self.env
    }
}

impl<E: Env> Env for TimeLimit<E> {
    fn observation_size(&self) -> usize {
        self.env.observation_size()
    }

    fn num_actions(&self) -> usize {
        self.env.num_actions()
    }

    fn reset(&mut self, seed: Option<u64>) -> Vec<f32> {
        self.elapsed_steps = 0;
        self.env.reset(seed)
    }

    fn step(&mut self, action: &[f32]) -> EnvStep {
        let mut step = self.env.step(action);
        self.elapsed_steps += 1;
        if self.elapsed_steps >= self.max_episode_steps {
            step.truncated = true;
        }
        step
    }
}

/// Statistics of one finished episode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EpisodeStats {
    /// Sum of rewards.
    pub reward: f64,
    /// Number of steps.
    pub length: usize,
    /// Seconds since the monitor was created.
    pub time: f64,
}

/// Records return, length and wall time of every episode.
///
/// With a log file, each finished episode is appended as a CSV row
/// `r,l,t` below a `#{"env_id": ..., "t_start": ...}` comment line.
pub struct Monitor<E> {
    env: E,
    writer: Option<BufWriter<File>>,
    start_time: Instant,
    current_rewards: Vec<f32>,
    episodes: Vec<EpisodeStats>,
    total_steps: u64,
}

impl<E: Env> Monitor<E> {
    /// Monitor in memory only.
    pub fn new(env: E) -> Self {
        Self {
            env,
            writer: None,
            start_time: Instant::now(),
            current_rewards: Vec::new(),
            episodes: Vec::new(),
            total_steps: 0,
        }
    }

    /// Monitor and append episodes to the CSV file at `path`.
    pub fn with_log_file(env: E, path: impl AsRef<Path>, env_id: &str) -> Result<Self> {
        let file = File::create(path)?;
        let mut writer = BufWriter::new(file);

        let t_start = chrono::Utc::now().timestamp_micros() as f64 / 1e6;
        let header = serde_json::json!({ "t_start": t_start, "env_id": env_id });
        writeln!(writer, "#{}", header)?;
        writeln!(writer, "r,l,t")?;
        writer.flush()?;

        let mut monitor = Self::new(env);
        monitor.writer = Some(writer);
        Ok(monitor)
    }

    /// Finished episodes, oldest first.
    pub fn episodes(&self) -> &[EpisodeStats] {
        &self.episodes
    }

    /// Returns of finished episodes.
    pub fn episode_rewards(&self) -> Vec<f64> {
        self.episodes.iter().map(|e| e.reward).collect()
    }

    /// Lengths of finished episodes.
    pub fn episode_lengths(&self) -> Vec<usize> {
        self.episodes.iter().map(|e| e.length).collect()
    }

    /// Steps taken across all episodes.
    pub fn total_steps(&self) -> u64 {
        self.total_steps
    }

    /// Get a reference to the wrapped environment.
    pub fn inner(&self) -> &E {
        &self.env
    }

    fn finish_episode(&mut self) {
        let stats = EpisodeStats {
            reward: self.current_rewards.iter().map(|&r| r as f64).sum(),
            length: self.current_rewards.len(),
            time: self.start_time.elapsed().as_secs_f64(),
        };

        if let Some(writer) = &mut self.writer {
            let written = writeln!(writer, "{:.6},{},{:.6}", stats.reward, stats.length, stats.time)
                .and_then(|_| writer.flush());
            if let Err(e) = written {
                log::warn!("Failed to write monitor row: {}", e);
            }
        }

        self.episodes.push(stats);
        self.current_rewards.clear();
    }
}

impl<E: Env> Env for Monitor<E> {
    fn observation_size(&self) -> usize {
        self.env.observation_size()
    }

    fn num_actions(&self) -> usize {
        self.env.num_actions()
    }

    fn reset(&mut self, seed: Option<u64>) -> Vec<f32> {
        self.current_rewards.clear();
        self.env.reset(seed)
    }

    fn step(&mut self, action: &[f32]) -> EnvStep {
        let step = self.env.step(action);
        self.current_rewards.push(step.reward);
        self.total_steps += 1;
        if step.done() {
            self.finish_episode();
        }
        step
    }
}

impl<E> Drop for Monitor<E> {
    fn drop(&mut self) {
        if let Some(writer) = &mut self.writer {
            let _ = writer.flush();
        }
    }
}
