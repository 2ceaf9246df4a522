//! Configuration for the dispatch server.
//!
//! Loaded from a JSON document rather than TOML/YAML, matching the shape
//! the router's original implementation persists to disk.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

/// One configured compute node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComputeNodeConfig {
    pub model: String,
    pub token: String,
    #[serde(rename = "maxConcurrency")]
    pub max_concurrency: i64,
}

/// One configured API user. `rate_limit_per_hour` and `system_prompt` are
/// parsed and kept on `Config` but nothing in this service currently reads
/// them back out — rate limiting and per-user system prompts are out of
/// scope for the dispatch router itself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserConfig {
    pub token: String,
    #[serde(rename = "rateLimitPerHour", default)]
    pub rate_limit_per_hour: u32,
    #[serde(rename = "systemPrompt", default)]
    pub system_prompt: String,
}

/// Top-level configuration document, persisted as `config.json` by default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(rename = "apiHost")]
    pub api_host: String,
    #[serde(rename = "wsHost")]
    pub ws_host: String,
    #[serde(rename = "computeNodes")]
    pub compute_nodes: HashMap<String, ComputeNodeConfig>,
    #[serde(rename = "apiUsers")]
    pub api_users: HashMap<String, UserConfig>,
    /// Seconds a task may sit parked waiting for capacity before it's
    /// failed with `"timeout"`.
    #[serde(rename = "taskMaxPendingTime", default = "default_task_max_pending_time")]
    pub task_max_pending_time: u64,
}

fn default_task_max_pending_time() -> u64 {
    30
}

impl Config {
    pub fn task_max_pending_time(&self) -> Duration {
        Duration::from_secs(self.task_max_pending_time)
    }

    fn first_run() -> Config {
        let mut compute_nodes = HashMap::new();
        compute_nodes.insert(
            "first-node".to_string(),
            ComputeNodeConfig {
                model: "openbuddy-7b".to_string(),
                token: random_token(32),
                max_concurrency: 1,
            },
        );
        let mut api_users = HashMap::new();
        api_users.insert(
            "first-user".to_string(),
            UserConfig {
                token: random_token(32),
                rate_limit_per_hour: 1000,
                system_prompt: String::new(),
            },
        );
        Config {
            api_host: ":8087".to_string(),
            ws_host: ":8088".to_string(),
            compute_nodes,
            api_users,
            task_max_pending_time: default_task_max_pending_time(),
        }
    }

    fn from_file(path: &Path) -> Result<Config, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io(e.to_string()))?;
        serde_json::from_str(&content).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// Loads `path` if it exists. If it doesn't, generates a config with one
    /// default worker and one default user (fresh random tokens), writes it
    /// to `path`, and returns `LoadOutcome::FirstRun` so the caller can exit
    /// cleanly rather than start serving with a config nobody has reviewed.
    pub fn load(path: &Path) -> Result<LoadOutcome, ConfigError> {
        if path.exists() {
            return Ok(LoadOutcome::Loaded(Config::from_file(path)?));
        }
        let config = Config::first_run();
        let serialized = serde_json::to_string_pretty(&config).map_err(|e| ConfigError::Parse(e.to_string()))?;
        std::fs::write(path, serialized).map_err(|e| ConfigError::Io(e.to_string()))?;
        Ok(LoadOutcome::FirstRun(path.to_path_buf()))
    }
}

/// Result of `Config::load`.
pub enum LoadOutcome {
    /// An existing config file was parsed successfully.
    Loaded(Config),
    /// No config file existed; one was generated at the given path.
    FirstRun(PathBuf),
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(String),
    #[error("parse error: {0}")]
    Parse(String),
}

/// Matches the original implementation's token alphabet and length
/// exactly, drawing from the OS CSPRNG via `rand`.
fn random_token(len: usize) -> String {
    const DICT: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ.,";
    let mut rng = rand::thread_rng();
    (0..len).map(|_| DICT[rng.gen_range(0..DICT.len())] as char).collect()
}
