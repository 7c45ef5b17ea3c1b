//! Process configuration.
//!
//! One JSON file describes the runner and the bot fleet. It is read
//! once at startup and every problem with it is fatal there; nothing
//! re-reads configuration at runtime.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;

use crate::runner::RunnerConfig;

/// Failure loading or validating the configuration file.
#[derive(Debug, Error)]
pub enum ConfigFileError {
    #[error("cannot read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("cannot parse configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// The whole configuration file.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    pub runner: RunnerSection,
    #[serde(default)]
    pub bots: Vec<BotDefinition>,
}

fn default_concurrency() -> usize {
    4
}

fn default_interval_seconds() -> u64 {
    10
}

fn default_watchdog_seconds() -> u64 {
    30 * 60
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunnerSection {
    pub scratch_path: PathBuf,
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,
    #[serde(default = "default_watchdog_seconds")]
    pub watchdog_seconds: u64,
}

impl RunnerSection {
    pub fn to_runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            concurrency: self.concurrency,
            scratch_root: self.scratch_path.clone(),
            interval: Duration::from_secs(self.interval_seconds),
            watchdog_timeout: Duration::from_secs(self.watchdog_seconds),
        }
    }
}

/// One bot in the fleet, tagged by kind.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum BotDefinition {
    Mirror {
        name: String,
        source: RepositoryReference,
        destination: RepositoryReference,
        #[serde(default)]
        branches: Vec<String>,
    },
    Topological {
        name: String,
        repository: RepositoryReference,
        edges: Vec<EdgeDefinition>,
        committer: CommitterDefinition,
    },
    Issues {
        name: String,
        project: String,
        label: String,
        #[serde(default = "default_query_pad_seconds")]
        query_pad_seconds: u64,
        #[serde(default = "default_startup_pad_seconds")]
        startup_pad_seconds: u64,
    },
}

fn default_query_pad_seconds() -> u64 {
    10
}

fn default_startup_pad_seconds() -> u64 {
    10 * 60
}

impl BotDefinition {
    pub fn name(&self) -> &str {
        match self {
            BotDefinition::Mirror { name, .. } => name,
            BotDefinition::Topological { name, .. } => name,
            BotDefinition::Issues { name, .. } => name,
        }
    }
}

/// A repository as configuration names it.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepositoryReference {
    pub name: String,
    pub url: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct EdgeDefinition {
    pub branch: String,
    pub depends_on: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CommitterDefinition {
    pub name: String,
    pub email: String,
}

impl Config {
    /// Reads and validates a configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigFileError> {
        let text = std::fs::read_to_string(path)?;
        let config: Config = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigFileError> {
        if self.runner.concurrency == 0 {
            return Err(ConfigFileError::Invalid(
                "runner.concurrency must be at least 1".to_string(),
            ));
        }
        if self.runner.interval_seconds == 0 {
            return Err(ConfigFileError::Invalid(
                "runner.interval_seconds must be nonzero".to_string(),
            ));
        }
        let mut names = std::collections::HashSet::new();
        for bot in &self.bots {
            if !names.insert(bot.name()) {
                return Err(ConfigFileError::Invalid(format!(
                    "duplicate bot name: {}",
                    bot.name()
                )));
            }
        }
        Ok(())
    }
}
