use crate::{
    error::{BlastError, BlastResult},
    BLASTRADIUS_CONFIG,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

pub const GRAPH_CACHE_FILE: &str = "dependency_graph.json";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Snapshots older than this are rebuilt from the package database.
    #[serde(default = "default_cache_max_age_secs")]
    pub cache_max_age_secs: u64,

    /// Upper bound for every external process the engine spawns.
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,

    #[serde(default = "default_lock_timeout_secs")]
    pub lock_timeout_secs: u64,

    /// Prefix generated removal commands with `sudo`.
    #[serde(default = "default_use_sudo")]
    pub use_sudo: bool,
}

impl Config {
    pub fn load(config_path: Option<&str>) -> BlastResult<Self> {
        let config_path = if let Some(path) = config_path {
            PathBuf::from(path)
        } else {
            BLASTRADIUS_CONFIG.join("blastradius.toml")
        };

        let config = if config_path.exists() && config_path.is_file() {
            let content = std::fs::read_to_string(&config_path)?;
            toml::from_str::<Config>(&content)?
        } else {
            log::debug!("No config at {}, using defaults", config_path.display());
            Config::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> BlastResult<()> {
        if self.cache_max_age_secs == 0 {
            return Err(BlastError::ConfigError(
                "cache_max_age_secs must be greater than zero".into(),
            ));
        }
        if self.command_timeout_secs == 0 {
            return Err(BlastError::ConfigError(
                "command_timeout_secs must be greater than zero".into(),
            ));
        }
        if self.lock_timeout_secs == 0 {
            return Err(BlastError::ConfigError(
                "lock_timeout_secs must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    pub fn graph_cache_path(&self) -> PathBuf {
        let dir = self.cache_dir.to_string_lossy();
        PathBuf::from(shellexpand::tilde(&dir).into_owned()).join(GRAPH_CACHE_FILE)
    }

    pub fn cache_max_age(&self) -> Duration {
        Duration::from_secs(self.cache_max_age_secs)
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.command_timeout_secs)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_secs(self.lock_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            cache_max_age_secs: default_cache_max_age_secs(),
            command_timeout_secs: default_command_timeout_secs(),
            lock_timeout_secs: default_lock_timeout_secs(),
            use_sudo: default_use_sudo(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    crate::BLASTRADIUS_CACHE.clone()
}

fn default_cache_max_age_secs() -> u64 {
    3600
}

fn default_command_timeout_secs() -> u64 {
    30
}

fn default_lock_timeout_secs() -> u64 {
    10
}

fn default_use_sudo() -> bool {
    true
}
