use std::path::PathBuf;

use library::{HISTORY_CAP, LOG_CAP};
use serde::Deserialize;
use store_sqlite::DbConfig;

#[derive(Debug, Deserialize, Default)]
pub struct Config {
    pub database_path: Option<PathBuf>,
    #[serde(default)]
    pub capacity: CapacityConfig,
}

#[derive(Debug, Deserialize)]
pub struct CapacityConfig {
    #[serde(default = "default_history_cap")]
    pub history: usize,
    #[serde(default = "default_log_cap")]
    pub logs: usize,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            history: HISTORY_CAP,
            logs: LOG_CAP,
        }
    }
}

fn default_history_cap() -> usize {
    HISTORY_CAP
}

fn default_log_cap() -> usize {
    LOG_CAP
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let config_dir = dirs::config_dir().unwrap_or_else(|| PathBuf::from("."));
        let config_path = config_dir.join("studio").join("config.toml");

        if !config_path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(&config_path).map_err(|e| {
            anyhow::anyhow!(
                "failed to read config file at {}: {}",
                config_path.display(),
                e
            )
        })?;

        Self::parse(&content)
    }

    pub fn parse(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)
            .map_err(|e| anyhow::anyhow!("failed to parse config file: {}", e))?;
        if config.capacity.history == 0 || config.capacity.logs == 0 {
            anyhow::bail!("capacity values must be at least 1");
        }
        Ok(config)
    }

    pub fn database_path(&self) -> PathBuf {
        self.database_path
            .clone()
            .unwrap_or_else(DbConfig::default_path)
    }
}
