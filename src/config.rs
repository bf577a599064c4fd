// file: src/config.rs
// description: process-level runtime settings with toml and environment support
// reference: https://docs.rs/config

use crate::error::{Result, RuntimeError};
use dotenvy::dotenv;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DEFAULT_MASTER_FILENAME: &str = "~/.logchain-master.json";

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RuntimeConfig {
    pub master: MasterConfig,
    pub plugins: PluginConfig,
    pub executor: ExecutorConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct MasterConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub extra_slots: Vec<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PluginConfig {
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExecutorConfig {
    pub stop_timeout_ms: u64,
    #[serde(default)]
    pub progress_bar: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default)]
    pub verbose: bool,
    #[serde(default = "default_color")]
    pub color: bool,
}

fn default_color() -> bool {
    true
}

impl ExecutorConfig {
    pub fn stop_timeout(&self) -> Duration {
        Duration::from_millis(self.stop_timeout_ms)
    }
}

impl RuntimeConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        dotenv().ok();

        let mut builder = config::Config::builder();

        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        } else {
            builder = builder.add_source(config::File::from(Path::new("config/default.toml")));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("LOGCHAIN")
                .separator("__")
                .try_parsing(true),
        );

        let settings = builder
            .build()
            .map_err(|e| RuntimeError::Config(e.to_string()))?;

        let config: RuntimeConfig = settings
            .try_deserialize()
            .map_err(|e| RuntimeError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    pub fn default_config() -> Self {
        Self {
            master: MasterConfig {
                path: PathBuf::from(DEFAULT_MASTER_FILENAME),
                extra_slots: vec![],
            },
            plugins: PluginConfig { directory: None },
            executor: ExecutorConfig {
                stop_timeout_ms: 5000,
                progress_bar: false,
            },
            logging: LoggingConfig {
                verbose: false,
                color: true,
            },
        }
    }

    /// Master document path with a leading `~` resolved against `$HOME`.
    pub fn master_path(&self) -> PathBuf {
        expand_home(&self.master.path)
    }

    pub fn extra_slot_paths(&self) -> Vec<PathBuf> {
        self.master
            .extra_slots
            .iter()
            .map(|path| expand_home(path))
            .collect()
    }

    pub fn plugin_directory(&self) -> Option<PathBuf> {
        self.plugins.directory.as_deref().map(expand_home)
    }

    pub fn validate(&self) -> Result<()> {
        if self.executor.stop_timeout_ms == 0 {
            return Err(RuntimeError::Config(
                "stop_timeout_ms must be greater than 0".to_string(),
            ));
        }

        if self.master.path.as_os_str().is_empty() {
            return Err(RuntimeError::Config(
                "master config path must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

pub fn expand_home(path: &Path) -> PathBuf {
    let Ok(rest) = path.strip_prefix("~") else {
        return path.to_path_buf();
    };
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(rest),
        None => path.to_path_buf(),
    }
}
