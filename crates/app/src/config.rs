//! trustflow configuration types and loading

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use eyre::{Context, Result};
use serde::Deserialize;
use services::{ConcurrencyMode, ControllerSettings, RpcMinisterConfig, ServiceOptions};
use trust_core::Clock;
use trust_core::model::CourseConfig;

/// Environment variable that overrides `database_url`.
pub const DB_URL_ENV: &str = "TRUSTFLOW_DB_URL";

/// Main trustflow configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// `SQLite` URL or path for the progress store
    pub database_url: String,

    /// Quiet period for autosaves, in milliseconds
    pub debounce_ms: u64,

    /// How saves treat rows changed by another session
    pub concurrency: ConcurrencyMode,

    /// Remote minister lookup; the local profile table is used when absent
    pub minister_rpc: Option<MinisterRpcSection>,

    /// Courses a user can be enrolled in
    pub courses: Vec<CourseConfig>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: "sqlite://trustflow.sqlite3".to_string(),
            debounce_ms: 1000,
            concurrency: ConcurrencyMode::default(),
            minister_rpc: None,
            courses: vec![CourseConfig::trust_formation()],
        }
    }
}

/// Minister lookup over the backend's RPC endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct MinisterRpcSection {
    pub base_url: String,

    #[serde(default = "default_rpc_function")]
    pub function: String,

    /// Environment variable holding the API key
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

fn default_rpc_function() -> String {
    "get_minister_status".to_string()
}

fn default_api_key_env() -> String {
    "TRUSTFLOW_API_KEY".to_string()
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        let config = Self::load_file(config_path)?;
        Ok(config.with_db_override(std::env::var(DB_URL_ENV).ok()))
    }

    fn load_file(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path)
                .context(format!("Failed to load config from {}", path.display()));
        }

        // project-local: ./trustflow.yml
        let local_config = PathBuf::from("trustflow.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {:#}", local_config.display(), e);
                }
            }
        }

        // user: ~/.config/trustflow/trustflow.yml
        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("trustflow").join("trustflow.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {:#}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::debug!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::debug!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Replace `database_url` when an override is set and non-blank.
    #[must_use]
    pub fn with_db_override(mut self, url: Option<String>) -> Self {
        if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
            self.database_url = url;
        }
        self
    }

    pub fn controller_settings(&self) -> ControllerSettings {
        ControllerSettings {
            debounce: Duration::from_millis(self.debounce_ms),
            concurrency: self.concurrency,
        }
    }

    /// Options for assembling services.
    ///
    /// The RPC API key is read from the environment variable the config names;
    /// a missing variable means requests go out without a key.
    pub fn service_options(&self) -> Result<ServiceOptions> {
        let mut seen = HashSet::new();
        for course in &self.courses {
            if !seen.insert(course.id()) {
                return Err(eyre::eyre!("course `{}` is configured more than once", course.id()));
            }
        }
        if self.courses.is_empty() {
            return Err(eyre::eyre!("at least one course must be configured"));
        }

        let minister_rpc = self.minister_rpc.as_ref().map(|rpc| RpcMinisterConfig {
            base_url: rpc.base_url.clone(),
            function: rpc.function.clone(),
            api_key: std::env::var(&rpc.api_key_env).ok(),
        });

        Ok(ServiceOptions {
            clock: Clock::system(),
            settings: self.controller_settings(),
            courses: self.courses.clone(),
            minister_rpc,
        })
    }
}
