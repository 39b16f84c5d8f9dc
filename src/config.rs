//! Configuration for docsync.
//!
//! Settings are read from `.docsync/docsync.toml` and layered
//! file → environment → CLI, later layers winning.
//!
//! # Configuration File Format
//!
//! ```toml
//! [endpoints]
//! live_url = "http://localhost:3100"
//! api_base_url = "http://localhost:8000"
//! api_token = "..."
//!
//! [liveness]
//! interval_secs = 10
//! failure_threshold = 5
//! probe_timeout_secs = 5
//!
//! [autosave]
//! interval_secs = 10
//! debounce_ms = 1500
//!
//! [logging]
//! json = false
//!
//! [redis]
//! url = "redis://localhost:6379"
//! ```
//!
//! Environment: `LIVE_URL`, `API_BASE_URL`, `DOCSYNC_API_TOKEN`, and for the
//! realtime service's session store `REDIS_URL` or `REDIS_HOST` +
//! `REDIS_PORT`. A `.env` file in the project directory is loaded first and
//! never overrides variables already set.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::liveness::LivenessConfig;
use crate::scheduler::AutosaveConfig;
use crate::session::SessionConfig;

pub const CONFIG_DIR: &str = ".docsync";
pub const CONFIG_FILE: &str = "docsync.toml";

pub const DEFAULT_LIVE_URL: &str = "http://localhost:3100";
pub const DEFAULT_API_BASE_URL: &str = "http://localhost:8000";

pub const ENV_LIVE_URL: &str = "LIVE_URL";
pub const ENV_API_BASE_URL: &str = "API_BASE_URL";
pub const ENV_API_TOKEN: &str = "DOCSYNC_API_TOKEN";

pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379";
pub const ENV_REDIS_URL: &str = "REDIS_URL";
pub const ENV_REDIS_HOST: &str = "REDIS_HOST";
pub const ENV_REDIS_PORT: &str = "REDIS_PORT";

/// Session store of the realtime collaboration service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedisConfig {
    Url(String),
    HostPort { host: String, port: u16 },
}

impl RedisConfig {
    /// Resolve from `REDIS_URL`, then `REDIS_HOST` with a numeric
    /// `REDIS_PORT`. Blank values count as unset.
    pub fn from_env() -> Option<Self> {
        Self::resolve(|key| std::env::var(key).ok())
    }

    fn resolve(var: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let read = |key: &str| {
            var(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };
        if let Some(url) = read(ENV_REDIS_URL) {
            return Some(Self::Url(url));
        }
        let host = read(ENV_REDIS_HOST)?;
        let port = read(ENV_REDIS_PORT)?.parse().ok()?;
        Some(Self::HostPort { host, port })
    }

    /// Connection URL form.
    pub fn url(&self) -> String {
        match self {
            Self::Url(url) => url.clone(),
            Self::HostPort { host, port } => format!("redis://{}:{}", host, port),
        }
    }
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self::Url(DEFAULT_REDIS_URL.to_string())
    }
}

/// Service endpoints.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EndpointsSection {
    /// Realtime transport base URL (health probe target)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub live_url: Option<String>,
    /// Document store base URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_base_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub api_token: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LivenessSection {
    #[serde(default = "default_probe_interval_secs")]
    pub interval_secs: u64,
    /// Consecutive probe failures before degrading
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "default_probe_timeout_secs")]
    pub probe_timeout_secs: u64,
}

fn default_probe_interval_secs() -> u64 {
    10
}

fn default_failure_threshold() -> u32 {
    crate::liveness::DEFAULT_FAILURE_THRESHOLD
}

fn default_probe_timeout_secs() -> u64 {
    5
}

impl Default for LivenessSection {
    fn default() -> Self {
        Self {
            interval_secs: default_probe_interval_secs(),
            failure_threshold: default_failure_threshold(),
            probe_timeout_secs: default_probe_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AutosaveSection {
    #[serde(default = "default_autosave_interval_secs")]
    pub interval_secs: u64,
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
}

fn default_autosave_interval_secs() -> u64 {
    10
}

fn default_debounce_ms() -> u64 {
    1500
}

impl Default for AutosaveSection {
    fn default() -> Self {
        Self {
            interval_secs: default_autosave_interval_secs(),
            debounce_ms: default_debounce_ms(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingSection {
    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
    /// Directory for daily rolling log files, relative to the project
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RedisSection {
    /// Realtime service session store, used when no `REDIS_*` variable is set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Contents of `docsync.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncToml {
    #[serde(default)]
    pub endpoints: EndpointsSection,
    #[serde(default)]
    pub liveness: LivenessSection,
    #[serde(default)]
    pub autosave: AutosaveSection,
    #[serde(default)]
    pub logging: LoggingSection,
    #[serde(default)]
    pub redis: RedisSection,
}

impl SyncToml {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse docsync.toml")
    }

    /// Load `docsync.toml` from `config_dir`, or defaults when absent.
    pub fn load_or_default(config_dir: &Path) -> Result<Self> {
        let config_path = config_dir.join(CONFIG_FILE);
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize docsync.toml")?;
        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }

    /// Live URL (env → file → default).
    pub fn live_url(&self) -> String {
        std::env::var(ENV_LIVE_URL)
            .ok()
            .or_else(|| self.endpoints.live_url.clone())
            .unwrap_or_else(|| DEFAULT_LIVE_URL.to_string())
    }

    /// API base URL (env → file → default).
    pub fn api_base_url(&self) -> String {
        std::env::var(ENV_API_BASE_URL)
            .ok()
            .or_else(|| self.endpoints.api_base_url.clone())
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string())
    }

    pub fn api_token(&self) -> Option<String> {
        std::env::var(ENV_API_TOKEN)
            .ok()
            .filter(|token| !token.is_empty())
            .or_else(|| self.endpoints.api_token.clone())
    }

    /// Redis session store (env → file → default).
    pub fn redis(&self) -> RedisConfig {
        RedisConfig::from_env()
            .or_else(|| self.redis.url.clone().map(RedisConfig::Url))
            .unwrap_or_default()
    }

    /// Validate the configuration and return any warnings.
    pub fn validate(&self) -> Vec<String> {
        let mut warnings = Vec::new();

        if self.liveness.failure_threshold == 0 {
            warnings.push(
                "liveness.failure_threshold is 0: treated as 1, a single failed probe degrades"
                    .to_string(),
            );
        }
        if self.liveness.interval_secs == 0 {
            warnings.push("liveness.interval_secs is 0: probes would run back to back".to_string());
        }
        if self.liveness.probe_timeout_secs == 0 {
            warnings.push("liveness.probe_timeout_secs is 0: every probe would time out".to_string());
        }
        if self.autosave.interval_secs == 0 {
            warnings.push("autosave.interval_secs is 0: autosave would run back to back".to_string());
        }

        for (key, url) in [
            ("endpoints.live_url", &self.endpoints.live_url),
            ("endpoints.api_base_url", &self.endpoints.api_base_url),
        ] {
            if let Some(url) = url
                && !is_http_url(url)
            {
                warnings.push(format!("Invalid {} '{}': expected http:// or https://", key, url));
            }
        }

        if let Some(url) = &self.redis.url
            && !is_redis_url(url)
        {
            warnings.push(format!(
                "Invalid redis.url '{}': expected redis:// or rediss://",
                url
            ));
        }
        if let Ok(port) = std::env::var(ENV_REDIS_PORT)
            && !port.trim().is_empty()
            && port.trim().parse::<u16>().is_err()
        {
            warnings.push(format!(
                "{} '{}' is not a port number: {} is ignored",
                ENV_REDIS_PORT, port, ENV_REDIS_HOST
            ));
        }

        warnings
    }
}

fn is_redis_url(url: &str) -> bool {
    url.starts_with("redis://") || url.starts_with("rediss://")
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Load `.env` from the project directory, if present.
///
/// Runs before logging is installed, so a malformed file is returned as an
/// error for the caller to report.
pub fn load_env_file(project_dir: &Path) -> Result<Option<PathBuf>> {
    let path = project_dir.join(".env");
    match dotenvy::from_path(&path) {
        Ok(()) => Ok(Some(path)),
        Err(e) if e.not_found() => Ok(None),
        Err(e) => Err(e).with_context(|| format!("Failed to load {}", path.display())),
    }
}

/// Effective runtime configuration.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    pub project_dir: PathBuf,
    pub config_dir: PathBuf,
    pub toml: SyncToml,
    pub verbose: bool,
    pub cli_live_url: Option<String>,
    pub cli_api_base_url: Option<String>,
}

impl SyncConfig {
    pub fn new(project_dir: PathBuf) -> Result<Self> {
        let project_dir = project_dir
            .canonicalize()
            .context("Failed to resolve project directory")?;
        let config_dir = project_dir.join(CONFIG_DIR);
        let toml = SyncToml::load_or_default(&config_dir)?;

        Ok(Self {
            project_dir,
            config_dir,
            toml,
            verbose: false,
            cli_live_url: None,
            cli_api_base_url: None,
        })
    }

    pub fn with_cli_args(
        project_dir: PathBuf,
        verbose: bool,
        live_url: Option<String>,
        api_base_url: Option<String>,
    ) -> Result<Self> {
        let mut config = Self::new(project_dir)?;
        config.verbose = verbose;
        config.cli_live_url = live_url;
        config.cli_api_base_url = api_base_url;
        Ok(config)
    }

    pub fn config_file(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    /// Live URL (CLI → env → file → default).
    pub fn live_url(&self) -> String {
        self.cli_live_url
            .clone()
            .unwrap_or_else(|| self.toml.live_url())
    }

    /// API base URL (CLI → env → file → default).
    pub fn api_base_url(&self) -> String {
        self.cli_api_base_url
            .clone()
            .unwrap_or_else(|| self.toml.api_base_url())
    }

    pub fn api_token(&self) -> Option<String> {
        self.toml.api_token()
    }

    pub fn redis(&self) -> RedisConfig {
        self.toml.redis()
    }

    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.toml.liveness.probe_timeout_secs)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            liveness: LivenessConfig {
                interval: Duration::from_secs(self.toml.liveness.interval_secs),
                failure_threshold: self.toml.liveness.failure_threshold,
            },
            autosave: AutosaveConfig {
                interval: Duration::from_secs(self.toml.autosave.interval_secs),
                debounce: Duration::from_millis(self.toml.autosave.debounce_ms),
            },
        }
    }

    /// Rolling log directory, resolved against the project directory.
    pub fn log_dir(&self) -> Option<PathBuf> {
        self.toml
            .logging
            .dir
            .as_ref()
            .map(|dir| self.project_dir.join(dir))
    }

    pub fn validate(&self) -> Vec<String> {
        let mut warnings = self.toml.validate();
        for (flag, url) in [
            ("--live-url", &self.cli_live_url),
            ("--api-base-url", &self.cli_api_base_url),
        ] {
            if let Some(url) = url
                && !is_http_url(url)
            {
                warnings.push(format!("Invalid {} '{}': expected http:// or https://", flag, url));
            }
        }
        warnings
    }
}
