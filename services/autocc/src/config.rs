//! Configuration types and loading
//!
//! Config precedence: CLI args > env vars > config file > defaults.
//! No secrets live in the TOML: client secrets, API keys and tokens are
//! kept in the store file, managed through the `credentials` and `auth`
//! commands.

use serde::Deserialize;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub store: StoreConfig,
    pub oauth: OAuthConfig,
    pub video: VideoConfig,
    pub translation: TranslationConfig,
    pub cache: CacheConfig,
    pub orchestrator: OrchestratorConfig,
    /// Prometheus exporter; disabled when absent
    pub metrics: Option<MetricsConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("autocc-store.json"),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    /// Callback URL registered with the video platform's OAuth clients
    pub redirect_uri: String,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            redirect_uri: "http://localhost:8080/oauth/callback".into(),
        }
    }
}

/// Video platform API settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct VideoConfig {
    pub api_base_url: String,
    pub upload_base_url: String,
    pub timeout_secs: u64,
    /// Quota cycle length; usage is zeroed on the first reservation after
    /// a cycle ends (the platform resets daily)
    pub quota_reset_secs: u64,
}

impl Default for VideoConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://www.googleapis.com/youtube/v3".into(),
            upload_base_url: "https://www.googleapis.com/upload/youtube/v3".into(),
            timeout_secs: 60,
            quota_reset_secs: 24 * 60 * 60,
        }
    }
}

/// Translation provider settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct TranslationConfig {
    pub api_base_url: String,
    pub timeout_secs: u64,
    /// Quota cycle length (character budgets reset monthly)
    pub quota_reset_secs: u64,
}

impl Default for TranslationConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api-free.deepl.com/v2".into(),
            timeout_secs: 60,
            quota_reset_secs: 30 * 24 * 60 * 60,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub max_entries: u64,
    pub translation_ttl_secs: u64,
    pub languages_ttl_secs: u64,
    pub upload_ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 10_000,
            translation_ttl_secs: 24 * 60 * 60,
            languages_ttl_secs: 24 * 60 * 60,
            upload_ttl_secs: 24 * 60 * 60,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Cancel in-flight sibling tasks after the first recorded failure
    pub cancel_on_failure: bool,
    /// Wall-clock limit for one `process` run; none when absent
    pub deadline_secs: Option<u64>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            cancel_on_failure: true,
            deadline_secs: None,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct MetricsConfig {
    pub listen_addr: SocketAddr,
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    /// Parse, apply environment overrides, validate.
    pub fn from_toml(contents: &str) -> common::Result<Self> {
        let mut config: Config = toml::from_str(contents)?;
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Defaults plus environment overrides, for running without a file.
    pub fn from_env() -> common::Result<Self> {
        Self::from_toml("")
    }

    fn apply_env(&mut self) {
        if let Some(path) = std::env::var_os("AUTOCC_STORE_PATH") {
            self.store.path = PathBuf::from(path);
        }
    }

    fn validate(&self) -> common::Result<()> {
        require_http_url("oauth.redirect_uri", &self.oauth.redirect_uri)?;
        require_http_url("video.api_base_url", &self.video.api_base_url)?;
        require_http_url("video.upload_base_url", &self.video.upload_base_url)?;
        require_http_url("translation.api_base_url", &self.translation.api_base_url)?;

        require_positive("video.timeout_secs", self.video.timeout_secs)?;
        require_positive("video.quota_reset_secs", self.video.quota_reset_secs)?;
        require_positive("translation.timeout_secs", self.translation.timeout_secs)?;
        require_positive(
            "translation.quota_reset_secs",
            self.translation.quota_reset_secs,
        )?;
        require_positive("cache.max_entries", self.cache.max_entries)?;
        if let Some(deadline) = self.orchestrator.deadline_secs {
            require_positive("orchestrator.deadline_secs", deadline)?;
        }

        if self.store.path.as_os_str().is_empty() {
            return Err(common::Error::Config("store.path must not be empty".into()));
        }
        Ok(())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&Path>) -> PathBuf {
        if let Some(p) = cli_path {
            return p.to_path_buf();
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("autocc.toml")
    }
}

impl OrchestratorConfig {
    pub fn deadline(&self) -> Option<Duration> {
        self.deadline_secs.map(Duration::from_secs)
    }
}

fn require_http_url(field: &'static str, value: &str) -> common::Result<()> {
    if value.starts_with("http://") || value.starts_with("https://") {
        return Ok(());
    }
    Err(common::Error::Invalid {
        field,
        reason: format!("must start with http:// or https://, got: {value}"),
    })
}

fn require_positive(field: &'static str, value: u64) -> common::Result<()> {
    if value == 0 {
        return Err(common::Error::Invalid {
            field,
            reason: "must be greater than 0".into(),
        });
    }
    Ok(())
}
