pub mod args;
pub use args::Args;

use anyhow::{anyhow, bail, Context, Result};
use reqwest::Url;
use serde::Deserialize;
use std::path::Path;

/// Complete authproxy configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ProxyConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub helper: HelperConfig,
    #[serde(default)]
    pub cache: CacheConfig,
}

/// Listen and forwarding configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    /// Backend base URL (scheme + host, optional base path). Required.
    #[serde(default)]
    pub backend: Option<String>,
    /// Per-request timeout towards the backend; unset means no timeout.
    #[serde(default)]
    pub forward_timeout_seconds: Option<u64>,
}

fn default_port() -> u16 {
    8080
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            backend: None,
            forward_timeout_seconds: None,
        }
    }
}

/// Identity helper invocation
#[derive(Debug, Clone, Deserialize)]
pub struct HelperConfig {
    #[serde(default = "default_helper_program")]
    pub program: String,
    #[serde(default = "default_helper_args")]
    pub args: Vec<String>,
    #[serde(default = "default_token_type")]
    pub token_type: String,
}

fn default_helper_program() -> String {
    "gcloud".to_string()
}

fn default_helper_args() -> Vec<String> {
    ["config", "config-helper", "--format=json"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn default_token_type() -> String {
    crate::credentials::DEFAULT_TOKEN_TYPE.to_string()
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            program: default_helper_program(),
            args: default_helper_args(),
            token_type: default_token_type(),
        }
    }
}

/// Token cache tuning
#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
    /// Mint this many seconds before the reported expiry
    #[serde(default = "default_expiry_skew")]
    pub expiry_skew_seconds: i64,
    /// Give up on the identity helper after this many seconds
    #[serde(default = "default_mint_timeout")]
    pub mint_timeout_seconds: u64,
}

/// Largest accepted `expiry_skew_seconds`.
pub const MAX_EXPIRY_SKEW_SECONDS: i64 = 24 * 60 * 60;

fn default_expiry_skew() -> i64 {
    30
}

fn default_mint_timeout() -> u64 {
    60
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            expiry_skew_seconds: default_expiry_skew(),
            mint_timeout_seconds: default_mint_timeout(),
        }
    }
}

impl CacheConfig {
    pub fn validate(&self) -> Result<()> {
        if !(0..=MAX_EXPIRY_SKEW_SECONDS).contains(&self.expiry_skew_seconds) {
            bail!(
                "[cache] expiry_skew_seconds must be between 0 and {}, got {}",
                MAX_EXPIRY_SKEW_SECONDS,
                self.expiry_skew_seconds
            );
        }
        if self.mint_timeout_seconds == 0 {
            bail!("[cache] mint_timeout_seconds must be greater than 0");
        }
        Ok(())
    }
}

impl ProxyConfig {
    /// The validated backend URL.
    pub fn backend_url(&self) -> Result<Url> {
        let raw = self
            .server
            .backend
            .as_deref()
            .ok_or_else(|| anyhow!("backend URL is required (--backend or [server].backend)"))?;
        parse_backend_url(raw)
    }
}

/// Parse a backend base URL. Must be absolute http(s) with a host.
pub fn parse_backend_url(raw: &str) -> Result<Url> {
    let url = Url::parse(raw).with_context(|| format!("Invalid backend URL '{}'", raw))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(anyhow!(
            "Backend URL '{}' must use http or https, got '{}'",
            raw,
            url.scheme()
        ));
    }
    if url.host_str().map_or(true, str::is_empty) {
        return Err(anyhow!("Backend URL '{}' has no host", raw));
    }

    Ok(url)
}

/// Load configuration from TOML file
pub fn load_config(path: impl AsRef<Path>) -> Result<ProxyConfig> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file {}", path.display()))?;
    let config: ProxyConfig = toml::from_str(&contents)
        .with_context(|| format!("Failed to parse config file {}", path.display()))?;
    Ok(config)
}
