use super::{load_config, ProxyConfig};
use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

/// Command line flags. Each one can also come from the environment.
#[derive(Parser, Debug, Default)]
#[command(author, version, about = "Reverse proxy that injects identity-helper credentials", long_about = None)]
pub struct Args {
    /// The port to serve on [default: 8080]
    #[arg(long, env = "AUTHPROXY_PORT")]
    pub port: Option<u16>,

    /// URL of the backend server
    #[arg(long, env = "AUTHPROXY_BACKEND")]
    pub backend: Option<String>,

    /// Optional TOML file with [server], [helper] and [cache] settings
    #[arg(long, env = "AUTHPROXY_CONFIG")]
    pub config: Option<PathBuf>,
}

impl Args {
    /// Merge flags over the config file (if any) over defaults.
    pub fn into_config(self) -> Result<ProxyConfig> {
        let mut config = match &self.config {
            Some(path) => load_config(path)?,
            None => ProxyConfig::default(),
        };

        if let Some(port) = self.port {
            config.server.port = port;
        }
        if let Some(backend) = self.backend {
            config.server.backend = Some(backend);
        }

        // Fail at startup, not on the first request
        config.backend_url()?;
        config.cache.validate()?;

        Ok(config)
    }
}
