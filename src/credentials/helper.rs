//! Identity helper subprocess.
//!
//! Runs a command such as `gcloud config config-helper --format=json` and reads
//! the access token and its expiry out of the JSON it prints.

use super::{CredentialSource, MintError, Token};
use crate::config::HelperConfig;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::process::Stdio;
use tokio::process::Command;
use tracing::debug;

/// Longest stderr excerpt carried in an [`MintError::Exit`].
const MAX_STDERR_CHARS: usize = 512;

/// JSON printed by the helper. Only the two fields we need are decoded.
#[derive(Deserialize, Debug)]
struct ConfigHelperOutput {
    credential: HelperCredential,
}

#[derive(Deserialize, Debug)]
struct HelperCredential {
    access_token: String,
    token_expiry: String,
}

/// Credential source backed by an external identity helper command.
///
/// Each [`mint`](CredentialSource::mint) spawns the helper once. The child
/// inherits the proxy's environment and is killed if the mint future is
/// dropped (e.g. on timeout).
#[derive(Debug, Clone)]
pub struct HelperCommandSource {
    program: String,
    args: Vec<String>,
    token_type: String,
}

impl HelperCommandSource {
    pub fn new(program: impl Into<String>, args: Vec<String>, token_type: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args,
            token_type: token_type.into(),
        }
    }

    pub fn from_config(config: &HelperConfig) -> Self {
        Self::new(
            config.program.clone(),
            config.args.clone(),
            config.token_type.clone(),
        )
    }
}

#[async_trait]
impl CredentialSource for HelperCommandSource {
    async fn mint(&self) -> Result<Token, MintError> {
        debug!(program = %self.program, "Invoking identity helper");

        let output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| MintError::Spawn(format!("{}: {}", self.program, e)))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(MintError::Exit {
                status: output.status.to_string(),
                stderr: stderr.trim().chars().take(MAX_STDERR_CHARS).collect(),
            });
        }

        parse_helper_output(&output.stdout, &self.token_type)
    }
}

/// Parse the helper's JSON into a [`Token`].
///
/// Expects `credential.access_token` and an RFC 3339 `credential.token_expiry`;
/// every other field is ignored.
pub fn parse_helper_output(stdout: &[u8], token_type: &str) -> Result<Token, MintError> {
    let parsed: ConfigHelperOutput =
        serde_json::from_slice(stdout).map_err(|e| MintError::Malformed(e.to_string()))?;

    let expiry = DateTime::parse_from_rfc3339(&parsed.credential.token_expiry)
        .map_err(|e| {
            MintError::Expiry(format!("{:?}: {}", parsed.credential.token_expiry, e))
        })?
        .with_timezone(&Utc);

    Ok(Token::new(
        token_type,
        parsed.credential.access_token,
        expiry,
    ))
}
