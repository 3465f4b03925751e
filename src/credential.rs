//! Session token minting.
//!
//! The web terminal prints the freshly created token as free-form text. This
//! module hides that scraping behind [`TokenSource`] so every consumer only
//! ever sees a validated [`Token`].

use std::fmt;
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::MinterConfig;
use crate::permissions::ServiceUser;

#[derive(Debug, Error)]
pub enum CredentialError {
    #[error("Failed to run token minter {binary}: {source}")]
    Spawn {
        binary: String,
        source: std::io::Error,
    },

    /// No line carried the marker, or the value after it was empty.
    #[error("No token found in minter output (marker {marker:?})")]
    Extraction { marker: String, output: String },
}

impl CredentialError {
    /// Captured minter output, if the failure happened after it ran.
    pub fn captured_output(&self) -> Option<&str> {
        match self {
            Self::Extraction { output, .. } => Some(output),
            Self::Spawn { .. } => None,
        }
    }
}

pub type CredentialResult<T> = Result<T, CredentialError>;

/// Bearer token for this container run. Never empty.
#[derive(Clone, PartialEq, Eq)]
pub struct Token(String);

impl Token {
    /// Returns `None` for empty or whitespace-only values.
    pub fn new(value: impl Into<String>) -> Option<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            None
        } else {
            Some(Self(value))
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Token(<redacted>)")
    }
}

/// Anything that can produce the run's token.
#[async_trait]
pub trait TokenSource: Send + Sync {
    async fn mint(&self) -> CredentialResult<Token>;
}

/// Find the token in minter output.
///
/// The first line containing `marker` wins; the token is the
/// whitespace-separated field right after the first field that contains the
/// marker. Handles both `token_1: <value>` and `<name> token_<name> <value>`.
pub fn extract_token(output: &str, marker: &str) -> CredentialResult<Token> {
    let extraction_failed = || CredentialError::Extraction {
        marker: marker.to_string(),
        output: output.to_string(),
    };

    let line = output
        .lines()
        .find(|line| line.contains(marker))
        .ok_or_else(extraction_failed)?;

    let mut fields = line.split_whitespace();
    fields
        .by_ref()
        .find(|field| field.contains(marker))
        .ok_or_else(extraction_failed)?;

    fields
        .next()
        .and_then(Token::new)
        .ok_or_else(extraction_failed)
}

/// Mints a token with `zellij web --create-token`, run as the service user.
pub struct ZellijMinter {
    config: MinterConfig,
    user: Option<ServiceUser>,
}

impl ZellijMinter {
    pub fn new(config: MinterConfig, user: Option<ServiceUser>) -> Self {
        Self { config, user }
    }

    fn command(&self) -> tokio::process::Command {
        let mut cmd = match &self.user {
            Some(user) if !user.is_current_process() => {
                let mut cmd = tokio::process::Command::new("runuser");
                cmd.arg("-u").arg(&user.name).arg("--").arg(&self.config.binary);
                cmd
            }
            _ => tokio::process::Command::new(&self.config.binary),
        };
        cmd.args(&self.config.args);
        if let Some(user) = &self.user {
            cmd.env("HOME", &user.home);
        }
        cmd.stdin(Stdio::null());
        cmd
    }
}

#[async_trait]
impl TokenSource for ZellijMinter {
    async fn mint(&self) -> CredentialResult<Token> {
        let output = self
            .command()
            .output()
            .await
            .map_err(|e| CredentialError::Spawn {
                binary: self.config.binary.display().to_string(),
                source: e,
            })?;

        let mut captured = String::from_utf8_lossy(&output.stdout).into_owned();
        captured.push_str(&String::from_utf8_lossy(&output.stderr));

        if !output.status.success() {
            tracing::debug!(status = %output.status, "Token minter exited unsuccessfully");
        }

        extract_token(&captured, &self.config.marker)
    }
}
