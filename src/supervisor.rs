//! supervisord launch and foreground wait.

use std::os::unix::process::ExitStatusExt;
use std::process::{ExitStatus, Stdio};

use thiserror::Error;
use tokio::process::{Child, Command};

use crate::config::SupervisorConfig;
use crate::credential::Token;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("Failed to start supervisor {binary}: {source}")]
    Spawn {
        binary: String,
        source: std::io::Error,
    },

    #[error("Failed to wait for supervisor: {0}")]
    Wait(#[source] std::io::Error),
}

pub type SupervisorResult<T> = Result<T, SupervisorError>;

/// A running supervisor process.
#[derive(Debug)]
pub struct SupervisorHandle {
    child: Child,
}

/// Start the supervisor with the token in its environment, without waiting.
///
/// stdio is inherited so service logs reach the container log.
pub fn launch(config: &SupervisorConfig, token: &Token) -> SupervisorResult<SupervisorHandle> {
    let mut cmd = Command::new(&config.binary);
    cmd.arg("-c")
        .arg(&config.config_path)
        .env("JUPYTER_TOKEN", token.as_str())
        .stdin(Stdio::null());

    let child = cmd.spawn().map_err(|e| {
        let binary = config.binary.display().to_string();
        if e.kind() == std::io::ErrorKind::NotFound {
            tracing::error!("{} not found. Is supervisor installed in the image?", binary);
        }
        SupervisorError::Spawn { binary, source: e }
    })?;

    tracing::info!(
        pid = child.id(),
        config = %config.config_path.display(),
        "Supervisor started"
    );
    Ok(SupervisorHandle { child })
}

impl SupervisorHandle {
    /// `Some(code)` if the supervisor has already exited.
    pub fn try_exit_code(&mut self) -> Option<i32> {
        match self.child.try_wait() {
            Ok(Some(status)) => Some(exit_code(status)),
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Could not check supervisor status: {}", e);
                None
            }
        }
    }

    /// Block until the supervisor exits and return its exit code.
    pub async fn wait(mut self) -> SupervisorResult<i32> {
        let status = self.child.wait().await.map_err(SupervisorError::Wait)?;
        let code = exit_code(status);
        tracing::info!(%status, code, "Supervisor exited");
        Ok(code)
    }
}

/// Shell-style exit code: the process's own code, or 128 + signal.
pub fn exit_code(status: ExitStatus) -> i32 {
    match (status.code(), status.signal()) {
        (Some(code), _) => code,
        (None, Some(signal)) => 128 + signal,
        (None, None) => 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nix::sys::signal::Signal;
    use std::path::PathBuf;
    use tempfile::tempdir;

    fn token(value: &str) -> Token {
        Token::new(value).unwrap()
    }

    /// `sh -c <script>` has the same shape as `supervisord -c <config>`.
    fn sh_supervisor(script: &str) -> SupervisorConfig {
        SupervisorConfig {
            binary: PathBuf::from("sh"),
            config_path: PathBuf::from(script),
        }
    }

    #[tokio::test]
    async fn test_exit_code_is_forwarded() {
        let handle = launch(&sh_supervisor("exit 7"), &token("abc")).unwrap();
        assert_eq!(handle.wait().await.unwrap(), 7);
    }

    #[tokio::test]
    async fn test_token_is_in_supervisor_environment() {
        let temp = tempdir().unwrap();
        let out = temp.path().join("seen");
        let script = format!("printf %s \"$JUPYTER_TOKEN\" > {}", out.display());

        let handle = launch(&sh_supervisor(&script), &token("abc123")).unwrap();
        assert_eq!(handle.wait().await.unwrap(), 0);

        assert_eq!(std::fs::read_to_string(&out).unwrap(), "abc123");
    }

    #[tokio::test]
    async fn test_signal_exit_maps_to_128_plus_signal() {
        let handle = launch(&sh_supervisor("kill -TERM $$"), &token("abc")).unwrap();
        assert_eq!(handle.wait().await.unwrap(), 128 + Signal::SIGTERM as i32);
    }

    #[tokio::test]
    async fn test_missing_binary_is_spawn_error() {
        let config = SupervisorConfig {
            binary: PathBuf::from("/nonexistent/supervisord"),
            config_path: PathBuf::from("/nonexistent.conf"),
        };
        let err = launch(&config, &token("abc")).unwrap_err();
        assert!(matches!(err, SupervisorError::Spawn { .. }));
    }

    #[tokio::test]
    async fn test_try_exit_code_while_running() {
        let mut handle = launch(&sh_supervisor("sleep 5"), &token("abc")).unwrap();
        assert_eq!(handle.try_exit_code(), None);
        handle.child.start_kill().unwrap();
        let _ = handle.wait().await;
    }
}
