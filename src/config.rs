//! Entrypoint configuration.
//!
//! Every path, binary and constant the bootstrap sequence touches lives here.
//! `Config::default()` describes the fixed layout of the JupyAgent image; the
//! optional `JUPYAGENT_*` environment variables override individual values so
//! the same binary can be exercised outside the container.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::readiness::ServiceEndpoint;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid value for {name}: {value:?} ({reason})")]
    InvalidValue {
        name: &'static str,
        value: String,
        reason: String,
    },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// A mounted volume and the subdirectories that must exist inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MountSpec {
    pub path: PathBuf,
    pub subdirs: Vec<String>,
}

impl MountSpec {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            subdirs: Vec::new(),
        }
    }

    pub fn with_subdirs(mut self, subdirs: &[&str]) -> Self {
        self.subdirs = subdirs.iter().map(|s| s.to_string()).collect();
        self
    }
}

/// Where and how the external token minter is invoked.
#[derive(Debug, Clone)]
pub struct MinterConfig {
    pub binary: PathBuf,
    pub args: Vec<String>,
    /// Substring identifying the line that carries the token.
    pub marker: String,
}

#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    pub binary: PathBuf,
    pub config_path: PathBuf,
}

/// Settings for the MCP registration merged into the agent's own config.
#[derive(Debug, Clone)]
pub struct AgentConfigSettings {
    /// Persistent document owned by the agent (`.claude.json`).
    pub document_path: PathBuf,
    /// Present only once the agent has been logged in.
    pub credentials_path: PathBuf,
    pub server_name: String,
    pub command: String,
    pub jupyter_url: String,
}

#[derive(Debug, Clone)]
pub struct SidecarSettings {
    pub template_path: PathBuf,
    pub output_path: PathBuf,
    pub placeholder: String,
}

#[derive(Debug, Clone)]
pub struct ReadinessConfig {
    pub endpoints: Vec<ServiceEndpoint>,
    pub interval: Duration,
    pub max_attempts: u32,
    pub request_timeout: Duration,
}

/// Top-level configuration for the bootstrap controller.
#[derive(Debug, Clone)]
pub struct Config {
    /// Unprivileged account that owns the workspace and runs the minter.
    pub service_user: String,
    pub mounts: Vec<MountSpec>,
    pub minter: MinterConfig,
    pub sidecar: SidecarSettings,
    pub agent: AgentConfigSettings,
    pub supervisor: SupervisorConfig,
    pub readiness: ReadinessConfig,
    /// File whose appearance tells the dashboard the services were started.
    pub sentinel_path: PathBuf,
}

const HOME: &str = "/home/jovyan";
const WORKSPACE: &str = "/workspace";

impl Default for Config {
    fn default() -> Self {
        let home = PathBuf::from(HOME);
        let claude_dir = home.join(".claude");
        Self {
            service_user: "jovyan".to_string(),
            mounts: vec![
                MountSpec::new(home.join(".config/opencode")),
                MountSpec::new(home.join(".local/share/opencode"))
                    .with_subdirs(&["storage", "log"]),
                MountSpec::new(&claude_dir).with_subdirs(&["projects"]),
                MountSpec::new(WORKSPACE),
            ],
            minter: MinterConfig {
                binary: PathBuf::from("zellij"),
                args: vec!["web".to_string(), "--create-token".to_string()],
                marker: "token_".to_string(),
            },
            sidecar: SidecarSettings {
                template_path: PathBuf::from("/opt/jupyagent/opencode.json.template"),
                output_path: home.join(".config/opencode/opencode.json"),
                placeholder: "__JUPYTER_TOKEN__".to_string(),
            },
            agent: AgentConfigSettings {
                document_path: claude_dir.join(".claude.json"),
                credentials_path: claude_dir.join(".credentials.json"),
                server_name: "jupyter".to_string(),
                command: "/usr/local/bin/run-jupyter-mcp.sh".to_string(),
                jupyter_url: "http://localhost:8888".to_string(),
            },
            supervisor: SupervisorConfig {
                binary: PathBuf::from("supervisord"),
                config_path: PathBuf::from("/etc/supervisor/conf.d/supervisord.conf"),
            },
            readiness: ReadinessConfig {
                endpoints: vec![
                    ServiceEndpoint::new("jupyter", "http://localhost:8888/api"),
                    ServiceEndpoint::new("terminal", "http://localhost:8080/"),
                    ServiceEndpoint::new("opencode", "http://localhost:3000/"),
                ],
                interval: Duration::from_secs(1),
                max_attempts: 30,
                request_timeout: Duration::from_secs(2),
            },
            sentinel_path: PathBuf::from(WORKSPACE).join("TOKEN.txt"),
        }
    }
}

impl Config {
    /// Build the configuration from defaults plus environment overrides.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`Config::from_env`] with an explicit variable source.
    pub fn from_lookup<F>(lookup: F) -> ConfigResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(user) = get("JUPYAGENT_SERVICE_USER") {
            config.service_user = user;
        }

        if let Some(workspace) = get("JUPYAGENT_WORKSPACE") {
            let workspace = PathBuf::from(workspace);
            for mount in config.mounts.iter_mut() {
                if mount.path == PathBuf::from(WORKSPACE) {
                    mount.path = workspace.clone();
                }
            }
            config.sentinel_path = workspace.join("TOKEN.txt");
        }

        if let Some(bin) = get("JUPYAGENT_MINTER_BIN") {
            config.minter.binary = PathBuf::from(bin);
        }
        if let Some(bin) = get("JUPYAGENT_SUPERVISOR_BIN") {
            config.supervisor.binary = PathBuf::from(bin);
        }
        if let Some(path) = get("JUPYAGENT_SUPERVISOR_CONFIG") {
            config.supervisor.config_path = PathBuf::from(path);
        }
        if let Some(path) = get("JUPYAGENT_SIDECAR_TEMPLATE") {
            config.sidecar.template_path = PathBuf::from(path);
        }
        if let Some(path) = get("JUPYAGENT_SIDECAR_CONFIG") {
            config.sidecar.output_path = PathBuf::from(path);
        }

        if let Some(dir) = get("JUPYAGENT_CLAUDE_CONFIG_DIR").or_else(|| get("CLAUDE_CONFIG_DIR")) {
            let dir = PathBuf::from(dir);
            let old = config.agent.credentials_path.parent().map(PathBuf::from);
            for mount in config.mounts.iter_mut() {
                if Some(&mount.path) == old.as_ref() {
                    mount.path = dir.clone();
                }
            }
            config.agent.document_path = dir.join(".claude.json");
            config.agent.credentials_path = dir.join(".credentials.json");
        }

        if let Some(raw) = get("JUPYAGENT_READY_ATTEMPTS") {
            let attempts = parse_number("JUPYAGENT_READY_ATTEMPTS", &raw)?;
            if attempts == 0 {
                return Err(ConfigError::InvalidValue {
                    name: "JUPYAGENT_READY_ATTEMPTS",
                    value: raw,
                    reason: "must be at least 1".to_string(),
                });
            }
            config.readiness.max_attempts = attempts as u32;
        }

        if let Some(raw) = get("JUPYAGENT_READY_INTERVAL_MS") {
            let millis = parse_number("JUPYAGENT_READY_INTERVAL_MS", &raw)?;
            config.readiness.interval = Duration::from_millis(millis);
        }

        Ok(config)
    }
}

fn parse_number(name: &'static str, raw: &str) -> ConfigResult<u64> {
    raw.trim().parse::<u64>().map_err(|e| ConfigError::InvalidValue {
        name,
        value: raw.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_match_image_layout() {
        let config = Config::default();
        assert_eq!(config.service_user, "jovyan");
        assert_eq!(config.sentinel_path, PathBuf::from("/workspace/TOKEN.txt"));
        assert_eq!(config.readiness.max_attempts, 30);
        assert_eq!(config.readiness.interval, Duration::from_secs(1));
        assert_eq!(config.readiness.endpoints.len(), 3);
        assert_eq!(config.agent.server_name, "jupyter");
        assert_eq!(config.minter.marker, "token_");
    }

    #[test]
    fn test_no_overrides_is_default() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.sentinel_path, Config::default().sentinel_path);
        assert_eq!(config.mounts, Config::default().mounts);
    }

    #[test]
    fn test_workspace_override_moves_sentinel_and_mount() {
        let config = Config::from_lookup(lookup(&[("JUPYAGENT_WORKSPACE", "/tmp/ws")])).unwrap();
        assert_eq!(config.sentinel_path, PathBuf::from("/tmp/ws/TOKEN.txt"));
        assert!(config.mounts.iter().any(|m| m.path == PathBuf::from("/tmp/ws")));
        assert!(!config.mounts.iter().any(|m| m.path == PathBuf::from("/workspace")));
    }

    #[test]
    fn test_claude_config_dir_fallback() {
        let config = Config::from_lookup(lookup(&[("CLAUDE_CONFIG_DIR", "/data/claude")])).unwrap();
        assert_eq!(
            config.agent.document_path,
            PathBuf::from("/data/claude/.claude.json")
        );
        assert_eq!(
            config.agent.credentials_path,
            PathBuf::from("/data/claude/.credentials.json")
        );
        let mount = config
            .mounts
            .iter()
            .find(|m| m.path == PathBuf::from("/data/claude"))
            .unwrap();
        assert_eq!(mount.subdirs, vec!["projects".to_string()]);
    }

    #[test]
    fn test_readiness_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("JUPYAGENT_READY_ATTEMPTS", "5"),
            ("JUPYAGENT_READY_INTERVAL_MS", "250"),
        ]))
        .unwrap();
        assert_eq!(config.readiness.max_attempts, 5);
        assert_eq!(config.readiness.interval, Duration::from_millis(250));
    }

    #[test]
    fn test_invalid_attempts_rejected() {
        let err = Config::from_lookup(lookup(&[("JUPYAGENT_READY_ATTEMPTS", "lots")])).unwrap_err();
        assert!(err.to_string().contains("JUPYAGENT_READY_ATTEMPTS"));

        let err = Config::from_lookup(lookup(&[("JUPYAGENT_READY_ATTEMPTS", "0")])).unwrap_err();
        assert!(err.to_string().contains("at least 1"));
    }

    #[test]
    fn test_blank_values_ignored() {
        let config = Config::from_lookup(lookup(&[("JUPYAGENT_SERVICE_USER", "  ")])).unwrap();
        assert_eq!(config.service_user, "jovyan");
    }
}
