//! MCP registration in the agent's persistent config.
//!
//! `.claude.json` belongs to the agent: it holds login state, project history
//! and user settings. Only `mcpServers.<name>` is managed here; every other key
//! is carried through untouched and in its original order.

use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use serde::Serialize;
use serde_json::{Map, Value};

use super::{io_err, write_atomic, PropagateError, PropagateResult};
use crate::config::AgentConfigSettings;
use crate::credential::Token;
use crate::permissions::{self, ServiceUser};

const MCP_SERVERS_KEY: &str = "mcpServers";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// The entry was missing or stale and the document was rewritten.
    Written,
    /// The entry already carried this token; nothing was written.
    Unchanged,
    /// The agent has not been logged in yet; nothing was touched.
    SkippedUnauthenticated,
}

/// A stdio MCP server as the agent expects it under `mcpServers`.
#[derive(Debug, Clone, Serialize)]
pub struct McpServerEntry {
    #[serde(rename = "type")]
    pub transport: &'static str,
    pub command: String,
    pub env: JupyterEnv,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct JupyterEnv {
    pub jupyter_url: String,
    pub jupyter_token: String,
    pub allow_img_output: &'static str,
}

/// The managed MCP server entry.
pub fn jupyter_entry(settings: &AgentConfigSettings, token: &Token) -> McpServerEntry {
    McpServerEntry {
        transport: "stdio",
        command: settings.command.clone(),
        env: JupyterEnv {
            jupyter_url: settings.jupyter_url.clone(),
            jupyter_token: token.as_str().to_string(),
            allow_img_output: "true",
        },
    }
}

/// Register the Jupyter MCP server in the agent config.
///
/// Skipped entirely when the agent's credentials file does not exist. Writes
/// only when the entry is missing or holds a different token.
pub fn merge_agent_config(
    settings: &AgentConfigSettings,
    token: &Token,
    owner: Option<&ServiceUser>,
) -> PropagateResult<MergeOutcome> {
    if !settings.credentials_path.exists() {
        tracing::warn!(
            credentials = %settings.credentials_path.display(),
            "Agent is not authenticated yet, skipping MCP registration"
        );
        return Ok(MergeOutcome::SkippedUnauthenticated);
    }

    let path = settings.document_path.as_path();
    let json_err = |e| PropagateError::Json {
        path: path.to_path_buf(),
        source: e,
    };
    let (mut document, mode) = read_document(path)?;

    if current_token(&document, &settings.server_name) == Some(token.as_str()) {
        tracing::debug!(path = %path.display(), "MCP registration already current");
        return Ok(MergeOutcome::Unchanged);
    }

    let servers = document
        .entry(MCP_SERVERS_KEY)
        .or_insert_with(|| Value::Object(Map::new()));
    let servers = servers
        .as_object_mut()
        .ok_or_else(|| PropagateError::NotAnObject {
            path: path.to_path_buf(),
            key: MCP_SERVERS_KEY.to_string(),
        })?;
    let entry = serde_json::to_value(jupyter_entry(settings, token)).map_err(json_err)?;
    servers.insert(settings.server_name.clone(), entry);

    let mut payload =
        serde_json::to_string_pretty(&Value::Object(document)).map_err(json_err)?;
    payload.push('\n');

    write_atomic(path, payload.as_bytes(), mode)?;
    if let Some(owner) = owner {
        permissions::set_owner(path, owner)?;
    }

    tracing::info!(
        path = %path.display(),
        server = %settings.server_name,
        "Registered MCP server in agent config"
    );
    Ok(MergeOutcome::Written)
}

/// Load the document, treating absence as `{}`. Also returns the mode the
/// rewritten file should keep.
fn read_document(path: &Path) -> PropagateResult<(Map<String, Value>, u32)> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok((Map::new(), 0o600)),
        Err(e) => return Err(io_err(path, e)),
    };

    let mode = std::fs::metadata(path)
        .map(|m| m.permissions().mode() & 0o7777)
        .map_err(|e| io_err(path, e))?;

    if contents.trim().is_empty() {
        return Ok((Map::new(), mode));
    }

    let value: Value = serde_json::from_str(&contents).map_err(|e| PropagateError::Json {
        path: path.to_path_buf(),
        source: e,
    })?;

    match value {
        Value::Object(map) => Ok((map, mode)),
        _ => Err(PropagateError::NotAnObject {
            path: path.to_path_buf(),
            key: "<root>".to_string(),
        }),
    }
}

fn current_token<'a>(document: &'a Map<String, Value>, server: &str) -> Option<&'a str> {
    document
        .get(MCP_SERVERS_KEY)?
        .get(server)?
        .get("env")?
        .get("JUPYTER_TOKEN")?
        .as_str()
}
