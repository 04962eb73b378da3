//! Project-scope registration of the MCP server.
//!
//! The agent reads MCP servers from `<work_dir>/.mcp.json`. At startup the
//! bridge adds its own entry there unless the project already names a
//! server called [`MCP_SERVER_NAME`] in `.mcp.json` or
//! `.claude/settings.json`.

use std::fs;
use std::path::Path;

use serde_json::{json, Map, Value};
use tracing::{debug, info};

use super::handler::MCP_SERVER_NAME;
use crate::{AppError, Result};

/// Files checked for an existing entry, relative to the working directory.
const SETTINGS_FILES: &[&str] = &[".claude/settings.json", ".mcp.json"];

/// Ensure the project registers the MCP server.
///
/// `command` is the server binary and `config_path` the configuration it
/// is started with. Returns `true` when an entry was written.
///
/// # Errors
///
/// Returns `AppError::Config` if `.mcp.json` exists but is not a JSON
/// object, and `AppError::Io` if it cannot be written.
pub fn ensure_registered(work_dir: &Path, command: &Path, config_path: &Path) -> Result<bool> {
    if is_registered(work_dir) {
        debug!("mcp server already registered");
        return Ok(false);
    }

    let path = work_dir.join(".mcp.json");
    let mut root = match fs::read_to_string(&path) {
        Ok(raw) => match serde_json::from_str::<Value>(&raw) {
            Ok(Value::Object(map)) => map,
            _ => {
                return Err(AppError::Config(format!(
                    "{} is not a JSON object, not registering the MCP server",
                    path.display()
                )))
            }
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Map::new(),
        Err(err) => {
            return Err(AppError::Io(format!(
                "failed to read {}: {err}",
                path.display()
            )))
        }
    };

    let servers = root
        .entry("mcpServers")
        .or_insert_with(|| Value::Object(Map::new()));
    let Value::Object(servers) = servers else {
        return Err(AppError::Config(format!(
            "{}: mcpServers is not an object",
            path.display()
        )));
    };
    servers.insert(
        MCP_SERVER_NAME.to_owned(),
        json!({
            "command": command.to_string_lossy(),
            "args": ["--config", config_path.to_string_lossy()],
        }),
    );

    let rendered = serde_json::to_string_pretty(&Value::Object(root))
        .map_err(|err| AppError::Io(format!("failed to render .mcp.json: {err}")))?;
    fs::write(&path, rendered + "\n")
        .map_err(|err| AppError::Io(format!("failed to write {}: {err}", path.display())))?;
    info!(path = %path.display(), "registered MCP server");
    Ok(true)
}

/// Whether any project settings file already names the server.
#[must_use]
pub fn is_registered(work_dir: &Path) -> bool {
    SETTINGS_FILES.iter().any(|name| {
        fs::read_to_string(work_dir.join(name))
            .ok()
            .and_then(|raw| serde_json::from_str::<Value>(&raw).ok())
            .is_some_and(|value| value["mcpServers"].get(MCP_SERVER_NAME).is_some())
    })
}
