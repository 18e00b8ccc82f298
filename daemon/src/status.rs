use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::orchestrator::Stage;

/// Runtime status written by the daemon next to its config file.
/// The settings UI reads this file (read-only) to show what the daemon is doing.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct DaemonStatus {
    /// Daemon binary version (set from Cargo.toml at compile time).
    pub version: String,
    /// Which monitor of the chain is running.
    pub stage: Stage,
    /// RFC 3339 timestamp of the last time the whole chain completed, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_completed: Option<String>,
    /// Human-readable error message if the daemon hit a non-fatal error.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonStatus {
    pub fn new() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            stage: Stage::Idle,
            last_completed: None,
            error: None,
        }
    }
}

impl Default for DaemonStatus {
    fn default() -> Self {
        Self::new()
    }
}

/// Serializes `status` to TOML and writes it to `path`, creating the parent
/// directory if needed.  Failures are logged and otherwise ignored.
pub fn write_status(path: &Path, status: &DaemonStatus) {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        if let Err(e) = std::fs::create_dir_all(parent) {
            tracing::warn!("failed to create status directory {}: {e}", parent.display());
            return;
        }
    }
    match toml::to_string_pretty(status) {
        Ok(content) => {
            if let Err(e) = std::fs::write(path, content) {
                tracing::warn!("failed to write status file {}: {e}", path.display());
            }
        }
        Err(e) => tracing::warn!("failed to serialize status: {e}"),
    }
}
