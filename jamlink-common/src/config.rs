//! Configuration loading and data folder resolution

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// How a pending invitation cancel is persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InvitationCancelMode {
    /// Delete the invitation record (the platform's historical behavior).
    #[default]
    Delete,
    /// Keep the record with a `cancelled` status for an audit trail.
    MarkCancelled,
}

/// Engine tuning knobs, loadable from a TOML config file.
///
/// The retry fields govern how conditional writes behave when they lose a
/// race or hit transient store failures; validation and state-machine
/// errors are never retried.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Attempts per conditional write before a conflict surfaces
    pub max_write_attempts: u32,
    /// Initial backoff between attempts (doubled each retry)
    pub retry_base_delay_ms: u64,
    /// Backoff ceiling
    pub retry_max_delay_ms: u64,
    pub invitation_cancel_mode: InvitationCancelMode,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            max_write_attempts: 3,
            retry_base_delay_ms: 10,
            retry_max_delay_ms: 1000,
            invitation_cancel_mode: InvitationCancelMode::default(),
        }
    }
}

impl EngineSettings {
    /// Load settings following the priority order:
    /// 1. `JAMLINK_CONFIG` environment variable (path to a TOML file)
    /// 2. `<config_dir>/jamlink/config.toml`
    /// 3. Compiled defaults
    pub fn load() -> Self {
        match find_config_file() {
            Some(path) => match Self::load_from(&path) {
                Ok(settings) => settings,
                Err(err) => {
                    tracing::warn!(
                        path = %path.display(),
                        error = %err,
                        "Failed to load config file, using defaults"
                    );
                    Self::default()
                }
            },
            None => Self::default(),
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        toml::from_str(&content)
            .map_err(|e| Error::Validation(format!("invalid config file {}: {e}", path.display())))
    }
}

fn find_config_file() -> Option<PathBuf> {
    if let Ok(path) = std::env::var("JAMLINK_CONFIG") {
        return Some(PathBuf::from(path));
    }
    let path = dirs::config_dir()?.join("jamlink").join("config.toml");
    path.exists().then_some(path)
}

/// Resolve the data folder (SQLite store location) following the priority
/// order: environment variable, then OS-dependent default.
pub fn resolve_data_dir() -> PathBuf {
    if let Ok(path) = std::env::var("JAMLINK_DATA_DIR") {
        return PathBuf::from(path);
    }
    dirs::data_local_dir()
        .map(|d| d.join("jamlink"))
        .unwrap_or_else(|| PathBuf::from("./jamlink_data"))
}
