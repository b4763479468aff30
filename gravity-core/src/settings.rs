//! Explicit runtime configuration, resolved once at the edge and passed in.

use std::path::{Path, PathBuf};

use crate::error::StateError;
use crate::types::ProcessManagerKind;

/// Directory name under the user's config dir.
pub const STATE_DIR_NAME: &str = "galaxy-gravity";
/// State document file name inside the state dir.
pub const STATE_FILE: &str = "configstate.yaml";
/// Pre-YAML state document, migrated on first open.
pub const LEGACY_STATE_FILE: &str = "configstate.json";

/// Settings shared by the state store, reconciler and backends.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub state_dir: PathBuf,
    /// Manage systemd user units instead of system units.
    pub systemd_user: bool,
    /// Overrides the backend's default unit directory.
    pub unit_dir: Option<PathBuf>,
    pub systemctl: String,
    pub supervisorctl: String,
    pub supervisord: String,
    /// Backend assigned to configs that do not name one.
    pub default_process_manager: ProcessManagerKind,
}

impl Settings {
    /// Settings rooted at an explicit state directory. Used by tests.
    pub fn at(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
            systemd_user: false,
            unit_dir: None,
            systemctl: "systemctl".to_string(),
            supervisorctl: "supervisorctl".to_string(),
            supervisord: "supervisord".to_string(),
            default_process_manager: ProcessManagerKind::default(),
        }
    }

    /// Resolve the state dir from the environment.
    ///
    /// `$GRAVITY_STATE_DIR`, else `$XDG_CONFIG_HOME/galaxy-gravity`, else
    /// `<config dir>/galaxy-gravity`.
    pub fn from_env() -> Result<Self, StateError> {
        if let Some(dir) = std::env::var_os("GRAVITY_STATE_DIR") {
            return Ok(Self::at(PathBuf::from(dir)));
        }
        if let Some(xdg) = std::env::var_os("XDG_CONFIG_HOME") {
            return Ok(Self::at(PathBuf::from(xdg).join(STATE_DIR_NAME)));
        }
        let base = dirs::config_dir().ok_or(StateError::StateDirNotFound)?;
        Ok(Self::at(base.join(STATE_DIR_NAME)))
    }

    pub fn state_path(&self) -> PathBuf {
        self.state_dir.join(STATE_FILE)
    }

    pub fn legacy_state_path(&self) -> PathBuf {
        self.state_dir.join(LEGACY_STATE_FILE)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.state_dir.join("log")
    }

    pub fn supervisor_dir(&self) -> PathBuf {
        self.state_dir.join("supervisor")
    }

    pub fn state_dir(&self) -> &Path {
        &self.state_dir
    }
}
