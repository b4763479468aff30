use std::path::PathBuf;

use thiserror::Error;

use gravity_core::StateError;
use gravity_renderer::RenderError;

/// Error surface for backends and the router.
#[derive(Debug, Error)]
pub enum PmError {
    /// Lifecycle operation with nothing registered.
    #[error("no instances registered (hint: `galaxyctl register /path/to/galaxy.yml`)")]
    NoInstancesRegistered,

    /// A control executable exited non-zero.
    #[error("`{command}` failed ({status}): {stderr}")]
    Control {
        command: String,
        status: String,
        stderr: String,
    },

    /// A control executable could not be started at all.
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("render error: {0}")]
    Render(#[from] RenderError),

    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("cannot determine the systemd user unit directory; set a unit dir explicitly")]
    UnitDirNotFound,
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> PmError {
    PmError::Io {
        path: path.into(),
        source,
    }
}
