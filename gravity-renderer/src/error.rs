//! Error types for gravity-renderer.

use thiserror::Error;

/// All errors that can arise while rendering commands and unit files.
#[derive(Debug, Error)]
pub enum RenderError {
    /// Tera template engine error.
    #[error("template engine error: {0}")]
    Tera(#[from] tera::Error),

    /// The config has no application root to run its services from.
    #[error("{config_file} has no galaxy_root; re-register it or set one")]
    MissingRoot { config_file: String },
}
