//! Error types for gravity-core.

use std::path::PathBuf;

use thiserror::Error;

/// Errors from reading or writing the persisted state document.
#[derive(Debug, Error)]
pub enum StateError {
    /// Underlying I/O failure, annotated with the path involved.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (write path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// The state file exists but does not parse.
    #[error("failed to parse state at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// The legacy JSON state file does not parse.
    #[error("failed to parse legacy state at {path}: {source}")]
    LegacyParse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    /// Legacy JSON state converted to YAML but did not read back identically.
    #[error("converted state differs from {legacy}; remove {path} to retry")]
    MigrationMismatch { legacy: PathBuf, path: PathBuf },

    /// No state directory could be derived from the environment.
    #[error("cannot determine config directory; set $GRAVITY_STATE_DIR")]
    StateDirNotFound,
}

/// Errors produced by a config parser.
#[derive(Debug, Error)]
pub enum ParseError {
    /// The config file could not be read.
    #[error("unable to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The config file is not valid YAML.
    #[error("failed to parse {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// No recognised application section.
    #[error("{path} does not look like a valid Galaxy, Reports or Tool Shed configuration file")]
    UnknownType { path: PathBuf },

    /// The application root could not be located.
    #[error("cannot locate Galaxy root directory: set `galaxy_root` in the `gravity` section of {path}")]
    MissingRoot { path: PathBuf },

    /// A value has the right YAML shape but an unusable content.
    #[error("invalid value for `{key}` in {path}: {message}")]
    InvalidValue {
        path: PathBuf,
        key: String,
        message: String,
    },
}

/// Errors from register / deregister / rename.
#[derive(Debug, Error)]
pub enum RegistrationError {
    #[error("state error: {0}")]
    State(#[from] StateError),

    #[error("{path} is not registered")]
    NotRegistered { path: PathBuf },

    #[error("{path} is already registered")]
    AlreadyRegistered { path: PathBuf },

    #[error("cannot register {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: ParseError,
    },

    #[error("cannot resolve path {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StateError {
    StateError::Io {
        path: path.into(),
        source,
    }
}
