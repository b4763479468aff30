//! Gravity core library: domain types, state store, reconciler, registration.
//!
//! - [`types`]: registered configs, services, attributes
//! - [`settings`]: explicit runtime configuration
//! - [`state`]: persisted `config_files` / `remove_configs` document
//! - [`parser`]: boundary to the config parser
//! - [`reconcile`]: changeset computation and commit
//! - [`registration`]: register / deregister / rename

pub mod error;
pub mod parser;
pub mod reconcile;
pub mod registration;
pub mod settings;
pub mod state;
pub mod types;

pub use error::{ParseError, RegistrationError, StateError};
pub use parser::{ConfigParser, ParsedConfig};
pub use reconcile::{
    apply_changes, commit_changes, determine_changes, is_noop, ChangeSummary, ChangesByFile,
    ConfigChanges,
};
pub use registration::{deregister, register, rename, RegisterOutcome};
pub use settings::Settings;
pub use state::StateStore;
pub use types::{
    Attribs, CeleryAttribs, ConfigType, InstanceName, ProcessManagerKind, RegisteredConfig,
    ServiceSpec, ServiceType, StateDocument,
};
