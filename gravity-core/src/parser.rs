//! Boundary to the config parser collaborator.

use std::path::Path;

use crate::error::ParseError;
use crate::types::{Attribs, ConfigType, InstanceName, ProcessManagerKind, ServiceSpec};

/// A config file as seen by the parser, before registration.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedConfig {
    /// `None` when the file does not name its instance.
    pub instance_name: Option<InstanceName>,
    pub config_type: ConfigType,
    pub attribs: Attribs,
    pub services: Vec<ServiceSpec>,
    /// `None` when the file does not choose a backend.
    pub process_manager: Option<ProcessManagerKind>,
}

/// Turns a raw config file plus fallback attributes into a [`ParsedConfig`].
pub trait ConfigParser {
    /// Parse `path`. `defaults` holds the resolved attributes of an earlier
    /// parse; only values the file cannot express (the application root, for
    /// one) are taken from it. Everything else starts from
    /// [`ConfigParser::default_attribs`].
    fn parse(&self, path: &Path, defaults: Option<&Attribs>) -> Result<ParsedConfig, ParseError>;

    /// Attributes used when nothing else is known about a config.
    fn default_attribs(&self) -> Attribs;
}
