//! Domain types for registered configs and their services.
//!
//! All path fields use `PathBuf`. All types round-trip through serde +
//! serde_yaml (the state document) and serde_json (legacy state migration).

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Name of a logical deployment unit. Several config files may share one.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct InstanceName(pub String);

impl InstanceName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InstanceName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for InstanceName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for InstanceName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Kind of application a config file describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConfigType {
    #[default]
    Galaxy,
    Reports,
    ToolShed,
}

impl ConfigType {
    /// All config types, in section lookup order.
    pub fn all() -> &'static [ConfigType] {
        &[ConfigType::Galaxy, ConfigType::Reports, ConfigType::ToolShed]
    }

    /// Name of the top-level YAML section holding the application settings.
    pub fn section(&self) -> &'static str {
        match self {
            ConfigType::Galaxy => "galaxy",
            ConfigType::Reports => "reports",
            ConfigType::ToolShed => "tool_shed",
        }
    }
}

impl fmt::Display for ConfigType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.section())
    }
}

/// Role of a managed process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceType {
    /// Web frontend.
    Gunicorn,
    /// Task worker.
    Celery,
    /// Scheduled-task daemon.
    CeleryBeat,
    /// Standalone job handler.
    Standalone,
}

impl ServiceType {
    pub fn all() -> &'static [ServiceType] {
        &[
            ServiceType::Gunicorn,
            ServiceType::Celery,
            ServiceType::CeleryBeat,
            ServiceType::Standalone,
        ]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceType::Gunicorn => "gunicorn",
            ServiceType::Celery => "celery",
            ServiceType::CeleryBeat => "celery-beat",
            ServiceType::Standalone => "standalone",
        }
    }

    /// Human-readable role, used in unit descriptions.
    pub fn description(&self) -> &'static str {
        match self {
            ServiceType::Gunicorn => "web frontend",
            ServiceType::Celery => "task worker",
            ServiceType::CeleryBeat => "task scheduler",
            ServiceType::Standalone => "standalone handler",
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The backend that owns an instance's processes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProcessManagerKind {
    Systemd,
    #[default]
    Supervisor,
}

impl ProcessManagerKind {
    pub fn all() -> &'static [ProcessManagerKind] {
        &[ProcessManagerKind::Systemd, ProcessManagerKind::Supervisor]
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessManagerKind::Systemd => "systemd",
            ProcessManagerKind::Supervisor => "supervisor",
        }
    }
}

impl fmt::Display for ProcessManagerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessManagerKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "systemd" => Ok(ProcessManagerKind::Systemd),
            "supervisor" | "supervisord" => Ok(ProcessManagerKind::Supervisor),
            other => Err(format!(
                "unknown process manager '{other}'; expected: systemd, supervisor"
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// ServiceSpec
// ---------------------------------------------------------------------------

/// One managed process definition within a config.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub service_type: ServiceType,
    /// Unique within its config + type.
    pub service_name: String,
    pub config_type: ConfigType,
    #[serde(default, skip_serializing_if = "BTreeSet::is_empty")]
    pub server_pools: BTreeSet<String>,
    /// Attribute section to take environment variables from; defaults to the
    /// service type.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub environment_from: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub umask: Option<String>,
    /// Service-level environment. Wins over attribute-level values.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, String>,
}

impl ServiceSpec {
    /// A service named after its type (`gunicorn`, `celery`, ...).
    pub fn new(config_type: ConfigType, service_type: ServiceType) -> Self {
        Self::named(config_type, service_type, service_type.as_str())
    }

    pub fn named(
        config_type: ConfigType,
        service_type: ServiceType,
        service_name: impl Into<String>,
    ) -> Self {
        Self {
            service_type,
            service_name: service_name.into(),
            config_type,
            server_pools: BTreeSet::new(),
            environment_from: None,
            umask: None,
            environment: BTreeMap::new(),
        }
    }

    pub fn with_server_pool(mut self, pool: impl Into<String>) -> Self {
        self.server_pools.insert(pool.into());
        self
    }

    /// Structural match: every field that affects the running process is
    /// equal, so no redeployment is needed.
    pub fn full_match(&self, other: &ServiceSpec) -> bool {
        self == other
    }

    /// Key of the attribute environment section this service reads.
    pub fn environment_key(&self) -> &str {
        self.environment_from
            .as_deref()
            .unwrap_or_else(|| self.service_type.as_str())
    }
}

// ---------------------------------------------------------------------------
// Attribs
// ---------------------------------------------------------------------------

/// Task worker tuning used by the celery command templates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CeleryAttribs {
    pub concurrency: u32,
    pub loglevel: String,
}

impl Default for CeleryAttribs {
    fn default() -> Self {
        Self {
            concurrency: 2,
            loglevel: "DEBUG".to_string(),
        }
    }
}

/// Resolved application attributes for one config file.
///
/// Only the fields the unit templates use are typed. Anything else found in
/// the process-management section is kept verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Attribs {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub galaxy_root: Option<PathBuf>,
    pub log_dir: PathBuf,
    pub bind_address: String,
    pub bind_port: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub virtualenv: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub galaxy_user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub galaxy_group: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_limit: Option<String>,
    pub celery: CeleryAttribs,
    /// Environment maps keyed by [`ServiceSpec::environment_key`].
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub environment: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_yaml::Value>,
}

impl Default for Attribs {
    fn default() -> Self {
        Self {
            galaxy_root: None,
            log_dir: PathBuf::from("log"),
            bind_address: "localhost".to_string(),
            bind_port: 8080,
            virtualenv: None,
            galaxy_user: None,
            galaxy_group: None,
            memory_limit: None,
            celery: CeleryAttribs::default(),
            environment: BTreeMap::new(),
            extra: BTreeMap::new(),
        }
    }
}

impl Attribs {
    /// Built-in defaults for a state directory: logs go to `<state_dir>/log`.
    pub fn builtin(state_dir: &Path) -> Self {
        Self {
            log_dir: state_dir.join("log"),
            ..Self::default()
        }
    }

    /// Directory commands are resolved against when not absolute: the
    /// virtualenv's `bin/`, else `<galaxy_root>/.venv/bin`.
    pub fn command_base(&self) -> Option<PathBuf> {
        match (&self.virtualenv, &self.galaxy_root) {
            (Some(venv), _) => Some(venv.join("bin")),
            (None, Some(root)) => Some(root.join(".venv").join("bin")),
            (None, None) => None,
        }
    }
}

// ---------------------------------------------------------------------------
// RegisteredConfig + StateDocument
// ---------------------------------------------------------------------------

/// One registered config file, as persisted in the state document.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisteredConfig {
    pub config_file: PathBuf,
    pub config_type: ConfigType,
    pub instance_name: InstanceName,
    pub attribs: Attribs,
    #[serde(default)]
    pub services: Vec<ServiceSpec>,
    #[serde(default)]
    pub process_manager: ProcessManagerKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registered_at: Option<DateTime<Utc>>,
}

/// Root of the persisted state.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct StateDocument {
    #[serde(default)]
    pub config_files: BTreeMap<PathBuf, RegisteredConfig>,
    /// Deregistered configs whose artifacts have not been purged yet.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub remove_configs: BTreeMap<PathBuf, RegisteredConfig>,
}

impl StateDocument {
    /// Distinct instance names in first-seen order.
    pub fn registered_instances(&self, include_removed: bool) -> Vec<InstanceName> {
        let mut configs: Vec<&RegisteredConfig> = self.config_files.values().collect();
        if include_removed {
            configs.extend(self.remove_configs.values());
        }
        let mut names: Vec<InstanceName> = Vec::new();
        for config in configs {
            if !names.contains(&config.instance_name) {
                names.push(config.instance_name.clone());
            }
        }
        names
    }

    /// Registered configs contributing to `instance`.
    pub fn instance_configs<'a>(
        &'a self,
        instance: &'a InstanceName,
    ) -> impl Iterator<Item = &'a RegisteredConfig> + 'a {
        self.config_files
            .values()
            .filter(move |c| &c.instance_name == instance)
    }

    pub fn is_registered(&self, config_file: &Path) -> bool {
        self.config_files.contains_key(config_file)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
