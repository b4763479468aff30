//! Change detection between freshly parsed configs and persisted state.
//!
//! [`determine_changes`] re-parses every registered config file and stages a
//! [`ConfigChanges`] per file plus a cross-config [`ChangeSummary`]. Nothing
//! is written until the caller hands both to [`commit_changes`], normally
//! after the process managers have acted on them.
//!
//! A config that fails to re-parse keeps its stored record and its instance
//! name counts as present, so it is never scheduled for removal.

use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;

use crate::error::StateError;
use crate::parser::ConfigParser;
use crate::state::StateStore;
use crate::types::{
    Attribs, InstanceName, ProcessManagerKind, RegisteredConfig, ServiceSpec, StateDocument,
};

/// Staged changes for one config file.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigChanges {
    /// Stored value the diff was computed against.
    pub config: RegisteredConfig,
    pub update_attribs: Option<Attribs>,
    pub update_instance_name: Option<InstanceName>,
    pub update_process_manager: Option<ProcessManagerKind>,
    /// Services that are new or whose definition changed.
    pub update_services: Vec<ServiceSpec>,
    /// Stored services with no matching fresh definition.
    pub remove_services: Vec<ServiceSpec>,
}

impl ConfigChanges {
    fn unchanged(config: RegisteredConfig) -> Self {
        Self {
            config,
            update_attribs: None,
            update_instance_name: None,
            update_process_manager: None,
            update_services: Vec::new(),
            remove_services: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.update_attribs.is_none()
            && self.update_instance_name.is_none()
            && self.update_process_manager.is_none()
            && self.update_services.is_empty()
            && self.remove_services.is_empty()
    }

    /// Apply the staged updates to `config` in place.
    ///
    /// The new service list is the updated specs followed by every stored spec
    /// that is neither marked for removal nor superseded by an update with the
    /// same type and name. No duplicates survive.
    pub fn apply(&self, config: &mut RegisteredConfig) {
        if let Some(attribs) = &self.update_attribs {
            config.attribs = attribs.clone();
        }
        if let Some(name) = &self.update_instance_name {
            config.instance_name = name.clone();
        }
        if let Some(pm) = self.update_process_manager {
            config.process_manager = pm;
        }
        if self.update_services.is_empty() && self.remove_services.is_empty() {
            return;
        }

        let mut services: Vec<ServiceSpec> = Vec::new();
        for spec in &self.update_services {
            if !services.contains(spec) {
                services.push(spec.clone());
            }
        }
        for spec in &config.services {
            let removed = self.remove_services.contains(spec);
            let superseded = services.iter().any(|s| {
                s.service_type == spec.service_type && s.service_name == spec.service_name
            });
            if !removed && !superseded {
                services.push(spec.clone());
            }
        }
        config.services = services;
    }
}

/// Changesets keyed by config file path.
pub type ChangesByFile = BTreeMap<PathBuf, ConfigChanges>;

/// Cross-config outcome of one reconcile cycle.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChangeSummary {
    pub changed_instances: BTreeSet<InstanceName>,
    /// Instances no surviving config references any more.
    pub remove_instances: Vec<InstanceName>,
    /// Deregistered configs to purge on commit, with their last value.
    pub remove_configs: BTreeMap<PathBuf, RegisteredConfig>,
    /// Configs skipped this cycle because they failed to parse.
    pub unreadable_configs: Vec<PathBuf>,
}

impl ChangeSummary {
    pub fn is_empty(&self) -> bool {
        self.changed_instances.is_empty()
            && self.remove_instances.is_empty()
            && self.remove_configs.is_empty()
    }
}

/// `true` when committing would change nothing.
pub fn is_noop(changes: &ChangesByFile, summary: &ChangeSummary) -> bool {
    summary.is_empty() && changes.values().all(ConfigChanges::is_empty)
}

/// Diff every registered config against a fresh parse.
pub fn determine_changes<P>(
    store: &StateStore,
    parser: &P,
) -> Result<(ChangesByFile, ChangeSummary), StateError>
where
    P: ConfigParser + ?Sized,
{
    let doc = store.load()?;
    let mut summary = ChangeSummary {
        remove_configs: doc.remove_configs.clone(),
        ..ChangeSummary::default()
    };
    let mut present: BTreeSet<InstanceName> = BTreeSet::new();
    let mut changes = ChangesByFile::new();

    for (config_file, stored) in &doc.config_files {
        let parsed = match parser.parse(config_file, Some(&stored.attribs)) {
            Ok(parsed) => parsed,
            Err(err) => {
                tracing::warn!(
                    "unable to read {} (hint: use `rename` or `deregister` to fix): {}",
                    config_file.display(),
                    err
                );
                present.insert(stored.instance_name.clone());
                summary.unreadable_configs.push(config_file.clone());
                continue;
            }
        };

        let mut change = ConfigChanges::unchanged(stored.clone());

        // Explicit names win; generated names are kept once assigned.
        let instance_name = match parsed.instance_name {
            Some(name) if name != stored.instance_name => {
                change.update_instance_name = Some(name.clone());
                name
            }
            _ => stored.instance_name.clone(),
        };

        if parsed.attribs != stored.attribs {
            change.update_attribs = Some(parsed.attribs);
        }

        if let Some(pm) = parsed.process_manager {
            if pm != stored.process_manager {
                change.update_process_manager = Some(pm);
            }
        }

        for fresh in &parsed.services {
            let matched = stored.services.iter().any(|s| fresh.full_match(s));
            if !matched && !change.update_services.contains(fresh) {
                change.update_services.push(fresh.clone());
            }
        }
        for old in &stored.services {
            let matched = parsed.services.iter().any(|f| f.full_match(old));
            if !matched {
                change.remove_services.push(old.clone());
            }
        }

        present.insert(instance_name.clone());
        if !change.is_empty() {
            tracing::debug!("changes staged for {}", config_file.display());
            summary.changed_instances.insert(instance_name);
        }
        changes.insert(config_file.clone(), change);
    }

    for name in doc.registered_instances(true) {
        if !present.contains(&name) {
            summary.remove_instances.push(name);
        }
    }

    Ok((changes, summary))
}

/// Persist an accepted changeset.
///
/// Purges the pending-removal records named in `summary`, then applies each
/// config's staged updates. The whole commit is one atomic document write.
pub fn commit_changes(
    store: &StateStore,
    changes: &ChangesByFile,
    summary: &ChangeSummary,
) -> Result<(), StateError> {
    store.modify(|doc| apply_changes(doc, changes, summary))
}

/// Apply a changeset to an in-memory document, as [`commit_changes`] does on
/// disk. Dry runs use this to preview the committed state.
pub fn apply_changes(doc: &mut StateDocument, changes: &ChangesByFile, summary: &ChangeSummary) {
    for config_file in summary.remove_configs.keys() {
        doc.remove_configs.remove(config_file);
    }
    for (config_file, change) in changes {
        match doc.config_files.get_mut(config_file) {
            Some(config) => change.apply(config),
            None => tracing::warn!(
                "{} was deregistered before its changes were committed",
                config_file.display()
            ),
        }
    }
}
