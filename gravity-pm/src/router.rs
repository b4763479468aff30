//! Process manager router: resolves instance names, groups them by backend
//! and dispatches lifecycle operations.

use std::collections::BTreeMap;
use std::sync::Arc;

use gravity_core::{InstanceName, ProcessManagerKind, Settings, StateDocument, StateStore};

use crate::backend::{ProcessManager, UpdateOptions, UpdateReport};
use crate::control::Control;
use crate::error::PmError;
use crate::supervisor::SupervisorBackend;
use crate::systemd::SystemdBackend;

/// Lifecycle operations routed to the backend owning each instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Start,
    Stop,
    Restart,
    Reload,
    Graceful,
    Status,
    Shutdown,
}

impl Operation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Operation::Start => "start",
            Operation::Stop => "stop",
            Operation::Restart => "restart",
            Operation::Reload => "reload",
            Operation::Graceful => "graceful",
            Operation::Status => "status",
            Operation::Shutdown => "shutdown",
        }
    }
}

/// Result of a routed lifecycle operation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Dispatch {
    /// Requested names that are not registered.
    pub unknown: Vec<InstanceName>,
    /// Instances handed to each backend.
    pub groups: BTreeMap<ProcessManagerKind, Vec<InstanceName>>,
    /// Output per backend (`status` only).
    pub output: Vec<(ProcessManagerKind, String)>,
}

/// Result of a routed `update`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateDispatch {
    pub unknown: Vec<InstanceName>,
    pub reports: Vec<UpdateReport>,
}

/// Build the backend for `kind`. New backends are added here.
pub fn build_backend(
    kind: ProcessManagerKind,
    settings: &Settings,
    control: Arc<dyn Control>,
) -> Result<Box<dyn ProcessManager>, PmError> {
    Ok(match kind {
        ProcessManagerKind::Systemd => Box::new(SystemdBackend::new(settings, control)?),
        ProcessManagerKind::Supervisor => Box::new(SupervisorBackend::new(settings, control)?),
    })
}

pub struct Router {
    store: StateStore,
    backends: Vec<Box<dyn ProcessManager>>,
}

impl Router {
    /// Router over every known backend.
    pub fn new(
        settings: &Settings,
        store: StateStore,
        control: Arc<dyn Control>,
    ) -> Result<Self, PmError> {
        let backends = ProcessManagerKind::all()
            .iter()
            .map(|kind| build_backend(*kind, settings, Arc::clone(&control)))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::with_backends(store, backends))
    }

    pub fn with_backends(store: StateStore, backends: Vec<Box<dyn ProcessManager>>) -> Self {
        Self { store, backends }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    fn backend(&self, kind: ProcessManagerKind) -> Option<&dyn ProcessManager> {
        self.backends
            .iter()
            .find(|b| b.kind() == kind)
            .map(|b| b.as_ref())
    }

    /// Run `op` on `requested` (empty means every registered instance).
    pub fn dispatch(&self, op: Operation, requested: &[InstanceName]) -> Result<Dispatch, PmError> {
        let doc = self.store.load()?;
        let (resolved, unknown) = resolve(&doc, requested)?;
        let groups = group_by_backend(&doc, &resolved);

        let mut output = Vec::new();
        for (kind, instances) in &groups {
            let Some(backend) = self.backend(*kind) else {
                tracing::warn!(
                    "no {kind} backend available, skipping {} instance(s)",
                    instances.len()
                );
                continue;
            };
            tracing::debug!("{} via {kind}: {:?}", op.as_str(), instances);
            match op {
                Operation::Start => backend.start(&doc, instances)?,
                Operation::Stop => backend.stop(&doc, instances)?,
                Operation::Restart => backend.restart(&doc, instances)?,
                Operation::Reload => backend.reload(&doc, instances)?,
                Operation::Graceful => backend.graceful(&doc, instances)?,
                Operation::Shutdown => backend.shutdown(&doc, instances)?,
                Operation::Status => output.push((*kind, backend.status(&doc, instances)?)),
            }
        }
        Ok(Dispatch {
            unknown,
            groups,
            output,
        })
    }

    /// Converge every backend with the registered state.
    ///
    /// Offered to all backends, so one that lost an instance to another
    /// backend removes its units. No registered instances is not an error
    /// here: the update then only removes leftovers.
    pub fn update(
        &self,
        requested: &[InstanceName],
        opts: UpdateOptions,
    ) -> Result<UpdateDispatch, PmError> {
        let doc = self.store.load()?;
        self.update_from(&doc, requested, opts)
    }

    /// [`Router::update`] against `doc` instead of the stored document.
    pub fn update_from(
        &self,
        doc: &StateDocument,
        requested: &[InstanceName],
        opts: UpdateOptions,
    ) -> Result<UpdateDispatch, PmError> {
        let known = doc.registered_instances(false);
        let (instances, unknown): (Vec<InstanceName>, Vec<InstanceName>) = requested
            .iter()
            .cloned()
            .partition(|name| known.contains(name));
        for name in &unknown {
            tracing::warn!("instance not registered: {name}");
        }
        if !requested.is_empty() && instances.is_empty() {
            return Ok(UpdateDispatch {
                unknown,
                reports: Vec::new(),
            });
        }

        let mut reports = Vec::with_capacity(self.backends.len());
        for backend in &self.backends {
            reports.push(backend.update(doc, &instances, opts)?);
        }
        Ok(UpdateDispatch { unknown, reports })
    }
}

/// Split `requested` into registered and unknown names. Empty selects every
/// registered instance.
pub fn resolve(
    doc: &StateDocument,
    requested: &[InstanceName],
) -> Result<(Vec<InstanceName>, Vec<InstanceName>), PmError> {
    let registered = doc.registered_instances(false);
    if registered.is_empty() {
        return Err(PmError::NoInstancesRegistered);
    }
    if requested.is_empty() {
        return Ok((registered, Vec::new()));
    }
    let mut resolved = Vec::new();
    let mut unknown = Vec::new();
    for name in requested {
        if registered.contains(name) {
            if !resolved.contains(name) {
                resolved.push(name.clone());
            }
        } else {
            tracing::warn!("instance not registered: {name}");
            unknown.push(name.clone());
        }
    }
    Ok((resolved, unknown))
}

/// Group instances by the backend of their configs. An instance whose
/// configs use different backends lands in each of them.
pub fn group_by_backend(
    doc: &StateDocument,
    instances: &[InstanceName],
) -> BTreeMap<ProcessManagerKind, Vec<InstanceName>> {
    let mut groups: BTreeMap<ProcessManagerKind, Vec<InstanceName>> = BTreeMap::new();
    for instance in instances {
        for config in doc.instance_configs(instance) {
            let group = groups.entry(config.process_manager).or_default();
            if !group.contains(instance) {
                group.push(instance.clone());
            }
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use gravity_core::{Attribs, ConfigType, RegisteredConfig};
    use std::path::PathBuf;

    fn doc(entries: &[(&str, &str, ProcessManagerKind)]) -> StateDocument {
        let mut doc = StateDocument::default();
        for (path, instance, kind) in entries {
            doc.config_files.insert(
                PathBuf::from(path),
                RegisteredConfig {
                    config_file: PathBuf::from(path),
                    config_type: ConfigType::Galaxy,
                    instance_name: InstanceName::from(*instance),
                    attribs: Attribs::default(),
                    services: vec![],
                    process_manager: *kind,
                    registered_at: None,
                },
            );
        }
        doc
    }

    #[test]
    fn empty_state_is_a_usage_error() {
        let err = resolve(&StateDocument::default(), &[]).unwrap_err();
        assert!(matches!(err, PmError::NoInstancesRegistered));
    }

    #[test]
    fn unknown_names_are_reported() {
        let doc = doc(&[("/a.yml", "a", ProcessManagerKind::Systemd)]);
        let (resolved, unknown) =
            resolve(&doc, &[InstanceName::from("a"), InstanceName::from("zz")]).unwrap();
        assert_eq!(resolved, vec![InstanceName::from("a")]);
        assert_eq!(unknown, vec![InstanceName::from("zz")]);
    }

    #[test]
    fn instances_are_grouped_by_backend() {
        let doc = doc(&[
            ("/a.yml", "a", ProcessManagerKind::Systemd),
            ("/b.yml", "b", ProcessManagerKind::Supervisor),
            ("/b2.yml", "b", ProcessManagerKind::Supervisor),
        ]);
        let (resolved, _) = resolve(&doc, &[]).unwrap();
        let groups = group_by_backend(&doc, &resolved);
        assert_eq!(groups[&ProcessManagerKind::Systemd], vec![InstanceName::from("a")]);
        assert_eq!(groups[&ProcessManagerKind::Supervisor], vec![InstanceName::from("b")]);
    }
}
