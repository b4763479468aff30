//! The capability interface every process manager backend implements, plus
//! the selection and convergence helpers the backends share.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use gravity_core::{
    ConfigType, InstanceName, ProcessManagerKind, RegisteredConfig, StateDocument,
};
use gravity_renderer::{is_managed, program_name};

use crate::error::{io_err, PmError};
use crate::writer::{diff_against_disk, write_unit, FileDiff, WriteResult};

/// Lifecycle operations a backend relays to its process manager.
///
/// `instances` names the instances to act on; empty means every instance the
/// backend owns. Instances owned by another backend are skipped.
pub trait ProcessManager {
    fn kind(&self) -> ProcessManagerKind;

    fn start(&self, doc: &StateDocument, instances: &[InstanceName]) -> Result<(), PmError>;
    fn stop(&self, doc: &StateDocument, instances: &[InstanceName]) -> Result<(), PmError>;
    fn restart(&self, doc: &StateDocument, instances: &[InstanceName]) -> Result<(), PmError>;
    fn reload(&self, doc: &StateDocument, instances: &[InstanceName]) -> Result<(), PmError>;
    fn graceful(&self, doc: &StateDocument, instances: &[InstanceName]) -> Result<(), PmError>;
    /// Human-readable status as printed by the process manager.
    fn status(&self, doc: &StateDocument, instances: &[InstanceName]) -> Result<String, PmError>;
    fn shutdown(&self, doc: &StateDocument, instances: &[InstanceName]) -> Result<(), PmError>;

    /// Converge the unit directory with every config this backend owns.
    fn update(
        &self,
        doc: &StateDocument,
        instances: &[InstanceName],
        opts: UpdateOptions,
    ) -> Result<UpdateReport, PmError>;

    /// Render and write the unit files of a single config.
    fn process_config(
        &self,
        config: &RegisteredConfig,
        opts: UpdateOptions,
    ) -> Result<Vec<WriteResult>, PmError>;
}

/// Flags of an `update` run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct UpdateOptions {
    /// Rewrite units and reload definitions even when nothing changed.
    pub force: bool,
    /// Report what would change without writing, removing or invoking.
    pub dry_run: bool,
}

/// What one backend's `update` did, or would do in a dry run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpdateReport {
    pub kind: ProcessManagerKind,
    pub writes: Vec<WriteResult>,
    pub removed: Vec<PathBuf>,
    /// Filled in dry runs only.
    pub diffs: Vec<FileDiff>,
    /// The process manager was told to re-read its definitions.
    pub reloaded: bool,
}

impl UpdateReport {
    pub fn new(kind: ProcessManagerKind) -> Self {
        Self {
            kind,
            writes: Vec::new(),
            removed: Vec::new(),
            diffs: Vec::new(),
            reloaded: false,
        }
    }

    pub fn changed(&self) -> bool {
        !self.removed.is_empty() || self.writes.iter().any(WriteResult::is_change)
    }
}

// ---------------------------------------------------------------------------
// Selection
// ---------------------------------------------------------------------------

/// Configs owned by `kind`, restricted to `instances` unless it is empty.
pub fn owned_configs<'a>(
    doc: &'a StateDocument,
    kind: ProcessManagerKind,
    instances: &[InstanceName],
) -> Vec<&'a RegisteredConfig> {
    doc.config_files
        .values()
        .filter(|c| c.process_manager == kind)
        .filter(|c| instances.is_empty() || instances.contains(&c.instance_name))
        .collect()
}

/// Program names of every service of `configs`, in config then service order.
pub fn program_names(configs: &[&RegisteredConfig]) -> Vec<String> {
    configs
        .iter()
        .flat_map(|c| {
            c.services
                .iter()
                .map(|s| program_name(c.config_type, &c.instance_name, &s.service_name))
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Convergence
// ---------------------------------------------------------------------------

/// Write one rendered file, recording the result (and its diff in dry runs)
/// in `report`.
pub(crate) fn write_file(
    path: &Path,
    content: &str,
    opts: UpdateOptions,
    report: &mut UpdateReport,
) -> Result<(), PmError> {
    if opts.dry_run {
        if let Some(diff) = diff_against_disk(path, Some(content))? {
            report.diffs.push(diff);
        }
    }
    report
        .writes
        .push(write_unit(path, content, opts.force, opts.dry_run)?);
    Ok(())
}

/// Record removal diffs for `paths` (dry run) and list them as removed.
pub(crate) fn note_removals(
    paths: &[PathBuf],
    opts: UpdateOptions,
    report: &mut UpdateReport,
) -> Result<(), PmError> {
    for path in paths {
        if opts.dry_run {
            if let Some(diff) = diff_against_disk(path, None)? {
                report.diffs.push(diff);
            }
        }
        report.removed.push(path.clone());
    }
    Ok(())
}

/// Managed unit files in `dir` with `extension`, keyed by program name.
///
/// Only files named after a config type prefix and carrying the managed
/// marker are returned; a missing directory holds none.
pub fn managed_units(dir: &Path, extension: &str) -> Result<BTreeMap<String, PathBuf>, PmError> {
    let mut units = BTreeMap::new();
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(units),
        Err(e) => return Err(io_err(dir, e)),
    };
    let prefixes: Vec<String> = ConfigType::all().iter().map(|t| format!("{t}-")).collect();

    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let path = entry.path();
        let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
            continue;
        };
        let Some(stem) = file_name.strip_suffix(extension) else {
            continue;
        };
        if !prefixes.iter().any(|p| stem.starts_with(p.as_str())) || !path.is_file() {
            continue;
        }
        let contents = std::fs::read_to_string(&path).map_err(|e| io_err(&path, e))?;
        if is_managed(&contents) {
            units.insert(stem.to_string(), path);
        } else {
            tracing::debug!("not managed, leaving alone: {}", path.display());
        }
    }
    Ok(units)
}

/// Managed units whose program is not in `intended`.
pub fn orphans(
    dir: &Path,
    extension: &str,
    intended: &BTreeSet<String>,
) -> Result<BTreeMap<String, PathBuf>, PmError> {
    let mut units = managed_units(dir, extension)?;
    units.retain(|name, _| !intended.contains(name));
    Ok(units)
}

#[cfg(test)]
mod tests {
    use super::*;
    use gravity_core::{Attribs, ServiceSpec, ServiceType};
    use gravity_renderer::MANAGED_MARKER;
    use tempfile::TempDir;

    fn config(path: &str, instance: &str, kind: ProcessManagerKind) -> RegisteredConfig {
        RegisteredConfig {
            config_file: PathBuf::from(path),
            config_type: ConfigType::Galaxy,
            instance_name: InstanceName::from(instance),
            attribs: Attribs::default(),
            services: vec![
                ServiceSpec::new(ConfigType::Galaxy, ServiceType::Gunicorn),
                ServiceSpec::new(ConfigType::Galaxy, ServiceType::Celery),
            ],
            process_manager: kind,
            registered_at: None,
        }
    }

    #[test]
    fn owned_configs_filters_by_kind_and_instance() {
        let mut doc = StateDocument::default();
        for (path, instance, kind) in [
            ("/a.yml", "a", ProcessManagerKind::Systemd),
            ("/b.yml", "b", ProcessManagerKind::Systemd),
            ("/c.yml", "c", ProcessManagerKind::Supervisor),
        ] {
            doc.config_files
                .insert(PathBuf::from(path), config(path, instance, kind));
        }

        let all = owned_configs(&doc, ProcessManagerKind::Systemd, &[]);
        assert_eq!(all.len(), 2);
        let only_b = owned_configs(&doc, ProcessManagerKind::Systemd, &[InstanceName::from("b")]);
        assert_eq!(program_names(&only_b), vec!["galaxy-b-gunicorn", "galaxy-b-celery"]);
        let foreign = owned_configs(&doc, ProcessManagerKind::Systemd, &[InstanceName::from("c")]);
        assert!(foreign.is_empty());
    }

    #[test]
    fn orphan_scan_skips_foreign_and_hand_written_files() {
        let tmp = TempDir::new().unwrap();
        let managed = format!("# {MANAGED_MARKER}\n[Unit]\n");
        std::fs::write(tmp.path().join("galaxy-main-gunicorn.service"), &managed).unwrap();
        std::fs::write(tmp.path().join("galaxy-old-celery.service"), &managed).unwrap();
        std::fs::write(tmp.path().join("galaxy-custom.service"), "[Unit]\n").unwrap();
        std::fs::write(tmp.path().join("nginx.service"), &managed).unwrap();
        std::fs::write(tmp.path().join("galaxy-main-gunicorn.service.gravity.tmp"), &managed)
            .unwrap();

        let intended = BTreeSet::from(["galaxy-main-gunicorn".to_string()]);
        let found = orphans(tmp.path(), ".service", &intended).unwrap();
        assert_eq!(found.keys().collect::<Vec<_>>(), vec!["galaxy-old-celery"]);
    }

    #[test]
    fn missing_unit_dir_has_no_units() {
        let tmp = TempDir::new().unwrap();
        let units = managed_units(&tmp.path().join("absent"), ".conf").unwrap();
        assert!(units.is_empty());
    }
}
