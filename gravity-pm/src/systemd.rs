//! systemd backend: one `.service` unit per service, controlled with
//! `systemctl`.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use gravity_core::{InstanceName, ProcessManagerKind, RegisteredConfig, Settings, StateDocument};
use gravity_renderer::Renderer;

use crate::backend::{
    note_removals, orphans, owned_configs, program_names, write_file, ProcessManager,
    UpdateOptions, UpdateReport,
};
use crate::control::{invoke, Control, ControlOutput};
use crate::error::PmError;
use crate::writer::{ensure_dir, remove_unit, WriteResult};

const UNIT_SUFFIX: &str = ".service";
const SYSTEM_UNIT_DIR: &str = "/etc/systemd/system";

pub struct SystemdBackend {
    settings: Settings,
    unit_dir: PathBuf,
    renderer: Renderer,
    control: Arc<dyn Control>,
}

impl SystemdBackend {
    pub fn new(settings: &Settings, control: Arc<dyn Control>) -> Result<Self, PmError> {
        Ok(Self {
            unit_dir: unit_dir(settings)?,
            settings: settings.clone(),
            renderer: Renderer::new()?,
            control,
        })
    }

    pub fn unit_dir(&self) -> &Path {
        &self.unit_dir
    }

    fn unit_path(&self, program: &str) -> PathBuf {
        self.unit_dir.join(format!("{program}{UNIT_SUFFIX}"))
    }

    fn systemctl(&self, args: Vec<String>, ignore_failure: bool) -> Result<ControlOutput, PmError> {
        let mut full = Vec::with_capacity(args.len() + 1);
        if self.settings.systemd_user {
            full.push("--user".to_string());
        }
        full.extend(args);
        invoke(
            self.control.as_ref(),
            &self.settings.systemctl,
            full,
            ignore_failure,
        )
    }

    /// Issue `systemctl <verb...>` for every unit of the targeted instances.
    fn control_units(
        &self,
        verb: &[&str],
        doc: &StateDocument,
        instances: &[InstanceName],
        ignore_failure: bool,
    ) -> Result<Option<ControlOutput>, PmError> {
        let configs = owned_configs(doc, self.kind(), instances);
        let units: Vec<String> = program_names(&configs)
            .into_iter()
            .map(|p| format!("{p}{UNIT_SUFFIX}"))
            .collect();
        if units.is_empty() {
            tracing::debug!("systemd: no units to {}", verb.join(" "));
            return Ok(None);
        }
        let mut args: Vec<String> = verb.iter().map(|v| v.to_string()).collect();
        args.extend(units);
        self.systemctl(args, ignore_failure).map(Some)
    }

    fn render_config(&self, config: &RegisteredConfig) -> Result<Vec<(String, String)>, PmError> {
        let mut units = Vec::with_capacity(config.services.len());
        for service in &config.services {
            let unit = self
                .renderer
                .unit_context(config, service, &self.settings.state_dir)?;
            let content = self
                .renderer
                .systemd_service(&unit, self.settings.systemd_user)?;
            units.push((unit.program_name, content));
        }
        Ok(units)
    }

    fn write_config(
        &self,
        config: &RegisteredConfig,
        opts: UpdateOptions,
        report: &mut UpdateReport,
    ) -> Result<(), PmError> {
        if !opts.dry_run {
            ensure_dir(&config.attribs.log_dir)?;
        }
        for (program, content) in self.render_config(config)? {
            write_file(&self.unit_path(&program), &content, opts, report)?;
        }
        Ok(())
    }
}

/// Explicit override, else the system or per-user unit directory.
fn unit_dir(settings: &Settings) -> Result<PathBuf, PmError> {
    if let Some(dir) = &settings.unit_dir {
        return Ok(dir.clone());
    }
    if settings.systemd_user {
        let base = dirs::config_dir().ok_or(PmError::UnitDirNotFound)?;
        return Ok(base.join("systemd").join("user"));
    }
    Ok(PathBuf::from(SYSTEM_UNIT_DIR))
}

impl ProcessManager for SystemdBackend {
    fn kind(&self) -> ProcessManagerKind {
        ProcessManagerKind::Systemd
    }

    fn start(&self, doc: &StateDocument, instances: &[InstanceName]) -> Result<(), PmError> {
        self.control_units(&["start"], doc, instances, false).map(|_| ())
    }

    fn stop(&self, doc: &StateDocument, instances: &[InstanceName]) -> Result<(), PmError> {
        self.control_units(&["stop"], doc, instances, false).map(|_| ())
    }

    fn restart(&self, doc: &StateDocument, instances: &[InstanceName]) -> Result<(), PmError> {
        self.control_units(&["restart"], doc, instances, false).map(|_| ())
    }

    fn reload(&self, doc: &StateDocument, instances: &[InstanceName]) -> Result<(), PmError> {
        self.control_units(&["reload"], doc, instances, false).map(|_| ())
    }

    fn graceful(&self, doc: &StateDocument, instances: &[InstanceName]) -> Result<(), PmError> {
        self.reload(doc, instances)
    }

    fn status(&self, doc: &StateDocument, instances: &[InstanceName]) -> Result<String, PmError> {
        // `systemctl status` exits non-zero for inactive units.
        let output = self.control_units(&["--no-pager", "status"], doc, instances, true)?;
        Ok(output.map(|o| o.stdout).unwrap_or_default())
    }

    fn shutdown(&self, doc: &StateDocument, instances: &[InstanceName]) -> Result<(), PmError> {
        self.stop(doc, instances)
    }

    fn update(
        &self,
        doc: &StateDocument,
        instances: &[InstanceName],
        opts: UpdateOptions,
    ) -> Result<UpdateReport, PmError> {
        let mut report = UpdateReport::new(self.kind());

        let intended: BTreeSet<String> = program_names(&owned_configs(doc, self.kind(), &[]))
            .into_iter()
            .collect();
        for config in owned_configs(doc, self.kind(), instances) {
            self.write_config(config, opts, &mut report)?;
        }

        let orphans = orphans(&self.unit_dir, UNIT_SUFFIX, &intended)?;
        if !orphans.is_empty() {
            let paths: Vec<PathBuf> = orphans.values().cloned().collect();
            if !opts.dry_run {
                let mut args = vec!["stop".to_string()];
                args.extend(orphans.keys().map(|p| format!("{p}{UNIT_SUFFIX}")));
                self.systemctl(args, false)?;
                for path in &paths {
                    remove_unit(path)?;
                }
            }
            note_removals(&paths, opts, &mut report)?;
        }

        if !opts.dry_run && (report.changed() || opts.force) {
            self.systemctl(vec!["daemon-reload".to_string()], false)?;
            report.reloaded = true;
        }
        Ok(report)
    }

    fn process_config(
        &self,
        config: &RegisteredConfig,
        opts: UpdateOptions,
    ) -> Result<Vec<WriteResult>, PmError> {
        let mut report = UpdateReport::new(self.kind());
        self.write_config(config, opts, &mut report)?;
        Ok(report.writes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_unit_dir_wins() {
        let mut settings = Settings::at("/state");
        settings.unit_dir = Some(PathBuf::from("/tmp/units"));
        settings.systemd_user = true;
        assert_eq!(unit_dir(&settings).unwrap(), PathBuf::from("/tmp/units"));
    }

    #[test]
    fn system_scope_uses_etc() {
        let settings = Settings::at("/state");
        assert_eq!(unit_dir(&settings).unwrap(), PathBuf::from(SYSTEM_UNIT_DIR));
    }
}
