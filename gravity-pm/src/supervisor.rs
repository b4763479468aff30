//! supervisor backend: gravity runs its own supervisord, one `[program:x]`
//! include file per service.
//!
//! Layout under `<state_dir>/supervisor`:
//!
//! ```text
//! supervisord.conf        main config, rewritten on update
//! supervisord.conf.d/     <program>.conf include files
//! supervisord.pid         present while the daemon runs
//! supervisor.sock         control socket
//! ```

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::sync::Arc;

use gravity_core::{InstanceName, ProcessManagerKind, RegisteredConfig, Settings, StateDocument};
use gravity_renderer::{Renderer, SupervisordContext};

use crate::backend::{
    note_removals, orphans, owned_configs, program_names, write_file, ProcessManager,
    UpdateOptions, UpdateReport,
};
use crate::control::{invoke, Control, ControlOutput};
use crate::error::PmError;
use crate::writer::{ensure_dir, remove_unit, WriteResult};

const PROGRAM_SUFFIX: &str = ".conf";

pub struct SupervisorBackend {
    settings: Settings,
    supervisord: SupervisordContext,
    renderer: Renderer,
    control: Arc<dyn Control>,
}

impl SupervisorBackend {
    pub fn new(settings: &Settings, control: Arc<dyn Control>) -> Result<Self, PmError> {
        Ok(Self {
            supervisord: SupervisordContext::new(&settings.supervisor_dir(), &settings.log_dir()),
            settings: settings.clone(),
            renderer: Renderer::new()?,
            control,
        })
    }

    pub fn conf_path(&self) -> PathBuf {
        self.settings.supervisor_dir().join("supervisord.conf")
    }

    pub fn include_dir(&self) -> PathBuf {
        PathBuf::from(&self.supervisord.include_dir)
    }

    /// supervisord is considered up while its pid file exists.
    pub fn is_running(&self) -> bool {
        PathBuf::from(&self.supervisord.pid_file).exists()
    }

    fn supervisorctl(&self, args: Vec<String>, ignore_failure: bool) -> Result<ControlOutput, PmError> {
        let mut full = vec!["-c".to_string(), self.conf_path().display().to_string()];
        full.extend(args);
        invoke(
            self.control.as_ref(),
            &self.settings.supervisorctl,
            full,
            ignore_failure,
        )
    }

    fn start_daemon(&self) -> Result<(), PmError> {
        tracing::info!("starting supervisord");
        invoke(
            self.control.as_ref(),
            &self.settings.supervisord,
            vec!["-c".to_string(), self.conf_path().display().to_string()],
            false,
        )?;
        Ok(())
    }

    /// `supervisorctl <op> <programs...>` for the targeted instances.
    fn control_programs(
        &self,
        op: &[&str],
        doc: &StateDocument,
        instances: &[InstanceName],
    ) -> Result<(), PmError> {
        let programs = program_names(&owned_configs(doc, self.kind(), instances));
        if programs.is_empty() {
            tracing::debug!("supervisor: no programs to {}", op.join(" "));
            return Ok(());
        }
        let mut args: Vec<String> = op.iter().map(|s| s.to_string()).collect();
        args.extend(programs);
        self.supervisorctl(args, false)?;
        Ok(())
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
        let include_dir = self.include_dir();
        for service in &config.services {
            let unit = self
                .renderer
                .unit_context(config, service, &self.settings.state_dir)?;
            let content = self.renderer.supervisor_program(&unit)?;
            let path = include_dir.join(format!("{}{PROGRAM_SUFFIX}", unit.program_name));
            write_file(&path, &content, opts, report)?;
        }
        Ok(())
    }

    /// Programs whose include file was written by this update.
    fn rewritten_programs(&self, report: &UpdateReport) -> Vec<String> {
        let include_dir = self.include_dir();
        report
            .writes
            .iter()
            .filter_map(|write| match write {
                WriteResult::Written { path } if path.parent() == Some(include_dir.as_path()) => {
                    path.file_name()?
                        .to_str()?
                        .strip_suffix(PROGRAM_SUFFIX)
                        .map(str::to_string)
                }
                _ => None,
            })
            .collect()
    }

    fn write_supervisord_conf(
        &self,
        opts: UpdateOptions,
        report: &mut UpdateReport,
    ) -> Result<(), PmError> {
        if !opts.dry_run {
            ensure_dir(&self.settings.log_dir())?;
            ensure_dir(&self.include_dir())?;
        }
        let content = self.renderer.supervisord_conf(&self.supervisord)?;
        write_file(&self.conf_path(), &content, opts, report)
    }
}

impl ProcessManager for SupervisorBackend {
    fn kind(&self) -> ProcessManagerKind {
        ProcessManagerKind::Supervisor
    }

    /// Programs do not autostart, so a freshly launched supervisord runs only
    /// what is started here.
    fn start(&self, doc: &StateDocument, instances: &[InstanceName]) -> Result<(), PmError> {
        if owned_configs(doc, self.kind(), instances).is_empty() {
            return Ok(());
        }
        if !self.is_running() {
            self.start_daemon()?;
        }
        self.control_programs(&["start"], doc, instances)
    }

    fn stop(&self, doc: &StateDocument, instances: &[InstanceName]) -> Result<(), PmError> {
        if !self.is_running() {
            tracing::info!("supervisord is not running");
            return Ok(());
        }
        self.control_programs(&["stop"], doc, instances)
    }

    fn restart(&self, doc: &StateDocument, instances: &[InstanceName]) -> Result<(), PmError> {
        if !self.is_running() {
            return self.start(doc, instances);
        }
        self.control_programs(&["restart"], doc, instances)
    }

    fn reload(&self, doc: &StateDocument, instances: &[InstanceName]) -> Result<(), PmError> {
        if !self.is_running() {
            return self.start(doc, instances);
        }
        self.control_programs(&["signal", "HUP"], doc, instances)
    }

    fn graceful(&self, doc: &StateDocument, instances: &[InstanceName]) -> Result<(), PmError> {
        if !self.is_running() {
            tracing::warn!("supervisord is not running, nothing to reload");
            return Ok(());
        }
        self.control_programs(&["signal", "HUP"], doc, instances)
    }

    fn status(&self, doc: &StateDocument, instances: &[InstanceName]) -> Result<String, PmError> {
        if !self.is_running() {
            return Ok("supervisord is not running\n".to_string());
        }
        let programs = program_names(&owned_configs(doc, self.kind(), instances));
        let mut args = vec!["status".to_string()];
        args.extend(programs);
        // Exits non-zero when any program is not RUNNING.
        Ok(self.supervisorctl(args, true)?.stdout)
    }

    /// Stops supervisord itself when every owned instance is targeted.
    fn shutdown(&self, doc: &StateDocument, instances: &[InstanceName]) -> Result<(), PmError> {
        if !self.is_running() {
            tracing::info!("supervisord is not running");
            return Ok(());
        }
        let all = owned_configs(doc, self.kind(), &[]);
        let targeted = owned_configs(doc, self.kind(), instances);
        if targeted.len() == all.len() {
            self.supervisorctl(vec!["shutdown".to_string()], false)?;
            return Ok(());
        }
        self.control_programs(&["stop"], doc, instances)
    }

    fn update(
        &self,
        doc: &StateDocument,
        instances: &[InstanceName],
        opts: UpdateOptions,
    ) -> Result<UpdateReport, PmError> {
        let mut report = UpdateReport::new(self.kind());
        let owned = owned_configs(doc, self.kind(), &[]);
        let intended: BTreeSet<String> = program_names(&owned).into_iter().collect();

        if !owned.is_empty() {
            self.write_supervisord_conf(opts, &mut report)?;
        }
        for config in owned_configs(doc, self.kind(), instances) {
            self.write_config(config, opts, &mut report)?;
        }

        let running = self.is_running();
        let orphans = orphans(&self.include_dir(), PROGRAM_SUFFIX, &intended)?;
        if !orphans.is_empty() {
            let paths: Vec<PathBuf> = orphans.values().cloned().collect();
            if !opts.dry_run {
                if running {
                    let mut args = vec!["stop".to_string()];
                    args.extend(orphans.keys().cloned());
                    // Programs never loaded by supervisord are fine to miss.
                    self.supervisorctl(args, true)?;
                }
                for path in &paths {
                    remove_unit(path)?;
                }
            }
            note_removals(&paths, opts, &mut report)?;
        }

        if !opts.dry_run && running && (report.changed() || opts.force) {
            self.supervisorctl(vec!["update".to_string()], false)?;
            report.reloaded = true;

            // `update` re-adds rewritten programs stopped.
            let rewritten = self.rewritten_programs(&report);
            if !rewritten.is_empty() {
                let mut args = vec!["start".to_string()];
                args.extend(rewritten);
                self.supervisorctl(args, true)?;
            }
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
