//! Recording control double and fixtures shared by the backend tests.
#![allow(dead_code)]

use std::cell::RefCell;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tempfile::TempDir;

use gravity_core::{
    Attribs, ConfigType, InstanceName, ProcessManagerKind, RegisteredConfig, ServiceSpec,
    ServiceType, Settings, StateDocument,
};
use gravity_pm::{Control, ControlOutput, PmError};

/// Records every invocation and reports success.
#[derive(Default)]
pub struct RecordingControl {
    calls: RefCell<Vec<(String, Vec<String>)>>,
}

impl RecordingControl {
    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.borrow().clone()
    }

    /// Invocations rendered as `program arg arg...`.
    pub fn lines(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .map(|(program, args)| format!("{} {}", program, args.join(" ")))
            .collect()
    }

    pub fn clear(&self) {
        self.calls.borrow_mut().clear();
    }
}

impl Control for RecordingControl {
    fn run(&self, program: &str, args: &[String]) -> Result<ControlOutput, PmError> {
        self.calls
            .borrow_mut()
            .push((program.to_string(), args.to_vec()));
        Ok(ControlOutput {
            success: true,
            code: Some(0),
            stdout: format!("{program} ok\n"),
            stderr: String::new(),
        })
    }
}

/// Temp layout: `state/`, `units/`, `log/` and a fake Galaxy checkout.
pub struct Fixture {
    pub tmp: TempDir,
    pub settings: Settings,
    pub control: Arc<RecordingControl>,
}

impl Fixture {
    pub fn new() -> Self {
        let tmp = TempDir::new().unwrap();
        let mut settings = Settings::at(tmp.path().join("state"));
        settings.unit_dir = Some(tmp.path().join("units"));
        Self {
            tmp,
            settings,
            control: Arc::new(RecordingControl::default()),
        }
    }

    pub fn control(&self) -> Arc<dyn Control> {
        self.control.clone()
    }

    pub fn unit_dir(&self) -> PathBuf {
        self.tmp.path().join("units")
    }

    pub fn log_dir(&self) -> PathBuf {
        self.tmp.path().join("log")
    }

    pub fn config(
        &self,
        name: &str,
        instance: &str,
        kind: ProcessManagerKind,
        services: &[ServiceType],
    ) -> RegisteredConfig {
        let attribs = Attribs {
            galaxy_root: Some(self.tmp.path().join("galaxy")),
            log_dir: self.log_dir(),
            ..Attribs::default()
        };
        RegisteredConfig {
            config_file: self.tmp.path().join(name),
            config_type: ConfigType::Galaxy,
            instance_name: InstanceName::from(instance),
            attribs,
            services: services
                .iter()
                .map(|t| ServiceSpec::new(ConfigType::Galaxy, *t))
                .collect(),
            process_manager: kind,
            registered_at: None,
        }
    }
}

pub fn doc_of(configs: Vec<RegisteredConfig>) -> StateDocument {
    let mut doc = StateDocument::default();
    for config in configs {
        doc.config_files.insert(config.config_file.clone(), config);
    }
    doc
}

/// File names in `dir`, sorted. A missing dir is empty.
pub fn file_names(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = match std::fs::read_dir(dir) {
        Ok(entries) => entries
            .map(|e| e.unwrap().file_name().to_string_lossy().to_string())
            .collect(),
        Err(_) => Vec::new(),
    };
    names.sort();
    names
}

pub fn names(instances: &[&str]) -> Vec<InstanceName> {
    instances.iter().map(|n| InstanceName::from(*n)).collect()
}
