//! In-memory config parser shared by the core integration tests.
#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use gravity_core::{
    Attribs, ConfigParser, ConfigType, InstanceName, ParseError, ParsedConfig, ProcessManagerKind,
    ServiceSpec, ServiceType,
};

/// Parser double: serves whatever the test put in for a path; anything else
/// is an unreadable file.
#[derive(Default)]
pub struct FakeParser {
    configs: RefCell<HashMap<PathBuf, ParsedConfig>>,
}

impl FakeParser {
    pub fn set(&self, path: &Path, parsed: ParsedConfig) {
        self.configs.borrow_mut().insert(path.to_path_buf(), parsed);
    }

    pub fn remove(&self, path: &Path) {
        self.configs.borrow_mut().remove(path);
    }

    pub fn edit(&self, path: &Path, f: impl FnOnce(&mut ParsedConfig)) {
        let mut configs = self.configs.borrow_mut();
        let parsed = configs.get_mut(path).expect("config present in fake parser");
        f(parsed);
    }
}

impl ConfigParser for FakeParser {
    fn parse(&self, path: &Path, _defaults: Option<&Attribs>) -> Result<ParsedConfig, ParseError> {
        self.configs
            .borrow()
            .get(path)
            .cloned()
            .ok_or_else(|| ParseError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such file"),
            })
    }

    fn default_attribs(&self) -> Attribs {
        Attribs::default()
    }
}

pub fn parsed(instance: Option<&str>, services: &[ServiceType]) -> ParsedConfig {
    ParsedConfig {
        instance_name: instance.map(InstanceName::from),
        config_type: ConfigType::Galaxy,
        attribs: Attribs {
            galaxy_root: Some(PathBuf::from("/srv/galaxy")),
            ..Attribs::default()
        },
        services: services
            .iter()
            .map(|t| ServiceSpec::new(ConfigType::Galaxy, *t))
            .collect(),
        process_manager: Some(ProcessManagerKind::Systemd),
    }
}
