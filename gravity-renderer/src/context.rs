//! Template contexts: the serializable payloads the unit and command
//! templates render from.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Serialize;

use gravity_core::{ConfigType, InstanceName, RegisteredConfig, ServiceSpec, ServiceType};

use crate::error::RenderError;

/// Umask used when the config does not set one.
pub const DEFAULT_UMASK: &str = "022";

/// Program / unit stem: `<config_type>-<instance>-<service_name>`.
pub fn program_name(config_type: ConfigType, instance: &InstanceName, service_name: &str) -> String {
    format!("{config_type}-{instance}-{service_name}")
}

// ---------------------------------------------------------------------------
// Command context
// ---------------------------------------------------------------------------

/// Inputs of the per-service-type command templates.
#[derive(Debug, Clone, Serialize)]
pub struct CommandContext {
    /// `<bin dir>/` for relative commands, or empty.
    pub bin_prefix: String,
    pub galaxy_root: String,
    pub config_file: String,
    pub config_type: String,
    pub app_factory: String,
    pub bind_address: String,
    pub bind_port: u16,
    pub celery_concurrency: u32,
    pub celery_loglevel: String,
    pub service_name: String,
    pub server_pools: Vec<String>,
    pub state_dir: String,
}

impl CommandContext {
    pub fn new(
        config: &RegisteredConfig,
        service: &ServiceSpec,
        state_dir: &Path,
    ) -> Result<Self, RenderError> {
        let attribs = &config.attribs;
        let galaxy_root = galaxy_root(config)?;
        let bin_prefix = attribs
            .command_base()
            .map(|dir| format!("{}/", dir.display()))
            .unwrap_or_default();

        Ok(Self {
            bin_prefix,
            galaxy_root: galaxy_root.display().to_string(),
            config_file: config.config_file.display().to_string(),
            config_type: config.config_type.to_string(),
            app_factory: app_factory(config.config_type).to_string(),
            bind_address: attribs.bind_address.clone(),
            bind_port: attribs.bind_port,
            celery_concurrency: attribs.celery.concurrency,
            celery_loglevel: attribs.celery.loglevel.clone(),
            service_name: service.service_name.clone(),
            server_pools: service.server_pools.iter().cloned().collect(),
            state_dir: state_dir.display().to_string(),
        })
    }

    pub fn to_tera_context(&self) -> Result<tera::Context, RenderError> {
        tera::Context::from_serialize(self).map_err(RenderError::from)
    }
}

fn app_factory(config_type: ConfigType) -> &'static str {
    match config_type {
        ConfigType::Galaxy => "galaxy.webapps.galaxy.fast_factory:factory()",
        ConfigType::Reports => "galaxy.webapps.reports.fast_factory:factory()",
        ConfigType::ToolShed => "tool_shed.webapp.fast_factory:factory()",
    }
}

fn galaxy_root(config: &RegisteredConfig) -> Result<&PathBuf, RenderError> {
    config
        .attribs
        .galaxy_root
        .as_ref()
        .ok_or_else(|| RenderError::MissingRoot {
            config_file: config.config_file.display().to_string(),
        })
}

// ---------------------------------------------------------------------------
// Unit context
// ---------------------------------------------------------------------------

/// Everything a process manager unit file needs for one service.
#[derive(Debug, Clone, Serialize)]
pub struct UnitContext {
    pub program_name: String,
    pub description: String,
    pub instance_name: String,
    pub config_type: String,
    pub service_type: String,
    pub service_name: String,
    /// Fully rendered command line.
    pub command: String,
    pub working_dir: String,
    pub environment: BTreeMap<String, String>,
    pub user: Option<String>,
    pub group: Option<String>,
    pub umask: String,
    /// Gigabytes.
    pub memory_limit: Option<String>,
    pub log_file: String,
    /// HUP makes the process reload in place.
    pub reloads_on_hup: bool,
}

impl UnitContext {
    pub fn new(
        config: &RegisteredConfig,
        service: &ServiceSpec,
        state_dir: &Path,
        command: String,
    ) -> Result<Self, RenderError> {
        let attribs = &config.attribs;
        let program_name = program_name(
            config.config_type,
            &config.instance_name,
            &service.service_name,
        );
        let log_file = attribs.log_dir.join(format!("{program_name}.log"));
        let description = format!(
            "{} {} {} ({})",
            config.config_type,
            service.service_type.description(),
            service.service_name,
            config.instance_name
        );

        Ok(Self {
            description,
            instance_name: config.instance_name.to_string(),
            config_type: config.config_type.to_string(),
            service_type: service.service_type.to_string(),
            service_name: service.service_name.clone(),
            command,
            working_dir: galaxy_root(config)?.display().to_string(),
            environment: environment_for(config, service, state_dir),
            user: attribs.galaxy_user.clone(),
            group: attribs.galaxy_group.clone(),
            umask: service
                .umask
                .clone()
                .unwrap_or_else(|| DEFAULT_UMASK.to_string()),
            memory_limit: attribs.memory_limit.clone(),
            log_file: log_file.display().to_string(),
            reloads_on_hup: service.service_type == ServiceType::Gunicorn,
            program_name,
        })
    }

    pub fn to_tera_context(&self) -> Result<tera::Context, RenderError> {
        tera::Context::from_serialize(self).map_err(RenderError::from)
    }
}

/// Process environment for `service`.
///
/// Gravity's own variables first, then the config's environment section for
/// the service, then the service's own overrides. Later entries win.
pub fn environment_for(
    config: &RegisteredConfig,
    service: &ServiceSpec,
    state_dir: &Path,
) -> BTreeMap<String, String> {
    let mut env = BTreeMap::new();
    env.insert(
        "GALAXY_CONFIG_FILE".to_string(),
        config.config_file.display().to_string(),
    );
    env.insert(
        "GRAVITY_STATE_DIR".to_string(),
        state_dir.display().to_string(),
    );
    if let Some(venv) = &config.attribs.virtualenv {
        env.insert("VIRTUAL_ENV".to_string(), venv.display().to_string());
    }
    if let Some(section) = config.attribs.environment.get(service.environment_key()) {
        env.extend(section.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    env.extend(
        service
            .environment
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );
    env
}

// ---------------------------------------------------------------------------
// supervisord.conf context
// ---------------------------------------------------------------------------

/// Paths of the supervisord instance gravity runs.
#[derive(Debug, Clone, Serialize)]
pub struct SupervisordContext {
    pub socket: String,
    pub pid_file: String,
    pub log_file: String,
    pub include_dir: String,
}

impl SupervisordContext {
    /// Layout under `supervisor_dir` (`<state_dir>/supervisor`).
    pub fn new(supervisor_dir: &Path, log_dir: &Path) -> Self {
        Self {
            socket: supervisor_dir.join("supervisor.sock").display().to_string(),
            pid_file: supervisor_dir.join("supervisord.pid").display().to_string(),
            log_file: log_dir.join("supervisord.log").display().to_string(),
            include_dir: supervisor_dir
                .join("supervisord.conf.d")
                .display()
                .to_string(),
        }
    }

    pub fn to_tera_context(&self) -> Result<tera::Context, RenderError> {
        tera::Context::from_serialize(self).map_err(RenderError::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gravity_core::{Attribs, ProcessManagerKind};

    fn config() -> RegisteredConfig {
        let mut attribs = Attribs {
            galaxy_root: Some(PathBuf::from("/srv/galaxy/server")),
            log_dir: PathBuf::from("/var/log/galaxy"),
            ..Attribs::default()
        };
        attribs.environment.insert(
            "gunicorn".to_string(),
            BTreeMap::from([
                ("A".to_string(), "attr".to_string()),
                ("B".to_string(), "attr".to_string()),
            ]),
        );
        RegisteredConfig {
            config_file: PathBuf::from("/srv/galaxy/config/galaxy.yml"),
            config_type: ConfigType::Galaxy,
            instance_name: InstanceName::from("main"),
            attribs,
            services: vec![],
            process_manager: ProcessManagerKind::Systemd,
            registered_at: None,
        }
    }

    #[test]
    fn service_environment_overrides_attribute_environment() {
        let mut gunicorn = ServiceSpec::new(ConfigType::Galaxy, ServiceType::Gunicorn);
        gunicorn
            .environment
            .insert("B".to_string(), "service".to_string());
        let env = environment_for(&config(), &gunicorn, Path::new("/state"));
        assert_eq!(env["A"], "attr");
        assert_eq!(env["B"], "service");
        assert_eq!(env["GALAXY_CONFIG_FILE"], "/srv/galaxy/config/galaxy.yml");
        assert_eq!(env["GRAVITY_STATE_DIR"], "/state");
    }

    #[test]
    fn log_file_is_named_after_program() {
        let celery = ServiceSpec::new(ConfigType::Galaxy, ServiceType::Celery);
        let unit = UnitContext::new(&config(), &celery, Path::new("/state"), "celery".into())
            .unwrap();
        assert_eq!(unit.program_name, "galaxy-main-celery");
        assert_eq!(unit.log_file, "/var/log/galaxy/galaxy-main-celery.log");
        assert_eq!(unit.umask, DEFAULT_UMASK);
        assert!(!unit.reloads_on_hup);
    }

    #[test]
    fn missing_root_is_an_error() {
        let mut config = config();
        config.attribs.galaxy_root = None;
        let gunicorn = ServiceSpec::new(ConfigType::Galaxy, ServiceType::Gunicorn);
        assert!(matches!(
            CommandContext::new(&config, &gunicorn, Path::new("/state")),
            Err(RenderError::MissingRoot { .. })
        ));
    }
}
