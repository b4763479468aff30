//! Galaxy config file parsing for `gravity-config`.
//!
//! [`GalaxyConfigParser`] reads a Galaxy, Reports or Tool Shed YAML config and
//! turns it into a [`ParsedConfig`]: the application type comes from the first
//! recognised top-level section, process-management options from the top-level
//! `gravity` section, and the service set from the application type plus the
//! job handler options.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use gravity_core::settings::Settings;
use gravity_core::{
    Attribs, ConfigParser, ConfigType, InstanceName, ParseError, ParsedConfig, ProcessManagerKind,
    ServiceSpec, ServiceType,
};
use serde::Deserialize;
use serde_yaml::{Mapping, Value};

/// Top-level section holding process-management options.
pub const GRAVITY_SECTION: &str = "gravity";
/// Server pool assigned to dynamically numbered job handlers.
pub const JOB_HANDLER_POOL: &str = "job-handlers";
/// Name template for dynamic job handlers.
pub const DEFAULT_HANDLER_TEMPLATE: &str = "job-handler-{instance_number}";

const INSTANCE_NUMBER: &str = "{instance_number}";

// ---------------------------------------------------------------------------
// Raw `gravity` section
// ---------------------------------------------------------------------------

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GunicornSection {
    bind: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct CelerySection {
    concurrency: Option<u32>,
    loglevel: Option<String>,
    enable: Option<bool>,
    enable_beat: Option<bool>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct GravitySection {
    instance_name: Option<String>,
    process_manager: Option<String>,
    galaxy_root: Option<PathBuf>,
    virtualenv: Option<PathBuf>,
    log_dir: Option<PathBuf>,
    galaxy_user: Option<String>,
    galaxy_group: Option<String>,
    umask: Option<Value>,
    memory_limit: Option<Value>,
    gunicorn: GunicornSection,
    celery: CelerySection,
    job_handler_count: u32,
    job_handler_name_template: Option<String>,
    handlers: Vec<String>,
    environment: BTreeMap<String, BTreeMap<String, Value>>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Parser for Galaxy-family YAML config files.
#[derive(Debug, Clone)]
pub struct GalaxyConfigParser {
    state_dir: PathBuf,
}

impl GalaxyConfigParser {
    pub fn new(settings: &Settings) -> Self {
        Self::at(settings.state_dir.clone())
    }

    /// Parser whose built-in log dir lives under `state_dir`.
    pub fn at(state_dir: impl Into<PathBuf>) -> Self {
        Self {
            state_dir: state_dir.into(),
        }
    }
}

impl ConfigParser for GalaxyConfigParser {
    fn parse(&self, path: &Path, defaults: Option<&Attribs>) -> Result<ParsedConfig, ParseError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ParseError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let doc: Value = serde_yaml::from_str(&contents).map_err(|source| ParseError::Yaml {
            path: path.to_path_buf(),
            source,
        })?;
        let Some(root) = doc.as_mapping() else {
            return Err(ParseError::UnknownType {
                path: path.to_path_buf(),
            });
        };

        let config_type = detect_config_type(root).ok_or_else(|| ParseError::UnknownType {
            path: path.to_path_buf(),
        })?;
        let gravity = gravity_section(path, root)?;

        let base = carried_defaults(self.default_attribs(), defaults);
        let attribs = resolve_attribs(path, base, &gravity)?;
        let services = services_for(path, config_type, &gravity)?;

        let process_manager = gravity
            .process_manager
            .as_deref()
            .map(|pm| {
                pm.parse::<ProcessManagerKind>()
                    .map_err(|message| invalid(path, "process_manager", message))
            })
            .transpose()?;

        Ok(ParsedConfig {
            instance_name: gravity.instance_name.map(InstanceName::from),
            config_type,
            attribs,
            services,
            process_manager,
        })
    }

    fn default_attribs(&self) -> Attribs {
        Attribs::builtin(&self.state_dir)
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

fn detect_config_type(root: &Mapping) -> Option<ConfigType> {
    ConfigType::all()
        .iter()
        .copied()
        .find(|t| matches!(root.get(t.section()), Some(Value::Mapping(_))))
}

fn gravity_section(path: &Path, root: &Mapping) -> Result<GravitySection, ParseError> {
    match root.get(GRAVITY_SECTION) {
        None | Some(Value::Null) => Ok(GravitySection::default()),
        Some(value) => GravitySection::deserialize(value.clone()).map_err(|source| {
            ParseError::Yaml {
                path: path.to_path_buf(),
                source,
            }
        }),
    }
}

// ---------------------------------------------------------------------------
// Attributes
// ---------------------------------------------------------------------------

/// Attribs field names; a `gravity` key with one of these names that is not
/// read into a typed option would collide with the field when persisted.
const TYPED_ATTRIBS: &[&str] = &[
    "galaxy_root",
    "log_dir",
    "bind_address",
    "bind_port",
    "virtualenv",
    "galaxy_user",
    "galaxy_group",
    "memory_limit",
    "celery",
    "environment",
];

/// Built-in attribs with the resolved values of a previous parse carried
/// over. Everything the file controls directly is rebuilt on every parse.
fn carried_defaults(mut base: Attribs, defaults: Option<&Attribs>) -> Attribs {
    if let Some(defaults) = defaults {
        base.galaxy_root = defaults.galaxy_root.clone();
        base.log_dir = defaults.log_dir.clone();
        base.bind_address = defaults.bind_address.clone();
        base.bind_port = defaults.bind_port;
    }
    base
}

/// Overlay values present in the file onto `base`.
fn resolve_attribs(
    path: &Path,
    mut attribs: Attribs,
    gravity: &GravitySection,
) -> Result<Attribs, ParseError> {
    let config_dir = config_dir(path);

    if let Some(root) = &gravity.galaxy_root {
        attribs.galaxy_root = Some(config_dir.join(root));
    }
    if attribs.galaxy_root.is_none() {
        attribs.galaxy_root = Some(detect_root(path, &config_dir)?);
    }
    if let Some(venv) = &gravity.virtualenv {
        attribs.virtualenv = Some(config_dir.join(venv));
    }
    if let Some(log_dir) = &gravity.log_dir {
        attribs.log_dir = config_dir.join(log_dir);
    }
    if let Some(user) = &gravity.galaxy_user {
        attribs.galaxy_user = Some(user.clone());
    }
    if let Some(group) = &gravity.galaxy_group {
        attribs.galaxy_group = Some(group.clone());
    }
    if let Some(limit) = &gravity.memory_limit {
        attribs.memory_limit = Some(scalar_string(path, "memory_limit", limit)?);
    }
    if let Some(bind) = &gravity.gunicorn.bind {
        let (address, port) = split_bind(path, bind)?;
        attribs.bind_address = address;
        attribs.bind_port = port;
    }
    if let Some(concurrency) = gravity.celery.concurrency {
        attribs.celery.concurrency = concurrency;
    }
    if let Some(loglevel) = &gravity.celery.loglevel {
        attribs.celery.loglevel = loglevel.clone();
    }
    if !gravity.environment.is_empty() {
        attribs.environment = environment_maps(path, &gravity.environment)?;
    }
    for (key, value) in &gravity.extra {
        if TYPED_ATTRIBS.contains(&key.as_str()) {
            return Err(invalid(
                path,
                key,
                "not settable here; use gunicorn.bind for the bind address and port",
            ));
        }
        attribs.extra.insert(key.clone(), value.clone());
    }
    Ok(attribs)
}

fn config_dir(path: &Path) -> PathBuf {
    path.parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// `<config dir>/..` when it looks like an application checkout.
fn detect_root(path: &Path, config_dir: &Path) -> Result<PathBuf, ParseError> {
    if let Some(candidate) = config_dir.parent() {
        if candidate.join("lib").join("galaxy").is_dir() {
            tracing::debug!(
                "using {} as galaxy_root for {}",
                candidate.display(),
                path.display()
            );
            return Ok(candidate.to_path_buf());
        }
    }
    Err(ParseError::MissingRoot {
        path: path.to_path_buf(),
    })
}

/// `host:port`, or a bare port.
fn split_bind(path: &Path, bind: &str) -> Result<(String, u16), ParseError> {
    let (address, port) = match bind.rsplit_once(':') {
        Some((address, port)) => (address, port),
        None => ("localhost", bind),
    };
    let port = port
        .parse::<u16>()
        .map_err(|e| invalid(path, "gunicorn.bind", format!("bad port '{port}': {e}")))?;
    if address.is_empty() {
        return Err(invalid(path, "gunicorn.bind", "missing address"));
    }
    Ok((address.to_string(), port))
}

fn environment_maps(
    path: &Path,
    raw: &BTreeMap<String, BTreeMap<String, Value>>,
) -> Result<BTreeMap<String, BTreeMap<String, String>>, ParseError> {
    let mut out = BTreeMap::new();
    for (service, vars) in raw {
        let mut env = BTreeMap::new();
        for (name, value) in vars {
            let key = format!("environment.{service}.{name}");
            env.insert(name.clone(), scalar_string(path, &key, value)?);
        }
        out.insert(service.clone(), env);
    }
    Ok(out)
}

/// Strings, numbers and booleans as written; anything else is rejected.
fn scalar_string(path: &Path, key: &str, value: &Value) -> Result<String, ParseError> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(invalid(path, key, "expected a scalar value")),
    }
}

/// Octal umask. An unquoted `022` reads back as the integer 22, so integers
/// are taken digit for digit.
fn parse_umask(path: &Path, value: &Value) -> Result<String, ParseError> {
    let digits = match value {
        Value::Number(n) => format!("{:0>3}", n.to_string()),
        Value::String(s) => s.clone(),
        _ => return Err(invalid(path, "umask", "expected an octal number")),
    };
    if digits.is_empty() || digits.len() > 4 || !digits.chars().all(|c| ('0'..='7').contains(&c)) {
        return Err(invalid(
            path,
            "umask",
            format!("'{digits}' is not an octal umask"),
        ));
    }
    Ok(digits)
}

// ---------------------------------------------------------------------------
// Services
// ---------------------------------------------------------------------------

fn services_for(
    path: &Path,
    config_type: ConfigType,
    gravity: &GravitySection,
) -> Result<Vec<ServiceSpec>, ParseError> {
    let mut services = vec![ServiceSpec::new(config_type, ServiceType::Gunicorn)];

    if config_type == ConfigType::Galaxy {
        if gravity.celery.enable.unwrap_or(true) {
            services.push(ServiceSpec::new(config_type, ServiceType::Celery));
        }
        if gravity.celery.enable_beat.unwrap_or(true) {
            services.push(ServiceSpec::new(config_type, ServiceType::CeleryBeat));
        }
        for name in &gravity.handlers {
            let spec = ServiceSpec::named(config_type, ServiceType::Standalone, name);
            push_handler(path, &mut services, spec)?;
        }
        let template = gravity
            .job_handler_name_template
            .as_deref()
            .unwrap_or(DEFAULT_HANDLER_TEMPLATE);
        for i in 0..gravity.job_handler_count {
            let name = template.replace(INSTANCE_NUMBER, &i.to_string());
            let spec = ServiceSpec::named(config_type, ServiceType::Standalone, name)
                .with_server_pool(JOB_HANDLER_POOL);
            push_handler(path, &mut services, spec)?;
        }
    }

    let umask = gravity
        .umask
        .as_ref()
        .map(|v| parse_umask(path, v))
        .transpose()?;
    for spec in &mut services {
        spec.umask = umask.clone();
        // Per-handler environment is keyed by the handler's own name.
        if spec.service_name != spec.service_type.as_str() {
            if let Some(vars) = gravity.environment.get(&spec.service_name) {
                let key = format!("environment.{}", spec.service_name);
                for (name, value) in vars {
                    spec.environment
                        .insert(name.clone(), scalar_string(path, &key, value)?);
                }
            }
        }
    }
    Ok(services)
}

fn push_handler(
    path: &Path,
    services: &mut Vec<ServiceSpec>,
    spec: ServiceSpec,
) -> Result<(), ParseError> {
    if services.iter().any(|s| s.service_name == spec.service_name) {
        return Err(invalid(
            path,
            "handlers",
            format!("duplicate service name '{}'", spec.service_name),
        ));
    }
    services.push(spec);
    Ok(())
}

fn invalid(path: &Path, key: &str, message: impl Into<String>) -> ParseError {
    ParseError::InvalidValue {
        path: path.to_path_buf(),
        key: key.to_string(),
        message: message.into(),
    }
}
