//! Register, deregister and rename config files.
//!
//! Registration only records a config; its service list stays empty until the
//! next reconcile cycle stages the services and a process manager materializes
//! them.

use std::path::{Path, PathBuf};

use chrono::Utc;
use sha2::{Digest, Sha256};

use crate::error::RegistrationError;
use crate::parser::ConfigParser;
use crate::settings::Settings;
use crate::state::StateStore;
use crate::types::{ConfigType, InstanceName, RegisteredConfig};

/// Outcome of registering a single path.
#[derive(Debug)]
pub enum RegisterOutcome {
    Registered {
        path: PathBuf,
        config_type: ConfigType,
        instance_name: InstanceName,
    },
    /// Already registered; the store was not touched.
    AlreadyRegistered { path: PathBuf },
    /// The file could not be parsed; the other paths are unaffected.
    Invalid {
        path: PathBuf,
        error: RegistrationError,
    },
}

/// Register each of `paths`.
///
/// `galaxy_root` seeds the parser defaults when the file does not name one.
pub fn register<P>(
    store: &StateStore,
    parser: &P,
    settings: &Settings,
    paths: &[PathBuf],
    galaxy_root: Option<&Path>,
) -> Result<Vec<RegisterOutcome>, RegistrationError>
where
    P: ConfigParser + ?Sized,
{
    let mut outcomes = Vec::with_capacity(paths.len());
    for path in paths {
        let path = absolutize(path)?;
        if store.is_registered(&path)? {
            tracing::warn!("{} is already registered", path.display());
            outcomes.push(RegisterOutcome::AlreadyRegistered { path });
            continue;
        }

        let mut defaults = parser.default_attribs();
        if let Some(root) = galaxy_root {
            defaults.galaxy_root = Some(root.to_path_buf());
        }
        let parsed = match parser.parse(&path, Some(&defaults)) {
            Ok(parsed) => parsed,
            Err(source) => {
                tracing::warn!("cannot register {}: {}", path.display(), source);
                let error = RegistrationError::Parse {
                    path: path.clone(),
                    source,
                };
                outcomes.push(RegisterOutcome::Invalid { path, error });
                continue;
            }
        };

        let instance_name = parsed
            .instance_name
            .unwrap_or_else(|| generate_instance_name(parsed.config_type, &path));
        let record = RegisteredConfig {
            config_file: path.clone(),
            config_type: parsed.config_type,
            instance_name: instance_name.clone(),
            attribs: parsed.attribs,
            services: Vec::new(),
            process_manager: parsed
                .process_manager
                .unwrap_or(settings.default_process_manager),
            registered_at: Some(Utc::now()),
        };
        store.put(&path, record)?;
        tracing::info!(
            "registered {} config: {}",
            parsed.config_type,
            path.display()
        );
        outcomes.push(RegisterOutcome::Registered {
            path,
            config_type: parsed.config_type,
            instance_name,
        });
    }
    Ok(outcomes)
}

/// Deregister configs by instance name or by path.
///
/// If any target names a registered instance, every config of those instances
/// is deregistered and the targets are not treated as paths. Unknown targets
/// are logged and skipped. Returns the deregistered paths.
pub fn deregister(
    store: &StateStore,
    targets: &[String],
) -> Result<Vec<PathBuf>, RegistrationError> {
    let doc = store.load()?;
    let by_instance: Vec<PathBuf> = doc
        .config_files
        .iter()
        .filter(|(_, c)| targets.iter().any(|t| t == c.instance_name.as_str()))
        .map(|(path, _)| path.clone())
        .collect();

    let config_files = if by_instance.is_empty() {
        let mut files = Vec::new();
        for target in targets {
            let path = absolutize(Path::new(target))?;
            if doc.is_registered(&path) {
                files.push(path);
            } else {
                tracing::warn!("{} is not registered", path.display());
            }
        }
        files
    } else {
        by_instance
    };

    let mut removed = Vec::new();
    for config_file in config_files {
        if store.deregister(&config_file)?.is_some() {
            tracing::info!("deregistered config: {}", config_file.display());
            removed.push(config_file);
        }
    }
    Ok(removed)
}

/// Move a registration from `old` to `new`. `new` must parse.
pub fn rename<P>(
    store: &StateStore,
    parser: &P,
    old: &Path,
    new: &Path,
) -> Result<RegisteredConfig, RegistrationError>
where
    P: ConfigParser + ?Sized,
{
    let old = absolutize(old)?;
    let new = absolutize(new)?;
    let doc = store.load()?;
    let Some(current) = doc.config_files.get(&old) else {
        return Err(RegistrationError::NotRegistered { path: old });
    };
    if doc.is_registered(&new) {
        return Err(RegistrationError::AlreadyRegistered { path: new });
    }
    parser
        .parse(&new, Some(&current.attribs))
        .map_err(|source| RegistrationError::Parse {
            path: new.clone(),
            source,
        })?;

    let renamed = store.modify(|doc| {
        let mut config = doc.config_files.remove(&old)?;
        config.config_file = new.clone();
        doc.config_files.insert(new.clone(), config.clone());
        Some(config)
    })?;
    tracing::info!(
        "reregistered config {} as {}",
        old.display(),
        new.display()
    );
    renamed.ok_or(RegistrationError::NotRegistered { path: old })
}

/// `<config_type>-<12 hex chars>`, unique per path and moment.
pub fn generate_instance_name(config_type: ConfigType, path: &Path) -> InstanceName {
    let mut hasher = Sha256::new();
    hasher.update(path.to_string_lossy().as_bytes());
    hasher.update(
        Utc::now()
            .timestamp_nanos_opt()
            .unwrap_or_default()
            .to_le_bytes(),
    );
    let digest = hex::encode(hasher.finalize());
    InstanceName(format!("{}-{}", config_type, &digest[..12]))
}

fn absolutize(path: &Path) -> Result<PathBuf, RegistrationError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    let cwd = std::env::current_dir().map_err(|source| RegistrationError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(cwd.join(path))
}
