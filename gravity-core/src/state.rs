//! YAML-backed store of registered configs.
//!
//! # Storage layout
//!
//! ```text
//! <state_dir>/
//!   configstate.yaml   (mode 0600; `config_files` + `remove_configs`)
//!   configstate.json   (legacy; migrated and removed on first open)
//! ```
//!
//! Every operation is load → modify → atomic save, so repeating a call with
//! the same arguments leaves the same document. There is no cross-process
//! locking: callers serialize invocations.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::error::{io_err, StateError};
use crate::settings::Settings;
use crate::types::{InstanceName, RegisteredConfig, StateDocument};

/// Handle on the persisted state document.
#[derive(Debug, Clone)]
pub struct StateStore {
    path: PathBuf,
}

impl StateStore {
    /// Open the store for `settings`, creating the state dir (mode `0700`) and
    /// migrating a legacy JSON document if one is present.
    pub fn open(settings: &Settings) -> Result<Self, StateError> {
        let dir = settings.state_dir();
        if !dir.exists() {
            std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
            set_dir_permissions(dir)?;
        }
        tracing::debug!("gravity state dir: {}", dir.display());

        let store = Self::at(settings.state_path());
        store.migrate_legacy(&settings.legacy_state_path())?;
        Ok(store)
    }

    /// Store backed by an explicit file. No I/O.
    pub fn at(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // -----------------------------------------------------------------------
    // Document load / save
    // -----------------------------------------------------------------------

    /// Load the whole document. A missing or empty file is an empty document.
    pub fn load(&self) -> Result<StateDocument, StateError> {
        if !self.path.exists() {
            return Ok(StateDocument::default());
        }
        let contents = std::fs::read_to_string(&self.path).map_err(|e| io_err(&self.path, e))?;
        if contents.trim().is_empty() {
            return Ok(StateDocument::default());
        }
        serde_yaml::from_str(&contents).map_err(|source| StateError::Parse {
            path: self.path.clone(),
            source,
        })
    }

    /// Atomically replace the document.
    ///
    /// serialize → `.yaml.tmp` sibling → `chmod 0600` → rename.
    pub fn save(&self, doc: &StateDocument) -> Result<(), StateError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
        }
        let tmp = self.path.with_extension("yaml.tmp");
        let yaml = serde_yaml::to_string(doc)?;
        std::fs::write(&tmp, yaml).map_err(|e| io_err(&tmp, e))?;
        set_file_permissions(&tmp)?;
        if let Err(e) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(io_err(&self.path, e));
        }
        Ok(())
    }

    /// Load, apply `f`, save. Returns whatever `f` returns.
    pub fn modify<T>(&self, f: impl FnOnce(&mut StateDocument) -> T) -> Result<T, StateError> {
        let mut doc = self.load()?;
        let out = f(&mut doc);
        self.save(&doc)?;
        Ok(out)
    }

    // -----------------------------------------------------------------------
    // Registered configs
    // -----------------------------------------------------------------------

    pub fn get(&self, key: &Path) -> Result<Option<RegisteredConfig>, StateError> {
        Ok(self.load()?.config_files.remove(key))
    }

    /// Add a config, or overwrite a previously stored value.
    pub fn put(&self, key: &Path, value: RegisteredConfig) -> Result<(), StateError> {
        self.modify(|doc| {
            doc.config_files.insert(key.to_path_buf(), value);
        })
    }

    pub fn delete(&self, key: &Path) -> Result<Option<RegisteredConfig>, StateError> {
        self.modify(|doc| doc.config_files.remove(key))
    }

    pub fn list(&self) -> Result<BTreeMap<PathBuf, RegisteredConfig>, StateError> {
        Ok(self.load()?.config_files)
    }

    pub fn is_registered(&self, key: &Path) -> Result<bool, StateError> {
        Ok(self.load()?.is_registered(key))
    }

    // -----------------------------------------------------------------------
    // Pending removals
    // -----------------------------------------------------------------------

    pub fn get_removed(&self, key: &Path) -> Result<Option<RegisteredConfig>, StateError> {
        Ok(self.load()?.remove_configs.remove(key))
    }

    pub fn put_removed(&self, key: &Path, value: RegisteredConfig) -> Result<(), StateError> {
        self.modify(|doc| {
            doc.remove_configs.insert(key.to_path_buf(), value);
        })
    }

    pub fn delete_removed(&self, key: &Path) -> Result<Option<RegisteredConfig>, StateError> {
        self.modify(|doc| doc.remove_configs.remove(key))
    }

    pub fn list_removed(&self) -> Result<BTreeMap<PathBuf, RegisteredConfig>, StateError> {
        Ok(self.load()?.remove_configs)
    }

    /// Move a registered config to the pending-removal table, keeping its last
    /// value. Returns `None` if it was not registered.
    pub fn deregister(&self, key: &Path) -> Result<Option<RegisteredConfig>, StateError> {
        self.modify(|doc| {
            let config = doc.config_files.remove(key)?;
            doc.remove_configs.insert(key.to_path_buf(), config.clone());
            Some(config)
        })
    }

    /// Forget a deregistered config entirely.
    pub fn purge(&self, key: &Path) -> Result<bool, StateError> {
        self.modify(|doc| doc.remove_configs.remove(key).is_some())
    }

    pub fn registered_instances(
        &self,
        include_removed: bool,
    ) -> Result<Vec<InstanceName>, StateError> {
        Ok(self.load()?.registered_instances(include_removed))
    }

    // -----------------------------------------------------------------------
    // Legacy migration
    // -----------------------------------------------------------------------

    fn migrate_legacy(&self, legacy: &Path) -> Result<(), StateError> {
        if !legacy.exists() || self.path.exists() {
            return Ok(());
        }
        tracing::warn!(
            "converting {} to {}",
            legacy.display(),
            self.path.display()
        );
        let contents = std::fs::read_to_string(legacy).map_err(|e| io_err(legacy, e))?;
        let json_doc: StateDocument =
            serde_json::from_str(&contents).map_err(|source| StateError::LegacyParse {
                path: legacy.to_path_buf(),
                source,
            })?;
        self.save(&json_doc)?;

        let yaml_doc = self.load()?;
        if yaml_doc != json_doc {
            return Err(StateError::MigrationMismatch {
                legacy: legacy.to_path_buf(),
                path: self.path.clone(),
            });
        }
        std::fs::remove_file(legacy).map_err(|e| io_err(legacy, e))?;
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), StateError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), StateError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), StateError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), StateError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Attribs, ConfigType, ProcessManagerKind};
    use tempfile::TempDir;

    fn record(path: &str, instance: &str) -> RegisteredConfig {
        RegisteredConfig {
            config_file: PathBuf::from(path),
            config_type: ConfigType::Galaxy,
            instance_name: InstanceName::from(instance),
            attribs: Attribs::default(),
            services: vec![],
            process_manager: ProcessManagerKind::Systemd,
            registered_at: None,
        }
    }

    #[test]
    fn load_missing_file_is_empty_document() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::at(tmp.path().join("configstate.yaml"));
        assert_eq!(store.load().unwrap(), StateDocument::default());
    }

    #[test]
    fn load_empty_file_is_empty_document() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("configstate.yaml");
        std::fs::write(&path, "\n").unwrap();
        assert!(StateStore::at(path).load().unwrap().config_files.is_empty());
    }

    #[test]
    fn save_cleans_up_tmp() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::at(tmp.path().join("configstate.yaml"));
        store.save(&StateDocument::default()).unwrap();
        assert!(store.path().exists());
        assert!(!tmp.path().join("configstate.yaml.tmp").exists());
    }

    #[test]
    #[cfg(unix)]
    fn open_creates_state_dir_with_perms() {
        use std::os::unix::fs::PermissionsExt;
        let tmp = TempDir::new().unwrap();
        let settings = Settings::at(tmp.path().join("state"));
        StateStore::open(&settings).unwrap();
        let mode = std::fs::metadata(&settings.state_dir)
            .unwrap()
            .permissions()
            .mode()
            & 0o777;
        assert_eq!(mode, 0o700);
    }

    #[test]
    fn put_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::at(tmp.path().join("configstate.yaml"));
        let key = Path::new("/srv/galaxy.yml");
        store.put(key, record("/srv/galaxy.yml", "main")).unwrap();
        let once = std::fs::read_to_string(store.path()).unwrap();
        store.put(key, record("/srv/galaxy.yml", "main")).unwrap();
        let twice = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn deregister_unknown_key_is_none() {
        let tmp = TempDir::new().unwrap();
        let store = StateStore::at(tmp.path().join("configstate.yaml"));
        assert!(store.deregister(Path::new("/nope.yml")).unwrap().is_none());
        assert!(store.list_removed().unwrap().is_empty());
    }
}
