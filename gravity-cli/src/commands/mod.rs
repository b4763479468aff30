pub mod control;
pub mod info;
pub mod registration;
pub mod update;

use std::sync::Arc;

use anyhow::{Context, Result};

use gravity_config::GalaxyConfigParser;
use gravity_core::{Settings, StateStore};
use gravity_pm::{ExecControl, Router};

use crate::GlobalArgs;

/// Settings, state store and parser resolved from the global flags.
pub struct App {
    pub settings: Settings,
    pub store: StateStore,
    pub parser: GalaxyConfigParser,
}

impl App {
    pub fn open(global: &GlobalArgs) -> Result<Self> {
        let mut settings = match &global.state_dir {
            Some(dir) => Settings::at(dir),
            None => Settings::from_env().context("failed to resolve the gravity state dir")?,
        };
        settings.systemd_user = global.user;

        let store = StateStore::open(&settings).with_context(|| {
            format!("failed to open gravity state in {}", settings.state_dir.display())
        })?;
        let parser = GalaxyConfigParser::new(&settings);
        Ok(Self {
            settings,
            store,
            parser,
        })
    }

    pub fn router(&self) -> Result<Router> {
        Router::new(&self.settings, self.store.clone(), Arc::new(ExecControl))
            .context("failed to set up process managers")
    }
}
