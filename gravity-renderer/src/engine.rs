//! Tera rendering engine: service commands and process manager unit files.
//!
//! # Outputs
//!
//! | Template                           | Output                                  |
//! |------------------------------------|-----------------------------------------|
//! | `command/<service type>.tera`      | command line for one service            |
//! | `systemd/service.tera`             | `<program>.service` unit                |
//! | `supervisor/program.conf.tera`     | `[program:<program>]` include file      |
//! | `supervisor/supervisord.conf.tera` | `supervisord.conf` for gravity's daemon |
//!
//! Every unit file carries [`MANAGED_MARKER`] in a leading comment.

use std::collections::BTreeMap;
use std::path::Path;

use tera::Tera;

use gravity_core::{RegisteredConfig, ServiceSpec, ServiceType};

use crate::context::{CommandContext, SupervisordContext, UnitContext};
use crate::error::RenderError;

/// Text of the comment line marking a file as machine-managed. Files without
/// it are never removed.
pub const MANAGED_MARKER: &str = "This file is managed by galaxyctl. Manual changes will be lost.";

// ---------------------------------------------------------------------------
// Embedded templates
// ---------------------------------------------------------------------------

const TPLS: &[(&str, &str)] = &[
    ("command/gunicorn.tera", include_str!("templates/command/gunicorn.tera")),
    ("command/celery.tera", include_str!("templates/command/celery.tera")),
    (
        "command/celery-beat.tera",
        include_str!("templates/command/celery-beat.tera"),
    ),
    (
        "command/standalone.tera",
        include_str!("templates/command/standalone.tera"),
    ),
    ("systemd/service.tera", include_str!("templates/systemd/service.tera")),
    (
        "supervisor/program.conf.tera",
        include_str!("templates/supervisor/program.conf.tera"),
    ),
    (
        "supervisor/supervisord.conf.tera",
        include_str!("templates/supervisor/supervisord.conf.tera"),
    ),
];

fn build_tera() -> Result<Tera, RenderError> {
    let mut tera = Tera::default();
    tera.add_raw_templates(TPLS.iter().copied())?;
    Ok(tera)
}

fn command_template(service_type: ServiceType) -> String {
    format!("command/{}.tera", service_type.as_str())
}

/// `true` if `contents` was written by a [`Renderer`].
pub fn is_managed(contents: &str) -> bool {
    contents
        .lines()
        .take(3)
        .any(|line| line.contains(MANAGED_MARKER))
}

/// supervisor `environment=` value: `KEY="value",...`, with `"` and `%`
/// escaped.
pub fn supervisor_environment(env: &BTreeMap<String, String>) -> String {
    env.iter()
        .map(|(key, value)| {
            let value = value.replace('%', "%%").replace('"', "\\\"");
            format!("{key}=\"{value}\"")
        })
        .collect::<Vec<_>>()
        .join(",")
}

/// systemd `Environment=` assignments, one `KEY=value` per variable, escaped
/// for use inside a double-quoted value.
pub fn systemd_environment(env: &BTreeMap<String, String>) -> Vec<String> {
    env.iter()
        .map(|(key, value)| {
            let value = value
                .replace('\\', "\\\\")
                .replace('"', "\\\"")
                .replace('%', "%%");
            format!("{key}={value}")
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Renderer
// ---------------------------------------------------------------------------

/// Renders commands and unit files from embedded templates.
///
/// Create once with [`Renderer::new`] and reuse.
pub struct Renderer {
    tera: Tera,
}

impl Renderer {
    pub fn new() -> Result<Self, RenderError> {
        Ok(Renderer { tera: build_tera()? })
    }

    /// Command line for `service`, with relative executables resolved against
    /// the config's virtualenv.
    pub fn command(
        &self,
        config: &RegisteredConfig,
        service: &ServiceSpec,
        state_dir: &Path,
    ) -> Result<String, RenderError> {
        let ctx = CommandContext::new(config, service, state_dir)?.to_tera_context()?;
        let rendered = self
            .tera
            .render(&command_template(service.service_type), &ctx)?;
        Ok(rendered.trim().to_string())
    }

    /// Unit context for `service`, command included.
    pub fn unit_context(
        &self,
        config: &RegisteredConfig,
        service: &ServiceSpec,
        state_dir: &Path,
    ) -> Result<UnitContext, RenderError> {
        let command = self.command(config, service, state_dir)?;
        UnitContext::new(config, service, state_dir, command)
    }

    /// systemd `.service` unit. `user_scope` selects the install target.
    pub fn systemd_service(
        &self,
        unit: &UnitContext,
        user_scope: bool,
    ) -> Result<String, RenderError> {
        let mut ctx = unit.to_tera_context()?;
        ctx.insert("marker", MANAGED_MARKER);
        let wanted_by = if user_scope {
            "default.target"
        } else {
            "multi-user.target"
        };
        ctx.insert("wanted_by", wanted_by);
        ctx.insert(
            "systemd_environment",
            &systemd_environment(&unit.environment),
        );
        Ok(self.tera.render("systemd/service.tera", &ctx)?)
    }

    /// supervisor `[program:x]` include file.
    pub fn supervisor_program(&self, unit: &UnitContext) -> Result<String, RenderError> {
        let mut ctx = unit.to_tera_context()?;
        ctx.insert("marker", MANAGED_MARKER);
        ctx.insert(
            "supervisor_environment",
            &supervisor_environment(&unit.environment),
        );
        Ok(self.tera.render("supervisor/program.conf.tera", &ctx)?)
    }

    /// Main config of the supervisord instance gravity runs.
    pub fn supervisord_conf(&self, supervisord: &SupervisordContext) -> Result<String, RenderError> {
        let mut ctx = supervisord.to_tera_context()?;
        ctx.insert("marker", MANAGED_MARKER);
        Ok(self.tera.render("supervisor/supervisord.conf.tera", &ctx)?)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
