//! # gravity-renderer
//!
//! Tera-based rendering of service commands and process manager unit files
//! from registered Galaxy configs.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::path::Path;
//! use gravity_core::RegisteredConfig;
//! use gravity_renderer::Renderer;
//!
//! fn print_units(config: &RegisteredConfig) {
//!     if let Ok(renderer) = Renderer::new() {
//!         for service in &config.services {
//!             let unit = renderer.unit_context(config, service, Path::new("/var/lib/gravity"));
//!             if let Ok(unit) = unit {
//!                 if let Ok(text) = renderer.systemd_service(&unit, false) {
//!                     println!("{}.service: {} bytes", unit.program_name, text.len());
//!                 }
//!             }
//!         }
//!     }
//! }
//! ```

pub mod context;
pub mod engine;
pub mod error;

pub use context::{program_name, CommandContext, SupervisordContext, UnitContext};
pub use engine::{is_managed, Renderer, MANAGED_MARKER};
pub use error::RenderError;
