//! Process manager backends and the router that drives them.
//!
//! - [`backend`]: the [`ProcessManager`] capability interface and the
//!   convergence helpers shared by backends
//! - [`systemd`] / [`supervisor`]: the backend variants
//! - [`router`]: instance resolution and dispatch
//! - [`writer`]: unit file writes, removals and dry-run diffs
//! - [`control`]: invocation of `systemctl` / `supervisorctl`

pub mod backend;
pub mod control;
pub mod error;
pub mod router;
pub mod supervisor;
pub mod systemd;
pub mod writer;

pub use backend::{ProcessManager, UpdateOptions, UpdateReport};
pub use control::{Control, ControlOutput, ExecControl};
pub use error::PmError;
pub use router::{build_backend, Dispatch, Operation, Router, UpdateDispatch};
pub use supervisor::SupervisorBackend;
pub use systemd::SystemdBackend;
pub use writer::{FileDiff, WriteResult};
