//! Invocation of backend control executables (`systemctl`, `supervisorctl`,
//! `supervisord`).

use std::process::Command;

use crate::error::PmError;

/// Captured result of one control invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControlOutput {
    pub success: bool,
    /// Exit code, `None` when killed by a signal.
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

/// Runs a control executable with a fixed argument vector and waits for it.
pub trait Control {
    fn run(&self, program: &str, args: &[String]) -> Result<ControlOutput, PmError>;
}

/// [`Control`] backed by [`std::process::Command`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ExecControl;

impl Control for ExecControl {
    fn run(&self, program: &str, args: &[String]) -> Result<ControlOutput, PmError> {
        tracing::debug!("exec: {} {}", program, args.join(" "));
        let output = Command::new(program)
            .args(args)
            .output()
            .map_err(|source| PmError::Spawn {
                program: program.to_string(),
                source,
            })?;
        Ok(ControlOutput {
            success: output.status.success(),
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Run `program args...`; a non-zero exit is an error unless
/// `ignore_failure` is set.
pub(crate) fn invoke(
    control: &dyn Control,
    program: &str,
    args: Vec<String>,
    ignore_failure: bool,
) -> Result<ControlOutput, PmError> {
    let output = control.run(program, &args)?;
    if output.success || ignore_failure {
        return Ok(output);
    }
    Err(PmError::Control {
        command: format!("{} {}", program, args.join(" ")),
        status: output
            .code
            .map(|c| format!("exit status {c}"))
            .unwrap_or_else(|| "killed by signal".to_string()),
        stderr: output.stderr,
    })
}
