//! Remote command execution.
//!
//! `RemoteExecutor` is the seam every deploy component talks through. A
//! transport failure is an `Err` (`ssh.connect_failed`); a command that ran
//! and exited nonzero is an `Ok` output with `success == false`, which
//! `execute_checked` turns into `remote.command_failed`.

mod client;

pub use client::{
    execute_local_command, execute_local_command_in_dir, is_local_host, SshClient,
};

use crate::error::{CommandFailedDetails, Error, Result, TargetDetails};
use serde::Serialize;

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub exit_code: i32,
}

impl From<std::process::Output> for CommandOutput {
    fn from(out: std::process::Output) -> Self {
        Self {
            stdout: String::from_utf8_lossy(&out.stdout).to_string(),
            stderr: String::from_utf8_lossy(&out.stderr).to_string(),
            success: out.status.success(),
            exit_code: out.status.code().unwrap_or(-1),
        }
    }
}

pub trait RemoteExecutor: Send + Sync {
    fn host(&self) -> &str;

    /// Run `command` with `sh` on the host and block until it exits.
    fn execute(&self, command: &str) -> Result<CommandOutput>;

    /// Like `execute`, but a nonzero exit becomes `remote.command_failed`.
    fn execute_checked(&self, command: &str) -> Result<CommandOutput> {
        let output = self.execute(command)?;
        if output.success {
            return Ok(output);
        }
        Err(command_failed(self.host(), command, output))
    }
}

/// `remote.command_failed` for a command that ran on `host` and exited nonzero.
pub fn command_failed(host: &str, command: &str, output: CommandOutput) -> Error {
    Error::remote_command_failed(CommandFailedDetails {
        command: command.to_string(),
        exit_code: output.exit_code,
        stdout: output.stdout,
        stderr: output.stderr,
        target: TargetDetails {
            environment: None,
            host: Some(host.to_string()),
        },
    })
}
