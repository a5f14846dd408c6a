use crate::defaults::SshDefaults;
use crate::environment::Environment;
use crate::error::{Error, Result};
use std::process::Command;

use super::{CommandOutput, RemoteExecutor};

const SSH_PROGRAM: &str = "ssh";

pub struct SshClient {
    pub host: String,
    pub user: Option<String>,
    pub port: u16,
    pub identity_file: Option<String>,
    pub forward_agent: bool,
    pub connect_timeout_secs: u32,
    /// Extra attempts after a transport failure; zero means a single attempt.
    pub reconnect_attempts: u32,
    /// When true, all commands run locally instead of over SSH.
    /// Set automatically when the host is localhost/127.0.0.1/::1.
    pub is_local: bool,
    /// ssh binary to invoke.
    pub program: String,
}

impl SshClient {
    pub fn for_host(environment: &Environment, host: &str, defaults: &SshDefaults) -> Result<Self> {
        let identity_file = match &environment.identity_file {
            Some(path) if !path.is_empty() => {
                let expanded = shellexpand::tilde(path).to_string();
                if !std::path::Path::new(&expanded).exists() {
                    return Err(Error::ssh_identity_file_not_found(host, expanded));
                }
                Some(expanded)
            }
            _ => None,
        };

        let is_local = is_local_host(host);
        if is_local {
            log_status!("ssh", "Host '{}' is localhost, using local execution", host);
        }

        Ok(Self {
            host: host.to_string(),
            user: environment.user.clone(),
            port: environment.port.unwrap_or(defaults.port),
            identity_file,
            forward_agent: environment.forward_agent,
            connect_timeout_secs: defaults.connect_timeout_secs,
            reconnect_attempts: defaults.reconnect_attempts,
            is_local,
            program: SSH_PROGRAM.to_string(),
        })
    }

    /// Client that runs every command on the controller.
    pub fn local() -> Self {
        Self {
            host: "localhost".to_string(),
            user: None,
            port: 22,
            identity_file: None,
            forward_agent: false,
            connect_timeout_secs: 10,
            reconnect_attempts: 0,
            is_local: true,
            program: SSH_PROGRAM.to_string(),
        }
    }

    fn destination(&self) -> String {
        match &self.user {
            Some(user) if !user.is_empty() => format!("{}@{}", user, self.host),
            _ => self.host.clone(),
        }
    }

    pub(crate) fn build_ssh_args(&self, command: &str) -> Vec<String> {
        let mut args = Vec::new();

        if let Some(identity_file) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity_file.clone());
        }

        if self.port != 22 {
            args.push("-p".to_string());
            args.push(self.port.to_string());
        }

        if self.forward_agent {
            args.push("-A".to_string());
        }

        // Never prompt; fail fast on stalled connections.
        args.extend([
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout_secs),
            "-o".to_string(),
            "ServerAliveInterval=15".to_string(),
            "-o".to_string(),
            "ServerAliveCountMax=3".to_string(),
        ]);

        args.push(self.destination());
        args.push(command.to_string());

        args
    }

    /// Run `command`, reconnecting only when ssh itself reports a transient
    /// connection error. A command that ran and failed is never re-run, even
    /// when its own exit status is 255.
    fn execute_with_retry(&self, command: &str) -> Result<CommandOutput> {
        let backoff_secs = [2, 5];
        let max_attempts = self.reconnect_attempts + 1;
        let mut last_stderr = String::new();
        let mut attempts = 0;

        while attempts < max_attempts {
            attempts += 1;
            let output = match self.execute_once(command) {
                Ok(output) => output,
                Err(e) => {
                    last_stderr = e.message;
                    break;
                }
            };

            match transport_failure(&output) {
                None => return Ok(output),
                Some(TransportFailure::Fatal) => {
                    last_stderr = output.stderr;
                    break;
                }
                Some(TransportFailure::Transient) => last_stderr = output.stderr,
            }

            if attempts < max_attempts {
                let delay = backoff_secs
                    .get(attempts as usize - 1)
                    .copied()
                    .unwrap_or(5);
                log_status!(
                    "ssh",
                    "Connection to {} failed (attempt {}/{}), retrying in {}s...",
                    self.host,
                    attempts,
                    max_attempts,
                    delay
                );
                std::thread::sleep(std::time::Duration::from_secs(delay));
            }
        }

        Err(Error::ssh_connect_failed(
            self.host.clone(),
            attempts,
            last_stderr.trim().to_string(),
        ))
    }

    fn execute_once(&self, command: &str) -> Result<CommandOutput> {
        let output = Command::new(&self.program)
            .args(self.build_ssh_args(command))
            .output()
            .map_err(|e| Error::ssh_connect_failed(self.host.clone(), 1, format!("SSH error: {}", e)))?;

        Ok(CommandOutput::from(output))
    }
}

impl RemoteExecutor for SshClient {
    fn host(&self) -> &str {
        &self.host
    }

    fn execute(&self, command: &str) -> Result<CommandOutput> {
        if self.is_local {
            return execute_local_command_in_dir(command, None, None);
        }
        self.execute_with_retry(command)
    }
}

pub fn execute_local_command(command: &str) -> Result<CommandOutput> {
    execute_local_command_in_dir(command, None, None)
}

pub fn execute_local_command_in_dir(
    command: &str,
    current_dir: Option<&str>,
    env: Option<&[(&str, &str)]>,
) -> Result<CommandOutput> {
    #[cfg(windows)]
    let mut cmd = {
        let mut cmd = Command::new("cmd");
        cmd.args(["/C", command]);
        cmd
    };

    #[cfg(not(windows))]
    let mut cmd = {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", command]);
        cmd
    };

    if let Some(dir) = current_dir {
        cmd.current_dir(dir);
    }

    if let Some(env_pairs) = env {
        cmd.envs(env_pairs.iter().copied());
    }

    cmd.output()
        .map(CommandOutput::from)
        .map_err(|e| Error::internal_io(e.to_string(), Some(format!("spawn: {}", command))))
}

/// Check if a host address refers to the local machine.
pub fn is_local_host(host: &str) -> bool {
    matches!(host, "localhost" | "127.0.0.1" | "::1")
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TransportFailure {
    /// Network trouble; worth another connection attempt.
    Transient,
    /// Authentication or configuration; retrying cannot help.
    Fatal,
}

const TRANSIENT_SSH_ERRORS: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection timed out",
    "operation timed out",
    "no route to host",
    "network is unreachable",
    "temporary failure in name resolution",
    "could not resolve hostname",
    "kex_exchange_identification",
    "ssh_exchange_identification",
    "connection closed by remote host",
    "broken pipe",
];

const FATAL_SSH_ERRORS: &[&str] = &[
    "permission denied (",
    "host key verification failed",
    "too many authentication failures",
    "bad configuration option",
    "no such identity",
];

/// ssh exits 255 for its own errors, but a remote command may exit 255 too.
/// Only an exit of 255 that comes with one of ssh's diagnostics on stderr is
/// a transport failure.
fn transport_failure(output: &CommandOutput) -> Option<TransportFailure> {
    if output.exit_code != 255 {
        return None;
    }
    let stderr = output.stderr.to_lowercase();
    if TRANSIENT_SSH_ERRORS.iter().any(|p| stderr.contains(p)) {
        Some(TransportFailure::Transient)
    } else if FATAL_SSH_ERRORS.iter().any(|p| stderr.contains(p)) {
        Some(TransportFailure::Fatal)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn remote_client() -> SshClient {
        SshClient {
            host: "10.0.0.4".to_string(),
            user: Some("ubuntu".to_string()),
            port: 22,
            identity_file: None,
            forward_agent: true,
            connect_timeout_secs: 10,
            reconnect_attempts: 0,
            is_local: false,
            program: SSH_PROGRAM.to_string(),
        }
    }

    fn output(exit_code: i32, stderr: &str) -> CommandOutput {
        CommandOutput {
            stdout: String::new(),
            stderr: stderr.to_string(),
            success: exit_code == 0,
            exit_code,
        }
    }

    /// A stand-in `ssh` that runs its last argument with `sh` on this machine.
    fn fake_ssh(dir: &std::path::Path, preamble: &str) -> String {
        use std::os::unix::fs::PermissionsExt;
        let path = dir.join("ssh");
        std::fs::write(
            &path,
            format!("#!/bin/sh\n{}\nfor last; do :; done\nexec sh -c \"$last\"\n", preamble),
        )
        .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path.to_str().unwrap().to_string()
    }

    #[test]
    fn ssh_args_include_agent_forwarding_and_destination() {
        let args = remote_client().build_ssh_args("uptime");
        assert!(args.contains(&"-A".to_string()));
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"ConnectTimeout=10".to_string()));
        assert_eq!(args[args.len() - 2], "ubuntu@10.0.0.4");
        assert_eq!(args[args.len() - 1], "uptime");
    }

    #[test]
    fn ssh_args_include_port_only_when_not_default() {
        let mut client = remote_client();
        assert!(!client.build_ssh_args("true").contains(&"-p".to_string()));
        client.port = 2222;
        let args = client.build_ssh_args("true");
        let idx = args.iter().position(|a| a == "-p").unwrap();
        assert_eq!(args[idx + 1], "2222");
    }

    #[test]
    fn destination_without_user_is_bare_host() {
        let mut client = remote_client();
        client.user = None;
        assert_eq!(client.destination(), "10.0.0.4");
    }

    #[test]
    fn local_client_runs_commands_on_controller() {
        let client = SshClient::local();
        let output = client.execute("echo hello").unwrap();
        assert!(output.success);
        assert_eq!(output.stdout.trim(), "hello");
    }

    #[test]
    fn nonzero_exit_is_output_not_transport_error() {
        let client = SshClient::local();
        let output = client.execute("echo oops >&2; exit 3").unwrap();
        assert!(!output.success);
        assert_eq!(output.exit_code, 3);
        assert_eq!(output.stderr.trim(), "oops");
    }

    #[test]
    fn is_local_host_matches_loopback_names() {
        assert!(is_local_host("localhost"));
        assert!(is_local_host("127.0.0.1"));
        assert!(is_local_host("::1"));
        assert!(!is_local_host("10.0.0.4"));
    }

    #[test]
    fn exit_255_without_ssh_diagnostic_is_command_output() {
        assert_eq!(transport_failure(&output(255, "")), None);
        assert_eq!(transport_failure(&output(255, "migration aborted")), None);
        assert_eq!(transport_failure(&output(1, "Connection refused")), None);
    }

    #[test]
    fn ssh_diagnostics_are_classified() {
        assert_eq!(
            transport_failure(&output(
                255,
                "ssh: connect to host 10.0.0.4 port 22: Connection refused"
            )),
            Some(TransportFailure::Transient)
        );
        assert_eq!(
            transport_failure(&output(255, "ubuntu@10.0.0.4: Permission denied (publickey).")),
            Some(TransportFailure::Fatal)
        );
    }

    #[test]
    fn command_exiting_255_runs_once_and_fails_as_command() {
        let dir = tempfile::tempdir().unwrap();
        let mut client = remote_client();
        client.program = fake_ssh(dir.path(), "");
        client.reconnect_attempts = 1;

        let runs = dir.path().join("runs");
        let command = format!("echo run >> '{}'; exit 255", runs.display());
        let err = client.execute_checked(&command).unwrap_err();

        assert_eq!(err.code, crate::error::ErrorCode::RemoteCommandFailed);
        assert_eq!(std::fs::read_to_string(&runs).unwrap(), "run\n");
    }

    #[test]
    fn connection_refused_is_retried_then_reported() {
        let dir = tempfile::tempdir().unwrap();
        let attempts = dir.path().join("attempts");
        let mut client = remote_client();
        client.program = fake_ssh(
            dir.path(),
            &format!(
                "echo try >> '{}'; echo 'ssh: connect to host 10.0.0.4 port 22: Connection refused' >&2; exit 255",
                attempts.display()
            ),
        );
        client.reconnect_attempts = 1;

        let err = client.execute("uptime").unwrap_err();

        assert_eq!(err.code, crate::error::ErrorCode::SshConnectFailed);
        assert_eq!(err.details["attempts"], 2);
        assert_eq!(std::fs::read_to_string(&attempts).unwrap(), "try\ntry\n");
    }

    #[test]
    fn authentication_failure_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let attempts = dir.path().join("attempts");
        let mut client = remote_client();
        client.program = fake_ssh(
            dir.path(),
            &format!(
                "echo try >> '{}'; echo 'ubuntu@10.0.0.4: Permission denied (publickey).' >&2; exit 255",
                attempts.display()
            ),
        );
        client.reconnect_attempts = 3;

        let err = client.execute("uptime").unwrap_err();

        assert_eq!(err.code, crate::error::ErrorCode::SshConnectFailed);
        assert_eq!(std::fs::read_to_string(&attempts).unwrap(), "try\n");
    }
}
