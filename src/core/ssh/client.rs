use std::path::{Path, PathBuf};
use std::process::Command;

use crate::error::{Error, RemoteCommandFailedDetails, Result, TransferFailedDetails};
use crate::target::Target;
use crate::utils::{command, shell};

use super::PrivateKey;

const MAX_ATTEMPTS: u32 = 3;
const BACKOFF_SECS: [u64; 3] = [0, 2, 5];
const SSH_CONNECTION_EXIT: i32 = 255;

/// Transport options shared by `ssh` and `scp` invocations.
#[derive(Debug, Clone)]
pub struct SshOptions {
    pub port: u16,
    pub connect_timeout: u64,
    pub strict_host_key_checking: bool,
}

pub struct SshClient {
    pub target: Target,
    identity_file: PathBuf,
    options: SshOptions,
}

pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
    pub exit_code: i32,
}

impl SshClient {
    /// Open a verified connection to `target`.
    ///
    /// Runs `true` on the host: exit 255 with "Permission denied" is an
    /// authentication failure, any other 255 is a connection failure.
    /// Transient failures are retried with backoff first.
    pub fn connect(target: &Target, key: &PrivateKey, options: SshOptions) -> Result<Self> {
        let client = Self::new(target, key.path(), options);

        log_status!("ssh", "Connecting to {}", target);
        let check = client.execute("true");
        if check.success {
            return Ok(client);
        }

        Err(classify_connect_failure(&target.to_string(), &check))
    }

    fn new(target: &Target, identity_file: &Path, options: SshOptions) -> Self {
        Self {
            target: target.clone(),
            identity_file: identity_file.to_path_buf(),
            options,
        }
    }

    fn transport_options(&self) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            "IdentitiesOnly=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.options.connect_timeout),
            "-o".to_string(),
            "ServerAliveInterval=15".to_string(),
            "-o".to_string(),
            "ServerAliveCountMax=3".to_string(),
        ];

        if !self.options.strict_host_key_checking {
            args.extend([
                "-o".to_string(),
                "StrictHostKeyChecking=no".to_string(),
                "-o".to_string(),
                "UserKnownHostsFile=/dev/null".to_string(),
                "-o".to_string(),
                "LogLevel=ERROR".to_string(),
            ]);
        }

        args
    }

    fn build_ssh_args(&self, remote_command: &str) -> Vec<String> {
        let mut args = vec![
            "-i".to_string(),
            self.identity_file.to_string_lossy().to_string(),
        ];

        if self.options.port != 22 {
            args.push("-p".to_string());
            args.push(self.options.port.to_string());
        }

        args.extend(self.transport_options());
        args.push(self.target.destination());
        args.push(remote_command.to_string());
        args
    }

    fn build_scp_args(&self, local_path: &Path, remote_path: &str) -> Vec<String> {
        let mut args = vec![
            "-O".to_string(),
            "-q".to_string(),
            "-i".to_string(),
            self.identity_file.to_string_lossy().to_string(),
        ];

        if self.options.port != 22 {
            args.push("-P".to_string());
            args.push(self.options.port.to_string());
        }

        args.extend(self.transport_options());
        args.push(local_path.to_string_lossy().to_string());
        args.push(format!(
            "{}:{}",
            self.target.destination(),
            shell::quote_path(remote_path)
        ));
        args
    }

    /// Run `command` remotely and capture its output. Connection-level
    /// failures are retried; command failures are returned as-is.
    pub fn execute(&self, command: &str) -> CommandOutput {
        for attempt in 0..MAX_ATTEMPTS {
            let result = self.execute_once(command);

            if result.success || attempt + 1 >= MAX_ATTEMPTS || !is_transient_ssh_error(&result) {
                return result;
            }

            let delay = BACKOFF_SECS
                .get(attempt as usize + 1)
                .copied()
                .unwrap_or(5);
            log_status!(
                "ssh",
                "Connection failed (attempt {}/{}), retrying in {}s...",
                attempt + 1,
                MAX_ATTEMPTS,
                delay
            );
            std::thread::sleep(std::time::Duration::from_secs(delay));
        }

        CommandOutput {
            stdout: String::new(),
            stderr: "SSH retry exhausted".to_string(),
            success: false,
            exit_code: -1,
        }
    }

    fn execute_once(&self, command: &str) -> CommandOutput {
        let output = Command::new("ssh")
            .args(self.build_ssh_args(command))
            .output();

        match output {
            Ok(out) => CommandOutput {
                stdout: String::from_utf8_lossy(&out.stdout).to_string(),
                stderr: String::from_utf8_lossy(&out.stderr).to_string(),
                success: out.status.success(),
                exit_code: command::exit_code(out.status),
            },
            Err(e) => CommandOutput {
                stdout: String::new(),
                stderr: format!("SSH error: {}", e),
                success: false,
                exit_code: -1,
            },
        }
    }

    /// Run `command` remotely, relaying its stdout and stderr line by line to
    /// ours, and return its exit status. Not retried: the command may have
    /// side effects.
    pub fn execute_streaming(&self, command: &str) -> Result<i32> {
        let mut cmd = Command::new("ssh");
        cmd.args(self.build_ssh_args(command));
        command::run_relayed(cmd, None, "ssh")
    }

    /// Run `command` remotely once and fail unless it exits 0. Not retried:
    /// a dropped connection may already have run it.
    pub fn execute_checked(&self, command: &str) -> Result<CommandOutput> {
        let output = self.execute_once(command);
        if output.success {
            return Ok(output);
        }

        Err(Error::remote_command_failed(RemoteCommandFailedDetails {
            command: command.to_string(),
            exit_code: output.exit_code,
            target: self.target.to_string(),
            stderr: output.stderr.trim().to_string(),
        }))
    }

    /// Copy `local_path` to `remote_path` and set its mode.
    pub fn upload_file(&self, local_path: &Path, remote_path: &str, mode: u32) -> Result<()> {
        eprintln!(
            "[ssh] Uploading {} -> {}:{}",
            local_path.display(),
            self.target.destination(),
            remote_path
        );

        let transfer_error = |error: String| {
            Error::transfer_failed(TransferFailedDetails {
                local_path: local_path.display().to_string(),
                remote_path: remote_path.to_string(),
                target: self.target.to_string(),
                error,
            })
        };

        let output = Command::new("scp")
            .args(self.build_scp_args(local_path, remote_path))
            .output()
            .map_err(|e| transfer_error(e.to_string()))?;
        if !output.status.success() {
            return Err(transfer_error(command::error_text(&output)));
        }

        let chmod = format!("chmod {:04o} {}", mode, shell::quote_path(remote_path));
        let chmod_output = self.execute(&chmod);
        if !chmod_output.success {
            return Err(transfer_error(format!(
                "Failed to set mode {:04o}: {}",
                mode,
                chmod_output.stderr.trim()
            )));
        }

        Ok(())
    }
}

fn classify_connect_failure(target: &str, output: &CommandOutput) -> Error {
    let stderr = output.stderr.trim().to_string();

    if stderr.contains("Permission denied") {
        return Error::ssh_auth_failed(target, stderr);
    }

    let exit_code = (output.exit_code >= 0).then_some(output.exit_code);
    Error::ssh_connect_failed(target, stderr, exit_code)
}

/// Check if an SSH failure is a transient connection error worth retrying.
fn is_transient_ssh_error(output: &CommandOutput) -> bool {
    let stderr = output.stderr.to_lowercase();

    // Authentication does not get better by retrying.
    if stderr.contains("permission denied") {
        return false;
    }

    let transient_patterns = [
        "connection refused",
        "connection reset",
        "connection timed out",
        "no route to host",
        "network is unreachable",
        "temporary failure in name resolution",
        "broken pipe",
        "ssh_exchange_identification",
        "connection closed by remote host",
    ];

    output.exit_code == SSH_CONNECTION_EXIT || transient_patterns.iter().any(|p| stderr.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client(port: u16, strict: bool) -> SshClient {
        let target: Target = "deploy@web1.example.com".parse().unwrap();
        SshClient::new(
            &target,
            Path::new("/tmp/key"),
            SshOptions {
                port,
                connect_timeout: 10,
                strict_host_key_checking: strict,
            },
        )
    }

    fn output(exit_code: i32, stderr: &str) -> CommandOutput {
        CommandOutput {
            stdout: String::new(),
            stderr: stderr.to_string(),
            success: exit_code == 0,
            exit_code,
        }
    }

    #[test]
    fn ssh_args_carry_key_options_and_command() {
        let args = client(22, false).build_ssh_args("true");

        assert_eq!(&args[..2], &["-i", "/tmp/key"]);
        assert!(!args.contains(&"-p".to_string()));
        assert!(args.contains(&"BatchMode=yes".to_string()));
        assert!(args.contains(&"ConnectTimeout=10".to_string()));
        assert!(args.contains(&"StrictHostKeyChecking=no".to_string()));
        assert!(args.contains(&"UserKnownHostsFile=/dev/null".to_string()));
        assert_eq!(args[args.len() - 2], "deploy@web1.example.com");
        assert_eq!(args[args.len() - 1], "true");
    }

    #[test]
    fn strict_mode_keeps_host_key_checks() {
        let args = client(2222, true).build_ssh_args("true");

        assert!(!args.contains(&"StrictHostKeyChecking=no".to_string()));
        let p = args.iter().position(|a| a == "-p").unwrap();
        assert_eq!(args[p + 1], "2222");
    }

    #[test]
    fn scp_args_quote_remote_path() {
        let args = client(2222, false)
            .build_scp_args(Path::new("dist/app.tar.gz"), "/tmp/tmp.x1/app.tar.gz");

        let p = args.iter().position(|a| a == "-P").unwrap();
        assert_eq!(args[p + 1], "2222");
        assert_eq!(args[args.len() - 2], "dist/app.tar.gz");
        assert_eq!(
            args[args.len() - 1],
            "deploy@web1.example.com:'/tmp/tmp.x1/app.tar.gz'"
        );
    }

    #[test]
    fn permission_denied_is_auth_failure() {
        let err = classify_connect_failure(
            "deploy@web1",
            &output(255, "deploy@web1: Permission denied (publickey).\n"),
        );
        assert_eq!(err.code.as_str(), "ssh.auth_failed");
    }

    #[test]
    fn connection_exit_is_connect_failure() {
        let err = classify_connect_failure(
            "deploy@web1",
            &output(255, "ssh: connect to host web1 port 22: Connection refused"),
        );
        assert_eq!(err.code.as_str(), "ssh.connect_failed");
        assert_eq!(err.details["exitCode"], 255);
    }

    #[test]
    fn transient_detection() {
        assert!(is_transient_ssh_error(&output(255, "")));
        assert!(is_transient_ssh_error(&output(1, "Connection reset by peer")));
        assert!(!is_transient_ssh_error(&output(255, "Permission denied (publickey)")));
        assert!(!is_transient_ssh_error(&output(2, "No such file or directory")));
    }
}
