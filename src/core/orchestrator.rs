//! Local orchestrator: stage a scratch directory on each target, then run the
//! remote executor there and relay its output.

use serde::Serialize;
use std::path::{Path, PathBuf};

use crate::config::DeploymentConfig;
use crate::error::{Error, RemoteCommandFailedDetails, Result};
use crate::ssh::{PrivateKey, SshClient, SshOptions};
use crate::utils::{artifact, shell};

const EXECUTABLE_MODE: u32 = 0o755;
const DATA_MODE: u32 = 0o644;

/// How the remote executor is launched inside a staged scratch directory.
///
/// The command line changes into the scratch directory, runs the executor in
/// remote mode, removes the scratch directory whatever the outcome, and exits
/// with the executor's status.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutorInvocation {
    pub scratch_dir: String,
    pub executor: RemoteExecutor,
    pub config_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteExecutor {
    /// Binary uploaded into the scratch directory under this file name.
    Staged(String),
    /// Binary already installed on the target at this path.
    Installed(String),
}

impl ExecutorInvocation {
    pub fn command_line(&self) -> String {
        let executor = match &self.executor {
            RemoteExecutor::Staged(name) => shell::quote_arg(&format!("./{}", name)),
            RemoteExecutor::Installed(path) => shell::quote_path(path),
        };
        let scratch = shell::quote_path(&self.scratch_dir);

        format!(
            "cd {} && {} --remote {} ; STATUS=$? ; rm -rf {} ; exit $STATUS",
            scratch,
            executor,
            shell::quote_arg(&self.config_name),
            scratch
        )
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetResult {
    pub target: String,
    pub scratch_dir: String,
    pub uploaded: Vec<String>,
    pub exit_code: i32,
}

/// Result of a whole orchestrator run.
///
/// Each target's remote executor writes its own envelope to its stdout, which
/// is relayed to ours, so stdout carries one JSON document per target that
/// ran followed by the envelope wrapping this value. Callers read the last one.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeployOutput {
    pub config: String,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_artifacts: Vec<String>,
    pub targets: Vec<TargetResult>,
}

/// Files staged on every target.
struct StagePlan {
    executor_binary: Option<PathBuf>,
    config_path: PathBuf,
    artifacts: Vec<PathBuf>,
}

/// Deploy to every configured target in order. The first failing target ends
/// the run; later targets are not attempted.
pub fn run(config_path: &Path) -> Result<DeployOutput> {
    let config = DeploymentConfig::load(config_path)?;
    let targets = config.require_targets(config_path)?;

    let resolved = artifact::resolve_all(Path::new(""), &config.artifacts)?;
    let executor_binary = match config.remote_executor {
        Some(_) => None,
        None => Some(std::env::current_exe().map_err(|e| {
            Error::internal_io(e.to_string(), Some("locate own executable".to_string()))
        })?),
    };
    let plan = StagePlan {
        executor_binary,
        config_path: config_path.to_path_buf(),
        artifacts: resolved.files,
    };

    let key = PrivateKey::from_env(&config.private_key_env)?;
    let options = SshOptions {
        port: config.port,
        connect_timeout: config.connect_timeout,
        strict_host_key_checking: config.strict_host_key_checking,
    };

    let mut results = Vec::new();
    for target in &targets {
        eprintln!("[deploy] Deploying to {}", target);
        let client = SshClient::connect(target, &key, options.clone())?;
        let result = deploy_target(&client, &config, &plan)?;
        eprintln!("[deploy] {} finished", target);
        results.push(result);
    }

    Ok(DeployOutput {
        config: config_path.display().to_string(),
        missing_artifacts: resolved.missing,
        targets: results,
    })
}

fn deploy_target(
    client: &SshClient,
    config: &DeploymentConfig,
    plan: &StagePlan,
) -> Result<TargetResult> {
    let scratch_dir = make_scratch_dir(client)?;
    log_status!("deploy", "Staging in {}:{}", client.target.destination(), scratch_dir);

    let uploaded = match stage(client, &scratch_dir, plan) {
        Ok(uploaded) => uploaded,
        Err(err) => {
            let cleanup = format!("rm -rf {}", shell::quote_path(&scratch_dir));
            let _ = client.execute(&cleanup);
            return Err(err);
        }
    };

    let invocation = ExecutorInvocation {
        scratch_dir: scratch_dir.clone(),
        executor: match (&config.remote_executor, &plan.executor_binary) {
            (Some(path), _) => RemoteExecutor::Installed(path.clone()),
            (None, Some(binary)) => RemoteExecutor::Staged(file_name(binary)?),
            (None, None) => {
                return Err(Error::internal_unexpected("No executor to invoke"));
            }
        },
        config_name: file_name(&plan.config_path)?,
    };

    let command_line = invocation.command_line();
    eprintln!("[deploy] Running remote executor on {}", client.target);
    let exit_code = client.execute_streaming(&command_line)?;

    if exit_code != 0 {
        return Err(Error::remote_command_failed(RemoteCommandFailedDetails {
            command: command_line,
            exit_code,
            target: client.target.to_string(),
            stderr: String::new(),
        }));
    }

    Ok(TargetResult {
        target: client.target.to_string(),
        scratch_dir,
        uploaded,
        exit_code,
    })
}

fn make_scratch_dir(client: &SshClient) -> Result<String> {
    let output = client.execute_checked("mktemp -d")?;
    let dir = output.stdout.trim().to_string();

    if dir.is_empty() {
        return Err(Error::remote_command_failed(RemoteCommandFailedDetails {
            command: "mktemp -d".to_string(),
            exit_code: output.exit_code,
            target: client.target.to_string(),
            stderr: "mktemp printed no directory".to_string(),
        }));
    }

    Ok(dir)
}

/// Upload the executor, the config and every artifact, each as its own
/// transfer. Returns the remote paths written.
fn stage(client: &SshClient, scratch_dir: &str, plan: &StagePlan) -> Result<Vec<String>> {
    let mut uploads: Vec<(&Path, u32)> = Vec::new();
    if let Some(binary) = &plan.executor_binary {
        uploads.push((binary.as_path(), EXECUTABLE_MODE));
    }
    uploads.push((plan.config_path.as_path(), DATA_MODE));
    uploads.extend(plan.artifacts.iter().map(|a| (a.as_path(), DATA_MODE)));

    let mut uploaded = Vec::new();
    for (local, mode) in uploads {
        let remote = remote_path_in(scratch_dir, &file_name(local)?);
        client.upload_file(local, &remote, mode)?;
        uploaded.push(remote);
    }

    Ok(uploaded)
}

fn remote_path_in(scratch_dir: &str, name: &str) -> String {
    format!("{}/{}", scratch_dir.trim_end_matches('/'), name)
}

fn file_name(path: &Path) -> Result<String> {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| {
            Error::validation_invalid_argument(
                "path",
                "Path must include a file name",
                Some(path.display().to_string()),
            )
        })
}
