//! Phase groups and the shell runner that executes them.

use serde::Serialize;
use std::fmt;
use std::path::PathBuf;
use std::process::Command;

use crate::error::{Error, PhaseCommandFailedDetails, Result};
use crate::utils::command;

/// Variable carrying the release directory into every phase group.
pub const DEPLOY_DIR_VAR: &str = "DEPLOY_DIR";

/// A named, ordered list of shell commands from the deployment config.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseGroup {
    Copy,
    Build,
    Postinst,
    Restart,
}

impl PhaseGroup {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseGroup::Copy => "copy",
            PhaseGroup::Build => "build",
            PhaseGroup::Postinst => "postinst",
            PhaseGroup::Restart => "restart",
        }
    }

    pub fn banner(&self) -> &'static str {
        match self {
            PhaseGroup::Copy => "Running copy commands...",
            PhaseGroup::Build => "Running build commands...",
            PhaseGroup::Postinst => "Running post-install commands...",
            PhaseGroup::Restart => "Running restart commands...",
        }
    }
}

impl fmt::Display for PhaseGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Runs one phase group to completion.
///
/// A non-zero exit must come back as `PhaseCommandFailed`; the release
/// rotation stops at the first failing group.
pub trait PhaseRunner {
    fn run(&self, phase: PhaseGroup, commands: &[String], env: &[(String, String)]) -> Result<()>;
}

/// Feeds a phase group to one interpreter process over stdin.
///
/// The script starts with `set -ev`, so the first failing command ends the
/// shell and every command is echoed into the relayed output.
pub struct ShellPhaseRunner {
    shell: String,
    work_dir: PathBuf,
}

impl ShellPhaseRunner {
    pub fn new(shell: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            shell: shell.into(),
            work_dir: work_dir.into(),
        }
    }

    fn script(commands: &[String]) -> String {
        let mut script = String::from("set -ev\n");
        for cmd in commands {
            script.push_str(cmd);
            script.push('\n');
        }
        script.push_str("exit\n");
        script
    }
}

impl PhaseRunner for ShellPhaseRunner {
    fn run(&self, phase: PhaseGroup, commands: &[String], env: &[(String, String)]) -> Result<()> {
        if commands.is_empty() {
            log_status!("phase", "No {} commands configured", phase);
            return Ok(());
        }

        let mut cmd = Command::new(&self.shell);
        cmd.current_dir(&self.work_dir);
        cmd.envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())));

        let exit_code = command::run_relayed(
            cmd,
            Some(Self::script(commands)),
            &format!("{} phase", phase),
        )?;

        if exit_code != 0 {
            eprintln!("[phase] Deployment failed with code {}", exit_code);
            return Err(Error::phase_command_failed(PhaseCommandFailedDetails {
                phase: phase.as_str().to_string(),
                exit_code,
                commands: commands.to_vec(),
            }));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn env(dir: &str) -> Vec<(String, String)> {
        vec![(DEPLOY_DIR_VAR.to_string(), dir.to_string())]
    }

    #[test]
    fn script_wraps_commands_in_strict_mode() {
        let script = ShellPhaseRunner::script(&["echo one".to_string(), "echo two".to_string()]);
        assert_eq!(script, "set -ev\necho one\necho two\nexit\n");
    }

    #[test]
    fn commands_see_deploy_dir_and_run_in_work_dir() {
        let work = TempDir::new().unwrap();
        let release = work.path().join("1700000000");
        let runner = ShellPhaseRunner::new("/bin/sh", work.path());

        runner
            .run(
                PhaseGroup::Copy,
                &[
                    "mkdir -p \"$DEPLOY_DIR\"".to_string(),
                    "pwd > \"$DEPLOY_DIR/cwd\"".to_string(),
                ],
                &env(release.to_str().unwrap()),
            )
            .unwrap();

        let cwd = fs::read_to_string(release.join("cwd")).unwrap();
        assert_eq!(
            fs::canonicalize(cwd.trim()).unwrap(),
            fs::canonicalize(work.path()).unwrap()
        );
    }

    #[test]
    fn failing_command_stops_the_group() {
        let work = TempDir::new().unwrap();
        let runner = ShellPhaseRunner::new("/bin/sh", work.path());

        let err = runner
            .run(
                PhaseGroup::Build,
                &[
                    "exit 4".to_string(),
                    "touch never-created".to_string(),
                ],
                &[],
            )
            .unwrap_err();

        assert_eq!(err.code.as_str(), "phase.command_failed");
        assert_eq!(err.command_exit_code(), Some(4));
        assert_eq!(err.details["phase"], "build");
        assert!(!work.path().join("never-created").exists());
    }

    #[test]
    fn false_fails_under_strict_mode() {
        let work = TempDir::new().unwrap();
        let runner = ShellPhaseRunner::new("/bin/sh", work.path());

        let err = runner
            .run(PhaseGroup::Restart, &["false".to_string(), "touch after".to_string()], &[])
            .unwrap_err();

        assert_eq!(err.command_exit_code(), Some(1));
        assert!(!work.path().join("after").exists());
    }

    #[test]
    fn empty_group_is_a_no_op() {
        let runner = ShellPhaseRunner::new("/nonexistent/shell", "/");
        assert!(runner.run(PhaseGroup::Postinst, &[], &[]).is_ok());
    }

    #[test]
    fn missing_interpreter_is_io_error() {
        let work = TempDir::new().unwrap();
        let runner = ShellPhaseRunner::new("/nonexistent/shell", work.path());

        let err = runner
            .run(PhaseGroup::Build, &["true".to_string()], &[])
            .unwrap_err();
        assert_eq!(err.code.as_str(), "internal.io_error");
    }
}
