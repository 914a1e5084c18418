use std::path::Path;

use whiskey::config::DeploymentConfig;
use whiskey::phase::ShellPhaseRunner;
use whiskey::release::{ReleaseRotation, RotationReport};
use whiskey::Error;

use super::CmdResult;

/// Rotate a release from artifacts staged in the current directory.
pub fn run(config_path: &Path) -> CmdResult<RotationReport> {
    eprintln!("[whiskey] Running remote executor with {}", config_path.display());

    let config = DeploymentConfig::load(config_path)?;
    let work_dir = std::env::current_dir().map_err(|e| {
        Error::internal_io(e.to_string(), Some("resolve working directory".to_string()))
    })?;

    let runner = ShellPhaseRunner::new(config.shell.clone(), work_dir.clone());
    let report = ReleaseRotation::new(&config, &runner, &work_dir).run()?;
    Ok((report, 0))
}
