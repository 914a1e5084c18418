use std::path::Path;

use whiskey::orchestrator::{self, DeployOutput};

use super::CmdResult;

/// Stage and run a deployment on every target in the configuration.
pub fn run(config: &Path) -> CmdResult<DeployOutput> {
    eprintln!("[whiskey] Deploying with {}", config.display());
    let output = orchestrator::run(config)?;
    Ok((output, 0))
}
