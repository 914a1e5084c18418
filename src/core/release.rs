//! Release rotation: the state machine the remote executor drives.
//!
//! Layout under the deploy base:
//!
//! ```text
//! deploy_base/
//!   Current -> 1700000300     relative symlink to the live release
//!   1700000200/               older releases, pruned to the retention window
//!   1700000300/
//!   .config/                  optional overlay copied into every new release
//! ```
//!
//! `Current` only moves after `copy` and `build` succeed, and it moves with a
//! single rename, so readers never see it missing or dangling.

use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::archive::{self, UnpackSummary};
use crate::config::DeploymentConfig;
use crate::error::{Error, Result};
use crate::phase::{PhaseGroup, PhaseRunner, DEPLOY_DIR_VAR};
use crate::utils::{artifact, io};

pub const CURRENT_LINK: &str = "Current";
pub const CONFIG_OVERLAY_DIR: &str = ".config";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Unpacking,
    Verifying,
    Building,
    SwitchingSymlink,
    OverlayingConfig,
    PostInstalling,
    Restarting,
    Pruning,
    Done,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Unpacking => "unpacking",
            Stage::Verifying => "verifying",
            Stage::Building => "building",
            Stage::SwitchingSymlink => "switching_symlink",
            Stage::OverlayingConfig => "overlaying_config",
            Stage::PostInstalling => "post_installing",
            Stage::Restarting => "restarting",
            Stage::Pruning => "pruning",
            Stage::Done => "done",
        }
    }
}

/// Outcome of a completed rotation.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RotationReport {
    pub release_id: String,
    pub deploy_dir: String,
    pub unpacked: Vec<UnpackSummary>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub skipped_archives: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub missing_patterns: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub overlaid: Vec<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub pruned: Vec<String>,
    pub stages: Vec<Stage>,
}

/// One pass of the release state machine over a deploy base.
pub struct ReleaseRotation<'a> {
    config: &'a DeploymentConfig,
    runner: &'a dyn PhaseRunner,
    work_dir: PathBuf,
    deploy_base: PathBuf,
    release_id: Option<String>,
}

impl<'a> ReleaseRotation<'a> {
    /// `work_dir` holds the staged artifacts; archives unpack into it and
    /// phase commands run from it.
    pub fn new(
        config: &'a DeploymentConfig,
        runner: &'a dyn PhaseRunner,
        work_dir: &Path,
    ) -> Self {
        Self {
            config,
            runner,
            work_dir: work_dir.to_path_buf(),
            deploy_base: config.deploy_base_in(work_dir),
            release_id: None,
        }
    }

    /// Use a fixed release identifier instead of the current epoch second.
    pub fn with_release_id(mut self, release_id: impl Into<String>) -> Self {
        self.release_id = Some(release_id.into());
        self
    }

    /// Run every stage in order. The first failure aborts the rotation and
    /// no later stage runs.
    pub fn run(&self) -> Result<RotationReport> {
        let release_id = self
            .release_id
            .clone()
            .unwrap_or_else(new_release_id);
        let deploy_dir = self.deploy_base.join(&release_id);

        let mut report = RotationReport {
            release_id: release_id.clone(),
            deploy_dir: deploy_dir.display().to_string(),
            unpacked: Vec::new(),
            skipped_archives: Vec::new(),
            missing_patterns: Vec::new(),
            overlaid: Vec::new(),
            pruned: Vec::new(),
            stages: Vec::new(),
        };

        let mut stage = Stage::Unpacking;
        let result = self.advance(&mut stage, &release_id, &deploy_dir, &mut report);

        if let Err(err) = result {
            eprintln!("[release] Aborted during {}: {}", stage.as_str(), err);
            return Err(err.with_detail("stage", stage.as_str()));
        }

        report.stages.push(Stage::Done);
        Ok(report)
    }

    fn advance(
        &self,
        stage: &mut Stage,
        release_id: &str,
        deploy_dir: &Path,
        report: &mut RotationReport,
    ) -> Result<()> {
        let env = vec![(
            DEPLOY_DIR_VAR.to_string(),
            deploy_dir.display().to_string(),
        )];

        *stage = Stage::Unpacking;
        report.stages.push(*stage);
        self.unpack_artifacts(report)?;

        *stage = Stage::Verifying;
        report.stages.push(*stage);
        eprintln!("[release] Using {}={}", DEPLOY_DIR_VAR, deploy_dir.display());
        eprintln!("[release] Running commands using shell {}", self.config.shell);
        self.run_phase(PhaseGroup::Copy, &self.config.copy, &env)?;
        eprintln!("[release] Verifying existence of new version...");
        if !deploy_dir.is_dir() {
            return Err(Error::deploy_dir_missing(deploy_dir.display().to_string()));
        }

        *stage = Stage::Building;
        report.stages.push(*stage);
        self.run_phase(PhaseGroup::Build, &self.config.build, &env)?;

        *stage = Stage::SwitchingSymlink;
        report.stages.push(*stage);
        eprintln!("[release] Updating symlink...");
        switch_current(&self.deploy_base, release_id)?;

        *stage = Stage::OverlayingConfig;
        report.stages.push(*stage);
        eprintln!("[release] Copying environment-specific config, if present");
        report.overlaid = overlay_config(&self.deploy_base)?;

        *stage = Stage::PostInstalling;
        report.stages.push(*stage);
        self.run_phase(PhaseGroup::Postinst, &self.config.postinst, &env)?;

        *stage = Stage::Restarting;
        report.stages.push(*stage);
        self.run_phase(PhaseGroup::Restart, &self.config.restart, &env)?;

        *stage = Stage::Pruning;
        report.stages.push(*stage);
        eprintln!("[release] Cleaning up old deployments...");
        report.pruned = prune_releases(&self.deploy_base, self.config.keep_releases)?;

        Ok(())
    }

    fn run_phase(
        &self,
        phase: PhaseGroup,
        commands: &[String],
        env: &[(String, String)],
    ) -> Result<()> {
        eprintln!("[release] {}", phase.banner());
        self.runner.run(phase, commands, env)
    }

    fn unpack_artifacts(&self, report: &mut RotationReport) -> Result<()> {
        let patterns: Vec<String> =
            self.config.artifacts.iter().map(|p| staged_pattern(p)).collect();
        let resolved = artifact::resolve_all(&self.work_dir, &patterns)?;
        report.missing_patterns = resolved.missing;

        for file in &resolved.files {
            eprintln!("[release] Unpacking file {}...", file.display());
            match archive::unpack_tar_gz(file, &self.work_dir) {
                Ok(summary) => {
                    eprintln!("[release] DONE");
                    report.unpacked.push(summary);
                }
                Err(err) if err.code.is_recoverable() => {
                    eprintln!("[release] ERROR: {} ({})", err, err.details);
                    report.skipped_archives.push(file.display().to_string());
                }
                Err(err) => return Err(err),
            }
        }

        match list_entries(&self.work_dir) {
            Ok(names) => {
                eprintln!("[release] After unpacking, the following files are present:");
                for name in names {
                    eprintln!("{}", name);
                }
            }
            Err(err) => eprintln!("[release] ERROR Listing files {}", err),
        }

        Ok(())
    }
}

/// Artifacts are staged flat in the work directory under their file names, so
/// only the last component of a configured pattern is matched there.
fn staged_pattern(pattern: &str) -> String {
    Path::new(pattern)
        .file_name()
        .map(|name| name.to_string_lossy().to_string())
        .unwrap_or_else(|| pattern.to_string())
}

/// Release identifier for a new deployment: the current Unix time in seconds.
///
/// Two deployments within the same second share an identifier; the second
/// one reuses the directory and is still a valid release.
pub fn new_release_id() -> String {
    chrono::Utc::now().timestamp().to_string()
}

/// Point `deploy_base/Current` at `release_id` with one atomic rename.
///
/// A relative link is created beside `Current` under a temporary name and
/// renamed over it, so the old target stays visible until the new one is.
pub fn switch_current(deploy_base: &Path, release_id: &str) -> Result<()> {
    let io_err =
        |e: std::io::Error| Error::internal_io(e.to_string(), Some("switch Current".to_string()));

    let link = deploy_base.join(CURRENT_LINK);
    let staged = deploy_base.join(format!(".{}.tmp.{}", CURRENT_LINK, std::process::id()));

    if fs::symlink_metadata(&staged).is_ok() {
        fs::remove_file(&staged).map_err(io_err)?;
    }
    std::os::unix::fs::symlink(release_id, &staged).map_err(io_err)?;

    if let Err(e) = fs::rename(&staged, &link) {
        let _ = fs::remove_file(&staged);
        return Err(io_err(e));
    }

    Ok(())
}

/// Copy every direct entry of `deploy_base/.config` into the `Current` tree.
///
/// Returns the names copied. A missing overlay directory is not an error; a
/// `.config` that is not a directory is ignored with a warning.
pub fn overlay_config(deploy_base: &Path) -> Result<Vec<String>> {
    let overlay = deploy_base.join(CONFIG_OVERLAY_DIR);
    let current = deploy_base.join(CURRENT_LINK);

    let meta = match fs::metadata(&overlay) {
        Ok(meta) => meta,
        Err(_) => return Ok(Vec::new()),
    };
    if !meta.is_dir() {
        eprintln!("[release] WARNING: {} is not a directory, ignoring", overlay.display());
        return Ok(Vec::new());
    }

    let mut names = list_entries(&overlay)?;
    names.sort();
    for name in &names {
        io::copy_recursive(&overlay.join(name), &current.join(name), "overlay config")?;
    }

    Ok(names)
}

/// Delete all but the `keep` most recent releases under `deploy_base`.
///
/// Entries are ordered oldest-first by modification time (release number and
/// then name break ties). `Current`, `.config` and the release `Current`
/// points at are never removed. Returns the names removed, oldest first.
pub fn prune_releases(deploy_base: &Path, keep: usize) -> Result<Vec<String>> {
    let live = fs::read_link(deploy_base.join(CURRENT_LINK))
        .ok()
        .and_then(|target| target.file_name().map(|n| n.to_string_lossy().to_string()));

    let mut candidates: Vec<(SystemTime, Option<u64>, String)> = Vec::new();
    for name in list_entries(deploy_base)? {
        if name == CURRENT_LINK || name == CONFIG_OVERLAY_DIR {
            continue;
        }
        let modified = fs::symlink_metadata(deploy_base.join(&name))
            .and_then(|m| m.modified())
            .map_err(|e| Error::internal_io(e.to_string(), Some(format!("stat {}", name))))?;
        candidates.push((modified, name.parse().ok(), name));
    }

    candidates.sort();
    let excess = candidates.len().saturating_sub(keep);

    let mut removed = Vec::new();
    for (_, _, name) in candidates.into_iter().take(excess) {
        if live.as_deref() == Some(name.as_str()) {
            continue;
        }
        log_status!("release", "Removing old release {}", name);
        io::remove_path(&deploy_base.join(&name), "prune releases")?;
        removed.push(name);
    }

    Ok(removed)
}

fn list_entries(dir: &Path) -> Result<Vec<String>> {
    let io_err = |e: std::io::Error| {
        Error::internal_io(e.to_string(), Some(format!("list {}", dir.display())))
    };

    let mut names = Vec::new();
    for entry in fs::read_dir(dir).map_err(io_err)? {
        let entry = entry.map_err(io_err)?;
        names.push(entry.file_name().to_string_lossy().to_string());
    }
    Ok(names)
}
