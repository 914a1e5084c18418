//! Deployment configuration (YAML).
//!
//! The same file drives both roles: the orchestrator reads `targets` and
//! `artifacts` to stage a deployment, the remote executor reads `artifacts`,
//! `deploy_base` and the phase groups to rotate a release.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::target::Target;

pub const DEFAULT_SHELL: &str = "/bin/bash";
pub const DEFAULT_KEEP_RELEASES: usize = 5;
pub const DEFAULT_SSH_PORT: u16 = 22;
pub const DEFAULT_PRIVATE_KEY_ENV: &str = "SCP_PRIVATE_KEY";
pub const DEFAULT_CONNECT_TIMEOUT: u64 = 10;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeploymentConfig {
    #[serde(default)]
    pub artifacts: Vec<String>,

    #[serde(default)]
    pub targets: Vec<String>,

    /// Directory releases rotate under. Absent means the working directory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deploy_base: Option<String>,

    #[serde(default)]
    pub copy: Vec<String>,

    #[serde(default)]
    pub build: Vec<String>,

    #[serde(default)]
    pub postinst: Vec<String>,

    #[serde(default)]
    pub restart: Vec<String>,

    #[serde(default = "default_shell")]
    pub shell: String,

    #[serde(default = "default_keep_releases")]
    pub keep_releases: usize,

    #[serde(default = "default_ssh_port")]
    pub port: u16,

    #[serde(default = "default_private_key_env")]
    pub private_key_env: String,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout: u64,

    /// Executor already installed on the targets. When set, the orchestrator
    /// invokes it instead of shipping its own binary.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_executor: Option<String>,

    #[serde(default)]
    pub strict_host_key_checking: bool,
}

fn default_shell() -> String {
    DEFAULT_SHELL.to_string()
}

fn default_keep_releases() -> usize {
    DEFAULT_KEEP_RELEASES
}

fn default_ssh_port() -> u16 {
    DEFAULT_SSH_PORT
}

fn default_private_key_env() -> String {
    DEFAULT_PRIVATE_KEY_ENV.to_string()
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT
}

impl DeploymentConfig {
    /// Read and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::config_unreadable(path.display().to_string(), e))?;
        Self::parse(&content, &path.display().to_string())
    }

    /// Parse configuration text. `origin` names the source in error details.
    pub fn parse(content: &str, origin: &str) -> Result<Self> {
        let config: Self = if content.trim().is_empty() {
            serde_yml::from_str("{}")
        } else {
            serde_yml::from_str(content)
        }
        .map_err(|e| Error::config_invalid_yaml(origin, e))?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if let Some(base) = &self.deploy_base {
            if base.is_empty() || !Path::new(base).is_absolute() {
                return Err(Error::config_invalid_value(
                    "deploy_base",
                    Some(base.clone()),
                    "deploy_base must be an absolute path",
                ));
            }
        }

        if self.keep_releases == 0 {
            return Err(Error::config_invalid_value(
                "keep_releases",
                Some("0".to_string()),
                "At least one release must be kept",
            ));
        }

        if self.shell.trim().is_empty() {
            return Err(Error::config_invalid_value(
                "shell",
                None,
                "shell must name an interpreter",
            ));
        }

        self.parsed_targets()?;
        Ok(())
    }

    /// Parsed `targets`, in configured order.
    pub fn parsed_targets(&self) -> Result<Vec<Target>> {
        self.targets.iter().map(|t| t.parse()).collect()
    }

    /// Targets for an orchestrated deployment; an empty list is an error.
    pub fn require_targets(&self, config_path: &Path) -> Result<Vec<Target>> {
        let targets = self.parsed_targets()?;
        if targets.is_empty() {
            return Err(Error::config_missing_key(
                "targets",
                Some(config_path.display().to_string()),
            ));
        }
        Ok(targets)
    }

    /// Release root, resolving an absent `deploy_base` against `work_dir`.
    pub fn deploy_base_in(&self, work_dir: &Path) -> PathBuf {
        match &self.deploy_base {
            Some(base) => PathBuf::from(base),
            None => work_dir.to_path_buf(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const FULL: &str = r#"
artifacts:
  - PhotoHub-Linux-*.tar.gz
targets:
  - deploy@web1.example.com
  - deploy@web2.example.com:/srv/photohub
deploy_base: /srv/photohub
copy:
  - mkdir -p $DEPLOY_DIR
  - cp -r PhotoHub/* $DEPLOY_DIR
build:
  - cd $DEPLOY_DIR && ./configure
postinst: []
restart:
  - sudo systemctl restart photohub
"#;

    #[test]
    fn parses_all_keys() {
        let config = DeploymentConfig::parse(FULL, "deploy.yml").unwrap();

        assert_eq!(config.artifacts, vec!["PhotoHub-Linux-*.tar.gz"]);
        assert_eq!(config.targets.len(), 2);
        assert_eq!(config.deploy_base.as_deref(), Some("/srv/photohub"));
        assert_eq!(config.copy.len(), 2);
        assert_eq!(config.build, vec!["cd $DEPLOY_DIR && ./configure"]);
        assert!(config.postinst.is_empty());
        assert_eq!(config.restart.len(), 1);
    }

    #[test]
    fn applies_defaults() {
        let config = DeploymentConfig::parse("targets: [deploy@web1]", "deploy.yml").unwrap();

        assert_eq!(config.shell, DEFAULT_SHELL);
        assert_eq!(config.keep_releases, 5);
        assert_eq!(config.port, 22);
        assert_eq!(config.private_key_env, "SCP_PRIVATE_KEY");
        assert_eq!(config.connect_timeout, 10);
        assert!(config.remote_executor.is_none());
        assert!(!config.strict_host_key_checking);
        assert!(config.deploy_base.is_none());
    }

    #[test]
    fn empty_file_is_an_empty_config() {
        let config = DeploymentConfig::parse("", "deploy.yml").unwrap();
        assert!(config.targets.is_empty());
        assert!(config.artifacts.is_empty());
    }

    #[test]
    fn invalid_yaml_is_config_error() {
        let err = DeploymentConfig::parse("targets: [unterminated", "deploy.yml").unwrap_err();
        assert_eq!(err.code.as_str(), "config.invalid_yaml");
        assert_eq!(err.details["path"], "deploy.yml");
    }

    #[test]
    fn relative_deploy_base_is_rejected() {
        let err = DeploymentConfig::parse("deploy_base: srv/app", "deploy.yml").unwrap_err();
        assert_eq!(err.code.as_str(), "config.invalid_value");
    }

    #[test]
    fn bad_target_is_rejected() {
        let err = DeploymentConfig::parse("targets: [web1]", "deploy.yml").unwrap_err();
        assert_eq!(err.code.as_str(), "config.invalid_value");
    }

    #[test]
    fn require_targets_rejects_empty_list() {
        let config = DeploymentConfig::parse("copy: [\"true\"]", "deploy.yml").unwrap();
        let err = config.require_targets(Path::new("deploy.yml")).unwrap_err();
        assert_eq!(err.code.as_str(), "config.missing_key");
    }

    #[test]
    fn deploy_base_defaults_to_work_dir() {
        let config = DeploymentConfig::parse("", "deploy.yml").unwrap();
        assert_eq!(
            config.deploy_base_in(Path::new("/tmp/tmp.x1")),
            PathBuf::from("/tmp/tmp.x1")
        );
    }

    #[test]
    fn load_reads_file() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(FULL.as_bytes()).unwrap();

        let config = DeploymentConfig::load(file.path()).unwrap();
        assert_eq!(config.parsed_targets().unwrap()[1].path.as_deref(), Some("/srv/photohub"));
    }

    #[test]
    fn load_missing_file_is_config_error() {
        let err = DeploymentConfig::load(Path::new("/nonexistent/deploy.yml")).unwrap_err();
        assert_eq!(err.code.as_str(), "config.unreadable");
    }
}
