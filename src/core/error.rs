use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfigMissingKey,
    ConfigUnreadable,
    ConfigInvalidYaml,
    ConfigInvalidValue,

    ValidationInvalidArgument,

    SshKeyMissing,
    SshAuthFailed,
    SshConnectFailed,

    RemoteCommandFailed,
    TransferFailed,

    ArtifactNotFound,
    ArchiveInvalid,
    ArchiveUnsupportedEntry,

    PhaseCommandFailed,
    DeployDirMissing,

    InternalIoError,
    InternalJsonError,
    InternalUnexpected,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::ConfigMissingKey => "config.missing_key",
            ErrorCode::ConfigUnreadable => "config.unreadable",
            ErrorCode::ConfigInvalidYaml => "config.invalid_yaml",
            ErrorCode::ConfigInvalidValue => "config.invalid_value",

            ErrorCode::ValidationInvalidArgument => "validation.invalid_argument",

            ErrorCode::SshKeyMissing => "ssh.key_missing",
            ErrorCode::SshAuthFailed => "ssh.auth_failed",
            ErrorCode::SshConnectFailed => "ssh.connect_failed",

            ErrorCode::RemoteCommandFailed => "remote.command_failed",
            ErrorCode::TransferFailed => "transfer.failed",

            ErrorCode::ArtifactNotFound => "artifact.not_found",
            ErrorCode::ArchiveInvalid => "archive.invalid",
            ErrorCode::ArchiveUnsupportedEntry => "archive.unsupported_entry",

            ErrorCode::PhaseCommandFailed => "phase.command_failed",
            ErrorCode::DeployDirMissing => "deploy.dir_missing",

            ErrorCode::InternalIoError => "internal.io_error",
            ErrorCode::InternalJsonError => "internal.json_error",
            ErrorCode::InternalUnexpected => "internal.unexpected",
        }
    }

    /// Whether a deployment may continue after an error of this kind.
    ///
    /// Missing artifacts and unreadable archives are logged and skipped;
    /// everything else halts the deployment for the target.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, ErrorCode::ArtifactNotFound | ErrorCode::ArchiveInvalid)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Hint {
    pub message: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigMissingKeyDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidYamlDetails {
    pub path: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigInvalidValueDetails {
    pub key: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    pub problem: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidArgumentDetails {
    pub field: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SshFailureDetails {
    pub target: String,
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoteCommandFailedDetails {
    pub command: String,
    pub exit_code: i32,
    pub target: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    pub stderr: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferFailedDetails {
    pub local_path: String,
    pub remote_path: String,
    pub target: String,
    pub error: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveDetails {
    pub archive: String,
    pub problem: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PhaseCommandFailedDetails {
    pub phase: String,
    pub exit_code: i32,
    pub commands: Vec<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalIoErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InternalJsonErrorDetails {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Error {
    pub code: ErrorCode,
    pub message: String,
    pub details: Value,
    pub hints: Vec<Hint>,
    pub retryable: Option<bool>,
}

pub type Result<T> = std::result::Result<T, Error>;

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for Error {}

fn to_details<T: Serialize>(details: T) -> Value {
    serde_json::to_value(details).unwrap_or_else(|_| Value::Object(serde_json::Map::new()))
}

impl Error {
    pub fn new(code: ErrorCode, message: impl Into<String>, details: Value) -> Self {
        Self {
            code,
            message: message.into(),
            details,
            hints: Vec::new(),
            retryable: None,
        }
    }

    pub fn validation_invalid_argument(
        field: impl Into<String>,
        problem: impl Into<String>,
        id: Option<String>,
    ) -> Self {
        let details = to_details(InvalidArgumentDetails {
            field: field.into(),
            problem: problem.into(),
            id,
        });

        Self::new(
            ErrorCode::ValidationInvalidArgument,
            "Invalid argument",
            details,
        )
    }

    pub fn config_missing_key(key: impl Into<String>, path: Option<String>) -> Self {
        let details = to_details(ConfigMissingKeyDetails {
            key: key.into(),
            path,
        });

        Self::new(
            ErrorCode::ConfigMissingKey,
            "Missing required configuration key",
            details,
        )
    }

    pub fn config_unreadable(path: impl Into<String>, err: impl std::fmt::Display) -> Self {
        let details = to_details(ConfigInvalidYamlDetails {
            path: path.into(),
            error: err.to_string(),
        });

        Self::new(
            ErrorCode::ConfigUnreadable,
            "Configuration file could not be read",
            details,
        )
    }

    pub fn config_invalid_yaml(path: impl Into<String>, err: impl std::fmt::Display) -> Self {
        let details = to_details(ConfigInvalidYamlDetails {
            path: path.into(),
            error: err.to_string(),
        });

        Self::new(
            ErrorCode::ConfigInvalidYaml,
            "Invalid YAML in configuration",
            details,
        )
    }

    pub fn config_invalid_value(
        key: impl Into<String>,
        value: Option<String>,
        problem: impl Into<String>,
    ) -> Self {
        let details = to_details(ConfigInvalidValueDetails {
            key: key.into(),
            value,
            problem: problem.into(),
        });

        Self::new(
            ErrorCode::ConfigInvalidValue,
            "Invalid configuration value",
            details,
        )
    }

    pub fn ssh_key_missing(variable: impl Into<String>) -> Self {
        let variable = variable.into();
        Self::new(
            ErrorCode::SshKeyMissing,
            format!("Private key not found in ${}", variable),
            serde_json::json!({ "variable": variable }),
        )
        .with_hint(format!(
            "Export the private key contents, e.g. {}=\"$(cat ~/.ssh/id_ed25519)\"",
            variable
        ))
    }

    pub fn ssh_auth_failed(target: impl Into<String>, error: impl Into<String>) -> Self {
        let details = to_details(SshFailureDetails {
            target: target.into(),
            error: error.into(),
            exit_code: None,
        });

        Self::new(ErrorCode::SshAuthFailed, "SSH authentication failed", details)
    }

    pub fn ssh_connect_failed(
        target: impl Into<String>,
        error: impl Into<String>,
        exit_code: Option<i32>,
    ) -> Self {
        let details = to_details(SshFailureDetails {
            target: target.into(),
            error: error.into(),
            exit_code,
        });

        let mut err = Self::new(ErrorCode::SshConnectFailed, "SSH connection failed", details);
        err.retryable = Some(true);
        err
    }

    pub fn remote_command_failed(details: RemoteCommandFailedDetails) -> Self {
        Self::new(
            ErrorCode::RemoteCommandFailed,
            "Remote command failed",
            to_details(details),
        )
    }

    pub fn transfer_failed(details: TransferFailedDetails) -> Self {
        Self::new(
            ErrorCode::TransferFailed,
            "File transfer failed",
            to_details(details),
        )
    }

    pub fn artifact_not_found(pattern: impl Into<String>) -> Self {
        let pattern = pattern.into();
        Self::new(
            ErrorCode::ArtifactNotFound,
            format!("Could not find {}", pattern),
            serde_json::json!({ "pattern": pattern }),
        )
    }

    pub fn archive_invalid(archive: impl Into<String>, problem: impl Into<String>) -> Self {
        let details = to_details(ArchiveDetails {
            archive: archive.into(),
            problem: problem.into(),
            entry: None,
        });

        Self::new(ErrorCode::ArchiveInvalid, "Archive could not be read", details)
    }

    pub fn archive_unsupported_entry(
        archive: impl Into<String>,
        entry: impl Into<String>,
        problem: impl Into<String>,
    ) -> Self {
        let details = to_details(ArchiveDetails {
            archive: archive.into(),
            problem: problem.into(),
            entry: Some(entry.into()),
        });

        Self::new(
            ErrorCode::ArchiveUnsupportedEntry,
            "Archive contains an entry that cannot be unpacked",
            details,
        )
    }

    pub fn phase_command_failed(details: PhaseCommandFailedDetails) -> Self {
        let message = format!(
            "Deployment failed in {} phase with code {}",
            details.phase, details.exit_code
        );
        Self::new(ErrorCode::PhaseCommandFailed, message, to_details(details))
    }

    pub fn deploy_dir_missing(deploy_dir: impl Into<String>) -> Self {
        let deploy_dir = deploy_dir.into();
        Self::new(
            ErrorCode::DeployDirMissing,
            format!(
                "Deploy directory {} was not created by 'copy' step",
                deploy_dir
            ),
            serde_json::json!({ "deployDir": deploy_dir }),
        )
        .with_hint("The copy phase must create $DEPLOY_DIR, e.g. 'mkdir -p $DEPLOY_DIR'")
    }

    pub fn internal_io(error: impl Into<String>, context: Option<String>) -> Self {
        let details = to_details(InternalIoErrorDetails {
            error: error.into(),
            context,
        });

        Self::new(ErrorCode::InternalIoError, "IO error", details)
    }

    pub fn internal_json(error: impl Into<String>, context: Option<String>) -> Self {
        let details = to_details(InternalJsonErrorDetails {
            error: error.into(),
            context,
        });

        Self::new(ErrorCode::InternalJsonError, "JSON error", details)
    }

    pub fn internal_unexpected(error: impl Into<String>) -> Self {
        Self::new(
            ErrorCode::InternalUnexpected,
            "Unexpected error",
            serde_json::json!({ "error": error.into() }),
        )
    }

    pub fn with_hint(mut self, message: impl Into<String>) -> Self {
        self.hints.push(Hint {
            message: message.into(),
        });
        self
    }

    /// Add one key to the details object, replacing non-object details.
    pub fn with_detail(mut self, key: &str, value: impl Into<Value>) -> Self {
        if !self.details.is_object() {
            self.details = Value::Object(serde_json::Map::new());
        }
        if let Some(map) = self.details.as_object_mut() {
            map.insert(key.to_string(), value.into());
        }
        self
    }

    /// Exit code reported by a failed command, when the error carries one.
    pub fn command_exit_code(&self) -> Option<i32> {
        match self.code {
            ErrorCode::PhaseCommandFailed | ErrorCode::RemoteCommandFailed => self
                .details
                .get("exitCode")
                .and_then(Value::as_i64)
                .map(|code| code as i32),
            _ => None,
        }
    }
}
