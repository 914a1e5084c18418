use std::fs;
use std::io::Write;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use tempfile::NamedTempFile;

use crate::error::{Error, Result};

const KEY_MARKER: &str = "PRIVATE KEY-----";

/// A private key taken from the environment and written to a 0600 file for
/// `ssh -i` / `scp -i`. The file is removed when the value is dropped.
pub struct PrivateKey {
    file: NamedTempFile,
}

impl PrivateKey {
    /// Read the key material from environment variable `var`.
    pub fn from_env(var: &str) -> Result<Self> {
        match std::env::var(var) {
            Ok(pem) if !pem.trim().is_empty() => Self::from_pem(&pem, var),
            _ => Err(Error::ssh_key_missing(var)),
        }
    }

    /// Write PEM/OpenSSH key text to a private temp file. `source` names where
    /// the text came from, for error messages.
    pub fn from_pem(pem: &str, source: &str) -> Result<Self> {
        if !pem.contains(KEY_MARKER) {
            return Err(Error::ssh_auth_failed(
                source,
                format!("${} does not contain a PEM or OpenSSH private key", source),
            ));
        }

        let io_err = |e: std::io::Error| {
            Error::internal_io(e.to_string(), Some("write private key".to_string()))
        };

        let mut file = NamedTempFile::new().map_err(io_err)?;
        fs::set_permissions(file.path(), fs::Permissions::from_mode(0o600)).map_err(io_err)?;

        let mut body = pem.trim().to_string();
        body.push('\n');
        file.write_all(body.as_bytes()).map_err(io_err)?;
        file.flush().map_err(io_err)?;

        Ok(Self { file })
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }
}
