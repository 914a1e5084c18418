//! Deployment target descriptors (`user@host[:path]`).

use serde::Serialize;
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};

/// One entry of the `targets` list.
///
/// The optional path after the colon is informational; releases always rotate
/// under `deploy_base`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Target {
    pub user: String,
    pub host: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

impl Target {
    /// `user@host`, the form ssh and scp expect.
    pub fn destination(&self) -> String {
        format!("{}@{}", self.user, self.host)
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.path {
            Some(path) => write!(f, "{}@{}:{}", self.user, self.host, path),
            None => write!(f, "{}@{}", self.user, self.host),
        }
    }
}

impl FromStr for Target {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = |problem: &str| {
            Error::config_invalid_value("targets", Some(s.to_string()), problem.to_string())
        };

        let (user, rest) = s
            .split_once('@')
            .ok_or_else(|| invalid("Target must look like user@host or user@host:path"))?;

        let (host, path) = match rest.split_once(':') {
            Some((host, path)) => (host, Some(path)),
            None => (rest, None),
        };

        if user.is_empty() {
            return Err(invalid("Target is missing a user"));
        }
        if host.is_empty() || host.contains('@') {
            return Err(invalid("Target is missing a host"));
        }

        Ok(Self {
            user: user.to_string(),
            host: host.to_string(),
            path: path.filter(|p| !p.is_empty()).map(str::to_string),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_user_and_host() {
        let target: Target = "deploy@web1.example.com".parse().unwrap();
        assert_eq!(target.user, "deploy");
        assert_eq!(target.host, "web1.example.com");
        assert_eq!(target.path, None);
        assert_eq!(target.destination(), "deploy@web1.example.com");
    }

    #[test]
    fn parses_optional_path() {
        let target: Target = "deploy@10.0.0.5:/srv/app".parse().unwrap();
        assert_eq!(target.host, "10.0.0.5");
        assert_eq!(target.path.as_deref(), Some("/srv/app"));
        assert_eq!(target.to_string(), "deploy@10.0.0.5:/srv/app");
    }

    #[test]
    fn rejects_missing_user_or_host() {
        for bad in ["web1", "@web1", "deploy@", "deploy@:/srv", "a@b@c"] {
            let err = bad.parse::<Target>().unwrap_err();
            assert_eq!(err.code.as_str(), "config.invalid_value", "input: {}", bad);
        }
    }
}
