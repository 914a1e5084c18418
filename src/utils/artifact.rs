//! Artifact path resolution with glob pattern support.

use std::path::{Path, PathBuf};

use crate::error::{Error, Result};

/// Resolve a potentially glob-patterned artifact path to every matching file.
///
/// - If path contains no glob chars (`*`, `?`, `[`, `]`), returns it unchanged after
///   existence check
/// - If path is a glob, returns all regular files that match, in glob order
/// - Returns `ArtifactNotFound` if nothing matches
///
/// Relative patterns are anchored at `base`; an empty `base` leaves them
/// relative to the current directory. Only `pattern` is glob syntax: `base`
/// is matched literally.
pub fn resolve_artifact_paths_in(base: &Path, pattern: &str) -> Result<Vec<PathBuf>> {
    let unanchored = Path::new(pattern).is_absolute() || base.as_os_str().is_empty();
    let anchored = if unanchored {
        PathBuf::from(pattern)
    } else {
        base.join(pattern)
    };

    if !contains_glob_chars(pattern) {
        if anchored.is_file() {
            return Ok(vec![anchored]);
        }
        return Err(Error::artifact_not_found(pattern));
    }

    let glob_pattern = if unanchored {
        pattern.to_string()
    } else {
        let escaped_base = glob::Pattern::escape(&base.to_string_lossy());
        Path::new(&escaped_base).join(pattern).to_string_lossy().to_string()
    };
    let entries: Vec<PathBuf> = glob::glob(&glob_pattern)
        .map_err(|e| {
            Error::config_invalid_value(
                "artifacts",
                Some(pattern.to_string()),
                format!("Invalid glob pattern: {}", e),
            )
        })?
        .filter_map(|entry| entry.ok())
        .filter(|p| p.is_file())
        .collect();

    if entries.is_empty() {
        return Err(Error::artifact_not_found(pattern));
    }

    log_status!("artifact", "Resolved '{}' -> {} file(s)", pattern, entries.len());
    Ok(entries)
}

/// Files resolved from a list of patterns, plus the patterns that matched nothing.
#[derive(Debug, Default)]
pub struct ResolvedArtifacts {
    pub files: Vec<PathBuf>,
    pub missing: Vec<String>,
}

/// Resolve every pattern, collecting patterns without matches instead of failing.
///
/// Invalid glob syntax is still an error.
pub fn resolve_all(base: &Path, patterns: &[String]) -> Result<ResolvedArtifacts> {
    let mut resolved = ResolvedArtifacts::default();

    for pattern in patterns {
        match resolve_artifact_paths_in(base, pattern) {
            Ok(files) => resolved.files.extend(files),
            Err(err) if err.code.is_recoverable() => {
                eprintln!("[artifact] Could not find {}", pattern);
                resolved.missing.push(pattern.clone());
            }
            Err(err) => return Err(err),
        }
    }

    Ok(resolved)
}

fn contains_glob_chars(s: &str) -> bool {
    s.contains('*') || s.contains('?') || s.contains('[') || s.contains(']')
}
