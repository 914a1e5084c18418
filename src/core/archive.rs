//! Streaming `.tar.gz` unpacking for release artifacts.

use flate2::read::GzDecoder;
use serde::Serialize;
use std::fs::{self, File};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Component, Path, PathBuf};
use tar::{Archive, EntryType};

use crate::error::{Error, Result};

const DIR_MODE: u32 = 0o755;

/// What one archive contributed to the working directory.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct UnpackSummary {
    pub archive: String,
    pub directories: usize,
    pub files: usize,
}

/// Unpack a gzip-compressed tar archive into `dest`.
///
/// Directory entries are created with mode 0755 and regular files are written
/// byte-for-byte. Entry names stay relative to `dest`.
///
/// Errors:
/// - `ArchiveInvalid` when the archive cannot be opened, decompressed or read.
///   The caller may skip the archive and carry on.
/// - `ArchiveUnsupportedEntry` for links, devices and other entry kinds, and
///   for names that would land outside `dest`. Unpacking stops; a release
///   missing those entries must not go live.
pub fn unpack_tar_gz(archive_path: &Path, dest: &Path) -> Result<UnpackSummary> {
    let label = archive_path.display().to_string();

    let file = File::open(archive_path).map_err(|e| Error::archive_invalid(&label, e.to_string()))?;
    let mut archive = Archive::new(GzDecoder::new(file));

    let mut summary = UnpackSummary {
        archive: label.clone(),
        directories: 0,
        files: 0,
    };

    let entries = archive
        .entries()
        .map_err(|e| Error::archive_invalid(&label, e.to_string()))?;

    for entry in entries {
        let mut entry = entry.map_err(|e| Error::archive_invalid(&label, e.to_string()))?;

        let name = entry
            .path()
            .map_err(|e| Error::archive_invalid(&label, e.to_string()))?
            .into_owned();
        let out_path = contained_path(dest, &name).ok_or_else(|| {
            Error::archive_unsupported_entry(
                &label,
                name.display().to_string(),
                "Entry path escapes the unpack directory",
            )
        })?;

        let entry_type = entry.header().entry_type();
        match entry_type {
            // "./" at the top of archives made with `tar -C dir .`
            EntryType::Directory if out_path == dest => {}
            EntryType::Directory => {
                create_dir(&out_path)?;
                summary.directories += 1;
            }
            t if t.is_file() && out_path != dest => {
                if let Some(parent) = out_path.parent() {
                    fs::create_dir_all(parent).map_err(|e| write_error(&out_path, e))?;
                }
                let mut out = File::create(&out_path).map_err(|e| write_error(&out_path, e))?;
                io::copy(&mut entry, &mut out)
                    .map_err(|e| Error::archive_invalid(&label, e.to_string()))?;
                summary.files += 1;
            }
            other => {
                return Err(Error::archive_unsupported_entry(
                    &label,
                    name.display().to_string(),
                    format!("Unsupported entry type: {:?}", other),
                ));
            }
        }
    }

    Ok(summary)
}

fn create_dir(path: &Path) -> Result<()> {
    fs::create_dir_all(path).map_err(|e| write_error(path, e))?;
    fs::set_permissions(path, fs::Permissions::from_mode(DIR_MODE))
        .map_err(|e| write_error(path, e))
}

fn write_error(path: &Path, e: io::Error) -> Error {
    Error::internal_io(e.to_string(), Some(format!("unpack {}", path.display())))
}

/// Join an entry name onto `dest`, refusing absolute names and `..`.
fn contained_path(dest: &Path, name: &Path) -> Option<PathBuf> {
    let mut out = dest.to_path_buf();

    for component in name.components() {
        match component {
            Component::Normal(part) => out.push(part),
            Component::CurDir => {}
            _ => return None,
        }
    }

    Some(out)
}
