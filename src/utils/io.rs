//! File I/O primitives with consistent error handling.

use crate::error::{Error, Result};
use std::fs;
use std::path::Path;

/// Copy a file or directory tree into `dest`, overwriting what is there.
///
/// Files keep their permission bits (`fs::copy` copies them). Symlinks are
/// recreated as symlinks rather than followed.
pub fn copy_recursive(src: &Path, dest: &Path, operation: &str) -> Result<()> {
    let io_err = |e: std::io::Error| Error::internal_io(e.to_string(), Some(operation.to_string()));

    let meta = fs::symlink_metadata(src).map_err(io_err)?;
    let file_type = meta.file_type();

    if file_type.is_dir() {
        if dest.is_file() || dest.is_symlink() {
            fs::remove_file(dest).map_err(io_err)?;
        }
        fs::create_dir_all(dest).map_err(io_err)?;
        fs::set_permissions(dest, meta.permissions()).map_err(io_err)?;
        for entry in fs::read_dir(src).map_err(io_err)? {
            let entry = entry.map_err(io_err)?;
            copy_recursive(&entry.path(), &dest.join(entry.file_name()), operation)?;
        }
        return Ok(());
    }

    if dest.is_symlink() || dest.is_file() {
        fs::remove_file(dest).map_err(io_err)?;
    } else if dest.is_dir() {
        fs::remove_dir_all(dest).map_err(io_err)?;
    }

    if file_type.is_symlink() {
        let target = fs::read_link(src).map_err(io_err)?;
        std::os::unix::fs::symlink(target, dest).map_err(io_err)?;
    } else {
        fs::copy(src, dest).map_err(io_err)?;
    }

    Ok(())
}

/// Remove a file, symlink or directory tree.
pub fn remove_path(path: &Path, operation: &str) -> Result<()> {
    let meta = fs::symlink_metadata(path)
        .map_err(|e| Error::internal_io(e.to_string(), Some(operation.to_string())))?;

    let result = if meta.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };

    result.map_err(|e| Error::internal_io(e.to_string(), Some(operation.to_string())))
}
