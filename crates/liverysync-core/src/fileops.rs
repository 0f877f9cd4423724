// Copyright (c) 2025 SOLARE S.R.O.
//
// This file is part of LiverySync.
//
// Licensed under the Creative Commons Attribution-NonCommercial-NoDerivatives 4.0 International
// (CC BY-NC-ND 4.0). You may use and share this file for non-commercial purposes only and you may not
// create derivatives. See <https://creativecommons.org/licenses/by-nc-nd/4.0/>.
//
// This software is provided "AS IS", without warranty of any kind.
//
// For commercial licensing, please contact: info@solare.cz

//! Safe delete and move primitives

use crate::error::{Result, SyncError};
use std::fs;
use std::path::{Component, Path, PathBuf};

/// What a delete call actually did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteOutcome {
    Removed,
    /// Non-empty directory with `recursive == false`; left untouched.
    KeptNonEmpty,
}

/// Delete a file, symlink or directory.
///
/// Directories are removed as a tree only when `recursive`; otherwise only if
/// empty. A missing path is a `Filesystem` error with `NotFound` kind.
pub fn safe_delete(path: &Path, recursive: bool) -> Result<DeleteOutcome> {
    let metadata = fs::symlink_metadata(path).map_err(|e| SyncError::fs(path, e))?;
    let file_type = metadata.file_type();

    if file_type.is_file() || file_type.is_symlink() {
        remove_file_or_link(path)?;
        return Ok(DeleteOutcome::Removed);
    }

    if file_type.is_dir() {
        if recursive {
            fs::remove_dir_all(path).map_err(|e| SyncError::fs(path, e))?;
            return Ok(DeleteOutcome::Removed);
        }
        let mut entries = fs::read_dir(path).map_err(|e| SyncError::fs(path, e))?;
        if entries.next().is_some() {
            tracing::debug!("Keeping non-empty directory {}", path.display());
            return Ok(DeleteOutcome::KeptNonEmpty);
        }
        fs::remove_dir(path).map_err(|e| SyncError::fs(path, e))?;
        return Ok(DeleteOutcome::Removed);
    }

    Err(SyncError::UnsupportedPathType(path.to_path_buf()))
}

#[cfg(windows)]
fn remove_file_or_link(path: &Path) -> Result<()> {
    // Directory symlinks on Windows need remove_dir
    fs::remove_file(path)
        .or_else(|_| fs::remove_dir(path))
        .map_err(|e| SyncError::fs(path, e))
}

#[cfg(not(windows))]
fn remove_file_or_link(path: &Path) -> Result<()> {
    fs::remove_file(path).map_err(|e| SyncError::fs(path, e))
}

/// Move a file, creating the destination's parent directories.
pub fn safe_move(from: &Path, to: &Path) -> Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).map_err(|e| SyncError::fs(parent, e))?;
    }
    fs::rename(from, to).map_err(|e| SyncError::fs(from, e))
}

/// Lexically resolve `relative` under `root`.
///
/// Returns `None` when the result would leave `root` (parent traversal past the
/// root, absolute paths, drive prefixes).
pub fn resolve_within(root: &Path, relative: &str) -> Option<PathBuf> {
    let mut resolved = PathBuf::new();
    let mut depth = 0_usize;

    for component in Path::new(relative).components() {
        match component {
            Component::Normal(part) => {
                resolved.push(part);
                depth += 1;
            }
            Component::CurDir => {}
            Component::ParentDir => {
                if depth == 0 {
                    return None;
                }
                resolved.pop();
                depth -= 1;
            }
            Component::RootDir | Component::Prefix(_) => return None,
        }
    }

    Some(root.join(resolved))
}

/// `path` made absolute against the working directory. Purely lexical.
pub fn absolute_path(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).map_err(|e| SyncError::fs(path, e))
}

/// Number of path separators, used to order deletions deepest first.
pub fn path_depth(path: &Path) -> usize {
    path.components().count()
}
