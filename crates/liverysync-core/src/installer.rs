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

//! Archive classification and safe extraction
//!
//! The layout of an archive decides where it lands:
//! - one top-level folder and nothing else: extracted straight into the
//!   destination, the folder becomes the visible package
//! - several top-level folders: each one is its own package next to the others
//! - anything with loose files at the root: wrapped in a folder named after the archive
//!
//! Every entry is resolved lexically under the extraction root before it is
//! written. An entry that escapes stops the archive at that point.

use crate::error::{Result, SyncError};
use crate::fileops::{absolute_path, resolve_within, safe_delete};
use crate::manifest::{Manifest, compute_checksum};
use serde::Serialize;
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum ArchiveLayout {
    SingleRoot(String),
    MultiRoot(Vec<String>),
    Fallback,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallStatus {
    Success,
    Partial,
    Failure,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstallResult {
    pub status: InstallStatus,
    pub layout: ArchiveLayout,
    pub extract_root: PathBuf,
    /// Absolute paths written and registered with the manifest.
    pub succeeded: Vec<PathBuf>,
    /// Entry names that could not be extracted.
    pub failed: Vec<String>,
    pub archive_removed: bool,
}

/// Classify an archive from its entry names.
pub fn classify<'a, I>(names: I, reserved_folder_names: &[String]) -> ArchiveLayout
where
    I: IntoIterator<Item = &'a str>,
{
    let mut root_files = 0_usize;
    let mut top_level_folders = BTreeSet::new();

    for name in names {
        match name.split_once('/') {
            Some((first, _)) => {
                top_level_folders.insert(first.to_owned());
            }
            None => root_files += 1,
        }
    }

    if root_files > 0 {
        return ArchiveLayout::Fallback;
    }

    let mut folders: Vec<String> = top_level_folders.into_iter().collect();
    match folders.len() {
        0 => ArchiveLayout::Fallback,
        1 => {
            let folder = folders.remove(0);
            let reserved = reserved_folder_names
                .iter()
                .any(|r| r.eq_ignore_ascii_case(&folder));
            if reserved {
                ArchiveLayout::Fallback
            } else {
                ArchiveLayout::SingleRoot(folder)
            }
        }
        _ => ArchiveLayout::MultiRoot(folders),
    }
}

/// Whether `path` opens as a zip container.
pub fn is_archive(path: &Path) -> bool {
    File::open(path)
        .ok()
        .is_some_and(|file| zip::ZipArchive::new(file).is_ok())
}

#[derive(Debug, Clone, Default)]
pub struct ArchiveInstaller {
    reserved_folder_names: Vec<String>,
}

impl ArchiveInstaller {
    pub fn new(reserved_folder_names: Vec<String>) -> Self {
        Self {
            reserved_folder_names,
        }
    }

    /// Extract `archive_path` under `dest_root`, tracking every write in `manifest`.
    ///
    /// Per-entry I/O failures are collected and extraction continues. An entry
    /// escaping the extraction root aborts with [`SyncError::PathSafety`];
    /// entries already written stay. The archive is deleted only when at least
    /// one entry was extracted.
    pub fn install(
        &self,
        archive_path: &Path,
        dest_root: &Path,
        package_id: &str,
        manifest: &Manifest,
    ) -> Result<InstallResult> {
        // Manifest rows are keyed by absolute path
        let archive_path = &absolute_path(archive_path)?;
        let dest_root = &absolute_path(dest_root)?;

        let file = File::open(archive_path).map_err(|e| SyncError::fs(archive_path, e))?;
        let mut archive = zip::ZipArchive::new(file)?;

        let layout = classify(archive.file_names(), &self.reserved_folder_names);
        tracing::debug!("{} classified as {layout:?}", archive_path.display());

        fs::create_dir_all(dest_root).map_err(|e| SyncError::fs(dest_root, e))?;
        let extract_root = match layout {
            ArchiveLayout::SingleRoot(_) | ArchiveLayout::MultiRoot(_) => dest_root.to_path_buf(),
            ArchiveLayout::Fallback => {
                let stem = archive_path
                    .file_stem()
                    .ok_or_else(|| SyncError::UnsupportedPathType(archive_path.to_path_buf()))?;
                let wrapper = dest_root.join(stem);
                fs::create_dir_all(&wrapper).map_err(|e| SyncError::fs(&wrapper, e))?;
                manifest.upsert(package_id, &wrapper, None)?;
                wrapper
            }
        };

        let mut succeeded = Vec::new();
        let mut failed = Vec::new();

        for index in 0..archive.len() {
            let mut entry = match archive.by_index(index) {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::error!("Failed to read entry #{index}: {e}");
                    failed.push(format!("#{index}"));
                    continue;
                }
            };
            let name = entry.name().to_owned();
            let is_dir = entry.is_dir();

            let Some(target) = resolve_within(&extract_root, &name) else {
                tracing::error!("Unsafe archive entry detected: {name}");
                return Err(SyncError::PathSafety {
                    entry: name,
                    root: extract_root,
                });
            };
            if target == extract_root {
                continue;
            }

            let dir = if is_dir {
                target.as_path()
            } else {
                target.parent().unwrap_or(&target)
            };
            let created_dirs = missing_ancestors(dir);
            let written = extract_entry(&mut entry, &target, dir, is_dir);

            // Directories made for a failed entry still belong to the package
            let created_dirs: Vec<PathBuf> = created_dirs
                .into_iter()
                .filter(|d| d.is_dir())
                .collect();
            let tracked = track_dirs(manifest, package_id, &created_dirs, &target);

            match written {
                Ok(()) => {
                    let recorded =
                        tracked.and_then(|()| track_target(manifest, package_id, &target, is_dir));
                    match recorded {
                        Ok(()) => {
                            tracing::debug!("Extracted {name} to {}", target.display());
                            succeeded.push(target);
                        }
                        Err(e) => {
                            tracing::error!("Extracted {name} but could not record it: {e}");
                            failed.push(name);
                        }
                    }
                }
                Err(e) => {
                    if let Err(track_err) = tracked {
                        tracing::warn!("Could not record directories for '{name}': {track_err}");
                    }
                    tracing::error!("Failed to extract '{name}': {e}");
                    failed.push(name);
                }
            }
        }
        drop(archive);

        let status = if failed.is_empty() {
            InstallStatus::Success
        } else if succeeded.is_empty() {
            InstallStatus::Failure
        } else {
            InstallStatus::Partial
        };

        let archive_removed =
            !succeeded.is_empty() && remove_archive(archive_path, package_id, manifest);

        tracing::info!(
            "Unpack of {} finished: {status:?}, {} extracted, {} failed",
            archive_path.display(),
            succeeded.len(),
            failed.len()
        );

        Ok(InstallResult {
            status,
            layout,
            extract_root,
            succeeded,
            failed,
            archive_removed,
        })
    }
}

/// Write one entry under `dir`. A file left half written is removed.
fn extract_entry(
    entry: &mut impl io::Read,
    target: &Path,
    dir: &Path,
    is_dir: bool,
) -> io::Result<()> {
    fs::create_dir_all(dir)?;
    if is_dir {
        return Ok(());
    }

    let mut outfile = File::create(target)?;
    if let Err(e) = io::copy(entry, &mut outfile) {
        drop(outfile);
        let _ = fs::remove_file(target);
        return Err(e);
    }
    Ok(())
}

fn missing_ancestors(dir: &Path) -> Vec<PathBuf> {
    dir.ancestors()
        .take_while(|p| !p.as_os_str().is_empty() && !p.exists())
        .map(Path::to_path_buf)
        .collect()
}

fn track_dirs(
    manifest: &Manifest,
    package_id: &str,
    created_dirs: &[PathBuf],
    target: &Path,
) -> Result<()> {
    for dir in created_dirs {
        if dir != target {
            manifest.upsert(package_id, dir, None)?;
        }
    }
    Ok(())
}

fn track_target(
    manifest: &Manifest,
    package_id: &str,
    target: &Path,
    is_dir: bool,
) -> Result<()> {
    let checksum = if is_dir {
        None
    } else {
        Some(compute_checksum(target)?)
    };
    manifest.upsert(package_id, target, checksum.as_deref())
}

fn remove_archive(archive_path: &Path, package_id: &str, manifest: &Manifest) -> bool {
    match safe_delete(archive_path, false) {
        Ok(_) => {
            if let Err(e) = manifest.remove(package_id, archive_path) {
                tracing::warn!("Archive removed but manifest entry kept: {e}");
            }
            tracing::info!("Removed archive {} after extraction", archive_path.display());
            true
        }
        Err(e) => {
            tracing::error!("Failed to remove archive {}: {e}", archive_path.display());
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, entries: &[(&str, &str)]) {
        let file = File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        for (name, data) in entries {
            if name.ends_with('/') {
                zip.add_directory(*name, SimpleFileOptions::default())
                    .unwrap();
            } else {
                zip.start_file(*name, SimpleFileOptions::default()).unwrap();
                zip.write_all(data.as_bytes()).unwrap();
            }
        }
        zip.finish().unwrap();
    }

    fn reserved() -> Vec<String> {
        vec!["__MACOSX".to_owned()]
    }

    #[test]
    fn test_classify_root_files_fall_back() {
        assert_eq!(classify(["a.txt", "b.txt"], &reserved()), ArchiveLayout::Fallback);
        assert_eq!(
            classify(["pkg/a.txt", "readme.txt"], &reserved()),
            ArchiveLayout::Fallback
        );
    }

    #[test]
    fn test_classify_single_root() {
        assert_eq!(
            classify(["pkg/", "pkg/a.txt", "pkg/sub/b.txt"], &reserved()),
            ArchiveLayout::SingleRoot("pkg".to_owned())
        );
    }

    #[test]
    fn test_classify_reserved_single_root_falls_back() {
        assert_eq!(
            classify(["__macosx/._a.txt"], &reserved()),
            ArchiveLayout::Fallback
        );
        assert_eq!(
            classify(["__MACOSX/._a.txt"], &[]),
            ArchiveLayout::SingleRoot("__MACOSX".to_owned())
        );
    }

    #[test]
    fn test_classify_multi_root() {
        assert_eq!(
            classify(["one/a.txt", "two/b.txt", "one/c.txt"], &reserved()),
            ArchiveLayout::MultiRoot(vec!["one".to_owned(), "two".to_owned()])
        );
    }

    #[test]
    fn test_classify_empty_archive() {
        assert_eq!(classify([], &reserved()), ArchiveLayout::Fallback);
    }

    #[test]
    fn test_fallback_extracts_into_wrapper() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("liveries");
        fs::create_dir_all(&dest).unwrap();
        let archive = dest.join("Desert Camo.zip");
        write_zip(&archive, &[("a.txt", "a"), ("b.txt", "")]);
        let manifest = Manifest::open_in_memory().unwrap();

        let result = ArchiveInstaller::new(reserved())
            .install(&archive, &dest, "f16", &manifest)
            .unwrap();

        assert_eq!(result.status, InstallStatus::Success);
        assert_eq!(result.layout, ArchiveLayout::Fallback);
        assert_eq!(result.extract_root, dest.join("Desert Camo"));
        assert!(dest.join("Desert Camo/a.txt").exists());
        assert!(dest.join("Desert Camo/b.txt").exists());
        assert!(result.archive_removed);
        assert!(!archive.exists());

        let tracked: Vec<PathBuf> = manifest
            .list("f16")
            .unwrap()
            .into_iter()
            .map(|(p, _)| p)
            .collect();
        assert!(tracked.contains(&dest.join("Desert Camo")));
        assert!(tracked.contains(&dest.join("Desert Camo/a.txt")));
        assert!(!tracked.contains(&archive));
    }

    #[test]
    fn test_single_root_extracts_in_place() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().to_path_buf();
        let archive = dest.join("pkg.zip");
        write_zip(&archive, &[("pkg/a.txt", "a"), ("pkg/b.txt", "")]);
        let manifest = Manifest::open_in_memory().unwrap();

        let result = ArchiveInstaller::new(reserved())
            .install(&archive, &dest, "f16", &manifest)
            .unwrap();

        assert_eq!(result.layout, ArchiveLayout::SingleRoot("pkg".to_owned()));
        assert_eq!(result.status, InstallStatus::Success);
        assert!(result.succeeded.contains(&dest.join("pkg/a.txt")));
        assert_eq!(
            std::fs::read_to_string(dest.join("pkg/a.txt")).unwrap(),
            "a"
        );

        // Implicit parent directory is tracked for later removal
        assert!(manifest.get("f16", &dest.join("pkg")).unwrap().is_some());
        let entry = manifest.get("f16", &dest.join("pkg/a.txt")).unwrap().unwrap();
        assert_eq!(
            entry.checksum,
            Some(compute_checksum(&dest.join("pkg/a.txt")).unwrap())
        );
    }

    #[test]
    fn test_multi_root_extracts_each_folder() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().to_path_buf();
        let archive = dest.join("bundle.zip");
        write_zip(
            &archive,
            &[("one/", ""), ("one/a.txt", "a"), ("two/b.txt", "")],
        );
        let manifest = Manifest::open_in_memory().unwrap();

        let result = ArchiveInstaller::new(reserved())
            .install(&archive, &dest, "f16", &manifest)
            .unwrap();

        assert!(matches!(result.layout, ArchiveLayout::MultiRoot(_)));
        assert!(dest.join("one/a.txt").exists());
        assert!(dest.join("two/b.txt").exists());
        assert!(!dest.join("bundle").exists());
    }

    #[test]
    fn test_traversal_entry_aborts_remaining() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("liveries");
        fs::create_dir_all(&dest).unwrap();
        let archive = dest.join("evil.zip");
        write_zip(
            &archive,
            &[
                ("pkg/a.txt", "a"),
                ("../../evil.txt", "evil"),
                ("pkg/b.txt", ""),
            ],
        );
        let manifest = Manifest::open_in_memory().unwrap();

        let err = ArchiveInstaller::new(reserved())
            .install(&archive, &dest, "f16", &manifest)
            .unwrap_err();

        assert!(matches!(
            err,
            SyncError::PathSafety { ref entry, .. } if entry == "../../evil.txt"
        ));
        assert!(dest.join("pkg/a.txt").exists());
        assert!(!dest.join("pkg/b.txt").exists());
        assert!(!dir.path().join("evil.txt").exists());
        assert!(archive.exists());
    }

    #[test]
    fn test_wholly_failed_archive_is_kept() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().to_path_buf();
        // A plain file where the package folder must go
        fs::write(dest.join("pkg"), b"in the way").unwrap();
        let archive = dest.join("pkg.zip");
        write_zip(&archive, &[("pkg/a.txt", "a"), ("pkg/b.txt", "")]);
        let manifest = Manifest::open_in_memory().unwrap();

        let result = ArchiveInstaller::new(reserved())
            .install(&archive, &dest, "f16", &manifest)
            .unwrap();

        assert_eq!(result.status, InstallStatus::Failure);
        assert_eq!(result.failed, vec!["pkg/a.txt".to_owned(), "pkg/b.txt".to_owned()]);
        assert!(!result.archive_removed);
        assert!(archive.exists());
    }

    #[test]
    fn test_partial_extraction() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().to_path_buf();
        fs::create_dir_all(dest.join("pkg")).unwrap();
        fs::write(dest.join("pkg/sub"), b"in the way").unwrap();
        let archive = dest.join("pkg.zip");
        write_zip(&archive, &[("pkg/a.txt", "a"), ("pkg/sub/b.txt", "")]);
        let manifest = Manifest::open_in_memory().unwrap();

        let result = ArchiveInstaller::new(reserved())
            .install(&archive, &dest, "f16", &manifest)
            .unwrap();

        assert_eq!(result.status, InstallStatus::Partial);
        assert_eq!(result.succeeded, vec![dest.join("pkg/a.txt")]);
        assert_eq!(result.failed, vec!["pkg/sub/b.txt".to_owned()]);
        assert!(result.archive_removed);
    }

    #[test]
    fn test_failed_entry_still_tracks_new_directories() {
        let dir = TempDir::new().unwrap();
        let dest = dir.path().to_path_buf();
        let archive = dest.join("pkg.zip");
        let stored =
            || SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
        let mut zip = zip::ZipWriter::new(File::create(&archive).unwrap());
        zip.start_file("pkg/ok.txt", stored()).unwrap();
        zip.write_all(b"fine").unwrap();
        zip.start_file("pkg/deep/bad.txt", stored()).unwrap();
        zip.write_all(b"ORIGINAL-PAYLOAD").unwrap();
        zip.finish().unwrap();

        // Corrupt the stored payload so its CRC no longer matches
        let mut bytes = fs::read(&archive).unwrap();
        let at = bytes
            .windows(16)
            .position(|w| w == b"ORIGINAL-PAYLOAD")
            .unwrap();
        bytes[at] = b'X';
        fs::write(&archive, bytes).unwrap();
        let manifest = Manifest::open_in_memory().unwrap();

        let result = ArchiveInstaller::new(reserved())
            .install(&archive, &dest, "f16", &manifest)
            .unwrap();

        assert_eq!(result.status, InstallStatus::Partial);
        assert_eq!(result.failed, vec!["pkg/deep/bad.txt".to_owned()]);
        assert!(!dest.join("pkg/deep/bad.txt").exists());
        assert!(dest.join("pkg/deep").is_dir());
        assert!(manifest.get("f16", &dest.join("pkg/deep")).unwrap().is_some());
        assert!(manifest.get("f16", &dest.join("pkg/deep/bad.txt")).unwrap().is_none());
    }

    #[test]
    fn test_relative_destination_records_absolute_paths() {
        let dir = TempDir::new_in(".").unwrap();
        let dest = dir.path().to_path_buf();
        assert!(dest.is_relative());
        let archive = dest.join("pkg.zip");
        write_zip(&archive, &[("pkg/a.txt", "a")]);
        let manifest = Manifest::open_in_memory().unwrap();

        let result = ArchiveInstaller::new(reserved())
            .install(&archive, &dest, "f16", &manifest)
            .unwrap();

        assert_eq!(result.status, InstallStatus::Success);
        assert!(result.extract_root.is_absolute());
        assert!(result.succeeded.iter().all(|p| p.is_absolute()));
        let tracked: Vec<PathBuf> = manifest
            .list("f16")
            .unwrap()
            .into_iter()
            .map(|(p, _)| p)
            .collect();
        assert_eq!(tracked.len(), 2);
        assert!(tracked.iter().all(|p| p.is_absolute()), "{tracked:?}");
        assert!(!archive.exists());
    }

    #[test]
    fn test_is_archive() {
        let dir = TempDir::new().unwrap();
        let zip_path = dir.path().join("a.zip");
        write_zip(&zip_path, &[("a.txt", "a")]);
        let plain = dir.path().join("b.zip");
        fs::write(&plain, b"not a zip").unwrap();

        assert!(is_archive(&zip_path));
        assert!(!is_archive(&plain));
        assert!(!is_archive(&dir.path().join("missing.zip")));
    }
}
