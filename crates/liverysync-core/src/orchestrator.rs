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

//! Update orchestration: check, plan, apply, cleanup
//!
//! One attempt runs strictly in sequence on the caller's task. Feed-level
//! failures abort the check before anything local changes; item-level failures
//! are recorded in the [`Summary`] and the run carries on.

use crate::config::SyncConfig;
use crate::error::{Result, SyncError};
use crate::fileops::{DeleteOutcome, absolute_path, resolve_within, safe_delete};
use crate::installer::{ArchiveInstaller, InstallStatus, is_archive};
use crate::ledger::Ledger;
use crate::manifest::{Manifest, compute_checksum};
use crate::planner::{self, SyncPlan};
use crate::progress::{ItemKind, ItemOutcome, ItemStatus, Phase, ProgressSink, Reporter, Summary};
use crate::release::{is_newer, latest_release, parse_release};
use crate::transport::{HttpTransport, Transport};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UpdateState {
    Idle,
    Checking,
    Planned,
    UpToDate,
    CheckFailed,
    Downloading,
    Extracting,
    Deleting,
    Cleanup,
    Done,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpdateCheck {
    pub package_id: String,
    pub plan: SyncPlan,
    pub local_version: Option<String>,
    pub remote_version: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum CheckOutcome {
    UpToDate {
        local_version: Option<String>,
        remote_version: String,
    },
    Updates(UpdateCheck),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageStatus {
    pub id: String,
    pub name: String,
    pub folder: String,
    pub target_folder: PathBuf,
    pub local_version: Option<String>,
    pub remote_version: Option<String>,
}

/// Feed fetched by the last successful check, waiting to become the local marker.
#[derive(Debug)]
struct PendingSnapshot {
    package_id: String,
    path: PathBuf,
    remote_version: String,
    fully_processed: bool,
}

#[derive(Debug)]
struct PackageTarget<'a> {
    package_id: &'a str,
    dir: PathBuf,
    base_url: String,
}

#[derive(Debug)]
pub struct UpdateOrchestrator<T: Transport = HttpTransport> {
    config: SyncConfig,
    transport: T,
    manifest: Manifest,
    installer: ArchiveInstaller,
    state: UpdateState,
    pending: Option<PendingSnapshot>,
    cancel: Arc<AtomicBool>,
}

impl UpdateOrchestrator<HttpTransport> {
    /// Validate the config and open the HTTP transport and manifest it points at.
    pub fn from_config(config: SyncConfig) -> Result<Self> {
        config.validate()?;
        let transport = HttpTransport::new(Duration::from_secs(config.request_timeout_secs))?;
        let manifest = Manifest::open(&config.manifest_path())?;
        Ok(Self::new(config, transport, manifest))
    }
}

impl<T: Transport> UpdateOrchestrator<T> {
    pub fn new(config: SyncConfig, transport: T, manifest: Manifest) -> Self {
        let installer = ArchiveInstaller::new(config.reserved_folder_names.clone());
        Self {
            config,
            transport,
            manifest,
            installer,
            state: UpdateState::Idle,
            pending: None,
            cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn state(&self) -> UpdateState {
        self.state
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn manifest(&self) -> &Manifest {
        &self.manifest
    }

    /// Flag checked between items; setting it stops the current run at the next boundary.
    ///
    /// Cleared at the start of every run.
    pub fn cancel_handle(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel)
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.load(Ordering::SeqCst)
    }

    /// Newest release recorded in the package's local version marker.
    pub fn local_version(&self, package_id: &str) -> Result<Option<String>> {
        self.config.package(package_id)?;
        let path = self.config.local_marker_path(package_id);
        match fs::read_to_string(&path) {
            Ok(text) => Ok(latest_release(&text).map(str::to_owned)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(SyncError::fs(path, e)),
        }
    }

    pub async fn check_for_updates(&mut self, package_id: &str) -> Result<CheckOutcome> {
        self.state = UpdateState::Checking;
        self.pending = None;

        match self.resolve_updates(package_id).await {
            Ok(outcome) => {
                self.state = match outcome {
                    CheckOutcome::UpToDate { .. } => UpdateState::UpToDate,
                    CheckOutcome::Updates(_) => UpdateState::Planned,
                };
                Ok(outcome)
            }
            Err(e) => {
                error!("Update check for {package_id} failed: {e}");
                self.state = UpdateState::CheckFailed;
                Err(e)
            }
        }
    }

    async fn resolve_updates(&mut self, package_id: &str) -> Result<CheckOutcome> {
        let feed_url = self.config.remote_feed_url(package_id)?;
        let local_version = self.local_version(package_id)?;

        let feed = self.transport.fetch_text(&feed_url).await?;
        let remote_version = latest_release(&feed)
            .ok_or_else(|| SyncError::Parse(format!("feed at {feed_url} has no release header")))?
            .to_owned();

        if !is_newer(local_version.as_deref(), &remote_version)? {
            info!(
                "{package_id}: local version {} matches {remote_version}, up to date",
                local_version.as_deref().unwrap_or("none")
            );
            return Ok(CheckOutcome::UpToDate {
                local_version,
                remote_version,
            });
        }

        info!(
            "{package_id}: local version {}, server version {remote_version}",
            local_version.as_deref().unwrap_or("none")
        );

        let ledger = Ledger::parse(&feed)?;
        let local_tag = local_version.as_deref().map(parse_release).transpose()?;
        let remote_tag = parse_release(&remote_version)?;
        let plan = planner::plan(&ledger, local_tag.as_ref(), &remote_tag);
        info!(
            "{package_id}: {} file(s) to download, {} to remove",
            plan.to_download.len(),
            plan.to_delete.len()
        );

        // Only now that the feed is fully understood does anything touch the disk
        let snapshot = self.config.feed_snapshot_path();
        if let Some(parent) = snapshot.parent() {
            fs::create_dir_all(parent).map_err(|e| SyncError::fs(parent, e))?;
        }
        fs::write(&snapshot, &feed).map_err(|e| SyncError::fs(&snapshot, e))?;
        debug!("Saved server feed to {}", snapshot.display());

        self.pending = Some(PendingSnapshot {
            package_id: package_id.to_owned(),
            path: snapshot,
            remote_version: remote_version.clone(),
            fully_processed: false,
        });

        Ok(CheckOutcome::Updates(UpdateCheck {
            package_id: package_id.to_owned(),
            plan,
            local_version,
            remote_version,
        }))
    }

    /// ToDelete entries whose installed folder (or file) is still on disk.
    pub fn existing_deletions(&self, plan: &SyncPlan, package_id: &str) -> Result<Vec<String>> {
        let dir = self.config.package_dir(package_id)?;
        Ok(plan
            .to_delete
            .iter()
            .filter(|path| existing_install(&dir, path).is_some())
            .cloned()
            .collect())
    }

    /// Download every ToDownload path, then remove every ToDelete path.
    ///
    /// Only a bad package id or an unusable package folder fails the call;
    /// everything else lands in the returned summary.
    pub async fn apply_plan(
        &mut self,
        plan: &SyncPlan,
        package_id: &str,
        sink: &mut dyn ProgressSink,
    ) -> Result<Summary> {
        let target = PackageTarget {
            package_id,
            dir: absolute_path(&self.config.package_dir(package_id)?)?,
            base_url: self.config.package_base_url(package_id)?,
        };
        fs::create_dir_all(&target.dir).map_err(|e| SyncError::fs(&target.dir, e))?;
        self.cancel.store(false, Ordering::SeqCst);

        let mut reporter = Reporter::new(sink);
        let mut summary = Summary::new(package_id);
        info!(
            "Applying plan for {package_id} into {}",
            target.dir.display()
        );

        self.state = UpdateState::Downloading;
        for path in &plan.to_download {
            if self.is_cancelled() {
                summary.cancelled = true;
                break;
            }
            self.download_item(path, &target, &mut reporter, &mut summary)
                .await;
        }

        if !summary.cancelled {
            self.state = UpdateState::Deleting;
            for path in &plan.to_delete {
                if self.is_cancelled() {
                    summary.cancelled = true;
                    break;
                }
                self.delete_item(path, &target, &mut reporter, &mut summary);
            }
        }

        if summary.cancelled {
            warn!("Run for {package_id} cancelled");
        }
        if let Some(pending) = self.pending.as_mut()
            && pending.package_id == package_id
        {
            pending.fully_processed = !summary.cancelled;
        }
        self.state = UpdateState::Cleanup;
        Ok(summary)
    }

    async fn download_item(
        &mut self,
        path: &str,
        target: &PackageTarget<'_>,
        reporter: &mut Reporter<'_>,
        summary: &mut Summary,
    ) {
        reporter.emit(path, ItemKind::Download, Phase::Start, path);

        let Some(dest) = resolve_within(&target.dir, path).filter(|dest| *dest != target.dir) else {
            let message = format!("{path} - unsafe path, skipped");
            reporter.emit(path, ItemKind::Download, Phase::Error, &message);
            summary
                .items
                .push(ItemOutcome::new(path, ItemKind::Download, ItemStatus::Failed, message));
            return;
        };

        let url = format!("{}{}", target.base_url, path.trim_start_matches('/'));
        debug!("File URL: {url}, destination: {}", dest.display());
        let started = Instant::now();

        match self.transport.download(&url, &dest).await {
            Ok(bytes) => {
                info!(
                    "Download completed of '{path}' ({bytes} bytes) in {:.2}s",
                    started.elapsed().as_secs_f64()
                );
                let checksum = compute_checksum(&dest)
                    .inspect_err(|e| warn!("Could not checksum {}: {e}", dest.display()))
                    .ok();
                if let Err(e) = self
                    .manifest
                    .upsert(target.package_id, &dest, checksum.as_deref())
                {
                    warn!("Could not record {} in manifest: {e}", dest.display());
                }

                let message = format!("{path} - Success");
                reporter.emit(path, ItemKind::Download, Phase::Done, &message);
                let mut outcome =
                    ItemOutcome::new(path, ItemKind::Download, ItemStatus::Succeeded, message);
                outcome.paths.push(dest.clone());
                summary.items.push(outcome);
            }
            Err(e) => {
                let message = format!("{path} - {e}");
                reporter.emit(path, ItemKind::Download, Phase::Error, &message);
                summary
                    .items
                    .push(ItemOutcome::new(path, ItemKind::Download, ItemStatus::Failed, message));
                return;
            }
        }

        if is_archive(&dest) {
            self.extract_item(path, &dest, target, reporter, summary);
        } else {
            let message = format!("{path} is not a zip archive; left in place");
            reporter.emit(path, ItemKind::Extract, Phase::Warning, &message);
            summary
                .items
                .push(ItemOutcome::new(path, ItemKind::Extract, ItemStatus::Kept, message));
        }
    }

    fn extract_item(
        &mut self,
        path: &str,
        archive: &Path,
        target: &PackageTarget<'_>,
        reporter: &mut Reporter<'_>,
        summary: &mut Summary,
    ) {
        self.state = UpdateState::Extracting;
        reporter.emit(path, ItemKind::Extract, Phase::Start, path);

        let dest_root = archive.parent().unwrap_or(&target.dir);
        let outcome = match self
            .installer
            .install(archive, dest_root, target.package_id, &self.manifest)
        {
            Ok(result) => {
                let (status, phase, message) = match result.status {
                    InstallStatus::Success => (
                        ItemStatus::Succeeded,
                        Phase::Done,
                        format!("{path} - {} item(s) extracted", result.succeeded.len()),
                    ),
                    InstallStatus::Partial => (
                        ItemStatus::Partial,
                        Phase::Error,
                        format!(
                            "{path} - {} extracted, {} failed: {}",
                            result.succeeded.len(),
                            result.failed.len(),
                            result.failed.join(", ")
                        ),
                    ),
                    InstallStatus::Failure => (
                        ItemStatus::Failed,
                        Phase::Error,
                        format!("{path} - extraction failed, archive kept"),
                    ),
                };
                reporter.emit(path, ItemKind::Extract, phase, &message);
                let mut outcome = ItemOutcome::new(path, ItemKind::Extract, status, message);
                outcome.paths = result.succeeded;
                outcome.failed_entries = result.failed;
                outcome
            }
            Err(e) => {
                let message = format!("{path} - {e}");
                reporter.emit(path, ItemKind::Extract, Phase::Error, &message);
                ItemOutcome::new(path, ItemKind::Extract, ItemStatus::Failed, message)
            }
        };

        summary.items.push(outcome);
        self.state = UpdateState::Downloading;
    }

    fn delete_item(
        &mut self,
        path: &str,
        target: &PackageTarget<'_>,
        reporter: &mut Reporter<'_>,
        summary: &mut Summary,
    ) {
        let folder = installed_name(path);
        let Some(folder_path) = resolve_within(&target.dir, &folder).filter(|p| *p != target.dir)
        else {
            let message = format!("'{folder}' - unsafe path, skipped");
            reporter.emit(path, ItemKind::Delete, Phase::Error, &message);
            summary
                .items
                .push(ItemOutcome::new(path, ItemKind::Delete, ItemStatus::Failed, message));
            return;
        };

        let Some(existing) = existing_install(&target.dir, path) else {
            info!("Folder does not exist: '{}'", folder_path.display());
            self.forget_tree(target.package_id, &folder_path);
            let message = format!("Folder does not exist: '{folder}'");
            reporter.emit(path, ItemKind::Delete, Phase::Done, &message);
            summary
                .items
                .push(ItemOutcome::new(path, ItemKind::Delete, ItemStatus::Skipped, message));
            return;
        };

        reporter.emit(path, ItemKind::Delete, Phase::Start, format!("'{folder}'"));
        let outcome = match safe_delete(&existing, true) {
            Ok(_) => {
                self.forget_tree(target.package_id, &existing);
                let message = format!("'{folder}' deleted");
                reporter.emit(path, ItemKind::Delete, Phase::Done, &message);
                let mut outcome =
                    ItemOutcome::new(path, ItemKind::Delete, ItemStatus::Succeeded, message);
                outcome.paths.push(existing);
                outcome
            }
            Err(e) if e.is_not_found() => {
                self.forget_tree(target.package_id, &existing);
                let message = format!("Folder does not exist: '{folder}'");
                reporter.emit(path, ItemKind::Delete, Phase::Done, &message);
                ItemOutcome::new(path, ItemKind::Delete, ItemStatus::Skipped, message)
            }
            Err(e) => {
                let message = format!("'{folder}': {e}");
                reporter.emit(path, ItemKind::Delete, Phase::Error, &message);
                ItemOutcome::new(path, ItemKind::Delete, ItemStatus::Failed, message)
            }
        };
        summary.items.push(outcome);
    }

    fn forget_tree(&self, package_id: &str, root: &Path) {
        match self.manifest.remove_tree(package_id, root) {
            Ok(0) => {}
            Ok(n) => debug!("Dropped {n} manifest entr(ies) under {}", root.display()),
            Err(e) => warn!("Could not drop manifest entries under {}: {e}", root.display()),
        }
    }

    /// Promote the fetched feed to the local version marker and drop the temporary copy.
    ///
    /// The marker is only replaced when the last `apply_plan` for the checked
    /// package ran to completion; otherwise the copy is discarded and the next
    /// check replays the same releases.
    pub fn cleanup(&mut self) -> Result<()> {
        let Some(pending) = self.pending.as_ref() else {
            debug!("No pending feed snapshot, nothing to clean up");
            self.state = UpdateState::Done;
            return Ok(());
        };
        self.state = UpdateState::Cleanup;

        if pending.fully_processed {
            let marker = self.config.local_marker_path(&pending.package_id);
            fs::copy(&pending.path, &marker).map_err(|e| SyncError::fs(&marker, e))?;
            info!(
                "Replaced '{}' with '{}' ({})",
                marker.display(),
                pending.path.display(),
                pending.remote_version
            );
        } else {
            warn!(
                "Update of {} was not fully processed; keeping the previous version marker",
                pending.package_id
            );
        }

        match safe_delete(&pending.path, false) {
            Ok(_) => debug!("Deleted local copy of '{}'", pending.path.display()),
            Err(e) if e.is_not_found() => {
                warn!("Feed copy '{}' already gone", pending.path.display());
            }
            Err(e) => return Err(e),
        }

        self.pending = None;
        self.state = UpdateState::Done;
        Ok(())
    }

    /// Remove every manifest-tracked path of a package, deepest first.
    ///
    /// Directories are only removed once empty, so content the manifest does
    /// not know about is never touched. When everything went, the local version
    /// marker is dropped too so the next check reinstalls from scratch.
    pub fn delete_installed(
        &mut self,
        package_id: &str,
        sink: &mut dyn ProgressSink,
    ) -> Result<Summary> {
        self.config.package(package_id)?;
        let files = self.manifest.list_deepest_first(package_id)?;
        self.cancel.store(false, Ordering::SeqCst);
        self.state = UpdateState::Deleting;

        let mut reporter = Reporter::new(sink);
        let mut summary = Summary::new(package_id);
        info!("Uninstalling {} tracked path(s) of {package_id}", files.len());

        for (path, _) in files {
            if self.is_cancelled() {
                summary.cancelled = true;
                break;
            }

            let item_id = path.display().to_string();
            reporter.emit(&item_id, ItemKind::Uninstall, Phase::Start, &item_id);
            let (status, phase, message) = match safe_delete(&path, false) {
                Ok(DeleteOutcome::Removed) => {
                    self.forget(package_id, &path);
                    (ItemStatus::Succeeded, Phase::Done, format!("Deleted: {item_id}"))
                }
                Ok(DeleteOutcome::KeptNonEmpty) => {
                    self.forget(package_id, &path);
                    (
                        ItemStatus::Skipped,
                        Phase::Done,
                        format!("{item_id} holds untracked files; left in place"),
                    )
                }
                Err(e) if e.is_not_found() => {
                    self.forget(package_id, &path);
                    (
                        ItemStatus::Skipped,
                        Phase::Done,
                        format!("File not found, removed manifest entry: {item_id}"),
                    )
                }
                Err(e) => (
                    ItemStatus::Failed,
                    Phase::Error,
                    format!("Failed to delete {item_id}: {e}"),
                ),
            };
            reporter.emit(&item_id, ItemKind::Uninstall, phase, &message);
            let mut outcome = ItemOutcome::new(&item_id, ItemKind::Uninstall, status, message);
            outcome.paths.push(path);
            summary.items.push(outcome);
        }

        if !summary.cancelled && !summary.has_failures() {
            let marker = self.config.local_marker_path(package_id);
            match fs::remove_file(&marker) {
                Ok(()) => info!("Removed version marker {}", marker.display()),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Could not remove version marker {}: {e}", marker.display()),
            }
        }

        self.state = UpdateState::Done;
        Ok(summary)
    }

    fn forget(&self, package_id: &str, path: &Path) {
        if let Err(e) = self.manifest.remove(package_id, path) {
            warn!("Could not drop manifest entry {}: {e}", path.display());
        }
    }

    /// Name, folder and both versions of a package. Lookups that fail report `None`.
    pub async fn package_status(&self, package_id: &str) -> Result<PackageStatus> {
        let package = self.config.package(package_id)?;
        let target_folder = self.config.package_dir(package_id)?;

        let local_version = self.local_version(package_id).unwrap_or_else(|e| {
            warn!("Unable to read local version of {package_id}: {e}");
            None
        });

        let remote_version = match self.config.remote_feed_url(package_id) {
            Ok(url) => match self.transport.fetch_text(&url).await {
                Ok(feed) => latest_release(&feed).map(str::to_owned),
                Err(e) => {
                    warn!("Unable to get remote version of {package_id}: {e}");
                    None
                }
            },
            Err(e) => {
                warn!("Unable to build feed URL for {package_id}: {e}");
                None
            }
        };

        Ok(PackageStatus {
            id: package_id.to_owned(),
            name: package.name.clone(),
            folder: package.folder.clone(),
            target_folder,
            local_version,
            remote_version,
        })
    }
}

/// Folder an archive installs as: the relative path without its extension.
fn installed_name(path: &str) -> String {
    Path::new(path).with_extension("").to_string_lossy().into_owned()
}

/// Installed folder for `path`, or the raw file when it was never unpacked.
fn existing_install(dir: &Path, path: &str) -> Option<PathBuf> {
    [installed_name(path), path.to_owned()]
        .iter()
        .filter_map(|candidate| resolve_within(dir, candidate))
        .filter(|candidate| candidate != dir)
        .find(|candidate| fs::symlink_metadata(candidate).is_ok())
}
