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

//! Configuration module

use crate::error::{Result, SyncError};
use crate::fileops::absolute_path;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

fn default_version_filename() -> String {
    "version.txt".to_owned()
}

fn default_server_version_file() -> String {
    "server_version.txt".to_owned()
}

fn default_manifest_file() -> String {
    "manifest.db".to_owned()
}

fn default_reserved_folder_names() -> Vec<String> {
    vec!["__MACOSX".to_owned()]
}

fn default_60() -> u64 {
    60
}

/// One content unit with its own destination folder and remote feed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PackageConfig {
    /// Display name
    #[serde(default)]
    pub name: String,

    /// Destination folder, relative to `content_root`
    pub folder: String,

    /// Subfolder under `server_url`, or an absolute http(s) URL
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_subfolder: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SyncConfig {
    /// Root URL of the update server
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_url: Option<String>,

    /// Suffix of the per-package version file, local and remote
    #[serde(default = "default_version_filename")]
    pub version_filename: String,

    /// Name of the temporary copy of the fetched feed
    #[serde(default = "default_server_version_file")]
    pub server_version_file: String,

    /// Folder under which every package folder lives
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_root: Option<PathBuf>,

    /// Where version markers, the feed copy and the manifest are kept
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,

    #[serde(default = "default_manifest_file")]
    pub manifest_file: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_package: Option<String>,

    #[serde(default)]
    pub packages: BTreeMap<String, PackageConfig>,

    /// Top-level archive folders that never count as a package root
    #[serde(default = "default_reserved_folder_names")]
    pub reserved_folder_names: Vec<String>,

    /// HTTP request timeout (seconds)
    #[serde(default = "default_60")]
    pub request_timeout_secs: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            version_filename: default_version_filename(),
            server_version_file: default_server_version_file(),
            content_root: None,
            data_dir: None,
            manifest_file: default_manifest_file(),
            default_package: None,
            packages: BTreeMap::new(),
            reserved_folder_names: default_reserved_folder_names(),
            request_timeout_secs: 60,
        }
    }
}

impl SyncConfig {
    /// Load from `path`, writing a default file first if none exists.
    ///
    /// A relative or missing `data_dir` and a relative `content_root` are
    /// anchored at the config file's directory, so both end up absolute.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path).map_err(|e| SyncError::fs(path, e))?;
            serde_json::from_str(&content)
                .map_err(|e| SyncError::Config(format!("Failed to parse config: {e}")))?
        } else {
            tracing::info!("No config at {}, writing defaults", path.display());
            let config = Self::default();
            config.save(path)?;
            config
        };

        let parent = path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));
        let base = absolute_path(parent)?;
        config.data_dir = Some(match config.data_dir.take() {
            Some(dir) => anchor(&base, dir),
            None => base.clone(),
        });
        config.content_root = config.content_root.take().map(|dir| anchor(&base, dir));
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let temp_path = path.with_extension("tmp");
        let content = serde_json::to_string_pretty(self)?;

        // Atomic write
        std::fs::write(&temp_path, content).map_err(|e| SyncError::fs(&temp_path, e))?;
        std::fs::rename(&temp_path, path).map_err(|e| SyncError::fs(path, e))?;

        Ok(())
    }

    /// Fails when a field needed to run an update is missing.
    pub fn validate(&self) -> Result<()> {
        if self.server_url.as_deref().is_none_or(|url| url.trim().is_empty()) {
            return Err(SyncError::Config("server_url missing in config".to_owned()));
        }
        if self.content_root.is_none() {
            return Err(SyncError::Config(
                "content_root missing; set the local content folder".to_owned(),
            ));
        }
        if self.packages.is_empty() {
            return Err(SyncError::Config("no packages configured".to_owned()));
        }
        if let Some(default) = &self.default_package
            && !self.packages.contains_key(default)
        {
            return Err(SyncError::Config(format!(
                "default_package '{default}' is not a configured package"
            )));
        }
        Ok(())
    }

    /// Explicit id, else `default_package`, else the first configured package.
    pub fn resolve_package<'a>(&'a self, requested: Option<&'a str>) -> Result<&'a str> {
        let id = requested
            .or(self.default_package.as_deref())
            .or_else(|| self.packages.keys().next().map(String::as_str))
            .ok_or_else(|| SyncError::Config("no packages configured".to_owned()))?;

        if self.packages.contains_key(id) {
            Ok(id)
        } else {
            Err(SyncError::UnknownPackage(id.to_owned()))
        }
    }

    pub fn package(&self, id: &str) -> Result<&PackageConfig> {
        self.packages
            .get(id)
            .ok_or_else(|| SyncError::UnknownPackage(id.to_owned()))
    }

    fn server_url(&self) -> Result<&str> {
        self.server_url
            .as_deref()
            .map(|url| url.trim_end_matches('/'))
            .ok_or_else(|| SyncError::Config("server_url missing in config".to_owned()))
    }

    fn data_dir(&self) -> &Path {
        self.data_dir.as_deref().unwrap_or_else(|| Path::new("."))
    }

    /// URL under which a package's feed and payloads live, always ending in `/`.
    pub fn package_base_url(&self, id: &str) -> Result<String> {
        let package = self.package(id)?;
        match package.remote_subfolder.as_deref() {
            Some(sub) if sub.starts_with("http://") || sub.starts_with("https://") => {
                Ok(format!("{}/", sub.trim_end_matches('/')))
            }
            Some(sub) if !sub.trim_matches('/').is_empty() => {
                Ok(format!("{}/{}/", self.server_url()?, sub.trim_matches('/')))
            }
            _ => Ok(format!("{}/", self.server_url()?)),
        }
    }

    pub fn remote_feed_url(&self, id: &str) -> Result<String> {
        Ok(format!(
            "{}{id}_{}",
            self.package_base_url(id)?,
            self.version_filename
        ))
    }

    /// Local version marker for a package.
    pub fn local_marker_path(&self, id: &str) -> PathBuf {
        self.data_dir()
            .join(format!("{id}_{}", self.version_filename))
    }

    /// Temporary copy of the fetched feed, promoted to the marker on cleanup.
    pub fn feed_snapshot_path(&self) -> PathBuf {
        self.data_dir().join(&self.server_version_file)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.data_dir().join(&self.manifest_file)
    }

    /// Folder a package installs into.
    pub fn package_dir(&self, id: &str) -> Result<PathBuf> {
        let root = self.content_root.as_deref().ok_or_else(|| {
            SyncError::Config("content_root missing; set the local content folder".to_owned())
        })?;
        Ok(root.join(&self.package(id)?.folder))
    }
}

fn anchor(base: &Path, dir: PathBuf) -> PathBuf {
    if dir.is_absolute() {
        dir
    } else {
        base.join(dir)
    }
}
