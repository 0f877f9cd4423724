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

//! LiverySync core - release feed resolution and safe content installation
//!
//! A package's server publishes a newest-first release feed. This crate diffs
//! it against the locally recorded version, downloads and unpacks what changed
//! into the package folder, and tracks every path it creates so an install can
//! be cleanly removed again.

pub mod config;
pub mod error;
pub mod fileops;
pub mod installer;
pub mod ledger;
pub mod manifest;
pub mod orchestrator;
pub mod planner;
pub mod progress;
pub mod release;
pub mod transport;

pub use config::{PackageConfig, SyncConfig};
pub use error::{Result, SyncError};
pub use installer::{ArchiveInstaller, ArchiveLayout, InstallResult, InstallStatus};
pub use ledger::{ActionKind, Ledger};
pub use manifest::Manifest;
pub use orchestrator::{CheckOutcome, PackageStatus, UpdateCheck, UpdateOrchestrator, UpdateState};
pub use planner::SyncPlan;
pub use progress::{ItemKind, ItemOutcome, ItemStatus, Phase, ProgressEvent, ProgressSink, Summary};
pub use release::{ReleaseTag, compare, is_newer, parse_release};
pub use transport::{HttpTransport, Transport};
