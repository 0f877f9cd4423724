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

//! Download/delete plan resolution

use crate::ledger::{ActionKind, Ledger};
use crate::release::ReleaseTag;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Relative paths to fetch and to remove. A path is never in both sets.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncPlan {
    pub to_download: BTreeSet<String>,
    pub to_delete: BTreeSet<String>,
}

impl SyncPlan {
    pub fn is_empty(&self) -> bool {
        self.to_download.is_empty() && self.to_delete.is_empty()
    }

    fn mark_download(&mut self, path: &str) {
        self.to_delete.remove(path);
        self.to_download.insert(path.to_owned());
    }

    fn mark_delete(&mut self, path: &str) {
        self.to_download.remove(path);
        self.to_delete.insert(path.to_owned());
    }
}

/// Replay every release in `(local, remote]` oldest to newest; the last action on a path wins.
pub fn plan(ledger: &Ledger, local: Option<&ReleaseTag>, remote: &ReleaseTag) -> SyncPlan {
    let mut plan = SyncPlan::default();
    if local == Some(remote) {
        return plan;
    }

    let selected: Vec<_> = ledger
        .blocks
        .iter()
        .filter(|block| block.tag <= *remote && local.is_none_or(|local| block.tag > *local))
        .collect();

    tracing::debug!(
        "Replaying {} release(s) between {} and {remote}",
        selected.len(),
        local.map_or_else(|| "nothing".to_owned(), ToString::to_string),
    );

    // Feeds are newest first
    for block in selected.into_iter().rev() {
        for action in &block.actions {
            match action.kind {
                ActionKind::New | ActionKind::Update => plan.mark_download(&action.path),
                ActionKind::Delete => plan.mark_delete(&action.path),
            }
        }
    }

    plan
}
