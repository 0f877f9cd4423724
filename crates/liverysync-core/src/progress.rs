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

//! Progress events and per-item outcomes reported by the orchestrator

use serde::Serialize;
use std::path::PathBuf;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    Download,
    Extract,
    Delete,
    Uninstall,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Phase {
    Start,
    Done,
    /// Non-fatal anomaly, e.g. a payload that is not an archive.
    Warning,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressEvent {
    pub item_id: String,
    pub kind: ItemKind,
    pub phase: Phase,
    pub message: String,
}

/// Receives progress events synchronously on the calling task.
pub trait ProgressSink {
    fn emit(&mut self, event: ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: FnMut(ProgressEvent),
{
    fn emit(&mut self, event: ProgressEvent) {
        self(event);
    }
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ProgressSink for NullSink {
    fn emit(&mut self, _event: ProgressEvent) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemStatus {
    Succeeded,
    /// Some archive entries extracted, some failed.
    Partial,
    Failed,
    /// Payload downloaded but not an archive; left in place.
    Kept,
    /// Nothing to do, e.g. delete target already gone.
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ItemOutcome {
    pub item_id: String,
    pub kind: ItemKind,
    pub status: ItemStatus,
    pub message: String,
    /// Paths written or removed for this item.
    pub paths: Vec<PathBuf>,
    /// Archive entries that could not be extracted.
    pub failed_entries: Vec<String>,
}

impl ItemOutcome {
    pub fn new(
        item_id: &str,
        kind: ItemKind,
        status: ItemStatus,
        message: impl Into<String>,
    ) -> Self {
        Self {
            item_id: item_id.to_owned(),
            kind,
            status,
            message: message.into(),
            paths: Vec::new(),
            failed_entries: Vec::new(),
        }
    }
}

/// Result of one apply or uninstall run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Summary {
    pub package_id: String,
    pub items: Vec<ItemOutcome>,
    pub cancelled: bool,
}

impl Summary {
    pub fn new(package_id: &str) -> Self {
        Self {
            package_id: package_id.to_owned(),
            ..Self::default()
        }
    }

    pub fn with_status(&self, status: ItemStatus) -> impl Iterator<Item = &ItemOutcome> {
        self.items.iter().filter(move |item| item.status == status)
    }

    pub fn succeeded(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.with_status(ItemStatus::Succeeded)
    }

    pub fn partial(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.with_status(ItemStatus::Partial)
    }

    pub fn failed(&self) -> impl Iterator<Item = &ItemOutcome> {
        self.with_status(ItemStatus::Failed)
    }

    pub fn has_failures(&self) -> bool {
        self.items
            .iter()
            .any(|item| matches!(item.status, ItemStatus::Failed | ItemStatus::Partial))
    }

    pub fn outcome(&self, item_id: &str, kind: ItemKind) -> Option<&ItemOutcome> {
        self.items
            .iter()
            .find(|item| item.item_id == item_id && item.kind == kind)
    }
}

/// Emits events and mirrors them into the log.
pub(crate) struct Reporter<'a> {
    sink: &'a mut dyn ProgressSink,
}

impl<'a> Reporter<'a> {
    pub(crate) fn new(sink: &'a mut dyn ProgressSink) -> Self {
        Self { sink }
    }

    pub(crate) fn emit(
        &mut self,
        item_id: &str,
        kind: ItemKind,
        phase: Phase,
        message: impl Into<String>,
    ) {
        let message = message.into();
        match phase {
            Phase::Start | Phase::Done => tracing::info!("{kind:?} {item_id}: {message}"),
            Phase::Warning => tracing::warn!("{kind:?} {item_id}: {message}"),
            Phase::Error => tracing::error!("{kind:?} {item_id}: {message}"),
        }
        self.sink.emit(ProgressEvent {
            item_id: item_id.to_owned(),
            kind,
            phase,
            message,
        });
    }
}

impl std::fmt::Debug for Reporter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporter").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_closure_is_a_sink() {
        let mut events = Vec::new();
        {
            let mut sink = |event: ProgressEvent| events.push(event);
            let mut reporter = Reporter::new(&mut sink);
            reporter.emit("a.zip", ItemKind::Download, Phase::Start, "a.zip");
            reporter.emit("a.zip", ItemKind::Download, Phase::Done, "a.zip - Success");
        }
        assert_eq!(events.len(), 2);
        assert_eq!(events[1].phase, Phase::Done);
        assert_eq!(events[1].item_id, "a.zip");
    }

    #[test]
    fn test_summary_buckets() {
        let mut summary = Summary::new("f16");
        let outcomes = [
            ("a.zip", ItemKind::Extract, ItemStatus::Succeeded, "ok"),
            ("b.zip", ItemKind::Extract, ItemStatus::Partial, "2 failed"),
            ("c.zip", ItemKind::Download, ItemStatus::Failed, "404"),
            ("old", ItemKind::Delete, ItemStatus::Skipped, "missing"),
        ];
        for (item_id, kind, status, message) in outcomes {
            summary
                .items
                .push(ItemOutcome::new(item_id, kind, status, message));
        }

        assert_eq!(summary.succeeded().count(), 1);
        assert_eq!(summary.partial().count(), 1);
        assert_eq!(summary.failed().count(), 1);
        assert!(summary.has_failures());
        assert_eq!(
            summary.outcome("old", ItemKind::Delete).unwrap().status,
            ItemStatus::Skipped
        );
    }
}
