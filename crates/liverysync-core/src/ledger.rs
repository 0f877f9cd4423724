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

//! Feed parsing into ordered release blocks

use crate::error::{Result, SyncError};
use crate::release::{ReleaseTag, is_release_header, parse_release};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    New,
    Update,
    Delete,
}

impl ActionKind {
    fn parse(kind: &str) -> Option<Self> {
        match kind.trim().to_ascii_lowercase().as_str() {
            "new" => Some(Self::New),
            "update" => Some(Self::Update),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub kind: ActionKind,
    /// Path relative to the package folder / package base URL.
    pub path: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReleaseBlock {
    /// Header exactly as written in the feed.
    pub raw_tag: String,
    pub tag: ReleaseTag,
    pub actions: Vec<Action>,
}

/// Release blocks in feed order (newest first by convention).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Ledger {
    pub blocks: Vec<ReleaseBlock>,
}

impl Ledger {
    /// Parse a feed. A malformed release header fails the whole parse.
    ///
    /// Lines before the first header, blank lines, lines without `;` and
    /// unknown action kinds are ignored. A header repeated verbatim appends to
    /// the block it first opened.
    pub fn parse(feed: &str) -> Result<Self> {
        let mut blocks: Vec<ReleaseBlock> = Vec::new();
        let mut current: Option<usize> = None;

        for (index, line) in feed.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if is_release_header(line) {
                let tag = parse_release(line).map_err(|e| {
                    SyncError::Parse(format!("line {}: {e}", index + 1))
                })?;
                let existing = blocks.iter().position(|b| b.raw_tag == line);
                current = Some(existing.unwrap_or_else(|| {
                    blocks.push(ReleaseBlock {
                        raw_tag: line.to_owned(),
                        tag,
                        actions: Vec::new(),
                    });
                    blocks.len() - 1
                }));
                tracing::debug!("Found {line}");
                continue;
            }

            let Some(block) = current else {
                continue;
            };
            let Some((kind, path)) = line.split_once(';') else {
                continue;
            };
            let path = path.split(';').next().unwrap_or_default().trim();
            match ActionKind::parse(kind) {
                Some(kind) if !path.is_empty() => blocks[block].actions.push(Action {
                    kind,
                    path: path.to_owned(),
                }),
                _ => tracing::debug!("Ignoring feed line {}: {line}", index + 1),
            }
        }

        Ok(Self { blocks })
    }

    /// Newest release in the feed, i.e. the first header.
    pub fn latest(&self) -> Option<&ReleaseBlock> {
        self.blocks.first()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }
}
