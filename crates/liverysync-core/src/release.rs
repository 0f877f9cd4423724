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

//! Release tag parsing and comparison module

use crate::error::{Result, SyncError};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

const RELEASE_PREFIX: &str = "release-";

/// A `release-<major>[.<minor>[.<patch>]]` checkpoint. Missing components are 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReleaseTag {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
}

impl ReleaseTag {
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }
}

impl fmt::Display for ReleaseTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{RELEASE_PREFIX}{}.{}.{}",
            self.major, self.minor, self.patch
        )
    }
}

impl FromStr for ReleaseTag {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self> {
        parse_release(s)
    }
}

/// Whether a line looks like a release header (before validating its numbers)
pub fn is_release_header(line: &str) -> bool {
    line.trim()
        .get(..RELEASE_PREFIX.len())
        .is_some_and(|head| head.eq_ignore_ascii_case(RELEASE_PREFIX))
}

/// Parse release tags (e.g., "release-5", "Release-5.1", "release-5.1.2")
pub fn parse_release(s: &str) -> Result<ReleaseTag> {
    let trimmed = s.trim();
    if !is_release_header(trimmed) {
        return Err(SyncError::Parse(format!(
            "Invalid release format: {trimmed}, expected release-X[.Y[.Z]]"
        )));
    }

    let version_part = trimmed.get(RELEASE_PREFIX.len()..).unwrap_or_default();
    let parts: Vec<&str> = version_part.split('.').collect();
    if parts.len() > 3 {
        return Err(SyncError::Parse(format!(
            "Invalid release format: {trimmed}, too many components"
        )));
    }

    let mut numbers = [0_u32; 3];
    for (slot, part) in numbers.iter_mut().zip(&parts) {
        if part.is_empty() || !part.bytes().all(|b| b.is_ascii_digit()) {
            return Err(SyncError::Parse(format!(
                "Invalid release component '{part}' in {trimmed}"
            )));
        }
        *slot = part
            .parse::<u32>()
            .map_err(|_| SyncError::Parse(format!("Release component out of range: {part}")))?;
    }

    Ok(ReleaseTag::new(numbers[0], numbers[1], numbers[2]))
}

/// Total ordering over release tags
pub fn compare(a: &ReleaseTag, b: &ReleaseTag) -> Ordering {
    a.cmp(b)
}

/// Returns true if `remote` is newer than `local`; a missing local version is always older
pub fn is_newer(local: Option<&str>, remote: &str) -> Result<bool> {
    let remote = parse_release(remote)?;
    match local {
        None => Ok(true),
        Some(local) => Ok(remote > parse_release(local)?),
    }
}

/// First release header of a feed or version marker (feeds list newest first)
pub fn latest_release(text: &str) -> Option<&str> {
    text.lines()
        .map(str::trim)
        .find(|line| is_release_header(line))
}
