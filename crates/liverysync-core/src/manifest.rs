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

//! Installed-file manifest backed by SQLite
//!
//! One row per `(package_id, file_path)`. Every mutation runs in its own
//! immediate transaction so overlapping sessions on the same database file
//! serialize on the write lock instead of interleaving.

use crate::error::{Result, SyncError};
use crate::fileops::path_depth;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, OptionalExtension, TransactionBehavior, params};
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CHECKSUM_CHUNK_SIZE: usize = 1024 * 1024;
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ManifestEntry {
    pub package_id: String,
    pub path: PathBuf,
    pub added_at: DateTime<Utc>,
    pub checksum: Option<String>,
}

#[derive(Debug)]
pub struct Manifest {
    conn: Mutex<Connection>,
}

impl Manifest {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| SyncError::fs(parent, e))?;
        }

        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.busy_timeout(BUSY_TIMEOUT)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS files (
                package_id  TEXT NOT NULL,
                file_path   TEXT NOT NULL,
                added_at    TEXT NOT NULL,
                checksum    TEXT DEFAULT NULL,
                PRIMARY KEY (package_id, file_path)
            );",
        )?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Insert or replace the row for `(package_id, path)` with a fresh timestamp.
    pub fn upsert(&self, package_id: &str, path: &Path, checksum: Option<&str>) -> Result<()> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO files (package_id, file_path, added_at, checksum)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(package_id, file_path) DO UPDATE SET
                added_at = excluded.added_at,
                checksum = excluded.checksum",
            params![package_id, path_key(path), Utc::now(), checksum],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Returns whether a row was removed.
    pub fn remove(&self, package_id: &str, path: &Path) -> Result<bool> {
        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let removed = tx.execute(
            "DELETE FROM files WHERE package_id = ?1 AND file_path = ?2",
            params![package_id, path_key(path)],
        )?;
        tx.commit()?;
        Ok(removed > 0)
    }

    /// Drop `root` and every tracked path below it. Returns the number of rows removed.
    pub fn remove_tree(&self, package_id: &str, root: &Path) -> Result<usize> {
        let doomed: Vec<PathBuf> = self
            .entries(package_id)?
            .into_iter()
            .map(|entry| entry.path)
            .filter(|path| path.starts_with(root))
            .collect();

        let mut conn = self.conn.lock();
        let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        let mut removed = 0;
        for path in &doomed {
            removed += tx.execute(
                "DELETE FROM files WHERE package_id = ?1 AND file_path = ?2",
                params![package_id, path_key(path)],
            )?;
        }
        tx.commit()?;
        Ok(removed)
    }

    /// Tracked paths with their insertion time, in storage order.
    pub fn list(&self, package_id: &str) -> Result<Vec<(PathBuf, DateTime<Utc>)>> {
        Ok(self
            .entries(package_id)?
            .into_iter()
            .map(|entry| (entry.path, entry.added_at))
            .collect())
    }

    /// Tracked paths ordered so children always come before their parents.
    pub fn list_deepest_first(&self, package_id: &str) -> Result<Vec<(PathBuf, DateTime<Utc>)>> {
        let mut files = self.list(package_id)?;
        files.sort_by(|(a, _), (b, _)| path_depth(b).cmp(&path_depth(a)).then_with(|| b.cmp(a)));
        Ok(files)
    }

    pub fn entries(&self, package_id: &str) -> Result<Vec<ManifestEntry>> {
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT file_path, added_at, checksum FROM files
             WHERE package_id = ?1
             ORDER BY file_path ASC",
        )?;

        let entries = stmt
            .query_map([package_id], |row| {
                Ok(ManifestEntry {
                    package_id: package_id.to_owned(),
                    path: PathBuf::from(row.get::<_, String>(0)?),
                    added_at: row.get(1)?,
                    checksum: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;

        Ok(entries)
    }

    pub fn get(&self, package_id: &str, path: &Path) -> Result<Option<ManifestEntry>> {
        let conn = self.conn.lock();
        let entry = conn
            .query_row(
                "SELECT added_at, checksum FROM files WHERE package_id = ?1 AND file_path = ?2",
                params![package_id, path_key(path)],
                |row| {
                    Ok(ManifestEntry {
                        package_id: package_id.to_owned(),
                        path: path.to_path_buf(),
                        added_at: row.get(0)?,
                        checksum: row.get(1)?,
                    })
                },
            )
            .optional()?;
        Ok(entry)
    }
}

fn path_key(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

/// SHA-256 of a file, streamed in 1 MiB chunks. Bookkeeping only.
pub fn compute_checksum(path: &Path) -> Result<String> {
    let mut file = std::fs::File::open(path).map_err(|e| SyncError::fs(path, e))?;
    let mut hasher = Sha256::new();
    let mut buffer = vec![0_u8; CHECKSUM_CHUNK_SIZE];

    loop {
        let read = file.read(&mut buffer).map_err(|e| SyncError::fs(path, e))?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }

    Ok(format!("{:x}", hasher.finalize()))
}
