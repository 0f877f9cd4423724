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

//! HTTP transport for feeds and payloads

use crate::error::{Result, SyncError};
use crate::fileops::safe_move;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::AsyncWriteExt;

const USER_AGENT: &str = concat!("liverysync/", env!("CARGO_PKG_VERSION"));

#[async_trait]
pub trait Transport: Send + Sync {
    /// GET a line-oriented text payload.
    async fn fetch_text(&self, url: &str) -> Result<String>;

    /// GET an opaque payload into `dest`, returning the byte count.
    async fn download(&self, url: &str, dest: &Path) -> Result<u64>;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(timeout)
            .build()
            .map_err(|e| SyncError::Transport(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self { client })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SyncError::Transport(format!("Request to {url} failed: {e}")))?;

        if !response.status().is_success() {
            return Err(SyncError::Transport(format!(
                "GET {url} failed with status: {}",
                response.status()
            )));
        }

        Ok(response)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        self.get(url)
            .await?
            .text()
            .await
            .map_err(|e| SyncError::Transport(format!("Failed to read response from {url}: {e}")))
    }

    async fn download(&self, url: &str, dest: &Path) -> Result<u64> {
        let mut response = self.get(url).await?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SyncError::fs(parent, e))?;
        }

        let partial = partial_path(dest);
        let mut file = tokio::fs::File::create(&partial)
            .await
            .map_err(|e| SyncError::fs(&partial, e))?;

        let streamed = stream_to_file(&mut response, &mut file, &partial, url).await;
        drop(file);

        let written = match streamed {
            Ok(written) => written,
            Err(e) => {
                let _ = tokio::fs::remove_file(&partial).await;
                return Err(e);
            }
        };

        safe_move(&partial, dest)?;
        Ok(written)
    }
}

async fn stream_to_file(
    response: &mut reqwest::Response,
    file: &mut tokio::fs::File,
    partial: &Path,
    url: &str,
) -> Result<u64> {
    let mut written = 0_u64;
    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| SyncError::Transport(format!("Download of {url} interrupted: {e}")))?
    {
        file.write_all(&chunk)
            .await
            .map_err(|e| SyncError::fs(partial, e))?;
        written += chunk.len() as u64;
    }
    file.flush().await.map_err(|e| SyncError::fs(partial, e))?;
    Ok(written)
}

fn partial_path(dest: &Path) -> PathBuf {
    let mut name = dest.file_name().unwrap_or_default().to_os_string();
    name.push(".part");
    dest.with_file_name(name)
}
