//! Asset retrieval: download the request's asset manifest into the workspace.
//!
//! Every entry is fetched concurrently and the stage waits for all of them to
//! settle, even after one has failed, so the error reports every broken URL
//! at once. Files already written by successful downloads are left in place;
//! removing them is the workspace teardown's job.
//!
//! Bodies are streamed to disk chunk by chunk and cut off at
//! `max_asset_bytes`, so no single asset is ever held in memory whole.

use crate::error::DocRelayError;
use crate::request::AssetSpec;
use futures::future::join_all;
use reqwest::Url;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

/// Network transport selected from a URL scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transport {
    Http,
    Https,
}

impl Transport {
    /// `None` for every scheme the fetcher cannot retrieve.
    pub fn for_url(url: &Url) -> Option<Self> {
        match url.scheme() {
            "http" => Some(Transport::Http),
            "https" => Some(Transport::Https),
            _ => None,
        }
    }
}

/// Concurrent downloader for asset manifests.
#[derive(Debug, Clone)]
pub struct AssetFetcher {
    client: reqwest::Client,
    timeout_secs: u64,
    max_bytes: u64,
}

impl AssetFetcher {
    pub fn new(timeout_secs: u64, max_bytes: u64) -> Result<Self, DocRelayError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| DocRelayError::Internal(format!("Failed to build HTTP client: {e}")))?;
        Ok(Self {
            client,
            timeout_secs,
            max_bytes,
        })
    }

    /// Download every asset into `dir`, returning how many were written.
    ///
    /// An empty manifest is a no-op.
    pub async fn fetch_all(&self, assets: &[AssetSpec], dir: &Path) -> Result<usize, DocRelayError> {
        if assets.is_empty() {
            return Ok(0);
        }
        info!("Fetching {} assets", assets.len());

        let results = join_all(assets.iter().map(|asset| self.fetch_one(asset, dir))).await;
        let failures: Vec<String> = results.into_iter().filter_map(Result::err).collect();

        if failures.is_empty() {
            return Ok(assets.len());
        }
        for failure in &failures {
            warn!("Asset fetch failed: {}", failure);
        }
        Err(DocRelayError::AssetFetchFailed {
            failed: failures.len(),
            total: assets.len(),
            details: failures.join("\n"),
        })
    }

    /// Fetch one asset; the error string names the URL and the reason.
    async fn fetch_one(&self, asset: &AssetSpec, dir: &Path) -> Result<(), String> {
        let url = Url::parse(&asset.url).map_err(|e| format!("{}: invalid URL: {e}", asset.url))?;
        let transport = Transport::for_url(&url)
            .ok_or_else(|| format!("{}: unsupported scheme '{}'", asset.url, url.scheme()))?;
        debug!("Fetching {} over {:?}", asset.url, transport);

        let mut response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                format!("{}: timed out after {}s", asset.url, self.timeout_secs)
            } else {
                format!("{}: {e}", asset.url)
            }
        })?;

        if !response.status().is_success() {
            return Err(format!("{}: HTTP {}", asset.url, response.status()));
        }
        if let Some(len) = response.content_length() {
            if len > self.max_bytes {
                return Err(format!(
                    "{}: {} bytes exceeds the {} byte asset limit",
                    asset.url, len, self.max_bytes
                ));
            }
        }

        let path = dir.join(&asset.destination_name);
        // create_new: each destination is written exactly once.
        let mut file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await
            .map_err(|e| format!("{}: cannot create '{}': {e}", asset.url, path.display()))?;

        let mut written: u64 = 0;
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| format!("{}: failed to read body: {e}", asset.url))?
        {
            written += chunk.len() as u64;
            if written > self.max_bytes {
                return Err(format!(
                    "{}: body exceeds the {} byte asset limit",
                    asset.url, self.max_bytes
                ));
            }
            file.write_all(&chunk)
                .await
                .map_err(|e| format!("{}: cannot write '{}': {e}", asset.url, path.display()))?;
        }
        file.flush()
            .await
            .map_err(|e| format!("{}: cannot write '{}': {e}", asset.url, path.display()))?;

        debug!("Saved {} bytes to {}", written, path.display());
        Ok(())
    }
}
