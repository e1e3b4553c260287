// ==============================================================================
// loader.rs - Scoring File Loader
// ==============================================================================
// Description: Resolves a model id to scoring file text from the local cache
//              or the remote harmonized archive, with size and retry guards
// Author: Matt Barham
// Created: 2026-10-14
// Modified: 2026-10-17
// Version: 1.0.0
// ==============================================================================
// Cache layout (probed in order):
//   {cache_dir}/enriched/{id}_hmPOS_{build}_with_AF.tsv
//   {cache_dir}/unpacked/{id}_hmPOS_{build}.txt
//   {cache_dir}/{id}_hmPOS_{build}.txt.gz
// Remote:
//   {base_url}/{id}/ScoringFiles/Harmonized/{id}_hmPOS_{build}.txt.gz
// ==============================================================================

use crate::config::LoaderConfig;
use flate2::read::MultiGzDecoder;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::io::Read;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Errors that can occur while loading a scoring file
#[derive(Error, Debug)]
pub enum LoadError {
    #[error("Invalid model id '{0}' (expected PGS followed by digits)")]
    InvalidModelId(String),

    #[error("Scoring file for {model_id} not found: {detail}")]
    NotFound { model_id: String, detail: String },

    #[error("HTTP client error: {0}")]
    Fetch(#[from] reqwest::Error),

    #[error("Fetching {model_id} timed out after {secs}s")]
    Timeout { model_id: String, secs: u64 },

    #[error("Decompression failed: {0}")]
    DecompressionFailed(String),

    #[error("Decompressed size exceeds {limit} bytes")]
    FileTooLarge { limit: u64 },

    #[error("Scoring file is not valid UTF-8")]
    InvalidUtf8,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Where the text came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Local,
    Remote,
}

/// Whether the text was served from cache or fetched for this call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Freshness {
    Cached,
    Fresh,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Provenance {
    pub origin: Origin,
    pub freshness: Freshness,
    /// Cache path or remote URL
    pub location: String,
    /// SHA-256 of the decompressed text
    pub sha256: String,
}

/// Decompressed scoring file plus its provenance
#[derive(Debug, Clone)]
pub struct LoadedScoringFile {
    pub model_id: String,
    pub text: String,
    pub provenance: Provenance,
}

/// Model ids look like `PGS000001`
pub fn validate_model_id(model_id: &str) -> Result<(), LoadError> {
    let valid = model_id
        .strip_prefix("PGS")
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()));
    if valid {
        Ok(())
    } else {
        Err(LoadError::InvalidModelId(model_id.to_string()))
    }
}

/// Decode gzip or plain bytes to UTF-8 text under a size ceiling
///
/// # Arguments
/// * `bytes` - Raw file contents; gzip is detected by its magic number
/// * `limit` - Maximum decompressed size in bytes
///
/// # Returns
/// * `Err(LoadError::FileTooLarge)` - Decoded text would exceed `limit`
/// * `Err(LoadError::DecompressionFailed)` - Corrupt gzip stream
pub fn decompress(bytes: &[u8], limit: u64) -> Result<String, LoadError> {
    let raw = if bytes.starts_with(&GZIP_MAGIC) {
        let mut out = Vec::new();
        MultiGzDecoder::new(bytes)
            .take(limit.saturating_add(1))
            .read_to_end(&mut out)
            .map_err(|e| LoadError::DecompressionFailed(e.to_string()))?;
        if out.len() as u64 > limit {
            return Err(LoadError::FileTooLarge { limit });
        }
        out
    } else {
        if bytes.len() as u64 > limit {
            return Err(LoadError::FileTooLarge { limit });
        }
        bytes.to_vec()
    };

    String::from_utf8(raw).map_err(|_| LoadError::InvalidUtf8)
}

fn sha256_hex(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Convention-based on-disk cache of scoring files
#[derive(Debug, Clone)]
pub struct ScoringFileCache {
    root: PathBuf,
    build: String,
}

impl ScoringFileCache {
    pub fn new(root: impl Into<PathBuf>, build: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            build: build.into(),
        }
    }

    pub fn enriched_path(&self, model_id: &str) -> PathBuf {
        self.root
            .join("enriched")
            .join(format!("{}_hmPOS_{}_with_AF.tsv", model_id, self.build))
    }

    pub fn unpacked_path(&self, model_id: &str) -> PathBuf {
        self.root
            .join("unpacked")
            .join(format!("{}_hmPOS_{}.txt", model_id, self.build))
    }

    pub fn archive_path(&self, model_id: &str) -> PathBuf {
        self.root.join(format!("{}_hmPOS_{}.txt.gz", model_id, self.build))
    }

    /// First cached copy of a model, decompressed
    pub async fn read(&self, model_id: &str, limit: u64) -> Result<Option<(String, PathBuf)>, LoadError> {
        let candidates = [
            self.enriched_path(model_id),
            self.unpacked_path(model_id),
            self.archive_path(model_id),
        ];

        for path in candidates {
            match tokio::fs::read(&path).await {
                Ok(bytes) => {
                    debug!("Cache hit for {} at {}", model_id, path.display());
                    let text = decompress(&bytes, limit)?;
                    return Ok(Some((text, path)));
                }
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            }
        }

        Ok(None)
    }

    /// Persist a fetched archive and its unpacked text
    pub async fn store(&self, model_id: &str, archive: &[u8], text: &str) -> Result<(), LoadError> {
        write_atomic(&self.archive_path(model_id), archive).await?;
        write_atomic(&self.unpacked_path(model_id), text.as_bytes()).await
    }
}

/// Write to a sibling temp file, then rename over the target
async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<(), LoadError> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    let tmp = path.with_extension(format!("tmp-{}", uuid::Uuid::new_v4()));
    tokio::fs::write(&tmp, bytes).await?;
    if let Err(e) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }
    Ok(())
}

/// Loads scoring files by model id
#[derive(Debug, Clone)]
pub struct ScoringFileLoader {
    config: LoaderConfig,
    cache: ScoringFileCache,
    client: reqwest::Client,
}

impl ScoringFileLoader {
    pub fn new(config: LoaderConfig) -> Result<Self, LoadError> {
        let client = reqwest::Client::builder()
            .timeout(config.fetch_timeout())
            .build()?;
        let cache = ScoringFileCache::new(config.cache_dir.clone(), config.genome_build.clone());
        Ok(Self { config, cache, client })
    }

    pub fn cache(&self) -> &ScoringFileCache {
        &self.cache
    }

    pub fn client(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn remote_url(&self, model_id: &str) -> String {
        format!(
            "{}/{}/ScoringFiles/Harmonized/{}_hmPOS_{}.txt.gz",
            self.config.base_url.trim_end_matches('/'),
            model_id,
            model_id,
            self.config.genome_build
        )
    }

    /// Load a model's scoring file
    ///
    /// # Arguments
    /// * `model_id` - Catalog id (e.g., "PGS000001")
    /// * `refresh` - Bypass the cache and fetch again
    ///
    /// # Returns
    /// * `Ok(LoadedScoringFile)` - Text plus provenance
    /// * `Err(LoadError)` - The model must be skipped
    pub async fn load(&self, model_id: &str, refresh: bool) -> Result<LoadedScoringFile, LoadError> {
        validate_model_id(model_id)?;
        let limit = self.config.max_decompressed_bytes;

        if !refresh {
            if let Some((text, path)) = self.cache.read(model_id, limit).await? {
                return Ok(LoadedScoringFile {
                    model_id: model_id.to_string(),
                    provenance: Provenance {
                        origin: Origin::Local,
                        freshness: Freshness::Cached,
                        location: path.display().to_string(),
                        sha256: sha256_hex(&text),
                    },
                    text,
                });
            }
        }

        if !self.config.use_remote {
            return Err(LoadError::NotFound {
                model_id: model_id.to_string(),
                detail: "not cached and remote fetching is disabled".to_string(),
            });
        }

        let url = self.remote_url(model_id);
        let archive = self.fetch_with_retry(model_id, &url).await?;
        let text = decompress(&archive, limit)?;

        if let Err(e) = self.cache.store(model_id, &archive, &text).await {
            warn!("Could not cache {}: {}", model_id, e);
        }

        info!("Fetched {} ({} bytes compressed)", model_id, archive.len());
        Ok(LoadedScoringFile {
            model_id: model_id.to_string(),
            provenance: Provenance {
                origin: Origin::Remote,
                freshness: Freshness::Fresh,
                location: url,
                sha256: sha256_hex(&text),
            },
            text,
        })
    }

    async fn fetch_with_retry(&self, model_id: &str, url: &str) -> Result<Vec<u8>, LoadError> {
        let attempts = self.config.fetch_retries.max(1);
        let mut last_error = String::new();
        let mut timed_out = false;

        for attempt in 1..=attempts {
            debug!("Fetching {} (attempt {}/{})", url, attempt, attempts);
            match self.client.get(url).send().await {
                Ok(resp) if resp.status() == reqwest::StatusCode::NOT_FOUND => {
                    return Err(LoadError::NotFound {
                        model_id: model_id.to_string(),
                        detail: format!("HTTP 404 for {}", url),
                    });
                }
                Ok(resp) if resp.status().is_success() => match resp.bytes().await {
                    Ok(bytes) => return Ok(bytes.to_vec()),
                    Err(e) => {
                        timed_out = e.is_timeout();
                        last_error = e.to_string();
                    }
                },
                Ok(resp) => {
                    timed_out = false;
                    last_error = format!("HTTP {}", resp.status());
                }
                Err(e) => {
                    timed_out = e.is_timeout();
                    last_error = e.to_string();
                }
            }

            warn!("Fetch attempt {} for {} failed: {}", attempt, model_id, last_error);
            if attempt < attempts {
                tokio::time::sleep(self.config.retry_delay()).await;
            }
        }

        if timed_out {
            Err(LoadError::Timeout {
                model_id: model_id.to_string(),
                secs: self.config.fetch_timeout_secs,
            })
        } else {
            Err(LoadError::NotFound {
                model_id: model_id.to_string(),
                detail: format!("{} after {} attempts", last_error, attempts),
            })
        }
    }
}
