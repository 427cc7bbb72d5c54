//! Cache-through, versioned model artifact storage
//!
//! Serves model weights from a local cache directory when present, otherwise
//! downloads them from a remote object store under the key scheme
//! `models/<base_name>/<version>/<name>`. Remote failures and timeouts fall
//! back to any existing local file; a missing model is a `None` result, not
//! an error, so callers can degrade to mock inference.

pub mod backend;

use crate::config::{StorageConfig, StorageMode};
use crate::error::StorageError;
use backend::{HttpObjectStore, ObjectStoreBackend};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::AsyncWriteExt;

/// Reserved pseudo-versions excluded from version listings
const RESERVED_VERSIONS: [&str; 2] = ["latest", "metadata.json"];

/// Advisory sidecar metadata stored at `models/<base_name>/metadata.json`.
///
/// Never required for artifact retrieval to succeed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelMetadata {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model_name: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub uploaded_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,

    /// Reported model accuracy, advisory only
    #[serde(skip_serializing_if = "Option::is_none")]
    pub accuracy: Option<f64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_size_mb: Option<f64>,

    /// Extra advisory fields preserved verbatim
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// A locally cached artifact. One entry per model name; the artifact file is
/// overwritten on re-fetch, so the entry always points at the newest copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheEntry {
    pub model_name: String,
    pub local_path: PathBuf,
    /// Version that was on disk when the entry was recorded. Lookups with
    /// `force_download = false` trust this without a freshness check.
    pub version_on_disk: String,
}

/// Outcome of a single upload step
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "status", content = "error")]
pub enum StepStatus {
    Ok,
    Skipped,
    Failed(String),
}

impl StepStatus {
    pub fn is_ok(&self) -> bool {
        matches!(self, StepStatus::Ok)
    }
}

/// Per-step report for a model upload.
///
/// Uploads are not transactional: the artifact, metadata sidecar, and
/// `latest` alias can each fail independently, and partial completion is an
/// observable outcome callers must tolerate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadReport {
    pub artifact: StepStatus,
    pub metadata: StepStatus,
    pub latest_alias: StepStatus,
}

impl UploadReport {
    /// True when every attempted step succeeded
    pub fn complete(&self) -> bool {
        self.artifact.is_ok()
            && !matches!(self.metadata, StepStatus::Failed(_))
            && !matches!(self.latest_alias, StepStatus::Failed(_))
    }
}

/// Cache-through model artifact storage
pub struct ModelStorage {
    mode: StorageMode,
    cache_dir: PathBuf,
    backend: Option<Arc<dyn ObjectStoreBackend>>,
    entries: DashMap<String, CacheEntry>,
    request_timeout: Duration,
}

impl ModelStorage {
    /// Build storage from configuration.
    ///
    /// Remote mode without complete credentials silently downgrades to
    /// local-only operation; this is logged, not fatal.
    pub fn new(config: &StorageConfig) -> Result<Self, StorageError> {
        let backend: Option<Arc<dyn ObjectStoreBackend>> = match config.storage_mode {
            StorageMode::Remote if config.has_remote_credentials() => {
                let store = HttpObjectStore::new(
                    config.endpoint.clone().unwrap_or_default(),
                    config.bucket.clone(),
                    config.access_key.clone().unwrap_or_default(),
                    config.secret_key.clone().unwrap_or_default(),
                )?;
                Some(Arc::new(store))
            }
            StorageMode::Remote => {
                tracing::warn!(
                    "Remote storage requested but credentials incomplete, falling back to local"
                );
                None
            }
            StorageMode::Local => None,
        };

        Self::with_backend(config, backend)
    }

    /// Build storage with an explicit backend (dependency injection for
    /// tests and alternative gateways)
    pub fn with_backend(
        config: &StorageConfig,
        backend: Option<Arc<dyn ObjectStoreBackend>>,
    ) -> Result<Self, StorageError> {
        std::fs::create_dir_all(&config.cache_dir)?;

        let mode = if backend.is_some() {
            StorageMode::Remote
        } else {
            StorageMode::Local
        };

        tracing::info!(
            mode = %mode,
            cache_dir = ?config.cache_dir,
            backend = backend.as_deref().map(|b| b.tag()),
            "Model storage initialized"
        );

        Ok(Self {
            mode,
            cache_dir: config.cache_dir.clone(),
            backend,
            entries: DashMap::new(),
            request_timeout: Duration::from_secs(config.request_timeout_secs),
        })
    }

    /// Effective storage mode after any credential downgrade
    pub fn mode(&self) -> StorageMode {
        self.mode
    }

    /// Local cache path for a model name
    pub fn cache_path(&self, model_name: &str) -> PathBuf {
        self.cache_dir.join(model_name)
    }

    /// Recorded cache entry for a model, if one exists
    pub fn cache_entry(&self, model_name: &str) -> Option<CacheEntry> {
        self.entries.get(model_name).map(|e| e.clone())
    }

    /// Resolve a model to a local file path, downloading if needed.
    ///
    /// Cache hits are returned without any freshness check unless
    /// `force_download` is set; staleness is the caller's responsibility.
    /// Returns `None` when the model cannot be found anywhere.
    pub async fn get_model(
        &self,
        model_name: &str,
        version: Option<&str>,
        force_download: bool,
    ) -> Option<PathBuf> {
        let version = version.unwrap_or("latest");
        let local_path = self.cache_path(model_name);

        if !force_download && local_path.exists() {
            tracing::info!(model = %model_name, path = ?local_path, "Using cached model");
            self.record_entry(model_name, &local_path, version);
            return Some(local_path);
        }

        if let Some(backend) = &self.backend {
            match self.download(backend.as_ref(), model_name, version, &local_path).await {
                Ok(()) => {
                    self.record_entry(model_name, &local_path, version);
                    return Some(local_path);
                }
                Err(e) => {
                    tracing::warn!(
                        model = %model_name,
                        version = %version,
                        error = %e,
                        "Remote fetch failed, trying local fallback"
                    );
                }
            }
        }

        // Local fallback: any existing file with the same name
        if local_path.exists() {
            self.record_entry(model_name, &local_path, version);
            return Some(local_path);
        }

        tracing::warn!(model = %model_name, "Model not found");
        None
    }

    async fn download(
        &self,
        backend: &dyn ObjectStoreBackend,
        model_name: &str,
        version: &str,
        local_path: &Path,
    ) -> Result<(), StorageError> {
        let key = artifact_key(model_name, version);

        tracing::info!(model = %model_name, version = %version, key = %key, "Downloading model");

        let body = self
            .with_timeout(backend.get_object(&key))
            .await?;

        // Write to a temp file first so a failed download never clobbers an
        // existing cached artifact
        let temp_path = local_path.with_extension("tmp");
        let mut file = tokio::fs::File::create(&temp_path).await?;
        file.write_all(&body).await?;
        file.sync_all().await?;
        drop(file);

        tokio::fs::rename(&temp_path, local_path).await?;

        tracing::info!(model = %model_name, path = ?local_path, bytes = body.len(), "Model downloaded");
        Ok(())
    }

    /// Fetch the advisory metadata sidecar for a model.
    ///
    /// Returns `None` when the backend is not configured or the sidecar is
    /// unavailable; metadata is never required for `get_model` to succeed.
    pub async fn get_model_metadata(&self, model_name: &str) -> Option<ModelMetadata> {
        let backend = self.backend.as_ref()?;
        let key = metadata_key(model_name);

        match self.with_timeout(backend.get_object(&key)).await {
            Ok(body) => match serde_json::from_slice(&body) {
                Ok(metadata) => Some(metadata),
                Err(e) => {
                    tracing::warn!(model = %model_name, error = %e, "Malformed model metadata");
                    None
                }
            },
            Err(e) => {
                tracing::warn!(model = %model_name, error = %e, "Could not fetch model metadata");
                None
            }
        }
    }

    /// Upload a model artifact with optional metadata.
    ///
    /// Three best-effort steps: artifact, metadata sidecar, `latest` alias.
    /// Each step's failure is reported independently in the returned
    /// [`UploadReport`]; this sequence is deliberately not transactional.
    pub async fn upload_model(
        &self,
        local_path: &Path,
        model_name: &str,
        version: &str,
        metadata: Option<ModelMetadata>,
    ) -> Result<UploadReport, StorageError> {
        let backend = self
            .backend
            .as_ref()
            .ok_or_else(|| StorageError::Unavailable("remote backend not configured".into()))?;

        let filename = local_path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| {
                StorageError::Unavailable(format!("invalid artifact path: {:?}", local_path))
            })?
            .to_string();

        let body = tokio::fs::read(local_path).await?;

        // Step 1: artifact
        let artifact_key = format!("models/{}/{}/{}", model_name, version, filename);
        tracing::info!(model = %model_name, version = %version, key = %artifact_key, "Uploading model");

        let artifact = match self
            .with_timeout(backend.put_object(&artifact_key, body.clone(), "application/octet-stream"))
            .await
        {
            Ok(()) => StepStatus::Ok,
            Err(e) => {
                tracing::error!(model = %model_name, error = %e, "Artifact upload failed");
                StepStatus::Failed(e.to_string())
            }
        };

        // Step 2: metadata sidecar, augmented with checksum/size/timestamp
        let metadata_status = match metadata {
            Some(mut meta) if artifact.is_ok() => {
                meta.model_name.get_or_insert_with(|| model_name.to_string());
                meta.version = Some(version.to_string());
                meta.uploaded_at = Some(Utc::now());
                meta.sha256 = Some(sha256_hex(&body));
                meta.file_size_mb = Some(body.len() as f64 / (1024.0 * 1024.0));

                let result = serde_json::to_vec_pretty(&meta)
                    .map_err(StorageError::from);
                let put = match result {
                    Ok(json) => {
                        self.with_timeout(backend.put_object(
                            &metadata_key(model_name),
                            json,
                            "application/json",
                        ))
                        .await
                    }
                    Err(e) => Err(e),
                };

                match put {
                    Ok(()) => StepStatus::Ok,
                    Err(e) => {
                        tracing::error!(model = %model_name, error = %e, "Metadata upload failed");
                        StepStatus::Failed(e.to_string())
                    }
                }
            }
            Some(_) => StepStatus::Skipped,
            None => StepStatus::Skipped,
        };

        // Step 3: copy to the `latest` alias, independent of metadata outcome
        let latest_alias = if artifact.is_ok() {
            let latest_key = format!("models/{}/latest/{}", model_name, filename);
            match self
                .with_timeout(backend.copy_object(&artifact_key, &latest_key))
                .await
            {
                Ok(()) => StepStatus::Ok,
                Err(e) => {
                    tracing::error!(model = %model_name, error = %e, "Latest alias update failed");
                    StepStatus::Failed(e.to_string())
                }
            }
        } else {
            StepStatus::Skipped
        };

        let report = UploadReport {
            artifact,
            metadata: metadata_status,
            latest_alias,
        };

        tracing::info!(
            model = %model_name,
            version = %version,
            complete = report.complete(),
            "Upload finished"
        );

        Ok(report)
    }

    /// List stored versions of a model, newest-first by lexicographic order.
    ///
    /// Lexicographic descending sort is only numerically correct for
    /// single-digit `vMAJOR.MINOR.PATCH` components; callers needing strict
    /// semantic ordering must pad their version strings.
    pub async fn list_model_versions(&self, model_name: &str) -> Vec<String> {
        let Some(backend) = self.backend.as_ref() else {
            return Vec::new();
        };

        let prefix = format!("models/{}/", model_name);
        let prefixes = match self.with_timeout(backend.list_prefixes(&prefix)).await {
            Ok(prefixes) => prefixes,
            Err(e) => {
                tracing::error!(model = %model_name, error = %e, "Failed to list versions");
                return Vec::new();
            }
        };

        let mut versions: Vec<String> = prefixes
            .iter()
            .filter_map(|p| p.trim_end_matches('/').rsplit('/').next())
            .filter(|v| !RESERVED_VERSIONS.contains(v))
            .map(str::to_string)
            .collect();

        versions.sort_by(|a, b| b.cmp(a));
        versions
    }

    /// Remove all cached artifacts and forget cache entries.
    ///
    /// Together with `get_model` downloads this is the only writer to the
    /// cache directory.
    pub async fn clear_cache(&self) -> Result<(), StorageError> {
        let mut dir = tokio::fs::read_dir(&self.cache_dir).await?;
        while let Some(entry) = dir.next_entry().await? {
            if entry.file_type().await?.is_file() {
                tokio::fs::remove_file(entry.path()).await?;
            }
        }
        self.entries.clear();
        tracing::info!(cache_dir = ?self.cache_dir, "Model cache cleared");
        Ok(())
    }

    fn record_entry(&self, model_name: &str, local_path: &Path, version: &str) {
        self.entries.insert(
            model_name.to_string(),
            CacheEntry {
                model_name: model_name.to_string(),
                local_path: local_path.to_path_buf(),
                version_on_disk: version.to_string(),
            },
        );
    }

    async fn with_timeout<T>(
        &self,
        fut: impl std::future::Future<Output = Result<T, StorageError>>,
    ) -> Result<T, StorageError> {
        match tokio::time::timeout(self.request_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(StorageError::Timeout(self.request_timeout)),
        }
    }
}

/// Base name of an artifact: everything before the first `.`
/// (`yolov8m.pt` -> `yolov8m`)
fn base_name(model_name: &str) -> &str {
    model_name.split('.').next().unwrap_or(model_name)
}

/// Download key for a model artifact: `models/<base_name>/<version>/<name>`
fn artifact_key(model_name: &str, version: &str) -> String {
    format!("models/{}/{}/{}", base_name(model_name), version, model_name)
}

/// Sidecar key: `models/<base_name>/metadata.json`
fn metadata_key(model_name: &str) -> String {
    format!("models/{}/metadata.json", base_name(model_name))
}

fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}
