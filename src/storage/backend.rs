//! Object-store backends
//!
//! The storage layer talks to the remote store through the
//! [`ObjectStoreBackend`] trait so tests can substitute an in-memory store
//! and deployments can point at any S3-compatible blob gateway.

use crate::error::StorageError;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;

/// Key/value blob operations against a versioned object store.
///
/// Keys follow the scheme `models/<name>/<version>/<file>`,
/// `models/<name>/metadata.json` and `models/<name>/latest/<file>`.
#[async_trait]
pub trait ObjectStoreBackend: Send + Sync {
    /// Short backend identifier for logs
    fn tag(&self) -> &str;

    /// Fetch an object's bytes
    async fn get_object(&self, key: &str) -> Result<Vec<u8>, StorageError>;

    /// Store an object
    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError>;

    /// Copy an object to a new key
    async fn copy_object(&self, from: &str, to: &str) -> Result<(), StorageError>;

    /// List immediate key-prefix groups under `prefix` using `/` as the
    /// delimiter. Returned prefixes include the trailing `/`.
    async fn list_prefixes(&self, prefix: &str) -> Result<Vec<String>, StorageError>;

    /// Existence check
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;
}

// ============================================================================
// HTTP gateway implementation
// ============================================================================

/// Remote backend speaking to an S3-compatible blob gateway over HTTP.
///
/// Objects live at `{endpoint}/{bucket}/{key}`; prefix listing is served at
/// `{endpoint}/{bucket}?prefix=...&delimiter=/` as a JSON body with a
/// `common_prefixes` array. Credentials are passed as HTTP basic auth.
pub struct HttpObjectStore {
    client: reqwest::Client,
    endpoint: String,
    bucket: String,
    access_key: String,
    secret_key: String,
}

#[derive(Deserialize)]
struct ListResponse {
    #[serde(default)]
    common_prefixes: Vec<String>,
}

impl HttpObjectStore {
    pub fn new(
        endpoint: String,
        bucket: String,
        access_key: String,
        secret_key: String,
    ) -> Result<Self, StorageError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("atlas-models/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            bucket,
            access_key,
            secret_key,
        })
    }

    fn object_url(&self, key: &str) -> String {
        format!("{}/{}/{}", self.endpoint, self.bucket, key)
    }
}

#[async_trait]
impl ObjectStoreBackend for HttpObjectStore {
    fn tag(&self) -> &str {
        "http"
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        let response = self
            .client
            .get(self.object_url(key))
            .basic_auth(&self.access_key, Some(&self.secret_key))
            .send()
            .await?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Err(StorageError::NotFound(key.to_string()));
        }
        if !response.status().is_success() {
            return Err(StorageError::Unavailable(format!(
                "GET {} returned {}",
                key,
                response.status()
            )));
        }

        Ok(response.bytes().await?.to_vec())
    }

    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), StorageError> {
        let response = self
            .client
            .put(self.object_url(key))
            .basic_auth(&self.access_key, Some(&self.secret_key))
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StorageError::Unavailable(format!(
                "PUT {} returned {}",
                key,
                response.status()
            )));
        }

        Ok(())
    }

    async fn copy_object(&self, from: &str, to: &str) -> Result<(), StorageError> {
        // Gateway-agnostic copy: read back and re-put. Server-side copy is a
        // bandwidth optimization the listing gateway does not guarantee.
        let body = self.get_object(from).await?;
        self.put_object(to, body, "application/octet-stream").await
    }

    async fn list_prefixes(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let response = self
            .client
            .get(format!("{}/{}", self.endpoint, self.bucket))
            .basic_auth(&self.access_key, Some(&self.secret_key))
            .query(&[("prefix", prefix), ("delimiter", "/")])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(StorageError::Unavailable(format!(
                "LIST {} returned {}",
                prefix,
                response.status()
            )));
        }

        let list: ListResponse = response.json().await?;
        Ok(list.common_prefixes)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let response = self
            .client
            .head(self.object_url(key))
            .basic_auth(&self.access_key, Some(&self.secret_key))
            .send()
            .await?;

        Ok(response.status().is_success())
    }
}

// ============================================================================
// In-memory implementation
// ============================================================================

/// In-memory object store used by tests and local experiments
#[derive(Default)]
pub struct MemoryObjectStore {
    objects: DashMap<String, Vec<u8>>,
}

impl MemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[async_trait]
impl ObjectStoreBackend for MemoryObjectStore {
    fn tag(&self) -> &str {
        "memory"
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>, StorageError> {
        self.objects
            .get(key)
            .map(|v| v.clone())
            .ok_or_else(|| StorageError::NotFound(key.to_string()))
    }

    async fn put_object(
        &self,
        key: &str,
        body: Vec<u8>,
        _content_type: &str,
    ) -> Result<(), StorageError> {
        self.objects.insert(key.to_string(), body);
        Ok(())
    }

    async fn copy_object(&self, from: &str, to: &str) -> Result<(), StorageError> {
        let body = self.get_object(from).await?;
        self.objects.insert(to.to_string(), body);
        Ok(())
    }

    async fn list_prefixes(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
        let mut prefixes: Vec<String> = self
            .objects
            .iter()
            .filter_map(|entry| {
                let key = entry.key();
                let rest = key.strip_prefix(prefix)?;
                let group = rest.split('/').next()?;
                if rest.contains('/') {
                    Some(format!("{}{}/", prefix, group))
                } else {
                    // Plain object directly under the prefix, not a group
                    None
                }
            })
            .collect();

        prefixes.sort();
        prefixes.dedup();
        Ok(prefixes)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        Ok(self.objects.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_store_round_trip() {
        let store = MemoryObjectStore::new();
        store
            .put_object("models/a/v1/a.pt", b"weights".to_vec(), "application/octet-stream")
            .await
            .unwrap();

        let body = store.get_object("models/a/v1/a.pt").await.unwrap();
        assert_eq!(body, b"weights");
        assert!(store.exists("models/a/v1/a.pt").await.unwrap());
        assert!(!store.exists("models/a/v2/a.pt").await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_store_missing_object() {
        let store = MemoryObjectStore::new();
        let err = store.get_object("models/missing").await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_memory_store_copy() {
        let store = MemoryObjectStore::new();
        store
            .put_object("models/a/v1/a.pt", b"weights".to_vec(), "application/octet-stream")
            .await
            .unwrap();

        store
            .copy_object("models/a/v1/a.pt", "models/a/latest/a.pt")
            .await
            .unwrap();

        let body = store.get_object("models/a/latest/a.pt").await.unwrap();
        assert_eq!(body, b"weights");
    }

    #[tokio::test]
    async fn test_memory_store_list_prefixes() {
        let store = MemoryObjectStore::new();
        for key in [
            "models/yolo/v1.0.0/yolo.pt",
            "models/yolo/v2.0.0/yolo.pt",
            "models/yolo/latest/yolo.pt",
            "models/yolo/metadata.json",
            "models/other/v1.0.0/other.pt",
        ] {
            store
                .put_object(key, b"x".to_vec(), "application/octet-stream")
                .await
                .unwrap();
        }

        let prefixes = store.list_prefixes("models/yolo/").await.unwrap();
        assert_eq!(
            prefixes,
            vec![
                "models/yolo/latest/".to_string(),
                "models/yolo/v1.0.0/".to_string(),
                "models/yolo/v2.0.0/".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn test_http_store_construction() {
        let store = HttpObjectStore::new(
            "https://gateway.example.com/".to_string(),
            "atlas-models".to_string(),
            "key".to_string(),
            "secret".to_string(),
        )
        .unwrap();
        assert_eq!(store.tag(), "http");
        assert_eq!(
            store.object_url("models/a/v1/a.pt"),
            "https://gateway.example.com/atlas-models/models/a/v1/a.pt"
        );
    }
}
