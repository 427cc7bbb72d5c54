//! Configuration structures and loading logic

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Which storage backend serves model artifacts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageMode {
    /// Local cache directory only, no remote store
    Local,
    /// S3-compatible remote object store with local cache-through
    Remote,
}

impl std::fmt::Display for StorageMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::Remote => write!(f, "remote"),
        }
    }
}

/// Model storage and manager configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Backend selector; `remote` silently downgrades to `local` when
    /// credentials are missing
    pub storage_mode: StorageMode,

    /// Local cache directory, one artifact file per model name
    pub cache_dir: PathBuf,

    /// Remote endpoint URL (e.g. a DigitalOcean Spaces or MinIO gateway)
    pub endpoint: Option<String>,

    pub bucket: String,
    pub region: String,

    pub access_key: Option<String>,
    pub secret_key: Option<String>,

    /// Bound on every remote-store operation; on timeout the storage layer
    /// falls back to the local cache instead of blocking
    pub request_timeout_secs: u64,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            storage_mode: StorageMode::Local,
            cache_dir: PathBuf::from("models"),
            endpoint: None,
            bucket: "atlas-models".to_string(),
            region: "us-east-1".to_string(),
            access_key: None,
            secret_key: None,
            request_timeout_secs: default_request_timeout(),
        }
    }
}

impl StorageConfig {
    /// Load configuration from file with environment variable overrides
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let mut config = if let Some(path) = path {
            let content = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content).context("Failed to parse TOML config")?
        } else {
            Self::default()
        };

        config.apply_env_overrides()?;

        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(mode) = std::env::var("MODEL_STORAGE_TYPE") {
            self.storage_mode = match mode.as_str() {
                "s3" | "remote" => StorageMode::Remote,
                "local" => StorageMode::Local,
                other => anyhow::bail!("Invalid MODEL_STORAGE_TYPE value: {}", other),
            };
        }
        if let Ok(dir) = std::env::var("MODEL_CACHE_DIR") {
            self.cache_dir = PathBuf::from(dir);
        }
        if let Ok(endpoint) = std::env::var("S3_ENDPOINT_URL") {
            self.endpoint = Some(endpoint);
        }
        if let Ok(bucket) = std::env::var("S3_BUCKET") {
            self.bucket = bucket;
        }
        if let Ok(region) = std::env::var("S3_REGION") {
            self.region = region;
        }
        if let Ok(key) = std::env::var("S3_ACCESS_KEY") {
            self.access_key = Some(key);
        }
        if let Ok(key) = std::env::var("S3_SECRET_KEY") {
            self.secret_key = Some(key);
        }
        if let Ok(timeout) = std::env::var("MODEL_STORE_TIMEOUT_SECS") {
            self.request_timeout_secs = timeout
                .parse()
                .context("Invalid MODEL_STORE_TIMEOUT_SECS value")?;
        }

        Ok(())
    }

    /// Whether remote credentials are complete enough to build a backend
    pub fn has_remote_credentials(&self) -> bool {
        self.endpoint.is_some() && self.access_key.is_some() && self.secret_key.is_some()
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be > 0");
        }
        if self.bucket.is_empty() {
            anyhow::bail!("bucket name cannot be empty");
        }
        if self.bucket.contains('/') {
            anyhow::bail!("bucket name '{}' cannot contain '/'", self.bucket);
        }

        // Ensure the cache directory exists or can be created
        if !self.cache_dir.exists() {
            std::fs::create_dir_all(&self.cache_dir)
                .with_context(|| format!("Cannot create cache directory: {:?}", self.cache_dir))?;
        }

        Ok(())
    }
}

fn default_request_timeout() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn clear_env() {
        unsafe {
            std::env::remove_var("MODEL_STORAGE_TYPE");
            std::env::remove_var("MODEL_CACHE_DIR");
            std::env::remove_var("S3_ENDPOINT_URL");
            std::env::remove_var("S3_BUCKET");
            std::env::remove_var("S3_REGION");
            std::env::remove_var("S3_ACCESS_KEY");
            std::env::remove_var("S3_SECRET_KEY");
            std::env::remove_var("MODEL_STORE_TIMEOUT_SECS");
        }
    }

    #[test]
    #[serial]
    fn test_default_config() {
        clear_env();
        let config = StorageConfig::from_env().unwrap();
        assert_eq!(config.storage_mode, StorageMode::Local);
        assert_eq!(config.bucket, "atlas-models");
        assert_eq!(config.request_timeout_secs, 30);
        assert!(!config.has_remote_credentials());
    }

    #[test]
    #[serial]
    fn test_env_overrides() {
        clear_env();
        unsafe {
            std::env::set_var("MODEL_STORAGE_TYPE", "s3");
            std::env::set_var("S3_ENDPOINT_URL", "https://nyc3.digitaloceanspaces.com");
            std::env::set_var("S3_BUCKET", "atlas-prod-models");
            std::env::set_var("S3_ACCESS_KEY", "key");
            std::env::set_var("S3_SECRET_KEY", "secret");
        }

        let config = StorageConfig::from_env().unwrap();
        assert_eq!(config.storage_mode, StorageMode::Remote);
        assert_eq!(config.bucket, "atlas-prod-models");
        assert!(config.has_remote_credentials());

        clear_env();
    }

    #[test]
    #[serial]
    fn test_invalid_storage_type() {
        clear_env();
        unsafe {
            std::env::set_var("MODEL_STORAGE_TYPE", "ftp");
        }
        assert!(StorageConfig::from_env().is_err());
        clear_env();
    }

    #[test]
    fn test_bucket_validation() {
        let config = StorageConfig {
            bucket: "bad/bucket".to_string(),
            cache_dir: std::env::temp_dir(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = StorageConfig {
            request_timeout_secs: 0,
            cache_dir: std::env::temp_dir(),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_round_trip() {
        let config = StorageConfig::default();
        let toml_str = toml::to_string(&config).unwrap();
        let parsed: StorageConfig = toml::from_str(&toml_str).unwrap();
        assert_eq!(parsed.storage_mode, config.storage_mode);
        assert_eq!(parsed.bucket, config.bucket);
    }
}
