//! Shared model lifecycle and distribution for the Atlas central stack.
//!
//! One set of inference models (text threat classification, visual object
//! detection, audio event classification) serves the Halo, SAIT, and
//! Frontline products. This crate owns how those models are stored,
//! versioned, loaded, hot-reloaded, and how uncertain edge detections are
//! verified against cloud re-analysis.
//!
//! - [`manager::ModelManager`] coordinates service lifecycle and reload.
//! - [`storage::ModelStorage`] is a cache-through store over an S3-compatible
//!   remote with graceful local fallback.
//! - [`verify`] implements the deterministic edge/cloud verification policy.

pub mod config;
pub mod device;
pub mod error;
pub mod manager;
pub mod service;
pub mod storage;
pub mod verify;

pub use config::{StorageConfig, StorageMode};
pub use error::{ModelError, StorageError};
pub use manager::{ManagerInfo, ModelManager, ReloadReport, ReloadTarget, ServiceFactory};
pub use service::{InferenceResult, ModelInput, ModelKind, ModelService, ModelVersion};
pub use storage::{ModelMetadata, ModelStorage, UploadReport};
pub use verify::{
    CloudAnalysis, EDGE_TRUST_THRESHOLD, EdgeDetection, VerificationAction, VerificationDecision,
};
