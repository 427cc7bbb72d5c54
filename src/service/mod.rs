//! Uniform model-service contract
//!
//! Every concrete model type (text, visual, audio) implements
//! [`ModelService`]: initialize, report readiness, run inference, and report
//! version metadata for OTA negotiation with edge devices. Model internals
//! are deliberately simple; the contract and lifecycle are what the rest of
//! the system depends on.

pub mod audio;
pub mod text;
pub mod visual;

use crate::error::ModelError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use audio::AudioClassifier;
pub use text::ThreatClassifier;
pub use visual::{DetectedObject, VisualDetector};

/// The three shared inference capabilities
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Text,
    Visual,
    Audio,
}

impl ModelKind {
    pub const ALL: [ModelKind; 3] = [ModelKind::Text, ModelKind::Visual, ModelKind::Audio];

    /// Canonical service name used in logs and info snapshots
    pub fn service_name(&self) -> &'static str {
        match self {
            Self::Text => "threat_classifier",
            Self::Visual => "visual_detector",
            Self::Audio => "audio_classifier",
        }
    }

    /// Products documented as sharing this model type
    pub fn shared_by(&self) -> &'static [&'static str] {
        match self {
            Self::Text => &["Halo", "SAIT", "Frontline"],
            Self::Visual => &["Halo", "Frontline"],
            Self::Audio => &["Halo", "SAIT", "Frontline"],
        }
    }
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.service_name())
    }
}

impl std::str::FromStr for ModelKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" | "threat_classifier" => Ok(Self::Text),
            "visual" | "visual_detector" => Ok(Self::Visual),
            "audio" | "audio_classifier" => Ok(Self::Audio),
            other => Err(format!("unknown model type: {}", other)),
        }
    }
}

/// Type-specific inference payload
#[derive(Debug, Clone)]
pub enum ModelInput {
    /// Free-text incident description
    Text(String),
    /// Encoded image bytes
    Image(Vec<u8>),
    /// Pre-extracted detections for threat analysis
    Objects(Vec<DetectedObject>),
    /// 128-dimensional audio feature vector (mel-spectrogram pooled)
    AudioFeatures(Vec<f32>),
}

/// Structured inference result.
///
/// Inference never propagates internal errors; failures are reported through
/// `success = false` and the `error` field so callers can always inspect the
/// outcome.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferenceResult {
    pub success: bool,

    /// Threat category in the Atlas taxonomy
    pub category: String,

    /// Severity on a 1-5 scale
    pub severity: u8,

    /// Confidence in [0, 1]
    pub confidence: f32,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_id: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub class_name: Option<String>,

    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub recommendations: Vec<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl InferenceResult {
    /// Structured failure result
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            success: false,
            category: "unknown".to_string(),
            severity: 1,
            confidence: 0.0,
            class_id: None,
            class_name: None,
            recommendations: Vec::new(),
            error: Some(error.into()),
        }
    }
}

/// Version descriptor for OTA/update negotiation with edge consumers
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelVersion {
    pub model_version: String,
    pub model_type: String,
    pub architecture: String,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub num_classes: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_dim: Option<u32>,

    pub format: String,

    #[serde(skip_serializing_if = "Vec::is_empty", default)]
    pub compatible_devices: Vec<String>,
}

/// Capability set shared by every model type.
///
/// Implementations use interior mutability so a shared `Arc<dyn ModelService>`
/// handle can be initialized once and then used concurrently by readers.
#[async_trait]
pub trait ModelService: Send + Sync {
    fn kind(&self) -> ModelKind;

    /// Acquire weights and select a compute device. Idempotent. Missing
    /// weights are recorded as "not loaded", never raised, so the hosting
    /// process can degrade to mock behavior instead of crashing.
    async fn initialize(&self) -> Result<(), ModelError>;

    /// Readiness predicate other components poll before invoking inference
    fn loaded(&self) -> bool;

    /// Run inference; always returns a structured result
    async fn infer(&self, input: ModelInput) -> InferenceResult;

    /// Version descriptor for OTA negotiation
    fn model_version(&self) -> ModelVersion;
}
