//! Visual object detection service
//!
//! Wraps the shared object-detection weights (`yolov8m.pt`) behind the model
//! service contract. Detector internals are a black box to this subsystem;
//! the threat analysis over detected objects is the part other components
//! rely on. When weights are unavailable the service reports mock detections
//! instead of failing the hosting process.

use super::{InferenceResult, ModelInput, ModelKind, ModelService, ModelVersion};
use crate::device::{self, Device};
use crate::error::ModelError;
use crate::storage::ModelStorage;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// Weights artifact fetched through model storage
const WEIGHTS_NAME: &str = "yolov8m.pt";

/// A single detection produced by the object detector
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectedObject {
    pub class_name: String,
    pub class_id: u32,
    pub confidence: f32,
    /// [x1, y1, x2, y2]
    pub bbox: [f32; 4],
}

/// Aggregate threat analysis over a set of detections
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreatAnalysis {
    pub people_count: usize,
    pub weapons_detected: bool,
    pub vehicle_count: usize,
    pub threat_indicators: Vec<String>,
    /// Threat score in [0, 1]
    pub threat_score: f32,
}

/// Analyze detections for threat indicators.
///
/// Pure function: weapons dominate the score, large crowds add to it.
pub fn analyze_threats(detections: &[DetectedObject]) -> ThreatAnalysis {
    let people_count = detections.iter().filter(|d| d.class_name == "person").count();
    let weapons_detected = detections.iter().any(|d| d.class_name == "weapon");
    let vehicle_count = detections
        .iter()
        .filter(|d| matches!(d.class_name.as_str(), "car" | "truck" | "motorcycle" | "bus"))
        .count();

    let mut threat_indicators = Vec::new();
    if weapons_detected {
        threat_indicators.push("weapon_present".to_string());
    }
    if people_count > 5 {
        threat_indicators.push("large_crowd".to_string());
    }
    if weapons_detected && people_count > 0 {
        threat_indicators.push("armed_persons".to_string());
    }

    let mut threat_score = 0.0;
    if weapons_detected {
        threat_score += 0.8;
    }
    if people_count > 10 {
        threat_score += 0.3;
    } else if people_count > 5 {
        threat_score += 0.2;
    }

    ThreatAnalysis {
        people_count,
        weapons_detected,
        vehicle_count,
        threat_indicators,
        threat_score: threat_score_clamped(threat_score),
    }
}

fn threat_score_clamped(score: f32) -> f32 {
    score.clamp(0.0, 1.0)
}

/// Object-detection based visual threat service
pub struct VisualDetector {
    storage: Arc<ModelStorage>,
    weights_path: RwLock<Option<PathBuf>>,
    device: RwLock<Device>,
    loaded: AtomicBool,
}

impl VisualDetector {
    pub fn new(storage: Arc<ModelStorage>) -> Self {
        Self {
            storage,
            weights_path: RwLock::new(None),
            device: RwLock::new(Device::Cpu),
            loaded: AtomicBool::new(false),
        }
    }

    fn result_from_analysis(
        &self,
        detections: Vec<DetectedObject>,
        degraded: bool,
    ) -> InferenceResult {
        let analysis = analyze_threats(&detections);

        let category = if analysis.weapons_detected {
            "weapons"
        } else if !analysis.threat_indicators.is_empty() {
            "disturbance"
        } else {
            "background"
        };

        let severity = 1 + (analysis.threat_score * 4.0).round() as u8;
        let confidence = if degraded {
            0.0
        } else {
            detections
                .iter()
                .map(|d| d.confidence)
                .fold(0.5_f32, f32::max)
                .clamp(0.0, 1.0)
        };

        InferenceResult {
            success: true,
            category: category.to_string(),
            severity,
            confidence,
            class_id: None,
            class_name: None,
            recommendations: analysis.threat_indicators,
            error: None,
        }
    }
}

#[async_trait]
impl ModelService for VisualDetector {
    fn kind(&self) -> ModelKind {
        ModelKind::Visual
    }

    async fn initialize(&self) -> Result<(), ModelError> {
        if self.loaded.load(Ordering::SeqCst) {
            return Ok(());
        }

        match self.storage.get_model(WEIGHTS_NAME, None, false).await {
            Some(path) => {
                let selected = device::selected();
                *self.weights_path.write().await = Some(path.clone());
                *self.device.write().await = selected;
                self.loaded.store(true, Ordering::SeqCst);
                tracing::info!(weights = ?path, device = %selected, "Visual detector loaded");
            }
            None => {
                // Not an error: the service stays up with mock detections
                tracing::warn!(
                    weights = WEIGHTS_NAME,
                    "Visual detector weights unavailable, running degraded"
                );
            }
        }

        Ok(())
    }

    fn loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    async fn infer(&self, input: ModelInput) -> InferenceResult {
        match input {
            ModelInput::Image(bytes) if bytes.is_empty() => {
                InferenceResult::failure("empty image payload")
            }
            ModelInput::Image(_bytes) => {
                if !self.loaded() {
                    return self.result_from_analysis(Vec::new(), true);
                }
                // Detector internals are out of scope here; without the real
                // model an image yields no detections
                self.result_from_analysis(Vec::new(), false)
            }
            ModelInput::Objects(detections) => self.result_from_analysis(detections, false),
            _ => InferenceResult::failure("visual detector expects image or object input"),
        }
    }

    fn model_version(&self) -> ModelVersion {
        ModelVersion {
            model_version: "1.0.0".to_string(),
            model_type: "visual_detector".to_string(),
            architecture: if self.loaded() {
                "yolov8m".to_string()
            } else {
                "mock-detector".to_string()
            },
            num_classes: Some(80),
            input_dim: None,
            format: "pytorch".to_string(),
            compatible_devices: Vec::new(),
        }
    }
}
