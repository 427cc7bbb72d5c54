//! Keyword-based text threat classifier
//!
//! The trivial keyword matcher that backs the text model type. It needs no
//! weights, so initialization always succeeds; it exists to exercise the
//! shared service contract for the text capability.

use super::{InferenceResult, ModelInput, ModelKind, ModelService, ModelVersion};
use crate::error::ModelError;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};

/// Keyword table: (category, severity, keywords)
const KEYWORDS: &[(&str, u8, &[&str])] = &[
    (
        "weapons",
        5,
        &["weapon", "gun", "knife", "firearm", "armed", "pistol", "rifle", "shot", "shooting"],
    ),
    (
        "violence",
        4,
        &["assault", "attack", "fight", "beating", "punch", "kick", "violence"],
    ),
    ("theft", 3, &["theft", "steal", "rob", "burglary", "stolen"]),
    (
        "disturbance",
        2,
        &["noise", "loud", "disturbance", "disorderly", "complaint"],
    ),
    (
        "vandalism",
        2,
        &["vandalism", "damage", "graffiti", "destroy"],
    ),
    ("drug_activity", 3, &["drug", "narcotic", "dealing"]),
    (
        "vehicle_crime",
        3,
        &["vehicle", "car theft", "hit and run", "traffic"],
    ),
    (
        "suspicious_activity",
        2,
        &["suspicious", "trespassing", "loitering"],
    ),
];

/// Keyword-matching threat classifier for free-text descriptions
pub struct ThreatClassifier {
    loaded: AtomicBool,
}

impl ThreatClassifier {
    pub fn new() -> Self {
        Self {
            loaded: AtomicBool::new(false),
        }
    }

    /// Classify a description against the keyword table. Pure; the async
    /// contract wraps this.
    pub fn classify(&self, description: &str) -> InferenceResult {
        let description = description.to_lowercase();

        let mut best: Option<(&str, u8, usize)> = None;
        for (category, severity, keywords) in KEYWORDS {
            let hits = keywords.iter().filter(|kw| description.contains(**kw)).count();
            if hits > 0 && best.map(|(_, _, prev)| hits > prev).unwrap_or(true) {
                best = Some((category, *severity, hits));
            }
        }

        match best {
            Some((category, severity, hits)) => InferenceResult {
                success: true,
                category: category.to_string(),
                severity,
                confidence: (0.6 + hits as f32 * 0.1).min(0.95),
                class_id: None,
                class_name: None,
                recommendations: Vec::new(),
                error: None,
            },
            None => InferenceResult {
                success: true,
                category: "suspicious_activity".to_string(),
                severity: 2,
                confidence: 0.3,
                class_id: None,
                class_name: None,
                recommendations: Vec::new(),
                error: None,
            },
        }
    }
}

impl Default for ThreatClassifier {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModelService for ThreatClassifier {
    fn kind(&self) -> ModelKind {
        ModelKind::Text
    }

    async fn initialize(&self) -> Result<(), ModelError> {
        self.loaded.store(true, Ordering::SeqCst);
        tracing::info!("Threat classifier ready (keyword taxonomy)");
        Ok(())
    }

    fn loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    async fn infer(&self, input: ModelInput) -> InferenceResult {
        match input {
            ModelInput::Text(description) if description.trim().is_empty() => {
                InferenceResult::failure("empty description")
            }
            ModelInput::Text(description) => self.classify(&description),
            _ => InferenceResult::failure("threat classifier expects text input"),
        }
    }

    fn model_version(&self) -> ModelVersion {
        ModelVersion {
            model_version: "0.1.0".to_string(),
            model_type: "threat_classifier".to_string(),
            architecture: "keyword-classifier".to_string(),
            num_classes: Some(KEYWORDS.len() as u32),
            input_dim: None,
            format: "builtin".to_string(),
            compatible_devices: Vec::new(),
        }
    }
}
