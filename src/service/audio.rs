//! Cloud audio classification service for SAIT edge integration
//!
//! The edge sensors run their own on-device models; this service exists for
//! cloud re-analysis of uncertain edge detections and for OTA version
//! negotiation. It consumes 128-dimensional pooled mel-spectrogram features
//! and maps the 30-class SAIT taxonomy onto Atlas threat categories.

use super::{InferenceResult, ModelInput, ModelKind, ModelService, ModelVersion};
use crate::device::{self, Device};
use crate::error::ModelError;
use crate::storage::ModelStorage;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// Weights artifact fetched through model storage
const WEIGHTS_NAME: &str = "sait_audio_classifier.pth";

pub const NUM_CLASSES: usize = 30;
pub const INPUT_DIM: usize = 128;

/// SAIT 30-class threat taxonomy, indexed by class id
pub const SAIT_CLASSES: [&str; NUM_CLASSES] = [
    // Immediate lethal threats
    "small_arms_fire",
    "artillery_fire",
    "mortar_fire",
    "rocket_launch",
    "explosion_large",
    "explosion_small",
    // Direct combat vehicles
    "tank_movement",
    "apc_movement",
    "truck_convoy",
    "helicopter_rotor",
    "jet_aircraft",
    "propeller_aircraft",
    // Human activity / surveillance
    "radio_chatter",
    "shouting_commands",
    "footsteps_marching",
    "equipment_clanking",
    // Mechanical sounds
    "engine_idle",
    "engine_revving",
    "door_slam",
    "metal_impact",
    "glass_breaking",
    "alarm_siren",
    "whistle_signal",
    "crowd_noise",
    // Environmental
    "construction_noise",
    "ambient_quiet",
    "wind_noise",
    // Aerial threats
    "drone_acoustic",
    "helicopter_military",
    "aerial_background",
];

/// Atlas threat category for a SAIT class: (category, severity, priority)
fn threat_category(class_id: u32) -> (&'static str, u8, &'static str) {
    match class_id {
        0..=5 => ("weapons", 5, "IMMEDIATE_LETHAL"),
        6 | 7 | 8 | 27 | 28 => ("vehicle_military", 4, "DIRECT_COMBAT"),
        13 | 14 | 20 | 23 => ("violence", 4, "DIRECT_COMBAT"),
        9 | 10 | 11 | 16 | 17 => ("vehicle_civilian", 2, "SURVEILLANCE"),
        12 | 21 | 22 | 24 => ("disturbance", 2, "SURVEILLANCE"),
        15 | 18 | 19 => ("suspicious_activity", 2, "SURVEILLANCE"),
        25 | 26 | 29 => ("background", 1, "NON_THREAT"),
        _ => ("suspicious_activity", 2, "SURVEILLANCE"),
    }
}

fn recommendations(category: &str, confidence: f32) -> Vec<String> {
    let mut recs = Vec::new();

    if category == "weapons" && confidence > 0.7 {
        recs.push("IMMEDIATE: Gunshot/explosion detected - alert authorities".to_string());
        recs.push("Evacuate area if safe to do so".to_string());
        recs.push("Record location and time for investigation".to_string());
    } else if category == "violence" && confidence > 0.6 {
        recs.push("Physical altercation detected - notify security".to_string());
        recs.push("Monitor situation for escalation".to_string());
    } else if category == "vehicle_military" && confidence > 0.8 {
        recs.push("Military vehicle/drone detected".to_string());
        recs.push("Verify source and context".to_string());
    } else if category == "disturbance" {
        recs.push("Public disturbance - standard monitoring".to_string());
    }

    recs
}

/// Pool a raw 16-bit little-endian PCM clip into the classifier's feature
/// space.
///
/// Samples are normalized to [-1, 1] and their magnitudes averaged into
/// [`INPUT_DIM`] equal-width bins. Returns None when the clip is too short
/// to fill every bin.
pub fn features_from_pcm(bytes: &[u8]) -> Option<Vec<f32>> {
    let samples: Vec<f32> = bytes
        .chunks_exact(2)
        .map(|pair| i16::from_le_bytes([pair[0], pair[1]]) as f32 / 32768.0)
        .collect();
    if samples.len() < INPUT_DIM {
        return None;
    }

    let mut features = vec![0.0_f32; INPUT_DIM];
    let mut counts = vec![0usize; INPUT_DIM];
    for (i, sample) in samples.iter().enumerate() {
        let bin = i * INPUT_DIM / samples.len();
        features[bin] += sample.abs();
        counts[bin] += 1;
    }
    for (feature, count) in features.iter_mut().zip(counts) {
        *feature /= count as f32;
    }

    Some(features)
}

/// Cloud audio classifier backing the SAIT verification flow
pub struct AudioClassifier {
    storage: Arc<ModelStorage>,
    weights_path: RwLock<Option<PathBuf>>,
    device: RwLock<Device>,
    loaded: AtomicBool,
}

impl AudioClassifier {
    pub fn new(storage: Arc<ModelStorage>) -> Self {
        Self {
            storage,
            weights_path: RwLock::new(None),
            device: RwLock::new(Device::Cpu),
            loaded: AtomicBool::new(false),
        }
    }

    /// Score the feature vector against each class.
    ///
    /// The real multi-scale network is out of scope here; this deterministic
    /// projection (strided accumulation plus softmax) stands in for it so the
    /// verification protocol around it can be tested end to end.
    fn classify(&self, features: &[f32]) -> (u32, f32) {
        let mut scores = [0.0_f32; NUM_CLASSES];
        for (i, value) in features.iter().enumerate() {
            scores[i % NUM_CLASSES] += value;
        }

        let top_class = scores
            .iter()
            .enumerate()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|(i, _)| i)
            .unwrap_or(0);

        // Softmax confidence for the top class
        let max = scores[top_class];
        let denom: f32 = scores.iter().map(|s| (s - max).exp()).sum();
        let confidence = (1.0 / denom).clamp(0.0, 1.0);

        (top_class as u32, confidence)
    }

    fn degraded_result() -> InferenceResult {
        // ambient_quiet (25) with negligible confidence
        InferenceResult {
            success: true,
            category: "background".to_string(),
            severity: 1,
            confidence: 0.0,
            class_id: Some(25),
            class_name: Some("ambient_quiet".to_string()),
            recommendations: Vec::new(),
            error: None,
        }
    }
}

#[async_trait]
impl ModelService for AudioClassifier {
    fn kind(&self) -> ModelKind {
        ModelKind::Audio
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
                tracing::info!(weights = ?path, device = %selected, "Audio classifier loaded");
            }
            None => {
                tracing::warn!(
                    weights = WEIGHTS_NAME,
                    "Audio classifier weights unavailable, running degraded"
                );
            }
        }

        Ok(())
    }

    fn loaded(&self) -> bool {
        self.loaded.load(Ordering::SeqCst)
    }

    async fn infer(&self, input: ModelInput) -> InferenceResult {
        let features = match input {
            ModelInput::AudioFeatures(features) => features,
            _ => return InferenceResult::failure("audio classifier expects feature input"),
        };

        if features.is_empty() {
            return InferenceResult::failure("empty feature vector");
        }
        if features.len() != INPUT_DIM {
            return InferenceResult::failure(format!(
                "expected {} features, got {}",
                INPUT_DIM,
                features.len()
            ));
        }

        if !self.loaded() {
            return Self::degraded_result();
        }

        let (class_id, confidence) = self.classify(&features);
        let class_name = SAIT_CLASSES[class_id as usize];
        let (category, severity, _priority) = threat_category(class_id);

        tracing::debug!(
            class = class_name,
            category = category,
            confidence = confidence,
            "Audio classified"
        );

        InferenceResult {
            success: true,
            category: category.to_string(),
            severity,
            confidence,
            class_id: Some(class_id),
            class_name: Some(class_name.to_string()),
            recommendations: recommendations(category, confidence),
            error: None,
        }
    }

    fn model_version(&self) -> ModelVersion {
        ModelVersion {
            model_version: "1.0.0".to_string(),
            model_type: "audio_classifier".to_string(),
            architecture: "MultiScaleAudioModel".to_string(),
            num_classes: Some(NUM_CLASSES as u32),
            input_dim: Some(INPUT_DIM as u32),
            format: "pytorch".to_string(),
            compatible_devices: vec!["nRF5340".to_string(), "SAIT_01".to_string()],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;
    use tempfile::TempDir;

    fn loaded_classifier(dir: &TempDir) -> AudioClassifier {
        std::fs::write(dir.path().join(WEIGHTS_NAME), b"weights").unwrap();
        let config = StorageConfig {
            cache_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let storage = Arc::new(ModelStorage::with_backend(&config, None).unwrap());
        AudioClassifier::new(storage)
    }

    /// Feature vector whose strided accumulation peaks at `class_id`
    fn features_for_class(class_id: usize) -> Vec<f32> {
        let mut features = vec![0.0_f32; INPUT_DIM];
        features[class_id] = 10.0;
        features
    }

    #[test]
    fn test_taxonomy_covers_all_classes() {
        for class_id in 0..NUM_CLASSES as u32 {
            let (category, severity, _) = threat_category(class_id);
            assert!(!category.is_empty());
            assert!((1..=5).contains(&severity));
        }
    }

    #[test]
    fn test_weapon_classes_are_lethal() {
        for class_id in 0..=5 {
            assert_eq!(threat_category(class_id).0, "weapons");
            assert_eq!(threat_category(class_id).1, 5);
        }
    }

    #[tokio::test]
    async fn test_classification_is_deterministic() {
        let dir = TempDir::new().unwrap();
        let classifier = loaded_classifier(&dir);
        classifier.initialize().await.unwrap();
        assert!(classifier.loaded());

        let features = features_for_class(4);
        let a = classifier.infer(ModelInput::AudioFeatures(features.clone())).await;
        let b = classifier.infer(ModelInput::AudioFeatures(features)).await;

        assert_eq!(a.class_id, b.class_id);
        assert_eq!(a.class_id, Some(4));
        assert_eq!(a.class_name.as_deref(), Some("explosion_large"));
        assert_eq!(a.category, "weapons");
        assert_eq!(a.confidence, b.confidence);
        assert!((0.0..=1.0).contains(&a.confidence));
    }

    #[tokio::test]
    async fn test_degraded_without_weights() {
        let dir = TempDir::new().unwrap();
        let config = StorageConfig {
            cache_dir: dir.path().to_path_buf(),
            ..Default::default()
        };
        let storage = Arc::new(ModelStorage::with_backend(&config, None).unwrap());
        let classifier = AudioClassifier::new(storage);

        classifier.initialize().await.unwrap();
        assert!(!classifier.loaded());

        let result = classifier
            .infer(ModelInput::AudioFeatures(vec![0.5; INPUT_DIM]))
            .await;
        assert!(result.success);
        assert_eq!(result.category, "background");
        assert_eq!(result.confidence, 0.0);
    }

    #[tokio::test]
    async fn test_wrong_dimension_is_structured_failure() {
        let dir = TempDir::new().unwrap();
        let classifier = loaded_classifier(&dir);
        classifier.initialize().await.unwrap();

        let result = classifier.infer(ModelInput::AudioFeatures(vec![0.5; 64])).await;
        assert!(!result.success);
        assert!(result.error.unwrap().contains("128"));
    }

    #[tokio::test]
    async fn test_weapon_detection_has_recommendations() {
        let dir = TempDir::new().unwrap();
        let classifier = loaded_classifier(&dir);
        classifier.initialize().await.unwrap();

        // A dominant class-0 vector classifies as small_arms_fire with high
        // softmax confidence
        let result = classifier
            .infer(ModelInput::AudioFeatures(features_for_class(0)))
            .await;
        assert_eq!(result.category, "weapons");
        assert!(result.confidence > 0.7);
        assert!(!result.recommendations.is_empty());
    }

    #[test]
    fn test_pcm_features_have_classifier_shape() {
        // 4 samples per bin, alternating full-scale positive and negative
        let samples: Vec<i16> = (0..INPUT_DIM * 4)
            .map(|i| if i % 2 == 0 { i16::MAX } else { i16::MIN })
            .collect();
        let pcm: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();

        let features = features_from_pcm(&pcm).unwrap();
        assert_eq!(features.len(), INPUT_DIM);
        // Magnitudes are normalized into [0, 1]
        for feature in &features {
            assert!((0.0..=1.0).contains(feature));
            assert!(*feature > 0.9);
        }
    }

    #[test]
    fn test_pcm_too_short_for_features() {
        let pcm = vec![0u8; (INPUT_DIM - 1) * 2];
        assert!(features_from_pcm(&pcm).is_none());
        assert!(features_from_pcm(&[]).is_none());
    }

    #[tokio::test]
    async fn test_pcm_spike_drives_classification() {
        let dir = TempDir::new().unwrap();
        let classifier = loaded_classifier(&dir);
        classifier.initialize().await.unwrap();

        // One sample per bin; a full-scale spike at sample 4 pools into
        // feature 4 and classifies as explosion_large
        let mut samples = vec![0i16; INPUT_DIM];
        samples[4] = i16::MAX;
        let pcm: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();

        let features = features_from_pcm(&pcm).unwrap();
        let result = classifier.infer(ModelInput::AudioFeatures(features)).await;
        assert_eq!(result.class_id, Some(4));
        assert_eq!(result.category, "weapons");
    }

    #[test]
    fn test_model_version_for_ota() {
        let dir = TempDir::new().unwrap();
        let classifier = loaded_classifier(&dir);
        let version = classifier.model_version();
        assert_eq!(version.num_classes, Some(30));
        assert_eq!(version.input_dim, Some(128));
        assert!(version.compatible_devices.contains(&"SAIT_01".to_string()));
    }
}
