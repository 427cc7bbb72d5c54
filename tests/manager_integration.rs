//! Integration tests for manager lifecycle and the verification flow
//!
//! These exercise the manager through its public surface with the production
//! factory and real (local-mode) storage, plus an injected factory where the
//! test needs to observe construction.

use async_trait::async_trait;
use atlas_models::manager::{DefaultServiceFactory, ModelManager, ReloadTarget, ServiceFactory};
use atlas_models::service::audio::INPUT_DIM;
use atlas_models::storage::ModelStorage;
use atlas_models::verify::{self, EdgeDetection, VerificationAction};
use atlas_models::{
    InferenceResult, ModelError, ModelInput, ModelKind, ModelService, ModelVersion, StorageConfig,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

const AUDIO_WEIGHTS: &str = "sait_audio_classifier.pth";
const VISUAL_WEIGHTS: &str = "yolov8m.pt";

fn local_storage(dir: &TempDir) -> Arc<ModelStorage> {
    let config = StorageConfig {
        cache_dir: dir.path().to_path_buf(),
        ..Default::default()
    };
    Arc::new(ModelStorage::with_backend(&config, None).unwrap())
}

fn seed_weights(dir: &TempDir) {
    std::fs::write(dir.path().join(AUDIO_WEIGHTS), b"audio").unwrap();
    std::fs::write(dir.path().join(VISUAL_WEIGHTS), b"visual").unwrap();
}

#[tokio::test]
async fn full_stack_initializes_from_cached_weights() {
    let dir = TempDir::new().unwrap();
    seed_weights(&dir);

    let manager = ModelManager::with_factory(local_storage(&dir), Box::new(DefaultServiceFactory));
    manager.ensure_ready().await.unwrap();

    for kind in ModelKind::ALL {
        let service = manager.model(kind).unwrap();
        assert!(service.loaded(), "{} should be loaded", kind);
    }

    let info = manager.info().await;
    assert!(info.initialized);
    assert_eq!(info.models.len(), 3);
    assert_eq!(
        info.models["audio_classifier"].version.architecture,
        "MultiScaleAudioModel"
    );
}

#[tokio::test]
async fn missing_weights_degrade_without_failing_init() {
    let dir = TempDir::new().unwrap();

    let manager = ModelManager::with_factory(local_storage(&dir), Box::new(DefaultServiceFactory));
    manager.ensure_ready().await.unwrap();

    // All three services exist; the weight-backed ones are degraded
    let info = manager.info().await;
    assert!(info.models["threat_classifier"].loaded);
    assert!(!info.models["visual_detector"].loaded);
    assert!(!info.models["audio_classifier"].loaded);

    // Degraded services still answer with mock results
    let audio = manager.model(ModelKind::Audio).unwrap();
    let result = audio
        .infer(ModelInput::AudioFeatures(vec![0.5; INPUT_DIM]))
        .await;
    assert!(result.success);
    assert_eq!(result.category, "background");
}

/// Factory that counts builds and hands out trivial always-loaded services
struct TrackingFactory {
    builds: Arc<AtomicUsize>,
}

struct TrivialService {
    kind: ModelKind,
}

#[async_trait]
impl ModelService for TrivialService {
    fn kind(&self) -> ModelKind {
        self.kind
    }

    async fn initialize(&self) -> Result<(), ModelError> {
        Ok(())
    }

    fn loaded(&self) -> bool {
        true
    }

    async fn infer(&self, _input: ModelInput) -> InferenceResult {
        InferenceResult::failure("not under test")
    }

    fn model_version(&self) -> ModelVersion {
        ModelVersion {
            model_version: "0.0.0".into(),
            model_type: self.kind.service_name().into(),
            architecture: "trivial".into(),
            num_classes: None,
            input_dim: None,
            format: "builtin".into(),
            compatible_devices: Vec::new(),
        }
    }
}

#[async_trait]
impl ServiceFactory for TrackingFactory {
    async fn build(
        &self,
        kind: ModelKind,
        _storage: Arc<ModelStorage>,
    ) -> Result<Arc<dyn ModelService>, ModelError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        // Stagger builds so racing callers would overlap without the init lock
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        Ok(Arc::new(TrivialService { kind }))
    }
}

#[tokio::test]
async fn concurrent_initialization_builds_services_once() {
    let dir = TempDir::new().unwrap();
    let builds = Arc::new(AtomicUsize::new(0));
    let manager = Arc::new(ModelManager::with_factory(
        local_storage(&dir),
        Box::new(TrackingFactory {
            builds: Arc::clone(&builds),
        }),
    ));

    let tasks: Vec<_> = (0..32)
        .map(|_| {
            let manager = Arc::clone(&manager);
            tokio::spawn(async move { manager.ensure_ready().await })
        })
        .collect();
    for task in tasks {
        task.await.unwrap().unwrap();
    }

    assert_eq!(builds.load(Ordering::SeqCst), ModelKind::ALL.len());
}

#[tokio::test]
async fn reload_keeps_old_handles_answering() {
    let dir = TempDir::new().unwrap();
    seed_weights(&dir);

    let manager = ModelManager::with_factory(local_storage(&dir), Box::new(DefaultServiceFactory));
    manager.ensure_ready().await.unwrap();

    let old_audio = manager.model(ModelKind::Audio).unwrap();
    let report = manager.reload(ReloadTarget::All).await;
    assert!(report.all_swapped());

    let new_audio = manager.model(ModelKind::Audio).unwrap();
    assert!(!Arc::ptr_eq(&old_audio, &new_audio));

    // In-flight holders of the old handle keep working
    let result = old_audio
        .infer(ModelInput::AudioFeatures(vec![0.5; INPUT_DIM]))
        .await;
    assert!(result.success);
}

#[tokio::test]
async fn verification_flow_end_to_end() {
    let dir = TempDir::new().unwrap();
    seed_weights(&dir);

    let manager = ModelManager::with_factory(local_storage(&dir), Box::new(DefaultServiceFactory));
    manager.ensure_ready().await.unwrap();

    let detection = EdgeDetection {
        device_id: "sait-007".to_string(),
        edge_class_id: 0,
        edge_class_name: "small_arms_fire".to_string(),
        edge_confidence: 0.62,
        audio_base64: None,
    };

    // Feature vector dominated by the edge's class re-verifies it
    let mut features = vec![0.0_f32; INPUT_DIM];
    features[0] = 10.0;
    let decision = verify::verify_edge_detection(&manager, &detection, Some(features))
        .await
        .unwrap();
    assert_eq!(decision.action, VerificationAction::CloudVerified);
    assert!(decision.verified);
    assert_eq!(decision.final_class_id, 0);
    assert_eq!(decision.cloud_class_id, Some(0));
    // The agreed decision is acted on at the cloud's confidence
    assert_eq!(decision.cloud_confidence, Some(decision.final_confidence));
    assert_eq!(decision.final_category.as_deref(), Some("weapons"));
    assert!(!decision.recommendations.is_empty());

    // Without a clip the same detection is flagged
    let decision = verify::verify_edge_detection(&manager, &detection, None)
        .await
        .unwrap();
    assert_eq!(decision.action, VerificationAction::FlaggedForReview);
}
