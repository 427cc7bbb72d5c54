//! Model lifecycle coordinator
//!
//! [`ModelManager`] owns the shared model services and their lifecycle:
//! at-most-once initialization under concurrency, per-type failure isolation,
//! hot reload that swaps handles without disrupting in-flight work, and an
//! info snapshot for operators. The manager is constructed explicitly and
//! passed to whoever needs it; callers hold it behind an `Arc` and clone
//! service handles out of it.

use crate::config::StorageConfig;
use crate::error::ModelError;
use crate::service::{AudioClassifier, ModelKind, ModelService, ModelVersion, ThreatClassifier, VisualDetector};
use crate::storage::ModelStorage;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Lifecycle state of the manager as a whole
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ManagerState {
    Uninitialized,
    Initializing,
    Ready,
    /// No model type became ready; a later `ensure_ready` retries
    Failed,
}

/// Builds concrete services for the manager.
///
/// The seam exists so tests can inject counting or failing services; the
/// manager never constructs a service any other way.
#[async_trait]
pub trait ServiceFactory: Send + Sync {
    async fn build(
        &self,
        kind: ModelKind,
        storage: Arc<ModelStorage>,
    ) -> Result<Arc<dyn ModelService>, ModelError>;
}

/// Production factory wiring each model kind to its service
pub struct DefaultServiceFactory;

#[async_trait]
impl ServiceFactory for DefaultServiceFactory {
    async fn build(
        &self,
        kind: ModelKind,
        storage: Arc<ModelStorage>,
    ) -> Result<Arc<dyn ModelService>, ModelError> {
        let service: Arc<dyn ModelService> = match kind {
            ModelKind::Text => Arc::new(ThreatClassifier::new()),
            ModelKind::Visual => Arc::new(VisualDetector::new(storage)),
            ModelKind::Audio => Arc::new(AudioClassifier::new(storage)),
        };
        Ok(service)
    }
}

/// Which services a reload targets
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReloadTarget {
    All,
    One(ModelKind),
}

/// Per-type outcome of a reload pass
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ReloadOutcome {
    /// New service loaded; handle swapped in
    Swapped,
    /// New service failed to load; previous handle left in place
    KeptPrevious { reason: String },
    /// New service failed and there was no previous handle
    Failed { reason: String },
}

/// Result of a reload pass, keyed by service name
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReloadReport {
    pub outcomes: BTreeMap<String, ReloadOutcome>,
}

impl ReloadReport {
    /// True when every targeted service swapped successfully
    pub fn all_swapped(&self) -> bool {
        self.outcomes
            .values()
            .all(|o| matches!(o, ReloadOutcome::Swapped))
    }
}

/// Per-model entry in the info snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    pub loaded: bool,
    pub model_type: String,
    pub version: ModelVersion,
    pub shared_by: Vec<String>,
}

/// Operator-facing snapshot of manager and model state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagerInfo {
    pub initialized: bool,
    pub architecture: String,
    pub models: BTreeMap<String, ModelInfo>,
}

/// Coordinator for the shared model services
pub struct ModelManager {
    storage: Arc<ModelStorage>,
    factory: Box<dyn ServiceFactory>,
    state: RwLock<ManagerState>,
    /// Serializes initialization; `state` is the fast-path check
    init_lock: Mutex<()>,
    /// Serializes reload passes so two reloads never interleave swaps
    reload_lock: Mutex<()>,
    services: DashMap<ModelKind, Arc<dyn ModelService>>,
}

impl ModelManager {
    /// Manager with the production factory
    pub fn new(config: &StorageConfig) -> Result<Self, ModelError> {
        let storage = Arc::new(ModelStorage::new(config)?);
        Ok(Self::with_factory(storage, Box::new(DefaultServiceFactory)))
    }

    /// Manager over pre-built storage and a custom factory
    pub fn with_factory(storage: Arc<ModelStorage>, factory: Box<dyn ServiceFactory>) -> Self {
        Self {
            storage,
            factory,
            state: RwLock::new(ManagerState::Uninitialized),
            init_lock: Mutex::new(()),
            reload_lock: Mutex::new(()),
            services: DashMap::new(),
        }
    }

    pub fn storage(&self) -> &Arc<ModelStorage> {
        &self.storage
    }

    pub async fn state(&self) -> ManagerState {
        *self.state.read().await
    }

    /// Initialize all model types, exactly once under concurrency.
    ///
    /// Concurrent callers race on the fast-path read, then serialize on the
    /// init lock and re-check; only the winner builds services. A `Failed`
    /// manager is retryable: the next caller runs the full pass again.
    /// Succeeds when at least one model type becomes ready.
    pub async fn ensure_ready(&self) -> Result<(), ModelError> {
        if *self.state.read().await == ManagerState::Ready {
            return Ok(());
        }

        let _guard = self.init_lock.lock().await;
        if *self.state.read().await == ManagerState::Ready {
            return Ok(());
        }

        *self.state.write().await = ManagerState::Initializing;
        tracing::info!("Initializing model services");

        let mut ready = 0usize;
        for kind in ModelKind::ALL {
            match self.build_service(kind).await {
                Ok(service) => {
                    self.services.insert(kind, service);
                    ready += 1;
                }
                Err(err) => {
                    // One model type failing must not take down the others
                    tracing::error!(model = %kind, error = %err, "Model service failed to initialize");
                }
            }
        }

        if ready > 0 {
            *self.state.write().await = ManagerState::Ready;
            tracing::info!(ready, total = ModelKind::ALL.len(), "Model manager ready");
            Ok(())
        } else {
            *self.state.write().await = ManagerState::Failed;
            Err(ModelError::ManagerFailed)
        }
    }

    async fn build_service(&self, kind: ModelKind) -> Result<Arc<dyn ModelService>, ModelError> {
        let service = self.factory.build(kind, Arc::clone(&self.storage)).await?;
        service
            .initialize()
            .await
            .map_err(|err| ModelError::InitializationFailure {
                model_type: kind.service_name().to_string(),
                reason: err.to_string(),
            })?;
        Ok(service)
    }

    /// Current handle for a model type.
    ///
    /// The returned `Arc` stays valid across reloads; a reload swaps the slot
    /// but never invalidates handles already cloned out.
    pub fn model(&self, kind: ModelKind) -> Result<Arc<dyn ModelService>, ModelError> {
        self.services
            .get(&kind)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or_else(|| ModelError::NotAvailable(kind.service_name().to_string()))
    }

    /// Rebuild targeted services and swap them in.
    ///
    /// A fresh service is built and initialized off to the side; the slot is
    /// swapped only once the new service reports loaded. In-flight work on
    /// the old handle is never disrupted. Reload passes are serialized.
    pub async fn reload(&self, target: ReloadTarget) -> ReloadReport {
        let _guard = self.reload_lock.lock().await;

        let kinds: Vec<ModelKind> = match target {
            ReloadTarget::All => ModelKind::ALL.to_vec(),
            ReloadTarget::One(kind) => vec![kind],
        };

        let mut report = ReloadReport::default();
        for kind in kinds {
            let name = kind.service_name().to_string();
            let outcome = match self.build_service(kind).await {
                Ok(service) if service.loaded() => {
                    self.services.insert(kind, service);
                    tracing::info!(model = %kind, "Reloaded model service");
                    ReloadOutcome::Swapped
                }
                Ok(_) => {
                    let reason = "rebuilt service did not reach loaded state".to_string();
                    tracing::warn!(model = %kind, reason = %reason, "Reload kept previous service");
                    if self.services.contains_key(&kind) {
                        ReloadOutcome::KeptPrevious { reason }
                    } else {
                        ReloadOutcome::Failed { reason }
                    }
                }
                Err(err) => {
                    let reason = err.to_string();
                    tracing::error!(model = %kind, error = %reason, "Reload failed");
                    if self.services.contains_key(&kind) {
                        ReloadOutcome::KeptPrevious { reason }
                    } else {
                        ReloadOutcome::Failed { reason }
                    }
                }
            };
            report.outcomes.insert(name, outcome);
        }

        report
    }

    /// Snapshot of manager and per-model state
    pub async fn info(&self) -> ManagerInfo {
        let initialized = *self.state.read().await == ManagerState::Ready;

        let mut models = BTreeMap::new();
        for kind in ModelKind::ALL {
            if let Some(entry) = self.services.get(&kind) {
                let service = entry.value();
                models.insert(
                    kind.service_name().to_string(),
                    ModelInfo {
                        loaded: service.loaded(),
                        model_type: kind.service_name().to_string(),
                        version: service.model_version(),
                        shared_by: kind.shared_by().iter().map(|s| s.to_string()).collect(),
                    },
                );
            }
        }

        ManagerInfo {
            initialized,
            architecture: "central_stack".to_string(),
            models,
        }
    }
}
