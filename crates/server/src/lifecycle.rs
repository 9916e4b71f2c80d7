//! # Model Lifecycle
//!
//! Owns training, persistence and the swap of the serving generation.
//!
//! ## States
//! ```text
//! Uninitialized -> Training -> Ready | Degraded -> Training -> ...
//! ```
//! `Degraded` means one of the two models failed and the generation serves
//! with the other alone. When both fail, or the generation cannot be
//! persisted, nothing is swapped and the state goes back to what it was.
//!
//! ## Training pass
//! 1. Take the training lock (`try_lock`, so a second trigger is rejected)
//! 2. Build the interaction matrix and fit NMF on one blocking task while the
//!    TF-IDF fit runs on another (`tokio::join!`)
//! 3. Assemble the generation and persist it
//! 4. Swap it into the serving slot
//!
//! Requests never wait on any of this: they read the slot, which is only
//! locked for the pointer swap itself.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;

use chrono::{DateTime, Utc};
use data_loader::{Item, Repository};
use models::{CollaborativeModel, ContentModel, InteractionMatrixBuilder, ModelError};
use pipeline::Catalog;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard, watch};
use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, instrument, warn};

use crate::config::TrainingConfig;
use crate::generation::{ModelGeneration, ServingSlot};
use crate::persistence::{GenerationBlob, ModelStore, StoreError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    Uninitialized,
    Training,
    Ready,
    Degraded,
}

impl fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleState::Uninitialized => "uninitialized",
            LifecycleState::Training => "training",
            LifecycleState::Ready => "ready",
            LifecycleState::Degraded => "degraded",
        };
        f.write_str(name)
    }
}

#[derive(Error, Debug)]
pub enum LifecycleError {
    #[error("A training pass is already running")]
    AlreadyTraining,

    /// Both models failed; the previous generation keeps serving
    #[error("Training failed (collaborative: {collaborative}; content: {content})")]
    TrainingFailed {
        collaborative: String,
        content: String,
    },

    #[error("Persistence failed: {0}")]
    Persistence(#[from] StoreError),

    #[error("Generation serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Background task failed: {0}")]
    Join(#[from] JoinError),
}

/// A model that did not make it into the generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelFailure {
    pub model: &'static str,
    pub reason: String,
}

/// Result of a completed training pass
#[derive(Debug, Clone, Serialize)]
pub struct TrainingOutcome {
    pub generation_id: u64,
    pub state: LifecycleState,
    pub failures: Vec<ModelFailure>,
    pub elapsed_ms: u64,
}

/// Snapshot of lifecycle and serving generation
#[derive(Debug, Clone, Serialize)]
pub struct LifecycleStatus {
    pub state: LifecycleState,
    pub generation_id: u64,
    pub trained_at: Option<DateTime<Utc>>,
    pub users: usize,
    pub items: usize,
    pub vocabulary_size: usize,
    pub collaborative_ready: bool,
    pub content_ready: bool,
}

pub struct ModelLifecycle {
    repo: Arc<dyn Repository>,
    store: Arc<dyn ModelStore>,
    slot: Arc<ServingSlot>,
    config: TrainingConfig,
    train_lock: Arc<Mutex<()>>,
    state: watch::Sender<LifecycleState>,
    next_id: AtomicU64,
}

impl ModelLifecycle {
    /// Create a lifecycle serving an untrained placeholder
    ///
    /// Generation ids continue after the highest id already in `store`.
    pub fn new(
        repo: Arc<dyn Repository>,
        store: Arc<dyn ModelStore>,
        slot: Arc<ServingSlot>,
        config: TrainingConfig,
    ) -> Self {
        let next_id = match store.latest() {
            Ok(latest) => latest.map_or(1, |id| id + 1),
            Err(e) => {
                warn!(error = %e, "Could not read latest stored generation");
                1
            }
        };
        let (state, _) = watch::channel(LifecycleState::Uninitialized);

        Self {
            repo,
            store,
            slot,
            config,
            train_lock: Arc::new(Mutex::new(())),
            state,
            next_id: AtomicU64::new(next_id),
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.borrow()
    }

    /// Receiver notified on every state change
    pub fn subscribe(&self) -> watch::Receiver<LifecycleState> {
        self.state.subscribe()
    }

    pub fn slot(&self) -> &Arc<ServingSlot> {
        &self.slot
    }

    pub fn config(&self) -> &TrainingConfig {
        &self.config
    }

    pub fn status(&self) -> LifecycleStatus {
        let generation = self.slot.current();
        LifecycleStatus {
            state: self.state(),
            generation_id: generation.id,
            trained_at: generation.trained_at,
            users: generation.user_count(),
            items: generation.catalog.len(),
            vocabulary_size: generation.vocabulary_size(),
            collaborative_ready: generation.collaborative.is_ready(),
            content_ready: generation.content.is_ready(),
        }
    }

    /// Run a training pass to completion
    pub async fn train(&self) -> Result<TrainingOutcome, LifecycleError> {
        let guard = self.acquire()?;
        self.run(guard).await
    }

    /// Start a training pass in the background
    ///
    /// The lock is taken before spawning, so a trigger that arrives while
    /// a pass is running is rejected here rather than inside the task.
    pub fn spawn_training(
        self: &Arc<Self>,
    ) -> Result<JoinHandle<Result<TrainingOutcome, LifecycleError>>, LifecycleError> {
        let guard = self.acquire()?;
        let this = Arc::clone(self);
        Ok(tokio::spawn(async move { this.run(guard).await }))
    }

    /// Load the newest persisted generation and make it current
    ///
    /// Returns the restored id, or `None` when the store is empty.
    #[instrument(skip(self))]
    pub async fn restore_latest(&self) -> Result<Option<u64>, LifecycleError> {
        let _guard = self.acquire()?;

        let store = Arc::clone(&self.store);
        let loaded = tokio::task::spawn_blocking(move || -> Result<_, StoreError> {
            match store.latest()? {
                Some(id) => Ok(Some(store.load(id)?)),
                None => Ok(None),
            }
        })
        .await??;

        let Some(bytes) = loaded else {
            info!("No persisted generation to restore");
            return Ok(None);
        };

        let generation = GenerationBlob::decode(&bytes)?.into_generation();
        let id = generation.id;
        let state = if generation.is_partial() {
            LifecycleState::Degraded
        } else if generation.is_ready() {
            LifecycleState::Ready
        } else {
            LifecycleState::Uninitialized
        };

        self.next_id.fetch_max(id + 1, Ordering::SeqCst);
        self.slot.swap(Arc::new(generation));
        self.state.send_replace(state);

        info!(generation_id = id, %state, "Restored persisted generation");
        Ok(Some(id))
    }

    fn acquire(&self) -> Result<OwnedMutexGuard<()>, LifecycleError> {
        Arc::clone(&self.train_lock)
            .try_lock_owned()
            .map_err(|_| LifecycleError::AlreadyTraining)
    }

    /// One guarded training pass; restores the prior state on failure
    #[instrument(skip(self, _guard))]
    async fn run(&self, _guard: OwnedMutexGuard<()>) -> Result<TrainingOutcome, LifecycleError> {
        let previous = self.state.send_replace(LifecycleState::Training);
        info!(%previous, "Training pass started");

        match self.pass().await {
            Ok(outcome) => {
                self.state.send_replace(outcome.state);
                info!(
                    generation_id = outcome.generation_id,
                    state = %outcome.state,
                    elapsed_ms = outcome.elapsed_ms,
                    "Training pass complete"
                );
                Ok(outcome)
            }
            Err(e) => {
                self.state.send_replace(previous);
                error!(error = %e, "Training pass failed, previous generation keeps serving");
                Err(e)
            }
        }
    }

    async fn pass(&self) -> Result<TrainingOutcome, LifecycleError> {
        let start = Instant::now();
        let config = self.config;
        let items: Arc<Vec<Item>> = Arc::new(self.repo.get_all_items());

        // Step 1: both fits concurrently on the blocking pool
        let (collaborative, content) = tokio::join!(
            tokio::task::spawn_blocking({
                let repo = Arc::clone(&self.repo);
                move || fit_collaborative(repo.as_ref(), &config)
            }),
            tokio::task::spawn_blocking({
                let items = Arc::clone(&items);
                move || fit_content(&items, &config)
            })
        );

        // Step 2: keep what trained
        let mut failures = Vec::new();
        let collaborative = match settle(collaborative) {
            Ok(model) => model,
            Err(reason) => {
                warn!(model = "collaborative", %reason, "Model failed to train");
                failures.push(ModelFailure {
                    model: "collaborative",
                    reason,
                });
                CollaborativeModel::new(config.nmf)
            }
        };
        let content = match settle(content) {
            Ok(model) => model,
            Err(reason) => {
                warn!(model = "content", %reason, "Model failed to train");
                failures.push(ModelFailure {
                    model: "content",
                    reason,
                });
                ContentModel::new(config.content)
            }
        };

        if !collaborative.is_ready() && !content.is_ready() {
            let reason_of = |model: &str| {
                failures
                    .iter()
                    .find(|f| f.model == model)
                    .map(|f| f.reason.clone())
                    .unwrap_or_default()
            };
            return Err(LifecycleError::TrainingFailed {
                collaborative: reason_of("collaborative"),
                content: reason_of("content"),
            });
        }

        // Step 3: assemble and persist
        let generation = ModelGeneration {
            id: self.next_id.fetch_add(1, Ordering::SeqCst),
            trained_at: Some(Utc::now()),
            collaborative,
            content,
            catalog: Catalog::from_items(&items),
        };
        self.persist(&generation).await?;

        // Step 4: swap
        let generation_id = generation.id;
        let state = if failures.is_empty() {
            LifecycleState::Ready
        } else {
            LifecycleState::Degraded
        };
        self.slot.swap(Arc::new(generation));

        Ok(TrainingOutcome {
            generation_id,
            state,
            failures,
            elapsed_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn persist(&self, generation: &ModelGeneration) -> Result<(), LifecycleError> {
        let bytes = GenerationBlob::from_generation(generation).encode()?;
        let store = Arc::clone(&self.store);
        let id = generation.id;
        let size = bytes.len();

        tokio::task::spawn_blocking(move || store.save(id, &bytes)).await??;
        info!(generation_id = id, bytes = size, "Persisted generation");
        Ok(())
    }
}

fn fit_collaborative(
    repo: &dyn Repository,
    config: &TrainingConfig,
) -> Result<CollaborativeModel, ModelError> {
    let matrix = InteractionMatrixBuilder::new(repo)
        .with_quality_weights(config.quality)
        .build()?;
    let mut model = CollaborativeModel::new(config.nmf);
    model.fit(&matrix)?;
    Ok(model)
}

fn fit_content(items: &[Item], config: &TrainingConfig) -> Result<ContentModel, ModelError> {
    let mut model = ContentModel::new(config.content);
    model.fit(items)?;
    Ok(model)
}

/// Collapse a fit task's join and model errors into a reason string
fn settle<M>(result: Result<Result<M, ModelError>, JoinError>) -> Result<M, String> {
    match result {
        Ok(Ok(model)) => Ok(model),
        Ok(Err(e)) => Err(e.to_string()),
        Err(e) => Err(format!("fit task failed: {e}")),
    }
}
