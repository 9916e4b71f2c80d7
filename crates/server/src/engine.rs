//! # Recommendation Engine
//!
//! Serving entry point. Ties the data index, the model lifecycle, the hybrid
//! scorer and the cache together:
//! 1. Look up the cache (hit returns `source = cache`)
//! 2. Take a snapshot of the serving generation
//! 3. Fetch the user's history once and score on the blocking pool
//! 4. Cache personalized results
//!
//! A request never fails. Whatever goes wrong downstream turns into the
//! popularity fallback.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use data_loader::{DataIndex, ItemId, PopularityProvider, Repository, UserId};
use models::{ModelError, build_user_context};
use pipeline::{
    Catalog, EvaluationConfig, EvaluationReport, Evaluator, HybridRecommender, HybridScorer,
    Recommendation, RecommendationSource,
};
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::cache::{InMemoryCache, RecommendationCache, cache_key};
use crate::config::EngineConfig;
use crate::generation::{ModelGeneration, ServingSlot};
use crate::lifecycle::{LifecycleError, LifecycleStatus, ModelLifecycle, TrainingOutcome};
use crate::persistence::{FileModelStore, InMemoryModelStore, ModelStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecommendationRequest {
    pub user_id: UserId,
    /// Item being viewed; excluded from the result and used to anchor the
    /// fallback on its category
    pub item_id: Option<ItemId>,
    pub n: usize,
}

impl RecommendationRequest {
    pub fn new(user_id: UserId, n: usize) -> Self {
        Self {
            user_id,
            item_id: None,
            n,
        }
    }

    pub fn excluding(mut self, item_id: ItemId) -> Self {
        self.item_id = Some(item_id);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecommendationResponse {
    pub items: Vec<ItemId>,
    pub source: RecommendationSource,
}

/// A training pass plus the evaluation of the generation it produced
#[derive(Debug, Clone, Serialize)]
pub struct TrainingReport {
    pub outcome: TrainingOutcome,
    /// `None` when there was not enough held-out data to evaluate
    pub evaluation: Option<EvaluationReport>,
}

#[derive(Clone)]
pub struct RecommendationEngine {
    index: Arc<DataIndex>,
    lifecycle: Arc<ModelLifecycle>,
    scorer: Arc<HybridScorer>,
    evaluation: EvaluationConfig,
    cache: Option<Arc<dyn RecommendationCache>>,
    cache_ttl: Duration,
}

impl RecommendationEngine {
    /// Build an engine with the store named in `config`
    pub fn new(index: Arc<DataIndex>, config: &EngineConfig) -> Result<Self> {
        let store: Arc<dyn ModelStore> = match &config.store.directory {
            Some(directory) => Arc::new(FileModelStore::open(directory).with_context(|| {
                format!("Failed to open model store at {}", directory.display())
            })?),
            None => Arc::new(InMemoryModelStore::new()),
        };
        Ok(Self::with_store(index, config, store))
    }

    /// Build an engine around an explicit model store
    pub fn with_store(
        index: Arc<DataIndex>,
        config: &EngineConfig,
        store: Arc<dyn ModelStore>,
    ) -> Self {
        // Untrained placeholder still knows the catalog, so fallbacks can
        // anchor on categories before the first training pass
        let placeholder = ModelGeneration {
            catalog: Catalog::from_items(&index.get_all_items()),
            ..ModelGeneration::empty()
        };
        let slot = Arc::new(ServingSlot::new(placeholder));
        let lifecycle = Arc::new(ModelLifecycle::new(
            index.clone(),
            store,
            slot,
            config.training,
        ));
        let scorer = Arc::new(HybridScorer::new(index.clone()).with_config(config.scoring));
        let cache = config
            .cache
            .enabled
            .then(|| {
                Arc::new(InMemoryCache::new(config.cache.max_entries)) as Arc<dyn RecommendationCache>
            });

        Self {
            index,
            lifecycle,
            scorer,
            evaluation: config.evaluation,
            cache,
            cache_ttl: config.cache.ttl(),
        }
    }

    /// Replace the cache implementation
    pub fn with_cache(mut self, cache: Arc<dyn RecommendationCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn without_cache(mut self) -> Self {
        self.cache = None;
        self
    }

    pub fn index(&self) -> &Arc<DataIndex> {
        &self.index
    }

    pub fn lifecycle(&self) -> &Arc<ModelLifecycle> {
        &self.lifecycle
    }

    /// Snapshot of the serving generation
    pub fn current_generation(&self) -> Arc<ModelGeneration> {
        self.lifecycle.slot().current()
    }

    pub fn status(&self) -> LifecycleStatus {
        self.lifecycle.status()
    }

    /// Main entry point: ranked items for one request
    #[instrument(skip(self, request), fields(user_id = request.user_id, n = request.n))]
    pub async fn recommend(&self, request: RecommendationRequest) -> RecommendationResponse {
        let start = Instant::now();
        let key = cache_key(request.user_id, request.item_id, request.n);

        if let Some(cache) = &self.cache {
            if let Some(items) = cache.get(&key) {
                debug!(returned = items.len(), "Cache hit");
                return RecommendationResponse {
                    items,
                    source: RecommendationSource::Cache,
                };
            }
        }

        let recommendation = self.explain(request).await;

        // Only personalized lists are worth caching
        if recommendation.source == RecommendationSource::Hybrid {
            if let Some(cache) = &self.cache {
                cache.put(&key, recommendation.items.clone(), self.cache_ttl);
            }
        }

        info!(
            returned = recommendation.items.len(),
            source = %recommendation.source,
            elapsed = ?start.elapsed(),
            "Recommendation served"
        );
        RecommendationResponse {
            items: recommendation.items,
            source: recommendation.source,
        }
    }

    /// Score a request without the cache, keeping per-candidate scores
    pub async fn explain(&self, request: RecommendationRequest) -> Recommendation {
        // Snapshot once; a concurrent swap does not affect this request
        let generation = self.current_generation();

        let task = tokio::task::spawn_blocking({
            let generation = Arc::clone(&generation);
            let index = Arc::clone(&self.index);
            let scorer = Arc::clone(&self.scorer);
            move || {
                let context = build_user_context(index.as_ref(), request.user_id);
                scorer.recommend(
                    &generation.signals(),
                    &generation.catalog,
                    &context,
                    request.item_id,
                    request.n,
                )
            }
        });

        match task.await {
            Ok(recommendation) => recommendation,
            Err(e) => {
                warn!(error = %e, "Scoring task failed, using popularity fallback");
                self.scorer
                    .fallback(&generation.catalog, request.item_id, request.n)
            }
        }
    }

    /// Train a new generation, then evaluate it
    pub async fn retrain(&self) -> Result<TrainingReport, LifecycleError> {
        let outcome = self.lifecycle.train().await?;

        let evaluation = match self.evaluate(None).await {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(error = %e, "Evaluation of new generation skipped");
                None
            }
        };

        Ok(TrainingReport {
            outcome,
            evaluation,
        })
    }

    /// Start a retrain in the background; rejected while one is running
    pub fn spawn_retrain(
        &self,
    ) -> Result<JoinHandle<Result<TrainingOutcome, LifecycleError>>, LifecycleError> {
        self.lifecycle.spawn_training()
    }

    /// Serve the newest persisted generation, if there is one
    pub async fn restore(&self) -> Result<Option<u64>, LifecycleError> {
        self.lifecycle.restore_latest().await
    }

    /// Offline evaluation of the serving generation
    ///
    /// `held_out_fraction` overrides the configured fraction. An
    /// [`pipeline::EvaluationError`] is returned as is, so callers can tell
    /// "not enough test data" apart from other failures by downcasting.
    pub async fn evaluate(&self, held_out_fraction: Option<f64>) -> Result<EvaluationReport> {
        let generation = self.current_generation();
        let index = Arc::clone(&self.index);
        let scorer = Arc::clone(&self.scorer);
        let config = self.evaluation;
        let fraction = held_out_fraction.unwrap_or(config.held_out_fraction);

        let report = tokio::task::spawn_blocking(move || {
            let recommender = HybridRecommender {
                scorer: &scorer,
                signals: generation.signals(),
                catalog: &generation.catalog,
            };
            Evaluator::new(config).evaluate(
                index.as_ref(),
                &recommender,
                generation.catalog.len(),
                fraction,
            )
        })
        .await??;

        Ok(report)
    }

    /// Items most similar in content to `item_id`
    pub fn similar_items(&self, item_id: ItemId, n: usize) -> Result<Vec<(ItemId, f64)>, ModelError> {
        self.current_generation().content.similar_items(item_id, n)
    }

    /// Catalog items ranked by content similarity to a free-text query
    pub fn search(&self, query: &str, n: usize) -> Result<Vec<(ItemId, f64)>, ModelError> {
        let generation = self.current_generation();
        let ids = generation.catalog.item_ids();
        let scores = generation.content.score_query(query, ids)?;

        let mut hits: Vec<(ItemId, f64)> = ids
            .iter()
            .copied()
            .zip(scores)
            .filter(|(_, score)| *score > 0.0)
            .collect();
        hits.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.0.cmp(&b.0))
        });
        hits.truncate(n);
        Ok(hits)
    }

    /// Popularity list, optionally within one category
    pub fn popular(&self, category: Option<&str>, n: usize) -> Vec<ItemId> {
        self.index.top_popular(category, n)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_builder() {
        let request = RecommendationRequest::new(3, 10).excluding(7);
        assert_eq!(request.user_id, 3);
        assert_eq!(request.item_id, Some(7));
        assert_eq!(request.n, 10);
    }

    #[test]
    fn test_response_serializes_source_lowercase() {
        let response = RecommendationResponse {
            items: vec![1, 2],
            source: RecommendationSource::Fallback,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(json, r#"{"items":[1,2],"source":"fallback"}"#);
    }
}
