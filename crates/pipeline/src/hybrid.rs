//! HybridScorer - blends collaborative and content signals into one ranking
//!
//! ## Algorithm
//! 1. Candidates = catalog - interacted items - excluded item (filter pipeline)
//! 2. Raw collaborative scores, if that model is ready and knows the user
//! 3. Raw content scores, if that model is ready; similarity to the viewed
//!    item when there is one in the corpus, else to the user's history
//! 4. Min-max normalize each present signal over the candidate set
//! 5. `score = 0.7·cf + 0.3·cb` when both are present, else the present one
//! 6. Consensus boost: ×1.2 for candidates in both raw top-(2n) lists
//! 7. Category diversity re-ranking
//! 8. Truncate to n
//!
//! With no usable signal, or no candidates left, the popularity fallback
//! answers instead and the result is tagged `Fallback`.

use crate::candidate::{Candidate, Catalog};
use crate::diversity::{DiversityConfig, diversify};
use crate::filter_pipeline::FilterPipeline;
use crate::normalize::min_max;
use data_loader::{ItemId, PopularityProvider};
use models::{ModelError, ScoringModel, UserContext};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, instrument, warn};

/// Weights and constants of the blend
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HybridConfig {
    pub collaborative_weight: f64,
    pub content_weight: f64,
    pub consensus_boost: bool,
    pub consensus_factor: f64,
    /// K = consensus_depth × n for the raw top-K agreement check
    pub consensus_depth: usize,
    pub diversity: DiversityConfig,
}

impl Default for HybridConfig {
    fn default() -> Self {
        Self {
            collaborative_weight: 0.7,
            content_weight: 0.3,
            consensus_boost: true,
            consensus_factor: 1.2,
            consensus_depth: 2,
            diversity: DiversityConfig::default(),
        }
    }
}

/// Where a recommendation list came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecommendationSource {
    /// Personalized blend of the models
    Hybrid,
    /// Non-personalized popularity list
    Fallback,
    /// Served from the recommendation cache
    Cache,
}

impl fmt::Display for RecommendationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RecommendationSource::Hybrid => "hybrid",
            RecommendationSource::Fallback => "fallback",
            RecommendationSource::Cache => "cache",
        };
        f.write_str(name)
    }
}

/// Final ranked list plus the scored candidates behind it
#[derive(Debug, Clone, PartialEq)]
pub struct Recommendation {
    pub items: Vec<ItemId>,
    pub source: RecommendationSource,
    /// Scored candidates in final order (empty for fallback lists)
    pub scored: Vec<Candidate>,
}

impl Recommendation {
    fn fallback(items: Vec<ItemId>) -> Self {
        Self {
            items,
            source: RecommendationSource::Fallback,
            scored: Vec::new(),
        }
    }
}

/// The two models consulted for one request
#[derive(Clone, Copy)]
pub struct Signals<'a> {
    pub collaborative: &'a dyn ScoringModel,
    pub content: &'a dyn ScoringModel,
}

impl Signals<'_> {
    pub fn any_ready(&self) -> bool {
        self.collaborative.is_ready() || self.content.is_ready()
    }
}

/// Produces the final recommendation list for a request
pub struct HybridScorer {
    config: HybridConfig,
    popularity: Arc<dyn PopularityProvider>,
}

impl HybridScorer {
    pub fn new(popularity: Arc<dyn PopularityProvider>) -> Self {
        Self {
            config: HybridConfig::default(),
            popularity,
        }
    }

    /// Override weights and constants
    pub fn with_config(mut self, config: HybridConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &HybridConfig {
        &self.config
    }

    /// Rank up to `n` items for the user described by `context`
    #[instrument(skip(self, signals, catalog, context), fields(user_id = context.user_id))]
    pub fn recommend(
        &self,
        signals: &Signals<'_>,
        catalog: &Catalog,
        context: &UserContext,
        exclude_item: Option<ItemId>,
        n: usize,
    ) -> Recommendation {
        if !signals.any_ready() {
            debug!("No model ready, using popularity fallback");
            return self.fallback(catalog, exclude_item, n);
        }

        // Step 1: candidate set
        let candidates = match FilterPipeline::for_request(exclude_item)
            .apply(catalog.candidates(), context)
        {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!(error = %e, "Candidate filtering failed, using popularity fallback");
                return self.fallback(catalog, exclude_item, n);
            }
        };
        if candidates.is_empty() {
            debug!("Empty candidate set, using popularity fallback");
            return self.fallback(catalog, exclude_item, n);
        }
        let n = n.min(candidates.len());

        // Steps 2-3: raw signals
        let context = match exclude_item {
            Some(viewed) if context.viewed_item != Some(viewed) => {
                Cow::Owned(context.clone().with_viewed_item(viewed))
            }
            _ => Cow::Borrowed(context),
        };
        let ids: Vec<ItemId> = candidates.iter().map(|c| c.item_id).collect();
        let collaborative = raw_signal(signals.collaborative, &context, &ids);
        let content = raw_signal(signals.content, &context, &ids);

        if collaborative.is_none() && content.is_none() {
            debug!("No usable signal for user, using popularity fallback");
            return self.fallback(catalog, exclude_item, n);
        }

        // Steps 4-6: normalize, blend, boost
        let scored = self.combine(candidates, collaborative, content, n);

        // Steps 7-8: diversity re-ranking and truncation
        let ranked = diversify(scored, n, &self.config.diversity);

        debug!(
            returned = ranked.len(),
            boosted = ranked.iter().filter(|c| c.boosted).count(),
            "Hybrid ranking complete"
        );

        Recommendation {
            items: ranked.iter().map(|c| c.item_id).collect(),
            source: RecommendationSource::Hybrid,
            scored: ranked,
        }
    }

    /// Popularity list, anchored on the excluded item's category when there is one
    pub fn fallback(
        &self,
        catalog: &Catalog,
        exclude_item: Option<ItemId>,
        n: usize,
    ) -> Recommendation {
        let Some(anchor) = exclude_item else {
            return Recommendation::fallback(self.popularity.top_popular(None, n));
        };

        if let Some(category) = catalog.category(anchor) {
            let in_category: Vec<ItemId> = self
                .popularity
                .top_popular(Some(category), n.saturating_add(1))
                .into_iter()
                .filter(|&id| id != anchor)
                .take(n)
                .collect();
            if !in_category.is_empty() {
                return Recommendation::fallback(in_category);
            }
        }

        Recommendation::fallback(
            self.popularity
                .top_popular(None, n.saturating_add(1))
                .into_iter()
                .filter(|&id| id != anchor)
                .take(n)
                .collect(),
        )
    }

    /// Normalize, weight and boost; returns candidates sorted best first
    fn combine(
        &self,
        mut candidates: Vec<Candidate>,
        collaborative: Option<Vec<f64>>,
        content: Option<Vec<f64>>,
        n: usize,
    ) -> Vec<Candidate> {
        let cf_norm = collaborative.as_deref().map(min_max);
        let cb_norm = content.as_deref().map(min_max);

        let consensus: HashSet<usize> = match (&collaborative, &content) {
            (Some(cf), Some(cb)) if self.config.consensus_boost => {
                let k = self.config.consensus_depth.saturating_mul(n);
                let top_cf = top_k_positions(cf, k);
                top_k_positions(cb, k)
                    .intersection(&top_cf)
                    .copied()
                    .collect()
            }
            _ => HashSet::new(),
        };

        for (pos, candidate) in candidates.iter_mut().enumerate() {
            candidate.collaborative = collaborative.as_ref().map(|v| v[pos]);
            candidate.content = content.as_ref().map(|v| v[pos]);

            candidate.score = match (&cf_norm, &cb_norm) {
                (Some(cf), Some(cb)) => {
                    self.config.collaborative_weight * cf[pos]
                        + self.config.content_weight * cb[pos]
                }
                (Some(cf), None) => cf[pos],
                (None, Some(cb)) => cb[pos],
                (None, None) => 0.0,
            };

            if consensus.contains(&pos) {
                candidate.score *= self.config.consensus_factor;
                candidate.boosted = true;
            }
        }

        candidates.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.item_id.cmp(&b.item_id))
        });
        candidates
    }
}

/// Raw scores of one model, or `None` when the signal is absent
///
/// Absent means: model unready, user unknown to it, any scoring error, or a
/// vector with no positive score (nothing to rank by).
fn raw_signal(
    model: &dyn ScoringModel,
    context: &UserContext,
    candidates: &[ItemId],
) -> Option<Vec<f64>> {
    if !model.is_ready() {
        return None;
    }
    match model.score_candidates(context, candidates) {
        Ok(scores) if scores.iter().any(|&s| s > 0.0) => Some(scores),
        Ok(_) => {
            debug!(model = model.name(), "Signal has no positive scores");
            None
        }
        Err(ModelError::UnknownUser { user_id }) => {
            debug!(model = model.name(), user_id, "User unknown to model");
            None
        }
        Err(e) => {
            warn!(model = model.name(), error = %e, "Model scoring failed");
            None
        }
    }
}

/// Positions of the `k` highest scores; ties resolve to the earlier position
fn top_k_positions(scores: &[f64], k: usize) -> HashSet<usize> {
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| {
        scores[b]
            .partial_cmp(&scores[a])
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.cmp(&b))
    });
    order.into_iter().take(k).collect()
}
