//! Offline evaluation against held-out real interactions.
//!
//! ## Algorithm
//! 1. For every user, sort their **real** purchase and rating records by
//!    timestamp and hold out the most recent `held_out_fraction` of them
//!    (at least one). Synthetic records never enter the test set.
//! 2. Rebuild the user's context from the remaining records and forget the
//!    held-out items, so they are recommendable again.
//! 3. Ask the recommender for the top N and intersect with the held-out items.
//! 4. Micro-average: sum hits, recommended and relevant counts over all users
//!    before dividing.
//!
//! Users are evaluated in parallel.

use crate::candidate::Catalog;
use crate::hybrid::{HybridScorer, Signals};
use data_loader::{InteractionKind, InteractionRecord, ItemId, Repository, UserId};
use models::UserContext;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{info, instrument};

#[derive(Error, Debug, Clone, PartialEq)]
pub enum EvaluationError {
    #[error("Only {found} users have held-out data, at least {required} required")]
    InsufficientTestData { found: usize, required: usize },

    #[error("Held-out fraction must be in (0, 1), got {0}")]
    InvalidFraction(f64),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    pub held_out_fraction: f64,
    /// N in precision@N / recall@N
    pub top_n: usize,
    pub min_test_users: usize,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            held_out_fraction: 0.2,
            top_n: 10,
            min_test_users: 1,
        }
    }
}

/// Metrics of one evaluation run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationReport {
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Distinct recommended items / catalog size
    pub coverage: f64,
    pub top_n: usize,
    pub held_out_fraction: f64,
    pub users_evaluated: usize,
    /// Held-out records across all users
    pub test_records: usize,
    pub hits: usize,
    pub recommended: usize,
    pub relevant: usize,
}

/// Anything that can produce a ranked list for a prepared context
pub trait Recommender: Sync {
    fn recommend_for(&self, context: &UserContext, n: usize) -> Vec<ItemId>;
}

/// Recommender over a scorer and a fixed pair of models
pub struct HybridRecommender<'a> {
    pub scorer: &'a HybridScorer,
    pub signals: Signals<'a>,
    pub catalog: &'a Catalog,
}

impl Recommender for HybridRecommender<'_> {
    fn recommend_for(&self, context: &UserContext, n: usize) -> Vec<ItemId> {
        self.scorer
            .recommend(&self.signals, self.catalog, context, None, n)
            .items
    }
}

/// One user's train/test split
#[derive(Debug, Clone)]
pub struct HoldOut {
    pub user_id: UserId,
    /// Records the recommender may see
    pub training: Vec<InteractionRecord>,
    /// Held-out real records, most recent last
    pub test: Vec<InteractionRecord>,
}

impl HoldOut {
    pub fn test_items(&self) -> HashSet<ItemId> {
        self.test.iter().map(|r| r.item_id).collect()
    }
}

/// Split one user's history; `None` when they have no real purchase/rating
pub fn hold_out(
    user_id: UserId,
    records: &[InteractionRecord],
    fraction: f64,
) -> Option<HoldOut> {
    let mut eligible: Vec<usize> = records
        .iter()
        .enumerate()
        .filter(|(_, r)| {
            !r.is_synthetic && matches!(r.kind, InteractionKind::Purchase | InteractionKind::Rating)
        })
        .map(|(pos, _)| pos)
        .collect();
    if eligible.is_empty() {
        return None;
    }

    eligible.sort_by_key(|&pos| (records[pos].timestamp, pos));
    let count = ((eligible.len() as f64 * fraction).floor() as usize).max(1);
    let held: HashSet<usize> = eligible[eligible.len() - count..].iter().copied().collect();

    let mut training = Vec::with_capacity(records.len() - count);
    let mut test = Vec::with_capacity(count);
    for (pos, record) in records.iter().enumerate() {
        if held.contains(&pos) {
            test.push(*record);
        } else {
            training.push(*record);
        }
    }
    test.sort_by_key(|r| r.timestamp);

    Some(HoldOut {
        user_id,
        training,
        test,
    })
}

pub struct Evaluator {
    config: EvaluationConfig,
}

/// Per-user tallies, summed for micro-averaging
#[derive(Default)]
struct Tally {
    users: usize,
    test_records: usize,
    hits: usize,
    recommended: usize,
    relevant: usize,
    distinct: HashSet<ItemId>,
}

impl Tally {
    fn merge(mut self, other: Tally) -> Tally {
        self.users += other.users;
        self.test_records += other.test_records;
        self.hits += other.hits;
        self.recommended += other.recommended;
        self.relevant += other.relevant;
        self.distinct.extend(other.distinct);
        self
    }
}

impl Evaluator {
    pub fn new(config: EvaluationConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EvaluationConfig {
        &self.config
    }

    /// Evaluate `recommender` on every user of `repo`
    #[instrument(skip(self, repo, recommender))]
    pub fn evaluate(
        &self,
        repo: &dyn Repository,
        recommender: &dyn Recommender,
        catalog_size: usize,
        held_out_fraction: f64,
    ) -> Result<EvaluationReport, EvaluationError> {
        if !(held_out_fraction > 0.0 && held_out_fraction < 1.0) {
            return Err(EvaluationError::InvalidFraction(held_out_fraction));
        }

        let splits: Vec<HoldOut> = repo
            .get_all_users()
            .par_iter()
            .filter_map(|user| hold_out(user.id, &repo.get_interactions(user.id), held_out_fraction))
            .collect();

        if splits.len() < self.config.min_test_users.max(1) {
            return Err(EvaluationError::InsufficientTestData {
                found: splits.len(),
                required: self.config.min_test_users.max(1),
            });
        }

        let n = self.config.top_n;
        let tally = splits
            .par_iter()
            .map(|split| {
                let truth = split.test_items();
                let mut context = UserContext::from_records(split.user_id, &split.training);
                context.forget_items(&truth);

                let recommended = recommender.recommend_for(&context, n);
                let hits = recommended.iter().filter(|id| truth.contains(*id)).count();

                Tally {
                    users: 1,
                    test_records: split.test.len(),
                    hits,
                    recommended: recommended.len(),
                    relevant: truth.len(),
                    distinct: recommended.into_iter().collect(),
                }
            })
            .reduce(Tally::default, Tally::merge);

        let precision = ratio(tally.hits, tally.recommended);
        let recall = ratio(tally.hits, tally.relevant);
        let f1 = if precision + recall > 0.0 {
            2.0 * precision * recall / (precision + recall)
        } else {
            0.0
        };

        let report = EvaluationReport {
            precision,
            recall,
            f1,
            coverage: ratio(tally.distinct.len(), catalog_size),
            top_n: n,
            held_out_fraction,
            users_evaluated: tally.users,
            test_records: tally.test_records,
            hits: tally.hits,
            recommended: tally.recommended,
            relevant: tally.relevant,
        };

        info!(
            precision = report.precision,
            recall = report.recall,
            f1 = report.f1,
            coverage = report.coverage,
            users = report.users_evaluated,
            "Evaluation complete"
        );
        Ok(report)
    }
}

fn ratio(numerator: usize, denominator: usize) -> f64 {
    if denominator == 0 {
        0.0
    } else {
        numerator as f64 / denominator as f64
    }
}
