//! User-item interaction matrix.
//!
//! Rows are users, columns are items, and every cell is the sum of the
//! quality-weighted contributions of that user's records for that item.
//!
//! ## Algorithm
//! 1. Fetch users and items once, assigning row/column positions in id order
//! 2. For every user (in parallel), fold their orders, ratings and searches
//!    into a dense row: `contribution = base_value(kind) * quality_weight`
//! 3. Stack the rows into an `Array2<f64>`
//!
//! Records pointing at items outside the catalog are skipped and counted.

use crate::error::{ModelError, Result};
use data_loader::{InteractionKind, InteractionRecord, Repository, UserId};
use ndarray::Array2;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info};

/// Stable mapping between opaque ids and matrix positions
///
/// Serialized as the ordered id list; the reverse lookup is rebuilt on load.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "Vec<u32>", into = "Vec<u32>")]
pub struct IndexMapping {
    ids: Vec<u32>,
    positions: HashMap<u32, usize>,
}

impl IndexMapping {
    pub fn new(ids: Vec<u32>) -> Self {
        let positions = ids.iter().enumerate().map(|(pos, &id)| (id, pos)).collect();
        Self { ids, positions }
    }

    pub fn position(&self, id: u32) -> Option<usize> {
        self.positions.get(&id).copied()
    }

    pub fn id_at(&self, position: usize) -> Option<u32> {
        self.ids.get(position).copied()
    }

    pub fn ids(&self) -> &[u32] {
        &self.ids
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl From<Vec<u32>> for IndexMapping {
    fn from(ids: Vec<u32>) -> Self {
        Self::new(ids)
    }
}

impl From<IndexMapping> for Vec<u32> {
    fn from(mapping: IndexMapping) -> Self {
        mapping.ids
    }
}

/// Multipliers applied to every contribution based on where it came from
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QualityWeights {
    /// Weight of any non-synthetic purchase or rating
    pub real: f64,
    pub synthetic_purchase: f64,
    pub synthetic_rating: f64,
    /// Fixed contribution of one search event, real or synthetic
    pub search: f64,
}

impl Default for QualityWeights {
    fn default() -> Self {
        Self {
            real: 1.0,
            synthetic_purchase: 0.5,
            synthetic_rating: 0.6,
            search: 0.5,
        }
    }
}

impl QualityWeights {
    /// Weighted contribution of a single record
    ///
    /// Purchases count 1.0 and ratings `rating / 5` before weighting. A search
    /// always adds `self.search`; synthetic origin does not discount it.
    pub fn contribution(&self, record: &InteractionRecord) -> f64 {
        match record.kind {
            InteractionKind::Purchase => {
                if record.is_synthetic {
                    self.synthetic_purchase
                } else {
                    self.real
                }
            }
            InteractionKind::Rating => {
                let base = f64::from(record.value.unwrap_or(0.0)) / 5.0;
                let weight = if record.is_synthetic {
                    self.synthetic_rating
                } else {
                    self.real
                };
                base * weight
            }
            InteractionKind::Search => self.search,
        }
    }
}

/// Dense interaction matrix plus the mappings that address it
#[derive(Debug, Clone)]
pub struct InteractionMatrix {
    pub values: Array2<f64>,
    pub users: IndexMapping,
    pub items: IndexMapping,
    /// Records dropped because their item is not in the catalog
    pub skipped_records: usize,
}

impl InteractionMatrix {
    pub fn shape(&self) -> (usize, usize) {
        self.values.dim()
    }

    pub fn nnz(&self) -> usize {
        self.values.iter().filter(|&&v| v != 0.0).count()
    }

    /// Cell value by ids, 0.0 when either id is unknown
    pub fn get(&self, user_id: UserId, item_id: u32) -> f64 {
        match (self.users.position(user_id), self.items.position(item_id)) {
            (Some(row), Some(col)) => self.values[[row, col]],
            _ => 0.0,
        }
    }
}

/// Builds the interaction matrix from a repository snapshot
pub struct InteractionMatrixBuilder<'a> {
    repo: &'a dyn Repository,
    weights: QualityWeights,
}

impl<'a> InteractionMatrixBuilder<'a> {
    pub fn new(repo: &'a dyn Repository) -> Self {
        Self {
            repo,
            weights: QualityWeights::default(),
        }
    }

    /// Override the quality weights (default: 1.0 / 0.5 / 0.6, search 0.5)
    pub fn with_quality_weights(mut self, weights: QualityWeights) -> Self {
        self.weights = weights;
        self
    }

    pub fn build(&self) -> Result<InteractionMatrix> {
        let start = Instant::now();

        // Step 1: index mappings, fixed for the whole pass
        let users = IndexMapping::new(self.repo.get_all_users().iter().map(|u| u.id).collect());
        let items = IndexMapping::new(self.repo.get_all_items().iter().map(|i| i.id).collect());
        let (n_users, n_items) = (users.len(), items.len());

        // Step 2: one dense row per user, built in parallel
        let rows: Vec<(Vec<f64>, usize)> = users
            .ids()
            .par_iter()
            .map(|&user_id| self.build_row(user_id, &items))
            .collect();

        // Step 3: stack rows
        let mut skipped_records = 0;
        let mut flat = Vec::with_capacity(n_users * n_items);
        for (row, skipped) in rows {
            flat.extend(row);
            skipped_records += skipped;
        }
        let values = Array2::from_shape_vec((n_users, n_items), flat)
            .map_err(|e| ModelError::InsufficientData(e.to_string()))?;

        let matrix = InteractionMatrix {
            values,
            users,
            items,
            skipped_records,
        };

        let nnz = matrix.nnz();
        if skipped_records > 0 {
            debug!(skipped_records, "Skipped records for items outside the catalog");
        }
        if nnz == 0 {
            return Err(ModelError::InsufficientData(format!(
                "interaction matrix {}x{} has no non-zero entries",
                n_users, n_items
            )));
        }

        info!(
            users = n_users,
            items = n_items,
            nnz,
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Built interaction matrix"
        );
        Ok(matrix)
    }

    fn build_row(&self, user_id: UserId, items: &IndexMapping) -> (Vec<f64>, usize) {
        let mut row = vec![0.0; items.len()];
        let mut skipped = 0;

        let records = self
            .repo
            .get_orders(user_id)
            .into_iter()
            .chain(self.repo.get_ratings(user_id))
            .chain(self.repo.get_searches(user_id));

        for record in records {
            match items.position(record.item_id) {
                Some(col) => row[col] += self.weights.contribution(&record),
                None => skipped += 1,
            }
        }
        (row, skipped)
    }
}
