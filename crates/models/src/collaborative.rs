//! Collaborative model - non-negative matrix factorization
//!
//! Factorizes the interaction matrix `V (users x items)` into
//! `W (users x k)` and `H (k x items)` with `V ≈ W·H` and both factors
//! entrywise non-negative.
//!
//! ## Algorithm
//! 1. Seeded random init scaled by `sqrt(mean(V) / k)`
//! 2. Lee–Seung multiplicative updates:
//!    - `H ← H ∘ (Wᵀ V) / (Wᵀ W H)`
//!    - `W ← W ∘ (V Hᵀ) / (W H Hᵀ)`
//! 3. Every 10 iterations, stop once the reconstruction error improved by
//!    less than `tolerance` relative to the initial error
//!
//! Multiplicative updates never flip a sign, so a non-negative start stays
//! non-negative.

use crate::context::UserContext;
use crate::error::{ModelError, Result};
use crate::matrix::{IndexMapping, InteractionMatrix};
use crate::scoring::ScoringModel;
use data_loader::{ItemId, UserId};
use ndarray::{Array2, Zip};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tracing::{debug, info, instrument};

/// Guards the multiplicative update against division by zero
const EPSILON: f64 = 1e-10;

/// How often (in iterations) convergence is checked
const CONVERGENCE_CHECK_INTERVAL: usize = 10;

/// NMF hyper-parameters
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NmfConfig {
    /// Latent dimension k (clamped to the matrix shape at fit time)
    pub components: usize,
    pub max_iter: usize,
    /// Minimum relative error improvement per check before stopping
    pub tolerance: f64,
    pub seed: u64,
}

impl Default for NmfConfig {
    fn default() -> Self {
        Self {
            components: 20,
            max_iter: 500,
            tolerance: 1e-3,
            seed: 42,
        }
    }
}

impl NmfConfig {
    /// Effective k for a `users x items` matrix: at most `min(shape) - 1`, at least 1
    pub fn effective_components(&self, users: usize, items: usize) -> usize {
        self.components
            .min(users.min(items).saturating_sub(1))
            .max(1)
    }
}

/// Output of one factorization, addressed through the generation's mappings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CollaborativeFactors {
    /// users x k
    pub user_factors: Array2<f64>,
    /// items x k
    pub item_factors: Array2<f64>,
    pub users: IndexMapping,
    pub items: IndexMapping,
    pub iterations: usize,
    /// Frobenius norm of `V - W·H` at the end of training
    pub reconstruction_error: f64,
}

impl CollaborativeFactors {
    pub fn components(&self) -> usize {
        self.user_factors.ncols()
    }

    /// `dot(user_factors[row], item_factors[col])`
    pub fn score_at(&self, row: usize, col: usize) -> f64 {
        self.user_factors.row(row).dot(&self.item_factors.row(col))
    }
}

/// Collaborative scoring model
///
/// Unready until a successful `fit` (or `from_factors`); every score query
/// before that fails with `NotReady`.
#[derive(Debug, Clone, Default)]
pub struct CollaborativeModel {
    config: NmfConfig,
    factors: Option<CollaborativeFactors>,
}

impl CollaborativeModel {
    pub fn new(config: NmfConfig) -> Self {
        Self {
            config,
            factors: None,
        }
    }

    /// A ready model over previously trained factors
    pub fn from_factors(config: NmfConfig, factors: CollaborativeFactors) -> Self {
        Self {
            config,
            factors: Some(factors),
        }
    }

    pub fn config(&self) -> &NmfConfig {
        &self.config
    }

    pub fn factors(&self) -> Option<&CollaborativeFactors> {
        self.factors.as_ref()
    }

    pub fn is_ready(&self) -> bool {
        self.factors.is_some()
    }

    /// Train on `matrix`, replacing any previous factors wholesale.
    ///
    /// On error the model keeps whatever factors it had before.
    #[instrument(skip(self, matrix), fields(shape = ?matrix.shape()))]
    pub fn fit(&mut self, matrix: &InteractionMatrix) -> Result<&CollaborativeFactors> {
        let factors = factorize(matrix, &self.config)?;
        Ok(self.factors.insert(factors))
    }

    /// Raw score of one user-item pair by ids
    ///
    /// Unknown items score 0; unknown users are an error.
    pub fn score(&self, user_id: UserId, item_id: ItemId) -> Result<f64> {
        let factors = self.ready_factors()?;
        let row = factors
            .users
            .position(user_id)
            .ok_or(ModelError::UnknownUser { user_id })?;
        Ok(factors
            .items
            .position(item_id)
            .map(|col| factors.score_at(row, col))
            .unwrap_or(0.0))
    }

    /// Raw scores for a user over `items`, aligned with the input order
    pub fn score_items(&self, user_id: UserId, items: &[ItemId]) -> Result<Vec<f64>> {
        let factors = self.ready_factors()?;
        let row = factors
            .users
            .position(user_id)
            .ok_or(ModelError::UnknownUser { user_id })?;
        Ok(items
            .iter()
            .map(|&item_id| {
                factors
                    .items
                    .position(item_id)
                    .map(|col| factors.score_at(row, col))
                    .unwrap_or(0.0)
            })
            .collect())
    }

    fn ready_factors(&self) -> Result<&CollaborativeFactors> {
        self.factors.as_ref().ok_or(ModelError::NotReady {
            model: "collaborative",
        })
    }
}

impl ScoringModel for CollaborativeModel {
    fn name(&self) -> &'static str {
        "collaborative"
    }

    fn is_ready(&self) -> bool {
        CollaborativeModel::is_ready(self)
    }

    fn score_candidates(&self, context: &UserContext, candidates: &[ItemId]) -> Result<Vec<f64>> {
        self.score_items(context.user_id, candidates)
    }
}

/// Run NMF on the interaction matrix
fn factorize(matrix: &InteractionMatrix, config: &NmfConfig) -> Result<CollaborativeFactors> {
    let start = Instant::now();
    let v = &matrix.values;
    let (n_users, n_items) = v.dim();

    if n_users == 0 || n_items == 0 || matrix.nnz() == 0 {
        return Err(ModelError::InsufficientData(format!(
            "cannot factorize a {}x{} matrix without interactions",
            n_users, n_items
        )));
    }

    let k = config.effective_components(n_users, n_items);

    // Step 1: seeded non-negative init
    let mut rng = StdRng::seed_from_u64(config.seed);
    let scale = (v.mean().unwrap_or(0.0) / k as f64).sqrt();
    let mut w = Array2::from_shape_fn((n_users, k), |_| scale * rng.random::<f64>());
    let mut h = Array2::from_shape_fn((k, n_items), |_| scale * rng.random::<f64>());

    let initial_error = reconstruction_error(v, &w, &h);
    let mut previous_error = initial_error;
    let mut iterations = 0;

    // Step 2: multiplicative updates
    for iteration in 1..=config.max_iter {
        let numerator = w.t().dot(v);
        let denominator = w.t().dot(&w).dot(&h);
        Zip::from(&mut h)
            .and(&numerator)
            .and(&denominator)
            .for_each(|h, &num, &den| *h *= num / (den + EPSILON));

        let numerator = v.dot(&h.t());
        let denominator = w.dot(&h.dot(&h.t()));
        Zip::from(&mut w)
            .and(&numerator)
            .and(&denominator)
            .for_each(|w, &num, &den| *w *= num / (den + EPSILON));

        iterations = iteration;

        // Step 3: convergence check
        if iteration % CONVERGENCE_CHECK_INTERVAL == 0 {
            let error = reconstruction_error(v, &w, &h);
            if !error.is_finite() {
                return Err(ModelError::Factorization(format!(
                    "reconstruction error became {} at iteration {}",
                    error, iteration
                )));
            }
            debug!(iteration, error, "NMF progress");
            if initial_error > 0.0 && (previous_error - error) / initial_error < config.tolerance {
                break;
            }
            previous_error = error;
        }
    }

    let error = reconstruction_error(v, &w, &h);
    if !error.is_finite() {
        return Err(ModelError::Factorization(format!(
            "reconstruction error became {}",
            error
        )));
    }

    info!(
        users = n_users,
        items = n_items,
        components = k,
        iterations,
        reconstruction_error = error,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Collaborative model trained"
    );

    Ok(CollaborativeFactors {
        user_factors: w,
        item_factors: h.t().to_owned(),
        users: matrix.users.clone(),
        items: matrix.items.clone(),
        iterations,
        reconstruction_error: error,
    })
}

/// Frobenius norm of `V - W·H`
fn reconstruction_error(v: &Array2<f64>, w: &Array2<f64>, h: &Array2<f64>) -> f64 {
    let residual = v - &w.dot(h);
    residual.mapv(|x| x * x).sum().sqrt()
}
