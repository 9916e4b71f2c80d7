use crate::context::UserContext;
use crate::error::Result;
use data_loader::ItemId;

/// A source of raw per-candidate scores for the hybrid layer
///
/// Rust concept: `Send + Sync` so a model can be shared through an `Arc`
/// across request tasks
pub trait ScoringModel: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &'static str;

    /// True only after a successful fit
    fn is_ready(&self) -> bool;

    /// Raw scores aligned with `candidates`
    ///
    /// Errors with `NotReady` before a fit. Scores are unnormalized.
    fn score_candidates(&self, context: &UserContext, candidates: &[ItemId]) -> Result<Vec<f64>>;
}
