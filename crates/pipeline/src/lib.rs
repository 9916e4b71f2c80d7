//! Ranking pipeline for product candidates.
//!
//! This crate provides:
//! - Filter trait and implementations for candidate filtering
//! - FilterPipeline for composing filters
//! - HybridScorer, which blends collaborative and content scores, applies the
//!   consensus boost and the category diversity pass
//! - Evaluator for offline precision/recall/coverage against held-out data
//!
//! ## Architecture
//! A request flows through the stages in order:
//! 1. Filters remove candidates the user already interacted with
//! 2. Both models score the survivors; scores are normalized and blended
//! 3. Diversity re-ranking picks the final `n`
//!
//! ## Example Usage
//! ```ignore
//! use pipeline::{Catalog, HybridScorer, Signals};
//!
//! let scorer = HybridScorer::new(index.clone());
//! let signals = Signals { collaborative: &cf, content: &content };
//! let rec = scorer.recommend(&signals, &catalog, &context, None, 10);
//! println!("{} items from {}", rec.items.len(), rec.source);
//! ```

pub mod candidate;
pub mod diversity;
pub mod evaluator;
pub mod filter_pipeline;
pub mod filters;
pub mod hybrid;
pub mod normalize;
pub mod traits;

pub use candidate::{Candidate, Catalog};
pub use diversity::{DiversityConfig, Relaxation};
pub use evaluator::{
    EvaluationConfig, EvaluationError, EvaluationReport, Evaluator, HybridRecommender, Recommender,
};
pub use filter_pipeline::FilterPipeline;
pub use hybrid::{HybridConfig, HybridScorer, Recommendation, RecommendationSource, Signals};
pub use traits::Filter;
