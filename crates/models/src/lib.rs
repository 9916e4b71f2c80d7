//! # Models Crate
//!
//! The two scoring signals of the recommender and the matrix they train on.
//!
//! ## Components
//!
//! ### InteractionMatrixBuilder
//! Turns orders, ratings and searches into a dense, quality-weighted
//! users x items matrix.
//!
//! ### CollaborativeModel
//! Non-negative matrix factorization of that matrix:
//! "users with interaction patterns like yours also bought..."
//!
//! ### ContentModel
//! TF-IDF vectors over item text; scores candidates by similarity to what the
//! user already interacted with.
//!
//! ## Example Usage
//!
//! ```ignore
//! use models::{CollaborativeModel, ContentModel, InteractionMatrixBuilder};
//!
//! let matrix = InteractionMatrixBuilder::new(&index).build()?;
//! let mut cf = CollaborativeModel::new(Default::default());
//! cf.fit(&matrix)?;
//!
//! let mut content = ContentModel::new(Default::default());
//! content.fit(&index.get_all_items())?;
//! ```

pub mod collaborative;
pub mod content;
pub mod context;
pub mod error;
pub mod matrix;
pub mod scoring;

pub use collaborative::{CollaborativeFactors, CollaborativeModel, NmfConfig};
pub use content::{Aggregation, ContentConfig, ContentModel, ContentVectors, SparseVector};
pub use context::{UserContext, build_user_context};
pub use error::{ModelError, Result};
pub use matrix::{IndexMapping, InteractionMatrix, InteractionMatrixBuilder, QualityWeights};
pub use scoring::ScoringModel;
