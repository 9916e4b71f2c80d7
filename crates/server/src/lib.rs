//! Serving side of the recommendation engine.
//!
//! This crate owns the trained model state: generations and the slot they
//! are served from, the training lifecycle, persistence, the recommendation
//! cache and the engine that answers requests.

pub mod cache;
pub mod config;
pub mod engine;
pub mod generation;
pub mod lifecycle;
pub mod persistence;

pub use cache::{InMemoryCache, RecommendationCache, cache_key};
pub use config::{
    CacheConfig, EngineConfig, StoreConfig, TrainingConfig, load_config, load_config_or_default,
};
pub use engine::{
    RecommendationEngine, RecommendationRequest, RecommendationResponse, TrainingReport,
};
pub use generation::{ModelGeneration, ServingSlot};
pub use lifecycle::{
    LifecycleError, LifecycleState, LifecycleStatus, ModelFailure, ModelLifecycle,
    TrainingOutcome,
};
pub use persistence::{FileModelStore, GenerationBlob, InMemoryModelStore, ModelStore, StoreError};
