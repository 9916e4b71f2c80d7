//! Model generations and the serving slot.
//!
//! A generation is the immutable output of one training pass. The slot holds
//! the current one behind an `Arc`; requests clone the `Arc` once at start and
//! keep scoring against that snapshot even if a retrain swaps in a newer
//! generation halfway through.

use chrono::{DateTime, Utc};
use models::{CollaborativeModel, ContentModel};
use parking_lot::RwLock;
use pipeline::{Catalog, Signals};
use std::sync::Arc;

/// One immutable, versioned bundle of trained model state
#[derive(Debug, Clone, Default)]
pub struct ModelGeneration {
    /// 0 for the placeholder served before the first training pass
    pub id: u64,
    pub trained_at: Option<DateTime<Utc>>,
    pub collaborative: CollaborativeModel,
    pub content: ContentModel,
    /// Items the generation was trained on, with categories
    pub catalog: Catalog,
}

impl ModelGeneration {
    /// Placeholder with no trained model; every request falls back
    pub fn empty() -> Self {
        Self::default()
    }

    /// Both models as scoring signals
    pub fn signals(&self) -> Signals<'_> {
        Signals {
            collaborative: &self.collaborative,
            content: &self.content,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.collaborative.is_ready() || self.content.is_ready()
    }

    /// True when exactly one of the two models is trained
    pub fn is_partial(&self) -> bool {
        self.collaborative.is_ready() != self.content.is_ready()
    }

    pub fn user_count(&self) -> usize {
        self.collaborative
            .factors()
            .map(|f| f.users.len())
            .unwrap_or(0)
    }

    pub fn vocabulary_size(&self) -> usize {
        self.content
            .vectors()
            .map(|v| v.vocabulary_size())
            .unwrap_or(0)
    }
}

/// Holder of the generation currently serving requests
///
/// The lock is only taken to clone or replace the `Arc`, never while scoring
/// or training.
#[derive(Debug)]
pub struct ServingSlot {
    current: RwLock<Arc<ModelGeneration>>,
}

impl ServingSlot {
    pub fn new(generation: ModelGeneration) -> Self {
        Self {
            current: RwLock::new(Arc::new(generation)),
        }
    }

    /// Snapshot of the serving generation
    pub fn current(&self) -> Arc<ModelGeneration> {
        self.current.read().clone()
    }

    /// Make `generation` current, returning the one it replaced
    pub fn swap(&self, generation: Arc<ModelGeneration>) -> Arc<ModelGeneration> {
        std::mem::replace(&mut *self.current.write(), generation)
    }
}

impl Default for ServingSlot {
    fn default() -> Self {
        Self::new(ModelGeneration::empty())
    }
}
