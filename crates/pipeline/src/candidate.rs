//! Candidates flowing through the pipeline and the catalog they come from.

use data_loader::{Item, ItemId};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Snapshot of the catalog a generation was trained against
///
/// Every request draws its candidates from here, so the candidate set always
/// matches the models it is scored with.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Catalog {
    /// Item ids in ascending order
    items: Vec<ItemId>,
    categories: HashMap<ItemId, String>,
}

impl Catalog {
    pub fn from_items(items: &[Item]) -> Self {
        let mut ids: Vec<ItemId> = items.iter().map(|item| item.id).collect();
        ids.sort_unstable();
        ids.dedup();
        Self {
            items: ids,
            categories: items
                .iter()
                .map(|item| (item.id, item.category.clone()))
                .collect(),
        }
    }

    pub fn item_ids(&self) -> &[ItemId] {
        &self.items
    }

    pub fn category(&self, item_id: ItemId) -> Option<&str> {
        self.categories.get(&item_id).map(String::as_str)
    }

    pub fn contains(&self, item_id: ItemId) -> bool {
        self.categories.contains_key(&item_id)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// One fresh, unscored candidate per catalog item
    pub fn candidates(&self) -> Vec<Candidate> {
        self.items
            .iter()
            .map(|&id| Candidate::new(id, self.category(id).unwrap_or_default()))
            .collect()
    }
}

/// One item under consideration for a single request
#[derive(Debug, Clone, PartialEq)]
pub struct Candidate {
    pub item_id: ItemId,
    pub category: String,

    /// Raw collaborative score, `None` when that signal is absent
    pub collaborative: Option<f64>,
    /// Raw content score, `None` when that signal is absent
    pub content: Option<f64>,

    /// Combined score after normalization, weighting and boosting
    pub score: f64,
    /// True if the consensus boost was applied
    pub boosted: bool,
}

impl Candidate {
    pub fn new(item_id: ItemId, category: &str) -> Self {
        Self {
            item_id,
            category: category.to_string(),
            collaborative: None,
            content: None,
            score: 0.0,
            boosted: false,
        }
    }

    /// Builder helper used by tests and the fallback path
    pub fn with_score(mut self, score: f64) -> Self {
        self.score = score;
        self
    }
}
