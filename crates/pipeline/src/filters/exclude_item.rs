//! Filter to drop the item the request is anchored on (e.g. the product page
//! the user is currently looking at).

use crate::candidate::Candidate;
use crate::traits::Filter;
use anyhow::Result;
use data_loader::ItemId;
use models::UserContext;

/// Removes a single explicitly excluded item
pub struct ExcludeItemFilter {
    item_id: ItemId,
}

impl ExcludeItemFilter {
    pub fn new(item_id: ItemId) -> Self {
        Self { item_id }
    }
}

impl Filter for ExcludeItemFilter {
    fn name(&self) -> &str {
        "ExcludeItemFilter"
    }

    fn apply(&self, candidates: Vec<Candidate>, _context: &UserContext) -> Result<Vec<Candidate>> {
        Ok(candidates
            .into_iter()
            .filter(|candidate| candidate.item_id != self.item_id)
            .collect())
    }
}
