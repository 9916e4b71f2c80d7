//! Filter to remove items the user has already interacted with.
//!
//! This is the first filter in the pipeline: anything the user ordered,
//! rated or searched for is never recommended back to them.

use crate::candidate::Candidate;
use crate::traits::Filter;
use anyhow::Result;
use models::UserContext;

/// Removes candidates present in `UserContext.interacted_items`.
///
/// ## Algorithm
/// Uses the HashSet in the context for O(1) lookups.
pub struct AlreadyInteractedFilter;

impl Filter for AlreadyInteractedFilter {
    fn name(&self) -> &str {
        "AlreadyInteractedFilter"
    }

    fn apply(&self, candidates: Vec<Candidate>, context: &UserContext) -> Result<Vec<Candidate>> {
        let filtered: Vec<Candidate> = candidates
            .into_iter()
            .filter(|candidate| !context.interacted_items.contains(&candidate.item_id))
            .collect();
        Ok(filtered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_interacted_filter() {
        let mut context = UserContext::new(1);
        context.interacted_items.insert(100);
        context.interacted_items.insert(200);

        let candidates = vec![
            Candidate::new(100, "A"),
            Candidate::new(101, "A"),
            Candidate::new(200, "B"),
            Candidate::new(300, "B"),
        ];

        let filtered = AlreadyInteractedFilter.apply(candidates, &context).unwrap();

        assert_eq!(filtered.len(), 2);
        assert_eq!(filtered[0].item_id, 101);
        assert_eq!(filtered[1].item_id, 300);
    }
}
