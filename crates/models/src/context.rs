//! Per-request user context.
//!
//! The interaction history of a user is fetched once per request and reused
//! by every stage (candidate filtering, content scoring, evaluation).

use data_loader::{InteractionRecord, ItemId, Repository, UserId};
use std::collections::HashSet;

/// Everything the scoring stages need to know about one user
#[derive(Debug, Clone, Default)]
pub struct UserContext {
    pub user_id: UserId,

    /// Items the user has ordered, rated or searched for. These are never
    /// recommended back to them.
    pub interacted_items: HashSet<ItemId>,

    /// Distinct interacted items in first-seen order, used as the content
    /// history. Kept as a Vec so aggregation order is deterministic.
    pub history: Vec<ItemId>,

    /// Number of raw interaction records behind this context
    pub record_count: usize,

    /// Item the user is looking at; content scoring ranks by similarity to
    /// it instead of the history when it is in the corpus
    pub viewed_item: Option<ItemId>,
}

impl UserContext {
    /// Context for a user with no history (cold start)
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            ..Default::default()
        }
    }

    /// Build a context from an explicit record set
    pub fn from_records(user_id: UserId, records: &[InteractionRecord]) -> Self {
        let mut context = Self::new(user_id);
        context.record_count = records.len();
        for record in records {
            if context.interacted_items.insert(record.item_id) {
                context.history.push(record.item_id);
            }
        }
        context
    }

    pub fn with_viewed_item(mut self, item_id: ItemId) -> Self {
        self.viewed_item = Some(item_id);
        self
    }

    /// True when the user has no interactions at all
    pub fn is_cold(&self) -> bool {
        self.interacted_items.is_empty()
    }

    /// Remove items from both the exclusion set and the content history
    ///
    /// The evaluator uses this so held-out items stay recommendable.
    pub fn forget_items(&mut self, items: &HashSet<ItemId>) {
        self.interacted_items.retain(|id| !items.contains(id));
        self.history.retain(|id| !items.contains(id));
    }
}

/// Build a UserContext from a repository for a given user
///
/// Unknown users get an empty context rather than an error; the engine serves
/// them the popularity fallback.
pub fn build_user_context(repo: &dyn Repository, user_id: UserId) -> UserContext {
    let records = repo.get_interactions(user_id);
    UserContext::from_records(user_id, &records)
}

#[cfg(test)]
mod tests {
    use super::*;
    use data_loader::{DataIndex, User};

    fn create_test_index() -> DataIndex {
        let mut index = DataIndex::new();
        index.insert_user(User {
            id: 1,
            name: "Ana".to_string(),
        });
        index.insert_interaction(InteractionRecord::purchase(1, 10, 100, false));
        index.insert_interaction(InteractionRecord::rating(1, 10, 5.0, 101, false));
        index.insert_interaction(InteractionRecord::search(1, 12, 102, true));
        index
    }

    #[test]
    fn test_build_user_context_basic() {
        let index = create_test_index();
        let context = build_user_context(&index, 1);

        assert_eq!(context.user_id, 1);
        assert_eq!(context.record_count, 3);
        assert_eq!(context.interacted_items.len(), 2);
        assert_eq!(context.history, vec![10, 12]);
        assert!(!context.is_cold());
    }

    #[test]
    fn test_unknown_user_is_cold() {
        let index = create_test_index();
        let context = build_user_context(&index, 999);
        assert!(context.is_cold());
        assert_eq!(context.record_count, 0);
    }

    #[test]
    fn test_forget_items() {
        let index = create_test_index();
        let mut context = build_user_context(&index, 1);

        context.forget_items(&HashSet::from([10]));
        assert!(!context.interacted_items.contains(&10));
        assert_eq!(context.history, vec![12]);
    }
}
