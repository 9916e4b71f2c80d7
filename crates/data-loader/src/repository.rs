//! Read-only access traits over catalog and interaction data.
//!
//! The recommendation engine only ever talks to these traits, so the in-memory
//! `DataIndex` can be swapped for any other store without touching scoring code.

use crate::types::*;
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// Minimum average rating for an item to count as "popular"
pub const MIN_POPULAR_RATING: f32 = 2.0;

/// Catalog and interaction history lookups
///
/// Rust concept: `Send + Sync` bounds let an `Arc<dyn Repository>` cross into
/// tokio tasks and rayon workers
pub trait Repository: Send + Sync {
    /// All users, in ascending id order
    fn get_all_users(&self) -> Vec<User>;

    /// All catalog items, in ascending id order
    fn get_all_items(&self) -> Vec<Item>;

    /// Purchase records of a user
    fn get_orders(&self, user_id: UserId) -> Vec<InteractionRecord>;

    /// Rating records of a user
    fn get_ratings(&self, user_id: UserId) -> Vec<InteractionRecord>;

    /// Search records of a user
    fn get_searches(&self, user_id: UserId) -> Vec<InteractionRecord>;

    /// Distinct items that appeared in the user's searches
    fn get_searched_item_ids(&self, user_id: UserId) -> Vec<ItemId> {
        let ids: BTreeSet<ItemId> = self
            .get_searches(user_id)
            .iter()
            .map(|r| r.item_id)
            .collect();
        ids.into_iter().collect()
    }

    /// Every record of a user: orders, then ratings, then searches
    fn get_interactions(&self, user_id: UserId) -> Vec<InteractionRecord> {
        let mut records = self.get_orders(user_id);
        records.extend(self.get_ratings(user_id));
        records.extend(self.get_searches(user_id));
        records
    }
}

/// Source of non-personalized popular items, used for the fallback path
pub trait PopularityProvider: Send + Sync {
    /// Up to `n` popular items, optionally restricted to a category.
    ///
    /// An unknown or empty category falls back to the global list.
    fn top_popular(&self, category: Option<&str>, n: usize) -> Vec<ItemId>;
}

impl Repository for DataIndex {
    fn get_all_users(&self) -> Vec<User> {
        self.users.values().cloned().collect()
    }

    fn get_all_items(&self) -> Vec<Item> {
        self.items.values().cloned().collect()
    }

    fn get_orders(&self, user_id: UserId) -> Vec<InteractionRecord> {
        self.get_user_orders(user_id).to_vec()
    }

    fn get_ratings(&self, user_id: UserId) -> Vec<InteractionRecord> {
        self.get_user_ratings(user_id).to_vec()
    }

    fn get_searches(&self, user_id: UserId) -> Vec<InteractionRecord> {
        self.get_user_searches(user_id).to_vec()
    }
}

impl DataIndex {
    /// Rank items by popularity score (desc), then purchase count (desc), then id
    fn rank_popular<'a>(&self, ids: impl Iterator<Item = &'a ItemId>, n: usize) -> Vec<ItemId> {
        let mut scored: Vec<(ItemId, ItemStats)> = ids
            .filter_map(|id| {
                self.item_stats
                    .get(id)
                    .filter(|s| s.avg_rating >= MIN_POPULAR_RATING)
                    .map(|s| (*id, *s))
            })
            .collect();

        scored.sort_by(|(a_id, a), (b_id, b)| {
            b.popularity_score
                .partial_cmp(&a.popularity_score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| b.purchase_count.cmp(&a.purchase_count))
                .then_with(|| a_id.cmp(b_id))
        });

        scored.into_iter().take(n).map(|(id, _)| id).collect()
    }
}

impl PopularityProvider for DataIndex {
    fn top_popular(&self, category: Option<&str>, n: usize) -> Vec<ItemId> {
        if let Some(category) = category {
            let in_category = self.get_items_by_category(category);
            if !in_category.is_empty() {
                let ranked = self.rank_popular(in_category.iter(), n);
                if !ranked.is_empty() {
                    return ranked;
                }
                // Nothing rated in this category yet: plain catalog order
                return in_category.iter().take(n).copied().collect();
            }
        }

        let ranked = self.rank_popular(self.items.keys(), n);
        if !ranked.is_empty() {
            return ranked;
        }
        // No item clears the rating threshold: any items at all
        self.items.keys().take(n).copied().collect()
    }
}
