//! Core domain types for the shop catalog and interaction history.
//!
//! This module defines the fundamental data structures used throughout the system:
//! - Type aliases for domain clarity (UserId, ItemId)
//! - Catalog entities (User, Item)
//! - Interaction records produced by orders, ratings and searches
//! - The in-memory `DataIndex` that backs the repositories

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

// =============================================================================
// Type Aliases
// =============================================================================
// These make the domain clearer and prevent mixing up user IDs with item IDs

/// Opaque identifier for a user
pub type UserId = u32;

/// Opaque identifier for a catalog item
pub type ItemId = u32;

// =============================================================================
// Catalog Types
// =============================================================================

/// A shop user. The engine owns no state for a user beyond its matrix row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub name: String,
}

/// A catalog item together with the text blob consumed by content scoring
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Item {
    pub id: ItemId,
    pub name: String,
    pub description: String,
    /// Category label, also used for diversity and popularity-by-category
    pub category: String,
}

impl Item {
    /// Concatenated text features used to build the item's term vector.
    ///
    /// The name is repeated so that it outweighs the free-form description.
    pub fn feature_text(&self) -> String {
        format!(
            "{} {} {} {}",
            self.name, self.name, self.description, self.category
        )
    }
}

// =============================================================================
// Interaction Types
// =============================================================================

/// The kind of signal an interaction record carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum InteractionKind {
    Purchase,
    Rating,
    Search,
}

/// One immutable user-item interaction
///
/// Rust concept: small `Copy` struct, so records can be handed around by value
/// without the engine ever mutating the source data
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InteractionRecord {
    pub user_id: UserId,
    pub item_id: ItemId,
    pub kind: InteractionKind,
    /// Rating value (1.0 - 5.0) for ratings, `None` for purchases and searches
    pub value: Option<f32>,
    /// True when the record was produced by the synthetic data generator
    pub is_synthetic: bool,
    /// Unix timestamp of the interaction
    pub timestamp: i64,
}

impl InteractionRecord {
    pub fn purchase(user_id: UserId, item_id: ItemId, timestamp: i64, is_synthetic: bool) -> Self {
        Self {
            user_id,
            item_id,
            kind: InteractionKind::Purchase,
            value: None,
            is_synthetic,
            timestamp,
        }
    }

    pub fn rating(
        user_id: UserId,
        item_id: ItemId,
        rating: f32,
        timestamp: i64,
        is_synthetic: bool,
    ) -> Self {
        Self {
            user_id,
            item_id,
            kind: InteractionKind::Rating,
            value: Some(rating),
            is_synthetic,
            timestamp,
        }
    }

    pub fn search(user_id: UserId, item_id: ItemId, timestamp: i64, is_synthetic: bool) -> Self {
        Self {
            user_id,
            item_id,
            kind: InteractionKind::Search,
            value: None,
            is_synthetic,
            timestamp,
        }
    }
}

// =============================================================================
// Statistics Types
// =============================================================================

/// Precomputed statistics for an item
///
/// These are computed once when loading data and drive the popularity fallback
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ItemStats {
    pub avg_rating: f32,
    pub rating_count: u32,
    pub purchase_count: u32,
    /// Popularity score derived from average rating and interaction volume
    pub popularity_score: f32,
}

// =============================================================================
// DataIndex - The In-Memory Document Store
// =============================================================================

/// Holds all catalog data and interaction indices.
///
/// It backs the `Repository` and `PopularityProvider` traits, giving O(1)
/// lookups for users, items and per-user interaction history.
#[derive(Debug)]
pub struct DataIndex {
    // Primary data stores
    pub(crate) users: BTreeMap<UserId, User>,
    pub(crate) items: BTreeMap<ItemId, Item>,

    // Interaction indices, keyed by user
    pub(crate) orders: HashMap<UserId, Vec<InteractionRecord>>,
    pub(crate) ratings: HashMap<UserId, Vec<InteractionRecord>>,
    pub(crate) searches: HashMap<UserId, Vec<InteractionRecord>>,

    // Secondary indices
    /// Items grouped by category
    pub(crate) category_index: HashMap<String, Vec<ItemId>>,

    // Precomputed statistics
    pub(crate) item_stats: HashMap<ItemId, ItemStats>,
}

impl DataIndex {
    /// Creates a new, empty DataIndex
    pub fn new() -> Self {
        Self {
            users: BTreeMap::new(),
            items: BTreeMap::new(),
            orders: HashMap::new(),
            ratings: HashMap::new(),
            searches: HashMap::new(),
            category_index: HashMap::new(),
            item_stats: HashMap::new(),
        }
    }

    /// Get a user by ID
    pub fn get_user(&self, id: UserId) -> Option<&User> {
        self.users.get(&id)
    }

    /// Get an item by ID
    pub fn get_item(&self, id: ItemId) -> Option<&Item> {
        self.items.get(&id)
    }

    /// All user IDs in ascending order
    pub fn get_all_user_ids(&self) -> Vec<UserId> {
        self.users.keys().copied().collect()
    }

    /// All item IDs in ascending order
    pub fn get_all_item_ids(&self) -> Vec<ItemId> {
        self.items.keys().copied().collect()
    }

    /// Get the purchase records of a user
    ///
    /// Rust concept: `&[T]` is a slice, a borrowed view into the stored Vec
    pub fn get_user_orders(&self, user_id: UserId) -> &[InteractionRecord] {
        self.orders
            .get(&user_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Get the rating records of a user
    pub fn get_user_ratings(&self, user_id: UserId) -> &[InteractionRecord] {
        self.ratings
            .get(&user_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Get the search records of a user
    pub fn get_user_searches(&self, user_id: UserId) -> &[InteractionRecord] {
        self.searches
            .get(&user_id)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Get all items in a category
    pub fn get_items_by_category(&self, category: &str) -> &[ItemId] {
        self.category_index
            .get(category)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// Get precomputed statistics for an item
    pub fn get_item_stats(&self, item_id: ItemId) -> Option<&ItemStats> {
        self.item_stats.get(&item_id)
    }

    // Mutators, used during data loading and by tests

    /// Insert a user into the index
    pub fn insert_user(&mut self, user: User) {
        self.users.insert(user.id, user);
    }

    /// Insert an item into the index
    pub fn insert_item(&mut self, item: Item) {
        self.items.insert(item.id, item);
    }

    /// Insert an interaction record into the index for its kind
    pub fn insert_interaction(&mut self, record: InteractionRecord) {
        let bucket = match record.kind {
            InteractionKind::Purchase => &mut self.orders,
            InteractionKind::Rating => &mut self.ratings,
            InteractionKind::Search => &mut self.searches,
        };
        bucket.entry(record.user_id).or_default().push(record);
    }

    /// Get counts for debugging/validation: (users, items, interactions)
    pub fn counts(&self) -> (usize, usize, usize) {
        let total_interactions = [&self.orders, &self.ratings, &self.searches]
            .iter()
            .flat_map(|bucket| bucket.values())
            .map(|v| v.len())
            .sum();
        (self.users.len(), self.items.len(), total_interactions)
    }
}

impl Default for DataIndex {
    fn default() -> Self {
        Self::new()
    }
}
