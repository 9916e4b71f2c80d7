//! # Data Loader Crate
//!
//! Loads and indexes the shop dataset: users, catalog items and the three
//! interaction streams (orders, ratings, searches).
//!
//! ## Main Components
//!
//! - **types**: Core domain types (User, Item, InteractionRecord, DataIndex)
//! - **parser**: Parse .dat files into Rust structs
//! - **index**: Build indices and item statistics
//! - **repository**: `Repository` and `PopularityProvider` traits
//! - **error**: Error types for data loading
//!
//! ## Example Usage
//!
//! ```ignore
//! use data_loader::{DataIndex, Repository};
//! use std::path::Path;
//!
//! let index = DataIndex::load_from_files(Path::new("data/shop"))?;
//! let orders = index.get_orders(1);
//! println!("User 1 placed {} orders", orders.len());
//! ```

pub mod error;
pub mod index;
pub mod parser;
pub mod repository;
pub mod types;

pub use error::{DataLoadError, Result};
pub use repository::{MIN_POPULAR_RATING, PopularityProvider, Repository};
pub use types::{
    DataIndex, InteractionKind, InteractionRecord, Item, ItemId, ItemStats, User, UserId,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_index_creation() {
        let index = DataIndex::new();
        let (users, items, interactions) = index.counts();

        assert_eq!(users, 0);
        assert_eq!(items, 0);
        assert_eq!(interactions, 0);
    }

    #[test]
    fn test_insert_item() {
        let mut index = DataIndex::new();
        index.insert_item(Item {
            id: 7,
            name: "Espresso Cup".to_string(),
            description: "Small porcelain cup".to_string(),
            category: "Kitchen".to_string(),
        });

        let retrieved = index.get_item(7).unwrap();
        assert_eq!(retrieved.category, "Kitchen");
        assert_eq!(
            retrieved.feature_text(),
            "Espresso Cup Espresso Cup Small porcelain cup Kitchen"
        );
    }

    #[test]
    fn test_insert_interaction_routes_by_kind() {
        let mut index = DataIndex::new();
        index.insert_interaction(InteractionRecord::purchase(1, 7, 100, false));
        index.insert_interaction(InteractionRecord::rating(1, 7, 4.0, 101, true));
        index.insert_interaction(InteractionRecord::search(1, 8, 102, false));

        assert_eq!(index.get_user_orders(1).len(), 1);
        assert_eq!(index.get_user_ratings(1)[0].value, Some(4.0));
        assert_eq!(index.get_user_searches(1)[0].item_id, 8);
        assert_eq!(index.counts().2, 3);
    }

    #[test]
    fn test_empty_queries() {
        let index = DataIndex::new();

        assert!(index.get_user(999).is_none());
        assert!(index.get_item(999).is_none());
        assert!(index.get_user_orders(999).is_empty());
        assert!(index.get_items_by_category("Kitchen").is_empty());
        assert!(index.get_all_item_ids().is_empty());
    }
}
