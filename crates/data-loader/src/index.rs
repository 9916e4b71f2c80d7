//! DataIndex building and indexing logic.
//!
//! Builds the DataIndex from parsed data:
//! - Primary indices (users, items, per-user interactions)
//! - Secondary indices (category_index)
//! - Aggregate statistics (item stats for the popularity fallback)

use crate::error::{DataLoadError, Result};
use crate::parser;
use crate::types::*;
use rayon::prelude::*;
use std::collections::HashMap;
use std::path::Path;
use tracing::{debug, info, warn};

impl DataIndex {
    /// Load the shop dataset from a directory
    ///
    /// `users.dat` and `items.dat` are required. The three interaction files are
    /// optional; a missing one is logged and treated as empty.
    ///
    /// Steps:
    /// 1. Parse all five files in parallel
    /// 2. Build primary indices
    /// 3. Build secondary indices (category)
    /// 4. Compute item statistics
    /// 5. Validate data integrity
    pub fn load_from_files(data_dir: &Path) -> Result<Self> {
        info!(data_dir = %data_dir.display(), "Loading shop dataset");

        let users_path = data_dir.join("users.dat");
        let items_path = data_dir.join("items.dat");
        let orders_path = data_dir.join("orders.dat");
        let ratings_path = data_dir.join("ratings.dat");
        let searches_path = data_dir.join("searches.dat");

        // Step 1: nested rayon::join gives five-way parallel parsing
        let ((users, items), (orders, (ratings, searches))) = rayon::join(
            || {
                rayon::join(
                    || parser::parse_users(&users_path),
                    || parser::parse_items(&items_path),
                )
            },
            || {
                rayon::join(
                    || optional(parser::parse_orders(&orders_path)),
                    || {
                        rayon::join(
                            || optional(parser::parse_ratings(&ratings_path)),
                            || optional(parser::parse_searches(&searches_path)),
                        )
                    },
                )
            },
        );

        let users = users?;
        let items = items?;
        let orders = orders?;
        let ratings = ratings?;
        let searches = searches?;

        info!(
            users = users.len(),
            items = items.len(),
            orders = orders.len(),
            ratings = ratings.len(),
            searches = searches.len(),
            "Parsed data files"
        );

        // Step 2: primary indices
        let mut index = DataIndex::new();
        for user in users {
            index.insert_user(user);
        }
        for item in items {
            index.insert_item(item);
        }
        for record in orders.into_iter().chain(ratings).chain(searches) {
            index.insert_interaction(record);
        }

        // Steps 3-5
        index.build_secondary_indices();
        index.compute_item_stats();
        index.validate()?;

        info!("DataIndex built and validated");
        Ok(index)
    }

    /// Build secondary indices after primary data is loaded
    ///
    /// Category lists come out in ascending item id order since `items` is a BTreeMap.
    pub fn build_secondary_indices(&mut self) {
        self.category_index.clear();
        for (item_id, item) in &self.items {
            self.category_index
                .entry(item.category.clone())
                .or_default()
                .push(*item_id);
        }
    }

    /// Compute aggregate statistics for all items
    ///
    /// ## Algorithm
    /// Ratings and orders of every user are folded in parallel into per-item
    /// partial tallies, which are then reduced into one map. The popularity
    /// score is `avg_rating * ln(rating_count + purchase_count + 1)`.
    pub fn compute_item_stats(&mut self) {
        #[derive(Default, Clone, Copy)]
        struct Tally {
            rating_sum: f32,
            rating_count: u32,
            purchase_count: u32,
        }

        let tallies: HashMap<ItemId, Tally> = self
            .ratings
            .par_iter()
            .chain(self.orders.par_iter())
            .flat_map(|(_, records)| records.par_iter())
            .fold(HashMap::new, |mut acc: HashMap<ItemId, Tally>, record| {
                let tally = acc.entry(record.item_id).or_default();
                match record.kind {
                    InteractionKind::Rating => {
                        tally.rating_sum += record.value.unwrap_or(0.0);
                        tally.rating_count += 1;
                    }
                    InteractionKind::Purchase => tally.purchase_count += 1,
                    InteractionKind::Search => {}
                }
                acc
            })
            .reduce(HashMap::new, |mut left, right| {
                for (item_id, t) in right {
                    let tally = left.entry(item_id).or_default();
                    tally.rating_sum += t.rating_sum;
                    tally.rating_count += t.rating_count;
                    tally.purchase_count += t.purchase_count;
                }
                left
            });

        self.item_stats = tallies
            .into_iter()
            .map(|(item_id, t)| {
                let avg_rating = if t.rating_count > 0 {
                    t.rating_sum / t.rating_count as f32
                } else {
                    0.0
                };
                let popularity_score =
                    compute_popularity_score(avg_rating, t.rating_count + t.purchase_count);
                (
                    item_id,
                    ItemStats {
                        avg_rating,
                        rating_count: t.rating_count,
                        purchase_count: t.purchase_count,
                        popularity_score,
                    },
                )
            })
            .collect();

        debug!(items_with_stats = self.item_stats.len(), "Computed item stats");
    }

    /// Validate data integrity
    ///
    /// Fails when:
    /// - an interaction references a user that does not exist
    /// - a rating is outside 1.0 - 5.0
    ///
    /// Interactions that reference items outside the catalog are tolerated
    /// (the catalog may have dropped them) and only counted here; the matrix
    /// builder skips them.
    pub fn validate(&self) -> Result<()> {
        let mut dangling_items = 0usize;

        for bucket in [&self.orders, &self.ratings, &self.searches] {
            for records in bucket.values() {
                for record in records {
                    if !self.users.contains_key(&record.user_id) {
                        return Err(DataLoadError::MissingReference {
                            entity: "User".to_string(),
                            id: record.user_id,
                        });
                    }
                    if !self.items.contains_key(&record.item_id) {
                        dangling_items += 1;
                    }
                    if let Some(rating) = record.value {
                        if !(1.0..=5.0).contains(&rating) {
                            return Err(DataLoadError::InvalidValue {
                                field: "rating".to_string(),
                                value: rating.to_string(),
                            });
                        }
                    }
                }
            }
        }

        if dangling_items > 0 {
            warn!(
                dangling_items,
                "Interactions reference items missing from the catalog"
            );
        }
        Ok(())
    }
}

/// Treat a missing optional file as an empty record list
fn optional(result: Result<Vec<InteractionRecord>>) -> Result<Vec<InteractionRecord>> {
    match result {
        Err(DataLoadError::FileNotFound { path }) => {
            warn!(%path, "Optional data file missing, treating as empty");
            Ok(Vec::new())
        }
        other => other,
    }
}

/// Rewards both high ratings and interaction volume
pub(crate) fn compute_popularity_score(avg_rating: f32, interaction_count: u32) -> f32 {
    avg_rating * (interaction_count as f32 + 1.0).ln()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn write_dataset(dir: &Path) {
        fs::write(dir.join("users.dat"), "1::Ana\n2::Bo\n").unwrap();
        fs::write(
            dir.join("items.dat"),
            "10::Red Mug::Ceramic mug::Kitchen\n11::Blue Mug::Ceramic mug::Kitchen\n12::Tent::Two person tent::Outdoor\n",
        )
        .unwrap();
        fs::write(
            dir.join("orders.dat"),
            "1::10::100::0\n2::10::110::1\n2::99::120::0\n",
        )
        .unwrap();
        fs::write(dir.join("ratings.dat"), "1::10::5::130::0\n2::12::3::140::0\n").unwrap();
    }

    #[test]
    fn test_popularity_score() {
        let few = compute_popularity_score(4.5, 10);
        let many = compute_popularity_score(3.5, 1000);
        assert!(few > 0.0);
        assert!(many > few);
        assert_eq!(compute_popularity_score(0.0, 50), 0.0);
    }

    #[test]
    fn test_load_dataset_without_searches() {
        let dir = TempDir::new().unwrap();
        write_dataset(dir.path());

        let index = DataIndex::load_from_files(dir.path()).unwrap();
        let (users, items, interactions) = index.counts();

        assert_eq!(users, 2);
        assert_eq!(items, 3);
        assert_eq!(interactions, 5);
        assert!(index.get_user_searches(1).is_empty());
        assert_eq!(index.get_items_by_category("Kitchen"), &[10, 11]);
    }

    #[test]
    fn test_item_stats() {
        let dir = TempDir::new().unwrap();
        write_dataset(dir.path());
        let index = DataIndex::load_from_files(dir.path()).unwrap();

        let stats = index.get_item_stats(10).unwrap();
        assert_eq!(stats.purchase_count, 2);
        assert_eq!(stats.rating_count, 1);
        assert_eq!(stats.avg_rating, 5.0);
        assert!((stats.popularity_score - 5.0 * 4.0f32.ln()).abs() < 1e-5);

        // Item 11 has no interactions at all
        assert!(index.get_item_stats(11).is_none());
    }

    #[test]
    fn test_validate_rejects_out_of_range_rating() {
        let mut index = DataIndex::new();
        index.insert_user(User {
            id: 1,
            name: "Ana".to_string(),
        });
        index.insert_interaction(InteractionRecord::rating(1, 5, 7.0, 0, false));

        let err = index.validate().unwrap_err();
        assert!(matches!(err, DataLoadError::InvalidValue { .. }));
    }

    #[test]
    fn test_validate_rejects_unknown_user() {
        let mut index = DataIndex::new();
        index.insert_interaction(InteractionRecord::purchase(42, 5, 0, false));

        let err = index.validate().unwrap_err();
        assert!(matches!(
            err,
            DataLoadError::MissingReference { id: 42, .. }
        ));
    }

    #[test]
    fn test_missing_required_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("users.dat"), "1::Ana\n").unwrap();

        let err = DataIndex::load_from_files(dir.path()).unwrap_err();
        assert!(matches!(err, DataLoadError::FileNotFound { .. }));
    }
}
