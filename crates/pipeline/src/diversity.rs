//! Category diversity re-ranking.
//!
//! ## Algorithm
//! Greedy single pass over score-descending candidates, counting selections
//! per category:
//! 1. A candidate whose category is under the cap is selected
//! 2. An over-cap candidate is deferred, unless the [`Relaxation`] policy
//!    waives the cap for the slots still unfilled
//! 3. If the list is still short of `n`, deferred candidates fill it in
//!    their original score order
//!
//! With [`Relaxation::Never`] the cap is only ever broken when the pool
//! cannot reach `n` otherwise.

use crate::candidate::Candidate;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// When an over-cap candidate is taken in-pass instead of deferred
///
/// ```toml
/// relaxation = "never"
/// relaxation = { absolute = 3 }       # fewer than 3 slots left
/// relaxation = { below_n_minus = 1 }  # fewer than n-1 slots left
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Relaxation {
    /// Only deferred fill may break the cap
    #[default]
    Never,
    /// Waive once fewer than this many slots remain unfilled
    Absolute(usize),
    /// Waive once fewer than `n - k` slots remain unfilled
    BelowNMinus(usize),
}

impl Relaxation {
    /// Unfilled-slot count under which the cap is waived for a list of `n`
    pub fn threshold(&self, n: usize) -> usize {
        match *self {
            Relaxation::Never => 0,
            Relaxation::Absolute(slots) => slots,
            Relaxation::BelowNMinus(k) => n.saturating_sub(k),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiversityConfig {
    /// Maximum selections per category before deferring
    pub max_per_category: usize,
    pub relaxation: Relaxation,
}

impl Default for DiversityConfig {
    fn default() -> Self {
        Self {
            max_per_category: 2,
            relaxation: Relaxation::Never,
        }
    }
}

/// Re-rank `sorted` (already score-descending) into at most `n` diverse picks
pub fn diversify(sorted: Vec<Candidate>, n: usize, config: &DiversityConfig) -> Vec<Candidate> {
    let threshold = config.relaxation.threshold(n);
    let mut selected: Vec<Candidate> = Vec::with_capacity(n.min(sorted.len()));
    let mut deferred: Vec<Candidate> = Vec::new();
    let mut per_category: HashMap<String, usize> = HashMap::new();

    for candidate in sorted {
        if selected.len() >= n {
            break;
        }
        let count = per_category.get(&candidate.category).copied().unwrap_or(0);
        let unfilled = n - selected.len();

        if count < config.max_per_category || unfilled < threshold {
            *per_category.entry(candidate.category.clone()).or_insert(0) += 1;
            selected.push(candidate);
        } else {
            deferred.push(candidate);
        }
    }

    let shortfall = n.saturating_sub(selected.len());
    selected.extend(deferred.into_iter().take(shortfall));
    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool(spec: &[(u32, &str)]) -> Vec<Candidate> {
        let len = spec.len() as f64;
        spec.iter()
            .enumerate()
            .map(|(rank, &(id, cat))| Candidate::new(id, cat).with_score(len - rank as f64))
            .collect()
    }

    fn ids(candidates: &[Candidate]) -> Vec<u32> {
        candidates.iter().map(|c| c.item_id).collect()
    }

    #[test]
    fn test_caps_each_category_at_two() {
        let sorted = pool(&[(1, "A"), (2, "A"), (3, "A"), (4, "B"), (5, "C"), (6, "A")]);
        let picked = diversify(sorted, 4, &DiversityConfig::default());
        assert_eq!(ids(&picked), vec![1, 2, 4, 5]);
    }

    #[test]
    fn test_deferred_fill_shortfall_in_score_order() {
        let sorted = pool(&[(1, "A"), (2, "A"), (3, "A"), (4, "A"), (5, "B")]);
        let picked = diversify(sorted, 4, &DiversityConfig::default());
        // 1, 2 and 5 fit the cap; 3 fills the last slot ahead of 4
        assert_eq!(ids(&picked), vec![1, 2, 5, 3]);
    }

    #[test]
    fn test_short_pool_returns_everything() {
        let sorted = pool(&[(1, "A"), (2, "A"), (3, "A")]);
        let picked = diversify(sorted, 5, &DiversityConfig::default());
        assert_eq!(ids(&picked), vec![1, 2, 3]);
    }

    #[test]
    fn test_relaxation_threshold_waives_cap_in_pass() {
        let sorted = pool(&[(1, "A"), (2, "A"), (3, "A"), (4, "B"), (5, "C")]);
        let config = DiversityConfig {
            relaxation: Relaxation::Absolute(3),
            ..DiversityConfig::default()
        };
        // After two picks only 2 of 4 slots are open (< 3), so 3 is taken
        let picked = diversify(sorted, 4, &config);
        assert_eq!(ids(&picked), vec![1, 2, 3, 4]);
    }

    #[test]
    fn test_relaxation_relative_to_list_size() {
        let config = DiversityConfig {
            relaxation: Relaxation::BelowNMinus(1),
            ..DiversityConfig::default()
        };
        assert_eq!(config.relaxation.threshold(4), 3);
        assert_eq!(config.relaxation.threshold(0), 0);

        // n = 4: after 1, 2 two slots remain (< 3), so 3 is taken over 4
        let sorted = pool(&[(1, "A"), (2, "A"), (3, "A"), (4, "B"), (5, "C")]);
        assert_eq!(ids(&diversify(sorted, 4, &config)), vec![1, 2, 3, 4]);

        // n = 6: four slots left after 1, 2 is below 5, so 3 keeps its rank
        let sorted = pool(&[(1, "A"), (2, "A"), (3, "A"), (4, "B"), (5, "C"), (6, "D")]);
        assert_eq!(ids(&diversify(sorted.clone(), 6, &config)), vec![1, 2, 3, 4, 5, 6]);
        let capped = diversify(sorted, 6, &DiversityConfig::default());
        assert_eq!(ids(&capped), vec![1, 2, 4, 5, 6, 3]);
    }

    #[test]
    fn test_relaxation_parses_from_toml() {
        #[derive(Deserialize)]
        struct Wrapper {
            diversity: DiversityConfig,
        }
        let parsed: Wrapper =
            toml::from_str("[diversity]\nrelaxation = { below_n_minus = 1 }").unwrap();
        assert_eq!(parsed.diversity.relaxation, Relaxation::BelowNMinus(1));
        assert_eq!(parsed.diversity.max_per_category, 2);
    }

    #[test]
    fn test_huge_n_does_not_preallocate() {
        let sorted = pool(&[(1, "A"), (2, "B")]);
        let picked = diversify(sorted, usize::MAX, &DiversityConfig::default());
        assert_eq!(ids(&picked), vec![1, 2]);

        let config = DiversityConfig {
            relaxation: Relaxation::BelowNMinus(1),
            ..DiversityConfig::default()
        };
        let sorted = pool(&[(1, "A"), (2, "A"), (3, "A")]);
        assert_eq!(ids(&diversify(sorted, 1 << 40, &config)), vec![1, 2, 3]);
    }

    #[test]
    fn test_no_duplicates_and_bounded() {
        let sorted = pool(&[(1, "A"), (2, "B"), (3, "A"), (4, "B"), (5, "A"), (6, "C")]);
        let picked = diversify(sorted, 3, &DiversityConfig::default());
        let mut unique = ids(&picked);
        unique.sort_unstable();
        unique.dedup();
        assert_eq!(unique.len(), picked.len());
        assert!(picked.len() <= 3);
    }

    #[test]
    fn test_zero_n() {
        let sorted = pool(&[(1, "A")]);
        assert!(diversify(sorted, 0, &DiversityConfig::default()).is_empty());
    }
}
