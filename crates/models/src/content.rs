//! Content model - TF-IDF item vectors
//!
//! Each item becomes a sparse, L2-normalized TF-IDF vector over its text
//! (`name name description category`). Cosine similarity between two vectors
//! is then a plain dot product in `[0, 1]`.
//!
//! ## Vocabulary
//! 1. Tokens are lower-cased runs of alphanumerics, at least two characters long
//! 2. Terms appearing in more than `max_df` of the documents are dropped
//! 3. The `max_features` terms with the highest corpus frequency are kept
//!
//! IDF is smoothed: `ln((1 + n) / (1 + df)) + 1`.

use crate::context::UserContext;
use crate::error::{ModelError, Result};
use crate::matrix::IndexMapping;
use crate::scoring::ScoringModel;
use data_loader::{Item, ItemId};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::time::Instant;
use tracing::{info, instrument};

/// How per-history-item similarities collapse into one candidate score
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Aggregation {
    /// Best match against any history item. Adding history never lowers a score.
    #[default]
    Max,
    /// Average over the history
    Mean,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentConfig {
    pub max_features: usize,
    /// Fraction of documents above which a term is considered noise
    pub max_df: f64,
    pub aggregation: Aggregation,
}

impl Default for ContentConfig {
    fn default() -> Self {
        Self {
            max_features: 200,
            max_df: 0.8,
            aggregation: Aggregation::Max,
        }
    }
}

/// Sparse vector as `(term index, weight)` pairs sorted by term index
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SparseVector {
    entries: Vec<(u32, f64)>,
}

impl SparseVector {
    /// Build from unsorted entries, L2-normalizing the weights
    fn normalized(mut entries: Vec<(u32, f64)>) -> Self {
        entries.sort_unstable_by_key(|&(term, _)| term);
        let norm = entries.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
        if norm > 0.0 {
            for (_, w) in &mut entries {
                *w /= norm;
            }
        }
        Self { entries }
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn nnz(&self) -> usize {
        self.entries.len()
    }

    /// Dot product via a merge over both sorted entry lists
    pub fn dot(&self, other: &SparseVector) -> f64 {
        let (mut i, mut j) = (0, 0);
        let mut sum = 0.0;
        while i < self.entries.len() && j < other.entries.len() {
            let (a_term, a_w) = self.entries[i];
            let (b_term, b_w) = other.entries[j];
            match a_term.cmp(&b_term) {
                Ordering::Less => i += 1,
                Ordering::Greater => j += 1,
                Ordering::Equal => {
                    sum += a_w * b_w;
                    i += 1;
                    j += 1;
                }
            }
        }
        sum
    }
}

/// Output of one content fit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentVectors {
    /// term -> column
    pub vocabulary: BTreeMap<String, u32>,
    /// IDF per column
    pub idf: Vec<f64>,
    pub items: IndexMapping,
    /// One vector per item, aligned with `items`
    pub vectors: Vec<SparseVector>,
}

impl ContentVectors {
    pub fn vocabulary_size(&self) -> usize {
        self.vocabulary.len()
    }

    pub fn vector(&self, item_id: ItemId) -> Option<&SparseVector> {
        self.items
            .position(item_id)
            .and_then(|pos| self.vectors.get(pos))
    }

    /// TF-IDF vector of arbitrary text under this vocabulary
    pub fn transform(&self, text: &str) -> SparseVector {
        weigh(&tokenize(text), &self.vocabulary, &self.idf)
    }
}

/// L2-normalized TF-IDF vector of `tokens`; out-of-vocabulary tokens are ignored
fn weigh(tokens: &[String], vocabulary: &BTreeMap<String, u32>, idf: &[f64]) -> SparseVector {
    let mut counts: HashMap<u32, f64> = HashMap::new();
    for token in tokens {
        if let Some(&column) = vocabulary.get(token) {
            *counts.entry(column).or_insert(0.0) += 1.0;
        }
    }
    let entries = counts
        .into_iter()
        .map(|(column, tf)| (column, tf * idf[column as usize]))
        .collect();
    SparseVector::normalized(entries)
}

/// Lower-cased alphanumeric tokens of at least two characters
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|token| token.chars().count() >= 2)
        .map(|token| token.to_lowercase())
        .collect()
}

/// Content scoring model
#[derive(Debug, Clone, Default)]
pub struct ContentModel {
    config: ContentConfig,
    vectors: Option<ContentVectors>,
}

impl ContentModel {
    pub fn new(config: ContentConfig) -> Self {
        Self {
            config,
            vectors: None,
        }
    }

    pub fn from_vectors(config: ContentConfig, vectors: ContentVectors) -> Self {
        Self {
            config,
            vectors: Some(vectors),
        }
    }

    /// Override how history similarities are aggregated (default: Max)
    pub fn with_aggregation(mut self, aggregation: Aggregation) -> Self {
        self.config.aggregation = aggregation;
        self
    }

    pub fn config(&self) -> &ContentConfig {
        &self.config
    }

    pub fn vectors(&self) -> Option<&ContentVectors> {
        self.vectors.as_ref()
    }

    pub fn is_ready(&self) -> bool {
        self.vectors.is_some()
    }

    /// Build vocabulary and item vectors, replacing any previous fit
    #[instrument(skip(self, items), fields(items = items.len()))]
    pub fn fit(&mut self, items: &[Item]) -> Result<&ContentVectors> {
        let vectors = vectorize(items, &self.config)?;
        Ok(self.vectors.insert(vectors))
    }

    /// Cosine similarity of two items; 0 if either is outside the corpus
    pub fn similarity(&self, a: ItemId, b: ItemId) -> Result<f64> {
        let vectors = self.ready_vectors()?;
        Ok(match (vectors.vector(a), vectors.vector(b)) {
            (Some(va), Some(vb)) => va.dot(vb).clamp(0.0, 1.0),
            _ => 0.0,
        })
    }

    /// Aggregated similarity of each candidate to the user's history
    pub fn score_for_user(&self, history: &[ItemId], candidates: &[ItemId]) -> Result<Vec<f64>> {
        let vectors = self.ready_vectors()?;
        let history: Vec<&SparseVector> =
            history.iter().filter_map(|&id| vectors.vector(id)).collect();

        if history.is_empty() {
            return Ok(vec![0.0; candidates.len()]);
        }

        Ok(candidates
            .iter()
            .map(|&candidate| {
                let Some(cv) = vectors.vector(candidate) else {
                    return 0.0;
                };
                let sims = history.iter().map(|hv| cv.dot(hv).clamp(0.0, 1.0));
                match self.config.aggregation {
                    Aggregation::Max => sims.fold(0.0, f64::max),
                    Aggregation::Mean => sims.sum::<f64>() / history.len() as f64,
                }
            })
            .collect())
    }

    /// The `n` items most similar to `item_id`, best first, excluding itself
    pub fn similar_items(&self, item_id: ItemId, n: usize) -> Result<Vec<(ItemId, f64)>> {
        let vectors = self.ready_vectors()?;
        let Some(target) = vectors.vector(item_id) else {
            return Ok(Vec::new());
        };

        let mut scored: Vec<(ItemId, f64)> = vectors
            .items
            .ids()
            .iter()
            .zip(&vectors.vectors)
            .filter(|(id, _)| **id != item_id)
            .map(|(&id, v)| (id, target.dot(v).clamp(0.0, 1.0)))
            .filter(|(_, score)| *score > 0.0)
            .collect();

        sort_scored(&mut scored);
        scored.truncate(n);
        Ok(scored)
    }

    /// Similarity of each candidate to a free-text query
    pub fn score_query(&self, query: &str, candidates: &[ItemId]) -> Result<Vec<f64>> {
        let vectors = self.ready_vectors()?;
        let query_vector = vectors.transform(query);
        Ok(candidates
            .iter()
            .map(|&id| {
                vectors
                    .vector(id)
                    .map(|v| v.dot(&query_vector).clamp(0.0, 1.0))
                    .unwrap_or(0.0)
            })
            .collect())
    }

    fn ready_vectors(&self) -> Result<&ContentVectors> {
        self.vectors
            .as_ref()
            .ok_or(ModelError::NotReady { model: "content" })
    }
}

impl ScoringModel for ContentModel {
    fn name(&self) -> &'static str {
        "content"
    }

    fn is_ready(&self) -> bool {
        ContentModel::is_ready(self)
    }

    fn score_candidates(&self, context: &UserContext, candidates: &[ItemId]) -> Result<Vec<f64>> {
        if let Some(viewed) = context.viewed_item {
            if self.ready_vectors()?.vector(viewed).is_some() {
                return self.score_for_user(&[viewed], candidates);
            }
        }
        self.score_for_user(&context.history, candidates)
    }
}

/// Score descending, then id ascending
fn sort_scored(scored: &mut [(ItemId, f64)]) {
    scored.sort_by(|a, b| {
        b.1.partial_cmp(&a.1)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.0.cmp(&b.0))
    });
}

/// Fit the vocabulary and vectorize every item
fn vectorize(items: &[Item], config: &ContentConfig) -> Result<ContentVectors> {
    let start = Instant::now();
    let n_docs = items.len();
    if n_docs == 0 {
        return Err(ModelError::InsufficientData(
            "no items to vectorize".to_string(),
        ));
    }

    // Step 1: tokenize in parallel
    let documents: Vec<Vec<String>> = items
        .par_iter()
        .map(|item| tokenize(&item.feature_text()))
        .collect();

    // Step 2: document and corpus frequencies
    let mut doc_freq: HashMap<&str, usize> = HashMap::new();
    let mut corpus_freq: HashMap<&str, usize> = HashMap::new();
    for tokens in &documents {
        let mut seen = HashSet::new();
        for token in tokens {
            *corpus_freq.entry(token.as_str()).or_insert(0) += 1;
            if seen.insert(token.as_str()) {
                *doc_freq.entry(token.as_str()).or_insert(0) += 1;
            }
        }
    }

    // Step 3: prune by max_df, then keep the most frequent terms
    let max_doc_count = config.max_df * n_docs as f64;
    let mut kept: Vec<(&str, usize)> = corpus_freq
        .into_iter()
        .filter(|(term, _)| doc_freq[term] as f64 <= max_doc_count)
        .collect();
    kept.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(b.0)));
    kept.truncate(config.max_features);

    if kept.is_empty() {
        return Err(ModelError::InsufficientData(format!(
            "no terms left after pruning {} documents with max_df {}",
            n_docs, config.max_df
        )));
    }

    // Columns are assigned in alphabetical order
    let mut terms: Vec<&str> = kept.into_iter().map(|(term, _)| term).collect();
    terms.sort_unstable();
    let vocabulary: BTreeMap<String, u32> = terms
        .iter()
        .enumerate()
        .map(|(column, term)| (term.to_string(), column as u32))
        .collect();
    let idf: Vec<f64> = terms
        .iter()
        .map(|term| {
            let df = doc_freq[term] as f64;
            ((1.0 + n_docs as f64) / (1.0 + df)).ln() + 1.0
        })
        .collect();

    // Step 4: weight and normalize each document
    let vectors: Vec<SparseVector> = documents
        .par_iter()
        .map(|tokens| weigh(tokens, &vocabulary, &idf))
        .collect();

    info!(
        items = n_docs,
        vocabulary_size = vocabulary.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Content model trained"
    );

    Ok(ContentVectors {
        vocabulary,
        idf,
        items: IndexMapping::new(items.iter().map(|item| item.id).collect()),
        vectors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: ItemId, name: &str, description: &str, category: &str) -> Item {
        Item {
            id,
            name: name.to_string(),
            description: description.to_string(),
            category: category.to_string(),
        }
    }

    fn catalog() -> Vec<Item> {
        vec![
            item(1, "Trail Running Shoe", "Lightweight shoe for trail running", "Footwear"),
            item(2, "Road Running Shoe", "Cushioned shoe for road running", "Footwear"),
            item(3, "Ceramic Mug", "Glazed ceramic coffee mug", "Kitchen"),
            item(4, "Travel Mug", "Insulated steel coffee mug", "Kitchen"),
            item(5, "Camping Tent", "Two person dome tent", "Outdoor"),
            item(6, "Sleeping Bag", "Down sleeping bag for camping", "Outdoor"),
        ]
    }

    fn fitted() -> ContentModel {
        let mut model = ContentModel::new(ContentConfig::default());
        model.fit(&catalog()).unwrap();
        model
    }

    #[test]
    fn test_tokenize() {
        assert_eq!(
            tokenize("Two-person TENT, 4 season!"),
            vec!["two", "person", "tent", "season"]
        );
    }

    #[test]
    fn test_not_ready_before_fit() {
        let model = ContentModel::new(ContentConfig::default());
        assert!(!model.is_ready());
        assert!(matches!(
            model.similarity(1, 2),
            Err(ModelError::NotReady { model: "content" })
        ));
    }

    #[test]
    fn test_similarity_bounds_and_self() {
        let model = fitted();
        let self_sim = model.similarity(1, 1).unwrap();
        assert!((self_sim - 1.0).abs() < 1e-9);

        for a in 1..=6 {
            for b in 1..=6 {
                let s = model.similarity(a, b).unwrap();
                assert!((0.0..=1.0).contains(&s));
            }
        }
        assert!(model.similarity(1, 2).unwrap() > model.similarity(1, 3).unwrap());
    }

    #[test]
    fn test_absent_item_scores_zero() {
        let model = fitted();
        assert_eq!(model.similarity(1, 99).unwrap(), 0.0);
        assert_eq!(model.score_for_user(&[1], &[99]).unwrap(), vec![0.0]);
    }

    #[test]
    fn test_vectors_are_normalized() {
        let model = fitted();
        let vectors = model.vectors().unwrap();
        for v in &vectors.vectors {
            assert!((v.dot(v) - 1.0).abs() < 1e-9);
        }
        assert!(vectors.vocabulary_size() <= 200);
    }

    #[test]
    fn test_max_df_drops_ubiquitous_terms() {
        let items = vec![
            item(1, "Widget Red", "", "Parts"),
            item(2, "Widget Blue", "", "Parts"),
            item(3, "Widget Green", "", "Parts"),
        ];
        let mut model = ContentModel::new(ContentConfig::default());
        let vectors = model.fit(&items).unwrap();

        assert!(!vectors.vocabulary.contains_key("widget"));
        assert!(!vectors.vocabulary.contains_key("parts"));
        assert!(vectors.vocabulary.contains_key("red"));
    }

    #[test]
    fn test_max_features_keeps_most_frequent() {
        let config = ContentConfig {
            max_features: 2,
            ..ContentConfig::default()
        };
        let mut model = ContentModel::new(config);
        let vectors = model.fit(&catalog()).unwrap();
        assert_eq!(vectors.vocabulary_size(), 2);
        // "running" and "mug" both appear 6 times across the corpus
        assert!(vectors.vocabulary.contains_key("running"));
        assert!(vectors.vocabulary.contains_key("mug"));
    }

    #[test]
    fn test_max_aggregation_is_stable_under_added_history() {
        let model = fitted();
        let candidates = [2, 4, 5];
        let before = model.score_for_user(&[1], &candidates).unwrap();
        let after = model.score_for_user(&[1, 3], &candidates).unwrap();

        for (b, a) in before.iter().zip(&after) {
            assert!(a >= b);
        }
    }

    #[test]
    fn test_mean_aggregation() {
        let model = fitted().with_aggregation(Aggregation::Mean);
        let max_model = fitted();

        let mean = model.score_for_user(&[1, 3], &[2]).unwrap()[0];
        let max = max_model.score_for_user(&[1, 3], &[2]).unwrap()[0];
        assert!(mean < max);
        assert!(mean > 0.0);
    }

    #[test]
    fn test_empty_history_scores_zero() {
        let model = fitted();
        assert_eq!(model.score_for_user(&[], &[1, 2]).unwrap(), vec![0.0, 0.0]);
    }

    #[test]
    fn test_similar_items() {
        let model = fitted();
        let similar = model.similar_items(3, 2).unwrap();

        assert_eq!(similar.len(), 1);
        assert_eq!(similar[0].0, 4);
        assert!(similar.iter().all(|(id, _)| *id != 3));
        assert!(model.similar_items(99, 5).unwrap().is_empty());
    }

    #[test]
    fn test_score_query() {
        let model = fitted();
        let scores = model.score_query("coffee mug", &[3, 4, 5]).unwrap();
        assert!(scores[0] > 0.0);
        assert!(scores[1] > 0.0);
        assert_eq!(scores[2], 0.0);
    }

    #[test]
    fn test_transform_matches_fitted_vector() {
        let model = fitted();
        let vectors = model.vectors().unwrap();
        for item in catalog() {
            assert_eq!(
                &vectors.transform(&item.feature_text()),
                vectors.vector(item.id).unwrap()
            );
        }
    }

    #[test]
    fn test_viewed_item_replaces_history() {
        let model = fitted();
        let candidates = [2, 4, 5];
        let history = UserContext {
            history: vec![1],
            ..UserContext::new(1)
        };

        let by_history = model.score_candidates(&history, &candidates).unwrap();
        assert!(by_history[0] > by_history[1]);

        let viewing_mug = history.clone().with_viewed_item(3);
        let by_viewed = model.score_candidates(&viewing_mug, &candidates).unwrap();
        assert!(by_viewed[1] > by_viewed[0]);
        assert_eq!(by_viewed[0], 0.0);
        assert_eq!(by_viewed, model.score_for_user(&[3], &candidates).unwrap());
    }

    #[test]
    fn test_viewed_item_outside_corpus_uses_history() {
        let model = fitted();
        let context = UserContext {
            history: vec![1],
            ..UserContext::new(1)
        }
        .with_viewed_item(99);

        assert_eq!(
            model.score_candidates(&context, &[2, 4]).unwrap(),
            model.score_for_user(&[1], &[2, 4]).unwrap()
        );
    }

    #[test]
    fn test_empty_vocabulary_is_insufficient() {
        let items = vec![item(1, "Solo", "", "")];
        let mut model = ContentModel::new(ContentConfig::default());
        assert!(matches!(
            model.fit(&items),
            Err(ModelError::InsufficientData(_))
        ));
    }
}
