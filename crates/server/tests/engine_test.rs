//! End-to-end tests of the serving engine: training, fallback, caching,
//! swap isolation, persistence and the lifecycle state machine.

use std::collections::HashSet;
use std::sync::Arc;

use data_loader::{DataIndex, InteractionRecord, Item, PopularityProvider, User};
use models::build_user_context;
use pipeline::{EvaluationError, HybridScorer, RecommendationSource};
use server::{
    EngineConfig, InMemoryModelStore, LifecycleError, LifecycleState, ModelStore,
    RecommendationEngine, RecommendationRequest, StoreError,
};

fn item(id: u32, name: &str, description: &str, category: &str) -> Item {
    Item {
        id,
        name: name.to_string(),
        description: description.to_string(),
        category: category.to_string(),
    }
}

fn catalog() -> Vec<Item> {
    vec![
        item(10, "Ceramic Coffee Mug", "Glazed mug for coffee", "Kitchen"),
        item(11, "Steel Coffee Mug", "Insulated mug for coffee", "Kitchen"),
        item(12, "Coffee Grinder", "Burr grinder for coffee beans", "Kitchen"),
        item(13, "Tea Kettle", "Whistling kettle for tea", "Kitchen"),
        item(20, "Camping Tent", "Waterproof tent for camping", "Outdoor"),
        item(21, "Camping Stove", "Gas stove for camping trips", "Outdoor"),
        item(22, "Hiking Backpack", "Backpack for hiking trips", "Outdoor"),
        item(23, "Sleeping Bag", "Warm bag for camping nights", "Outdoor"),
        item(30, "Desk Lamp", "Adjustable lamp for the desk", "Office"),
    ]
}

fn create_test_index() -> DataIndex {
    let mut index = DataIndex::new();
    for id in 1..=7 {
        index.insert_user(User {
            id,
            name: format!("user {id}"),
        });
    }
    for item in catalog() {
        index.insert_item(item);
    }

    index.insert_interaction(InteractionRecord::purchase(1, 10, 1, false));
    index.insert_interaction(InteractionRecord::rating(1, 11, 4.0, 2, false));
    for user in 2..=3 {
        for (t, id) in [10, 11, 12, 13].into_iter().enumerate() {
            index.insert_interaction(InteractionRecord::purchase(user, id, t as i64, false));
        }
    }
    for user in 4..=6 {
        for (t, id) in [20, 21, 22, 23].into_iter().enumerate() {
            index.insert_interaction(InteractionRecord::purchase(user, id, t as i64, false));
        }
        index.insert_interaction(InteractionRecord::rating(user, 20, 5.0, 9, false));
        index.insert_interaction(InteractionRecord::rating(user, 21, 4.0, 9, false));
        index.insert_interaction(InteractionRecord::rating(user, 22, 4.0, 9, false));
        index.insert_interaction(InteractionRecord::search(user, 30, 10, true));
    }
    // User 7 is cold

    index.build_secondary_indices();
    index.compute_item_stats();
    index
}

fn test_engine() -> RecommendationEngine {
    RecommendationEngine::with_store(
        Arc::new(create_test_index()),
        &EngineConfig::default(),
        Arc::new(InMemoryModelStore::new()),
    )
}

fn empty_engine() -> RecommendationEngine {
    let mut index = DataIndex::new();
    index.insert_user(User {
        id: 1,
        name: "only".to_string(),
    });
    RecommendationEngine::with_store(
        Arc::new(index),
        &EngineConfig::default(),
        Arc::new(InMemoryModelStore::new()),
    )
}

#[tokio::test]
async fn test_untrained_engine_serves_popularity_fallback() {
    let engine = test_engine();
    assert_eq!(engine.status().state, LifecycleState::Uninitialized);

    let response = engine.recommend(RecommendationRequest::new(1, 3)).await;
    assert_eq!(response.source, RecommendationSource::Fallback);
    assert_eq!(response.items, engine.index().top_popular(None, 3));
}

#[tokio::test]
async fn test_untrained_fallback_anchors_on_viewed_item_category() {
    let engine = test_engine();

    let response = engine
        .recommend(RecommendationRequest::new(1, 2).excluding(20))
        .await;
    assert_eq!(response.source, RecommendationSource::Fallback);
    assert!(!response.items.is_empty());
    assert!(!response.items.contains(&20));
    for id in &response.items {
        assert!([21, 22, 23].contains(id), "item {id} is not Outdoor");
    }
}

#[tokio::test]
async fn test_trained_engine_serves_hybrid_then_cache() {
    let engine = test_engine();
    let report = engine.retrain().await.unwrap();
    assert_eq!(report.outcome.state, LifecycleState::Ready);
    assert!(report.evaluation.is_some());

    let request = RecommendationRequest::new(1, 3);
    let first = engine.recommend(request).await;
    assert_eq!(first.source, RecommendationSource::Hybrid);
    assert!(first.items.len() <= 3);
    assert!(!first.items.contains(&10));
    assert!(!first.items.contains(&11));

    let second = engine.recommend(request).await;
    assert_eq!(second.source, RecommendationSource::Cache);
    assert_eq!(second.items, first.items);

    // Different context, different key
    let third = engine.recommend(request.excluding(12)).await;
    assert_ne!(third.source, RecommendationSource::Cache);
    assert!(!third.items.contains(&12));
}

#[tokio::test]
async fn test_fallback_results_are_not_cached() {
    let engine = test_engine();
    engine.retrain().await.unwrap();

    let request = RecommendationRequest::new(7, 3);
    assert_eq!(
        engine.recommend(request).await.source,
        RecommendationSource::Fallback
    );
    assert_eq!(
        engine.recommend(request).await.source,
        RecommendationSource::Fallback
    );
}

#[tokio::test]
async fn test_recommend_invariants_for_every_user() {
    let engine = test_engine().without_cache();
    engine.retrain().await.unwrap();

    for user in 1..=7 {
        for n in [1, 2, 5] {
            let response = engine
                .recommend(RecommendationRequest::new(user, n).excluding(13))
                .await;
            let unique: HashSet<_> = response.items.iter().collect();
            assert_eq!(unique.len(), response.items.len());
            assert!(response.items.len() <= n);
            assert!(!response.items.contains(&13));
        }
    }
}

#[tokio::test]
async fn test_second_trigger_while_training_is_rejected() {
    let engine = test_engine();

    let handle = engine.spawn_retrain().unwrap();
    assert!(matches!(
        engine.spawn_retrain(),
        Err(LifecycleError::AlreadyTraining)
    ));
    assert!(matches!(
        engine.retrain().await,
        Err(LifecycleError::AlreadyTraining)
    ));

    handle.await.unwrap().unwrap();
    // Lock released once the pass finished
    assert!(engine.retrain().await.is_ok());
}

#[tokio::test]
async fn test_in_flight_snapshot_survives_swap() {
    let engine = test_engine();
    engine.retrain().await.unwrap();

    let snapshot = engine.current_generation();
    let items = snapshot.catalog.item_ids().to_vec();
    let before = snapshot
        .collaborative
        .score_items(1, &items)
        .unwrap();

    engine.retrain().await.unwrap();

    assert!(engine.current_generation().id > snapshot.id);
    let after = snapshot
        .collaborative
        .score_items(1, &items)
        .unwrap();
    assert_eq!(before, after);
}

#[tokio::test]
async fn test_concurrent_requests_during_retrain() {
    let engine = test_engine().without_cache();
    engine.retrain().await.unwrap();
    let old = engine.current_generation();

    let training = engine.spawn_retrain().unwrap();
    let mut requests = Vec::new();
    for user in 1..=7 {
        let engine = engine.clone();
        requests.push(tokio::spawn(async move {
            (user, engine.explain(RecommendationRequest::new(user, 4)).await)
        }));
    }
    let mut responses = Vec::new();
    for request in requests {
        responses.push(request.await.unwrap());
    }
    training.await.unwrap().unwrap();
    assert_eq!(engine.status().state, LifecycleState::Ready);
    let new = engine.current_generation();
    assert!(new.id > old.id);

    // Every response is exactly what one whole generation produces
    let scorer = HybridScorer::new(engine.index().clone());
    for (user, response) in responses {
        assert!(response.items.len() <= 4);
        assert_ne!(response.source, RecommendationSource::Cache);

        let context = build_user_context(engine.index().as_ref(), user);
        let from_old = scorer.recommend(&old.signals(), &old.catalog, &context, None, 4);
        let from_new = scorer.recommend(&new.signals(), &new.catalog, &context, None, 4);
        assert!(
            response == from_old || response == from_new,
            "user {user} got scores from neither generation"
        );
    }
}

#[tokio::test]
async fn test_unbounded_n_is_served() {
    let engine = test_engine().without_cache();
    let catalog_len = catalog().len();

    let untrained = engine
        .recommend(RecommendationRequest::new(1, usize::MAX).excluding(20))
        .await;
    assert_eq!(untrained.source, RecommendationSource::Fallback);
    assert!(!untrained.items.contains(&20));

    engine.retrain().await.unwrap();
    for user in [1, 4, 7, 99] {
        let response = engine
            .recommend(RecommendationRequest::new(user, usize::MAX).excluding(12))
            .await;
        assert!(response.items.len() <= catalog_len);
        assert!(!response.items.contains(&12));
    }
}

#[tokio::test]
async fn test_persisted_generation_restores_identical_scores() {
    let store: Arc<dyn ModelStore> = Arc::new(InMemoryModelStore::new());
    let config = EngineConfig::default();
    let index = Arc::new(create_test_index());

    let trained = RecommendationEngine::with_store(index.clone(), &config, store.clone());
    let generation_id = trained.retrain().await.unwrap().outcome.generation_id;

    let restored = RecommendationEngine::with_store(index, &config, store);
    assert_eq!(restored.restore().await.unwrap(), Some(generation_id));
    assert_eq!(restored.status().state, LifecycleState::Ready);

    let a = trained.current_generation();
    let b = restored.current_generation();
    let items = a.catalog.item_ids().to_vec();
    for user in 1..=6 {
        assert_eq!(
            a.collaborative.score_items(user, &items).unwrap(),
            b.collaborative.score_items(user, &items).unwrap()
        );
    }
    assert_eq!(
        trained.similar_items(10, 3).unwrap(),
        restored.similar_items(10, 3).unwrap()
    );

    let request = RecommendationRequest::new(1, 3);
    let trained = trained.without_cache();
    let restored = restored.without_cache();
    assert_eq!(
        trained.recommend(request).await,
        restored.recommend(request).await
    );

    // New generations continue after the restored id
    let next = restored.retrain().await.unwrap().outcome.generation_id;
    assert!(next > generation_id);
}

#[tokio::test]
async fn test_restore_from_empty_store() {
    let engine = test_engine();
    assert_eq!(engine.restore().await.unwrap(), None);
    assert_eq!(engine.status().state, LifecycleState::Uninitialized);
}

#[tokio::test]
async fn test_partial_failure_degrades_to_content_only() {
    // Items but no interactions: the matrix is empty, TF-IDF still fits
    let mut index = DataIndex::new();
    index.insert_user(User {
        id: 1,
        name: "browser".to_string(),
    });
    for item in catalog() {
        index.insert_item(item);
    }
    let engine = RecommendationEngine::with_store(
        Arc::new(index),
        &EngineConfig::default(),
        Arc::new(InMemoryModelStore::new()),
    );

    let report = engine.retrain().await.unwrap();
    assert_eq!(report.outcome.state, LifecycleState::Degraded);
    assert_eq!(report.outcome.failures.len(), 1);
    assert_eq!(report.outcome.failures[0].model, "collaborative");

    let status = engine.status();
    assert_eq!(status.state, LifecycleState::Degraded);
    assert!(!status.collaborative_ready);
    assert!(status.content_ready);
    assert!(!engine.similar_items(10, 2).unwrap().is_empty());
}

#[tokio::test]
async fn test_total_failure_keeps_previous_state() {
    let engine = empty_engine();
    let mut states = engine.lifecycle().subscribe();

    let result = engine.retrain().await;
    assert!(matches!(result, Err(LifecycleError::TrainingFailed { .. })));
    assert_eq!(engine.status().state, LifecycleState::Uninitialized);
    assert_eq!(engine.current_generation().id, 0);
    assert_eq!(*states.borrow_and_update(), LifecycleState::Uninitialized);
}

struct FailingStore;

impl ModelStore for FailingStore {
    fn save(&self, _generation_id: u64, _bytes: &[u8]) -> Result<(), StoreError> {
        Err(StoreError::Io(std::io::Error::other("disk full")))
    }

    fn load(&self, generation_id: u64) -> Result<Vec<u8>, StoreError> {
        Err(StoreError::NotFound(generation_id))
    }

    fn latest(&self) -> Result<Option<u64>, StoreError> {
        Ok(None)
    }
}

#[tokio::test]
async fn test_persist_failure_does_not_swap() {
    let engine = RecommendationEngine::with_store(
        Arc::new(create_test_index()),
        &EngineConfig::default(),
        Arc::new(FailingStore),
    );

    let result = engine.retrain().await;
    assert!(matches!(result, Err(LifecycleError::Persistence(_))));
    assert_eq!(engine.current_generation().id, 0);
    assert_eq!(engine.status().state, LifecycleState::Uninitialized);

    let response = engine.recommend(RecommendationRequest::new(1, 3)).await;
    assert_eq!(response.source, RecommendationSource::Fallback);
}

#[tokio::test]
async fn test_state_changes_are_published() {
    let engine = test_engine();
    let mut states = engine.lifecycle().subscribe();

    engine.retrain().await.unwrap();
    assert!(states.has_changed().unwrap());
    assert_eq!(*states.borrow_and_update(), LifecycleState::Ready);
}

#[tokio::test]
async fn test_evaluate_serving_generation() {
    let engine = test_engine();
    engine.retrain().await.unwrap();

    let report = engine.evaluate(Some(0.25)).await.unwrap();
    assert_eq!(report.users_evaluated, 6);
    assert!((0.0..=1.0).contains(&report.precision));
    assert!((0.0..=1.0).contains(&report.coverage));

    let err = engine.evaluate(Some(1.5)).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<EvaluationError>(),
        Some(EvaluationError::InvalidFraction(_))
    ));
}

#[tokio::test]
async fn test_evaluate_without_test_data() {
    let engine = empty_engine();
    let err = engine.evaluate(None).await.unwrap_err();
    assert!(matches!(
        err.downcast_ref::<EvaluationError>(),
        Some(EvaluationError::InsufficientTestData { found: 0, .. })
    ));
}

#[tokio::test]
async fn test_search_and_popular() {
    let engine = test_engine();
    engine.retrain().await.unwrap();

    let hits = engine.search("coffee", 5).unwrap();
    assert!(!hits.is_empty());
    for (id, _) in &hits {
        assert!([10, 11, 12].contains(id));
    }

    let popular = engine.popular(Some("Outdoor"), 2);
    assert_eq!(popular.len(), 2);
    assert!(popular.iter().all(|id| [20, 21, 22, 23].contains(id)));
}
