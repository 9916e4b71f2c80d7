//! Test harness for the recommendation engine.
//!
//! Loads a dataset, restores or trains a generation, serves one request and
//! prints the evaluation of the serving generation.
//!
//! Usage: `server [data-dir] [config.toml]`

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use tracing::{info, warn};

use data_loader::DataIndex;
use server::{RecommendationEngine, RecommendationRequest, load_config_or_default};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,server=debug,pipeline=debug".into()),
        )
        .init();

    let mut args = std::env::args().skip(1);
    let data_dir = PathBuf::from(args.next().unwrap_or_else(|| "data/shop".to_string()));
    let config_path = args.next().map(PathBuf::from);

    info!("Starting recommendation engine test harness");
    let config = load_config_or_default(config_path.as_deref())?;

    info!(data_dir = %data_dir.display(), "Loading data index");
    let index = Arc::new(
        DataIndex::load_from_files(&data_dir)
            .with_context(|| format!("Failed to load dataset from {}", data_dir.display()))?,
    );
    let engine = RecommendationEngine::new(index.clone(), &config)?;

    match engine.restore().await? {
        Some(id) => info!(generation_id = id, "Serving restored generation"),
        None => {
            info!("No stored generation, training");
            let report = engine.retrain().await?;
            info!(
                generation_id = report.outcome.generation_id,
                state = %report.outcome.state,
                "Training finished"
            );
        }
    }

    let Some(user) = index.get_all_user_ids().first().copied() else {
        warn!("Dataset has no users");
        return Ok(());
    };

    let response = engine.recommend(RecommendationRequest::new(user, 10)).await;
    info!(user_id = user, source = %response.source, "Received {} recommendations", response.items.len());
    for (rank, item_id) in response.items.iter().enumerate() {
        if let Some(item) = index.get_item(*item_id) {
            info!("{}. {} [{}]", rank + 1, item.name, item.category);
        }
    }

    match engine.evaluate(None).await {
        Ok(report) => info!(
            precision = report.precision,
            recall = report.recall,
            f1 = report.f1,
            coverage = report.coverage,
            "Evaluation of serving generation"
        ),
        Err(e) => warn!(error = %e, "Evaluation unavailable"),
    }

    Ok(())
}
