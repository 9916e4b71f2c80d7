use anyhow::{anyhow, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use data_loader::{DataIndex, ItemId, Repository, UserId};
use pipeline::{Recommendation, RecommendationSource};
use server::{load_config_or_default, EngineConfig, RecommendationEngine, RecommendationRequest};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;

/// shop-recs - Hybrid product recommendation engine
#[derive(Parser)]
#[command(name = "shop-recs")]
#[command(about = "Product recommendations from purchase history and item content", long_about = None)]
struct Cli {
    /// Directory holding users.dat, items.dat and the interaction files
    #[arg(short, long, default_value = "data/shop")]
    data_dir: PathBuf,

    /// Engine config (TOML); defaults apply when omitted
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Get product recommendations for a user
    Recommend {
        #[arg(long)]
        user_id: UserId,

        /// Number of recommendations to return
        #[arg(long, default_value = "10")]
        limit: usize,

        /// Item currently viewed; never recommended back
        #[arg(long)]
        item_id: Option<ItemId>,

        /// Show per-model scores for each recommendation
        #[arg(long)]
        explain: bool,
    },

    /// Show a user's purchases, ratings and searches
    User {
        #[arg(long)]
        user_id: UserId,
    },

    /// Items most similar in content to an item
    Similar {
        #[arg(long)]
        item_id: ItemId,

        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Most popular items, optionally within a category
    Popular {
        #[arg(long)]
        category: Option<String>,

        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Free-text search over item names and descriptions
    Search {
        #[arg(long)]
        query: String,

        #[arg(long, default_value = "10")]
        limit: usize,
    },

    /// Train a new model generation and persist it
    Train {
        /// Directory to persist generations in (overrides the config)
        #[arg(long)]
        store: Option<PathBuf>,
    },

    /// Evaluate the serving generation against held-out interactions
    Evaluate {
        /// Fraction of each user's real history to hold out
        #[arg(long)]
        held_out: Option<f64>,
    },

    /// Run benchmark to test performance
    Benchmark {
        /// Number of requests to make
        #[arg(long, default_value = "100")]
        requests: usize,

        /// Number of concurrent requests
        #[arg(long, default_value = "10")]
        concurrent: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let cli = Cli::parse();
    let mut config = load_config_or_default(cli.config.as_deref())?;

    println!("Loading dataset from {}...", cli.data_dir.display());
    let start = Instant::now();
    let data_index = Arc::new(
        DataIndex::load_from_files(&cli.data_dir).context("Failed to load dataset")?,
    );
    let (users, items, interactions) = data_index.counts();
    println!(
        "{} Loaded {} users, {} items, {} interactions in {:?}",
        "✓".green(),
        users,
        items,
        interactions,
        start.elapsed()
    );

    match cli.command {
        Commands::Recommend {
            user_id,
            limit,
            item_id,
            explain,
        } => handle_recommend(data_index, &config, user_id, limit, item_id, explain).await?,
        Commands::User { user_id } => handle_user(&data_index, user_id)?,
        Commands::Similar { item_id, limit } => {
            handle_similar(data_index, &config, item_id, limit).await?
        }
        Commands::Popular { category, limit } => {
            handle_popular(&data_index, category.as_deref(), limit)
        }
        Commands::Search { query, limit } => {
            handle_search(data_index, &config, &query, limit).await?
        }
        Commands::Train { store } => {
            if store.is_some() {
                config.store.directory = store;
            }
            handle_train(data_index, &config).await?
        }
        Commands::Evaluate { held_out } => handle_evaluate(data_index, &config, held_out).await?,
        Commands::Benchmark {
            requests,
            concurrent,
        } => handle_benchmark(data_index, &config, requests, concurrent).await?,
    }

    Ok(())
}

/// Engine serving the newest stored generation, training one if there is none
async fn ready_engine(data_index: Arc<DataIndex>, config: &EngineConfig) -> Result<RecommendationEngine> {
    let engine = RecommendationEngine::new(data_index, config)?;
    if let Some(id) = engine.restore().await? {
        println!("{} Restored model generation {}", "✓".green(), id);
        return Ok(engine);
    }

    println!("No stored model generation, training...");
    let start = Instant::now();
    let report = engine.retrain().await?;
    println!(
        "{} Trained generation {} ({}) in {:?}",
        "✓".green(),
        report.outcome.generation_id,
        report.outcome.state,
        start.elapsed()
    );
    Ok(engine)
}

/// Handle the 'recommend' command
async fn handle_recommend(
    data_index: Arc<DataIndex>,
    config: &EngineConfig,
    user_id: UserId,
    limit: usize,
    item_id: Option<ItemId>,
    explain: bool,
) -> Result<()> {
    if data_index.get_user(user_id).is_none() {
        println!(
            "{} User {} not found, showing popular items",
            "!".yellow(),
            user_id
        );
    }

    let engine = ready_engine(data_index.clone(), config).await?;
    let mut request = RecommendationRequest::new(user_id, limit);
    if let Some(item_id) = item_id {
        request = request.excluding(item_id);
    }

    if explain {
        let recommendation = engine.explain(request).await;
        print_explained(&data_index, &recommendation);
    } else {
        let response = engine.recommend(request).await;
        print_items(&data_index, &response.items, response.source);
    }
    Ok(())
}

/// Handle the 'user' command
fn handle_user(data_index: &DataIndex, user_id: UserId) -> Result<()> {
    let user = data_index
        .get_user(user_id)
        .ok_or_else(|| anyhow!("User {} not found", user_id))?;

    println!("{}", format!("User {}: {}", user_id, user.name).bold().blue());

    let orders = data_index.get_orders(user_id);
    let ratings = data_index.get_ratings(user_id);
    let searches = data_index.get_searches(user_id);
    let synthetic = data_index
        .get_interactions(user_id)
        .iter()
        .filter(|r| r.is_synthetic)
        .count();

    println!("{}Purchases: {}", "• ".green(), orders.len());
    println!("{}Ratings: {}", "• ".green(), ratings.len());
    println!("{}Searches: {}", "• ".green(), searches.len());
    println!("{}Synthetic records: {}", "• ".cyan(), synthetic);

    if !ratings.is_empty() {
        let avg = ratings.iter().filter_map(|r| r.value).sum::<f32>() / ratings.len() as f32;
        println!("{}Average rating: {:.2}", "• ".cyan(), avg);
    }

    println!("Recent purchases:");
    let mut recent = orders.clone();
    recent.sort_by_key(|r| std::cmp::Reverse(r.timestamp));
    for record in recent.iter().take(5) {
        if let Some(item) = data_index.get_item(record.item_id) {
            println!("  - {} [{}]", item.name, item.category);
        }
    }

    // Category preferences across all interaction kinds
    let mut per_category: std::collections::BTreeMap<String, usize> = Default::default();
    for record in data_index.get_interactions(user_id) {
        if let Some(item) = data_index.get_item(record.item_id) {
            *per_category.entry(item.category.clone()).or_insert(0) += 1;
        }
    }
    let mut per_category: Vec<_> = per_category.into_iter().collect();
    per_category.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    println!("Categories:");
    for (category, count) in per_category {
        println!("  - {}: {} interactions", category, count);
    }
    Ok(())
}

/// Handle the 'similar' command
async fn handle_similar(
    data_index: Arc<DataIndex>,
    config: &EngineConfig,
    item_id: ItemId,
    limit: usize,
) -> Result<()> {
    let item = data_index
        .get_item(item_id)
        .ok_or_else(|| anyhow!("Item {} not found", item_id))?;
    let engine = ready_engine(data_index.clone(), config).await?;
    let similar = engine.similar_items(item_id, limit)?;

    println!("{}", format!("Items similar to '{}':", item.name).bold().blue());
    print_scored(&data_index, &similar);
    Ok(())
}

/// Handle the 'popular' command
fn handle_popular(data_index: &DataIndex, category: Option<&str>, limit: usize) {
    use data_loader::PopularityProvider;

    let title = match category {
        Some(category) => format!("Popular in {}:", category),
        None => "Popular items:".to_string(),
    };
    println!("{}", title.bold().blue());

    for (rank, item_id) in data_index.top_popular(category, limit).iter().enumerate() {
        let Some(item) = data_index.get_item(*item_id) else {
            continue;
        };
        let stats = data_index.get_item_stats(*item_id);
        println!(
            "{}. {} [{}] avg {:.2} ({} ratings, {} purchases)",
            (rank + 1).to_string().green(),
            item.name,
            item.category,
            stats.map(|s| s.avg_rating).unwrap_or(0.0),
            stats.map(|s| s.rating_count).unwrap_or(0),
            stats.map(|s| s.purchase_count).unwrap_or(0),
        );
    }
}

/// Handle the 'search' command
async fn handle_search(
    data_index: Arc<DataIndex>,
    config: &EngineConfig,
    query: &str,
    limit: usize,
) -> Result<()> {
    let engine = ready_engine(data_index.clone(), config).await?;
    let hits = engine.search(query, limit)?;

    println!("{}", format!("Search results for '{}':", query).bold().blue());
    if hits.is_empty() {
        println!("  (no matches)");
    }
    print_scored(&data_index, &hits);
    Ok(())
}

/// Handle the 'train' command
async fn handle_train(data_index: Arc<DataIndex>, config: &EngineConfig) -> Result<()> {
    let engine = RecommendationEngine::new(data_index, config)?;

    let start = Instant::now();
    let report = engine.retrain().await?;
    let status = engine.status();

    println!(
        "{} Trained generation {} in {:?}",
        "✓".green(),
        report.outcome.generation_id,
        start.elapsed()
    );
    println!("{}State: {}", "• ".green(), status.state);
    println!("{}Users: {}", "• ".green(), status.users);
    println!("{}Items: {}", "• ".green(), status.items);
    println!("{}Vocabulary: {} terms", "• ".green(), status.vocabulary_size);
    for failure in &report.outcome.failures {
        println!(
            "{} {} model failed: {}",
            "!".yellow(),
            failure.model,
            failure.reason
        );
    }
    match &config.store.directory {
        Some(directory) => println!("{}Stored in {}", "• ".cyan(), directory.display()),
        None => println!(
            "{} No store directory configured; generation was kept in memory only",
            "!".yellow()
        ),
    }

    if let Some(evaluation) = &report.evaluation {
        print_evaluation(evaluation);
    }
    Ok(())
}

/// Handle the 'evaluate' command
async fn handle_evaluate(
    data_index: Arc<DataIndex>,
    config: &EngineConfig,
    held_out: Option<f64>,
) -> Result<()> {
    let engine = ready_engine(data_index, config).await?;
    let report = engine.evaluate(held_out).await?;
    print_evaluation(&report);
    Ok(())
}

/// Handle the 'benchmark' command
async fn handle_benchmark(
    data_index: Arc<DataIndex>,
    config: &EngineConfig,
    requests: usize,
    concurrent: usize,
) -> Result<()> {
    let user_ids = data_index.get_all_user_ids();
    if user_ids.is_empty() || requests == 0 {
        return Err(anyhow!("Benchmark needs at least one user and one request"));
    }

    // Cache off, so every request goes through the scorer
    let engine = ready_engine(data_index.clone(), config).await?.without_cache();
    let limiter = Arc::new(Semaphore::new(concurrent.max(1)));

    let wall = Instant::now();
    let mut handles = vec![];
    for _ in 0..requests {
        let user = user_ids[rand::random_range(0..user_ids.len())];
        let engine = engine.clone();
        let limiter = limiter.clone();
        handles.push(tokio::spawn(async move {
            let _permit = limiter.acquire_owned().await?;
            let start = Instant::now();
            let response = engine.recommend(RecommendationRequest::new(user, 20)).await;
            Ok::<_, anyhow::Error>((start.elapsed(), response.source))
        }));
    }

    let mut timings: Vec<Duration> = vec![];
    let mut fallbacks = 0;
    for handle in handles {
        let (elapsed, source) = handle.await??;
        if source == RecommendationSource::Fallback {
            fallbacks += 1;
        }
        timings.push(elapsed);
    }
    let wall_time = wall.elapsed();

    let total_time: Duration = timings.iter().sum();
    let avg_latency = total_time / (timings.len() as u32);
    timings.sort();
    let p50 = timings[timings.len() / 2];
    let p95 = timings[(timings.len() as f32 * 0.95) as usize];
    let p99 = timings[(timings.len() as f32 * 0.99) as usize];
    let throughput = requests as f32 / wall_time.as_secs_f32();

    println!("{}", "Benchmark results:".bold().blue());
    println!("Wall time: {:?}", wall_time);
    println!("Average latency: {:?}", avg_latency);
    println!("P50 latency: {:?}", p50);
    println!("P95 latency: {:?}", p95);
    println!("P99 latency: {:?}", p99);
    println!("Throughput: {:.2} requests/second", throughput);
    println!("Fallback responses: {}/{}", fallbacks, requests);

    Ok(())
}

fn print_items(data_index: &DataIndex, items: &[ItemId], source: RecommendationSource) {
    println!(
        "{} {}",
        "Recommendations".bold().blue(),
        format!("(source: {})", source).dimmed()
    );
    if items.is_empty() {
        println!("  (nothing to recommend)");
    }
    for (rank, item_id) in items.iter().enumerate() {
        if let Some(item) = data_index.get_item(*item_id) {
            println!(
                "{}. {} [{}]",
                (rank + 1).to_string().green(),
                item.name,
                item.category
            );
        }
    }
}

fn print_explained(data_index: &DataIndex, recommendation: &Recommendation) {
    if recommendation.scored.is_empty() {
        print_items(data_index, &recommendation.items, recommendation.source);
        return;
    }

    println!(
        "{} {}",
        "Recommendations".bold().blue(),
        format!("(source: {})", recommendation.source).dimmed()
    );
    let fmt = |score: Option<f64>| match score {
        Some(score) => format!("{:.3}", score),
        None => "-".to_string(),
    };
    for (rank, candidate) in recommendation.scored.iter().enumerate() {
        let name = data_index
            .get_item(candidate.item_id)
            .map(|item| item.name.as_str())
            .unwrap_or("?");
        println!(
            "{}. {} [{}] - Score: {:.3}{}",
            (rank + 1).to_string().green(),
            name,
            candidate.category,
            candidate.score,
            if candidate.boosted { " (consensus)".yellow().to_string() } else { String::new() }
        );
        println!(
            "   collaborative {}  content {}",
            fmt(candidate.collaborative),
            fmt(candidate.content)
        );
    }
}

fn print_scored(data_index: &DataIndex, scored: &[(ItemId, f64)]) {
    for (rank, (item_id, score)) in scored.iter().enumerate() {
        if let Some(item) = data_index.get_item(*item_id) {
            println!(
                "{}. {} [{}] - {:.3}",
                (rank + 1).to_string().green(),
                item.name,
                item.category,
                score
            );
        }
    }
}

fn print_evaluation(report: &pipeline::EvaluationReport) {
    println!(
        "{}",
        format!(
            "Evaluation @{} (held out {:.0}%):",
            report.top_n,
            report.held_out_fraction * 100.0
        )
        .bold()
        .blue()
    );
    println!("{}Precision: {:.4}", "• ".green(), report.precision);
    println!("{}Recall: {:.4}", "• ".green(), report.recall);
    println!("{}F1: {:.4}", "• ".green(), report.f1);
    println!("{}Coverage: {:.4}", "• ".green(), report.coverage);
    println!(
        "{}Users: {}, hits: {}/{}",
        "• ".cyan(),
        report.users_evaluated,
        report.hits,
        report.relevant
    );
}
