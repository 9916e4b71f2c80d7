//! Engine configuration.
//!
//! Every section and field has a default, so an empty file (or no file at
//! all) yields the stock engine. Example:
//!
//! ```toml
//! [training]
//! components = 20
//! max_iter = 500
//!
//! [training.quality]
//! synthetic_purchase = 0.5
//!
//! [training.content]
//! aggregation = "mean"
//!
//! [scoring]
//! collaborative_weight = 0.7
//! content_weight = 0.3
//!
//! [scoring.diversity]
//! max_per_category = 2
//!
//! [cache]
//! ttl_secs = 3600
//! max_entries = 10000
//!
//! [store]
//! directory = "models"
//! ```

use anyhow::{Context, Result, bail};
use models::{ContentConfig, NmfConfig, QualityWeights};
use pipeline::{EvaluationConfig, HybridConfig};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub training: TrainingConfig,
    pub scoring: HybridConfig,
    pub evaluation: EvaluationConfig,
    pub cache: CacheConfig,
    pub store: StoreConfig,
}

/// Everything a training pass needs
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainingConfig {
    #[serde(flatten)]
    pub nmf: NmfConfig,
    pub quality: QualityWeights,
    pub content: ContentConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub ttl_secs: u64,
    /// Upper bound on cached lists before least-used ones are evicted
    pub max_entries: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: 3600,
            max_entries: 10_000,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

/// Where generations are persisted; in memory when no directory is set
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub directory: Option<PathBuf>,
}

impl EngineConfig {
    /// Reject values the engine cannot run with
    pub fn validate(&self) -> Result<()> {
        let nmf = &self.training.nmf;
        if nmf.components == 0 {
            bail!("training.components must be >= 1");
        }
        if nmf.max_iter == 0 {
            bail!("training.max_iter must be >= 1");
        }
        if nmf.tolerance.is_nan() || nmf.tolerance <= 0.0 {
            bail!("training.tolerance must be > 0");
        }

        let quality = &self.training.quality;
        for (name, value) in [
            ("real", quality.real),
            ("synthetic_purchase", quality.synthetic_purchase),
            ("synthetic_rating", quality.synthetic_rating),
            ("search", quality.search),
        ] {
            if !(0.0..=1.0).contains(&value) {
                bail!("training.quality.{name} must be in [0.0, 1.0]");
            }
        }

        let content = &self.training.content;
        if content.max_features == 0 {
            bail!("training.content.max_features must be >= 1");
        }
        if !(content.max_df > 0.0 && content.max_df <= 1.0) {
            bail!("training.content.max_df must be in (0.0, 1.0]");
        }

        let scoring = &self.scoring;
        if scoring.collaborative_weight < 0.0 || scoring.content_weight < 0.0 {
            bail!("scoring weights must be >= 0");
        }
        if scoring.collaborative_weight + scoring.content_weight <= 0.0 {
            bail!("scoring weights must not both be 0");
        }
        if scoring.consensus_factor < 1.0 {
            bail!("scoring.consensus_factor must be >= 1.0");
        }
        if scoring.consensus_depth == 0 {
            bail!("scoring.consensus_depth must be >= 1");
        }
        if scoring.diversity.max_per_category == 0 {
            bail!("scoring.diversity.max_per_category must be >= 1");
        }

        let evaluation = &self.evaluation;
        if !(evaluation.held_out_fraction > 0.0 && evaluation.held_out_fraction < 1.0) {
            bail!("evaluation.held_out_fraction must be in (0.0, 1.0)");
        }
        if evaluation.top_n == 0 {
            bail!("evaluation.top_n must be >= 1");
        }

        if self.cache.enabled && self.cache.ttl_secs == 0 {
            bail!("cache.ttl_secs must be > 0 when the cache is enabled");
        }
        if self.cache.enabled && self.cache.max_entries == 0 {
            bail!("cache.max_entries must be >= 1 when the cache is enabled");
        }

        Ok(())
    }
}

/// Read, parse and validate a TOML config file
pub fn load_config(path: &Path) -> Result<EngineConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: EngineConfig =
        toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    config.validate()?;

    Ok(config)
}

/// `load_config` when a path is given, defaults otherwise
pub fn load_config_or_default(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => load_config(path),
        None => Ok(EngineConfig::default()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use models::Aggregation;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn parse(toml_str: &str) -> EngineConfig {
        toml::from_str(toml_str).unwrap()
    }

    #[test]
    fn test_empty_file_gives_defaults() {
        let config = parse("");
        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.cache.ttl_secs, 3600);
        assert_eq!(config.cache.max_entries, 10_000);
        assert!(config.store.directory.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_sections_keep_other_defaults() {
        let config = parse(
            r#"
            [training]
            components = 8
            seed = 7

            [training.quality]
            synthetic_purchase = 0.25

            [training.content]
            aggregation = "mean"

            [scoring]
            content_weight = 0.5

            [scoring.diversity]
            max_per_category = 3

            [store]
            directory = "models"
            "#,
        );

        assert_eq!(config.training.nmf.components, 8);
        assert_eq!(config.training.nmf.seed, 7);
        assert_eq!(config.training.nmf.max_iter, 500);
        assert_eq!(config.training.quality.synthetic_purchase, 0.25);
        assert_eq!(config.training.quality.synthetic_rating, 0.6);
        assert_eq!(config.training.content.aggregation, Aggregation::Mean);
        assert_eq!(config.scoring.content_weight, 0.5);
        assert_eq!(config.scoring.collaborative_weight, 0.7);
        assert_eq!(config.scoring.diversity.max_per_category, 3);
        assert_eq!(config.store.directory, Some(PathBuf::from("models")));
    }

    #[test]
    fn test_validation_rejects_bad_values() {
        let mut config = EngineConfig::default();
        config.evaluation.held_out_fraction = 1.0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.scoring.consensus_factor = 0.9;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.scoring.collaborative_weight = 0.0;
        config.scoring.content_weight = 0.0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.training.nmf.components = 0;
        assert!(config.validate().is_err());

        let mut config = EngineConfig::default();
        config.cache.max_entries = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[cache]\nenabled = false\nttl_secs = 0").unwrap();

        let config = load_config(file.path()).unwrap();
        assert!(!config.cache.enabled);
    }

    #[test]
    fn test_load_config_rejects_invalid_file() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "[evaluation]\nheld_out_fraction = 0.0").unwrap();
        assert!(load_config(file.path()).is_err());

        assert!(load_config(Path::new("/nonexistent/engine.toml")).is_err());
    }
}
