//! Generation persistence.
//!
//! The store only sees opaque bytes keyed by generation id. What goes into
//! those bytes is decided here by [`GenerationBlob`], a serde_json document
//! holding the factors, vectors and catalog of one generation.

use chrono::{DateTime, Utc};
use models::{
    CollaborativeFactors, CollaborativeModel, ContentConfig, ContentModel, ContentVectors,
    NmfConfig,
};
use parking_lot::RwLock;
use pipeline::Catalog;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use crate::generation::ModelGeneration;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Generation {0} not found in store")]
    NotFound(u64),

    #[error("Store I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Opaque blob store keyed by generation id
pub trait ModelStore: Send + Sync {
    fn save(&self, generation_id: u64, bytes: &[u8]) -> Result<(), StoreError>;

    fn load(&self, generation_id: u64) -> Result<Vec<u8>, StoreError>;

    /// Highest stored generation id, if any
    fn latest(&self) -> Result<Option<u64>, StoreError>;
}

/// One `generation-{id}.json` file per generation
#[derive(Debug, Clone)]
pub struct FileModelStore {
    directory: PathBuf,
}

impl FileModelStore {
    /// Open (creating if needed) a store rooted at `directory`
    pub fn open(directory: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let directory = directory.into();
        fs::create_dir_all(&directory)?;
        Ok(Self { directory })
    }

    pub fn directory(&self) -> &Path {
        &self.directory
    }

    fn path_for(&self, generation_id: u64) -> PathBuf {
        self.directory
            .join(format!("generation-{generation_id}.json"))
    }
}

/// Generation id encoded in a store file name
fn parse_generation_file(name: &str) -> Option<u64> {
    name.strip_prefix("generation-")?
        .strip_suffix(".json")?
        .parse()
        .ok()
}

impl ModelStore for FileModelStore {
    fn save(&self, generation_id: u64, bytes: &[u8]) -> Result<(), StoreError> {
        // Write then rename so a crash never leaves a half-written generation
        let path = self.path_for(generation_id);
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &path)?;
        debug!(path = %path.display(), bytes = bytes.len(), "Saved generation");
        Ok(())
    }

    fn load(&self, generation_id: u64) -> Result<Vec<u8>, StoreError> {
        let path = self.path_for(generation_id);
        if !path.exists() {
            return Err(StoreError::NotFound(generation_id));
        }
        Ok(fs::read(path)?)
    }

    fn latest(&self) -> Result<Option<u64>, StoreError> {
        let mut latest = None;
        for entry in fs::read_dir(&self.directory)? {
            let entry = entry?;
            if let Some(id) = entry.file_name().to_str().and_then(parse_generation_file) {
                latest = latest.max(Some(id));
            }
        }
        Ok(latest)
    }
}

/// Store that lives and dies with the process
#[derive(Debug, Default)]
pub struct InMemoryModelStore {
    blobs: RwLock<BTreeMap<u64, Vec<u8>>>,
}

impl InMemoryModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.read().is_empty()
    }
}

impl ModelStore for InMemoryModelStore {
    fn save(&self, generation_id: u64, bytes: &[u8]) -> Result<(), StoreError> {
        self.blobs.write().insert(generation_id, bytes.to_vec());
        Ok(())
    }

    fn load(&self, generation_id: u64) -> Result<Vec<u8>, StoreError> {
        self.blobs
            .read()
            .get(&generation_id)
            .cloned()
            .ok_or(StoreError::NotFound(generation_id))
    }

    fn latest(&self) -> Result<Option<u64>, StoreError> {
        Ok(self.blobs.read().keys().next_back().copied())
    }
}

/// Serialized form of a [`ModelGeneration`]
///
/// A model that failed to train in a degraded generation is stored as `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenerationBlob {
    pub id: u64,
    pub trained_at: Option<DateTime<Utc>>,
    pub nmf: NmfConfig,
    pub collaborative: Option<CollaborativeFactors>,
    pub content_config: ContentConfig,
    pub content: Option<ContentVectors>,
    pub catalog: Catalog,
}

impl GenerationBlob {
    pub fn from_generation(generation: &ModelGeneration) -> Self {
        Self {
            id: generation.id,
            trained_at: generation.trained_at,
            nmf: *generation.collaborative.config(),
            collaborative: generation.collaborative.factors().cloned(),
            content_config: *generation.content.config(),
            content: generation.content.vectors().cloned(),
            catalog: generation.catalog.clone(),
        }
    }

    pub fn into_generation(self) -> ModelGeneration {
        let collaborative = match self.collaborative {
            Some(factors) => CollaborativeModel::from_factors(self.nmf, factors),
            None => CollaborativeModel::new(self.nmf),
        };
        let content = match self.content {
            Some(vectors) => ContentModel::from_vectors(self.content_config, vectors),
            None => ContentModel::new(self.content_config),
        };
        ModelGeneration {
            id: self.id,
            trained_at: self.trained_at,
            collaborative,
            content,
            catalog: self.catalog,
        }
    }

    pub fn encode(&self) -> serde_json::Result<Vec<u8>> {
        serde_json::to_vec(self)
    }

    pub fn decode(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}
