//! Embedder contract and content-addressable embedding cache
//! (SPEC_FULL.md §4.D, §6).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sidekick_core::error::CoreError;
use sidekick_core::Result;

/// OpenAI's batch-size ceiling; callers must chunk misses that exceed it.
pub const MAX_BATCH_SIZE: usize = 2048;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    RetrievalQuery,
    RetrievalDocument,
}

/// Caller-supplied secrets, passed through untouched to provider code.
pub trait SecretManager: Send + Sync {}

/// Model identity + endpoint shape; opaque beyond what the embedder
/// implementation needs.
#[derive(Debug, Clone)]
pub struct ModelConfig {
    pub provider: String,
    pub model: String,
}

/// The embedding backend this layer consumes. A real implementation calls
/// out to an embeddings API; tests supply a deterministic stand-in.
#[async_trait]
pub trait Embedder: Send + Sync {
    async fn embed(
        &self,
        model_config: &ModelConfig,
        secrets: &dyn SecretManager,
        texts: &[String],
        task_type: TaskType,
    ) -> Result<Vec<Vec<f32>>>;
}

fn cache_key(provider: &str, model: &str, task_type: TaskType, text: &str) -> String {
    let task = match task_type {
        TaskType::RetrievalQuery => "retrieval_query",
        TaskType::RetrievalDocument => "retrieval_document",
    };
    let mut hasher = Sha256::new();
    hasher.update(provider.as_bytes());
    hasher.update(b"-");
    hasher.update(model.as_bytes());
    hasher.update(b"||");
    hasher.update(task.as_bytes());
    hasher.update(b"||");
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Content-addressable, on-disk, process-wide embedding cache.
pub struct EmbeddingCache {
    dir: PathBuf,
}

impl EmbeddingCache {
    /// Uses `<OS temp dir>/sidekick-embedding-cache`.
    pub fn new() -> std::io::Result<Self> {
        let dir = std::env::temp_dir().join("sidekick-embedding-cache");
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    pub fn at(dir: impl Into<PathBuf>) -> std::io::Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.json"))
    }

    pub fn get(&self, provider: &str, model: &str, task_type: TaskType, text: &str) -> Result<Option<Vec<f32>>> {
        let path = self.path_for(&cache_key(provider, model, task_type, text));
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)?;
        let vec: Vec<f32> =
            serde_json::from_slice(&bytes).map_err(|e| CoreError::Decode(format!("corrupt cache entry: {e}")))?;
        Ok(Some(vec))
    }

    pub fn set(&self, provider: &str, model: &str, task_type: TaskType, text: &str, vector: &[f32]) -> Result<()> {
        let path = self.path_for(&cache_key(provider, model, task_type, text));
        let bytes = serde_json::to_vec(vector)?;
        std::fs::write(&path, bytes).map_err(|e| CoreError::Storage(e.to_string()))
    }

    /// Splits `texts` into cache hits and misses, calls `embedder` only for
    /// the misses (chunked at [`MAX_BATCH_SIZE`]), writes new entries back,
    /// and returns vectors in the caller's original order.
    pub async fn embed_with_cache(
        &self,
        embedder: &dyn Embedder,
        model_config: &ModelConfig,
        secrets: &dyn SecretManager,
        texts: &[String],
        task_type: TaskType,
    ) -> Result<Vec<Vec<f32>>> {
        let mut result: Vec<Option<Vec<f32>>> = Vec::with_capacity(texts.len());
        let mut miss_indices = Vec::new();
        let mut miss_texts = Vec::new();

        for text in texts {
            match self.get(&model_config.provider, &model_config.model, task_type, text)? {
                Some(vec) => result.push(Some(vec)),
                None => {
                    result.push(None);
                    miss_indices.push(result.len() - 1);
                    miss_texts.push(text.clone());
                }
            }
        }

        for (chunk_indices, chunk_texts) in
            miss_indices.chunks(MAX_BATCH_SIZE).zip(miss_texts.chunks(MAX_BATCH_SIZE))
        {
            let vectors = embedder.embed(model_config, secrets, chunk_texts, task_type).await?;
            for (&idx, vec) in chunk_indices.iter().zip(vectors.into_iter()) {
                self.set(&model_config.provider, &model_config.model, task_type, &texts[idx], &vec)?;
                result[idx] = Some(vec);
            }
        }

        Ok(result.into_iter().map(|v| v.expect("every index filled by hit or miss pass")).collect())
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl Default for EmbeddingCache {
    fn default() -> Self {
        Self::new().expect("temp dir must be writable")
    }
}
