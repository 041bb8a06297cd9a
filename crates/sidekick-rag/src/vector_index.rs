//! Static, single-use ANN vector index (SPEC_FULL.md §4.E).

use instant_distance::{Builder, Hnsw, Search};
use sidekick_core::error::CoreError;
use sidekick_core::Result;
use sidekick_kv::KvStore;
use tokio_util::sync::CancellationToken;

const DEFAULT_LIMIT: usize = 1000;

/// KV key an embedding vector for `subkey` is stored under. `provider` and
/// `model` are folded into one compound token the same way the on-disk
/// embedding cache does, so two providers serving a same-named model never
/// collide on the same vector.
pub fn embedding_key(provider: &str, model: &str, content_type: &str, subkey: &str) -> String {
    format!("embedding:{provider}-{model}:{content_type}:{subkey}")
}

/// Encodes a vector as little-endian float32 bytes, per the KV wire format.
pub fn encode_vector(vector: &[f32]) -> Vec<u8> {
    vector.iter().flat_map(|f| f.to_le_bytes()).collect()
}

fn decode_vector(bytes: &[u8], dims: usize) -> Result<Vec<f32>> {
    if bytes.len() != dims * 4 {
        return Err(CoreError::Dim(format!(
            "stored embedding has {} bytes, expected {} for {dims} dims",
            bytes.len(),
            dims * 4
        )));
    }
    Ok(bytes.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect())
}

#[derive(Clone)]
struct EmbeddingPoint(Vec<f32>);

impl instant_distance::Point for EmbeddingPoint {
    fn distance(&self, other: &Self) -> f32 {
        // Vectors are expected pre-normalized by the embedder, so a plain
        // dot product is cosine similarity; lower "distance" = more similar.
        let dot: f32 = self.0.iter().zip(other.0.iter()).map(|(a, b)| a * b).sum();
        1.0 - dot
    }
}

/// Built once per query-set, torn down after use. Registers each input
/// vector under an integer id `0..N-1` and remembers the subkey each id maps
/// back to.
pub struct StaticVectorIndex {
    dims: usize,
    subkeys: Vec<String>,
    hnsw: Option<Hnsw<EmbeddingPoint, usize>>,
}

impl StaticVectorIndex {
    /// MGets every `subkeys[i]`'s vector under the embedding-key convention
    /// and builds the index from them. Rejects on any missing vector
    /// (`FAIL_MISSING`), dimension mismatch (`FAIL_DIM`), non-positive
    /// `dims`, or an empty `subkeys` list (`FAIL_MISSING`).
    #[allow(clippy::too_many_arguments)]
    pub async fn build(
        cancel: &CancellationToken,
        kv: &dyn KvStore,
        workspace_id: &str,
        provider: &str,
        model: &str,
        content_type: &str,
        subkeys: &[String],
        dims: usize,
    ) -> Result<Self> {
        if subkeys.is_empty() {
            return Err(CoreError::Missing("no subkeys supplied to index build".to_string()));
        }
        if dims == 0 {
            return Err(CoreError::Dim("vector dimensionality must be positive".to_string()));
        }

        let keys: Vec<String> =
            subkeys.iter().map(|sk| embedding_key(provider, model, content_type, sk)).collect();
        let raw = kv.mget(cancel, workspace_id, &keys).await?;

        let mut points = Vec::with_capacity(subkeys.len());
        let mut ids = Vec::with_capacity(subkeys.len());
        for (i, (subkey, value)) in subkeys.iter().zip(raw.into_iter()).enumerate() {
            let bytes = value
                .ok_or_else(|| CoreError::Missing(format!("no embedding vector stored for {subkey}")))?;
            points.push(EmbeddingPoint(decode_vector(&bytes, dims)?));
            ids.push(i);
        }

        let hnsw = Builder::default().build(points, ids);
        Ok(Self { dims, subkeys: subkeys.to_vec(), hnsw: Some(hnsw) })
    }

    /// Builds directly from already-embedded vectors, skipping the KV
    /// round-trip. Used by tests and by callers that have just computed
    /// vectors in-process and don't need them to survive past this call.
    pub fn build_from_vectors(vectors: Vec<(String, Vec<f32>)>) -> Result<Self> {
        if vectors.is_empty() {
            return Err(CoreError::Missing("no vectors supplied to index build".to_string()));
        }
        let dims = vectors[0].1.len();
        if dims == 0 {
            return Err(CoreError::Dim("vector dimensionality must be positive".to_string()));
        }

        let mut subkeys = Vec::with_capacity(vectors.len());
        let mut points = Vec::with_capacity(vectors.len());
        let mut ids = Vec::with_capacity(vectors.len());
        for (id, (subkey, vec)) in vectors.into_iter().enumerate() {
            if vec.len() != dims {
                return Err(CoreError::Dim(format!(
                    "vector for {subkey} has dimension {}, expected {dims}",
                    vec.len()
                )));
            }
            subkeys.push(subkey);
            points.push(EmbeddingPoint(vec));
            ids.push(id);
        }

        let hnsw = Builder::default().build(points, ids);
        Ok(Self { dims, subkeys, hnsw: Some(hnsw) })
    }

    pub fn dims(&self) -> usize {
        self.dims
    }

    /// Subkeys ordered by descending similarity to `query`.
    pub fn query_single(&self, query: &[f32], limit: usize) -> Result<Vec<String>> {
        if query.is_empty() {
            return Err(CoreError::Arg("query vector must not be empty".to_string()));
        }
        if query.len() != self.dims {
            return Err(CoreError::Dim(format!(
                "query vector has dimension {}, index expects {}",
                query.len(),
                self.dims
            )));
        }
        let hnsw = self.hnsw.as_ref().ok_or_else(|| CoreError::Arg("index already destroyed".to_string()))?;
        let limit = if limit == 0 { DEFAULT_LIMIT } else { limit };

        let mut search = Search::default();
        let point = EmbeddingPoint(query.to_vec());
        Ok(hnsw
            .search(&point, &mut search)
            .take(limit)
            .map(|item| self.subkeys[*item.value].clone())
            .collect())
    }

    /// All `queries` must share dimensionality; returns one ranked subkey
    /// list per query vector.
    pub fn query_multiple(&self, queries: &[Vec<f32>], limit: usize) -> Result<Vec<Vec<String>>> {
        if let Some(first) = queries.first() {
            for q in queries {
                if q.len() != first.len() {
                    return Err(CoreError::Dim("query vectors do not share dimensionality".to_string()));
                }
            }
        }
        queries.iter().map(|q| self.query_single(q, limit)).collect()
    }

    /// Releases index resources. Idempotent; kept for interface parity with
    /// callers that require an explicit teardown step on every exit path.
    pub fn destroy(&mut self) {
        self.hnsw = None;
    }
}
