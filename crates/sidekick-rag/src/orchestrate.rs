//! Wires the embed → ANN index → RRF fusion pipeline together for the
//! directory outline ranker (SPEC_FULL.md §4.G steps 3-6) and the diff
//! summarizer (SPEC_FULL.md §4.H step 5), so [`outline::assemble`] and
//! [`diff::summarize`] always receive an already-ranked input instead of
//! documenting it as the caller's responsibility.

use std::collections::{BTreeMap, HashMap};

use sidekick_core::Result;
use sidekick_embed::{Embedder, EmbeddingCache, ModelConfig, SecretManager, TaskType};
use sidekick_kv::KvStore;
use tokio_util::sync::CancellationToken;

use crate::diff::{chunk_feedback, DiffChunk};
use crate::outline::{compress_common_prefix, DirectoryChunk, FileSignature};
use crate::rrf::fuse;
use crate::vector_index::{embedding_key, encode_vector, StaticVectorIndex};

const QUERY_CHUNK_CHARS: usize = 2000;

/// Embeds every `signatures` outline and `directory_chunks` summary line as
/// retrieval-document content, embeds `query` as retrieval-query content
/// (chunked on sentence/word boundaries), ranks by ANN search + RRF fusion,
/// and returns the subset of `signatures` that the search surfaced, in
/// descending relevance order. Directory chunks participate in the shared
/// embedding/search corpus but never appear in the return value, since
/// [`crate::outline::assemble`] renders them unranked.
pub async fn rank_outline_signatures(
    cancel: &CancellationToken,
    kv: &dyn KvStore,
    embedder: &dyn Embedder,
    cache: &EmbeddingCache,
    secrets: &dyn SecretManager,
    workspace_id: &str,
    model_config: &ModelConfig,
    signatures: &[FileSignature],
    directory_chunks: &[DirectoryChunk],
    query: &str,
) -> Result<Vec<FileSignature>> {
    if signatures.is_empty() && directory_chunks.is_empty() {
        return Ok(Vec::new());
    }

    let mut subkeys: Vec<String> = Vec::with_capacity(signatures.len() + directory_chunks.len());
    let mut texts: Vec<String> = Vec::with_capacity(signatures.len() + directory_chunks.len());
    let mut by_subkey: HashMap<String, FileSignature> = HashMap::with_capacity(signatures.len());

    for sig in signatures {
        let subkey = sig.path.display().to_string();
        texts.push(sig.outline.clone());
        by_subkey.insert(subkey.clone(), sig.clone());
        subkeys.push(subkey);
    }
    for (i, chunk) in directory_chunks.iter().enumerate() {
        subkeys.push(format!("dirchunk:{i}"));
        texts.push(compress_common_prefix(&chunk.paths));
    }

    let content_type = "outline";
    let fused = fuse_against_corpus(
        cancel, kv, embedder, cache, secrets, workspace_id, model_config, content_type, &subkeys, &texts, query,
    )
    .await?;

    Ok(fused.into_iter().filter_map(|id| by_subkey.remove(&id)).collect())
}

/// Embeds every `chunks`' diff content as retrieval-document content, embeds
/// `feedback` as retrieval-query content (chunked the same way), ranks by
/// ANN search + RRF fusion, and returns the chunk ids in descending
/// relevance order, ready for [`crate::diff::summarize`]'s
/// `ranked_chunk_ids` parameter.
pub async fn rank_diff_chunks(
    cancel: &CancellationToken,
    kv: &dyn KvStore,
    embedder: &dyn Embedder,
    cache: &EmbeddingCache,
    secrets: &dyn SecretManager,
    workspace_id: &str,
    model_config: &ModelConfig,
    chunks: &[DiffChunk],
    feedback: &str,
) -> Result<Vec<String>> {
    if chunks.is_empty() {
        return Ok(Vec::new());
    }

    let subkeys: Vec<String> = chunks.iter().map(|c| format!("{}#{}", c.file_path, c.chunk_index)).collect();
    let texts: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();

    let content_type = "diff";
    fuse_against_corpus(
        cancel,
        kv,
        embedder,
        cache,
        secrets,
        workspace_id,
        model_config,
        content_type,
        &subkeys,
        &texts,
        feedback,
    )
    .await
}

/// Shared embed → store → index → query → fuse pipeline. `subkeys[i]` names
/// `texts[i]`'s content; `query` is chunked and embedded as retrieval-query
/// content before searching the just-built index.
#[allow(clippy::too_many_arguments)]
async fn fuse_against_corpus(
    cancel: &CancellationToken,
    kv: &dyn KvStore,
    embedder: &dyn Embedder,
    cache: &EmbeddingCache,
    secrets: &dyn SecretManager,
    workspace_id: &str,
    model_config: &ModelConfig,
    content_type: &str,
    subkeys: &[String],
    texts: &[String],
    query: &str,
) -> Result<Vec<String>> {
    let content_vectors =
        cache.embed_with_cache(embedder, model_config, secrets, texts, TaskType::RetrievalDocument).await?;

    let mut values = BTreeMap::new();
    for (subkey, vector) in subkeys.iter().zip(content_vectors.iter()) {
        values.insert(
            embedding_key(&model_config.provider, &model_config.model, content_type, subkey),
            encode_vector(vector),
        );
    }
    kv.mset_raw(cancel, workspace_id, values).await?;

    let dims = content_vectors[0].len();
    let index = StaticVectorIndex::build(
        cancel,
        kv,
        workspace_id,
        &model_config.provider,
        &model_config.model,
        content_type,
        subkeys,
        dims,
    )
    .await?;

    let query_chunks = chunk_feedback(query, QUERY_CHUNK_CHARS);
    let query_vectors =
        cache.embed_with_cache(embedder, model_config, secrets, &query_chunks, TaskType::RetrievalQuery).await?;

    let per_query_rankings = index.query_multiple(&query_vectors, 0)?;
    Ok(fuse(&per_query_rankings))
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use sidekick_kv::InMemoryKvStore;
    use std::path::PathBuf;

    struct NoSecrets;
    impl SecretManager for NoSecrets {}

    /// Deterministic stand-in: embeds each text as a 2-d vector so rank
    /// order is predictable without a real provider.
    struct WordCountEmbedder;
    #[async_trait]
    impl Embedder for WordCountEmbedder {
        async fn embed(
            &self,
            _model_config: &ModelConfig,
            _secrets: &dyn SecretManager,
            texts: &[String],
            _task_type: TaskType,
        ) -> Result<Vec<Vec<f32>>> {
            Ok(texts
                .iter()
                .map(|t| {
                    let has_fn = if t.contains("fn ") { 1.0 } else { 0.0 };
                    let has_struct = if t.contains("struct ") { 1.0 } else { 0.0 };
                    vec![has_fn, has_struct]
                })
                .collect())
        }
    }

    #[tokio::test]
    async fn rank_outline_signatures_surfaces_matching_file_first() {
        let kv = InMemoryKvStore::new();
        let cancel = CancellationToken::new();
        let cache = EmbeddingCache::at(tempfile::tempdir().unwrap().path()).unwrap();
        let model = ModelConfig { provider: "test".to_string(), model: "m1".to_string() };
        let secrets = NoSecrets;

        let signatures = vec![
            FileSignature { path: PathBuf::from("a.rs"), outline: "fn handler() {}".to_string() },
            FileSignature { path: PathBuf::from("b.rs"), outline: "struct Config {}".to_string() },
        ];

        let ranked = rank_outline_signatures(
            &cancel,
            &kv,
            &WordCountEmbedder,
            &cache,
            &secrets,
            "ws1",
            &model,
            &signatures,
            &[],
            "fn handler",
        )
        .await
        .unwrap();

        assert_eq!(ranked[0].path, PathBuf::from("a.rs"));
    }

    #[tokio::test]
    async fn rank_outline_signatures_excludes_directory_chunk_ids_from_output() {
        let kv = InMemoryKvStore::new();
        let cancel = CancellationToken::new();
        let cache = EmbeddingCache::at(tempfile::tempdir().unwrap().path()).unwrap();
        let model = ModelConfig { provider: "test".to_string(), model: "m1".to_string() };
        let secrets = NoSecrets;

        let signatures = vec![FileSignature { path: PathBuf::from("a.rs"), outline: "fn a() {}".to_string() }];
        let directory_chunks = vec![DirectoryChunk { paths: vec![PathBuf::from("a.rs")] }];

        let ranked = rank_outline_signatures(
            &cancel,
            &kv,
            &WordCountEmbedder,
            &cache,
            &secrets,
            "ws1",
            &model,
            &signatures,
            &directory_chunks,
            "fn a",
        )
        .await
        .unwrap();

        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].path, PathBuf::from("a.rs"));
    }

    #[tokio::test]
    async fn rank_diff_chunks_returns_composite_ids_for_summarize() {
        let kv = InMemoryKvStore::new();
        let cancel = CancellationToken::new();
        let cache = EmbeddingCache::at(tempfile::tempdir().unwrap().path()).unwrap();
        let model = ModelConfig { provider: "test".to_string(), model: "m1".to_string() };
        let secrets = NoSecrets;

        let chunks = vec![
            DiffChunk {
                file_path: "a.rs".to_string(),
                content: "fn a() {}".to_string(),
                chunk_index: 0,
                lines_added: 1,
                lines_removed: 0,
            },
            DiffChunk {
                file_path: "b.rs".to_string(),
                content: "struct B {}".to_string(),
                chunk_index: 0,
                lines_added: 1,
                lines_removed: 0,
            },
        ];

        let ranked = rank_diff_chunks(
            &cancel,
            &kv,
            &WordCountEmbedder,
            &cache,
            &secrets,
            "ws1",
            &model,
            &chunks,
            "struct B",
        )
        .await
        .unwrap();

        assert_eq!(ranked[0], "b.rs#0");
    }

    #[tokio::test]
    async fn empty_inputs_are_empty_outputs() {
        let kv = InMemoryKvStore::new();
        let cancel = CancellationToken::new();
        let cache = EmbeddingCache::at(tempfile::tempdir().unwrap().path()).unwrap();
        let model = ModelConfig { provider: "test".to_string(), model: "m1".to_string() };
        let secrets = NoSecrets;

        let ranked = rank_outline_signatures(
            &cancel, &kv, &WordCountEmbedder, &cache, &secrets, "ws1", &model, &[], &[], "query",
        )
        .await
        .unwrap();
        assert!(ranked.is_empty());

        let ranked =
            rank_diff_chunks(&cancel, &kv, &WordCountEmbedder, &cache, &secrets, "ws1", &model, &[], "feedback")
                .await
                .unwrap();
        assert!(ranked.is_empty());
    }
}
