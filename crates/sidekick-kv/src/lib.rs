//! The key-value store interface this layer consumes (SPEC_FULL.md §4.A).
//!
//! This crate defines the contract only, plus an in-memory implementation
//! used by the rest of the workspace's test suites. The real, production
//! backing store (durable storage engine internals) lives outside this
//! layer.

use std::collections::BTreeMap;

use async_trait::async_trait;
use dashmap::DashMap;
use sidekick_core::error::{CoreError, Result};
use tokio_util::sync::CancellationToken;

/// Workspace-scoped, context-cancellable key-value store.
///
/// All keys are case-sensitive UTF-8; values are opaque bytes. Every call is
/// scoped to a single workspace id and must provide read-your-writes
/// consistency within that workspace. Writes are atomic per call.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch multiple keys at once, preserving the caller's order. Missing
    /// keys map to `None` rather than shortening the result.
    async fn mget(
        &self,
        cancel: &CancellationToken,
        workspace_id: &str,
        keys: &[String],
    ) -> Result<Vec<Option<Vec<u8>>>>;

    /// Set multiple values, JSON-encoding each. Overwrites existing keys.
    async fn mset(
        &self,
        cancel: &CancellationToken,
        workspace_id: &str,
        values: BTreeMap<String, serde_json::Value>,
    ) -> Result<()>;

    /// Set multiple values as byte-exact pre-encoded payloads (used when the
    /// caller has already serialized JSON and a re-encode would be wasteful
    /// or could reorder map keys).
    async fn mset_raw(
        &self,
        cancel: &CancellationToken,
        workspace_id: &str,
        values: BTreeMap<String, Vec<u8>>,
    ) -> Result<()>;

    /// Delete every key with the given prefix. Idempotent: succeeds silently
    /// with zero matches.
    async fn delete_prefix(
        &self,
        cancel: &CancellationToken,
        workspace_id: &str,
        prefix: &str,
    ) -> Result<()>;

    /// List every key with the given prefix.
    async fn get_keys_with_prefix(
        &self,
        cancel: &CancellationToken,
        workspace_id: &str,
        prefix: &str,
    ) -> Result<Vec<String>>;
}

fn check_cancelled(cancel: &CancellationToken) -> Result<()> {
    if cancel.is_cancelled() {
        return Err(CoreError::External("operation cancelled".to_string()));
    }
    Ok(())
}

/// In-memory `KvStore`, keyed by `(workspace_id, key)`. Used by this
/// workspace's test suites and suitable as a local-dev stand-in.
#[derive(Debug, Default)]
pub struct InMemoryKvStore {
    data: DashMap<(String, String), Vec<u8>>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn mget(
        &self,
        cancel: &CancellationToken,
        workspace_id: &str,
        keys: &[String],
    ) -> Result<Vec<Option<Vec<u8>>>> {
        check_cancelled(cancel)?;
        Ok(keys
            .iter()
            .map(|k| self.data.get(&(workspace_id.to_string(), k.clone())).map(|v| v.clone()))
            .collect())
    }

    async fn mset(
        &self,
        cancel: &CancellationToken,
        workspace_id: &str,
        values: BTreeMap<String, serde_json::Value>,
    ) -> Result<()> {
        check_cancelled(cancel)?;
        for (k, v) in values {
            let bytes = serde_json::to_vec(&v)?;
            self.data.insert((workspace_id.to_string(), k), bytes);
        }
        Ok(())
    }

    async fn mset_raw(
        &self,
        cancel: &CancellationToken,
        workspace_id: &str,
        values: BTreeMap<String, Vec<u8>>,
    ) -> Result<()> {
        check_cancelled(cancel)?;
        for (k, v) in values {
            self.data.insert((workspace_id.to_string(), k), v);
        }
        Ok(())
    }

    async fn delete_prefix(
        &self,
        cancel: &CancellationToken,
        workspace_id: &str,
        prefix: &str,
    ) -> Result<()> {
        check_cancelled(cancel)?;
        self.data
            .retain(|(ws, k), _| !(ws == workspace_id && k.starts_with(prefix)));
        Ok(())
    }

    async fn get_keys_with_prefix(
        &self,
        cancel: &CancellationToken,
        workspace_id: &str,
        prefix: &str,
    ) -> Result<Vec<String>> {
        check_cancelled(cancel)?;
        Ok(self
            .data
            .iter()
            .filter(|e| e.key().0 == workspace_id && e.key().1.starts_with(prefix))
            .map(|e| e.key().1.clone())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn mget_preserves_order_and_nulls_missing() {
        let kv = InMemoryKvStore::new();
        let cancel = CancellationToken::new();
        let mut values = BTreeMap::new();
        values.insert("a".to_string(), serde_json::json!(1));
        kv.mset(&cancel, "ws1", values).await.unwrap();

        let got = kv
            .mget(&cancel, "ws1", &["a".to_string(), "missing".to_string()])
            .await
            .unwrap();
        assert!(got[0].is_some());
        assert!(got[1].is_none());
    }

    #[tokio::test]
    async fn delete_prefix_is_idempotent_and_scoped_per_workspace() {
        let kv = InMemoryKvStore::new();
        let cancel = CancellationToken::new();
        let mut values = BTreeMap::new();
        values.insert("p:1".to_string(), vec![1]);
        values.insert("p:2".to_string(), vec![2]);
        kv.mset_raw(&cancel, "ws1", values.clone()).await.unwrap();
        kv.mset_raw(&cancel, "ws2", values).await.unwrap();

        kv.delete_prefix(&cancel, "ws1", "p:").await.unwrap();
        assert!(kv.get_keys_with_prefix(&cancel, "ws1", "p:").await.unwrap().is_empty());
        assert_eq!(kv.get_keys_with_prefix(&cancel, "ws2", "p:").await.unwrap().len(), 2);

        // idempotent: deleting again over an empty prefix set still succeeds
        kv.delete_prefix(&cancel, "ws1", "p:").await.unwrap();
    }

    #[tokio::test]
    async fn cancelled_token_fails_fast() {
        let kv = InMemoryKvStore::new();
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = kv.mget(&cancel, "ws1", &[]).await.unwrap_err();
        assert_eq!(err.code(), "FAIL_EXTERNAL");
    }
}
