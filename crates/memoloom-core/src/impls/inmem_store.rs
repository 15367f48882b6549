//! InMemoryStore - プロセス内で完結するメモ化ストア
//!
//! # 学習ポイント
//! - tokio::sync::Mutex による check-and-set のアトミック化
//! - Clone で同じ状態を複数ワーカーに共有する（Arc で包む）
//! - artifact は content address（sha256://）で保存

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::Mutex;

use crate::ports::{MemoStore, StoreError, content_uri};

#[derive(Default)]
struct State {
    values: HashMap<String, Value>,
    artifacts: HashMap<String, Bytes>,
}

/// InMemoryStore はテスト・単一プロセス用のストア
///
/// # 実装詳細
/// - values と artifacts を 1 つの Mutex で保護
/// - 条件付き set は lock を取ったまま存在確認と書き込みを行う
#[derive(Clone, Default)]
pub struct InMemoryStore {
    state: Arc<Mutex<State>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register bytes under an arbitrary URI (catalogs, external inputs).
    pub async fn put_artifact(&self, uri: impl Into<String>, data: impl Into<Bytes>) {
        self.state
            .lock()
            .await
            .artifacts
            .insert(uri.into(), data.into());
    }

    /// Drop an artifact so that URIs pointing at it stop resolving.
    pub async fn remove_artifact(&self, uri: &str) {
        self.state.lock().await.artifacts.remove(uri);
    }
}

#[async_trait]
impl MemoStore for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        Ok(self.state.lock().await.values.get(key).cloned())
    }

    async fn set(&self, key: &str, value: Value, require_absent: bool) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        if require_absent && state.values.contains_key(key) {
            return Ok(false);
        }
        state.values.insert(key.to_string(), value);
        Ok(true)
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        self.state.lock().await.values.remove(key);
        Ok(())
    }

    async fn load_artifact(&self, uri: &str) -> Result<Option<Bytes>, StoreError> {
        Ok(self.state.lock().await.artifacts.get(uri).cloned())
    }

    async fn store_artifact(&self, data: Bytes) -> Result<String, StoreError> {
        let uri = content_uri(&data);
        self.state
            .lock()
            .await
            .artifacts
            .insert(uri.clone(), data);
        Ok(uri)
    }
}
