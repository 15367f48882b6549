//! MemoStore port - 共有メモ化ストア
//!
//! エンジンが外部ストアに要求する操作はこれだけです：
//! get / 条件付き set / delete / artifact の読み書き。
//!
//! # 設計原則
//! - 条件付き set（`require_absent = true`）が唯一のアトミック操作
//! - 複数プロセス・複数マシンから同時に呼ばれてもアトミックであること
//! - ストア障害はエンジン内部で retry しない（呼び出し元にそのまま返す）

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::domain::{Fingerprint, StoredOutput};

/// Store / transport failure. Surfaced to the caller unmodified.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("store value is not valid json: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("unsupported artifact uri: {0}")]
    InvalidUri(String),

    #[error("store backend error: {0}")]
    Backend(String),
}

/// URI scheme for content-addressed artifacts.
pub const CONTENT_SCHEME: &str = "sha256://";

/// Content address of `data`: `sha256://<hex digest>`.
pub fn content_uri(data: &[u8]) -> String {
    format!("{CONTENT_SCHEME}{}", hex::encode(Sha256::digest(data)))
}

/// Keyed store shared by every worker of every workflow.
#[async_trait]
pub trait MemoStore: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError>;

    /// Write `value` under `key`.
    ///
    /// With `require_absent`, the write happens (and `true` is returned) only
    /// if nothing is stored under `key`. Otherwise the value is overwritten
    /// unconditionally and `true` is returned.
    async fn set(&self, key: &str, value: Value, require_absent: bool) -> Result<bool, StoreError>;

    /// Remove `key`. Removing an absent key is not an error.
    async fn delete(&self, key: &str) -> Result<(), StoreError>;

    /// Resolve an artifact URI to its bytes, if they are reachable.
    async fn load_artifact(&self, uri: &str) -> Result<Option<Bytes>, StoreError>;

    /// Publish bytes and return a content-addressed URI for them.
    async fn store_artifact(&self, data: Bytes) -> Result<String, StoreError>;

    /// Whether `uri` currently resolves. Backends may override this to avoid
    /// reading the whole artifact.
    async fn artifact_exists(&self, uri: &str) -> Result<bool, StoreError> {
        Ok(self.load_artifact(uri).await?.is_some())
    }

    /// Memoized output for `fingerprint`, if any.
    async fn get_output(&self, fingerprint: &Fingerprint) -> Result<Option<StoredOutput>, StoreError> {
        Ok(self
            .get(&fingerprint.store_key())
            .await?
            .map(StoredOutput::from_value))
    }
}
