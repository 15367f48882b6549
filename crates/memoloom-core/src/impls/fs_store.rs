//! FsStore - ディレクトリを共有するプロセス間で使えるメモ化ストア
//!
//! # レイアウト
//! - `values/<sha256(key)>.json`: キーごとの値
//! - `artifacts/<hex>`: content address で保存された artifact
//! - `tmp/`: 書き込み途中のファイル
//!
//! 条件付き set は「書き終えた一時ファイルを hard link する」ことで実現します。
//! link 先が既に存在すれば OS が AlreadyExists を返すので、
//! 存在確認と書き込みが 1 回のシステムコールで済みます。

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use sha2::{Digest, Sha256};
use tokio::fs;
use ulid::Ulid;

use crate::ports::{CONTENT_SCHEME, MemoStore, StoreError, content_uri};

const FILE_SCHEME: &str = "file://";

pub struct FsStore {
    root: PathBuf,
}

impl FsStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn value_path(&self, key: &str) -> PathBuf {
        let digest = hex::encode(Sha256::digest(key.as_bytes()));
        self.root.join("values").join(format!("{digest}.json"))
    }

    fn artifact_path(&self, digest: &str) -> PathBuf {
        self.root.join("artifacts").join(digest)
    }

    /// Where `uri` lives on disk, or `None` if this store cannot resolve it.
    fn locate(&self, uri: &str) -> Result<Option<PathBuf>, StoreError> {
        if let Some(digest) = uri.strip_prefix(CONTENT_SCHEME) {
            let valid = digest.len() == 64 && digest.bytes().all(|b| b.is_ascii_hexdigit());
            if !valid {
                return Err(StoreError::InvalidUri(uri.to_string()));
            }
            return Ok(Some(self.artifact_path(&digest.to_ascii_lowercase())));
        }
        if let Some(path) = uri.strip_prefix(FILE_SCHEME) {
            return Ok(Some(PathBuf::from(path)));
        }
        if uri.contains("://") {
            tracing::debug!(uri, "artifact scheme not served by this store");
            return Ok(None);
        }
        Ok(Some(PathBuf::from(uri)))
    }

    /// Write `data` to a fresh file under `tmp/` and return its path.
    async fn write_temp(&self, data: &[u8]) -> Result<PathBuf, StoreError> {
        let dir = self.root.join("tmp");
        fs::create_dir_all(&dir).await?;
        let path = dir.join(format!("{}.tmp", Ulid::new()));
        fs::write(&path, data).await?;
        Ok(path)
    }
}

/// Best-effort removal of a temp file. A leftover file only costs disk space.
async fn discard_temp(path: &Path) {
    match fs::remove_file(path).await {
        Ok(()) => {}
        Err(e) if e.kind() == ErrorKind::NotFound => {}
        Err(e) => tracing::warn!(path = %path.display(), error = %e, "failed to remove temp file"),
    }
}

async fn read_if_present(path: &Path) -> Result<Option<Vec<u8>>, StoreError> {
    match fs::read(path).await {
        Ok(data) => Ok(Some(data)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(StoreError::Io(e)),
    }
}

#[async_trait]
impl MemoStore for FsStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StoreError> {
        match read_if_present(&self.value_path(key)).await? {
            Some(data) => Ok(Some(serde_json::from_slice(&data)?)),
            None => Ok(None),
        }
    }

    async fn set(&self, key: &str, value: Value, require_absent: bool) -> Result<bool, StoreError> {
        let target = self.value_path(key);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = self.write_temp(&serde_json::to_vec(&value)?).await?;

        if !require_absent {
            if let Err(e) = fs::rename(&tmp, &target).await {
                discard_temp(&tmp).await;
                return Err(StoreError::Io(e));
            }
            return Ok(true);
        }

        let linked = fs::hard_link(&tmp, &target).await;
        discard_temp(&tmp).await;
        match linked {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => Ok(false),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn delete(&self, key: &str) -> Result<(), StoreError> {
        match fs::remove_file(self.value_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StoreError::Io(e)),
        }
    }

    async fn load_artifact(&self, uri: &str) -> Result<Option<Bytes>, StoreError> {
        match self.locate(uri)? {
            Some(path) => Ok(read_if_present(&path).await?.map(Bytes::from)),
            None => Ok(None),
        }
    }

    async fn store_artifact(&self, data: Bytes) -> Result<String, StoreError> {
        let uri = content_uri(&data);
        let digest = &uri[CONTENT_SCHEME.len()..];
        let target = self.artifact_path(digest);
        if fs::try_exists(&target).await? {
            return Ok(uri);
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        let tmp = self.write_temp(&data).await?;
        if let Err(e) = fs::rename(&tmp, &target).await {
            discard_temp(&tmp).await;
            return Err(StoreError::Io(e));
        }
        Ok(uri)
    }

    async fn artifact_exists(&self, uri: &str) -> Result<bool, StoreError> {
        match self.locate(uri)? {
            Some(path) => Ok(fs::try_exists(&path).await?),
            None => Ok(false),
        }
    }
}
