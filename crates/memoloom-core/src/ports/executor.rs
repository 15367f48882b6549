//! Executor port - ジョブの実際の処理（spike sorting, 変換, 比較, 可視化）
//!
//! エンジンから見ると Executor は不透明な capability です。
//! 受け取った JobDescriptor を実行し、StoredOutput を返すだけ。
//!
//! # 設計原則
//! - 非ゼロ終了などの「実行失敗」はエラーではなくデータ（retcode, console_lines_uri）
//! - 実行を始めたら最後まで走る（キャンセル不可、タイムアウトなし）

use async_trait::async_trait;
use thiserror::Error;

use super::StoreError;
use crate::domain::{JobDescriptor, StoredOutput};

/// Errors that prevent an executor from producing any output at all.
#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("unable to load input artifact: {0}")]
    MissingInput(String),

    #[error("unsupported job: {0}")]
    Unsupported(String),

    #[error("executor io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("executor serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Runs one job to completion.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn execute(&self, job: &JobDescriptor) -> Result<StoredOutput, ExecutorError>;
}
