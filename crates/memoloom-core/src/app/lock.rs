//! LockCoordinator - 条件付き set だけで実現する排他実行
//!
//! # 設計原則
//! - claim は `set(key, record, require_absent = true)` の 1 回だけ
//! - 完了しても失敗しても claim は解放しない（解放すると再実行が起きる）
//! - 解放は reset による明示的な削除のみ
//!
//! 注意: 他プロセスが実行中のジョブを reset すると二重実行になりうる。

use std::sync::Arc;

use crate::domain::{ClaimRecord, ClaimantId, JobDescriptor};
use crate::ports::{MemoStore, StoreError};

pub struct LockCoordinator {
    store: Arc<dyn MemoStore>,
    claimant: ClaimantId,
}

impl LockCoordinator {
    pub fn new(store: Arc<dyn MemoStore>, claimant: ClaimantId) -> Self {
        Self { store, claimant }
    }

    pub fn claimant(&self) -> ClaimantId {
        self.claimant
    }

    /// `"{workflow}-running-{job_type}-{label}"`
    pub fn lock_key(workflow: &str, job: &JobDescriptor) -> String {
        format!("{workflow}-running-{}-{}", job.job_type(), job.label())
    }

    /// Claim `job` for this process. `false` means someone already holds it.
    pub async fn try_claim(&self, workflow: &str, job: &JobDescriptor) -> Result<bool, StoreError> {
        let key = Self::lock_key(workflow, job);
        let record = serde_json::to_value(ClaimRecord::now(self.claimant))?;
        let claimed = self.store.set(&key, record, true).await?;
        if claimed {
            tracing::debug!(lock = %key, claimant = %self.claimant, "claimed");
        } else {
            tracing::debug!(lock = %key, "already claimed, skipping");
        }
        Ok(claimed)
    }

    /// Current holder of the claim on `job`, if any.
    pub async fn holder(&self, workflow: &str, job: &JobDescriptor) -> Result<Option<ClaimRecord>, StoreError> {
        match self.store.get(&Self::lock_key(workflow, job)).await? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => Ok(None),
        }
    }

    pub async fn reset(&self, workflow: &str, job: &JobDescriptor) -> Result<(), StoreError> {
        self.store.delete(&Self::lock_key(workflow, job)).await
    }

    /// Clear the claims on `jobs`; returns how many existed beforehand.
    pub async fn reset_all(&self, workflow: &str, jobs: &[JobDescriptor]) -> Result<usize, StoreError> {
        let mut cleared = 0;
        for job in jobs {
            let key = Self::lock_key(workflow, job);
            if self.store.get(&key).await?.is_some() {
                cleared += 1;
            }
            self.store.delete(&key).await?;
        }
        tracing::info!(workflow, cleared, "locks reset");
        Ok(cleared)
    }
}
