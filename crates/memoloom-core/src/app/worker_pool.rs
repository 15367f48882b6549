//! WorkerPool - チャンク単位でジョブを配る固定サイズのワーカー群
//!
//! # 学習ポイント
//! - ジョブ列を `max(1, ceil(jobs / N))` 件ずつのチャンクに分けて共有キューへ
//! - 各ワーカーはキューが空になるまでチャンクを取り続ける
//! - ストア障害が起きたら watch channel で全員に「新しいチャンクを取るな」を通知
//! - 実行中のジョブはキャンセルしない（最後まで走らせる）
//! - ワーカーが panic しても残りのワーカーの終了を待ってから返す
//! - 結果は Mutex<Vec<_>> の sink に集める
//!
//! N = 1 のときはワーカーを spawn せず呼び出し元のタスクで順番に実行する。

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;

use super::status::JobReport;
use crate::domain::JobDescriptor;
use crate::error::MemoError;
use crate::ports::StoreError;

/// Per-job work executed by the pool.
#[async_trait]
pub trait JobHandler: Send + Sync + 'static {
    async fn handle(&self, worker_id: usize, job: JobDescriptor) -> Result<JobReport, StoreError>;
}

type ChunkQueue = Arc<Mutex<VecDeque<Vec<JobDescriptor>>>>;

/// State shared by every worker of one run.
struct Shared {
    queue: ChunkQueue,
    sink: Mutex<Vec<JobReport>>,
    first_error: Mutex<Option<StoreError>>,
    stop_tx: watch::Sender<bool>,
}

pub struct WorkerPool {
    num_workers: usize,
}

impl WorkerPool {
    /// Values below 1 are clamped to 1.
    pub fn new(num_workers: usize) -> Self {
        Self {
            num_workers: num_workers.max(1),
        }
    }

    pub fn num_workers(&self) -> usize {
        self.num_workers
    }

    pub fn chunk_size(num_jobs: usize, num_workers: usize) -> usize {
        num_jobs.div_ceil(num_workers.max(1)).max(1)
    }

    pub async fn run(
        &self,
        jobs: Vec<JobDescriptor>,
        handler: Arc<dyn JobHandler>,
    ) -> Result<Vec<JobReport>, MemoError> {
        if self.num_workers == 1 {
            let mut reports = Vec::with_capacity(jobs.len());
            for job in jobs {
                reports.push(handler.handle(0, job).await?);
            }
            return Ok(reports);
        }

        let chunk_size = Self::chunk_size(jobs.len(), self.num_workers);
        let chunks: VecDeque<Vec<JobDescriptor>> =
            jobs.chunks(chunk_size).map(<[JobDescriptor]>::to_vec).collect();
        tracing::debug!(
            workers = self.num_workers,
            chunks = chunks.len(),
            chunk_size,
            "dispatching chunks"
        );

        let (stop_tx, stop_rx) = watch::channel(false);
        let shared = Arc::new(Shared {
            queue: Arc::new(Mutex::new(chunks)),
            sink: Mutex::new(Vec::new()),
            first_error: Mutex::new(None),
            stop_tx,
        });

        let joins: Vec<JoinHandle<()>> = (0..self.num_workers)
            .map(|worker_id| {
                let shared = Arc::clone(&shared);
                let handler = Arc::clone(&handler);
                let stop_rx = stop_rx.clone();
                tokio::spawn(async move {
                    worker_loop(worker_id, shared, handler, stop_rx).await;
                })
            })
            .collect();

        // エラーを返すのは全ワーカーの終了後
        let mut join_error = None;
        for (worker_id, join) in joins.into_iter().enumerate() {
            if let Err(e) = join.await {
                tracing::error!(worker_id, error = %e, "worker task failed");
                join_error.get_or_insert(MemoError::WorkerJoin {
                    worker_id,
                    message: e.to_string(),
                });
            }
        }

        if let Some(err) = shared.first_error.lock().await.take() {
            return Err(err.into());
        }
        if let Some(err) = join_error {
            return Err(err);
        }
        Ok(std::mem::take(&mut *shared.sink.lock().await))
    }
}

async fn worker_loop(
    worker_id: usize,
    shared: Arc<Shared>,
    handler: Arc<dyn JobHandler>,
    stop_rx: watch::Receiver<bool>,
) {
    loop {
        if *stop_rx.borrow() {
            break;
        }
        // キューのロックはチャンクを取り出す間だけ
        let Some(chunk) = shared.queue.lock().await.pop_front() else {
            break;
        };

        for job in chunk {
            if *stop_rx.borrow() {
                return;
            }
            match handler.handle(worker_id, job).await {
                Ok(report) => shared.sink.lock().await.push(report),
                Err(err) => {
                    tracing::error!(worker_id, error = %err, "store error, stopping workers");
                    shared.first_error.lock().await.get_or_insert(err);
                    // receivers may already be gone
                    let _ = shared.stop_tx.send(true);
                    return;
                }
            }
        }
    }
}
