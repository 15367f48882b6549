//! App - アプリケーション層
//!
//! ports（MemoStore / Executor）を組み合わせてエンジン本体を実装します。
//!
//! # 主要コンポーネント
//! - **LockCoordinator**: 条件付き set による claim / reset
//! - **WorkflowGraphBuilder**: パイプライン記述 → ジョブ列（上流が無ければ打ち切り）
//! - **Scheduler**: 選択・並べ替え・ワーカープールへの投入
//! - **WorkerPool**: チャンク単位で配る固定サイズのワーカー群
//! - **ResultCollector**: ジョブ一覧と結果の公開

pub mod collector;
pub mod graph_builder;
pub mod lock;
pub mod scheduler;
pub mod status;
pub mod worker_pool;

// 主要な型を再エクスポート
pub use self::collector::ResultCollector;
pub use self::graph_builder::WorkflowGraphBuilder;
pub use self::lock::LockCoordinator;
pub use self::scheduler::{JobOrder, JobSelector, Scheduler, SchedulerOptions};
pub use self::status::{JobOutcome, JobReport, JobState, JobStatus, RunCounts, RunReport};
pub use self::worker_pool::{JobHandler, WorkerPool};
