//! memoloom-core
//!
//! Job memoization, locking and scheduling for re-entrant batch pipelines.
//! Many processes run the same workflow description against one shared
//! store; each finds the jobs that are done, claimed, or free to run, and
//! at most one executor runs per fingerprint.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（job, fingerprint, output, claim, catalog, workflow）
//! - **ports**: 抽象化レイヤー（MemoStore, Executor）
//! - **impls**: MemoStore の実装（InMemoryStore, FsStore）
//! - **app**: エンジン本体（lock, graph_builder, scheduler, worker_pool, collector）
//! - **config**: パイプライン記述と処理設定（YAML）
//! - **error**: エラー型

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod impls;
pub mod ports;

pub use error::{ConfigError, MemoError};
