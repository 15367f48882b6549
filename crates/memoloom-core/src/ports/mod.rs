//! Ports - 抽象化レイヤー
//!
//! エンジンが外部に依存する箇所はここに trait として定義します。
//! 実装（ファイルシステム、インメモリ、コンテナ実行など）は impls や
//! CLI クレート側に置き、エンジン本体はこの trait だけを見ます。
//!
//! # 設計原則
//! - ストアは明示的に注入する（プロセス全体のシングルトンは使わない）
//! - Executor の中身（科学計算）はエンジンの関心外

pub mod executor;
pub mod memo_store;

pub use self::executor::{Executor, ExecutorError};
pub use self::memo_store::{CONTENT_SCHEME, MemoStore, StoreError, content_uri};
