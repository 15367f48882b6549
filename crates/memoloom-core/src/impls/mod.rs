//! Impls - MemoStore の実装
//!
//! # 含まれる実装
//! - **InMemoryStore**: テスト・単一プロセス用
//! - **FsStore**: 共有ファイルシステム上の複数プロセス用
//!
//! コンテナ実行を行う Executor は CLI クレート側に置きます。

pub mod fs_store;
pub mod inmem_store;

pub use self::fs_store::FsStore;
pub use self::inmem_store::InMemoryStore;
