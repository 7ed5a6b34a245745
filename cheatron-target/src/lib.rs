//! Cheatron ターゲットプロセスアクセス
//!
//! このクレートは、対象プロセスのメモリへアクセスするための低レベル機能を提供します。
//! /proc/<pid>/mem によるハンドルの取得、位置指定の読み書き、
//! /proc/<pid>/maps によるメモリ領域の問い合わせを行います。

pub mod process;
pub mod memory;
pub mod region;

pub use process::ProcessHandle;
pub use memory::Memory;
pub use region::{MemoryRegion, Protection, ProtectionClass, RegionState, RegionType};

/// ターゲットアクセスの結果型
///
/// OSが返したエラー詳細をそのまま保持するため `std::io::Error` を使います。
pub type Result<T> = std::io::Result<T>;
