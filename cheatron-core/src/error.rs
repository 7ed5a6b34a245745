//! ブリッジ層のエラー型

use std::io;
use thiserror::Error;

/// 呼び出し元へ同期的に返される失敗
///
/// どのエラーも自動的には再試行されません。
#[derive(Debug, Error)]
pub enum Error {
    /// null のネイティブリソースを所有しようとした
    #[error("Cannot create Reference from null pointer")]
    NullResource,

    /// 解放済み、または一度も有効でなかったリファレンスに対する操作
    #[error("Reference is invalid or released")]
    InvalidHandle,

    /// 引数の型・形・個数が不正
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// 読み取り長が上限を超えている
    #[error("Invalid read length {length} (must be between 1 and {max} bytes)")]
    Range { length: u64, max: usize },

    /// OSがプロセスのオープンを拒否した
    #[error("Failed to open process {pid}: {source}")]
    ProcessOpen {
        pid: u32,
        #[source]
        source: io::Error,
    },

    /// プロセスメモリの読み書きに失敗した
    #[error("Failed to {operation} process memory at 0x{address:x}: {source}")]
    MemoryAccess {
        operation: MemoryOperation,
        address: u64,
        #[source]
        source: io::Error,
    },

    /// 逆アセンブルエンジンのオープンに失敗した
    #[error("Capstone failed to open: {0}")]
    EngineOpen(String),

    /// 外部ライブラリの初期化に失敗した
    #[error("[{library}] Initialization failed: {message}")]
    LibraryInit { library: String, message: String },
}

/// メモリ操作の種類（エラーメッセージ用）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryOperation {
    Read,
    Write,
}

impl std::fmt::Display for MemoryOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MemoryOperation::Read => f.write_str("read"),
            MemoryOperation::Write => f.write_str("write"),
        }
    }
}

impl Error {
    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        Error::InvalidArgument(message.into())
    }
}
