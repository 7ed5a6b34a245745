//! Cheatron ネイティブブリッジのコア機能
//!
//! このクレートは、ホストから使うネイティブリソースの管理を提供します。
//! リソースを所有するリファレンス、プロセスメモリへのアクセス、
//! 逆アセンブルエンジンのハンドル、ホスト向けの診断メッセージチャネルを統合します。

pub mod command;
pub mod diagnostics;
pub mod engine;
pub mod error;
pub mod parse;
pub mod process;
pub mod reference;
pub mod runtime;
pub mod value;

pub use command::Command;
pub use diagnostics::{ChannelConfig, DiagnosticChannel, Level, LogEvent, LogSink};
pub use engine::{EngineArch, EngineInstance, EngineMode, Instruction, ModeFlags};
pub use error::{Error, MemoryOperation};
pub use reference::{Destructor, OpaqueHandle, Ownership, Reference};
pub use runtime::{ExternalLibrary, InitStatus, NoopLibrary, Runtime};
pub use value::{HostBigInt, HostValue};

// 他のクレートから使用するために再エクスポート
pub use cheatron_target::{MemoryRegion, Protection, ProtectionClass, RegionState, RegionType};

/// ブリッジの結果型
pub type Result<T> = std::result::Result<T, Error>;
