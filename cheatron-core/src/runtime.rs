//! 初期化コンテキスト
//!
//! ログシンクの登録、外部ライブラリの初期化、現在のプロセスのリファレンス取得を
//! まとめて行い、終了時に外部ライブラリの破棄を1回だけ実行します。
//! グローバルな初期化フラグの代わりに、このオブジェクトの生存期間が
//! 「初期化済み」を表します。

use crate::diagnostics::{DiagnosticChannel, Level, LogSink};
use crate::{engine, process, Error, HostValue, Reference, Result};
use std::sync::Arc;

/// 起動時に1回だけ初期化し、終了時に1回だけ破棄する外部ライブラリ
///
/// 初期化中やその後のログは、渡されたチャネルの `emit_tagged` 経由で送ります。
pub trait ExternalLibrary {
    /// ライブラリ名（ログとエラー用）
    fn name(&self) -> &str;

    /// ライブラリを初期化する
    fn init(&mut self, channel: &'static DiagnosticChannel) -> std::result::Result<(), String>;

    /// ライブラリを破棄する
    fn destroy(&mut self);
}

/// 外部ライブラリがリンクされていない場合に使う空の実装
#[derive(Debug, Default)]
pub struct NoopLibrary;

impl ExternalLibrary for NoopLibrary {
    fn name(&self) -> &str {
        "none"
    }

    fn init(&mut self, _channel: &'static DiagnosticChannel) -> std::result::Result<(), String> {
        Ok(())
    }

    fn destroy(&mut self) {}
}

/// 初期化状態
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InitStatus {
    pub library_ready: bool,
    pub last_error: Option<String>,
}

/// 初期化済みのブリッジ
pub struct Runtime<L: ExternalLibrary = NoopLibrary> {
    /// 診断メッセージチャネル
    channel: &'static DiagnosticChannel,
    /// 外部ライブラリ
    library: L,
    /// 初期化状態
    status: InitStatus,
    /// 現在のプロセスのリファレンス
    current: Option<Reference>,
    /// 破棄済みかどうか
    destroyed: bool,
}

impl<L: ExternalLibrary> Runtime<L> {
    /// ブリッジを初期化する
    ///
    /// シンクを登録してから外部ライブラリを初期化します。初期化に失敗しても
    /// ブリッジは縮退状態で使用でき、エラーはチャネルに送られて
    /// [`InitStatus::last_error`] に記録されます。
    /// 外部ライブラリが必要な呼び出し元は [`Runtime::ensure_ready`] で確認します。
    pub fn initialize<S>(channel: &'static DiagnosticChannel, sink: &Arc<S>, mut library: L) -> Result<Self>
    where
        S: LogSink + 'static,
    {
        channel.install(sink);

        let status = match library.init(channel) {
            Ok(()) => {
                channel.emit(Level::Info, "Cheatron native module initialized successfully");
                InitStatus {
                    library_ready: true,
                    last_error: None,
                }
            }
            Err(message) => {
                tracing::warn!("[{}] initialization failed: {}", library.name(), message);
                channel.emit(
                    Level::Error,
                    format!("[{}] Initialization failed: {}", library.name(), message),
                );
                InitStatus {
                    library_ready: false,
                    last_error: Some(message),
                }
            }
        };

        let mut runtime = Self {
            channel,
            library,
            status,
            current: None,
            destroyed: false,
        };

        // 失敗した場合は runtime の Drop がライブラリを破棄する
        let current = process::get_current()?;
        channel.emit(
            Level::Debug,
            format!("Current process reference at {}", current.address()?),
        );
        runtime.current = Some(current);

        Ok(runtime)
    }

    /// 外部ライブラリが初期化済みであることを確認する
    ///
    /// 初期化に失敗していた場合は記録されたエラーを [`Error::LibraryInit`] で返します。
    pub fn ensure_ready(&self) -> Result<()> {
        if self.status.library_ready {
            return Ok(());
        }
        Err(Error::LibraryInit {
            library: self.library.name().to_string(),
            message: self
                .status
                .last_error
                .clone()
                .unwrap_or_else(|| "library is not initialized".to_string()),
        })
    }

    /// 初期化状態を取得する
    pub fn status(&self) -> &InitStatus {
        &self.status
    }

    /// 診断メッセージチャネルを取得する
    pub fn channel(&self) -> &'static DiagnosticChannel {
        self.channel
    }

    /// 外部ライブラリを取得する
    pub fn library(&self) -> &L {
        &self.library
    }

    /// 現在のプロセスのリファレンスを取得する
    pub fn current_process(&self) -> Result<&Reference> {
        self.current.as_ref().ok_or(Error::InvalidHandle)
    }

    /// PIDを指定してプロセスを開く
    pub fn open_process(&self, pid: &HostValue) -> Result<Reference> {
        process::open(pid)
    }

    /// 逆アセンブルエンジンを開く
    pub fn open_engine(&self, arch: &HostValue, mode: &HostValue) -> Result<Reference> {
        engine::open(arch, mode)
    }

    /// キューに溜まった診断メッセージをシンクへ届ける
    pub fn dispatch(&self) -> usize {
        self.channel.dispatch()
    }

    /// ブリッジを終了する
    pub fn shutdown(mut self) {
        self.teardown();
    }

    fn teardown(&mut self) {
        if let Some(mut current) = self.current.take() {
            current.release();
        }

        if self.status.library_ready && !self.destroyed {
            self.destroyed = true;
            self.status.library_ready = false;
            self.library.destroy();
            tracing::debug!("[{}] destroyed", self.library.name());
        }
    }
}

impl<L: ExternalLibrary> Drop for Runtime<L> {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::LogEvent;
    use parking_lot::Mutex;
    use std::cell::Cell;
    use std::rc::Rc;

    fn leaked_channel() -> &'static DiagnosticChannel {
        Box::leak(Box::new(DiagnosticChannel::new()))
    }

    #[derive(Default)]
    struct Collector {
        events: Mutex<Vec<LogEvent>>,
    }

    impl LogSink for Collector {
        fn log(&self, level: Level, message: &str) {
            self.events.lock().push(LogEvent {
                level,
                message: message.to_string(),
            });
        }
    }

    struct CountingLibrary {
        inits: Rc<Cell<u32>>,
        destroys: Rc<Cell<u32>>,
        fail: bool,
    }

    impl ExternalLibrary for CountingLibrary {
        fn name(&self) -> &str {
            "Neptune"
        }

        fn init(&mut self, channel: &'static DiagnosticChannel) -> std::result::Result<(), String> {
            self.inits.set(self.inits.get() + 1);
            channel.emit_tagged("[DEBUG]", "hooks prepared");
            if self.fail {
                Err("code 5".to_string())
            } else {
                Ok(())
            }
        }

        fn destroy(&mut self) {
            self.destroys.set(self.destroys.get() + 1);
        }
    }

    fn counting(fail: bool) -> (CountingLibrary, Rc<Cell<u32>>, Rc<Cell<u32>>) {
        let inits = Rc::new(Cell::new(0));
        let destroys = Rc::new(Cell::new(0));
        let library = CountingLibrary {
            inits: Rc::clone(&inits),
            destroys: Rc::clone(&destroys),
            fail,
        };
        (library, inits, destroys)
    }

    #[test]
    fn test_initialize_and_shutdown_once() {
        let channel = leaked_channel();
        let sink = Arc::new(Collector::default());
        let (library, inits, destroys) = counting(false);

        let runtime = Runtime::initialize(channel, &sink, library).unwrap();
        assert!(runtime.status().library_ready);
        assert!(runtime.status().last_error.is_none());
        assert!(runtime.ensure_ready().is_ok());
        assert_eq!(inits.get(), 1);
        assert!(runtime.current_process().unwrap().is_valid());

        runtime.dispatch();
        {
            let events = sink.events.lock();
            assert_eq!(events[0].level, Level::Debug);
            assert_eq!(events[0].message, "hooks prepared");
            assert!(events
                .iter()
                .any(|e| e.level == Level::Info && e.message.contains("initialized successfully")));
        }

        runtime.shutdown();
        assert_eq!(destroys.get(), 1);
    }

    #[test]
    fn test_drop_destroys_library() {
        let channel = leaked_channel();
        let sink = Arc::new(Collector::default());
        let (library, _, destroys) = counting(false);

        let runtime = Runtime::initialize(channel, &sink, library).unwrap();
        drop(runtime);
        assert_eq!(destroys.get(), 1);
    }

    #[test]
    fn test_failed_init_reports_error() {
        let channel = leaked_channel();
        let sink = Arc::new(Collector::default());
        let (library, inits, destroys) = counting(true);

        let runtime = Runtime::initialize(channel, &sink, library).unwrap();
        assert_eq!(inits.get(), 1);
        assert_eq!(
            runtime.status(),
            &InitStatus {
                library_ready: false,
                last_error: Some("code 5".to_string()),
            }
        );
        assert!(matches!(
            runtime.ensure_ready(),
            Err(Error::LibraryInit { ref library, ref message }) if library == "Neptune" && message == "code 5"
        ));

        // 縮退状態でもプロセス操作は使える
        assert!(runtime.current_process().unwrap().is_valid());

        runtime.dispatch();
        {
            let events = sink.events.lock();
            assert!(events
                .iter()
                .any(|e| e.level == Level::Error && e.message.contains("code 5")));
            assert!(!events.iter().any(|e| e.message.contains("initialized successfully")));
        }

        drop(runtime);
        assert_eq!(destroys.get(), 0);
    }

    #[test]
    fn test_runtime_opens_resources() {
        let channel = leaked_channel();
        let sink = Arc::new(Collector::default());
        let runtime = Runtime::initialize(channel, &sink, NoopLibrary).unwrap();

        let pid = HostValue::from(std::process::id());
        let reference = runtime.open_process(&pid).unwrap();
        assert_eq!(process::pid(&reference).unwrap(), std::process::id());

        let engine = runtime
            .open_engine(&HostValue::from(3u32), &HostValue::from(8u32))
            .unwrap();
        assert!(engine.is_valid());
    }
}
