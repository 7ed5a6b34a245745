//! グローバル診断チャネルと初期化コンテキストのテスト
//!
//! グローバルチャネルはプロセス内で共有されるため、このファイルのテストは1つだけです。

use cheatron_core::diagnostics::{self, Level, LogEvent, LogSink};
use cheatron_core::{NoopLibrary, Runtime};
use parking_lot::Mutex;
use std::sync::Arc;
use std::thread;

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

#[test]
fn test_global_channel_lifecycle() {
    let channel = diagnostics::global();
    assert!(std::ptr::eq(channel, diagnostics::global()));

    let sink = Arc::new(Collector::default());
    let runtime = Runtime::initialize(channel, &sink, NoopLibrary).expect("Failed to initialize");
    runtime.dispatch();
    sink.events.lock().clear();

    // ワーカースレッドから送ったメッセージはホストの dispatch で届く
    let handles: Vec<_> = (0..8)
        .map(|i| thread::spawn(move || diagnostics::emit(Level::Warn, format!("worker {}", i))))
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert!(sink.events.lock().is_empty());

    assert_eq!(runtime.dispatch(), 8);
    {
        let events = sink.events.lock();
        assert_eq!(events.len(), 8);
        assert!(events.iter().all(|e| e.level == Level::Warn));
    }

    // シンクが破棄された後のメッセージは誰にも届かない
    drop(sink);
    diagnostics::emit(Level::Info, "after sink dropped");
    assert_eq!(runtime.dispatch(), 0);
    assert!(!channel.is_installed());

    runtime.shutdown();
}
