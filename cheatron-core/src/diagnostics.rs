//! 診断メッセージチャネル
//!
//! 任意のネイティブスレッド（外部ライブラリ内部のスレッドを含む）から送られた
//! ログイベントを、ホストが登録した1つのシンクへ非同期に届けます。
//!
//! - 送信側（`emit`）は決してブロックしません。シンク未登録やキュー満杯の場合は
//!   メッセージを即座に破棄します（ベストエフォート）。
//! - 受信側（`dispatch`）はホスト自身のスレッドで、ホストの都合のよいタイミングで
//!   キューを空にします。届けられたメッセージはキューに入った順序を保ちます。
//! - チャネルはシンクを弱参照で保持するため、ホストの実行コンテキストを
//!   不必要に生き延びさせることはありません。

use crossbeam::channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, LazyLock, Weak};

/// ログの重要度
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Level {
    Debug,
    Info,
    Warn,
    Error,
}

impl Level {
    pub fn as_str(self) -> &'static str {
        match self {
            Level::Debug => "debug",
            Level::Info => "info",
            Level::Warn => "warn",
            Level::Error => "error",
        }
    }

    /// 外部ライブラリの自由形式の種別タグから重要度を決める
    ///
    /// 大文字小文字を区別する部分一致で、ERROR > WARN > DEBUG の順に判定し、
    /// どれにも一致しなければ Info になります。
    pub fn from_tag(tag: &str) -> Self {
        if tag.contains("ERROR") {
            Level::Error
        } else if tag.contains("WARN") {
            Level::Warn
        } else if tag.contains("DEBUG") {
            Level::Debug
        } else {
            Level::Info
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// ログイベント
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEvent {
    pub level: Level,
    pub message: String,
}

/// ホストが登録するログの受け取り先
pub trait LogSink: Send + Sync {
    fn log(&self, level: Level, message: &str);
}

impl<F> LogSink for F
where
    F: Fn(Level, &str) + Send + Sync,
{
    fn log(&self, level: Level, message: &str) {
        self(level, message)
    }
}

/// チャネルの設定
#[derive(Debug, Clone)]
pub struct ChannelConfig {
    /// キューに保持できるメッセージ数の上限
    pub capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self { capacity: 1024 }
    }
}

/// 診断メッセージチャネル
pub struct DiagnosticChannel {
    sender: Sender<LogEvent>,
    receiver: Receiver<LogEvent>,
    /// 登録中のシンク（弱参照）。登録・差し替えはこのロックで直列化される
    sink: Mutex<Option<Weak<dyn LogSink>>>,
    /// シンクが登録されているか（送信側はロックを取らずにこれだけを見る）
    installed: AtomicBool,
    dropped: AtomicU64,
}

static GLOBAL: LazyLock<DiagnosticChannel> = LazyLock::new(DiagnosticChannel::new);

/// プロセス全体で共有されるチャネルを取得する
pub fn global() -> &'static DiagnosticChannel {
    &GLOBAL
}

/// グローバルチャネルにメッセージを送る
pub fn emit(level: Level, message: impl Into<String>) {
    global().emit(level, message);
}

impl DiagnosticChannel {
    /// デフォルト設定でチャネルを作成する
    pub fn new() -> Self {
        Self::with_config(ChannelConfig::default())
    }

    pub fn with_config(config: ChannelConfig) -> Self {
        let (sender, receiver) = bounded(config.capacity.max(1));
        Self {
            sender,
            receiver,
            sink: Mutex::new(None),
            installed: AtomicBool::new(false),
            dropped: AtomicU64::new(0),
        }
    }

    /// シンクを登録する
    ///
    /// すでにシンクが登録されている場合は、先にそれを解放してから差し替えます。
    /// チャネルはシンクを弱参照で保持するため、ホスト側が `Arc` を保持し続ける
    /// 必要があります。
    pub fn install<S>(&self, sink: &Arc<S>)
    where
        S: LogSink + 'static,
    {
        let weak: Weak<dyn LogSink> = Arc::downgrade(sink) as Weak<dyn LogSink>;

        let mut slot = self.sink.lock();
        if slot.take().is_some() {
            tracing::debug!("replacing diagnostic sink");
        }
        *slot = Some(weak);
        self.installed.store(true, Ordering::Release);
    }

    /// シンクの登録を解除する
    ///
    /// キューに残っているメッセージは次の `dispatch` で破棄されます。
    pub fn uninstall(&self) {
        let mut slot = self.sink.lock();
        slot.take();
        self.installed.store(false, Ordering::Release);
    }

    /// シンクが登録されているか
    pub fn is_installed(&self) -> bool {
        self.installed.load(Ordering::Acquire)
    }

    /// メッセージをキューに入れる
    ///
    /// どのスレッドからでも呼び出せ、決してブロックしません。
    /// シンク未登録やキュー満杯の場合、メッセージはその場で破棄されます。
    pub fn emit(&self, level: Level, message: impl Into<String>) {
        if !self.is_installed() {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }

        let event = LogEvent {
            level,
            message: message.into(),
        };

        match self.sender.try_send(event) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) | Err(TrySendError::Disconnected(_)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// 外部ライブラリ互換の経路: 種別タグから重要度を決めてキューに入れる
    pub fn emit_tagged(&self, tag: &str, message: impl Into<String>) {
        self.emit(Level::from_tag(tag), message);
    }

    /// キューに溜まったメッセージを現在のシンクへ届ける
    ///
    /// ホストのスレッドから呼び出します。各メッセージはキューから取り出された
    /// 時点で登録されているシンクにだけ届けられます。シンクがない場合、
    /// またはシンクがすでに破棄されている場合、メッセージは破棄されます。
    /// 届けたメッセージ数を返します。
    pub fn dispatch(&self) -> usize {
        let sink = {
            let mut slot = self.sink.lock();
            match slot.as_ref().map(Weak::upgrade) {
                Some(Some(sink)) => Some(sink),
                Some(None) => {
                    // ホスト側がシンクを破棄した
                    slot.take();
                    self.installed.store(false, Ordering::Release);
                    None
                }
                None => None,
            }
        };

        let mut delivered = 0;
        for event in self.receiver.try_iter() {
            match &sink {
                Some(sink) => {
                    let result = catch_unwind(AssertUnwindSafe(|| sink.log(event.level, &event.message)));
                    if result.is_ok() {
                        delivered += 1;
                    } else {
                        self.dropped.fetch_add(1, Ordering::Relaxed);
                    }
                }
                None => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        delivered
    }

    /// キューに残っているメッセージ数
    pub fn pending(&self) -> usize {
        self.receiver.len()
    }

    /// 破棄されたメッセージの累計数
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl Default for DiagnosticChannel {
    fn default() -> Self {
        Self::new()
    }
}
