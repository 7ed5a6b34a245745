//! ホストコマンド

/// ホストコマンド
///
/// リファレンスは `$1` のような名前で、アドレスと長さは文字列のまま保持します。
/// 解決と数値変換は実行時に行います。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// 現在のプロセスのリファレンスを取得
    Current,
    /// PIDを指定してプロセスを開く
    Open(String),
    /// アドレスから所有権を持たないリファレンスを作成
    Ref(String),
    /// メモリを読み取る
    Read {
        target: String,
        address: String,
        length: String,
    },
    /// メモリに書き込む
    Write {
        target: String,
        address: String,
        data: String,
    },
    /// メモリ領域を問い合わせる
    Query { target: String, address: String },
    /// リファレンスのアドレスを表示
    Addr(String),
    /// リファレンスが有効かどうか表示
    Valid(String),
    /// リファレンスを解放
    Release(String),
    /// リファレンスを手放す（Drop による破棄）
    Drop(String),
    /// 逆アセンブルエンジンを開く
    Cs { arch: String, mode: String },
    /// プロセスメモリを逆アセンブル
    Disasm {
        engine: String,
        target: String,
        address: String,
        length: String,
    },
    /// リファレンス一覧表示
    List,
    /// ヘルプ表示
    Help,
    /// 終了
    Quit,
}

impl Command {
    /// コマンド文字列をパースする
    pub fn parse(input: &str) -> Option<Self> {
        let parts: Vec<&str> = input.split_whitespace().collect();
        if parts.is_empty() {
            return None;
        }

        let arg = |i: usize| parts.get(i).map(|s| s.to_string());

        match (parts[0], parts.len()) {
            ("current", 1) => Some(Command::Current),
            ("open", 2) => Some(Command::Open(arg(1)?)),
            ("ref", 2) => Some(Command::Ref(arg(1)?)),
            ("read" | "r", 4) => Some(Command::Read {
                target: arg(1)?,
                address: arg(2)?,
                length: arg(3)?,
            }),
            // 16進数バイト列は空白区切りでもよい
            ("write" | "w", n) if n >= 4 => Some(Command::Write {
                target: arg(1)?,
                address: arg(2)?,
                data: parts[3..].join(""),
            }),
            ("query" | "q", 3) => Some(Command::Query {
                target: arg(1)?,
                address: arg(2)?,
            }),
            ("addr", 2) => Some(Command::Addr(arg(1)?)),
            ("valid", 2) => Some(Command::Valid(arg(1)?)),
            ("release", 2) => Some(Command::Release(arg(1)?)),
            ("drop", 2) => Some(Command::Drop(arg(1)?)),
            ("cs", 3) => Some(Command::Cs {
                arch: arg(1)?,
                mode: arg(2)?,
            }),
            ("disasm" | "d", 5) => Some(Command::Disasm {
                engine: arg(1)?,
                target: arg(2)?,
                address: arg(3)?,
                length: arg(4)?,
            }),
            ("list" | "ls", 1) => Some(Command::List),
            ("help" | "h" | "?", 1) => Some(Command::Help),
            ("quit" | "exit", 1) => Some(Command::Quit),
            _ => None,
        }
    }
}
