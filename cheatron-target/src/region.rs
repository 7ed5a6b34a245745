//! メモリ領域情報
//!
//! /proc/<pid>/maps の1行を解析して、領域の範囲・保護属性・状態・種別に分類します。

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    /// メモリ保護フラグ
    pub struct Protection: u32 {
        /// 読み取り可能
        const READ = 0x01;
        /// 書き込み可能
        const WRITE = 0x02;
        /// 実行可能
        const EXECUTE = 0x04;
        /// 共有マッピング
        const SHARED = 0x08;
        /// ファイルを私的にマップした書き込み可能領域（コピーオンライト）
        const COPY_ON_WRITE = 0x10;
    }
}

impl Protection {
    /// 読み取り可能か
    pub fn can_read(self) -> bool {
        self.contains(Protection::READ)
    }

    /// 書き込み可能か
    pub fn can_write(self) -> bool {
        self.contains(Protection::WRITE)
    }

    /// 実行可能か
    pub fn can_execute(self) -> bool {
        self.contains(Protection::EXECUTE)
    }

    pub fn is_copy_on_write(self) -> bool {
        self.contains(Protection::COPY_ON_WRITE)
    }

    /// "RWX" 形式の文字列（不可の位置は '-'）
    pub fn to_rwx_string(self) -> String {
        let mut s = String::with_capacity(3);
        s.push(if self.can_read() { 'R' } else { '-' });
        s.push(if self.can_write() { 'W' } else { '-' });
        s.push(if self.can_execute() { 'X' } else { '-' });
        s
    }

    /// 保護属性の分類
    pub fn class(self) -> ProtectionClass {
        let r = self.can_read();
        let w = self.can_write();
        let cow = self.is_copy_on_write();

        if self.can_execute() {
            match (r, w) {
                (_, true) if cow => ProtectionClass::ExecuteWriteCopy,
                (_, true) => ProtectionClass::ExecuteReadWrite,
                (true, false) => ProtectionClass::ExecuteRead,
                (false, false) => ProtectionClass::Execute,
            }
        } else {
            match (r, w) {
                (_, true) if cow => ProtectionClass::WriteCopy,
                (_, true) => ProtectionClass::ReadWrite,
                (true, false) => ProtectionClass::ReadOnly,
                (false, false) => ProtectionClass::NoAccess,
            }
        }
    }
}

/// 保護属性の記号的な分類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtectionClass {
    NoAccess,
    ReadOnly,
    ReadWrite,
    WriteCopy,
    Execute,
    ExecuteRead,
    ExecuteReadWrite,
    ExecuteWriteCopy,
}

impl ProtectionClass {
    pub fn as_str(self) -> &'static str {
        match self {
            ProtectionClass::NoAccess => "no_access",
            ProtectionClass::ReadOnly => "readonly",
            ProtectionClass::ReadWrite => "readwrite",
            ProtectionClass::WriteCopy => "writecopy",
            ProtectionClass::Execute => "execute",
            ProtectionClass::ExecuteRead => "execute_read",
            ProtectionClass::ExecuteReadWrite => "execute_readwrite",
            ProtectionClass::ExecuteWriteCopy => "execute_writecopy",
        }
    }
}

/// 領域のコミット状態
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionState {
    Committed,
    Reserved,
    Free,
}

impl RegionState {
    pub fn as_str(self) -> &'static str {
        match self {
            RegionState::Committed => "committed",
            RegionState::Reserved => "reserved",
            RegionState::Free => "free",
        }
    }
}

/// 領域の裏付け種別
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionType {
    Private,
    Mapped,
    Image,
    Unknown,
}

impl RegionType {
    pub fn as_str(self) -> &'static str {
        match self {
            RegionType::Private => "private",
            RegionType::Mapped => "mapped",
            RegionType::Image => "image",
            RegionType::Unknown => "unknown",
        }
    }
}

/// メモリ領域の記述子
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryRegion {
    /// 領域の開始アドレス
    pub base: u64,
    /// 領域のサイズ（バイト数）
    pub size: u64,
    pub protection: Protection,
    pub state: RegionState,
    pub region_type: RegionType,
    /// マップされたファイルまたは疑似名（[heap] など）
    pub path: Option<String>,
}

impl MemoryRegion {
    /// 領域の終端アドレス（この値自体は含まない）
    pub fn end(&self) -> u64 {
        self.base + self.size
    }

    /// 指定されたアドレスがこの領域内にあるか
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.base && addr < self.end()
    }

    /// /proc/<pid>/maps の1行を解析する
    ///
    /// フォーマット: "address perms offset dev inode pathname"
    /// 例: "7f1234567000-7f1234568000 r-xp 00000000 08:01 123456 /lib/libc.so"
    ///
    /// 解析できない行は None を返します。
    pub fn parse_maps_line(line: &str) -> Option<Self> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 5 {
            return None;
        }

        let (start, end) = parts[0].split_once('-')?;
        let start = u64::from_str_radix(start, 16).ok()?;
        let end = u64::from_str_radix(end, 16).ok()?;
        if end < start {
            return None;
        }

        let perms = parts[1].as_bytes();
        if perms.len() < 4 {
            return None;
        }

        let path = if parts.len() > 5 {
            Some(parts[5..].join(" "))
        } else {
            None
        };
        let file_backed = path.as_deref().map_or(false, |p| p.starts_with('/'));
        let shared = perms[3] == b's';

        let mut protection = Protection::empty();
        protection.set(Protection::READ, perms[0] == b'r');
        protection.set(Protection::WRITE, perms[1] == b'w');
        protection.set(Protection::EXECUTE, perms[2] == b'x');
        protection.set(Protection::SHARED, shared);
        protection.set(
            Protection::COPY_ON_WRITE,
            perms[1] == b'w' && !shared && file_backed,
        );

        let state = if protection.intersection(Protection::READ | Protection::WRITE | Protection::EXECUTE).is_empty()
            && path.is_none()
        {
            RegionState::Reserved
        } else {
            RegionState::Committed
        };

        let region_type = classify_backing(path.as_deref(), shared);

        Some(Self {
            base: start,
            size: end - start,
            protection,
            state,
            region_type,
            path,
        })
    }
}

fn classify_backing(path: Option<&str>, shared: bool) -> RegionType {
    match path {
        None => {
            if shared {
                RegionType::Mapped
            } else {
                RegionType::Private
            }
        }
        Some(p) if p.starts_with('/') => {
            if shared {
                RegionType::Mapped
            } else {
                RegionType::Image
            }
        }
        Some("[heap]") => RegionType::Private,
        Some(p) if p.starts_with("[stack") || p.starts_with("[anon:") => {
            if shared {
                RegionType::Mapped
            } else {
                RegionType::Private
            }
        }
        Some("[vdso]") => RegionType::Image,
        Some(_) => RegionType::Unknown,
    }
}
