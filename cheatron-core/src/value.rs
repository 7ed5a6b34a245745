//! ホスト値の表現と変換
//!
//! ホストから渡される動的な値（数値・任意精度整数・文字列など）を表し、
//! アドレスや長さへの変換を行います。変換は常に正確で、上位ビットを黙って
//! 切り捨てることはありません。

use crate::{Error, Result};

/// ホストの倍精度数値で正確に表せる最大の整数（2^53 - 1）
pub const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_991.0;

/// ホストの任意精度整数
///
/// 絶対値を64ビットのワード列（下位ワードが先頭）と符号で表します。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostBigInt {
    pub negative: bool,
    pub words: Vec<u64>,
}

impl HostBigInt {
    pub fn from_u64(value: u64) -> Self {
        Self {
            negative: false,
            words: vec![value],
        }
    }

    pub fn from_i128(value: i128) -> Self {
        let magnitude = value.unsigned_abs();
        Self {
            negative: value < 0,
            words: vec![magnitude as u64, (magnitude >> 64) as u64],
        }
    }

    fn is_zero(&self) -> bool {
        self.words.iter().all(|w| *w == 0)
    }

    /// 64ビットに収まる非負の値であれば返す
    pub fn to_u64_exact(&self) -> Option<u64> {
        if self.is_zero() {
            return Some(0);
        }
        if self.negative || self.words.iter().skip(1).any(|w| *w != 0) {
            return None;
        }
        self.words.first().copied()
    }
}

/// ホストから渡される値
#[derive(Debug, Clone, PartialEq)]
pub enum HostValue {
    Undefined,
    Null,
    Boolean(bool),
    Number(f64),
    BigInt(HostBigInt),
    String(String),
}

impl HostValue {
    /// 値の種類名
    pub fn type_name(&self) -> &'static str {
        match self {
            HostValue::Undefined => "undefined",
            HostValue::Null => "null",
            HostValue::Boolean(_) => "boolean",
            HostValue::Number(_) => "number",
            HostValue::BigInt(_) => "bigint",
            HostValue::String(_) => "string",
        }
    }

    /// アドレス（number | bigint）に変換する
    pub fn to_address(&self) -> Result<u64> {
        match self {
            HostValue::Number(n) => exact_u64(*n).ok_or_else(|| {
                Error::invalid_argument(format!(
                    "address must be a non-negative safe integer, got {}",
                    n
                ))
            }),
            HostValue::BigInt(b) => b.to_u64_exact().ok_or_else(|| {
                Error::invalid_argument("address bigint must be non-negative and fit in 64 bits")
            }),
            other => Err(Error::invalid_argument(format!(
                "expected address as number|bigint, got {}",
                other.type_name()
            ))),
        }
    }

    /// 長さ（非負の整数）に変換する
    ///
    /// 0 や上限超過の判定は呼び出し側で行います。
    pub fn to_length(&self) -> Result<u64> {
        match self {
            HostValue::Number(n) => exact_u64(*n).ok_or_else(|| {
                Error::invalid_argument(format!("length must be a positive integer, got {}", n))
            }),
            other => Err(Error::invalid_argument(format!(
                "expected length as number, got {}",
                other.type_name()
            ))),
        }
    }

    /// 32ビット符号なし整数に変換する
    pub fn to_u32(&self) -> Result<u32> {
        match self {
            HostValue::Number(n) => exact_u64(*n)
                .and_then(|v| u32::try_from(v).ok())
                .ok_or_else(|| {
                    Error::invalid_argument(format!("expected a 32-bit unsigned integer, got {}", n))
                }),
            other => Err(Error::invalid_argument(format!(
                "expected number, got {}",
                other.type_name()
            ))),
        }
    }

    /// プロセスIDに変換する
    pub fn to_pid(&self) -> Result<u32> {
        let pid = self.to_u32()?;
        if pid == 0 {
            return Err(Error::invalid_argument("pid must be a positive integer"));
        }
        Ok(pid)
    }
}

/// 正確に u64 で表せる非負整数の数値であれば変換する
fn exact_u64(n: f64) -> Option<u64> {
    if !n.is_finite() || n.fract() != 0.0 || n < 0.0 || n > MAX_SAFE_INTEGER {
        return None;
    }
    Some(n as u64)
}

impl From<f64> for HostValue {
    fn from(value: f64) -> Self {
        HostValue::Number(value)
    }
}

impl From<u32> for HostValue {
    fn from(value: u32) -> Self {
        HostValue::Number(f64::from(value))
    }
}

impl From<i32> for HostValue {
    fn from(value: i32) -> Self {
        HostValue::Number(f64::from(value))
    }
}

/// 64ビット値はホストの安全な整数範囲を超えうるため bigint として渡す
impl From<u64> for HostValue {
    fn from(value: u64) -> Self {
        HostValue::BigInt(HostBigInt::from_u64(value))
    }
}

impl From<usize> for HostValue {
    fn from(value: usize) -> Self {
        HostValue::BigInt(HostBigInt::from_u64(value as u64))
    }
}

impl From<bool> for HostValue {
    fn from(value: bool) -> Self {
        HostValue::Boolean(value)
    }
}

impl From<&str> for HostValue {
    fn from(value: &str) -> Self {
        HostValue::String(value.to_string())
    }
}

impl From<String> for HostValue {
    fn from(value: String) -> Self {
        HostValue::String(value)
    }
}
