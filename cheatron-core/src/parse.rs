//! パース関連のユーティリティ関数

use crate::{Error, Result};

/// アドレス文字列をu64にパース
///
/// 16進数（0xプレフィックス付き）または10進数をサポート。
/// プレフィックスのない16進数はエラーになります。
///
/// # Examples
/// ```
/// use cheatron_core::parse::parse_address;
///
/// assert_eq!(parse_address("0x1234").unwrap(), 0x1234);
/// assert_eq!(parse_address("1234").unwrap(), 1234);
/// ```
pub fn parse_address(s: &str) -> Result<u64> {
    let s = s.trim();

    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        // 16進数
        u64::from_str_radix(hex, 16)
            .map_err(|e| Error::invalid_argument(format!("Invalid hexadecimal address '{}': {}", s, e)))
    } else {
        // プレフィックスがなければ10進数のみ
        s.parse::<u64>()
            .map_err(|e| Error::invalid_argument(format!("Invalid address '{}': {}", s, e)))
    }
}

/// 16進数のバイト列をパース
///
/// 空白区切り（"de ad be ef"）と連続表記（"deadbeef"）の両方を受け付けます。
pub fn parse_hex_bytes(s: &str) -> Result<Vec<u8>> {
    let digits: String = s.split_whitespace().collect();
    let digits = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
        .unwrap_or(&digits);

    if digits.is_empty() || !digits.is_ascii() || digits.len() % 2 != 0 {
        return Err(Error::invalid_argument(format!(
            "Invalid hex byte string '{}' (expected an even number of hex digits)",
            s
        )));
    }

    (0..digits.len())
        .step_by(2)
        .map(|i| {
            u8::from_str_radix(&digits[i..i + 2], 16)
                .map_err(|e| Error::invalid_argument(format!("Invalid hex byte '{}': {}", &digits[i..i + 2], e)))
        })
        .collect()
}
