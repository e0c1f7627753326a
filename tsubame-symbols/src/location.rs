//! 入力ロケーション（シンボル名・`file:line`・アドレス）

use crate::Result;
use std::fmt;

/// ユーザーが指定するコード上の位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputLocation {
    /// 関数などのシンボル名（マングル名・デマングル名のどちらでもよい）
    Symbol(String),
    /// ソースファイルと行番号
    Line { file: String, line: u32 },
    /// 絶対アドレス
    Address(u64),
}

impl InputLocation {
    /// 文字列を解析する
    ///
    /// - `*0x1234` / `0x1234` はアドレス
    /// - `main.rs:42` はファイルと行
    /// - それ以外はシンボル名（`demo::run` のような `::` を含む名前も含む）
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        if input.is_empty() {
            return Err(anyhow::anyhow!("Empty location"));
        }

        if let Some(address) = input.strip_prefix('*') {
            return parse_address(address).map(InputLocation::Address);
        }
        if input.starts_with("0x") || input.starts_with("0X") {
            return parse_address(input).map(InputLocation::Address);
        }

        if let Some((file, line)) = input.rsplit_once(':') {
            // `a::b` の末尾の `:` はシンボル名の一部
            if !file.is_empty() && !file.ends_with(':') {
                if let Ok(line) = line.parse::<u32>() {
                    return Ok(InputLocation::Line {
                        file: file.to_string(),
                        line,
                    });
                }
            }
        }

        Ok(InputLocation::Symbol(input.to_string()))
    }
}

impl fmt::Display for InputLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InputLocation::Symbol(name) => write!(f, "{}", name),
            InputLocation::Line { file, line } => write!(f, "{}:{}", file, line),
            InputLocation::Address(address) => write!(f, "*0x{:x}", address),
        }
    }
}

/// アドレス文字列をu64にパース
///
/// 16進数（0xプレフィックス付き）または10進数をサポート
///
/// # Examples
/// ```
/// use tsubame_symbols::location::parse_address;
///
/// assert_eq!(parse_address("0x1234").unwrap(), 0x1234);
/// assert_eq!(parse_address("1234").unwrap(), 1234);
/// ```
pub fn parse_address(s: &str) -> Result<u64> {
    let s = s.trim();

    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u64::from_str_radix(hex, 16)
            .map_err(|e| anyhow::anyhow!("Invalid hexadecimal address '{}': {}", s, e))
    } else {
        s.parse::<u64>()
            .map_err(|e| anyhow::anyhow!("Invalid address '{}': {}", s, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_address_hex() {
        assert_eq!(parse_address("0x1234").unwrap(), 0x1234);
        assert_eq!(parse_address("0X1234").unwrap(), 0x1234);
        assert_eq!(parse_address("0xABCD").unwrap(), 0xabcd);
    }

    #[test]
    fn test_parse_address_invalid() {
        assert!(parse_address("xyz").is_err());
        assert!(parse_address("0xghij").is_err());
    }

    #[test]
    fn test_parse_locations() {
        assert_eq!(InputLocation::parse("*0x1000").unwrap(), InputLocation::Address(0x1000));
        assert_eq!(InputLocation::parse("*4096").unwrap(), InputLocation::Address(4096));
        assert_eq!(InputLocation::parse("0x20").unwrap(), InputLocation::Address(0x20));
        assert_eq!(
            InputLocation::parse("src/main.rs:42").unwrap(),
            InputLocation::Line {
                file: "src/main.rs".to_string(),
                line: 42
            }
        );
        assert_eq!(
            InputLocation::parse("demo::run").unwrap(),
            InputLocation::Symbol("demo::run".to_string())
        );
        assert_eq!(
            InputLocation::parse("main").unwrap(),
            InputLocation::Symbol("main".to_string())
        );
        assert!(InputLocation::parse("  ").is_err());
    }

    #[test]
    fn test_display_round_trips_through_parse() {
        let location = InputLocation::Line {
            file: "a.rs".to_string(),
            line: 7,
        };
        assert_eq!(location.to_string(), "a.rs:7");
        assert_eq!(InputLocation::Address(0x10).to_string(), "*0x10");
    }
}
