//! 設定
//!
//! TOMLファイルから読み込みます。すべての項目に既定値があり、省略できます。
//!
//! ```toml
//! [session]
//! debug_thread_controllers = true
//!
//! [disassembler]
//! arch = "arm64"
//! emit_bytes = true
//!
//! [symbols]
//! build_id_files = ["out/ids.txt"]
//! symbol_paths = ["out/symbols"]
//! ```

use crate::disasm::Arch;
use crate::Result;
use serde::Deserialize;
use std::fs::read_to_string;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub session: SessionSettings,
    pub disassembler: DisassemblerSettings,
    pub symbols: SymbolSettings,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SessionSettings {
    /// スレッドコントローラの判断をトレースする
    pub debug_thread_controllers: bool,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DisassemblerSettings {
    pub arch: Arch,
    pub emit_addresses: bool,
    pub emit_bytes: bool,
    pub emit_undecodable: bool,
}

impl Default for DisassemblerSettings {
    fn default() -> Self {
        Self {
            arch: Arch::X64,
            emit_addresses: true,
            emit_bytes: false,
            emit_undecodable: true,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct SymbolSettings {
    /// `ids.txt` 形式のビルドID対応表
    pub build_id_files: Vec<PathBuf>,
    /// シンボルファイルまたはそれを含むディレクトリ
    pub symbol_paths: Vec<PathBuf>,
}

impl Settings {
    /// 設定ファイルを読み込む
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let data = read_to_string(path)?;
        Self::from_toml_str(&data)
    }

    pub fn from_toml_str(data: &str) -> Result<Self> {
        Ok(toml::de::from_str(data)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_config_uses_defaults() {
        let settings = Settings::from_toml_str("").unwrap();
        assert_eq!(settings, Settings::default());
        assert!(settings.disassembler.emit_undecodable);
        assert!(!settings.session.debug_thread_controllers);
    }

    #[test]
    fn test_partial_config() {
        let settings = Settings::from_toml_str(
            r#"
            [session]
            debug_thread_controllers = true

            [disassembler]
            arch = "arm64"
            emit_bytes = true

            [symbols]
            build_id_files = ["/out/ids.txt"]
            "#,
        )
        .unwrap();

        assert!(settings.session.debug_thread_controllers);
        assert_eq!(settings.disassembler.arch, Arch::Arm64);
        assert!(settings.disassembler.emit_bytes);
        assert!(settings.disassembler.emit_addresses);
        assert_eq!(settings.symbols.build_id_files, vec![PathBuf::from("/out/ids.txt")]);
        assert!(settings.symbols.symbol_paths.is_empty());
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(
            Settings::from_toml_str("[disassembler]\narch = \"mips\""),
            Err(crate::Error::Config(_))
        ));
        assert!(matches!(
            Settings::from_file("/nonexistent/tsubame.toml"),
            Err(crate::Error::Io(_))
        ));
    }
}
