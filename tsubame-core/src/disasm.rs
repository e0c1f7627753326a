//! 逆アセンブル機能
//!
//! バイト列、または未マッピングの穴を含むメモリダンプを逆アセンブルします。
//! デコードできない命令は設定に応じて `data` 行として出力し、1デコード単位だけ進めます。

use crate::Result;
use capstone::prelude::*;
use serde::Deserialize;
use std::fmt::Write as _;
use tsubame_ipc::MemoryDump;

/// 命令セット
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Arch {
    X64,
    Arm64,
}

impl std::str::FromStr for Arch {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "x64" | "x86_64" | "x86-64" => Ok(Arch::X64),
            "arm64" | "aarch64" => Ok(Arch::Arm64),
            _ => Err(format!("unknown architecture `{}`", s)),
        }
    }
}

/// アーキテクチャ情報
///
/// 逆アセンブラはこれを借用するため、逆アセンブラより長く生存する必要があります。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchInfo {
    arch: Arch,
}

impl ArchInfo {
    pub fn new(arch: Arch) -> Self {
        Self { arch }
    }

    pub fn arch(&self) -> Arch {
        self.arch
    }

    /// 命令の最小単位（デコードできない場合に進めるバイト数）
    pub fn instr_align(&self) -> usize {
        match self.arch {
            Arch::X64 => 1,
            Arch::Arm64 => 4,
        }
    }
}

/// 出力オプション
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    /// 各行の先頭にアドレスを付ける
    pub emit_addresses: bool,
    /// 命令の生バイトを出力する
    pub emit_bytes: bool,
    /// デコードできない命令を `data` として出力する
    pub emit_undecodable: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            emit_addresses: false,
            emit_bytes: false,
            emit_undecodable: true,
        }
    }
}

impl From<&crate::settings::DisassemblerSettings> for Options {
    fn from(settings: &crate::settings::DisassemblerSettings) -> Self {
        Self {
            emit_addresses: settings.emit_addresses,
            emit_bytes: settings.emit_bytes,
            emit_undecodable: settings.emit_undecodable,
        }
    }
}

/// 逆アセンブル結果の出力先
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OutputBuffer {
    lines: Vec<String>,
}

impl OutputBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, line: String) {
        self.lines.push(line);
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }
}

impl std::fmt::Display for OutputBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for line in &self.lines {
            writeln!(f, "{}", line)?;
        }
        Ok(())
    }
}

/// 逆アセンブラ
pub struct Disassembler<'a> {
    arch: &'a ArchInfo,
    cs: Capstone,
}

impl<'a> Disassembler<'a> {
    /// アーキテクチャに対応するデコーダを作成する
    pub fn new(arch_info: &'a ArchInfo) -> Result<Self> {
        let cs = match arch_info.arch() {
            Arch::X64 => Capstone::new()
                .x86()
                .mode(arch::x86::ArchMode::Mode64)
                .syntax(arch::x86::ArchSyntax::Intel)
                .build()?,
            Arch::Arm64 => Capstone::new()
                .arm64()
                .mode(arch::arm64::ArchMode::Arm)
                .build()?,
        };
        Ok(Self {
            arch: arch_info,
            cs,
        })
    }

    pub fn arch(&self) -> &ArchInfo {
        self.arch
    }

    /// 1命令を逆アセンブルして出力し、消費したバイト数を返す
    ///
    /// デコードできず `emit_undecodable` が無効な場合は何も出力せず 0 を返します。
    pub fn disassemble_one(
        &self,
        data: &[u8],
        address: u64,
        options: &Options,
        out: &mut OutputBuffer,
    ) -> usize {
        if data.is_empty() {
            return 0;
        }

        let insns = self.cs.disasm_count(data, address, 1);
        if let Ok(insns) = &insns {
            if let Some(insn) = insns.iter().next() {
                let text = match (insn.mnemonic(), insn.op_str()) {
                    (Some(mnemonic), Some(op)) if !op.is_empty() => format!("{} {}", mnemonic, op),
                    (Some(mnemonic), _) => mnemonic.to_string(),
                    (None, _) => "??".to_string(),
                };
                out.append(render_line(address, insn.bytes(), &text, options));
                return insn.len();
            }
        }

        if !options.emit_undecodable {
            return 0;
        }
        let consumed = self.arch.instr_align().min(data.len());
        let bytes = &data[..consumed];
        let text = format!(
            "data {}",
            bytes
                .iter()
                .map(|b| format!("0x{:02x}", b))
                .collect::<Vec<_>>()
                .join(", ")
        );
        out.append(render_line(address, bytes, &text, options));
        consumed
    }

    /// バッファを連続して逆アセンブルする
    ///
    /// `max_instructions` が 0 なら無制限。デコードできない命令は常に `data` として消費します。
    /// 戻り値は（消費したバイト数, 命令数）。
    pub fn disassemble_many(
        &self,
        data: &[u8],
        start_address: u64,
        options: &Options,
        max_instructions: usize,
        out: &mut OutputBuffer,
    ) -> (usize, usize) {
        let options = Options {
            emit_undecodable: true,
            ..options.clone()
        };

        let mut consumed = 0;
        let mut count = 0;
        while consumed < data.len() && (max_instructions == 0 || count < max_instructions) {
            let used = self.disassemble_one(
                &data[consumed..],
                start_address.wrapping_add(consumed as u64),
                &options,
                out,
            );
            if used == 0 {
                break;
            }
            consumed += used;
            count += 1;
        }
        (consumed, count)
    }

    /// メモリダンプを逆アセンブルする
    ///
    /// 未マッピングの領域は1命令として数え、アドレスを常に出力します。
    pub fn disassemble_dump(
        &self,
        dump: &MemoryDump,
        options: &Options,
        max_instructions: usize,
        out: &mut OutputBuffer,
    ) -> (usize, usize) {
        let mut consumed = 0;
        let mut count = 0;

        for block in dump.blocks() {
            if max_instructions != 0 && count >= max_instructions {
                break;
            }

            if !block.valid {
                out.append(format!(
                    "{}  ?? (unmapped, {} bytes)",
                    format_address(block.address),
                    block.size
                ));
                consumed += block.size as usize;
                count += 1;
                continue;
            }

            let remaining = if max_instructions == 0 {
                0
            } else {
                max_instructions - count
            };
            let (block_consumed, block_count) =
                self.disassemble_many(&block.data, block.address, options, remaining, out);
            consumed += block_consumed;
            count += block_count;
        }

        (consumed, count)
    }
}

fn format_address(address: u64) -> String {
    format!("0x{:016x}", address)
}

fn render_line(address: u64, bytes: &[u8], text: &str, options: &Options) -> String {
    let mut line = String::new();
    if options.emit_addresses {
        let _ = write!(line, "{}  ", format_address(address));
    }
    if options.emit_bytes {
        let hex = bytes
            .iter()
            .map(|b| format!("{:02x}", b))
            .collect::<Vec<_>>()
            .join(" ");
        // x64 の典型的な命令長まで揃える
        let _ = write!(line, "{:<24}  ", hex);
    }
    line.push_str(text);
    line
}
