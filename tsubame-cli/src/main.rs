//! Tsubame CLI - コマンドラインインターフェース
//!
//! 逆アセンブラとシンボル処理をコマンドラインから使うための検査ツール

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use tsubame_core::{Arch, ArchInfo, Disassembler, DisassemblerOptions, OutputBuffer, Settings};
use tsubame_symbols::build_id_index::build_id_of_file;
use tsubame_symbols::{InputLocation, ModuleSymbols, Symbol, SymbolIndex, Type};

/// Tsubame - debugger engine inspection tool
#[derive(Parser)]
#[command(name = "tsubame")]
#[command(version)]
#[command(about = "Inspect binaries with the tsubame disassembler and symbol layer", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: InspectCommand,
}

#[derive(Subcommand)]
enum InspectCommand {
    /// Disassemble raw bytes from a file
    Disasm {
        /// File containing machine code
        file: PathBuf,

        /// Instruction set (x64, arm64)
        #[arg(long)]
        arch: Option<Arch>,

        /// Address of the first byte
        #[arg(long, value_parser = parse_number, default_value = "0")]
        address: u64,

        /// Byte offset into the file
        #[arg(long, value_parser = parse_number, default_value = "0")]
        offset: u64,

        /// Maximum number of instructions (0 = whole file)
        #[arg(long, default_value_t = 0)]
        count: usize,

        /// Prefix each line with its address
        #[arg(long)]
        addresses: bool,

        /// Show the raw instruction bytes
        #[arg(long)]
        bytes: bool,
    },

    /// List ELF symbols, optionally filtered by a pattern
    Symbols {
        /// Path to the binary
        binary: PathBuf,

        /// Substring to match against symbol names
        pattern: Option<String>,
    },

    /// Show the layout of a type from DWARF
    Type {
        /// Path to the binary
        binary: PathBuf,

        /// Type name
        name: String,
    },

    /// Resolve a location (symbol, file:line, address) to addresses
    Lines {
        /// Path to the binary
        binary: PathBuf,

        /// Location to resolve
        location: String,
    },

    /// Print the build ID of each file
    BuildId {
        /// Files to inspect
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = match &cli.config {
        Some(path) => Settings::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => Settings::default(),
    };

    match cli.command {
        InspectCommand::Disasm {
            file,
            arch,
            address,
            offset,
            count,
            addresses,
            bytes,
        } => {
            let mut options = DisassemblerOptions::from(&settings.disassembler);
            options.emit_addresses |= addresses;
            options.emit_bytes |= bytes;
            let arch = arch.unwrap_or(settings.disassembler.arch);
            handle_disasm(&file, arch, address, offset, count, &options)
        }
        InspectCommand::Symbols { binary, pattern } => handle_symbols(&binary, pattern.as_deref()),
        InspectCommand::Type { binary, name } => handle_type(&binary, &name),
        InspectCommand::Lines { binary, location } => handle_lines(&binary, &location),
        InspectCommand::BuildId { files } => handle_build_id(&files),
    }
}

/// `0x` 付きの16進数または10進数を解析する
fn parse_number(s: &str) -> std::result::Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid number `{}`: {}", s, e))
}

/// Disasmコマンドを処理する
fn handle_disasm(
    file: &Path,
    arch: Arch,
    address: u64,
    offset: u64,
    count: usize,
    options: &DisassemblerOptions,
) -> Result<()> {
    let data = std::fs::read(file).with_context(|| format!("Failed to read {}", file.display()))?;
    let start = usize::try_from(offset)?;
    if start > data.len() {
        bail!("Offset 0x{:x} is past the end of {} ({} bytes)", offset, file.display(), data.len());
    }

    let arch_info = ArchInfo::new(arch);
    let disassembler = Disassembler::new(&arch_info)?;
    let mut out = OutputBuffer::new();
    let (consumed, instructions) =
        disassembler.disassemble_many(&data[start..], address, options, count, &mut out);

    print!("{}", out);
    tracing::debug!("Disassembled {} instructions ({} bytes)", instructions, consumed);
    Ok(())
}

/// シンボルリストを表示するヘルパー関数
fn print_symbol_list(title: &str, symbols: &[Symbol]) {
    if symbols.is_empty() {
        println!("No {} found", title);
        return;
    }

    println!("{} ({} found):", title, symbols.len());
    for (i, sym) in symbols.iter().enumerate() {
        if sym.size > 0 {
            println!("  {}. {} @ 0x{:x} (size: {})", i + 1, sym.display_name(), sym.address, sym.size);
        } else {
            println!("  {}. {} @ 0x{:x}", i + 1, sym.display_name(), sym.address);
        }
    }
}

/// Symbolsコマンドを処理する
fn handle_symbols(binary: &Path, pattern: Option<&str>) -> Result<()> {
    let module = ModuleSymbols::load(binary, 0)?;
    match pattern {
        Some(pattern) => {
            let mut symbols = module.symbols().find_symbols(pattern);
            symbols.sort_by_key(|s| s.address);
            print_symbol_list(&format!("Symbols matching '{}'", pattern), &symbols);
        }
        None => {
            let mut symbols: Vec<Symbol> = module.symbols().all_symbols().cloned().collect();
            symbols.sort_by_key(|s| s.address);
            print_symbol_list("Symbols", &symbols);
        }
    }
    Ok(())
}

/// Typeコマンドを処理する
fn handle_type(binary: &Path, name: &str) -> Result<()> {
    let module = ModuleSymbols::load(binary, 0)?;
    let Some(ty) = module.find_type(name)? else {
        bail!("Type '{}' not found in {}", name, binary.display());
    };

    println!("{} (size: {})", ty.name(), ty.byte_size());
    if let Some(collection) = ty.as_collection() {
        if collection.is_declaration {
            println!("  <declaration only>");
        }
        for base in &collection.inherited_from {
            println!("  +{:<4} base {}", base.offset, base.from.name());
        }
        for member in &collection.data_members {
            print_member(&member.name, &member.member_type, member.member_location);
        }
    }
    Ok(())
}

fn print_member(name: &str, ty: &Type, offset: u32) {
    println!("  +{:<4} {}: {} (size: {})", offset, name, ty.name(), ty.byte_size());
}

/// Linesコマンドを処理する
fn handle_lines(binary: &Path, location: &str) -> Result<()> {
    let location = InputLocation::parse(location)?;
    let index = SymbolIndex::new();
    index.add_module(binary, 0)?;

    let addresses = index.resolve_input_location(&location);
    if addresses.is_empty() {
        bail!("No addresses for {}", location);
    }

    println!("{} ({} addresses):", location, addresses.len());
    for address in addresses {
        match index.line_for_address(address) {
            Some(line) => println!("  0x{:x}  {}", address, line),
            None => println!("  0x{:x}", address),
        }
    }
    Ok(())
}

/// BuildIdコマンドを処理する
fn handle_build_id(files: &[PathBuf]) -> Result<()> {
    for file in files {
        match build_id_of_file(file) {
            Ok(Some(id)) => println!("{} {}", id, file.display()),
            Ok(None) => println!("<none> {}", file.display()),
            Err(e) => eprintln!("Error: {}: {}", file.display(), e),
        }
    }
    Ok(())
}
