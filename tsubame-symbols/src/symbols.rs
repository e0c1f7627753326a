//! ELFシンボルテーブルによる名前解決

use crate::{DwarfLoader, Result};
use object::{Object, ObjectSymbol};
use std::collections::HashMap;

/// シンボル情報
#[derive(Debug, Clone)]
pub struct Symbol {
    /// マングルされたシンボル名
    pub name: String,
    /// デマングルされたシンボル名（ハッシュなし）
    pub demangled_name: String,
    pub address: u64,
    pub size: u64,
}

impl Symbol {
    /// シンボルを作成し、デマングルされた名前を設定する
    pub fn new(name: String, address: u64, size: u64) -> Self {
        let demangled_name = demangle_symbol(&name);
        Self {
            name,
            demangled_name,
            address,
            size,
        }
    }

    /// 表示用の名前を取得
    pub fn display_name(&self) -> &str {
        &self.demangled_name
    }
}

/// シンボル名をデマングルする
fn demangle_symbol(name: &str) -> String {
    if let Ok(demangled) = rustc_demangle::try_demangle(name) {
        return format!("{:#}", demangled);
    }
    name.to_string()
}

/// シンボル解決
pub struct SymbolResolver {
    /// マングル名 -> シンボル
    symbols_by_name: HashMap<String, Symbol>,
    /// デマングル名 -> マングル名
    demangled_to_name: HashMap<String, String>,
    /// アドレス順のシンボル
    symbols_by_address: Vec<Symbol>,
}

impl SymbolResolver {
    /// DWARFローダーからシンボル解決を作成する
    pub fn new(loader: &DwarfLoader) -> Result<Self> {
        let symbols = loader
            .object_file()
            .symbols()
            .filter_map(|symbol| {
                let name = symbol.name().ok()?;
                if name.is_empty() {
                    return None;
                }
                Some(Symbol::new(name.to_string(), symbol.address(), symbol.size()))
            })
            .collect();
        Ok(Self::from_symbols(symbols))
    }

    /// シンボル列から直接作成する
    pub fn from_symbols(symbols: Vec<Symbol>) -> Self {
        let mut symbols_by_name = HashMap::new();
        let mut demangled_to_name = HashMap::new();
        let mut symbols_by_address = Vec::with_capacity(symbols.len());

        for sym in symbols {
            if sym.demangled_name != sym.name {
                demangled_to_name
                    .entry(sym.demangled_name.clone())
                    .or_insert_with(|| sym.name.clone());
            }
            symbols_by_name.insert(sym.name.clone(), sym.clone());
            symbols_by_address.push(sym);
        }
        symbols_by_address.sort_by_key(|s| s.address);

        Self {
            symbols_by_name,
            demangled_to_name,
            symbols_by_address,
        }
    }

    /// シンボル名（マングル名またはデマングル名）からアドレスを解決する
    pub fn resolve(&self, symbol: &str) -> Option<u64> {
        if let Some(sym) = self.symbols_by_name.get(symbol) {
            return Some(sym.address);
        }
        let mangled = self.demangled_to_name.get(symbol)?;
        self.symbols_by_name.get(mangled).map(|s| s.address)
    }

    /// アドレスからシンボルを解決する（最も近い手前のシンボル）
    pub fn reverse_resolve(&self, addr: u64) -> Option<Symbol> {
        match self.symbols_by_address.binary_search_by_key(&addr, |s| s.address) {
            Ok(idx) => Some(self.symbols_by_address[idx].clone()),
            Err(0) => None,
            Err(idx) => {
                let sym = &self.symbols_by_address[idx - 1];
                if sym.size == 0 || addr < sym.address + sym.size {
                    Some(sym.clone())
                } else {
                    None
                }
            }
        }
    }

    /// すべてのシンボルを取得する
    pub fn all_symbols(&self) -> impl Iterator<Item = &Symbol> {
        self.symbols_by_address.iter()
    }

    /// パターンにマッチするシンボルを検索する（マングル名・デマングル名の両方）
    pub fn find_symbols(&self, pattern: &str) -> Vec<Symbol> {
        self.symbols_by_address
            .iter()
            .filter(|s| s.name.contains(pattern) || s.demangled_name.contains(pattern))
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolver() -> SymbolResolver {
        SymbolResolver::from_symbols(vec![
            Symbol::new("main".to_string(), 0x2000, 0x40),
            Symbol::new("helper".to_string(), 0x1000, 0x10),
            Symbol::new("_ZN4demo3run17h0123456789abcdefE".to_string(), 0x3000, 0),
        ])
    }

    #[test]
    fn test_resolve_by_name() {
        let resolver = resolver();
        assert_eq!(resolver.resolve("main"), Some(0x2000));
        assert_eq!(resolver.resolve("missing"), None);
    }

    #[test]
    fn test_resolve_by_demangled_name() {
        let resolver = resolver();
        assert_eq!(resolver.resolve("demo::run"), Some(0x3000));
    }

    #[test]
    fn test_reverse_resolve() {
        let resolver = resolver();
        assert_eq!(resolver.reverse_resolve(0x2010).unwrap().name, "main");
        assert!(resolver.reverse_resolve(0x1010).is_none());
        assert!(resolver.reverse_resolve(0x10).is_none());
        // サイズ不明のシンボルは直後のアドレスも含む
        assert_eq!(resolver.reverse_resolve(0x3100).unwrap().address, 0x3000);
    }
}
