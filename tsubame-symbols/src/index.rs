//! シンボルインデックス
//!
//! 読み込んだモジュール（ELF + DWARF）と手動登録されたシンボル・型をまとめ、
//! ロケーション解決と型検索の窓口になります。セッションが1つ所有し、
//! ブレークポイントや式評価コンテキストからは `Rc` で共有されます。

use crate::build_id_index::BuildIdIndex;
use crate::lines::LineInfo;
use crate::location::InputLocation;
use crate::type_info::TypeExtractor;
use crate::types::Type;
use crate::{DwarfLoader, LineTable, Result, SymbolResolver};
use std::cell::{RefCell, RefMut};
use std::collections::HashMap;
use std::ops::Range;
use std::path::Path;
use std::rc::Rc;

/// 読み込み済みモジュール
pub struct ModuleSymbols {
    loader: DwarfLoader,
    symbols: SymbolResolver,
    lines: LineTable,
    types: TypeExtractor,
    /// モジュールのロードアドレス（非PIEなら0）
    load_address: u64,
}

impl ModuleSymbols {
    /// ファイルを読み込んでモジュールを作る
    pub fn load<P: AsRef<Path>>(path: P, load_address: u64) -> Result<Self> {
        let loader = DwarfLoader::load(path)?;
        let symbols = SymbolResolver::new(&loader)?;
        let lines = LineTable::new(&loader)?;
        let load_address = if loader.is_pie() { load_address } else { 0 };
        Ok(Self {
            loader,
            symbols,
            lines,
            types: TypeExtractor::new(),
            load_address,
        })
    }

    pub fn path(&self) -> &Path {
        self.loader.path()
    }

    pub fn build_id(&self) -> Option<String> {
        self.loader.build_id()
    }

    pub fn load_address(&self) -> u64 {
        self.load_address
    }

    pub fn symbols(&self) -> &SymbolResolver {
        &self.symbols
    }

    pub fn lines(&self) -> &LineTable {
        &self.lines
    }

    /// 名前で型を探す
    pub fn find_type(&self, name: &str) -> Result<Option<Rc<Type>>> {
        self.types.find_type_by_name(self.loader.dwarf(), name)
    }

    fn to_file_address(&self, address: u64) -> Option<u64> {
        address.checked_sub(self.load_address)
    }
}

/// シンボルインデックス
#[derive(Default)]
pub struct SymbolIndex {
    modules: RefCell<Vec<Rc<ModuleSymbols>>>,
    /// 手動登録された型（名前 -> 型）
    registered_types: RefCell<HashMap<String, Rc<Type>>>,
    /// 手動登録されたシンボル（名前 -> アドレス）
    registered_symbols: RefCell<HashMap<String, u64>>,
    /// モジュールから見つかった型のキャッシュ
    type_cache: RefCell<HashMap<String, Rc<Type>>>,
    build_id_index: RefCell<BuildIdIndex>,
}

impl SymbolIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// モジュールを読み込んで追加する
    pub fn add_module<P: AsRef<Path>>(&self, path: P, load_address: u64) -> Result<Rc<ModuleSymbols>> {
        let module = Rc::new(ModuleSymbols::load(path, load_address)?);
        tracing::debug!(
            "Loaded symbols for {:?} (build ID {:?}) at 0x{:x}",
            module.path(),
            module.build_id(),
            module.load_address()
        );
        self.modules.borrow_mut().push(module.clone());
        self.type_cache.borrow_mut().clear();
        Ok(module)
    }

    /// ビルドIDからファイルを探してモジュールを追加する
    ///
    /// 対応表に見つからなければ `Ok(None)` を返します。
    pub fn add_module_for_build_id(
        &self,
        build_id: &str,
        load_address: u64,
    ) -> Result<Option<Rc<ModuleSymbols>>> {
        let path = self.build_id_index.borrow_mut().file_for_build_id(build_id);
        match path {
            Some(path) => self.add_module(path, load_address).map(Some),
            None => Ok(None),
        }
    }

    pub fn modules(&self) -> Vec<Rc<ModuleSymbols>> {
        self.modules.borrow().clone()
    }

    /// 型を名前で登録する。同名の型は置き換えられる
    pub fn register_type(&self, ty: Rc<Type>) {
        self.registered_types.borrow_mut().insert(ty.name(), ty);
    }

    /// シンボルを登録する
    pub fn register_symbol(&self, name: impl Into<String>, address: u64) {
        self.registered_symbols.borrow_mut().insert(name.into(), address);
    }

    /// 名前で型を探す（登録済みの型、モジュールの順）
    pub fn find_type(&self, name: &str) -> Option<Rc<Type>> {
        if let Some(ty) = self.registered_types.borrow().get(name) {
            return Some(ty.clone());
        }
        if let Some(ty) = self.type_cache.borrow().get(name) {
            return Some(ty.clone());
        }

        for module in self.modules.borrow().iter() {
            match module.find_type(name) {
                Ok(Some(ty)) => {
                    self.type_cache
                        .borrow_mut()
                        .insert(name.to_string(), ty.clone());
                    return Some(ty);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!("Type lookup for {} failed in {:?}: {}", name, module.path(), e)
                }
            }
        }
        None
    }

    /// 入力ロケーションをアドレスに解決する。解決できなければ空
    pub fn resolve_input_location(&self, location: &InputLocation) -> Vec<u64> {
        let mut addresses = match location {
            InputLocation::Address(address) => vec![*address],
            InputLocation::Symbol(name) => {
                let mut found: Vec<u64> = self
                    .registered_symbols
                    .borrow()
                    .get(name)
                    .copied()
                    .into_iter()
                    .collect();
                for module in self.modules.borrow().iter() {
                    if let Some(address) = module.symbols().resolve(name) {
                        found.push(address + module.load_address());
                    }
                }
                found
            }
            InputLocation::Line { file, line } => self
                .modules
                .borrow()
                .iter()
                .flat_map(|module| {
                    module
                        .lines()
                        .addresses_for_line(file, *line)
                        .into_iter()
                        .map(|address| address + module.load_address())
                        .collect::<Vec<_>>()
                })
                .collect(),
        };
        addresses.sort_unstable();
        addresses.dedup();
        addresses
    }

    /// アドレスを含むソース行のアドレス範囲
    pub fn line_range_for_address(&self, address: u64) -> Option<Range<u64>> {
        self.modules.borrow().iter().find_map(|module| {
            let file_address = module.to_file_address(address)?;
            let range = module.lines().line_range_for_address(file_address)?;
            Some(range.start + module.load_address()..range.end + module.load_address())
        })
    }

    /// アドレスからソース行を引く
    pub fn line_for_address(&self, address: u64) -> Option<LineInfo> {
        self.modules.borrow().iter().find_map(|module| {
            let file_address = module.to_file_address(address)?;
            module.lines().lookup(file_address).ok().flatten()
        })
    }

    /// ビルドID対応表
    pub fn build_id_index(&self) -> RefMut<'_, BuildIdIndex> {
        self.build_id_index.borrow_mut()
    }
}
