//! Tsubame シンボル情報
//!
//! このクレートは、ELFファイルとDWARFデバッグ情報から型・シンボル・行情報を取り出し、
//! ビルドIDの対応表とあわせて [`SymbolIndex`] として提供します。
//! 型シンボル（[`Type`], [`DataMember`], [`InheritedFrom`]）は不変で、`Rc` で共有されます。

pub mod build_id_index;
pub mod index;
pub mod lines;
pub mod loader;
pub mod location;
pub mod symbols;
pub mod type_info;
pub mod types;

pub use build_id_index::BuildIdIndex;
pub use index::{ModuleSymbols, SymbolIndex};
pub use lines::{LineInfo, LineTable};
pub use loader::DwarfLoader;
pub use location::InputLocation;
pub use symbols::{Symbol, SymbolResolver};
pub use type_info::TypeExtractor;
pub use types::{
    ArrayType, BaseType, BaseTypeEncoding, Collection, CollectionKind, DataMember, InheritedFrom,
    ModifiedType, ModifierTag, Type,
};

/// シンボル処理の結果型
pub type Result<T> = anyhow::Result<T>;
