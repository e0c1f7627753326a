//! DWARF型情報の抽出
//!
//! DWARF DIEから型シンボル（構造体メンバ、基底クラス、ポインタ等）を構築します。

use crate::loader::DwarfReader;
use crate::types::{
    ArrayType, BaseType, BaseTypeEncoding, Collection, CollectionKind, DataMember,
    InheritedFrom, ModifiedType, ModifierTag, Type,
};
use crate::Result;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;

type Unit = gimli::Unit<DwarfReader>;
type Entry<'abbrev, 'unit> = gimli::DebuggingInformationEntry<'abbrev, 'unit, DwarfReader>;

/// DIEの識別子（ユニット位置 + ユニット内オフセット）
type DieKey = (usize, usize);

/// 型情報抽出器
///
/// 抽出済みの型はDIE単位でキャッシュされ、同じDIEからは同じ `Rc<Type>` が返ります。
/// 自己参照する型（連結リストなど）は、構築中の型に再び出会った時点で前方宣言として扱います。
#[derive(Default)]
pub struct TypeExtractor {
    cache: RefCell<HashMap<DieKey, Rc<Type>>>,
    in_progress: RefCell<HashSet<DieKey>>,
}

impl TypeExtractor {
    pub fn new() -> Self {
        Self::default()
    }

    /// 名前で集合型・基本型を探して抽出する（前方宣言は除く）
    pub fn find_type_by_name(
        &self,
        dwarf: &gimli::Dwarf<DwarfReader>,
        name: &str,
    ) -> Result<Option<Rc<Type>>> {
        let mut units = dwarf.units();
        while let Some(header) = units.next()? {
            let unit = dwarf.unit(header)?;
            let mut entries = unit.entries();
            while let Some((_, entry)) = entries.next_dfs()? {
                if !matches!(
                    entry.tag(),
                    gimli::DW_TAG_structure_type
                        | gimli::DW_TAG_class_type
                        | gimli::DW_TAG_union_type
                        | gimli::DW_TAG_base_type
                ) {
                    continue;
                }
                if is_declaration(entry) {
                    continue;
                }
                if get_name(dwarf, &unit, entry).as_deref() == Some(name) {
                    let offset = entry.offset();
                    return self.extract_type_info(dwarf, &unit, offset).map(Some);
                }
            }
        }
        Ok(None)
    }

    /// 型DIEから型情報を抽出する
    pub fn extract_type_info(
        &self,
        dwarf: &gimli::Dwarf<DwarfReader>,
        unit: &Unit,
        type_offset: gimli::UnitOffset,
    ) -> Result<Rc<Type>> {
        let key = die_key(unit, type_offset);
        if let Some(cached) = self.cache.borrow().get(&key) {
            return Ok(cached.clone());
        }

        let mut entries = unit.entries_at_offset(type_offset)?;
        let Some((_, entry)) = entries.next_dfs()? else {
            return Err(anyhow::anyhow!("type DIE not found at {:?}", type_offset));
        };

        if self.in_progress.borrow().contains(&key) {
            // 構築中の型への再帰参照は前方宣言で断ち切る
            let name = get_name(dwarf, unit, entry).unwrap_or_else(|| "<anonymous>".to_string());
            return Ok(Rc::new(Type::Collection(Collection::declaration(
                collection_kind(entry.tag()),
                name,
            ))));
        }

        self.in_progress.borrow_mut().insert(key);
        let result = self.extract_from_entry(dwarf, unit, entry);
        self.in_progress.borrow_mut().remove(&key);

        let ty = result?;
        self.cache.borrow_mut().insert(key, ty.clone());
        Ok(ty)
    }

    /// DIEエントリから型情報を抽出する
    fn extract_from_entry(
        &self,
        dwarf: &gimli::Dwarf<DwarfReader>,
        unit: &Unit,
        entry: &Entry,
    ) -> Result<Rc<Type>> {
        match entry.tag() {
            gimli::DW_TAG_base_type => Ok(self.extract_base_type(dwarf, unit, entry)),
            gimli::DW_TAG_pointer_type => {
                self.extract_modified_type(dwarf, unit, entry, ModifierTag::Pointer)
            }
            gimli::DW_TAG_reference_type | gimli::DW_TAG_rvalue_reference_type => {
                self.extract_modified_type(dwarf, unit, entry, ModifierTag::Reference)
            }
            gimli::DW_TAG_const_type => {
                self.extract_modified_type(dwarf, unit, entry, ModifierTag::Const)
            }
            gimli::DW_TAG_volatile_type => {
                self.extract_modified_type(dwarf, unit, entry, ModifierTag::Volatile)
            }
            gimli::DW_TAG_typedef => {
                self.extract_modified_type(dwarf, unit, entry, ModifierTag::Typedef)
            }
            gimli::DW_TAG_array_type => self.extract_array_type(dwarf, unit, entry),
            gimli::DW_TAG_structure_type
            | gimli::DW_TAG_class_type
            | gimli::DW_TAG_union_type => self.extract_collection(dwarf, unit, entry),
            tag => {
                // 未対応の型はサイズのみ持つ基本型として扱う
                tracing::debug!("unsupported type tag {:?}, treating as opaque", tag);
                let name = get_name(dwarf, unit, entry).unwrap_or_else(|| "<unknown>".to_string());
                Ok(Type::base(name, get_byte_size(entry).unwrap_or(0) as u32, BaseTypeEncoding::Other))
            }
        }
    }

    /// 基本型を抽出する
    fn extract_base_type(
        &self,
        dwarf: &gimli::Dwarf<DwarfReader>,
        unit: &Unit,
        entry: &Entry,
    ) -> Rc<Type> {
        let encoding = match entry.attr_value(gimli::DW_AT_encoding).ok().flatten() {
            Some(gimli::AttributeValue::Encoding(encoding)) => match encoding {
                gimli::DW_ATE_signed => BaseTypeEncoding::Signed,
                gimli::DW_ATE_unsigned => BaseTypeEncoding::Unsigned,
                gimli::DW_ATE_float => BaseTypeEncoding::Float,
                gimli::DW_ATE_boolean => BaseTypeEncoding::Boolean,
                gimli::DW_ATE_signed_char => BaseTypeEncoding::SignedChar,
                gimli::DW_ATE_unsigned_char | gimli::DW_ATE_UTF => BaseTypeEncoding::UnsignedChar,
                _ => BaseTypeEncoding::Other,
            },
            _ => BaseTypeEncoding::Other,
        };

        Rc::new(Type::Base(BaseType {
            name: get_name(dwarf, unit, entry).unwrap_or_else(|| "<unknown>".to_string()),
            byte_size: get_byte_size(entry).unwrap_or(0) as u32,
            encoding,
        }))
    }

    /// ポインタ・参照・const・typedef を抽出する
    fn extract_modified_type(
        &self,
        dwarf: &gimli::Dwarf<DwarfReader>,
        unit: &Unit,
        entry: &Entry,
        tag: ModifierTag,
    ) -> Result<Rc<Type>> {
        let modified = match get_type(entry) {
            Some(offset) => Some(self.extract_type_info(dwarf, unit, offset)?),
            None => None,
        };
        let default_size = match tag {
            ModifierTag::Pointer | ModifierTag::Reference => {
                u64::from(unit.header.address_size())
            }
            _ => 0,
        };

        Ok(Rc::new(Type::Modified(ModifiedType {
            tag,
            name: get_name(dwarf, unit, entry),
            modified,
            byte_size: get_byte_size(entry).unwrap_or(default_size) as u32,
        })))
    }

    /// 配列型を抽出する
    fn extract_array_type(
        &self,
        dwarf: &gimli::Dwarf<DwarfReader>,
        unit: &Unit,
        entry: &Entry,
    ) -> Result<Rc<Type>> {
        let element_type = match get_type(entry) {
            Some(offset) => self.extract_type_info(dwarf, unit, offset)?,
            None => return Err(anyhow::anyhow!("array type without element type")),
        };

        // 要素数は最初の DW_TAG_subrange_type の count または upper_bound から得る
        let mut count = None;
        let mut tree = unit.entries_tree(Some(entry.offset()))?;
        let root = tree.root()?;
        let mut children = root.children();
        while let Some(child) = children.next()? {
            let child = child.entry();
            if child.tag() != gimli::DW_TAG_subrange_type {
                continue;
            }
            count = udata_attr(child, gimli::DW_AT_count)
                .or_else(|| udata_attr(child, gimli::DW_AT_upper_bound).map(|ub| ub + 1));
            break;
        }

        Ok(Rc::new(Type::Array(ArrayType {
            element_type,
            count,
        })))
    }

    /// 構造体・クラス・共用体を抽出する
    fn extract_collection(
        &self,
        dwarf: &gimli::Dwarf<DwarfReader>,
        unit: &Unit,
        entry: &Entry,
    ) -> Result<Rc<Type>> {
        let kind = collection_kind(entry.tag());
        let name = get_name(dwarf, unit, entry).unwrap_or_else(|| "<anonymous>".to_string());
        if is_declaration(entry) {
            return Ok(Rc::new(Type::Collection(Collection::declaration(kind, name))));
        }

        let mut collection = Collection::new(kind, name, get_byte_size(entry).unwrap_or(0) as u32);

        let mut tree = unit.entries_tree(Some(entry.offset()))?;
        let root = tree.root()?;
        let mut children = root.children();
        while let Some(child) = children.next()? {
            let child = child.entry();
            match child.tag() {
                gimli::DW_TAG_member => {
                    // 静的メンバ（宣言のみ）は値の一部ではない
                    if is_declaration(child) {
                        continue;
                    }
                    let Some(type_offset) = get_type(child) else {
                        continue;
                    };
                    let member_type = self.extract_type_info(dwarf, unit, type_offset)?;
                    let member_name = get_name(dwarf, unit, child).unwrap_or_default();
                    let location =
                        udata_attr(child, gimli::DW_AT_data_member_location).unwrap_or(0);
                    collection = collection.with_member(DataMember::new(
                        member_name,
                        member_type,
                        location as u32,
                    ));
                }
                gimli::DW_TAG_inheritance => {
                    let Some(type_offset) = get_type(child) else {
                        continue;
                    };
                    let from = self.extract_type_info(dwarf, unit, type_offset)?;
                    let offset = udata_attr(child, gimli::DW_AT_data_member_location).unwrap_or(0);
                    collection = collection.with_base(InheritedFrom::new(from, offset));
                }
                _ => {}
            }
        }

        Ok(Rc::new(Type::Collection(collection)))
    }
}

fn die_key(unit: &Unit, offset: gimli::UnitOffset) -> DieKey {
    let unit_offset = match unit.header.offset() {
        gimli::UnitSectionOffset::DebugInfoOffset(o) => o.0,
        gimli::UnitSectionOffset::DebugTypesOffset(o) => o.0,
    };
    (unit_offset, offset.0)
}

fn collection_kind(tag: gimli::DwTag) -> CollectionKind {
    match tag {
        gimli::DW_TAG_class_type => CollectionKind::Class,
        gimli::DW_TAG_union_type => CollectionKind::Union,
        _ => CollectionKind::Struct,
    }
}

/// 名前を取得する（.debug_str 参照も解決する）
fn get_name(dwarf: &gimli::Dwarf<DwarfReader>, unit: &Unit, entry: &Entry) -> Option<String> {
    let attr = entry.attr_value(gimli::DW_AT_name).ok()??;
    let name = dwarf.attr_string(unit, attr).ok()?;
    Some(name.to_string_lossy().into_owned())
}

/// バイトサイズを取得する
fn get_byte_size(entry: &Entry) -> Option<u64> {
    udata_attr(entry, gimli::DW_AT_byte_size)
}

/// 定数形式の属性値を取得する（data1/2/4/8, udata のいずれも受け付ける）
fn udata_attr(entry: &Entry, name: gimli::DwAt) -> Option<u64> {
    entry.attr(name).ok()??.udata_value()
}

/// 型参照を取得する
fn get_type(entry: &Entry) -> Option<gimli::UnitOffset> {
    match entry.attr_value(gimli::DW_AT_type).ok()?? {
        gimli::AttributeValue::UnitRef(offset) => Some(offset),
        _ => None,
    }
}

fn is_declaration(entry: &Entry) -> bool {
    matches!(
        entry.attr_value(gimli::DW_AT_declaration).ok().flatten(),
        Some(gimli::AttributeValue::Flag(true))
    )
}
