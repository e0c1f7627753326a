//! 構造体・クラス・共用体のメンバ解決

use super::eval_context::{ExprEvalContext, ValueCallback};
use super::value::ExprValue;
use crate::{Error, Result};
use std::rc::Rc;
use tsubame_symbols::types::{pointed_to_type, strip_cvt};
use tsubame_symbols::{Collection, DataMember, InheritedFrom, Type};

/// 値の型を集合型として取り出す
fn collection_type(value: &ExprValue) -> Result<Rc<Type>> {
    let ty = value
        .ty()
        .ok_or_else(|| Error::NotACollection(value.type_name()))?;
    let concrete = strip_cvt(ty);
    match concrete.as_collection() {
        Some(collection) if collection.is_declaration => {
            Err(Error::IncompleteType(collection.name.clone()))
        }
        Some(_) => Ok(concrete),
        None => Err(Error::NotACollection(ty.name())),
    }
}

/// `offset` から `ty` の大きさだけ切り出す
fn extract(value: &ExprValue, offset: u64, ty: &Rc<Type>) -> Result<ExprValue> {
    let size = ty.byte_size();
    let actual = value.data().len() as u64;
    let end = offset
        .checked_add(u64::from(size))
        .filter(|end| *end <= actual)
        .ok_or(Error::ValueTooSmall {
            needed: offset.saturating_add(u64::from(size)),
            actual,
        })?;
    let data = value.data()[offset as usize..end as usize].to_vec();
    Ok(match value.source_address() {
        Some(address) => ExprValue::with_source(ty.clone(), data, member_address(address, offset, size)?),
        None => ExprValue::new(ty.clone(), data),
    })
}

/// `base + offset` から `size` バイトの範囲がアドレス空間に収まるか確かめる
fn member_address(base: u64, offset: u64, size: u32) -> Result<u64> {
    base.checked_add(offset)
        .filter(|address| address.checked_add(u64::from(size)).is_some())
        .ok_or(Error::MemoryRead {
            address: base,
            size,
        })
}

/// 名前でメンバを探す（自身、次に基底クラスを深さ優先で）
///
/// 集合型の先頭からメンバまでのオフセットとメンバを返します。
fn find_member(collection: &Collection, name: &str) -> Option<(u64, Rc<DataMember>)> {
    if let Some(member) = collection.find_own_member(name) {
        return Some((u64::from(member.member_location), member.clone()));
    }
    collection.inherited_from.iter().find_map(|base| {
        let base_type = strip_cvt(&base.from);
        let (offset, member) = find_member(base_type.as_collection()?, name)?;
        Some((base.offset + offset, member))
    })
}

/// 集合型の値から、その型自身が持つメンバを取り出す
///
/// `member` が `None` の場合はエラーになります。
pub fn resolve_member(value: &ExprValue, member: Option<&DataMember>) -> Result<ExprValue> {
    let member = member.ok_or(Error::NullMember)?;
    collection_type(value)?;
    extract(value, u64::from(member.member_location), &member.member_type)
}

/// 名前でメンバを取り出す。基底クラスのメンバも探す
pub fn resolve_member_by_name(value: &ExprValue, name: &str) -> Result<ExprValue> {
    let ty = collection_type(value)?;
    let (offset, member) = ty
        .as_collection()
        .and_then(|c| find_member(c, name))
        .ok_or_else(|| Error::MemberNotFound(name.to_string()))?;
    extract(value, offset, &member.member_type)
}

/// 派生クラスの値から直接の基底クラス部分を取り出す
///
/// `from` は値の型の `inherited_from` に含まれるものでなければなりません（同一性で比較）。
pub fn resolve_inherited(value: &ExprValue, from: &InheritedFrom) -> Result<ExprValue> {
    let ty = collection_type(value)?;
    let is_direct = ty
        .as_collection()
        .is_some_and(|c| c.inherited_from.iter().any(|b| std::ptr::eq(b.as_ref(), from)));
    if !is_direct {
        return Err(Error::NotDirectBase {
            derived: ty.name(),
            base: from.from.name(),
        });
    }
    extract(value, from.offset, &from.from)
}

/// ポインタが指す集合型（前方宣言ならシンボルから補完する）
fn pointee_collection(context: &ExprEvalContext, base_ptr: &ExprValue) -> Result<Rc<Type>> {
    let ptr_type = base_ptr
        .ty()
        .ok_or_else(|| Error::NotAPointer(base_ptr.type_name()))?;
    let pointee = pointed_to_type(ptr_type)
        .ok_or_else(|| Error::NotAPointer(ptr_type.name()))?
        .ok_or_else(|| Error::NotACollection("void".to_string()))?;

    let concrete = strip_cvt(&pointee);
    match concrete.as_collection() {
        Some(collection) if collection.is_declaration => context
            .symbols()
            .find_type(&collection.name)
            .filter(|t| t.as_collection().is_some_and(|c| !c.is_declaration))
            .ok_or_else(|| Error::IncompleteType(collection.name.clone())),
        Some(_) => Ok(concrete),
        None => Err(Error::NotACollection(pointee.name())),
    }
}

/// `address` から `ty` の大きさだけ読んで値にする
fn fetch(context: &Rc<ExprEvalContext>, address: u64, ty: Rc<Type>, cb: ValueCallback) {
    let size = ty.byte_size();
    let weak = Rc::downgrade(context);
    context.data_provider().get_memory_async(
        address,
        size,
        Box::new(move |result| {
            // 読み出し中にコンテキストが破棄されたら何もしない
            if weak.upgrade().is_none() {
                return;
            }
            let dump = match result {
                Ok(dump) => dump,
                Err(e) => return cb(Err(e)),
            };
            match dump.to_bytes() {
                Some(data) if data.len() as u64 == u64::from(size) => {
                    cb(Ok(ExprValue::with_source(ty, data, address)))
                }
                _ => cb(Err(Error::MemoryRead { address, size })),
            }
        }),
    );
}

/// 集合型へのポインタから、その型自身が持つメンバを読む
///
/// メンバの大きさだけを1回読み出します。入力の誤りは `cb` にその場で通知されます。
pub fn resolve_member_by_pointer(
    context: &Rc<ExprEvalContext>,
    base_ptr: &ExprValue,
    member: Option<&DataMember>,
    cb: ValueCallback,
) {
    let target = member.ok_or(Error::NullMember).and_then(|member| {
        pointee_collection(context, base_ptr)?;
        let address = member_address(
            base_ptr.promote_to_u64()?,
            u64::from(member.member_location),
            member.member_type.byte_size(),
        )?;
        Ok((address, member.member_type.clone()))
    });
    match target {
        Ok((address, ty)) => fetch(context, address, ty, cb),
        Err(e) => cb(Err(e)),
    }
}

/// 名前を指定する版。基底クラスのメンバも探す
pub fn resolve_member_by_pointer_name(
    context: &Rc<ExprEvalContext>,
    base_ptr: &ExprValue,
    name: &str,
    cb: ValueCallback,
) {
    let target = pointee_collection(context, base_ptr).and_then(|ty| {
        let (offset, member) = ty
            .as_collection()
            .and_then(|c| find_member(c, name))
            .ok_or_else(|| Error::MemberNotFound(name.to_string()))?;
        let address = member_address(
            base_ptr.promote_to_u64()?,
            offset,
            member.member_type.byte_size(),
        )?;
        Ok((address, member.member_type.clone()))
    });
    match target {
        Ok((address, ty)) => fetch(context, address, ty, cb),
        Err(e) => cb(Err(e)),
    }
}
