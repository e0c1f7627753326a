//! 型シンボル
//!
//! デバッグ情報から構築される不変の型メタデータです。型は `Rc` で共有され、
//! 値の解決処理からは借用されるだけで変更されません。

use std::rc::Rc;

/// 基本型のエンコーディング
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BaseTypeEncoding {
    Signed,
    Unsigned,
    Float,
    Boolean,
    SignedChar,
    UnsignedChar,
    Other,
}

/// 基本型（整数・浮動小数点など）
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BaseType {
    pub name: String,
    pub byte_size: u32,
    pub encoding: BaseTypeEncoding,
}

/// 修飾型の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModifierTag {
    Pointer,
    Reference,
    Const,
    Volatile,
    Typedef,
}

/// 他の型を修飾する型（ポインタ・const・typedef など）
#[derive(Debug, Clone)]
pub struct ModifiedType {
    pub tag: ModifierTag,
    /// typedef の名前など
    pub name: Option<String>,
    /// 修飾対象。None は void
    pub modified: Option<Rc<Type>>,
    pub byte_size: u32,
}

/// 集合型の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionKind {
    Struct,
    Class,
    Union,
}

/// 構造体・クラス・共用体
#[derive(Debug, Clone)]
pub struct Collection {
    pub kind: CollectionKind,
    pub name: String,
    pub byte_size: u32,
    /// 前方宣言のみ（メンバ情報なし）
    pub is_declaration: bool,
    pub data_members: Vec<Rc<DataMember>>,
    /// 直接の基底クラス
    pub inherited_from: Vec<Rc<InheritedFrom>>,
}

impl Collection {
    /// メンバなしの集合型を作成する
    pub fn new(kind: CollectionKind, name: impl Into<String>, byte_size: u32) -> Self {
        Self {
            kind,
            name: name.into(),
            byte_size,
            is_declaration: false,
            data_members: Vec::new(),
            inherited_from: Vec::new(),
        }
    }

    /// 前方宣言を作成する
    pub fn declaration(kind: CollectionKind, name: impl Into<String>) -> Self {
        Self {
            is_declaration: true,
            ..Self::new(kind, name, 0)
        }
    }

    /// メンバを追加する（構築時のみ）
    pub fn with_member(mut self, member: DataMember) -> Self {
        self.data_members.push(Rc::new(member));
        self
    }

    /// 基底クラスを追加する（構築時のみ）
    pub fn with_base(mut self, base: InheritedFrom) -> Self {
        self.inherited_from.push(Rc::new(base));
        self
    }

    /// このコレクション自身のメンバを名前で探す（基底クラスは探さない）
    pub fn find_own_member(&self, name: &str) -> Option<&Rc<DataMember>> {
        self.data_members.iter().find(|m| m.name == name)
    }
}

/// 配列型
#[derive(Debug, Clone)]
pub struct ArrayType {
    pub element_type: Rc<Type>,
    pub count: Option<u64>,
}

/// 型
#[derive(Debug, Clone)]
pub enum Type {
    Base(BaseType),
    Modified(ModifiedType),
    Collection(Collection),
    Array(ArrayType),
}

impl Type {
    /// 基本型を作成する
    pub fn base(name: impl Into<String>, byte_size: u32, encoding: BaseTypeEncoding) -> Rc<Type> {
        Rc::new(Type::Base(BaseType {
            name: name.into(),
            byte_size,
            encoding,
        }))
    }

    /// 64bitポインタ型を作成する
    pub fn pointer_to(pointee: Rc<Type>) -> Rc<Type> {
        Rc::new(Type::Modified(ModifiedType {
            tag: ModifierTag::Pointer,
            name: None,
            modified: Some(pointee),
            byte_size: 8,
        }))
    }

    /// 型名
    pub fn name(&self) -> String {
        match self {
            Type::Base(base) => base.name.clone(),
            Type::Collection(collection) => collection.name.clone(),
            Type::Modified(modified) => {
                let inner = modified
                    .modified
                    .as_ref()
                    .map(|t| t.name())
                    .unwrap_or_else(|| "void".to_string());
                match modified.tag {
                    ModifierTag::Pointer => format!("{}*", inner),
                    ModifierTag::Reference => format!("{}&", inner),
                    ModifierTag::Const => format!("const {}", inner),
                    ModifierTag::Volatile => format!("volatile {}", inner),
                    ModifierTag::Typedef => modified.name.clone().unwrap_or(inner),
                }
            }
            Type::Array(array) => match array.count {
                Some(count) => format!("{}[{}]", array.element_type.name(), count),
                None => format!("{}[]", array.element_type.name()),
            },
        }
    }

    /// バイトサイズ
    pub fn byte_size(&self) -> u32 {
        match self {
            Type::Base(base) => base.byte_size,
            Type::Collection(collection) => collection.byte_size,
            Type::Modified(modified) => match modified.tag {
                ModifierTag::Pointer | ModifierTag::Reference => modified.byte_size,
                _ => modified
                    .modified
                    .as_ref()
                    .map(|t| t.byte_size())
                    .unwrap_or(0),
            },
            Type::Array(array) => {
                let count = array.count.unwrap_or(0);
                (u64::from(array.element_type.byte_size()) * count) as u32
            }
        }
    }

    pub fn as_collection(&self) -> Option<&Collection> {
        match self {
            Type::Collection(collection) => Some(collection),
            _ => None,
        }
    }

    pub fn as_modified(&self) -> Option<&ModifiedType> {
        match self {
            Type::Modified(modified) => Some(modified),
            _ => None,
        }
    }
}

/// const・volatile・typedef を取り除いた型を返す
pub fn strip_cvt(ty: &Rc<Type>) -> Rc<Type> {
    let mut current = ty.clone();
    loop {
        let next = match current.as_modified() {
            Some(modified)
                if matches!(
                    modified.tag,
                    ModifierTag::Const | ModifierTag::Volatile | ModifierTag::Typedef
                ) =>
            {
                modified.modified.clone()
            }
            _ => return current,
        };
        match next {
            Some(next) => current = next,
            None => return current,
        }
    }
}

/// ポインタ型なら指す先の型を返す（const等は取り除いて判定する）
///
/// void ポインタの場合は `Some(None)` になります。
pub fn pointed_to_type(ty: &Rc<Type>) -> Option<Option<Rc<Type>>> {
    let stripped = strip_cvt(ty);
    match stripped.as_modified() {
        Some(modified) if modified.tag == ModifierTag::Pointer => {
            Some(modified.modified.clone())
        }
        _ => None,
    }
}

/// 集合型のデータメンバ
#[derive(Debug, Clone)]
pub struct DataMember {
    pub name: String,
    pub member_type: Rc<Type>,
    /// 集合型の先頭からのバイトオフセット
    pub member_location: u32,
}

impl DataMember {
    pub fn new(name: impl Into<String>, member_type: Rc<Type>, member_location: u32) -> Self {
        Self {
            name: name.into(),
            member_type,
            member_location,
        }
    }
}

/// 派生クラス内の基底クラス
#[derive(Debug, Clone)]
pub struct InheritedFrom {
    /// 基底クラスの型
    pub from: Rc<Type>,
    /// 派生クラスの先頭からのバイトオフセット
    pub offset: u64,
}

impl InheritedFrom {
    pub fn new(from: Rc<Type>, offset: u64) -> Self {
        Self { from, offset }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int32() -> Rc<Type> {
        Type::base("int32_t", 4, BaseTypeEncoding::Signed)
    }

    #[test]
    fn test_type_names() {
        let ptr = Type::pointer_to(int32());
        assert_eq!(ptr.name(), "int32_t*");
        assert_eq!(ptr.byte_size(), 8);

        let void_ptr = Rc::new(Type::Modified(ModifiedType {
            tag: ModifierTag::Pointer,
            name: None,
            modified: None,
            byte_size: 8,
        }));
        assert_eq!(void_ptr.name(), "void*");
    }

    #[test]
    fn test_strip_cvt_through_typedef_and_const() {
        let collection = Rc::new(Type::Collection(Collection::new(
            CollectionKind::Struct,
            "Foo",
            16,
        )));
        let constant = Rc::new(Type::Modified(ModifiedType {
            tag: ModifierTag::Const,
            name: None,
            modified: Some(collection.clone()),
            byte_size: 0,
        }));
        let typedef = Rc::new(Type::Modified(ModifiedType {
            tag: ModifierTag::Typedef,
            name: Some("FooAlias".to_string()),
            modified: Some(constant),
            byte_size: 0,
        }));

        assert_eq!(typedef.name(), "FooAlias");
        assert_eq!(typedef.byte_size(), 16);
        assert!(Rc::ptr_eq(&strip_cvt(&typedef), &collection));
    }

    #[test]
    fn test_pointed_to_type() {
        let int = int32();
        let ptr = Type::pointer_to(int.clone());
        let pointee = pointed_to_type(&ptr).unwrap().unwrap();
        assert!(Rc::ptr_eq(&pointee, &int));
        assert!(pointed_to_type(&int).is_none());
    }
}
