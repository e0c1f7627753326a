//! 式評価の基本操作
//!
//! 完全な式の文法は持たず、値からメンバや基底クラスを取り出す解決処理のみを提供します。

mod eval_context;
mod resolve_collection;
mod value;

pub use eval_context::{ExprEvalContext, ProcessDataProvider, SymbolDataProvider, ValueCallback};
pub use resolve_collection::{
    resolve_inherited, resolve_member, resolve_member_by_name, resolve_member_by_pointer,
    resolve_member_by_pointer_name,
};
pub use value::ExprValue;
