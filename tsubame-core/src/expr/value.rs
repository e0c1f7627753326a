//! 式の値

use crate::{Error, Result};
use std::rc::Rc;
use tsubame_symbols::Type;

/// 型とバイト列の組
///
/// 値は不変で、解決処理は常に新しい値を作ります。
#[derive(Debug, Clone, Default)]
pub struct ExprValue {
    ty: Option<Rc<Type>>,
    data: Vec<u8>,
    /// 値を読み出したアドレス
    source_address: Option<u64>,
}

impl ExprValue {
    pub fn new(ty: Rc<Type>, data: Vec<u8>) -> Self {
        Self {
            ty: Some(ty),
            data,
            source_address: None,
        }
    }

    /// メモリから読み出した値
    pub fn with_source(ty: Rc<Type>, data: Vec<u8>, source_address: u64) -> Self {
        Self {
            ty: Some(ty),
            data,
            source_address: Some(source_address),
        }
    }

    /// ポインタ値（リトルエンディアン）
    pub fn pointer(ty: Rc<Type>, address: u64) -> Self {
        let size = (ty.byte_size() as usize).min(8);
        Self::new(ty, address.to_le_bytes()[..size].to_vec())
    }

    pub fn ty(&self) -> Option<&Rc<Type>> {
        self.ty.as_ref()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn source_address(&self) -> Option<u64> {
        self.source_address
    }

    pub fn type_name(&self) -> String {
        self.ty
            .as_ref()
            .map(|t| t.name())
            .unwrap_or_else(|| "<unknown>".to_string())
    }

    /// 1〜8バイトの値を符号なし整数として読む
    pub fn promote_to_u64(&self) -> Result<u64> {
        if self.data.is_empty() || self.data.len() > 8 {
            return Err(Error::UnsupportedSize(self.data.len()));
        }
        let mut bytes = [0u8; 8];
        bytes[..self.data.len()].copy_from_slice(&self.data);
        Ok(u64::from_le_bytes(bytes))
    }
}
