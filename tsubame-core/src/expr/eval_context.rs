//! 式評価コンテキスト

use super::value::ExprValue;
use crate::session::{Callback, WeakSession};
use std::rc::Rc;
use tsubame_ipc::{Koid, MemoryDump};
use tsubame_symbols::SymbolIndex;

/// 値の解決結果の通知先
pub type ValueCallback = Callback<ExprValue>;

/// 評価に必要なメモリの供給元
pub trait SymbolDataProvider {
    /// メモリを非同期に読む。読めなかった範囲は無効なブロックになる
    fn get_memory_async(&self, address: u64, size: u32, cb: Callback<MemoryDump>);
}

/// 式評価コンテキスト
///
/// 非同期の解決処理はこのコンテキストへの弱参照だけを保持します。
/// 読み出しの完了前にコンテキストが破棄されると、コールバックは呼ばれません。
pub struct ExprEvalContext {
    symbols: Rc<SymbolIndex>,
    data_provider: Rc<dyn SymbolDataProvider>,
}

impl ExprEvalContext {
    pub fn new(symbols: Rc<SymbolIndex>, data_provider: Rc<dyn SymbolDataProvider>) -> Self {
        Self {
            symbols,
            data_provider,
        }
    }

    pub fn symbols(&self) -> &SymbolIndex {
        &self.symbols
    }

    pub fn data_provider(&self) -> &Rc<dyn SymbolDataProvider> {
        &self.data_provider
    }
}

/// セッション経由でプロセスのメモリを読む
pub struct ProcessDataProvider {
    session: WeakSession,
    process_koid: Koid,
}

impl ProcessDataProvider {
    pub fn new(session: WeakSession, process_koid: Koid) -> Self {
        Self {
            session,
            process_koid,
        }
    }
}

impl SymbolDataProvider for ProcessDataProvider {
    fn get_memory_async(&self, address: u64, size: u32, cb: Callback<MemoryDump>) {
        // セッションが破棄されていれば何もしない
        if let Some(session) = self.session.upgrade() {
            session.read_memory(self.process_koid, address, size, cb);
        }
    }
}
