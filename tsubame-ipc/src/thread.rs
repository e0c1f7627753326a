//! スレッドのレコード型

use crate::Koid;

/// エージェントが報告するスレッドの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThreadState {
    /// 新規作成直後
    New,
    /// 実行中
    #[default]
    Running,
    /// 一時停止中（ユーザー要求による）
    Suspended,
    /// 例外などで停止中
    Blocked,
    /// 終了処理中
    Dying,
    /// 終了済み
    Dead,
}

/// スタックフレーム（命令ポインタとスタックポインタ）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackFrame {
    pub ip: u64,
    pub sp: u64,
}

impl StackFrame {
    pub fn new(ip: u64, sp: u64) -> Self {
        Self { ip, sp }
    }
}

/// スレッド情報
///
/// 停止通知では、少なくとも先頭フレーム（現在位置）とその呼び出し元が含まれます。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadRecord {
    pub koid: Koid,
    pub name: String,
    pub state: ThreadState,
    /// 先頭が最も内側のフレーム
    pub frames: Vec<StackFrame>,
}

impl ThreadRecord {
    /// スレッドレコードを作成する
    pub fn new(koid: Koid, name: impl Into<String>) -> Self {
        Self {
            koid,
            name: name.into(),
            state: ThreadState::Running,
            frames: Vec::new(),
        }
    }

    /// フレーム付きのレコードを作成する（停止通知用）
    pub fn stopped(koid: Koid, frames: Vec<StackFrame>) -> Self {
        Self {
            koid,
            name: String::new(),
            state: ThreadState::Blocked,
            frames,
        }
    }

    /// 現在の命令ポインタ
    pub fn ip(&self) -> Option<u64> {
        self.frames.first().map(|f| f.ip)
    }
}
