//! ブレークポイント関連のリクエスト

use crate::Koid;

/// ブレークポイントにヒットしたときにどこまで停止させるか
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StopMode {
    /// 停止しない（カウントのみ）
    None,
    /// ヒットしたスレッドのみ停止
    Thread,
    /// プロセス全体を停止
    Process,
    /// すべてのプロセスを停止
    #[default]
    All,
}

/// プロセス内の1箇所のブレークポイント設置位置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessBreakpointLocation {
    pub process_koid: Koid,
    /// 0 ならプロセス内の全スレッド
    pub thread_koid: Koid,
    pub address: u64,
}

/// エージェントへ送るブレークポイント設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointSettingsRecord {
    pub breakpoint_id: u32,
    pub stop: StopMode,
    pub locations: Vec<ProcessBreakpointLocation>,
}

/// ブレークポイントの設置・変更
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddOrChangeBreakpointRequest {
    pub breakpoint: BreakpointSettingsRecord,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AddOrChangeBreakpointReply {
    pub status: i32,
}

/// ブレークポイントの削除
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoveBreakpointRequest {
    pub breakpoint_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct RemoveBreakpointReply {}

/// 例外通知に含まれるヒット情報
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BreakpointStats {
    pub breakpoint_id: u32,
    pub hit_count: u32,
}
