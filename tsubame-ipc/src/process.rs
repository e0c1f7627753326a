//! プロセス制御のリクエストと通知

use crate::{BreakpointStats, Koid, ThreadRecord};

/// アドレス範囲 `[begin, end)`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AddressRange {
    begin: u64,
    end: u64,
}

impl AddressRange {
    /// 範囲を作成する
    ///
    /// `end < begin` の場合は空の範囲として扱います。
    pub fn new(begin: u64, end: u64) -> Self {
        Self {
            begin,
            end: end.max(begin),
        }
    }

    pub fn begin(&self) -> u64 {
        self.begin
    }

    pub fn end(&self) -> u64 {
        self.end
    }

    pub fn size(&self) -> u64 {
        self.end - self.begin
    }

    pub fn is_empty(&self) -> bool {
        self.begin == self.end
    }

    /// アドレスが範囲内にあるか
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.begin && addr < self.end
    }
}

/// 停止の原因
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExceptionType {
    /// デバッグ以外の一般例外（不正アクセスなど）
    General,
    /// ハードウェアブレークポイント
    Hardware,
    /// 1命令ステップの完了
    SingleStep,
    /// ソフトウェアブレークポイント（INT3/BRK）
    Software,
    /// 一時停止要求による停止
    Synthetic,
}

impl ExceptionType {
    /// デバッグ起因の停止か
    pub fn is_debug(&self) -> bool {
        !matches!(self, ExceptionType::General)
    }
}

/// プロセスツリーの要求
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProcessTreeRequest {}

/// プロセスツリーのノード
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessTreeRecord {
    pub koid: Koid,
    pub name: String,
    pub is_job: bool,
    pub children: Vec<ProcessTreeRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessTreeReply {
    pub root: ProcessTreeRecord,
}

/// プログラムの起動
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LaunchRequest {
    pub argv: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LaunchReply {
    /// 0 なら成功
    pub status: i32,
    pub process_koid: Koid,
    pub process_name: String,
}

/// アタッチ対象の種類
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AttachKind {
    Process,
    Job,
}

/// 既存のプロセス・ジョブへのアタッチ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttachRequest {
    pub kind: AttachKind,
    pub koid: Koid,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AttachReply {
    pub status: i32,
    pub koid: Koid,
    pub name: String,
}

/// デタッチ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetachRequest {
    pub kind: AttachKind,
    pub koid: Koid,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DetachReply {
    pub status: i32,
}

/// 一時停止（koid 0 はすべて）
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PauseRequest {
    pub process_koid: Koid,
    pub thread_koid: Koid,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PauseReply {}

/// 再開方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResumeHow {
    /// 自由に実行を継続
    #[default]
    Continue,
    /// 1命令だけ実行
    StepInstruction,
    /// 命令ポインタが範囲内にある間ステップ実行
    StepInRange,
}

/// 実行再開
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResumeRequest {
    /// 0 なら全プロセス
    pub process_koid: Koid,
    /// 空ならプロセス内の全スレッド
    pub thread_koids: Vec<Koid>,
    pub how: ResumeHow,
    /// `how == StepInRange` のときのみ意味を持つ
    pub range: AddressRange,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResumeReply {}

/// ジョブのプロセス名フィルタ
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobFilterRequest {
    pub job_koid: Koid,
    pub filters: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JobFilterReply {
    pub status: i32,
}

/// 例外（スレッド停止）通知
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotifyException {
    pub process_koid: Koid,
    pub thread: ThreadRecord,
    pub exception_type: ExceptionType,
    pub hit_breakpoints: Vec<BreakpointStats>,
}

/// エージェントからの非同期通知
///
/// 同一プロセス・スレッドに関する通知は受信順に処理されます。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// プロセスが作成された（ジョブフィルタ経由など）
    ProcessStarting { koid: Koid, name: String },
    /// プロセスが終了した
    ProcessExiting { koid: Koid, return_code: i64 },
    /// スレッドが作成された
    ThreadStarting { process_koid: Koid, record: ThreadRecord },
    /// スレッドが終了した
    ThreadExiting { process_koid: Koid, record: ThreadRecord },
    /// スレッドが停止した
    Exception(NotifyException),
    /// 接続が切れた
    ConnectionLost,
}
