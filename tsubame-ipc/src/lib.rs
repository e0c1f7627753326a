//! Tsubame リモートエージェントとの通信契約
//!
//! このクレートは、デバッグエージェントとの間でやり取りするリクエスト・リプライ・通知の
//! レコード型と、それらを送受信するトランスポートの抽象（`RemoteApi`）を提供します。
//! 完了コールバックはすべて単一スレッドの `MessageLoop` 上で実行されます。

pub mod breakpoint;
pub mod error;
pub mod memory;
pub mod message_loop;
pub mod mock;
pub mod process;
pub mod remote_api;
pub mod thread;

pub use breakpoint::{
    AddOrChangeBreakpointReply, AddOrChangeBreakpointRequest, BreakpointSettingsRecord,
    BreakpointStats, ProcessBreakpointLocation, RemoveBreakpointReply, RemoveBreakpointRequest,
    StopMode,
};
pub use error::IpcError;
pub use memory::{MemoryBlock, MemoryDump, ReadMemoryReply, ReadMemoryRequest};
pub use message_loop::MessageLoop;
pub use mock::{MockRemoteApi, RecordedRequest};
pub use process::{
    AddressRange, AttachKind, AttachReply, AttachRequest, DetachReply, DetachRequest,
    ExceptionType, JobFilterReply, JobFilterRequest, LaunchReply, LaunchRequest, Notification,
    NotifyException, PauseReply, PauseRequest, ProcessTreeRecord, ProcessTreeReply,
    ProcessTreeRequest, ResumeHow, ResumeReply, ResumeRequest,
};
pub use remote_api::{Callback, RemoteApi};
pub use thread::{StackFrame, ThreadRecord, ThreadState};

/// カーネルオブジェクトID（プロセス・スレッド・ジョブの識別子）
///
/// リクエスト中の `0` は「すべて」を意味します。
pub type Koid = u64;

/// 通信結果の型
pub type Result<T> = std::result::Result<T, IpcError>;
