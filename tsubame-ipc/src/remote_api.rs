//! リモートエージェントへのリクエスト送信の抽象

use crate::{
    AddOrChangeBreakpointReply, AddOrChangeBreakpointRequest, AttachReply, AttachRequest,
    DetachReply, DetachRequest, JobFilterReply, JobFilterRequest, LaunchReply, LaunchRequest,
    PauseReply, PauseRequest, ProcessTreeReply, ProcessTreeRequest, ReadMemoryReply,
    ReadMemoryRequest, RemoveBreakpointReply, RemoveBreakpointRequest, ResumeReply,
    ResumeRequest, Result,
};

/// リプライを受け取るコールバック
///
/// 成功・失敗のどちらも同じコールバックで届きます。
pub type Callback<T> = Box<dyn FnOnce(Result<T>)>;

/// リモートエージェントとのリクエスト・リプライ チャネル
///
/// 実装は、コールバックを呼び出し元と同じ `MessageLoop` 上で（リクエスト送信の
/// 呼び出しから戻った後に）実行しなければなりません。
pub trait RemoteApi {
    fn process_tree(&self, request: ProcessTreeRequest, cb: Callback<ProcessTreeReply>);

    fn launch(&self, request: LaunchRequest, cb: Callback<LaunchReply>);

    fn attach(&self, request: AttachRequest, cb: Callback<AttachReply>);

    fn detach(&self, request: DetachRequest, cb: Callback<DetachReply>);

    fn pause(&self, request: PauseRequest, cb: Callback<PauseReply>);

    fn resume(&self, request: ResumeRequest, cb: Callback<ResumeReply>);

    fn read_memory(&self, request: ReadMemoryRequest, cb: Callback<ReadMemoryReply>);

    fn add_or_change_breakpoint(
        &self,
        request: AddOrChangeBreakpointRequest,
        cb: Callback<AddOrChangeBreakpointReply>,
    );

    fn remove_breakpoint(&self, request: RemoveBreakpointRequest, cb: Callback<RemoveBreakpointReply>);

    fn job_filter(&self, request: JobFilterRequest, cb: Callback<JobFilterReply>);
}
