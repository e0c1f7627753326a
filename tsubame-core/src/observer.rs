//! セッションの監視者
//!
//! セッションの状態変化は、状態の更新がすべて終わってから監視者に通知されます。
//! そのため監視者は通知の中からセッションを操作してかまいません。

use crate::breakpoint::BreakpointId;
use crate::job_context::JobContextId;
use crate::target::TargetId;
use crate::thread::ThreadHandle;
use tsubame_ipc::{ExceptionType, Koid};

/// セッションの監視者
///
/// すべてのメソッドは既定で何もしません。
pub trait SessionObserver {
    fn did_create_target(&self, _target: TargetId) {}
    fn will_destroy_target(&self, _target: TargetId) {}

    fn did_create_job_context(&self, _job_context: JobContextId) {}
    fn will_destroy_job_context(&self, _job_context: JobContextId) {}

    /// ユーザーのブレークポイントのみ通知される
    fn did_create_breakpoint(&self, _breakpoint: BreakpointId) {}
    fn will_destroy_breakpoint(&self, _breakpoint: BreakpointId) {}

    fn did_create_process(&self, _target: TargetId, _process_koid: Koid) {}
    fn will_destroy_process(&self, _target: TargetId, _process_koid: Koid) {}

    fn did_create_thread(&self, _thread: ThreadHandle) {}
    fn will_destroy_thread(&self, _thread: ThreadHandle) {}

    /// スレッドが停止した。`breakpoints` はヒットしたユーザーのブレークポイント
    fn on_thread_stopped(
        &self,
        _thread: ThreadHandle,
        _exception: ExceptionType,
        _breakpoints: &[BreakpointId],
    ) {
    }

    /// シンボルの索引付けに関する情報メッセージ
    fn on_symbol_indexing_information(&self, _message: &str) {}
}

/// 通知待ちのイベント
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum SystemEvent {
    DidCreateTarget(TargetId),
    WillDestroyTarget(TargetId),
    DidCreateJobContext(JobContextId),
    WillDestroyJobContext(JobContextId),
    DidCreateBreakpoint(BreakpointId),
    WillDestroyBreakpoint(BreakpointId),
    DidCreateProcess(TargetId, Koid),
    WillDestroyProcess(TargetId, Koid),
    DidCreateThread(ThreadHandle),
    WillDestroyThread(ThreadHandle),
    ThreadStopped(ThreadHandle, ExceptionType, Vec<BreakpointId>),
    SymbolIndexingInformation(String),
}

impl SystemEvent {
    pub(crate) fn dispatch(&self, observer: &dyn SessionObserver) {
        match self {
            SystemEvent::DidCreateTarget(id) => observer.did_create_target(*id),
            SystemEvent::WillDestroyTarget(id) => observer.will_destroy_target(*id),
            SystemEvent::DidCreateJobContext(id) => observer.did_create_job_context(*id),
            SystemEvent::WillDestroyJobContext(id) => observer.will_destroy_job_context(*id),
            SystemEvent::DidCreateBreakpoint(id) => observer.did_create_breakpoint(*id),
            SystemEvent::WillDestroyBreakpoint(id) => observer.will_destroy_breakpoint(*id),
            SystemEvent::DidCreateProcess(target, koid) => observer.did_create_process(*target, *koid),
            SystemEvent::WillDestroyProcess(target, koid) => {
                observer.will_destroy_process(*target, *koid)
            }
            SystemEvent::DidCreateThread(thread) => observer.did_create_thread(*thread),
            SystemEvent::WillDestroyThread(thread) => observer.will_destroy_thread(*thread),
            SystemEvent::ThreadStopped(thread, exception, breakpoints) => {
                observer.on_thread_stopped(*thread, *exception, breakpoints)
            }
            SystemEvent::SymbolIndexingInformation(message) => {
                observer.on_symbol_indexing_information(message)
            }
        }
    }
}
