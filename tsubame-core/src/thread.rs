//! スレッド

use crate::thread_controller::{ControllerId, ThreadController};
use tsubame_ipc::{ExceptionType, Koid, StackFrame, ThreadRecord, ThreadState};

/// スレッドを指すハンドル（プロセスkoid + スレッドkoid）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadHandle {
    pub process_koid: Koid,
    pub thread_koid: Koid,
}

impl ThreadHandle {
    pub fn new(process_koid: Koid, thread_koid: Koid) -> Self {
        Self {
            process_koid,
            thread_koid,
        }
    }
}

/// スレッド
#[derive(Debug)]
pub struct Thread {
    koid: Koid,
    process_koid: Koid,
    name: String,
    state: ThreadState,
    /// 最後に停止した理由
    stop_reason: Option<ExceptionType>,
    /// 最後に報告された先頭フレーム（先頭が最も内側）
    frames: Vec<StackFrame>,
    /// 末尾がスタックの先頭
    controllers: Vec<ThreadController>,
}

impl Thread {
    pub(crate) fn new(process_koid: Koid, record: &ThreadRecord) -> Self {
        Self {
            koid: record.koid,
            process_koid,
            name: record.name.clone(),
            state: record.state,
            stop_reason: None,
            frames: record.frames.clone(),
            controllers: Vec::new(),
        }
    }

    pub fn handle(&self) -> ThreadHandle {
        ThreadHandle::new(self.process_koid, self.koid)
    }

    pub fn koid(&self) -> Koid {
        self.koid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> ThreadState {
        self.state
    }

    pub fn stop_reason(&self) -> Option<ExceptionType> {
        self.stop_reason
    }

    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    /// 停止中か（ユーザー要求・例外のどちらでも）
    pub fn is_stopped(&self) -> bool {
        matches!(self.state, ThreadState::Blocked | ThreadState::Suspended)
    }

    pub fn controllers(&self) -> &[ThreadController] {
        &self.controllers
    }

    /// 通知されたレコードで状態を更新する
    pub(crate) fn update(&mut self, record: &ThreadRecord) {
        if !record.name.is_empty() {
            self.name = record.name.clone();
        }
        self.state = record.state;
        self.frames = record.frames.clone();
    }

    pub(crate) fn set_stopped(&mut self, reason: ExceptionType) {
        self.state = ThreadState::Blocked;
        self.stop_reason = Some(reason);
    }

    /// 再開した（フレームは次の停止まで無効）
    pub(crate) fn set_running(&mut self) {
        self.state = ThreadState::Running;
        self.frames.clear();
    }

    pub(crate) fn push_controller(&mut self, controller: ThreadController) {
        self.controllers.push(controller);
    }

    pub(crate) fn take_controllers(&mut self) -> Vec<ThreadController> {
        std::mem::take(&mut self.controllers)
    }

    /// 評価後に残ったコントローラを戻す。評価中に積まれたものはその上に残す
    pub(crate) fn restore_controllers(&mut self, mut remaining: Vec<ThreadController>) {
        remaining.append(&mut self.controllers);
        self.controllers = remaining;
    }

    pub(crate) fn remove_controller(&mut self, id: ControllerId) -> Option<ThreadController> {
        let index = self.controllers.iter().position(|c| c.id() == id)?;
        Some(self.controllers.remove(index))
    }

    pub(crate) fn top_controller(&self) -> Option<&ThreadController> {
        self.controllers.last()
    }
}
