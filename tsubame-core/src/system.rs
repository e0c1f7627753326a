//! セッションが所有するデバッグ対象の木
//!
//! ターゲット・ジョブコンテキスト・ブレークポイントとシンボルインデックスを保持します。
//! 状態を変更するメソッドは監視者への通知をイベントとして溜め、
//! [`Session`](crate::Session) が更新を終えてからまとめて配送します。

use crate::breakpoint::{Breakpoint, BreakpointId, BreakpointRequest, BreakpointSettings};
use crate::job_context::{JobContext, JobContextId, JobContextState};
use crate::observer::SystemEvent;
use crate::process::Process;
use crate::target::{Target, TargetId, TargetState};
use crate::thread::{Thread, ThreadHandle};
use crate::{Error, Result};
use std::collections::BTreeMap;
use std::rc::Rc;
use tsubame_ipc::{BreakpointStats, Koid, ThreadRecord};
use tsubame_symbols::SymbolIndex;

pub struct System {
    /// 常に1つ以上
    targets: Vec<Target>,
    /// 常に1つ以上
    job_contexts: Vec<JobContext>,
    breakpoints: BTreeMap<BreakpointId, Breakpoint>,
    symbols: Rc<SymbolIndex>,
    next_target_id: u32,
    next_job_context_id: u32,
    pending_events: Vec<SystemEvent>,
}

impl System {
    /// 既定のターゲットとジョブコンテキストを1つずつ持つ状態で作成する
    pub(crate) fn new(symbols: Rc<SymbolIndex>) -> Self {
        let mut system = Self {
            targets: Vec::new(),
            job_contexts: Vec::new(),
            breakpoints: BTreeMap::new(),
            symbols,
            next_target_id: 1,
            next_job_context_id: 1,
            pending_events: Vec::new(),
        };
        let target = system.allocate_target_id();
        system.targets.push(Target::new(target));
        let job_context = system.allocate_job_context_id();
        system.job_contexts.push(JobContext::new(job_context));
        system
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn target(&self, id: TargetId) -> Option<&Target> {
        self.targets.iter().find(|t| t.id() == id)
    }

    pub fn job_contexts(&self) -> &[JobContext] {
        &self.job_contexts
    }

    pub fn job_context(&self, id: JobContextId) -> Option<&JobContext> {
        self.job_contexts.iter().find(|j| j.id() == id)
    }

    /// ユーザーのブレークポイント（内部ブレークポイントは含まない）
    pub fn breakpoints(&self) -> Vec<&Breakpoint> {
        self.breakpoints
            .values()
            .filter(|bp| !bp.is_internal())
            .collect()
    }

    /// IDでブレークポイントを探す（内部ブレークポイントも含む）
    pub fn breakpoint(&self, id: BreakpointId) -> Option<&Breakpoint> {
        self.breakpoints.get(&id)
    }

    /// koidからプロセスを探す
    pub fn process_from_koid(&self, koid: Koid) -> Option<&Process> {
        self.targets
            .iter()
            .filter_map(|t| t.process())
            .find(|p| p.koid() == koid)
    }

    pub fn thread(&self, handle: ThreadHandle) -> Option<&Thread> {
        self.process_from_koid(handle.process_koid)?
            .thread(handle.thread_koid)
    }

    pub fn symbols(&self) -> &Rc<SymbolIndex> {
        &self.symbols
    }

    pub(crate) fn target_mut(&mut self, id: TargetId) -> Option<&mut Target> {
        self.targets.iter_mut().find(|t| t.id() == id)
    }

    pub(crate) fn job_context_mut(&mut self, id: JobContextId) -> Option<&mut JobContext> {
        self.job_contexts.iter_mut().find(|j| j.id() == id)
    }

    pub(crate) fn thread_mut(&mut self, handle: ThreadHandle) -> Option<&mut Thread> {
        self.process_mut_from_koid(handle.process_koid)?
            .thread_mut(handle.thread_koid)
    }

    fn process_mut_from_koid(&mut self, koid: Koid) -> Option<&mut Process> {
        self.targets
            .iter_mut()
            .filter_map(|t| t.process_mut())
            .find(|p| p.koid() == koid)
    }

    /// 全スレッドを実行中にする（全体の再開要求を送ったとき）
    pub(crate) fn set_all_threads_running(&mut self) {
        for process in self.targets.iter_mut().filter_map(|t| t.process_mut()) {
            for thread in process.threads_mut() {
                thread.set_running();
            }
        }
    }

    /// アタッチ中の（ターゲット, プロセスkoid）
    pub(crate) fn attached_processes(&self) -> Vec<(TargetId, Koid)> {
        self.targets
            .iter()
            .filter_map(|t| t.process().map(|p| (t.id(), p.koid())))
            .collect()
    }

    pub(crate) fn push_event(&mut self, event: SystemEvent) {
        self.pending_events.push(event);
    }

    pub(crate) fn take_events(&mut self) -> Vec<SystemEvent> {
        std::mem::take(&mut self.pending_events)
    }

    // --------------------------------- targets ---------------------------------------------------

    fn allocate_target_id(&mut self) -> TargetId {
        let id = TargetId(self.next_target_id);
        self.next_target_id += 1;
        id
    }

    pub(crate) fn create_target(&mut self, clone_from: Option<TargetId>) -> Result<TargetId> {
        let id = self.allocate_target_id();
        let target = match clone_from {
            Some(source) => self
                .target(source)
                .ok_or(Error::TargetNotFound(source))?
                .clone_with_id(id),
            None => Target::new(id),
        };
        self.targets.push(target);
        self.push_event(SystemEvent::DidCreateTarget(id));
        Ok(id)
    }

    /// ターゲットを削除する。アタッチ中なら先にプロセスを破棄し、そのkoidを返す
    pub(crate) fn remove_target(&mut self, id: TargetId) -> Result<Option<Koid>> {
        let index = self
            .targets
            .iter()
            .position(|t| t.id() == id)
            .ok_or(Error::TargetNotFound(id))?;
        if self.targets.len() == 1 {
            return Err(Error::LastTarget);
        }

        let detached = self.destroy_process(id);
        self.push_event(SystemEvent::WillDestroyTarget(id));
        self.targets.remove(index);
        Ok(detached)
    }

    /// 起動・アタッチ要求の前にターゲットの状態を進める
    pub(crate) fn begin_start(&mut self, id: TargetId, state: TargetState) -> Result<Vec<String>> {
        let target = self.target_mut(id).ok_or(Error::TargetNotFound(id))?;
        if target.state() != TargetState::None {
            return Err(Error::TargetBusy(id));
        }
        target.set_state(state);
        Ok(target.args().to_vec())
    }

    /// 起動・アタッチ要求が失敗した
    pub(crate) fn abort_start(&mut self, id: TargetId) {
        if let Some(target) = self.target_mut(id) {
            if target.process().is_none() {
                target.set_state(TargetState::None);
            }
        }
    }

    /// ターゲットにプロセスを設定する
    ///
    /// koidは1つのターゲットにしか属さないため、別のターゲットが既に持っていればエラーになります。
    pub(crate) fn attach_process(&mut self, target: TargetId, koid: Koid, name: String) -> Result<()> {
        if let Some(owner) = self.target_for_process(koid) {
            return Err(Error::ProcessAlreadyAttached {
                koid,
                target: owner,
            });
        }
        let entry = self.target_mut(target).ok_or(Error::TargetNotFound(target))?;
        entry.set_process(Process::new(koid, name, target));
        self.push_event(SystemEvent::DidCreateProcess(target, koid));
        Ok(())
    }

    /// ジョブ経由で捕捉されたプロセスを、空いているターゲット（なければ新規）に割り当てる
    ///
    /// 同じkoidの通知が重複した場合は、既に持っているターゲットを返します。
    pub(crate) fn adopt_process(&mut self, koid: Koid, name: String) -> Result<TargetId> {
        if let Some(owner) = self.target_for_process(koid) {
            return Ok(owner);
        }
        let idle = self
            .targets
            .iter()
            .find(|t| t.state() == TargetState::None && t.process().is_none())
            .map(|t| t.id());
        let target = match idle {
            Some(target) => target,
            None => self.create_target(None)?,
        };
        self.attach_process(target, koid, name)?;
        Ok(target)
    }

    /// ターゲットのプロセスを破棄する（明示的な要求は送らない）
    ///
    /// スレッドのコントローラが持っていた内部ブレークポイントも削除します。
    pub(crate) fn destroy_process(&mut self, target: TargetId) -> Option<Koid> {
        let mut process = self.target_mut(target)?.take_process()?;
        let koid = process.koid();
        self.push_event(SystemEvent::WillDestroyProcess(target, koid));

        for thread in process.take_threads() {
            for controller in thread.controllers() {
                for id in controller.owned_breakpoints() {
                    self.breakpoints.remove(&id);
                }
            }
        }
        Some(koid)
    }

    /// koidのプロセスを所有するターゲット
    pub(crate) fn target_for_process(&self, koid: Koid) -> Option<TargetId> {
        self.process_from_koid(koid).map(|p| p.target())
    }

    // --------------------------------- threads ---------------------------------------------------

    /// スレッドを追加するか、既存のスレッドを更新する
    pub(crate) fn add_or_update_thread(&mut self, handle: ThreadHandle, record: &ThreadRecord) -> bool {
        let Some(process) = self.process_mut_from_koid(handle.process_koid) else {
            return false;
        };
        if let Some(thread) = process.thread_mut(handle.thread_koid) {
            thread.update(record);
            return true;
        }
        process.add_thread(Thread::new(handle.process_koid, record));
        self.push_event(SystemEvent::DidCreateThread(handle));
        true
    }

    /// スレッドを削除し、そのコントローラが持っていた内部ブレークポイントを返す
    pub(crate) fn remove_thread(&mut self, handle: ThreadHandle) -> Vec<BreakpointId> {
        let Some(process) = self.process_mut_from_koid(handle.process_koid) else {
            return Vec::new();
        };
        let Some(thread) = process.remove_thread(handle.thread_koid) else {
            return Vec::new();
        };
        self.push_event(SystemEvent::WillDestroyThread(handle));
        thread
            .controllers()
            .iter()
            .flat_map(|c| c.owned_breakpoints())
            .collect()
    }

    // --------------------------------- job contexts ----------------------------------------------

    fn allocate_job_context_id(&mut self) -> JobContextId {
        let id = JobContextId(self.next_job_context_id);
        self.next_job_context_id += 1;
        id
    }

    pub(crate) fn create_job_context(&mut self, clone_from: Option<JobContextId>) -> Result<JobContextId> {
        let id = self.allocate_job_context_id();
        let job_context = match clone_from {
            Some(source) => self
                .job_context(source)
                .ok_or(Error::JobContextNotFound(source))?
                .clone_with_id(id),
            None => JobContext::new(id),
        };
        self.job_contexts.push(job_context);
        self.push_event(SystemEvent::DidCreateJobContext(id));
        Ok(id)
    }

    /// ジョブコンテキストを削除する。アタッチ中ならジョブのkoidを返す
    pub(crate) fn remove_job_context(&mut self, id: JobContextId) -> Result<Option<Koid>> {
        let index = self
            .job_contexts
            .iter()
            .position(|j| j.id() == id)
            .ok_or(Error::JobContextNotFound(id))?;
        if self.job_contexts.len() == 1 {
            return Err(Error::LastJobContext);
        }

        let job_context = &self.job_contexts[index];
        let attached = match job_context.state() {
            JobContextState::Attached => job_context.job_koid(),
            _ => None,
        };
        self.push_event(SystemEvent::WillDestroyJobContext(id));
        self.job_contexts.remove(index);
        Ok(attached)
    }

    // --------------------------------- breakpoints -----------------------------------------------

    pub(crate) fn add_breakpoint(&mut self, is_internal: bool) -> BreakpointId {
        let breakpoint = Breakpoint::new(is_internal);
        let id = breakpoint.id();
        self.breakpoints.insert(id, breakpoint);
        if !is_internal {
            self.push_event(SystemEvent::DidCreateBreakpoint(id));
        }
        id
    }

    /// ブレークポイントを削除する
    ///
    /// # Panics
    ///
    /// 登録されていないIDを渡した場合。
    pub(crate) fn remove_breakpoint(&mut self, id: BreakpointId) -> Option<BreakpointRequest> {
        let Some(mut breakpoint) = self.breakpoints.remove(&id) else {
            panic!("deleting breakpoint {} that is not registered with the session", id);
        };
        if !breakpoint.is_internal() {
            self.push_event(SystemEvent::WillDestroyBreakpoint(id));
        }
        breakpoint.removal_request()
    }

    /// 設定を変更して再解決する。接続中なら設置要求を返す
    pub(crate) fn update_breakpoint(
        &mut self,
        id: BreakpointId,
        settings: BreakpointSettings,
        connected: bool,
    ) -> Result<Option<BreakpointRequest>> {
        self.breakpoints
            .get_mut(&id)
            .ok_or(Error::BreakpointNotFound(id))?
            .set_settings(settings);
        Ok(self.sync_breakpoint(id, connected))
    }

    /// 1つのブレークポイントを再解決し、必要な要求を返す
    pub(crate) fn sync_breakpoint(&mut self, id: BreakpointId, connected: bool) -> Option<BreakpointRequest> {
        let processes = self.attached_processes();
        let symbols = self.symbols.clone();
        let breakpoint = self.breakpoints.get_mut(&id)?;
        breakpoint.resolve(&symbols);
        if connected {
            breakpoint.sync_request(&processes)
        } else {
            None
        }
    }

    /// プロセスの増減に合わせてすべてのブレークポイントを再同期する
    pub(crate) fn sync_all_breakpoints(&mut self, connected: bool) -> Vec<BreakpointRequest> {
        let ids: Vec<BreakpointId> = self.breakpoints.keys().copied().collect();
        ids.into_iter()
            .filter_map(|id| self.sync_breakpoint(id, connected))
            .collect()
    }

    /// 停止通知のヒット数を反映する
    pub(crate) fn record_hits(&mut self, stats: &[BreakpointStats]) {
        for stat in stats {
            if let Some(bp) = self.breakpoints.get_mut(&BreakpointId::from_raw(stat.breakpoint_id)) {
                bp.set_hit_count(stat.hit_count);
            }
        }
    }

    // --------------------------------- connection ------------------------------------------------

    /// 接続が切れた。すべてのプロセスを破棄し、ジョブを初期状態に戻す
    pub(crate) fn disconnected(&mut self) {
        let targets: Vec<TargetId> = self.targets.iter().map(|t| t.id()).collect();
        for target in targets {
            self.destroy_process(target);
            self.abort_start(target);
        }
        for job_context in &mut self.job_contexts {
            job_context.reset();
        }
        for breakpoint in self.breakpoints.values_mut() {
            breakpoint.mark_uninstalled();
        }
    }

    /// セッション破棄時の後始末
    ///
    /// ターゲットごとに、プロセスの破棄通知がターゲットの破棄通知より先に出ます。
    pub(crate) fn teardown(&mut self) {
        let targets: Vec<TargetId> = self.targets.iter().map(|t| t.id()).collect();
        for id in targets {
            self.destroy_process(id);
            self.push_event(SystemEvent::WillDestroyTarget(id));
        }
        self.targets.clear();
        for job_context in std::mem::take(&mut self.job_contexts) {
            self.push_event(SystemEvent::WillDestroyJobContext(job_context.id()));
        }
        for (id, breakpoint) in std::mem::take(&mut self.breakpoints) {
            if !breakpoint.is_internal() {
                self.push_event(SystemEvent::WillDestroyBreakpoint(id));
            }
        }
    }
}
