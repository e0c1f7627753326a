//! デバッグセッション
//!
//! [`Session`] はデバッグ対象の木（[`System`]）を所有し、エージェントからの通知を
//! ターゲット・プロセス・スレッドに振り分け、ユーザー操作を要求としてエージェントに送ります。
//!
//! すべての非同期処理の完了は [`MessageLoop`] 経由で通知されます。
//! コールバックは [`WeakSession`] を保持し、セッションが破棄された後は何もしません。

use crate::breakpoint::{BreakpointId, BreakpointRequest, BreakpointSettings};
use crate::expr::{ExprEvalContext, ProcessDataProvider};
use crate::job_context::{JobContextId, JobContextState};
use crate::observer::{SessionObserver, SystemEvent};
use crate::settings::Settings;
use crate::system::System;
use crate::target::{TargetId, TargetState};
use crate::thread::ThreadHandle;
use crate::thread_controller::{
    evaluate_thread_stop, ContinueOp, ControllerContext, ControllerId, ThreadController, ThreadStop,
};
use crate::{Error, Result};
use std::cell::{Ref, RefCell};
use std::path::Path;
use std::rc::{Rc, Weak};
use tsubame_ipc::{
    AttachKind, AttachRequest, DetachRequest, IpcError, JobFilterRequest, Koid, LaunchRequest,
    MemoryDump, MessageLoop, Notification, NotifyException, PauseRequest, ProcessTreeReply,
    ProcessTreeRequest, ReadMemoryRequest, RemoteApi, ResumeRequest,
};
use tsubame_symbols::{ModuleSymbols, SymbolIndex};

/// 非同期処理の完了通知
pub type Callback<T> = Box<dyn FnOnce(Result<T>)>;

struct SessionInner {
    system: RefCell<System>,
    symbols: Rc<SymbolIndex>,
    observers: RefCell<Vec<Rc<dyn SessionObserver>>>,
    remote: RefCell<Option<Rc<dyn RemoteApi>>>,
    message_loop: MessageLoop,
    settings: Settings,
}

impl Drop for SessionInner {
    fn drop(&mut self) {
        let system = self.system.get_mut();
        system.teardown();
        let events = system.take_events();
        let observers = self.observers.get_mut().clone();
        for event in &events {
            for observer in &observers {
                event.dispatch(observer.as_ref());
            }
        }
    }
}

/// デバッグセッション
///
/// クローンは同じセッションを指します。
#[derive(Clone)]
pub struct Session {
    inner: Rc<SessionInner>,
}

/// セッションへの弱参照
#[derive(Clone)]
pub struct WeakSession {
    inner: Weak<SessionInner>,
}

impl WeakSession {
    pub fn upgrade(&self) -> Option<Session> {
        self.inner.upgrade().map(|inner| Session { inner })
    }
}

impl Session {
    /// セッションを作成する
    ///
    /// 既定のターゲットとジョブコンテキストを1つずつ持ち、
    /// ビルドID索引は `[symbols]` の設定で初期化されます。
    pub fn new(message_loop: MessageLoop, settings: Settings) -> Self {
        let symbols = Rc::new(SymbolIndex::new());
        {
            let mut index = symbols.build_id_index();
            for file in &settings.symbols.build_id_files {
                index.add_build_id_file(file);
            }
            for path in &settings.symbols.symbol_paths {
                index.add_symbol_source(path);
            }
        }

        let inner = Rc::new_cyclic(|weak: &Weak<SessionInner>| {
            let weak = WeakSession { inner: weak.clone() };
            let task_loop = message_loop.clone();
            symbols
                .build_id_index()
                .set_information_callback(Box::new(move |message: &str| {
                    let weak = weak.clone();
                    let message = message.to_string();
                    task_loop.post_task(move || {
                        if let Some(session) = weak.upgrade() {
                            session.with_system(|s| {
                                s.push_event(SystemEvent::SymbolIndexingInformation(message))
                            });
                        }
                    });
                }));

            SessionInner {
                system: RefCell::new(System::new(symbols.clone())),
                symbols: symbols.clone(),
                observers: RefCell::new(Vec::new()),
                remote: RefCell::new(None),
                message_loop,
                settings,
            }
        });
        Self { inner }
    }

    pub fn downgrade(&self) -> WeakSession {
        WeakSession {
            inner: Rc::downgrade(&self.inner),
        }
    }

    /// デバッグ対象の木
    ///
    /// 返された借用を保持したままセッションのメソッドを呼んではいけません。
    pub fn system(&self) -> Ref<'_, System> {
        self.inner.system.borrow()
    }

    pub fn symbols(&self) -> Rc<SymbolIndex> {
        self.inner.symbols.clone()
    }

    pub fn settings(&self) -> &Settings {
        &self.inner.settings
    }

    pub fn message_loop(&self) -> &MessageLoop {
        &self.inner.message_loop
    }

    pub fn add_observer(&self, observer: Rc<dyn SessionObserver>) {
        self.inner.observers.borrow_mut().push(observer);
    }

    pub fn remove_observer(&self, observer: &Rc<dyn SessionObserver>) {
        self.inner
            .observers
            .borrow_mut()
            .retain(|o| !std::ptr::addr_eq(Rc::as_ptr(o), Rc::as_ptr(observer)));
    }

    /// 状態を変更し、溜まった通知を配送する
    fn with_system<R>(&self, f: impl FnOnce(&mut System) -> R) -> R {
        let result = f(&mut self.inner.system.borrow_mut());
        self.flush_events();
        result
    }

    /// 通知は監視者一覧のスナップショットに対して配送する
    fn flush_events(&self) {
        loop {
            let events = self.inner.system.borrow_mut().take_events();
            if events.is_empty() {
                return;
            }
            let observers = self.inner.observers.borrow().clone();
            for event in &events {
                for observer in &observers {
                    event.dispatch(observer.as_ref());
                }
            }
        }
    }

    pub(crate) fn post_result<T: 'static>(&self, cb: Callback<T>, result: Result<T>) {
        self.inner.message_loop.post_task(move || cb(result));
    }

    // --------------------------------- connection ------------------------------------------------

    fn remote(&self) -> Result<Rc<dyn RemoteApi>> {
        self.inner.remote.borrow().clone().ok_or(Error::NotConnected)
    }

    pub fn is_connected(&self) -> bool {
        self.inner.remote.borrow().is_some()
    }

    /// エージェントに接続した
    pub fn connect(&self, remote: Rc<dyn RemoteApi>) {
        *self.inner.remote.borrow_mut() = Some(remote);
        self.did_connect();
    }

    /// エージェントとの接続を切る
    pub fn disconnect(&self) {
        self.inner.remote.borrow_mut().take();
        self.did_disconnect();
    }

    /// 接続先が変わったかもしれないので、ビルドIDのキャッシュを破棄する
    pub fn did_connect(&self) {
        self.inner.symbols.build_id_index().clear_cache();
        self.sync_all_breakpoints();
    }

    /// すべてのターゲットを強制的にデタッチ状態にする
    pub fn did_disconnect(&self) {
        self.with_system(|s| s.disconnected());
    }

    // --------------------------------- symbols ---------------------------------------------------

    /// モジュールのシンボルを読み込み、ブレークポイントを解決し直す
    pub fn load_module(&self, path: impl AsRef<Path>, load_address: u64) -> Result<Rc<ModuleSymbols>> {
        let module = self.inner.symbols.add_module(path, load_address)?;
        self.sync_all_breakpoints();
        Ok(module)
    }

    /// ビルドIDからモジュールを探して読み込む。対応表になければ `None`
    pub fn load_module_for_build_id(
        &self,
        build_id: &str,
        load_address: u64,
    ) -> Result<Option<Rc<ModuleSymbols>>> {
        let module = self
            .inner
            .symbols
            .add_module_for_build_id(build_id, load_address)?;
        if module.is_some() {
            self.sync_all_breakpoints();
        }
        Ok(module)
    }

    // --------------------------------- targets ---------------------------------------------------

    /// ターゲットを作成する。`clone_from` の起動引数を複製できる
    pub fn create_new_target(&self, clone_from: Option<TargetId>) -> Result<TargetId> {
        self.with_system(|s| s.create_target(clone_from))
    }

    /// ターゲットを削除する。アタッチ中ならデタッチしてから削除する
    pub fn delete_target(&self, id: TargetId) -> Result<()> {
        let detached = self.with_system(|s| s.remove_target(id))?;
        if let Some(koid) = detached {
            self.send_detach(AttachKind::Process, koid);
            self.sync_all_breakpoints();
        }
        Ok(())
    }

    pub fn set_target_args(&self, id: TargetId, args: Vec<String>) -> Result<()> {
        self.with_system(|s| {
            s.target_mut(id)
                .ok_or(Error::TargetNotFound(id))
                .map(|t| t.set_args(args))
        })
    }

    /// ターゲットの引数でプロセスを起動する。成功時はプロセスのkoidを返す
    pub fn launch(&self, target: TargetId, cb: Callback<Koid>) {
        let remote = match self.remote() {
            Ok(remote) => remote,
            Err(e) => return self.post_result(cb, Err(e)),
        };
        let argv = match self.with_system(|s| s.begin_start(target, TargetState::Starting)) {
            Ok(argv) => argv,
            Err(e) => return self.post_result(cb, Err(e)),
        };

        let weak = self.downgrade();
        remote.launch(
            LaunchRequest { argv },
            Box::new(move |result| {
                let Some(session) = weak.upgrade() else {
                    return;
                };
                let reply = result.map(|r| (r.status, r.process_koid, r.process_name));
                cb(session.on_start_reply(target, reply));
            }),
        );
    }

    /// 既存のプロセスにアタッチする
    pub fn attach(&self, target: TargetId, process_koid: Koid, cb: Callback<Koid>) {
        let remote = match self.remote() {
            Ok(remote) => remote,
            Err(e) => return self.post_result(cb, Err(e)),
        };
        if let Err(e) = self.with_system(|s| s.begin_start(target, TargetState::Attaching)) {
            return self.post_result(cb, Err(e));
        }

        let weak = self.downgrade();
        remote.attach(
            AttachRequest {
                kind: AttachKind::Process,
                koid: process_koid,
            },
            Box::new(move |result| {
                let Some(session) = weak.upgrade() else {
                    return;
                };
                let reply = result.map(|r| (r.status, r.koid, r.name));
                cb(session.on_start_reply(target, reply));
            }),
        );
    }

    /// 起動・アタッチの応答
    fn on_start_reply(
        &self,
        target: TargetId,
        reply: tsubame_ipc::Result<(i32, Koid, String)>,
    ) -> Result<Koid> {
        let started = reply.and_then(|(status, koid, name)| match status {
            0 => Ok((koid, name)),
            status => Err(IpcError::Status(status)),
        });
        let (koid, name) = match started {
            Ok(started) => started,
            Err(e) => {
                self.with_system(|s| s.abort_start(target));
                return Err(e.into());
            }
        };

        match self.with_system(|s| s.attach_process(target, koid, name)) {
            Ok(()) => {}
            Err(e @ Error::ProcessAlreadyAttached { .. }) => {
                // ジョブ経由で先に別のターゲットに割り当てられた。デタッチはしない
                self.with_system(|s| s.abort_start(target));
                return Err(e);
            }
            Err(e) => {
                // 応答待ちの間にターゲットが削除された
                self.send_detach(AttachKind::Process, koid);
                return Err(e);
            }
        }
        self.sync_all_breakpoints();
        Ok(koid)
    }

    /// プロセスからデタッチする
    pub fn detach(&self, target: TargetId, cb: Callback<()>) {
        let remote = match self.remote() {
            Ok(remote) => remote,
            Err(e) => return self.post_result(cb, Err(e)),
        };
        let detached = self.with_system(|s| {
            if s.target(target).is_none() {
                return Err(Error::TargetNotFound(target));
            }
            s.destroy_process(target).ok_or(Error::NoProcess(target))
        });
        let koid = match detached {
            Ok(koid) => koid,
            Err(e) => return self.post_result(cb, Err(e)),
        };
        self.sync_all_breakpoints();

        remote.detach(
            DetachRequest {
                kind: AttachKind::Process,
                koid,
            },
            Box::new(move |result| {
                cb(result
                    .and_then(|r| match r.status {
                        0 => Ok(()),
                        status => Err(IpcError::Status(status)),
                    })
                    .map_err(Error::from))
            }),
        );
    }

    /// 応答を待たないデタッチ要求
    fn send_detach(&self, kind: AttachKind, koid: Koid) {
        let Ok(remote) = self.remote() else {
            return;
        };
        remote.detach(
            DetachRequest { kind, koid },
            Box::new(move |result| {
                if let Err(e) = result {
                    tracing::warn!("Failed to detach from {}: {}", koid, e);
                }
            }),
        );
    }

    // --------------------------------- job contexts ----------------------------------------------

    pub fn create_new_job_context(&self, clone_from: Option<JobContextId>) -> Result<JobContextId> {
        self.with_system(|s| s.create_job_context(clone_from))
    }

    /// ジョブコンテキストを削除する。アタッチ中ならデタッチしてから削除する
    pub fn delete_job_context(&self, id: JobContextId) -> Result<()> {
        if let Some(job_koid) = self.with_system(|s| s.remove_job_context(id))? {
            self.send_detach(AttachKind::Job, job_koid);
        }
        Ok(())
    }

    /// ジョブにアタッチする。アタッチ後に現在のフィルタを送る
    pub fn attach_job(&self, id: JobContextId, job_koid: Koid, cb: Callback<()>) {
        let remote = match self.remote() {
            Ok(remote) => remote,
            Err(e) => return self.post_result(cb, Err(e)),
        };
        let started = self.with_system(|s| {
            let job_context = s.job_context_mut(id).ok_or(Error::JobContextNotFound(id))?;
            if job_context.state() != JobContextState::None {
                return Err(Error::JobContextBusy(id));
            }
            job_context.set_attaching(job_koid);
            Ok(())
        });
        if let Err(e) = started {
            return self.post_result(cb, Err(e));
        }

        let weak = self.downgrade();
        remote.attach(
            AttachRequest {
                kind: AttachKind::Job,
                koid: job_koid,
            },
            Box::new(move |result| {
                let Some(session) = weak.upgrade() else {
                    return;
                };
                let result = result.and_then(|r| match r.status {
                    0 => Ok(()),
                    status => Err(IpcError::Status(status)),
                });
                cb(session.on_job_attach_reply(id, job_koid, result));
            }),
        );
    }

    fn on_job_attach_reply(
        &self,
        id: JobContextId,
        job_koid: Koid,
        result: tsubame_ipc::Result<()>,
    ) -> Result<()> {
        if let Err(e) = result {
            self.with_system(|s| {
                if let Some(job_context) = s.job_context_mut(id) {
                    job_context.reset();
                }
            });
            return Err(e.into());
        }

        let filters = self.with_system(|s| {
            let job_context = s.job_context_mut(id)?;
            job_context.set_attached(job_koid);
            Some(job_context.filters().to_vec())
        });
        match filters {
            Some(filters) => {
                if !filters.is_empty() {
                    self.send_job_filters(job_koid, filters);
                }
                Ok(())
            }
            None => {
                self.send_detach(AttachKind::Job, job_koid);
                Err(Error::JobContextNotFound(id))
            }
        }
    }

    pub fn detach_job(&self, id: JobContextId, cb: Callback<()>) {
        let remote = match self.remote() {
            Ok(remote) => remote,
            Err(e) => return self.post_result(cb, Err(e)),
        };
        let detached = self.with_system(|s| {
            let job_context = s.job_context_mut(id).ok_or(Error::JobContextNotFound(id))?;
            let job_koid = match (job_context.state(), job_context.job_koid()) {
                (JobContextState::Attached, Some(koid)) => koid,
                _ => return Err(Error::JobNotAttached(id)),
            };
            job_context.reset();
            Ok(job_koid)
        });
        let job_koid = match detached {
            Ok(koid) => koid,
            Err(e) => return self.post_result(cb, Err(e)),
        };

        remote.detach(
            DetachRequest {
                kind: AttachKind::Job,
                koid: job_koid,
            },
            Box::new(move |result| cb(result.map(|_| ()).map_err(Error::from))),
        );
    }

    /// プロセス名フィルタを設定する。アタッチ中ならエージェントにも送る
    pub fn set_job_filters(&self, id: JobContextId, filters: Vec<String>) -> Result<()> {
        let attached = self.with_system(|s| -> Result<Option<Koid>> {
            let job_context = s.job_context_mut(id).ok_or(Error::JobContextNotFound(id))?;
            job_context.set_filters(filters.clone());
            Ok(match job_context.state() {
                JobContextState::Attached => job_context.job_koid(),
                _ => None,
            })
        })?;
        if let Some(job_koid) = attached {
            self.send_job_filters(job_koid, filters);
        }
        Ok(())
    }

    fn send_job_filters(&self, job_koid: Koid, filters: Vec<String>) {
        let Ok(remote) = self.remote() else {
            return;
        };
        remote.job_filter(
            JobFilterRequest { job_koid, filters },
            Box::new(move |result| match result {
                Ok(reply) if reply.status != 0 => {
                    tracing::warn!("Job {} rejected filters: status {}", job_koid, reply.status)
                }
                Ok(_) => {}
                Err(e) => tracing::warn!("Failed to set filters for job {}: {}", job_koid, e),
            }),
        );
    }

    // --------------------------------- breakpoints -----------------------------------------------

    pub fn create_new_breakpoint(&self) -> BreakpointId {
        self.with_system(|s| s.add_breakpoint(false))
    }

    /// ユーザーには見えず、通知もされないブレークポイント
    pub fn create_new_internal_breakpoint(&self) -> BreakpointId {
        self.with_system(|s| s.add_breakpoint(true))
    }

    /// ブレークポイントを削除する
    ///
    /// # Panics
    ///
    /// 登録されていないIDを渡した場合。
    pub fn delete_breakpoint(&self, id: BreakpointId) {
        let request = self.with_system(|s| s.remove_breakpoint(id));
        self.send_breakpoint_request(request, None);
    }

    /// 存在すれば削除する（コントローラの後始末用）
    pub(crate) fn delete_internal_breakpoint(&self, id: BreakpointId) {
        let request = self.with_system(|s| {
            s.breakpoint(id)?;
            s.remove_breakpoint(id)
        });
        self.send_breakpoint_request(request, None);
    }

    /// 設定を変更する。解決できた位置があれば設置される
    pub fn set_breakpoint_settings(&self, id: BreakpointId, settings: BreakpointSettings) -> Result<()> {
        if self.system().breakpoint(id).is_none() {
            return Err(Error::BreakpointNotFound(id));
        }
        self.update_breakpoint(id, settings, None);
        Ok(())
    }

    /// 設定を変更し、設置の応答を `on_reply` に通知する
    pub(crate) fn update_breakpoint(
        &self,
        id: BreakpointId,
        settings: BreakpointSettings,
        on_reply: Option<Callback<()>>,
    ) {
        let connected = self.is_connected();
        match self.with_system(|s| s.update_breakpoint(id, settings, connected)) {
            Ok(request) => self.send_breakpoint_request(request, on_reply),
            Err(e) => {
                if let Some(cb) = on_reply {
                    self.post_result(cb, Err(e));
                }
            }
        }
    }

    /// プロセスの増減やシンボルの追加に合わせて全ブレークポイントを送り直す
    fn sync_all_breakpoints(&self) {
        let connected = self.is_connected();
        let requests = self.with_system(|s| s.sync_all_breakpoints(connected));
        for request in requests {
            self.send_breakpoint_request(Some(request), None);
        }
    }

    /// 要求がない、または未接続なら `on_reply` には成功を通知する
    fn send_breakpoint_request(&self, request: Option<BreakpointRequest>, on_reply: Option<Callback<()>>) {
        let (Some(request), Ok(remote)) = (request, self.remote()) else {
            if let Some(cb) = on_reply {
                self.post_result(cb, Ok(()));
            }
            return;
        };

        match request {
            BreakpointRequest::AddOrChange(request) => {
                let id = request.breakpoint.breakpoint_id;
                remote.add_or_change_breakpoint(
                    request,
                    Box::new(move |result| {
                        let result = result
                            .and_then(|r| match r.status {
                                0 => Ok(()),
                                status => Err(IpcError::Status(status)),
                            })
                            .map_err(Error::from);
                        if let Err(e) = &result {
                            tracing::warn!("Failed to install breakpoint {}: {}", id, e);
                        }
                        if let Some(cb) = on_reply {
                            cb(result);
                        }
                    }),
                );
            }
            BreakpointRequest::Remove(request) => {
                let id = request.breakpoint_id;
                remote.remove_breakpoint(
                    request,
                    Box::new(move |result| {
                        if let Err(e) = &result {
                            tracing::warn!("Failed to remove breakpoint {}: {}", id, e);
                        }
                        if let Some(cb) = on_reply {
                            cb(result.map(|_| ()).map_err(Error::from));
                        }
                    }),
                );
            }
        }
    }

    // --------------------------------- execution control -----------------------------------------

    /// すべてのプロセスを一時停止する
    pub fn pause(&self) -> Result<()> {
        let remote = self.remote()?;
        remote.pause(
            PauseRequest {
                process_koid: 0,
                thread_koid: 0,
            },
            Box::new(|result| {
                if let Err(e) = result {
                    tracing::warn!("Failed to pause: {}", e);
                }
            }),
        );
        Ok(())
    }

    /// すべてのプロセスを再開する
    pub fn continue_all(&self) -> Result<()> {
        let remote = self.remote()?;
        self.with_system(|s| s.set_all_threads_running());
        remote.resume(
            ResumeRequest::default(),
            Box::new(|result| {
                if let Err(e) = result {
                    tracing::warn!("Failed to resume: {}", e);
                }
            }),
        );
        Ok(())
    }

    /// スタック先頭のコントローラに従ってスレッドを再開する
    pub fn continue_thread(&self, handle: ThreadHandle) -> Result<()> {
        let remote = self.remote()?;
        let op = self.with_system(|s| -> Result<ContinueOp> {
            let thread = s
                .thread_mut(handle)
                .ok_or(Error::ThreadNotFound(handle.thread_koid))?;
            let op = thread
                .top_controller()
                .map(|c| c.continue_op())
                .unwrap_or_default();
            thread.set_running();
            Ok(op)
        })?;
        Self::send_resume(&remote, handle, op);
        Ok(())
    }

    /// コントローラを積んで再開する
    ///
    /// コントローラの初期化が終わってからスレッドを再開し、`on_continue` に結果を通知します。
    /// 初期化に失敗した場合はコントローラを外し、スレッドは停止したままになります。
    pub fn continue_thread_with(
        &self,
        handle: ThreadHandle,
        mut controller: ThreadController,
        on_continue: Callback<()>,
    ) {
        let frames = match self.system().thread(handle) {
            Some(thread) => thread.frames().to_vec(),
            None => {
                return self.post_result(on_continue, Err(Error::ThreadNotFound(handle.thread_koid)))
            }
        };

        let id = controller.id();
        let weak = self.downgrade();
        let ctx = ControllerContext::new(self, handle, frames);
        controller.init(
            &ctx,
            Box::new(move |result| {
                let Some(session) = weak.upgrade() else {
                    return;
                };
                match result {
                    Ok(()) => on_continue(session.continue_thread(handle)),
                    Err(e) => {
                        session.notify_controller_done(handle, id);
                        on_continue(Err(e));
                    }
                }
            }),
        );

        // init の完了は必ずポストされるので、ここで積めば間に合う
        let orphan = self.with_system(|s| match s.thread_mut(handle) {
            Some(thread) => {
                thread.push_controller(controller);
                None
            }
            None => Some(controller),
        });
        if let Some(controller) = orphan {
            self.release_controller(controller);
        }
    }

    /// コントローラが完了した。スタックから外し、所有する内部ブレークポイントを削除する
    pub fn notify_controller_done(&self, handle: ThreadHandle, id: ControllerId) {
        let removed = self.with_system(|s| s.thread_mut(handle)?.remove_controller(id));
        if let Some(controller) = removed {
            self.release_controller(controller);
        }
    }

    fn release_controller(&self, controller: ThreadController) {
        for id in controller.owned_breakpoints() {
            self.delete_internal_breakpoint(id);
        }
    }

    fn send_resume(remote: &Rc<dyn RemoteApi>, handle: ThreadHandle, op: ContinueOp) {
        remote.resume(
            ResumeRequest {
                process_koid: handle.process_koid,
                thread_koids: vec![handle.thread_koid],
                how: op.how,
                range: op.range,
            },
            Box::new(move |result| {
                if let Err(e) = result {
                    tracing::warn!(
                        "Failed to resume thread {}/{}: {}",
                        handle.process_koid,
                        handle.thread_koid,
                        e
                    );
                }
            }),
        );
    }

    // --------------------------------- remote queries --------------------------------------------

    pub fn get_process_tree(&self, cb: Callback<ProcessTreeReply>) {
        match self.remote() {
            Ok(remote) => remote.process_tree(
                ProcessTreeRequest {},
                Box::new(move |result| cb(result.map_err(Error::from))),
            ),
            Err(e) => self.post_result(cb, Err(e)),
        }
    }

    /// プロセスのメモリを読む。読めなかった範囲は無効なブロックになる
    pub fn read_memory(&self, process_koid: Koid, address: u64, size: u32, cb: Callback<MemoryDump>) {
        match self.remote() {
            Ok(remote) => remote.read_memory(
                ReadMemoryRequest {
                    process_koid,
                    address,
                    size,
                },
                Box::new(move |result| cb(result.map(MemoryDump::from).map_err(Error::from))),
            ),
            Err(e) => self.post_result(cb, Err(e)),
        }
    }

    /// プロセスのメモリを読む式評価コンテキスト
    pub fn eval_context_for_process(&self, process_koid: Koid) -> Rc<ExprEvalContext> {
        let provider = ProcessDataProvider::new(self.downgrade(), process_koid);
        Rc::new(ExprEvalContext::new(self.symbols(), Rc::new(provider)))
    }

    // --------------------------------- notifications ---------------------------------------------

    /// エージェントからの通知を処理する
    pub fn dispatch_notification(&self, notification: Notification) {
        match notification {
            Notification::ProcessStarting { koid, name } => {
                match self.with_system(|s| s.adopt_process(koid, name)) {
                    Ok(_) => self.sync_all_breakpoints(),
                    Err(e) => tracing::warn!("Can't adopt process {}: {}", koid, e),
                }
            }
            Notification::ProcessExiting { koid, return_code } => {
                tracing::debug!("Process {} exited with code {}", koid, return_code);
                self.with_system(|s| {
                    if let Some(target) = s.target_for_process(koid) {
                        s.destroy_process(target);
                    }
                });
            }
            Notification::ThreadStarting {
                process_koid,
                record,
            } => {
                let handle = ThreadHandle::new(process_koid, record.koid);
                if !self.with_system(|s| s.add_or_update_thread(handle, &record)) {
                    tracing::warn!("Thread {} started in unknown process {}", record.koid, process_koid);
                }
            }
            Notification::ThreadExiting {
                process_koid,
                record,
            } => {
                let handle = ThreadHandle::new(process_koid, record.koid);
                for id in self.with_system(|s| s.remove_thread(handle)) {
                    self.delete_internal_breakpoint(id);
                }
            }
            Notification::Exception(exception) => self.on_exception(exception),
            Notification::ConnectionLost => self.disconnect(),
        }
    }

    /// スレッドが停止した。コントローラに投票させ、停止するか再開するかを決める
    fn on_exception(&self, exception: NotifyException) {
        let handle = ThreadHandle::new(exception.process_koid, exception.thread.koid);
        let known = self.with_system(|s| {
            s.record_hits(&exception.hit_breakpoints);
            s.add_or_update_thread(handle, &exception.thread)
        });
        if !known {
            tracing::warn!("Exception in unknown process {}", exception.process_koid);
            return;
        }

        let hit_breakpoints: Vec<BreakpointId> = exception
            .hit_breakpoints
            .iter()
            .map(|stats| BreakpointId::from_raw(stats.breakpoint_id))
            .collect();
        let user_hits: Vec<BreakpointId> = {
            let system = self.system();
            hit_breakpoints
                .iter()
                .copied()
                .filter(|id| system.breakpoint(*id).is_some_and(|bp| !bp.is_internal()))
                .collect()
        };

        // 評価中はコントローラがセッションを操作できるよう、スタックを取り出しておく
        let controllers = self
            .inner
            .system
            .borrow_mut()
            .thread_mut(handle)
            .map(|t| t.take_controllers())
            .unwrap_or_default();
        let stack_was_empty = controllers.is_empty();

        let stop = ThreadStop {
            exception_type: exception.exception_type,
            frames: exception.thread.frames.clone(),
            hit_breakpoints,
        };
        let ctx = ControllerContext::new(self, handle, stop.frames.clone());
        let decision = evaluate_thread_stop(&ctx, controllers, &stop);
        for controller in decision.removed {
            self.release_controller(controller);
        }

        let should_stop = decision.should_stop
            || stack_was_empty
            || !user_hits.is_empty()
            || !exception.exception_type.is_debug();

        let remaining = decision.remaining;
        let outcome = self.with_system(|s| match s.thread_mut(handle) {
            None => Err(remaining),
            Some(thread) => {
                thread.restore_controllers(remaining);
                if should_stop {
                    thread.set_stopped(exception.exception_type);
                    s.push_event(SystemEvent::ThreadStopped(
                        handle,
                        exception.exception_type,
                        user_hits,
                    ));
                    Ok(None)
                } else {
                    let op = thread
                        .top_controller()
                        .map(|c| c.continue_op())
                        .unwrap_or_default();
                    thread.set_running();
                    Ok(Some(op))
                }
            }
        });

        match outcome {
            Ok(Some(op)) => match self.remote() {
                Ok(remote) => Self::send_resume(&remote, handle, op),
                Err(e) => tracing::warn!("Can't resume thread {}: {}", handle.thread_koid, e),
            },
            Ok(None) => {}
            Err(orphaned) => {
                for controller in orphaned {
                    self.release_controller(controller);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use tsubame_ipc::{MockRemoteApi, RecordedRequest};

    fn connected_session() -> (Session, Rc<MockRemoteApi>, MessageLoop) {
        let message_loop = MessageLoop::new();
        let session = Session::new(message_loop.clone(), Settings::default());
        let remote = Rc::new(MockRemoteApi::new(message_loop.clone()));
        session.connect(remote.clone());
        (session, remote, message_loop)
    }

    #[test]
    fn test_launch_attaches_process_to_target() {
        let (session, remote, message_loop) = connected_session();
        let target = session.system().targets()[0].id();
        session.set_target_args(target, vec!["/bin/true".to_string()]).unwrap();

        let launched = Rc::new(Cell::new(None));
        let sink = launched.clone();
        session.launch(target, Box::new(move |result| sink.set(result.ok())));
        assert_eq!(
            session.system().target(target).unwrap().state(),
            TargetState::Starting
        );
        message_loop.run_until_idle();

        let koid = launched.get().unwrap();
        let system = session.system();
        assert_eq!(system.target(target).unwrap().state(), TargetState::Running);
        assert_eq!(system.process_from_koid(koid).unwrap().name(), "/bin/true");
        assert!(matches!(remote.requests()[0], RecordedRequest::Launch(_)));
    }

    #[test]
    fn test_failed_launch_resets_target() {
        let (session, remote, message_loop) = connected_session();
        remote.set_launch_status(-1);
        let target = session.system().targets()[0].id();

        let failed = Rc::new(Cell::new(false));
        let sink = failed.clone();
        session.launch(
            target,
            Box::new(move |result| sink.set(matches!(result, Err(Error::Remote(IpcError::Status(-1)))))),
        );
        message_loop.run_until_idle();

        assert!(failed.get());
        let system = session.system();
        assert_eq!(system.target(target).unwrap().state(), TargetState::None);
        assert!(system.target(target).unwrap().process().is_none());
    }

    #[test]
    fn test_launch_reply_for_adopted_process_keeps_it_attached() {
        let (session, remote, message_loop) = connected_session();
        remote.set_next_launch_koid(42);
        let launching = session.system().targets()[0].id();

        let result = Rc::new(RefCell::new(None));
        let sink = result.clone();
        session.launch(launching, Box::new(move |r| *sink.borrow_mut() = Some(r)));
        // 応答より先にジョブ経由の通知が届く
        session.dispatch_notification(Notification::ProcessStarting {
            koid: 42,
            name: "app".to_string(),
        });
        message_loop.run_until_idle();

        assert!(matches!(
            *result.borrow(),
            Some(Err(Error::ProcessAlreadyAttached { koid: 42, .. }))
        ));
        let system = session.system();
        let owners: Vec<TargetId> = system
            .targets()
            .iter()
            .filter(|t| t.process().is_some_and(|p| p.koid() == 42))
            .map(|t| t.id())
            .collect();
        assert_eq!(owners.len(), 1);
        assert_ne!(owners[0], launching);
        assert_eq!(system.target(launching).unwrap().state(), TargetState::None);
        assert!(!remote
            .requests()
            .iter()
            .any(|r| matches!(r, RecordedRequest::Detach(_))));
    }

    #[test]
    fn test_launch_reply_after_drop_is_ignored() {
        let (session, _remote, message_loop) = connected_session();
        let target = session.system().targets()[0].id();

        let called = Rc::new(Cell::new(false));
        let sink = called.clone();
        session.launch(target, Box::new(move |_| sink.set(true)));
        drop(session);
        message_loop.run_until_idle();

        assert!(!called.get());
    }

    #[test]
    fn test_launch_without_connection_fails() {
        let message_loop = MessageLoop::new();
        let session = Session::new(message_loop.clone(), Settings::default());
        let target = session.system().targets()[0].id();

        let result = Rc::new(RefCell::new(None));
        let sink = result.clone();
        session.launch(target, Box::new(move |r| *sink.borrow_mut() = Some(r)));
        message_loop.run_until_idle();

        assert!(matches!(*result.borrow(), Some(Err(Error::NotConnected))));
    }

    #[test]
    fn test_job_filters_sent_after_attach() {
        let (session, remote, message_loop) = connected_session();
        let job = session.system().job_contexts()[0].id();
        session.set_job_filters(job, vec!["foo".to_string()]).unwrap();
        assert!(remote.requests().is_empty());

        session.attach_job(job, 77, Box::new(|result| assert!(result.is_ok())));
        message_loop.run_until_idle();

        assert_eq!(
            session.system().job_context(job).unwrap().state(),
            JobContextState::Attached
        );
        assert_eq!(
            remote.requests().last(),
            Some(&RecordedRequest::JobFilter(JobFilterRequest {
                job_koid: 77,
                filters: vec!["foo".to_string()],
            }))
        );
    }
}
