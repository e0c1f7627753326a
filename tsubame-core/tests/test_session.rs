//! セッションの生成・破棄と監視者への通知のテスト

use std::cell::RefCell;
use std::rc::Rc;
use tsubame_core::{
    BreakpointId, BreakpointSettings, InputLocation, JobContextId, Koid, MessageLoop, Notification,
    Session, SessionObserver, Settings, TargetId, TargetState, ThreadHandle, WeakSession,
};
use tsubame_ipc::{
    AttachKind, DetachRequest, ExceptionType, MockRemoteApi, NotifyException, RecordedRequest,
    ThreadRecord,
};

/// 通知を文字列として記録する
#[derive(Default)]
struct RecordingObserver {
    events: RefCell<Vec<String>>,
}

impl RecordingObserver {
    fn events(&self) -> Vec<String> {
        self.events.borrow().clone()
    }

    fn push(&self, event: String) {
        self.events.borrow_mut().push(event);
    }
}

impl SessionObserver for RecordingObserver {
    fn did_create_target(&self, target: TargetId) {
        self.push(format!("create target {}", target));
    }
    fn will_destroy_target(&self, target: TargetId) {
        self.push(format!("destroy target {}", target));
    }
    fn did_create_job_context(&self, job_context: JobContextId) {
        self.push(format!("create job {}", job_context));
    }
    fn will_destroy_job_context(&self, job_context: JobContextId) {
        self.push(format!("destroy job {}", job_context));
    }
    fn did_create_breakpoint(&self, breakpoint: BreakpointId) {
        self.push(format!("create breakpoint {}", breakpoint));
    }
    fn will_destroy_breakpoint(&self, breakpoint: BreakpointId) {
        self.push(format!("destroy breakpoint {}", breakpoint));
    }
    fn did_create_process(&self, target: TargetId, process_koid: Koid) {
        self.push(format!("create process {} in {}", process_koid, target));
    }
    fn will_destroy_process(&self, target: TargetId, process_koid: Koid) {
        self.push(format!("destroy process {} in {}", process_koid, target));
    }
    fn on_thread_stopped(
        &self,
        thread: ThreadHandle,
        exception: ExceptionType,
        breakpoints: &[BreakpointId],
    ) {
        let ids: Vec<u32> = breakpoints.iter().map(|b| b.value()).collect();
        self.push(format!(
            "stopped {}/{} {:?} {:?}",
            thread.process_koid, thread.thread_koid, exception, ids
        ));
    }
    fn on_symbol_indexing_information(&self, message: &str) {
        self.push(format!("info {}", message));
    }
}

fn session_with_observer() -> (Session, Rc<RecordingObserver>, MessageLoop) {
    let message_loop = MessageLoop::new();
    let session = Session::new(message_loop.clone(), Settings::default());
    let observer = Rc::new(RecordingObserver::default());
    session.add_observer(observer.clone());
    (session, observer, message_loop)
}

fn start_process(session: &Session, koid: Koid) {
    session.dispatch_notification(Notification::ProcessStarting {
        koid,
        name: format!("process-{}", koid),
    });
}

#[test]
fn test_breakpoint_ids_are_never_reused() {
    let (session, _observer, _message_loop) = session_with_observer();

    let first = session.create_new_breakpoint();
    session.delete_breakpoint(first);
    let second = session.create_new_breakpoint();
    let internal = session.create_new_internal_breakpoint();

    assert_ne!(first, second);
    assert!(second > first);
    assert!(internal > second);
}

#[test]
fn test_internal_breakpoints_are_hidden() {
    let (session, observer, _message_loop) = session_with_observer();

    let internal: Vec<BreakpointId> = (0..3).map(|_| session.create_new_internal_breakpoint()).collect();
    let user: Vec<BreakpointId> = (0..2).map(|_| session.create_new_breakpoint()).collect();
    assert_eq!(session.system().breakpoints().len(), 2);
    assert_eq!(observer.events().len(), 2, "only user breakpoints notify creation");

    session.delete_breakpoint(internal[0]);
    assert_eq!(observer.events().len(), 2, "deleting an internal breakpoint is silent");

    session.delete_breakpoint(user[0]);
    let destroyed: Vec<String> = observer
        .events()
        .into_iter()
        .filter(|e| e.starts_with("destroy breakpoint"))
        .collect();
    assert_eq!(destroyed, vec![format!("destroy breakpoint {}", user[0])]);
    assert_eq!(session.system().breakpoints().len(), 1);
}

#[test]
#[should_panic(expected = "not registered with the session")]
fn test_deleting_unknown_breakpoint_panics() {
    let (session, _observer, _message_loop) = session_with_observer();
    let id = session.create_new_breakpoint();
    session.delete_breakpoint(id);
    session.delete_breakpoint(id);
}

#[test]
fn test_teardown_destroys_processes_before_targets() {
    let (session, observer, _message_loop) = session_with_observer();
    start_process(&session, 10);
    start_process(&session, 11);
    session.create_new_breakpoint();
    let targets: Vec<TargetId> = session.system().targets().iter().map(|t| t.id()).collect();
    assert_eq!(targets.len(), 2);

    let before = observer.events().len();
    drop(session);
    let events = observer.events()[before..].to_vec();

    for (target, koid) in targets.iter().zip([10, 11]) {
        let process = events
            .iter()
            .position(|e| *e == format!("destroy process {} in {}", koid, target))
            .expect("process destruction should be notified");
        let destroyed = events
            .iter()
            .position(|e| *e == format!("destroy target {}", target))
            .expect("target destruction should be notified");
        assert!(process < destroyed);
    }
    assert!(events.iter().any(|e| e.starts_with("destroy job")));
    assert!(events.iter().any(|e| e.starts_with("destroy breakpoint")));
}

#[test]
fn test_cannot_delete_last_target_or_job_context() {
    let (session, observer, _message_loop) = session_with_observer();
    let target = session.system().targets()[0].id();
    assert!(session.delete_target(target).is_err());

    let clone = session.create_new_target(Some(target)).unwrap();
    session.delete_target(target).unwrap();
    assert_eq!(session.system().targets()[0].id(), clone);

    let job = session.system().job_contexts()[0].id();
    assert!(session.delete_job_context(job).is_err());
    let second_job = session.create_new_job_context(Some(job)).unwrap();
    session.delete_job_context(second_job).unwrap();

    assert_eq!(
        observer.events(),
        vec![
            format!("create target {}", clone),
            format!("destroy target {}", target),
            format!("create job {}", second_job),
            format!("destroy job {}", second_job),
        ]
    );
}

#[test]
fn test_deleting_attached_target_detaches_first() {
    let (session, observer, message_loop) = session_with_observer();
    let remote = Rc::new(MockRemoteApi::new(message_loop.clone()));
    session.connect(remote.clone());
    start_process(&session, 10);
    let first = session.system().targets()[0].id();
    session.create_new_target(None).unwrap();

    session.delete_target(first).unwrap();

    assert!(remote.requests().contains(&RecordedRequest::Detach(DetachRequest {
        kind: AttachKind::Process,
        koid: 10,
    })));
    let events = observer.events();
    let process = events
        .iter()
        .position(|e| *e == format!("destroy process 10 in {}", first))
        .expect("process destruction should be notified");
    let target = events
        .iter()
        .position(|e| *e == format!("destroy target {}", first))
        .expect("target destruction should be notified");
    assert!(process < target);
}

/// 通知の中からセッションを操作する監視者
#[derive(Default)]
struct ReentrantObserver {
    session: RefCell<Option<WeakSession>>,
    created: RefCell<Vec<BreakpointId>>,
}

impl SessionObserver for ReentrantObserver {
    fn did_create_target(&self, _target: TargetId) {
        let session = self.session.borrow().as_ref().and_then(|s| s.upgrade());
        if let Some(session) = session {
            let id = session.create_new_breakpoint();
            session
                .set_breakpoint_settings(
                    id,
                    BreakpointSettings {
                        location: Some(InputLocation::Address(0x1000)),
                        ..BreakpointSettings::default()
                    },
                )
                .expect("breakpoint was just created");
        }
    }

    fn did_create_breakpoint(&self, breakpoint: BreakpointId) {
        self.created.borrow_mut().push(breakpoint);
    }
}

#[test]
fn test_observer_can_reenter_session() {
    let message_loop = MessageLoop::new();
    let session = Session::new(message_loop, Settings::default());
    let observer = Rc::new(ReentrantObserver::default());
    *observer.session.borrow_mut() = Some(session.downgrade());
    session.add_observer(observer.clone());

    session.create_new_target(None).unwrap();

    let system = session.system();
    assert_eq!(system.targets().len(), 2);
    assert_eq!(system.breakpoints().len(), 1);
    assert_eq!(observer.created.borrow().len(), 1);
    assert_eq!(system.breakpoints()[0].addresses(), &[0x1000]);
}

#[test]
fn test_removed_observer_is_not_notified() {
    let (session, observer, _message_loop) = session_with_observer();
    let as_dyn: Rc<dyn SessionObserver> = observer.clone();
    session.remove_observer(&as_dyn);
    session.create_new_target(None).unwrap();
    assert!(observer.events().is_empty());
}

#[test]
fn test_thread_stop_reports_only_user_breakpoints() {
    let (session, observer, message_loop) = session_with_observer();
    let remote = Rc::new(MockRemoteApi::new(message_loop.clone()));
    session.connect(remote.clone());
    start_process(&session, 10);

    let user = session.create_new_breakpoint();
    session
        .set_breakpoint_settings(
            user,
            BreakpointSettings {
                location: Some(InputLocation::Address(0x1000)),
                ..BreakpointSettings::default()
            },
        )
        .unwrap();
    let internal = session.create_new_internal_breakpoint();
    assert!(remote
        .requests()
        .iter()
        .any(|r| matches!(r, RecordedRequest::AddOrChangeBreakpoint(req) if req.breakpoint.breakpoint_id == user.value())));

    session.dispatch_notification(Notification::Exception(NotifyException {
        process_koid: 10,
        thread: ThreadRecord::stopped(5, vec![tsubame_ipc::StackFrame::new(0x1000, 0x7000)]),
        exception_type: ExceptionType::Software,
        hit_breakpoints: vec![
            tsubame_ipc::BreakpointStats {
                breakpoint_id: user.value(),
                hit_count: 1,
            },
            tsubame_ipc::BreakpointStats {
                breakpoint_id: internal.value(),
                hit_count: 1,
            },
        ],
    }));

    assert_eq!(
        observer.events().last(),
        Some(&format!("stopped 10/5 Software [{}]", user))
    );
    let system = session.system();
    assert_eq!(system.breakpoint(user).unwrap().hit_count(), 1);
    assert!(system.thread(ThreadHandle::new(10, 5)).unwrap().is_stopped());
}

#[test]
fn test_repeated_process_starting_keeps_single_owner() {
    let (session, observer, _message_loop) = session_with_observer();
    start_process(&session, 42);
    start_process(&session, 42);

    let system = session.system();
    let owners = system
        .targets()
        .iter()
        .filter(|t| t.process().is_some_and(|p| p.koid() == 42))
        .count();
    assert_eq!(owners, 1);
    assert_eq!(system.targets().len(), 1);
    let created = observer
        .events()
        .into_iter()
        .filter(|e| e.starts_with("create process 42"))
        .count();
    assert_eq!(created, 1);
}

#[test]
fn test_connection_lost_detaches_everything() {
    let (session, observer, message_loop) = session_with_observer();
    let remote = Rc::new(MockRemoteApi::new(message_loop.clone()));
    session.connect(remote);
    start_process(&session, 10);
    let target = session.system().targets()[0].id();

    session.dispatch_notification(Notification::ConnectionLost);

    assert!(!session.is_connected());
    let system = session.system();
    assert!(system.process_from_koid(10).is_none());
    assert_eq!(system.target(target).unwrap().state(), TargetState::None);
    assert!(observer
        .events()
        .contains(&format!("destroy process 10 in {}", target)));
}

#[test]
fn test_symbol_indexing_information_is_forwarded() {
    let message_loop = MessageLoop::new();
    let settings = Settings::from_toml_str(
        r#"
        [symbols]
        build_id_files = ["/nonexistent/tsubame/ids.txt"]
        "#,
    )
    .unwrap();
    let session = Session::new(message_loop.clone(), settings);
    let observer = Rc::new(RecordingObserver::default());
    session.add_observer(observer.clone());

    assert!(session.load_module_for_build_id("abcd", 0).unwrap().is_none());
    message_loop.run_until_idle();

    let events = observer.events();
    assert_eq!(events.len(), 1);
    assert!(events[0].starts_with("info Can't open build ID file"));
}

#[test]
fn test_reconnect_reloads_build_id_files() {
    let dir = std::env::temp_dir().join(format!("tsubame-build-ids-{}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    let ids = dir.join("ids.txt");
    std::fs::write(&ids, "abcd /out/first/libfoo.so\n").unwrap();

    let message_loop = MessageLoop::new();
    let settings = Settings::from_toml_str(&format!(
        "[symbols]\nbuild_id_files = [\"{}\"]\n",
        ids.display()
    ))
    .unwrap();
    let session = Session::new(message_loop.clone(), settings);
    session.connect(Rc::new(MockRemoteApi::new(message_loop.clone())));

    let lookup = |session: &Session| session.symbols().build_id_index().file_for_build_id("ABCD");
    assert_eq!(lookup(&session), Some("/out/first/libfoo.so".into()));

    // 接続中はキャッシュが使われる
    std::fs::write(&ids, "abcd /out/second/libfoo.so\n").unwrap();
    assert_eq!(lookup(&session), Some("/out/first/libfoo.so".into()));

    session.connect(Rc::new(MockRemoteApi::new(message_loop.clone())));
    assert!(!session.symbols().build_id_index().is_cached());
    assert_eq!(lookup(&session), Some("/out/second/libfoo.so".into()));

    std::fs::remove_dir_all(&dir).unwrap();
}
