//! スレッドコントローラによるステップ実行のテスト
//!
//! モックのエージェントに停止通知を送り、セッションが再開するか停止するかを確認します。

use std::cell::RefCell;
use std::rc::Rc;
use tsubame_core::{
    Error, MessageLoop, Notification, Session, Settings, ThreadController, ThreadHandle,
};
use tsubame_ipc::{
    AddressRange, BreakpointStats, ExceptionType, MockRemoteApi, NotifyException, RecordedRequest,
    ResumeHow, StackFrame, ThreadRecord,
};

const PROCESS: u64 = 10;
const THREAD: u64 = 5;

struct Fixture {
    session: Session,
    remote: Rc<MockRemoteApi>,
    message_loop: MessageLoop,
}

impl Fixture {
    /// スレッドが1つ停止しているプロセスにアタッチした状態
    fn new(frames: Vec<StackFrame>) -> Self {
        let message_loop = MessageLoop::new();
        let session = Session::new(message_loop.clone(), Settings::default());
        let remote = Rc::new(MockRemoteApi::new(message_loop.clone()));
        session.connect(remote.clone());

        session.dispatch_notification(Notification::ProcessStarting {
            koid: PROCESS,
            name: "app".to_string(),
        });
        session.dispatch_notification(Notification::ThreadStarting {
            process_koid: PROCESS,
            record: ThreadRecord::stopped(THREAD, frames),
        });
        remote.take_requests();

        Self {
            session,
            remote,
            message_loop,
        }
    }

    fn handle(&self) -> ThreadHandle {
        ThreadHandle::new(PROCESS, THREAD)
    }

    /// コントローラを積んで再開し、結果を返す
    fn continue_with(&self, controller: ThreadController) -> Rc<RefCell<Option<Result<(), Error>>>> {
        let result = Rc::new(RefCell::new(None));
        let sink = result.clone();
        self.session.continue_thread_with(
            self.handle(),
            controller,
            Box::new(move |r| *sink.borrow_mut() = Some(r)),
        );
        self.message_loop.run_until_idle();
        result
    }

    fn stop(&self, exception_type: ExceptionType, frames: Vec<StackFrame>, hits: &[u32]) {
        self.session
            .dispatch_notification(Notification::Exception(NotifyException {
                process_koid: PROCESS,
                thread: ThreadRecord::stopped(THREAD, frames),
                exception_type,
                hit_breakpoints: hits
                    .iter()
                    .map(|&breakpoint_id| BreakpointStats {
                        breakpoint_id,
                        hit_count: 1,
                    })
                    .collect(),
            }));
        self.message_loop.run_until_idle();
    }

    fn last_resume_how(&self) -> Option<ResumeHow> {
        self.remote.resume_requests().last().map(|r| r.how)
    }

    fn is_stopped(&self) -> bool {
        self.session
            .system()
            .thread(self.handle())
            .map(|t| t.is_stopped())
            .unwrap_or(false)
    }

    fn controller_count(&self) -> usize {
        self.session
            .system()
            .thread(self.handle())
            .map(|t| t.controllers().len())
            .unwrap_or(0)
    }

    /// 最後に設置された内部ブレークポイントのIDとアドレス
    fn last_installed(&self) -> (u32, u64) {
        self.remote
            .requests()
            .iter()
            .rev()
            .find_map(|r| match r {
                RecordedRequest::AddOrChangeBreakpoint(request) => Some((
                    request.breakpoint.breakpoint_id,
                    request.breakpoint.locations[0].address,
                )),
                _ => None,
            })
            .expect("a breakpoint should have been installed")
    }
}

#[test]
fn test_step_instruction_stops_after_one_step() {
    let fixture = Fixture::new(vec![StackFrame::new(0x1000, 0x7000)]);

    let result = fixture.continue_with(ThreadController::step_instruction());
    assert!(matches!(*result.borrow(), Some(Ok(()))));
    assert_eq!(fixture.last_resume_how(), Some(ResumeHow::StepInstruction));
    assert!(!fixture.is_stopped());

    fixture.stop(ExceptionType::SingleStep, vec![StackFrame::new(0x1003, 0x7000)], &[]);
    assert!(fixture.is_stopped());
    assert_eq!(fixture.controller_count(), 0);
    assert_eq!(fixture.remote.resume_requests().len(), 1);
}

#[test]
fn test_step_in_range_continues_until_leaving_range() {
    let fixture = Fixture::new(vec![StackFrame::new(0x1000, 0x7000)]);
    let range = AddressRange::new(0x1000, 0x1010);

    fixture.continue_with(ThreadController::step_in_range(range));
    let first = fixture.remote.resume_requests()[0].clone();
    assert_eq!(first.how, ResumeHow::StepInRange);
    assert_eq!(first.range, range);
    assert_eq!(first.thread_koids, vec![THREAD]);

    // 範囲内の停止は自動で再開される
    fixture.stop(ExceptionType::SingleStep, vec![StackFrame::new(0x1004, 0x7000)], &[]);
    assert!(!fixture.is_stopped());
    assert_eq!(fixture.remote.resume_requests().len(), 2);

    fixture.stop(ExceptionType::SingleStep, vec![StackFrame::new(0x1010, 0x7000)], &[]);
    assert!(fixture.is_stopped());
    assert_eq!(fixture.remote.resume_requests().len(), 2);
}

#[test]
fn test_general_exception_overrides_continue_votes() {
    let fixture = Fixture::new(vec![
        StackFrame::new(0x1000, 0x7000),
        StackFrame::new(0x2000, 0x7100),
    ]);
    fixture.continue_with(ThreadController::finish());

    // 戻り先のブレークポイントではないので finish は続行に投票する
    fixture.stop(ExceptionType::General, vec![StackFrame::new(0x1004, 0x7000)], &[]);
    assert!(fixture.is_stopped());
    // 続行に投票したコントローラはスタックに残る
    assert_eq!(fixture.controller_count(), 1);
}

#[test]
fn test_step_in_range_stops_on_other_exceptions() {
    let fixture = Fixture::new(vec![StackFrame::new(0x1000, 0x7000)]);
    fixture.continue_with(ThreadController::step_in_range(AddressRange::new(0x1000, 0x2000)));

    // 範囲内でもシングルステップ以外の停止では停止し、コントローラは外れる
    fixture.stop(ExceptionType::General, vec![StackFrame::new(0x1004, 0x7000)], &[]);
    assert!(fixture.is_stopped());
    assert_eq!(fixture.controller_count(), 0);
}

#[test]
fn test_finish_stops_at_return_address_in_caller_frame() {
    let fixture = Fixture::new(vec![
        StackFrame::new(0x1000, 0x7000),
        StackFrame::new(0x2000, 0x7100),
    ]);

    let result = fixture.continue_with(ThreadController::finish());
    assert!(matches!(*result.borrow(), Some(Ok(()))));
    let (breakpoint, address) = fixture.last_installed();
    assert_eq!(address, 0x2000);
    assert!(fixture.session.system().breakpoints().is_empty());
    assert_eq!(fixture.last_resume_how(), Some(ResumeHow::Continue));

    // 再帰呼び出しの内側で同じアドレスに来た場合は続行する
    fixture.stop(ExceptionType::Software, vec![StackFrame::new(0x2000, 0x6f00)], &[breakpoint]);
    assert!(!fixture.is_stopped());

    fixture.stop(ExceptionType::Software, vec![StackFrame::new(0x2000, 0x7100)], &[breakpoint]);
    assert!(fixture.is_stopped());
    assert_eq!(fixture.controller_count(), 0);
    assert!(fixture
        .remote
        .requests()
        .iter()
        .any(|r| matches!(r, RecordedRequest::RemoveBreakpoint(req) if req.breakpoint_id == breakpoint)));
}

#[test]
fn test_finish_without_caller_frame_fails() {
    let fixture = Fixture::new(vec![StackFrame::new(0x1000, 0x7000)]);

    let result = fixture.continue_with(ThreadController::finish());
    assert!(matches!(*result.borrow(), Some(Err(Error::NotEnoughFrames(1)))));
    assert!(fixture.is_stopped());
    assert_eq!(fixture.controller_count(), 0);
    assert!(fixture.remote.resume_requests().is_empty());
}

#[test]
fn test_step_over_skips_called_function() {
    let fixture = Fixture::new(vec![StackFrame::new(0x1000, 0x7000)]);
    let range = AddressRange::new(0x1000, 0x1010);

    fixture.continue_with(ThreadController::step_over(range));
    assert_eq!(fixture.last_resume_how(), Some(ResumeHow::StepInRange));

    // call 命令で関数に入った
    fixture.stop(
        ExceptionType::SingleStep,
        vec![StackFrame::new(0x5000, 0x6ff8), StackFrame::new(0x1005, 0x7000)],
        &[],
    );
    assert!(!fixture.is_stopped());
    let (breakpoint, address) = fixture.last_installed();
    assert_eq!(address, 0x1005);
    assert_eq!(fixture.last_resume_how(), Some(ResumeHow::Continue));

    // 戻り先に到達したら範囲ステップに戻る
    fixture.stop(ExceptionType::Software, vec![StackFrame::new(0x1005, 0x7000)], &[breakpoint]);
    assert!(!fixture.is_stopped());
    assert_eq!(fixture.last_resume_how(), Some(ResumeHow::StepInRange));
    assert!(fixture
        .remote
        .requests()
        .iter()
        .any(|r| matches!(r, RecordedRequest::RemoveBreakpoint(req) if req.breakpoint_id == breakpoint)));

    fixture.stop(ExceptionType::SingleStep, vec![StackFrame::new(0x1010, 0x7000)], &[]);
    assert!(fixture.is_stopped());
    assert_eq!(fixture.controller_count(), 0);
}

#[test]
fn test_thread_exit_removes_controller_breakpoints() {
    let fixture = Fixture::new(vec![
        StackFrame::new(0x1000, 0x7000),
        StackFrame::new(0x2000, 0x7100),
    ]);
    fixture.continue_with(ThreadController::until(tsubame_core::InputLocation::Address(0x3000)));
    let (breakpoint, _) = fixture.last_installed();

    fixture.session.dispatch_notification(Notification::ThreadExiting {
        process_koid: PROCESS,
        record: ThreadRecord::new(THREAD, ""),
    });

    assert!(fixture.session.system().thread(fixture.handle()).is_none());
    assert!(fixture
        .remote
        .requests()
        .iter()
        .any(|r| matches!(r, RecordedRequest::RemoveBreakpoint(req) if req.breakpoint_id == breakpoint)));
}
