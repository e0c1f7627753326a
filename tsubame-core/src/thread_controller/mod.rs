//! スレッドコントローラ
//!
//! スレッドが停止するたびに、スレッドに積まれたコントローラが「続行」か「停止」を投票します。
//! 1つでも停止に投票すればスレッドは停止し、停止に投票したコントローラはスタックから外れます。
//! 全員が続行に投票した場合は、スタック先頭のコントローラが指定する方法で再開します。
//!
//! コントローラの判断は設定 `debug_thread_controllers` が有効なとき、
//! `thread_controller` ターゲットで `tracing` に出力されます。

mod step_in_range;
mod step_instruction;
mod step_over;
mod until;

pub use step_in_range::StepInRange;
pub use step_instruction::StepInstruction;
pub use step_over::StepOver;
pub use until::Until;

use crate::breakpoint::BreakpointId;
use crate::session::Session;
use crate::thread::ThreadHandle;
use crate::Result;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use tsubame_ipc::{AddressRange, ExceptionType, ResumeHow, StackFrame};
use tsubame_symbols::InputLocation;

static NEXT_CONTROLLER_ID: AtomicU32 = AtomicU32::new(1);

/// コントローラのID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ControllerId(u32);

impl ControllerId {
    fn next() -> Self {
        Self(NEXT_CONTROLLER_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ControllerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// 停止時の投票
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOp {
    Continue,
    Stop,
}

/// 再開方法
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ContinueOp {
    pub how: ResumeHow,
    /// `StepInRange` のときの範囲
    pub range: AddressRange,
}

impl ContinueOp {
    pub fn continue_execution() -> Self {
        Self::default()
    }

    pub fn step_instruction() -> Self {
        Self {
            how: ResumeHow::StepInstruction,
            range: AddressRange::default(),
        }
    }

    pub fn step_in_range(range: AddressRange) -> Self {
        Self {
            how: ResumeHow::StepInRange,
            range,
        }
    }
}

/// スレッドの停止情報
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ThreadStop {
    pub exception_type: ExceptionType,
    /// 先頭が最も内側のフレーム
    pub frames: Vec<StackFrame>,
    /// ヒットしたブレークポイント（内部ブレークポイントも含む）
    pub hit_breakpoints: Vec<BreakpointId>,
}

impl ThreadStop {
    pub fn ip(&self) -> u64 {
        self.frames.first().map(|f| f.ip).unwrap_or(0)
    }

    pub fn sp(&self) -> u64 {
        self.frames.first().map(|f| f.sp).unwrap_or(0)
    }

    pub fn is_single_step(&self) -> bool {
        self.exception_type == ExceptionType::SingleStep
    }
}

/// コントローラに渡される実行環境
pub struct ControllerContext<'a> {
    session: &'a Session,
    thread: ThreadHandle,
    /// コントローラを積んだ時点、または停止時点のフレーム
    frames: Vec<StackFrame>,
    log: bool,
}

impl<'a> ControllerContext<'a> {
    pub(crate) fn new(session: &'a Session, thread: ThreadHandle, frames: Vec<StackFrame>) -> Self {
        let log = session.settings().session.debug_thread_controllers;
        Self {
            session,
            thread,
            frames,
            log,
        }
    }

    pub fn session(&self) -> &Session {
        self.session
    }

    pub fn thread(&self) -> ThreadHandle {
        self.thread
    }

    pub fn frames(&self) -> &[StackFrame] {
        &self.frames
    }

    /// 初期化の完了をメッセージループ経由で通知する
    pub(crate) fn post_init_result(&self, cb: InitCallback, result: Result<()>) {
        self.session.message_loop().post_task(move || cb(result));
    }

    fn log(&self, controller: &str, message: fmt::Arguments<'_>) {
        if self.log {
            tracing::debug!(
                target: "thread_controller",
                "[{} {}/{}] {}",
                controller,
                self.thread.process_koid,
                self.thread.thread_koid,
                message
            );
        }
    }
}

/// 初期化完了の通知先
pub type InitCallback = Box<dyn FnOnce(Result<()>)>;

/// コントローラの種類
#[derive(Debug)]
pub enum ControllerKind {
    StepInstruction(StepInstruction),
    StepInRange(StepInRange),
    Until(Until),
    StepOver(StepOver),
}

/// スレッドコントローラ
#[derive(Debug)]
pub struct ThreadController {
    id: ControllerId,
    kind: ControllerKind,
}

impl ThreadController {
    fn new(kind: ControllerKind) -> Self {
        Self {
            id: ControllerId::next(),
            kind,
        }
    }

    /// 1命令だけ実行する
    pub fn step_instruction() -> Self {
        Self::new(ControllerKind::StepInstruction(StepInstruction::new()))
    }

    /// 範囲内にいる間ステップ実行する
    pub fn step_in_range(range: AddressRange) -> Self {
        Self::new(ControllerKind::StepInRange(StepInRange::new(range)))
    }

    /// 現在のソース行を抜けるまでステップ実行する（関数呼び出しには入る）
    pub fn step_into_line() -> Self {
        Self::new(ControllerKind::StepInRange(StepInRange::current_line()))
    }

    /// 範囲を抜けるまでステップ実行する（関数呼び出しは飛ばす）
    pub fn step_over(range: AddressRange) -> Self {
        Self::new(ControllerKind::StepOver(StepOver::new(range)))
    }

    /// 現在のソース行を抜けるまでステップ実行する（関数呼び出しは飛ばす）
    pub fn step_over_line() -> Self {
        Self::new(ControllerKind::StepOver(StepOver::current_line()))
    }

    /// 指定位置まで実行する
    pub fn until(location: InputLocation) -> Self {
        Self::new(ControllerKind::Until(Until::new(location)))
    }

    /// 現在の関数から戻るまで実行する
    pub fn finish() -> Self {
        Self::new(ControllerKind::Until(Until::finish()))
    }

    pub fn id(&self) -> ControllerId {
        self.id
    }

    pub fn kind(&self) -> &ControllerKind {
        &self.kind
    }

    pub fn name(&self) -> &'static str {
        match &self.kind {
            ControllerKind::StepInstruction(_) => "StepInstruction",
            ControllerKind::StepInRange(_) => "StepInRange",
            ControllerKind::Until(_) => "Until",
            ControllerKind::StepOver(_) => "StepOver",
        }
    }

    /// コントローラを初期化する
    ///
    /// `cb` は必ずメッセージループ経由で呼ばれます。失敗した場合、呼び出し側は
    /// コントローラをスタックから外し、スレッドを停止したままにします。
    pub fn init(&mut self, ctx: &ControllerContext<'_>, cb: InitCallback) {
        ctx.log(self.name(), format_args!("init"));
        match &mut self.kind {
            ControllerKind::StepInstruction(c) => c.init(ctx, cb),
            ControllerKind::StepInRange(c) => c.init(ctx, cb),
            ControllerKind::Until(c) => c.init(ctx, cb),
            ControllerKind::StepOver(c) => c.init(ctx, cb),
        }
    }

    /// スレッドの再開方法
    pub fn continue_op(&self) -> ContinueOp {
        match &self.kind {
            ControllerKind::StepInstruction(c) => c.continue_op(),
            ControllerKind::StepInRange(c) => c.continue_op(),
            ControllerKind::Until(c) => c.continue_op(),
            ControllerKind::StepOver(c) => c.continue_op(),
        }
    }

    /// スレッドが停止したときの投票
    pub fn on_thread_stop(&mut self, ctx: &ControllerContext<'_>, stop: &ThreadStop) -> StopOp {
        let op = match &mut self.kind {
            ControllerKind::StepInstruction(c) => c.on_thread_stop(stop),
            ControllerKind::StepInRange(c) => c.on_thread_stop(stop),
            ControllerKind::Until(c) => c.on_thread_stop(stop),
            ControllerKind::StepOver(c) => c.on_thread_stop(ctx, stop),
        };
        ctx.log(
            self.name(),
            format_args!("{:?} at 0x{:x} ({:?}) -> {:?}", self.id, stop.ip(), stop.exception_type, op),
        );
        op
    }

    /// このコントローラが所有する内部ブレークポイント
    pub fn owned_breakpoints(&self) -> Vec<BreakpointId> {
        match &self.kind {
            ControllerKind::Until(c) => c.breakpoint().into_iter().collect(),
            ControllerKind::StepOver(c) => c.owned_breakpoints(),
            ControllerKind::StepInstruction(_) | ControllerKind::StepInRange(_) => Vec::new(),
        }
    }
}

/// コントローラスタックの評価結果
#[derive(Debug)]
pub struct StopDecision {
    /// 1つ以上のコントローラが停止に投票した
    pub should_stop: bool,
    /// 続行に投票したコントローラ（スタック順）
    pub remaining: Vec<ThreadController>,
    /// 停止に投票して外れたコントローラ
    pub removed: Vec<ThreadController>,
}

impl StopDecision {
    /// 再開するときの方法（スタック先頭のコントローラに従う）
    pub fn continue_op(&self) -> Option<ContinueOp> {
        if self.should_stop {
            return None;
        }
        Some(
            self.remaining
                .last()
                .map(|c| c.continue_op())
                .unwrap_or_default(),
        )
    }
}

/// スタック上のすべてのコントローラに投票させる
///
/// 途中で停止の投票があっても残りのコントローラは評価されます。
pub fn evaluate_thread_stop(
    ctx: &ControllerContext<'_>,
    controllers: Vec<ThreadController>,
    stop: &ThreadStop,
) -> StopDecision {
    let mut remaining = Vec::with_capacity(controllers.len());
    let mut removed = Vec::new();

    for mut controller in controllers {
        match controller.on_thread_stop(ctx, stop) {
            StopOp::Continue => remaining.push(controller),
            StopOp::Stop => removed.push(controller),
        }
    }

    StopDecision {
        should_stop: !removed.is_empty(),
        remaining,
        removed,
    }
}
