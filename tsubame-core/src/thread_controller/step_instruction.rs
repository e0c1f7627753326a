//! 1命令ステップ

use super::{ContinueOp, ControllerContext, InitCallback, StopOp, ThreadStop};

/// 1命令だけ実行して停止する
#[derive(Debug, Default)]
pub struct StepInstruction {}

impl StepInstruction {
    pub fn new() -> Self {
        Self::default()
    }

    pub(super) fn init(&mut self, ctx: &ControllerContext<'_>, cb: InitCallback) {
        ctx.post_init_result(cb, Ok(()));
    }

    pub(super) fn continue_op(&self) -> ContinueOp {
        ContinueOp::step_instruction()
    }

    pub(super) fn on_thread_stop(&mut self, _stop: &ThreadStop) -> StopOp {
        StopOp::Stop
    }
}
