//! 範囲ステップ

use super::{ContinueOp, ControllerContext, InitCallback, StopOp, ThreadStop};
use crate::Error;
use tsubame_ipc::AddressRange;

/// 命令ポインタが範囲内にある間ステップ実行する
///
/// 範囲を指定しなかった場合は、初期化時に現在のソース行の範囲を求めます。
#[derive(Debug)]
pub struct StepInRange {
    range: Option<AddressRange>,
}

impl StepInRange {
    pub fn new(range: AddressRange) -> Self {
        Self { range: Some(range) }
    }

    /// 現在のソース行
    pub fn current_line() -> Self {
        Self { range: None }
    }

    pub fn range(&self) -> Option<AddressRange> {
        self.range
    }

    pub(super) fn init(&mut self, ctx: &ControllerContext<'_>, cb: InitCallback) {
        let result = match self.range {
            Some(_) => Ok(()),
            None => current_line_range(ctx).map(|range| self.range = Some(range)),
        };
        ctx.post_init_result(cb, result);
    }

    pub(super) fn continue_op(&self) -> ContinueOp {
        ContinueOp::step_in_range(self.range.unwrap_or_default())
    }

    pub(super) fn on_thread_stop(&mut self, stop: &ThreadStop) -> StopOp {
        let in_range = self.range.is_some_and(|r| r.contains(stop.ip()));
        if stop.is_single_step() && in_range {
            StopOp::Continue
        } else {
            StopOp::Stop
        }
    }
}

/// 現在の命令ポインタを含むソース行の範囲
pub(super) fn current_line_range(ctx: &ControllerContext<'_>) -> crate::Result<AddressRange> {
    let ip = ctx
        .frames()
        .first()
        .map(|f| f.ip)
        .ok_or(Error::ThreadNotStopped(ctx.thread().thread_koid))?;
    let range = ctx
        .session()
        .symbols()
        .line_range_for_address(ip)
        .ok_or_else(|| Error::NoLocation(format!("0x{:x}", ip)))?;
    Ok(AddressRange::new(range.start, range.end))
}
