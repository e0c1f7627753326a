//! ステップオーバー

use super::step_in_range::current_line_range;
use super::{ContinueOp, ControllerContext, InitCallback, StopOp, ThreadStop, Until};
use crate::breakpoint::BreakpointId;
use tsubame_ipc::AddressRange;
use tsubame_symbols::InputLocation;

/// 範囲内をステップ実行し、関数呼び出しに入ったら戻り先まで実行する
#[derive(Debug)]
pub struct StepOver {
    range: Option<AddressRange>,
    /// 開始時のフレームのスタックポインタ
    frame_sp: Option<u64>,
    /// 呼び出し先から戻るまでの Until
    nested: Option<Until>,
}

impl StepOver {
    pub fn new(range: AddressRange) -> Self {
        Self {
            range: Some(range),
            frame_sp: None,
            nested: None,
        }
    }

    /// 現在のソース行
    pub fn current_line() -> Self {
        Self {
            range: None,
            frame_sp: None,
            nested: None,
        }
    }

    pub fn range(&self) -> Option<AddressRange> {
        self.range
    }

    /// 呼び出し先から戻るのを待っているか
    pub fn is_in_call(&self) -> bool {
        self.nested.is_some()
    }

    pub(super) fn init(&mut self, ctx: &ControllerContext<'_>, cb: InitCallback) {
        let result = match self.range {
            Some(_) => Ok(()),
            None => current_line_range(ctx).map(|range| self.range = Some(range)),
        };
        if result.is_ok() {
            self.frame_sp = ctx.frames().first().map(|f| f.sp);
        }
        ctx.post_init_result(cb, result);
    }

    pub(super) fn continue_op(&self) -> ContinueOp {
        if self.nested.is_some() {
            ContinueOp::continue_execution()
        } else {
            ContinueOp::step_in_range(self.range.unwrap_or_default())
        }
    }

    pub(super) fn on_thread_stop(&mut self, ctx: &ControllerContext<'_>, stop: &ThreadStop) -> StopOp {
        if let Some(nested) = &mut self.nested {
            if nested.on_thread_stop(stop) == StopOp::Continue {
                return StopOp::Continue;
            }
            if let Some(id) = nested.breakpoint() {
                ctx.session().delete_internal_breakpoint(id);
            }
            self.nested = None;
            ctx.log("StepOver", format_args!("returned to 0x{:x}", stop.ip()));
            return if self.in_range(stop.ip()) {
                StopOp::Continue
            } else {
                StopOp::Stop
            };
        }

        if !stop.is_single_step() {
            return StopOp::Stop;
        }
        if self.in_range(stop.ip()) {
            return StopOp::Continue;
        }

        // 範囲外かつ深いフレームなら関数呼び出しに入った
        let deeper = self.frame_sp.is_some_and(|sp| stop.sp() < sp);
        if deeper && stop.frames.len() >= 2 {
            let caller = stop.frames[1];
            let mut until = Until::with_frame(InputLocation::Address(caller.ip), caller.sp);
            match until.install(ctx) {
                Ok(()) => {
                    ctx.log("StepOver", format_args!("stepping over call to 0x{:x}", stop.ip()));
                    self.nested = Some(until);
                    return StopOp::Continue;
                }
                Err(e) => {
                    tracing::warn!("Can't step over call at 0x{:x}: {}", stop.ip(), e);
                }
            }
        }
        StopOp::Stop
    }

    pub(super) fn owned_breakpoints(&self) -> Vec<BreakpointId> {
        self.nested
            .as_ref()
            .and_then(|n| n.breakpoint())
            .into_iter()
            .collect()
    }

    fn in_range(&self, ip: u64) -> bool {
        self.range.is_some_and(|r| r.contains(ip))
    }
}
