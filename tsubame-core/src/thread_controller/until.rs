//! 指定位置まで実行

use super::{ContinueOp, ControllerContext, InitCallback, StopOp, ThreadStop};
use crate::breakpoint::{BreakpointId, BreakpointScope, BreakpointSettings};
use crate::{Error, Result};
use tsubame_ipc::StopMode;
use tsubame_symbols::InputLocation;

#[derive(Debug, Clone)]
enum UntilTarget {
    Location(InputLocation),
    /// 呼び出し元への戻りアドレス（finish）
    Caller,
}

/// 内部ブレークポイントにヒットするまで実行する
///
/// フレームのスタックポインタを指定した場合、`sp >= frame_sp` のときだけ停止します。
/// 再帰呼び出しの内側で同じ位置に来た場合は続行します。
#[derive(Debug)]
pub struct Until {
    target: UntilTarget,
    frame_sp: Option<u64>,
    breakpoint: Option<BreakpointId>,
}

impl Until {
    pub fn new(location: InputLocation) -> Self {
        Self {
            target: UntilTarget::Location(location),
            frame_sp: None,
            breakpoint: None,
        }
    }

    /// スタックポインタ条件つき
    pub fn with_frame(location: InputLocation, frame_sp: u64) -> Self {
        Self {
            frame_sp: Some(frame_sp),
            ..Self::new(location)
        }
    }

    /// 現在の関数から呼び出し元に戻るまで
    pub fn finish() -> Self {
        Self {
            target: UntilTarget::Caller,
            frame_sp: None,
            breakpoint: None,
        }
    }

    /// 設置した内部ブレークポイント
    pub fn breakpoint(&self) -> Option<BreakpointId> {
        self.breakpoint
    }

    pub fn frame_sp(&self) -> Option<u64> {
        self.frame_sp
    }

    pub(super) fn init(&mut self, ctx: &ControllerContext<'_>, cb: InitCallback) {
        match self.prepare(ctx) {
            Ok((id, settings)) => ctx.session().update_breakpoint(id, settings, Some(cb)),
            Err(e) => ctx.post_init_result(cb, Err(e)),
        }
    }

    /// エージェントの応答を待たずに設置する
    ///
    /// 同じ接続で後から送る再開要求よりも先に処理されます。
    pub(super) fn install(&mut self, ctx: &ControllerContext<'_>) -> Result<()> {
        let (id, settings) = self.prepare(ctx)?;
        ctx.session().update_breakpoint(id, settings, None);
        Ok(())
    }

    /// 位置を確定させ、内部ブレークポイントを作る
    fn prepare(&mut self, ctx: &ControllerContext<'_>) -> Result<(BreakpointId, BreakpointSettings)> {
        let location = match &self.target {
            UntilTarget::Location(location) => location.clone(),
            UntilTarget::Caller => {
                let frames = ctx.frames();
                if frames.len() < 2 {
                    return Err(Error::NotEnoughFrames(frames.len()));
                }
                self.frame_sp = Some(frames[1].sp);
                InputLocation::Address(frames[1].ip)
            }
        };

        let session = ctx.session();
        if session.symbols().resolve_input_location(&location).is_empty() {
            return Err(Error::NoLocation(location.to_string()));
        }

        let id = session.create_new_internal_breakpoint();
        self.breakpoint = Some(id);
        let settings = BreakpointSettings {
            enabled: true,
            scope: BreakpointScope::Thread(ctx.thread()),
            location: Some(location),
            stop_mode: StopMode::Thread,
        };
        Ok((id, settings))
    }

    pub(super) fn continue_op(&self) -> ContinueOp {
        ContinueOp::continue_execution()
    }

    pub(super) fn on_thread_stop(&mut self, stop: &ThreadStop) -> StopOp {
        let Some(id) = self.breakpoint else {
            return StopOp::Continue;
        };
        if !stop.hit_breakpoints.contains(&id) {
            return StopOp::Continue;
        }
        match self.frame_sp {
            Some(frame_sp) if stop.sp() < frame_sp => StopOp::Continue,
            _ => StopOp::Stop,
        }
    }
}
