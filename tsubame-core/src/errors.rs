//! エラー型

use crate::breakpoint::BreakpointId;
use crate::job_context::JobContextId;
use crate::target::TargetId;
use tsubame_ipc::{IpcError, Koid};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    // --------------------------------- entity not found ------------------------------------------
    #[error("target {0} not found")]
    TargetNotFound(TargetId),
    #[error("job context {0} not found")]
    JobContextNotFound(JobContextId),
    #[error("breakpoint {0} not found")]
    BreakpointNotFound(BreakpointId),
    #[error("process {0} not found")]
    ProcessNotFound(Koid),
    #[error("process {koid} is already attached to target {target}")]
    ProcessAlreadyAttached { koid: Koid, target: TargetId },
    #[error("thread {0} not found")]
    ThreadNotFound(Koid),
    #[error("location `{0}` can't be resolved")]
    NoLocation(String),

    // --------------------------------- state errors ----------------------------------------------
    #[error("can't delete the last target")]
    LastTarget,
    #[error("can't delete the last job context")]
    LastJobContext,
    #[error("target {0} is already running or attaching")]
    TargetBusy(TargetId),
    #[error("target {0} has no process")]
    NoProcess(TargetId),
    #[error("job context {0} is already attached or attaching")]
    JobContextBusy(JobContextId),
    #[error("job context {0} is not attached")]
    JobNotAttached(JobContextId),
    #[error("not connected to a debug agent")]
    NotConnected,
    #[error("thread {0} is not stopped")]
    ThreadNotStopped(Koid),
    #[error("not enough stack frames ({0}) to finish")]
    NotEnoughFrames(usize),

    // --------------------------------- remote errors ---------------------------------------------
    #[error(transparent)]
    Remote(#[from] IpcError),

    // --------------------------------- resolution errors -----------------------------------------
    #[error("no member named `{0}`")]
    MemberNotFound(String),
    #[error("invalid data member")]
    NullMember,
    #[error("type `{base}` is not a direct base of `{derived}`")]
    NotDirectBase { derived: String, base: String },
    #[error("invalid pointer 0x{address:x}: can't read {size} bytes")]
    MemoryRead { address: u64, size: u32 },
    #[error("type `{0}` is not a struct, class or union")]
    NotACollection(String),
    #[error("type `{0}` is not a pointer")]
    NotAPointer(String),
    #[error("value is too small: need {needed} bytes, have {actual}")]
    ValueTooSmall { needed: u64, actual: u64 },
    #[error("type `{0}` is incomplete")]
    IncompleteType(String),
    #[error("can't convert a {0}-byte value to an integer")]
    UnsupportedSize(usize),

    // --------------------------------- disassembler errors ---------------------------------------
    #[error("disassembler: {0}")]
    Capstone(#[from] capstone::Error),

    // --------------------------------- symbol errors ---------------------------------------------
    #[error("symbols: {0}")]
    Symbols(#[from] anyhow::Error),

    // --------------------------------- configuration errors --------------------------------------
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error("configuration: {0}")]
    Config(#[from] toml::de::Error),
}
