//! Tsubame デバッガのコア機能
//!
//! このクレートは、デバッガのクライアント側の状態機械を提供します。
//! デバッグ対象（ターゲット・ジョブ・プロセス・スレッド）のモデル、スレッドの停止時に
//! 続行か停止かを決めるスレッドコントローラ、ブレークポイントの管理、
//! 型情報とメモリから値を取り出す解決処理、逆アセンブラを含みます。
//!
//! すべての処理は単一スレッドの [`tsubame_ipc::MessageLoop`] 上で動作します。

pub mod breakpoint;
pub mod disasm;
pub mod errors;
pub mod expr;
pub mod job_context;
pub mod observer;
pub mod process;
pub mod session;
pub mod settings;
pub mod system;
pub mod target;
pub mod thread;
pub mod thread_controller;

pub use breakpoint::{Breakpoint, BreakpointId, BreakpointScope, BreakpointSettings};
pub use disasm::{Arch, ArchInfo, Disassembler, Options as DisassemblerOptions, OutputBuffer};
pub use errors::Error;
pub use expr::{ExprEvalContext, ExprValue};
pub use job_context::{JobContext, JobContextId, JobContextState};
pub use observer::SessionObserver;
pub use process::Process;
pub use session::{Callback, Session, WeakSession};
pub use settings::Settings;
pub use system::System;
pub use target::{Target, TargetId, TargetState};
pub use thread::{Thread, ThreadHandle};
pub use thread_controller::ThreadController;

// 他のクレートから使用するために再エクスポート
pub use tsubame_ipc::{Koid, MessageLoop, Notification, RemoteApi, StopMode};
pub use tsubame_symbols::{InputLocation, SymbolIndex};

/// コアの結果型
pub type Result<T> = std::result::Result<T, Error>;
