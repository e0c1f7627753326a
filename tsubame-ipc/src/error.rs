//! 通信エラー

use crate::Koid;

/// リモートエージェントとの通信で発生するエラー
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IpcError {
    #[error("not connected to a debug agent")]
    NoConnection,
    #[error("connection to the debug agent was lost")]
    ConnectionLost,
    #[error("process {0} not found by the agent")]
    ProcessNotFound(Koid),
    #[error("agent returned error status {0}")]
    Status(i32),
    #[error("agent error: {0}")]
    Remote(String),
}
