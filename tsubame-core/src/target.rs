//! デバッグ対象（ターゲット）
//!
//! ターゲットは起動引数を持ち、アタッチ中のみプロセスを所有します。

use crate::process::Process;
use std::fmt;

/// ターゲットID（セッション内で単調増加）
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TargetId(pub(crate) u32);

impl TargetId {
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// ターゲットの状態
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TargetState {
    /// プロセスなし
    #[default]
    None,
    /// 起動要求の応答待ち
    Starting,
    /// アタッチ要求の応答待ち
    Attaching,
    /// プロセスにアタッチ中
    Running,
}

/// ターゲット
#[derive(Debug)]
pub struct Target {
    id: TargetId,
    state: TargetState,
    args: Vec<String>,
    process: Option<Process>,
}

impl Target {
    pub(crate) fn new(id: TargetId) -> Self {
        Self {
            id,
            state: TargetState::None,
            args: Vec::new(),
            process: None,
        }
    }

    /// 起動設定だけを複製する（プロセスは複製しない）
    pub(crate) fn clone_with_id(&self, id: TargetId) -> Self {
        Self {
            args: self.args.clone(),
            ..Self::new(id)
        }
    }

    pub fn id(&self) -> TargetId {
        self.id
    }

    pub fn state(&self) -> TargetState {
        self.state
    }

    /// 起動引数（先頭がプログラム）
    pub fn args(&self) -> &[String] {
        &self.args
    }

    pub fn process(&self) -> Option<&Process> {
        self.process.as_ref()
    }

    pub(crate) fn process_mut(&mut self) -> Option<&mut Process> {
        self.process.as_mut()
    }

    pub(crate) fn set_args(&mut self, args: Vec<String>) {
        self.args = args;
    }

    pub(crate) fn set_state(&mut self, state: TargetState) {
        self.state = state;
    }

    /// プロセスを設定し、実行中にする
    pub(crate) fn set_process(&mut self, process: Process) {
        self.process = Some(process);
        self.state = TargetState::Running;
    }

    /// プロセスを取り外し、初期状態に戻す
    pub(crate) fn take_process(&mut self) -> Option<Process> {
        self.state = TargetState::None;
        self.process.take()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clone_copies_args_only() {
        let mut target = Target::new(TargetId(1));
        target.set_args(vec!["/bin/app".to_string(), "-v".to_string()]);
        target.set_process(Process::new(10, "app".to_string(), TargetId(1)));

        let clone = target.clone_with_id(TargetId(2));
        assert_eq!(clone.id(), TargetId(2));
        assert_eq!(clone.args(), target.args());
        assert!(clone.process().is_none());
        assert_eq!(clone.state(), TargetState::None);
    }

    #[test]
    fn test_take_process_resets_state() {
        let mut target = Target::new(TargetId(1));
        target.set_process(Process::new(10, "app".to_string(), TargetId(1)));
        assert_eq!(target.state(), TargetState::Running);

        let process = target.take_process().unwrap();
        assert_eq!(process.koid(), 10);
        assert_eq!(target.state(), TargetState::None);
        assert!(target.process().is_none());
    }
}
