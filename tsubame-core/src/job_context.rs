//! ジョブコンテキスト
//!
//! ジョブにアタッチし、名前フィルタに一致する新規プロセスをエージェントに捕捉させます。

use std::fmt;
use tsubame_ipc::Koid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct JobContextId(pub(crate) u32);

impl JobContextId {
    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for JobContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum JobContextState {
    #[default]
    None,
    Attaching,
    Attached,
}

/// ジョブコンテキスト
#[derive(Debug)]
pub struct JobContext {
    id: JobContextId,
    state: JobContextState,
    job_koid: Option<Koid>,
    filters: Vec<String>,
}

impl JobContext {
    pub(crate) fn new(id: JobContextId) -> Self {
        Self {
            id,
            state: JobContextState::None,
            job_koid: None,
            filters: Vec::new(),
        }
    }

    /// フィルタだけを複製する
    pub(crate) fn clone_with_id(&self, id: JobContextId) -> Self {
        Self {
            filters: self.filters.clone(),
            ..Self::new(id)
        }
    }

    pub fn id(&self) -> JobContextId {
        self.id
    }

    pub fn state(&self) -> JobContextState {
        self.state
    }

    /// アタッチ中のジョブ
    pub fn job_koid(&self) -> Option<Koid> {
        self.job_koid
    }

    pub fn filters(&self) -> &[String] {
        &self.filters
    }

    pub(crate) fn set_filters(&mut self, filters: Vec<String>) {
        self.filters = filters;
    }

    pub(crate) fn set_attaching(&mut self, job_koid: Koid) {
        self.state = JobContextState::Attaching;
        self.job_koid = Some(job_koid);
    }

    pub(crate) fn set_attached(&mut self, job_koid: Koid) {
        self.state = JobContextState::Attached;
        self.job_koid = Some(job_koid);
    }

    pub(crate) fn reset(&mut self) {
        self.state = JobContextState::None;
        self.job_koid = None;
    }
}
