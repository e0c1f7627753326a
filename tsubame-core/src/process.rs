//! プロセス
//!
//! アタッチ中のプロセスとそのスレッドを保持します。

use crate::target::TargetId;
use crate::thread::Thread;
use std::collections::BTreeMap;
use tsubame_ipc::Koid;

#[derive(Debug)]
pub struct Process {
    koid: Koid,
    name: String,
    /// 所有しているターゲット
    target: TargetId,
    threads: BTreeMap<Koid, Thread>,
}

impl Process {
    pub(crate) fn new(koid: Koid, name: String, target: TargetId) -> Self {
        Self {
            koid,
            name,
            target,
            threads: BTreeMap::new(),
        }
    }

    pub fn koid(&self) -> Koid {
        self.koid
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> TargetId {
        self.target
    }

    /// koid 順のスレッド
    pub fn threads(&self) -> impl Iterator<Item = &Thread> {
        self.threads.values()
    }

    pub fn thread(&self, koid: Koid) -> Option<&Thread> {
        self.threads.get(&koid)
    }

    pub(crate) fn thread_mut(&mut self, koid: Koid) -> Option<&mut Thread> {
        self.threads.get_mut(&koid)
    }

    pub(crate) fn threads_mut(&mut self) -> impl Iterator<Item = &mut Thread> {
        self.threads.values_mut()
    }

    /// スレッドを追加する。既存なら false
    pub(crate) fn add_thread(&mut self, thread: Thread) -> bool {
        if self.threads.contains_key(&thread.koid()) {
            return false;
        }
        self.threads.insert(thread.koid(), thread);
        true
    }

    pub(crate) fn remove_thread(&mut self, koid: Koid) -> Option<Thread> {
        self.threads.remove(&koid)
    }

    /// すべてのスレッドを取り出す（プロセス破棄時）
    pub(crate) fn take_threads(&mut self) -> Vec<Thread> {
        std::mem::take(&mut self.threads).into_values().collect()
    }
}
