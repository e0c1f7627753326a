//! 単一スレッドのメッセージループ
//!
//! リモートからのリプライや非同期初期化の完了はすべてこのループにポストされ、
//! 受け取った順に実行されます。実行は `futures` の [`LocalPool`] が担います。

use futures::executor::{LocalPool, LocalSpawner};
use futures::task::LocalSpawnExt;
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// 協調的なタスクキュー
///
/// クローンは同じキューを共有します。タスクの中からループを回してはいけません。
#[derive(Clone)]
pub struct MessageLoop {
    pool: Rc<RefCell<LocalPool>>,
    spawner: LocalSpawner,
    /// ポスト済みで未実行のタスク数
    pending: Rc<Cell<usize>>,
    /// 実行済みのタスク数
    executed: Rc<Cell<usize>>,
}

impl Default for MessageLoop {
    fn default() -> Self {
        let pool = LocalPool::new();
        let spawner = pool.spawner();
        Self {
            pool: Rc::new(RefCell::new(pool)),
            spawner,
            pending: Rc::new(Cell::new(0)),
            executed: Rc::new(Cell::new(0)),
        }
    }
}

impl MessageLoop {
    pub fn new() -> Self {
        Self::default()
    }

    /// タスクをキューの末尾に追加する
    pub fn post_task(&self, task: impl FnOnce() + 'static) {
        let pending = self.pending.clone();
        let executed = self.executed.clone();
        pending.set(pending.get() + 1);

        let spawned = self.spawner.spawn_local(async move {
            pending.set(pending.get() - 1);
            executed.set(executed.get() + 1);
            task();
        });
        if let Err(e) = spawned {
            // プールが破棄された後はタスクを捨てる
            tracing::warn!("Dropping task posted to a stopped message loop: {}", e);
            self.pending.set(self.pending.get() - 1);
        }
    }

    /// 実行待ちのタスクがないか
    pub fn is_idle(&self) -> bool {
        self.pending.get() == 0
    }

    /// 実行待ちのタスク数
    pub fn pending(&self) -> usize {
        self.pending.get()
    }

    /// 先頭のタスクを1つ実行する。実行した場合は true
    pub fn run_one(&self) -> bool {
        self.pool.borrow_mut().try_run_one()
    }

    /// キューが空になるまでタスクを実行する。実行したタスク数を返す
    pub fn run_until_idle(&self) -> usize {
        let before = self.executed.get();
        self.pool.borrow_mut().run_until_stalled();
        self.executed.get() - before
    }
}
