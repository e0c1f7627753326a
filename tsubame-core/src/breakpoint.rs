//! ブレークポイント管理
//!
//! ブレークポイントは設定（位置・スコープ・停止モード）を持つ論理的な存在で、
//! シンボルインデックスで位置が解決されて初めてエージェントに設置されます。
//! 内部ブレークポイントはステップ実行などのために作られ、ユーザーには見えません。

use crate::target::TargetId;
use crate::thread::ThreadHandle;
use std::fmt;
use std::sync::atomic::{AtomicU32, Ordering};
use tsubame_ipc::{
    AddOrChangeBreakpointRequest, BreakpointSettingsRecord, Koid, ProcessBreakpointLocation,
    RemoveBreakpointRequest, StopMode,
};
use tsubame_symbols::{InputLocation, SymbolIndex};

/// プロセス全体で一意なID。削除後も再利用しない
static NEXT_BREAKPOINT_ID: AtomicU32 = AtomicU32::new(1);

/// ブレークポイントID
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BreakpointId(u32);

impl BreakpointId {
    pub(crate) fn next() -> Self {
        Self(NEXT_BREAKPOINT_ID.fetch_add(1, Ordering::Relaxed))
    }

    pub(crate) fn from_raw(id: u32) -> Self {
        Self(id)
    }

    pub fn value(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for BreakpointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// ブレークポイントを適用する範囲
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BreakpointScope {
    /// すべてのプロセス
    #[default]
    System,
    /// 特定のターゲットのプロセス
    Target(TargetId),
    /// 特定のスレッド
    Thread(ThreadHandle),
}

/// ブレークポイントの設定
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakpointSettings {
    pub enabled: bool,
    pub scope: BreakpointScope,
    /// 未設定なら設置されない
    pub location: Option<InputLocation>,
    pub stop_mode: StopMode,
}

impl Default for BreakpointSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            scope: BreakpointScope::System,
            location: None,
            stop_mode: StopMode::All,
        }
    }
}

/// エージェントへ送る要求
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum BreakpointRequest {
    AddOrChange(AddOrChangeBreakpointRequest),
    Remove(RemoveBreakpointRequest),
}

/// ブレークポイント
#[derive(Debug)]
pub struct Breakpoint {
    id: BreakpointId,
    is_internal: bool,
    settings: BreakpointSettings,
    hit_count: u32,
    /// 解決済みのアドレス
    addresses: Vec<u64>,
    /// エージェントに設置済みか
    installed: bool,
}

impl Breakpoint {
    pub(crate) fn new(is_internal: bool) -> Self {
        Self {
            id: BreakpointId::next(),
            is_internal,
            settings: BreakpointSettings::default(),
            hit_count: 0,
            addresses: Vec::new(),
            installed: false,
        }
    }

    pub fn id(&self) -> BreakpointId {
        self.id
    }

    pub fn is_internal(&self) -> bool {
        self.is_internal
    }

    pub fn settings(&self) -> &BreakpointSettings {
        &self.settings
    }

    pub fn hit_count(&self) -> u32 {
        self.hit_count
    }

    /// 解決済みのアドレス。空なら発火しない
    pub fn addresses(&self) -> &[u64] {
        &self.addresses
    }

    pub fn is_installed(&self) -> bool {
        self.installed
    }

    pub(crate) fn set_settings(&mut self, settings: BreakpointSettings) {
        self.settings = settings;
    }

    pub(crate) fn set_hit_count(&mut self, hit_count: u32) {
        self.hit_count = hit_count;
    }

    /// 接続が切れたなど、エージェント側の設置状態が失われた
    pub(crate) fn mark_uninstalled(&mut self) {
        self.installed = false;
    }

    /// 位置をアドレスに解決する
    pub(crate) fn resolve(&mut self, symbols: &SymbolIndex) {
        self.addresses = match &self.settings.location {
            Some(location) => symbols.resolve_input_location(location),
            None => Vec::new(),
        };
    }

    /// 現在の設定とプロセス一覧から、エージェントへ送る要求を決める
    ///
    /// `processes` はアタッチ中の（ターゲット, プロセスkoid）の一覧です。
    pub(crate) fn sync_request(&mut self, processes: &[(TargetId, Koid)]) -> Option<BreakpointRequest> {
        let locations = self.locations(processes);
        if self.settings.enabled && !locations.is_empty() {
            self.installed = true;
            return Some(BreakpointRequest::AddOrChange(AddOrChangeBreakpointRequest {
                breakpoint: BreakpointSettingsRecord {
                    breakpoint_id: self.id.value(),
                    stop: self.settings.stop_mode,
                    locations,
                },
            }));
        }

        if self.installed {
            self.installed = false;
            return Some(BreakpointRequest::Remove(RemoveBreakpointRequest {
                breakpoint_id: self.id.value(),
            }));
        }
        None
    }

    /// 削除時の要求
    pub(crate) fn removal_request(&mut self) -> Option<BreakpointRequest> {
        if !self.installed {
            return None;
        }
        self.installed = false;
        Some(BreakpointRequest::Remove(RemoveBreakpointRequest {
            breakpoint_id: self.id.value(),
        }))
    }

    fn locations(&self, processes: &[(TargetId, Koid)]) -> Vec<ProcessBreakpointLocation> {
        let mut locations = Vec::new();
        for &(target, process_koid) in processes {
            let thread_koid = match self.settings.scope {
                BreakpointScope::System => 0,
                BreakpointScope::Target(id) if id == target => 0,
                BreakpointScope::Thread(handle) if handle.process_koid == process_koid => {
                    handle.thread_koid
                }
                _ => continue,
            };
            locations.extend(self.addresses.iter().map(|&address| ProcessBreakpointLocation {
                process_koid,
                thread_koid,
                address,
            }));
        }
        locations
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resolved(location: InputLocation, scope: BreakpointScope) -> Breakpoint {
        let symbols = SymbolIndex::new();
        let mut bp = Breakpoint::new(false);
        bp.set_settings(BreakpointSettings {
            scope,
            location: Some(location),
            ..BreakpointSettings::default()
        });
        bp.resolve(&symbols);
        bp
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Breakpoint::new(false);
        let b = Breakpoint::new(true);
        assert_ne!(a.id(), b.id());
        assert!(b.id() > a.id());
    }

    #[test]
    fn test_unresolved_breakpoint_is_not_installed() {
        let mut bp = Breakpoint::new(false);
        bp.resolve(&SymbolIndex::new());
        assert!(bp.addresses().is_empty());
        assert_eq!(bp.sync_request(&[(TargetId(1), 100)]), None);
        assert!(!bp.is_installed());
    }

    #[test]
    fn test_install_then_disable() {
        let mut bp = resolved(InputLocation::Address(0x1000), BreakpointScope::System);
        let request = bp.sync_request(&[(TargetId(1), 100), (TargetId(2), 200)]).unwrap();
        match request {
            BreakpointRequest::AddOrChange(request) => {
                assert_eq!(request.breakpoint.breakpoint_id, bp.id().value());
                assert_eq!(request.breakpoint.locations.len(), 2);
                assert_eq!(request.breakpoint.locations[1].process_koid, 200);
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(bp.is_installed());

        bp.set_settings(BreakpointSettings {
            enabled: false,
            ..bp.settings().clone()
        });
        assert_eq!(
            bp.sync_request(&[(TargetId(1), 100)]),
            Some(BreakpointRequest::Remove(RemoveBreakpointRequest {
                breakpoint_id: bp.id().value()
            }))
        );
        assert_eq!(bp.sync_request(&[(TargetId(1), 100)]), None);
    }

    #[test]
    fn test_scope_filters_processes() {
        let mut bp = resolved(InputLocation::Address(0x10), BreakpointScope::Target(TargetId(2)));
        assert_eq!(bp.sync_request(&[(TargetId(1), 100)]), None);

        let mut bp = resolved(
            InputLocation::Address(0x10),
            BreakpointScope::Thread(ThreadHandle::new(100, 7)),
        );
        match bp.sync_request(&[(TargetId(1), 100), (TargetId(2), 200)]) {
            Some(BreakpointRequest::AddOrChange(request)) => {
                assert_eq!(
                    request.breakpoint.locations,
                    vec![ProcessBreakpointLocation {
                        process_koid: 100,
                        thread_koid: 7,
                        address: 0x10
                    }]
                );
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
