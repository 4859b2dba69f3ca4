use std::collections::BTreeMap;
use std::process::Child;
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use crate::launcher::LaunchedProcess;
use crate::types::{DisplayId, ManagedProcessInfo, ProcessGroupId, WallpaperId};

const REAP_POLL: Duration = Duration::from_millis(10);

/// A renderer owned by the registry.
#[derive(Debug)]
pub struct ManagedProcess {
    pub display: DisplayId,
    pub wallpaper: WallpaperId,
    pub pgid: ProcessGroupId,
    pub launched_at: SystemTime,
    child: Option<Child>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ReapState {
    Exited,
    Running,
    /// No child handle; liveness can only be checked through signals.
    Untracked,
}

impl ManagedProcess {
    pub fn new(display: DisplayId, wallpaper: WallpaperId, launched: LaunchedProcess) -> Self {
        Self {
            display,
            wallpaper,
            pgid: launched.pgid,
            launched_at: SystemTime::now(),
            child: launched.child,
        }
    }

    pub fn info(&self) -> ManagedProcessInfo {
        ManagedProcessInfo {
            display: self.display.clone(),
            wallpaper: self.wallpaper.clone(),
            pgid: self.pgid,
            launched_at: self.launched_at,
        }
    }

    pub(crate) fn try_reap(&mut self) -> ReapState {
        let Some(child) = self.child.as_mut() else {
            return ReapState::Untracked;
        };
        match child.try_wait() {
            Ok(Some(_)) => ReapState::Exited,
            Ok(None) => ReapState::Running,
            // ECHILD: somebody else already collected it.
            Err(_) => ReapState::Exited,
        }
    }

    /// Polls until the child is reaped or `timeout` elapses.
    pub(crate) fn reap_within(&mut self, timeout: Duration) -> ReapState {
        let deadline = Instant::now() + timeout;
        loop {
            let state = self.try_reap();
            if state != ReapState::Running || Instant::now() >= deadline {
                return state;
            }
            thread::sleep(REAP_POLL);
        }
    }
}

/// A renderer that was asked to terminate but had not exited yet.
#[derive(Debug)]
pub(crate) struct Lingering {
    pub process: ManagedProcess,
    pub terminated_at: Instant,
}

/// Display → renderer mapping. Holds no lock of its own; the lifecycle
/// manager owns it behind its mutex.
#[derive(Debug, Default)]
pub struct Registry {
    entries: BTreeMap<DisplayId, ManagedProcess>,
    lingering: Vec<Lingering>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, display: &DisplayId) -> Option<&ManagedProcess> {
        self.entries.get(display)
    }

    /// Registers `process`, returning the entry it replaced.
    pub fn set(&mut self, process: ManagedProcess) -> Option<ManagedProcess> {
        self.entries.insert(process.display.clone(), process)
    }

    pub fn remove(&mut self, display: &DisplayId) -> Option<ManagedProcess> {
        self.entries.remove(display)
    }

    pub fn drain(&mut self) -> Vec<ManagedProcess> {
        std::mem::take(&mut self.entries).into_values().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn snapshot(&self) -> Vec<ManagedProcessInfo> {
        self.entries.values().map(ManagedProcess::info).collect()
    }

    pub(crate) fn retire(&mut self, process: ManagedProcess, terminated_at: Instant) {
        self.lingering.push(Lingering {
            process,
            terminated_at,
        });
    }

    pub(crate) fn take_lingering(&mut self) -> Vec<Lingering> {
        std::mem::take(&mut self.lingering)
    }

    pub(crate) fn restore_lingering(&mut self, lingering: Vec<Lingering>) {
        self.lingering.extend(lingering);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn process(display: &str, wallpaper: &str, pgid: i32) -> ManagedProcess {
        ManagedProcess::new(
            DisplayId::new(display),
            WallpaperId::new(wallpaper),
            LaunchedProcess::new(ProcessGroupId::new(pgid), None),
        )
    }

    #[test]
    fn set_replaces_existing_entry() {
        let mut registry = Registry::new();
        assert!(registry.set(process("HDMI-1", "1", 100)).is_none());
        let replaced = registry.set(process("HDMI-1", "2", 200)).unwrap();
        assert_eq!(replaced.pgid, ProcessGroupId::new(100));
        assert_eq!(registry.len(), 1);
        let current = registry.get(&DisplayId::new("HDMI-1")).unwrap();
        assert_eq!(current.pgid, ProcessGroupId::new(200));
        assert_eq!(current.wallpaper, WallpaperId::new("2"));
    }

    #[test]
    fn drain_empties_registry() {
        let mut registry = Registry::new();
        registry.set(process("HDMI-1", "1", 100));
        registry.set(process("DP-1", "1", 101));
        let drained = registry.drain();
        assert_eq!(drained.len(), 2);
        assert!(registry.is_empty());
        assert!(registry.drain().is_empty());
    }

    #[test]
    fn snapshot_is_ordered_by_display() {
        let mut registry = Registry::new();
        registry.set(process("HDMI-1", "1", 100));
        registry.set(process("DP-1", "2", 101));
        let names: Vec<_> = registry
            .snapshot()
            .into_iter()
            .map(|info| info.display.0)
            .collect();
        assert_eq!(names, vec!["DP-1", "HDMI-1"]);
    }

    #[test]
    fn untracked_processes_cannot_be_reaped() {
        let mut entry = process("HDMI-1", "1", 100);
        assert_eq!(entry.try_reap(), ReapState::Untracked);
        assert_eq!(
            entry.reap_within(Duration::from_millis(50)),
            ReapState::Untracked
        );
    }
}
