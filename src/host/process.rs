//! # OS process table access.
//!
//! [`SystemProcesses`] implements [`ProcessControl`] over [`sysinfo`]. Whether a
//! process exposes a visible surface is host specific (e.g. a non-empty main window
//! title), so it is answered by a pluggable [`SurfaceProbe`]. Without a probe every
//! candidate counts as visible, which leaves the process count as the only signal:
//! one match is accepted, several are ambiguous.

use std::ffi::OsStr;
use std::sync::{Arc, Mutex, MutexGuard};

use sysinfo::{Pid, ProcessStatus, ProcessesToUpdate, System};

use crate::error::HostError;
use crate::host::{ProcessCandidate, ProcessControl};

/// Answers "does this pid expose a visible main surface?".
pub type SurfaceProbe = Arc<dyn Fn(u32) -> bool + Send + Sync>;

/// [`ProcessControl`] backed by the OS process table.
pub struct SystemProcesses {
    system: Mutex<System>,
    probe: Option<SurfaceProbe>,
}

impl SystemProcesses {
    /// Creates an accessor with no surface probe.
    pub fn new() -> Self {
        Self {
            system: Mutex::new(System::new()),
            probe: None,
        }
    }

    /// Uses `probe` to decide which candidates expose a visible surface.
    pub fn with_surface_probe(mut self, probe: SurfaceProbe) -> Self {
        self.probe = Some(probe);
        self
    }

    fn system(&self) -> MutexGuard<'_, System> {
        self.system.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn refresh_one(sys: &mut System, pid: Pid) {
        sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
    }
}

impl Default for SystemProcesses {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessControl for SystemProcesses {
    fn enumerate(&self, name_filter: &str) -> Vec<ProcessCandidate> {
        let mut sys = self.system();
        sys.refresh_processes(ProcessesToUpdate::All, true);

        let mut pids: Vec<u32> = sys
            .processes_by_name(OsStr::new(name_filter))
            .filter(|p| p.status() != ProcessStatus::Zombie)
            .map(|p| p.pid().as_u32())
            .collect();
        drop(sys);
        pids.sort_unstable();

        pids.into_iter()
            .map(|pid| ProcessCandidate {
                pid,
                has_visible_surface: self.probe.as_ref().is_none_or(|probe| probe(pid)),
            })
            .collect()
    }

    fn is_alive(&self, pid: u32) -> bool {
        let pid = Pid::from_u32(pid);
        let mut sys = self.system();
        Self::refresh_one(&mut sys, pid);
        sys.process(pid)
            .is_some_and(|p| p.status() != ProcessStatus::Zombie)
    }

    fn kill(&self, pid: u32) -> Result<(), HostError> {
        let raw = pid;
        let pid = Pid::from_u32(pid);
        let mut sys = self.system();
        Self::refresh_one(&mut sys, pid);

        match sys.process(pid) {
            None => Err(HostError::NoSuchProcess { pid: raw }),
            Some(process) if process.kill() => Ok(()),
            Some(_) => Err(HostError::PermissionDenied {
                error: format!("kill signal for pid {raw} was not delivered"),
            }),
        }
    }
}
