//! # Process supervisor: waits for the host to finish, escalates on deadline.
//!
//! The [`ProcessSupervisor`] owns the host process identifier. It waits, without
//! busy polling, until every tracked document is `ResourceReleased` **and** the
//! host process exited on its own. A single deadline fixed at session start
//! bounds the wait; cancellation aborts it immediately. Both take the forced path.
//!
//! ## State machine
//! ```text
//!             ┌──────────────── all released ∧ process gone ────────► AllClosedGracefully
//!  Waiting ───┤
//!             ├── deadline elapsed ─┐
//!             └── token cancelled ──┴─► ForcedTermination:
//!                                         1. mark_forced + request_release(doc) for every unreleased doc
//!                                         2. kill(pid)            (cancel: only if kill_on_cancel)
//!                                              ├─ Ok                     → killed
//!                                              ├─ Err ∧ process gone     → killed (success-equivalent)
//!                                              └─ Err ∧ process alive    → ForcedTerminationFailed
//! ```
//!
//! ## Wake-ups
//! - registry change (`Notify`): a document moved forward
//! - poll interval: process liveness (the OS gives no exit notification here)
//! - `sleep_until(deadline)` and `token.cancelled()`, checked first (`biased`)
//!
//! ## Rules
//! - The deadline is never refreshed by partial progress
//! - Cleanup runs on every forced path, cancellation included
//! - With `terminate_when_idle`, the host is asked once to quit when every
//!   tracked document is released but the process is still up

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::core::ledger::ResourceLedger;
use crate::core::registry::TargetRegistry;
use crate::core::report::{ForceReason, SessionOutcome};
use crate::error::SessionError;
use crate::events::{Bus, Event, EventKind};
use crate::host::{HostApp, ProcessControl};

/// Supervisor state. Terminal states are never left.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SupervisorState {
    /// Waiting for documents and the host to finish.
    Waiting,
    /// Everything finished on its own.
    AllClosedGracefully,
    /// The supervisor finalized the session.
    ForcedTermination,
}

/// Timing and escalation knobs, taken from [`SessionConfig`](crate::SessionConfig).
#[derive(Debug, Clone, Copy)]
pub struct SupervisorParams {
    /// Liveness polling interval.
    pub poll_interval: Duration,
    /// Session deadline.
    pub deadline: Duration,
    /// Ask the host to quit once every document is released.
    pub terminate_when_idle: bool,
    /// Kill the host on cancellation.
    pub kill_on_cancel: bool,
}

/// Owns the host process and drives the session to a terminal outcome.
pub struct ProcessSupervisor {
    processes: Arc<dyn ProcessControl>,
    host: Arc<dyn HostApp>,
    registry: Arc<TargetRegistry>,
    ledger: Arc<ResourceLedger>,
    bus: Bus,
    params: SupervisorParams,
    state: Mutex<SupervisorState>,
}

impl ProcessSupervisor {
    /// Creates a supervisor in [`SupervisorState::Waiting`].
    pub fn new(
        processes: Arc<dyn ProcessControl>,
        host: Arc<dyn HostApp>,
        registry: Arc<TargetRegistry>,
        ledger: Arc<ResourceLedger>,
        bus: Bus,
        params: SupervisorParams,
    ) -> Self {
        Self {
            processes,
            host,
            registry,
            ledger,
            bus,
            params,
            state: Mutex::new(SupervisorState::Waiting),
        }
    }

    /// Current state.
    pub fn state(&self) -> SupervisorState {
        *self.state.lock().unwrap_or_else(|p| p.into_inner())
    }

    /// Identifies the host process among those matching `name_filter`.
    ///
    /// Exactly one candidate with a visible surface is accepted. Anything else is
    /// ambiguous and nothing may be killed later.
    pub fn capture(&self, name_filter: &str) -> Result<u32, SessionError> {
        let candidates = self.processes.enumerate(name_filter);
        let visible: Vec<u32> = candidates
            .iter()
            .filter(|c| c.has_visible_surface)
            .map(|c| c.pid)
            .collect();

        if let [pid] = visible.as_slice() {
            tracing::info!(pid, name = name_filter, "host process captured");
            self.bus
                .publish(Event::new(EventKind::ProcessCaptured).with_pid(*pid));
            return Ok(*pid);
        }

        let candidates: Vec<u32> = candidates.iter().map(|c| c.pid).collect();
        tracing::error!(
            name = name_filter,
            ?candidates,
            ?visible,
            "cannot identify the host process; refusing to supervise"
        );
        self.bus.publish(
            Event::new(EventKind::AmbiguousProcess)
                .with_reason(format!("{} candidates, {} visible", candidates.len(), visible.len())),
        );
        Err(SessionError::AmbiguousProcess { candidates, visible })
    }

    /// Waits for `pid` until a terminal outcome.
    ///
    /// `started` is the session start; the deadline is `started + deadline`.
    pub async fn wait(
        &self,
        pid: u32,
        started: Instant,
        token: &CancellationToken,
    ) -> Result<SessionOutcome, SessionError> {
        let deadline_at = started + self.params.deadline;
        let changed = self.registry.changed();
        let mut quit_requested = false;

        loop {
            let released = self.registry.all_released();
            let alive = self.processes.is_alive(pid);

            if released && !alive {
                self.set_state(SupervisorState::AllClosedGracefully);
                tracing::info!(pid, "all documents released; host exited on its own");
                self.bus
                    .publish(Event::new(EventKind::AllClosedGracefully).with_pid(pid));
                return Ok(SessionOutcome::AllClosedGracefully);
            }

            if released
                && alive
                && !quit_requested
                && self.params.terminate_when_idle
                && !self.registry.is_empty()
            {
                quit_requested = true;
                self.request_quit(pid);
            }

            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    return self.force(pid, ForceReason::Cancelled, self.params.kill_on_cancel);
                }
                _ = tokio::time::sleep_until(deadline_at) => {
                    tracing::warn!(pid, deadline = ?self.params.deadline, "deadline elapsed; forcing termination");
                    self.bus.publish(Event::new(EventKind::DeadlineElapsed).with_pid(pid));
                    return self.force(pid, ForceReason::DeadlineElapsed, true);
                }
                _ = changed.notified() => {}
                _ = tokio::time::sleep(self.params.poll_interval) => {}
            }
        }
    }

    fn request_quit(&self, pid: u32) {
        tracing::debug!(pid, "every tracked document released; asking host to quit");
        let ev = Event::new(EventKind::HostTerminateRequested).with_pid(pid);
        match self.host.terminate() {
            Ok(()) => self.bus.publish(ev),
            Err(e) => {
                tracing::warn!(pid, error = %e, "host refused to quit; waiting for deadline");
                self.bus.publish(ev.with_reason(e.to_string()));
            }
        }
    }

    /// Forced path: release every unreleased document, then optionally kill.
    fn force(
        &self,
        pid: u32,
        reason: ForceReason,
        kill: bool,
    ) -> Result<SessionOutcome, SessionError> {
        self.set_state(SupervisorState::ForcedTermination);

        for id in self.registry.unreleased() {
            self.registry.mark_forced(id);
            match self.ledger.request_release(id) {
                Some(failures) => {
                    tracing::warn!(document = %id, failures = failures.len(), %reason, "document released by supervisor")
                }
                None => tracing::warn!(document = %id, %reason, "document still exporting; released when the export ends"),
            }
        }

        let killed = if kill { self.kill(pid)? } else { false };
        Ok(SessionOutcome::ForcedTermination { reason, killed })
    }

    fn kill(&self, pid: u32) -> Result<bool, SessionError> {
        match self.processes.kill(pid) {
            Ok(()) => {
                tracing::info!(pid, "host process killed");
                self.bus.publish(Event::new(EventKind::ProcessKilled).with_pid(pid));
                Ok(true)
            }
            Err(e) if !self.processes.is_alive(pid) => {
                tracing::debug!(pid, error = %e, "kill failed but the process is gone");
                self.bus.publish(
                    Event::new(EventKind::ProcessKilled)
                        .with_pid(pid)
                        .with_reason("already exited"),
                );
                Ok(true)
            }
            Err(e) => {
                tracing::error!(pid, error = %e, "cannot kill the host process");
                self.bus.publish(
                    Event::new(EventKind::ForcedTerminationFailed)
                        .with_pid(pid)
                        .with_reason(e.to_string()),
                );
                Err(SessionError::ForcedTerminationFailed {
                    pid,
                    deadline: self.params.deadline,
                    error: e.to_string(),
                })
            }
        }
    }

    fn set_state(&self, to: SupervisorState) {
        let mut state = self.state.lock().unwrap_or_else(|p| p.into_inner());
        if *state == SupervisorState::Waiting {
            *state = to;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ledger::{HandleKind, Owner};
    use crate::core::registry::DocumentState;
    use crate::error::HostError;
    use crate::host::{InMemoryHost, InMemoryProcesses};

    const PID: u32 = 4242;

    struct Fixture {
        host: Arc<InMemoryHost>,
        procs: Arc<InMemoryProcesses>,
        registry: Arc<TargetRegistry>,
        ledger: Arc<ResourceLedger>,
        sup: ProcessSupervisor,
    }

    fn fixture(params: SupervisorParams) -> Fixture {
        let bus = Bus::new(256);
        let host = InMemoryHost::new();
        let procs = InMemoryProcesses::new();
        procs.spawn(PID, true);
        host.bind_process(Arc::clone(&procs), PID);
        let registry = Arc::new(TargetRegistry::new("TargetGuid", bus.clone()));
        let ledger = Arc::new(ResourceLedger::new(Arc::clone(&registry), bus.clone()));
        let sup = ProcessSupervisor::new(
            procs.clone(),
            host.clone(),
            Arc::clone(&registry),
            Arc::clone(&ledger),
            bus,
            params,
        );
        Fixture {
            host,
            procs,
            registry,
            ledger,
            sup,
        }
    }

    fn params() -> SupervisorParams {
        SupervisorParams {
            poll_interval: Duration::from_millis(100),
            deadline: Duration::from_secs(2),
            terminate_when_idle: true,
            kill_on_cancel: true,
        }
    }

    fn track(fx: &Fixture) -> crate::core::registry::DocumentId {
        let proxy = fx.host.add_document("deck", 1).proxy();
        let id = fx.registry.register(proxy.clone()).unwrap();
        fx.ledger.track(Owner::Document(id), HandleKind::Document, proxy);
        id
    }

    #[test]
    fn capture_accepts_single_visible_candidate() {
        let fx = fixture(params());
        fx.procs.spawn(7, false);
        assert_eq!(fx.sup.capture("POWERPNT"), Ok(PID));
    }

    #[test]
    fn capture_rejects_ambiguity() {
        let fx = fixture(params());
        fx.procs.spawn(7, true);
        let err = fx.sup.capture("POWERPNT").unwrap_err();
        assert_eq!(
            err,
            SessionError::AmbiguousProcess {
                candidates: vec![PID, 7],
                visible: vec![PID, 7],
            }
        );
        assert_eq!(fx.procs.kill_calls(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_forces_release_then_kill() {
        let fx = fixture(params());
        let id = track(&fx);
        let token = CancellationToken::new();

        let started = Instant::now();
        let out = fx.sup.wait(PID, started, &token).await.unwrap();

        assert_eq!(
            out,
            SessionOutcome::ForcedTermination {
                reason: ForceReason::DeadlineElapsed,
                killed: true,
            }
        );
        assert!(started.elapsed() >= Duration::from_secs(2));
        assert_eq!(fx.registry.state(id), Some(DocumentState::ResourceReleased));
        assert!(fx.registry.get(id).unwrap().forced());
        assert_eq!(fx.procs.kill_calls(), 1);
        assert!(!fx.procs.is_alive(PID));
        assert_eq!(fx.sup.state(), SupervisorState::ForcedTermination);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_during_export_leaves_release_to_the_export() {
        let fx = fixture(params());
        let doc = fx.host.add_document("deck", 1);
        let id = fx.registry.register(doc.proxy()).unwrap();
        fx.ledger
            .track(Owner::Document(id), HandleKind::Document, doc.proxy());
        fx.registry.advance(id, DocumentState::Exporting);
        let token = CancellationToken::new();

        let out = fx.sup.wait(PID, Instant::now(), &token).await.unwrap();

        assert_eq!(
            out,
            SessionOutcome::ForcedTermination {
                reason: ForceReason::DeadlineElapsed,
                killed: true,
            }
        );
        assert_eq!(doc.release_calls(), 0);
        assert_eq!(fx.registry.state(id), Some(DocumentState::Exporting));
        assert_eq!(fx.ledger.open_handles(Owner::Document(id)), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn released_documents_lead_to_cooperative_quit() {
        let fx = fixture(params());
        let id = track(&fx);
        fx.ledger.release_all(id);
        let token = CancellationToken::new();

        let out = fx.sup.wait(PID, Instant::now(), &token).await.unwrap();

        assert_eq!(out, SessionOutcome::AllClosedGracefully);
        assert_eq!(fx.host.terminate_calls(), 1);
        assert_eq!(fx.procs.kill_calls(), 0);
        assert!(!fx.registry.get(id).unwrap().forced());
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_releases_and_kills() {
        let fx = fixture(params());
        let id = track(&fx);
        let token = CancellationToken::new();
        token.cancel();

        let out = fx.sup.wait(PID, Instant::now(), &token).await.unwrap();

        assert_eq!(
            out,
            SessionOutcome::ForcedTermination {
                reason: ForceReason::Cancelled,
                killed: true,
            }
        );
        assert_eq!(fx.registry.state(id), Some(DocumentState::ResourceReleased));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_without_kill_leaves_host_running() {
        let fx = fixture(SupervisorParams {
            kill_on_cancel: false,
            ..params()
        });
        track(&fx);
        let token = CancellationToken::new();
        token.cancel();

        let out = fx.sup.wait(PID, Instant::now(), &token).await.unwrap();

        assert_eq!(
            out,
            SessionOutcome::ForcedTermination {
                reason: ForceReason::Cancelled,
                killed: false,
            }
        );
        assert!(fx.procs.is_alive(PID));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_kill_of_live_process_is_reported() {
        let fx = fixture(params());
        track(&fx);
        fx.procs
            .fail_kills(HostError::PermissionDenied { error: "denied".into() }, true);
        let token = CancellationToken::new();

        let err = fx.sup.wait(PID, Instant::now(), &token).await.unwrap_err();
        assert_eq!(err.as_label(), "session_forced_termination_failed");
    }

    #[tokio::test(start_paused = true)]
    async fn failed_kill_of_gone_process_counts_as_killed() {
        let fx = fixture(params());
        track(&fx);
        fx.procs.fail_kills(HostError::Disconnected, false);
        let token = CancellationToken::new();

        let out = fx.sup.wait(PID, Instant::now(), &token).await.unwrap();
        assert_eq!(
            out,
            SessionOutcome::ForcedTermination {
                reason: ForceReason::DeadlineElapsed,
                killed: true,
            }
        );
    }
}
