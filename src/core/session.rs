//! # Session: one supervised host, its tracked documents and their cleanup.
//!
//! A [`Session`] is the explicit context every component hangs off: config, event
//! bus, registry, ledger, export coordinator, router and process supervisor. It
//! replaces a process-wide application handle, so several sessions (and tests)
//! can coexist.
//!
//! ## Run
//! ```text
//! run()
//!   ├─ listener: Bus ─► SubscriberSet            (until the run is over)
//!   ├─ signal watcher ─► token.cancel()          (if cancel_on_signal)
//!   ├─ supervisor.capture(process_name)
//!   │     └─ Err(AmbiguousProcess) ─────────────────────────┐
//!   ├─ router.attach()                                      │
//!   ├─ supervisor.wait(pid, started, token)                 │
//!   └─ cleanup (always) ◄───────────────────────────────────┘
//!         ├─ request_release(doc) for anything still unreleased (recorded as forced)
//!         ├─ router.detach()
//!         ├─ ledger.release_session()       (application handle)
//!         └─ flush subscribers, build SessionReport
//! ```
//!
//! ## Rules
//! - `run()` is meant to be called once; a second call has no subscribers and
//!   finds every document already released.
//! - Documents may be tracked before or during `run()`.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::SessionConfig;
use crate::core::export::{ExportCoordinator, ExportJob};
use crate::core::ledger::{HandleKind, Owner, ResourceLedger};
use crate::core::registry::{DocumentId, TargetRegistry};
use crate::core::report::{DocumentReport, SessionOutcome, SessionReport};
use crate::core::router::EventFilterRouter;
use crate::core::shutdown;
use crate::core::supervisor::ProcessSupervisor;
use crate::error::{ExportError, HostError, SessionError};
use crate::events::Bus;
use crate::host::{DocumentRef, HostApp};
use crate::subscribers::{Subscribe, SubscriberSet};

/// Upper bound for draining subscriber queues at the end of a run.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(5);

/// A supervised host session. Build it with [`SessionBuilder`](crate::SessionBuilder).
pub struct Session {
    pub(crate) cfg: SessionConfig,
    pub(crate) host: Arc<dyn HostApp>,
    pub(crate) bus: Bus,
    pub(crate) subscribers: Mutex<Vec<Arc<dyn Subscribe>>>,
    pub(crate) registry: Arc<TargetRegistry>,
    pub(crate) ledger: Arc<ResourceLedger>,
    pub(crate) coordinator: Arc<ExportCoordinator>,
    pub(crate) router: EventFilterRouter,
    pub(crate) supervisor: ProcessSupervisor,
    pub(crate) token: CancellationToken,
}

impl Session {
    /// Starts tracking `document`: tags it and takes ownership of its proxy.
    pub fn track(&self, document: Arc<dyn DocumentRef>) -> Result<DocumentId, HostError> {
        let id = self.registry.register(Arc::clone(&document))?;
        self.ledger
            .track(Owner::Document(id), HandleKind::Document, document);
        tracing::debug!(document = %id, "document tracked");
        Ok(id)
    }

    /// Opens `path` through the host and tracks the resulting document.
    pub fn open(&self, path: impl AsRef<Path>) -> Result<DocumentId, HostError> {
        let path = path.as_ref();
        let document = self.host.open(path)?;
        match self.registry.register(Arc::clone(&document)) {
            Ok(id) => {
                self.ledger
                    .track(Owner::Document(id), HandleKind::Document, document);
                tracing::debug!(document = %id, path = %path.display(), "document opened");
                Ok(id)
            }
            Err(e) => {
                if let Err(release) = document.release() {
                    tracing::warn!(path = %path.display(), error = %release, "releasing untracked document failed");
                }
                Err(e)
            }
        }
    }

    /// Exports every page of `id` (or returns the job recorded earlier).
    pub fn export(&self, id: DocumentId) -> Result<ExportJob, ExportError> {
        self.coordinator.export(id)
    }

    /// Token that cancels [`Session::run`]. Cleanup still runs.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Session configuration.
    pub fn config(&self) -> &SessionConfig {
        &self.cfg
    }

    /// Event bus shared by every component.
    pub fn bus(&self) -> &Bus {
        &self.bus
    }

    /// Tracked documents.
    pub fn registry(&self) -> &Arc<TargetRegistry> {
        &self.registry
    }

    /// Handle release bookkeeping.
    pub fn ledger(&self) -> &Arc<ResourceLedger> {
        &self.ledger
    }

    /// Host event routing.
    pub fn router(&self) -> &EventFilterRouter {
        &self.router
    }

    /// Host process supervision.
    pub fn supervisor(&self) -> &ProcessSupervisor {
        &self.supervisor
    }

    /// Supervises the host until a terminal outcome, then cleans up.
    pub async fn run(&self) -> SessionReport {
        let started = Instant::now();
        let stop = CancellationToken::new();
        let listener = self.spawn_listener(stop.clone());
        let signals = self
            .cfg
            .cancel_on_signal
            .then(|| shutdown::cancel_on_signal(self.token.clone(), self.bus.clone()));

        let (outcome, host_pid) = match self.supervisor.capture(&self.cfg.process_name) {
            Ok(pid) => {
                if let Err(e) = self.router.attach() {
                    tracing::error!(error = %e, "cannot subscribe to host events; only the deadline applies");
                }
                (self.supervisor.wait(pid, started, &self.token).await, Some(pid))
            }
            Err(e) => (Err(e), None),
        };

        self.cleanup(&outcome);
        if let Some(handle) = signals {
            handle.abort();
        }
        stop.cancel();
        if tokio::time::timeout(FLUSH_TIMEOUT, listener).await.is_err() {
            tracing::warn!("subscribers did not drain in time");
        }

        self.report(outcome, host_pid)
    }

    fn cleanup(&self, outcome: &Result<SessionOutcome, SessionError>) {
        for id in self.registry.unreleased() {
            self.registry.mark_forced(id);
            match self.ledger.request_release(id) {
                Some(failures) => {
                    tracing::warn!(document = %id, failures = failures.len(), "released during session cleanup")
                }
                None => tracing::warn!(document = %id, "still exporting at cleanup; released when the export ends"),
            }
        }
        self.router.detach();
        for failure in self.ledger.release_session() {
            tracing::warn!(error = %failure, "application handle release failed");
        }
        match outcome {
            Ok(o) => tracing::info!(outcome = ?o, "session finished"),
            Err(e) => tracing::error!(error = %e, label = e.as_label(), "session failed"),
        }
    }

    fn report(
        &self,
        outcome: Result<SessionOutcome, SessionError>,
        host_pid: Option<u32>,
    ) -> SessionReport {
        let documents = self
            .registry
            .documents()
            .into_iter()
            .map(|doc| DocumentReport {
                id: doc.id(),
                tag: doc.tag().clone(),
                state: doc.state(),
                forced: doc.forced(),
                job: doc.job(),
            })
            .collect();
        SessionReport {
            outcome,
            host_pid,
            documents,
            cleanup_failures: self.ledger.failures(),
        }
    }

    /// Forwards bus events to the subscriber set until `stop`, then drains and shuts it down.
    fn spawn_listener(&self, stop: CancellationToken) -> JoinHandle<()> {
        let subs = std::mem::take(&mut *self.subscribers.lock().unwrap_or_else(|p| p.into_inner()));
        let set = SubscriberSet::new(subs, self.bus.clone());
        let mut rx = self.bus.subscribe();

        tokio::spawn(async move {
            loop {
                tokio::select! {
                    biased;
                    ev = rx.recv() => match ev {
                        Ok(ev) => set.emit(&ev),
                        Err(RecvError::Lagged(skipped)) => {
                            tracing::warn!(skipped, "event listener lagged behind the bus");
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = stop.cancelled() => {
                        while let Ok(ev) = rx.try_recv() {
                            set.emit(&ev);
                        }
                        break;
                    }
                }
            }
            set.shutdown().await;
        })
    }
}
