use std::sync::{Arc, Mutex};

use tokio_util::sync::CancellationToken;

use crate::config::SessionConfig;
use crate::core::export::ExportCoordinator;
use crate::core::ledger::{HandleKind, Owner, ResourceLedger};
use crate::core::registry::TargetRegistry;
use crate::core::router::EventFilterRouter;
use crate::core::session::Session;
use crate::core::supervisor::{ProcessSupervisor, SupervisorParams};
use crate::events::Bus;
use crate::host::{HostApp, ProcessControl};
use crate::subscribers::Subscribe;

/// Builder for a [`Session`].
pub struct SessionBuilder {
    cfg: SessionConfig,
    host: Arc<dyn HostApp>,
    processes: Arc<dyn ProcessControl>,
    subscribers: Vec<Arc<dyn Subscribe>>,
    token: Option<CancellationToken>,
}

impl SessionBuilder {
    /// Creates a builder for supervising `host`, whose process is found through `processes`.
    pub fn new(
        cfg: SessionConfig,
        host: Arc<dyn HostApp>,
        processes: Arc<dyn ProcessControl>,
    ) -> Self {
        Self {
            cfg,
            host,
            processes,
            subscribers: Vec::new(),
            token: None,
        }
    }

    /// Sets event subscribers.
    ///
    /// Subscribers receive session events through dedicated workers with bounded queues.
    pub fn with_subscribers(mut self, subscribers: Vec<Arc<dyn Subscribe>>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Uses `token` (typically a child of an outer token) instead of a fresh one.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.token = Some(token);
        self
    }

    /// Builds the session and takes ownership of the application handle.
    ///
    /// Nothing touches the host yet; subscriptions are made by [`Session::run`]
    /// (or earlier through [`EventFilterRouter::attach`]).
    pub fn build(self) -> Arc<Session> {
        let cfg = self.cfg;
        let bus = Bus::new(cfg.bus_capacity_clamped());
        let registry = Arc::new(TargetRegistry::new(cfg.tag_key.clone(), bus.clone()));
        let ledger = Arc::new(ResourceLedger::new(Arc::clone(&registry), bus.clone()));
        ledger.track(Owner::Session, HandleKind::Application, self.host.clone());

        let coordinator = Arc::new(ExportCoordinator::new(
            Arc::clone(&registry),
            Arc::clone(&ledger),
            bus.clone(),
            cfg.output_dir.clone(),
            cfg.format.clone(),
            cfg.naming,
        ));
        let router = EventFilterRouter::new(
            Arc::clone(&self.host),
            Arc::clone(&registry),
            Arc::clone(&ledger),
            Arc::clone(&coordinator),
            bus.clone(),
            cfg.export_on_save,
        );
        let supervisor = ProcessSupervisor::new(
            self.processes,
            Arc::clone(&self.host),
            Arc::clone(&registry),
            Arc::clone(&ledger),
            bus.clone(),
            SupervisorParams {
                poll_interval: cfg.poll_interval_clamped(),
                deadline: cfg.deadline,
                terminate_when_idle: cfg.terminate_when_idle,
                kill_on_cancel: cfg.kill_on_cancel,
            },
        );

        Arc::new(Session {
            cfg,
            host: self.host,
            bus,
            subscribers: Mutex::new(self.subscribers),
            registry,
            ledger,
            coordinator,
            router,
            supervisor,
            token: self.token.unwrap_or_default(),
        })
    }
}
