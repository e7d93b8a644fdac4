//! # Event filter router: host lifecycle events → tracked-document actions.
//!
//! The host fires `BeforeClose`, `SaveCompleted` and `CloseFinal` for **every**
//! open document. The router subscribes once per class, resolves each event's
//! document tag through the [`TargetRegistry`] and dispatches only matches.
//!
//! ## Architecture
//! ```text
//! HostApp ── callback(class, doc') ──► Router::deliver
//!                                          │ resolve_document(doc')
//!                                          ├─ Unresolved → drop (trace only)
//!                                          └─ id ──► guarded dispatch
//!                                                  ├─ BeforeClose   → CloseRequested, export
//!                                                  ├─ SaveCompleted → export (if export_on_save)
//!                                                  └─ CloseFinal    → export (if not yet), request_release
//!                                                                     (deferred while another export runs)
//!                                                  panic / error → CallbackFault (never re-raised)
//! ```
//!
//! ## Rules
//! - `attach()` is idempotent: at most one active subscription per class
//! - Subscriptions are recorded here; [`EventFilterRouter::subscription_count`]
//!   answers from that record instead of inspecting the host
//! - Host callbacks hold a weak reference; dropping the router silences them

use std::collections::BTreeMap;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use crate::core::export::ExportCoordinator;
use crate::core::ledger::ResourceLedger;
use crate::core::registry::{DocumentId, DocumentState, TargetRegistry};
use crate::error::{ExportError, HostError};
use crate::events::{Bus, Event, EventKind};
use crate::host::{DocumentRef, HostApp, HostCallback, HostEventClass, SubscriptionId};

/// Routes host lifecycle events for tracked documents.
pub struct EventFilterRouter {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    host: Arc<dyn HostApp>,
    registry: Arc<TargetRegistry>,
    ledger: Arc<ResourceLedger>,
    coordinator: Arc<ExportCoordinator>,
    bus: Bus,
    export_on_save: bool,
    subscriptions: Mutex<BTreeMap<HostEventClass, SubscriptionId>>,
    dispatched: AtomicUsize,
    faults: AtomicUsize,
}

impl EventFilterRouter {
    /// Creates a detached router.
    pub fn new(
        host: Arc<dyn HostApp>,
        registry: Arc<TargetRegistry>,
        ledger: Arc<ResourceLedger>,
        coordinator: Arc<ExportCoordinator>,
        bus: Bus,
        export_on_save: bool,
    ) -> Self {
        Self {
            inner: Arc::new(RouterInner {
                host,
                registry,
                ledger,
                coordinator,
                bus,
                export_on_save,
                subscriptions: Mutex::new(BTreeMap::new()),
                dispatched: AtomicUsize::new(0),
                faults: AtomicUsize::new(0),
            }),
        }
    }

    /// Subscribes to every event class not yet subscribed.
    ///
    /// Stops at the first host refusal; classes subscribed before it stay active.
    pub fn attach(&self) -> Result<(), HostError> {
        let mut subs = self.inner.subscriptions();
        for class in HostEventClass::ALL {
            if subs.contains_key(&class) {
                continue;
            }
            let weak: Weak<RouterInner> = Arc::downgrade(&self.inner);
            let callback: HostCallback = Arc::new(move |doc: Arc<dyn DocumentRef>| {
                if let Some(inner) = weak.upgrade() {
                    inner.deliver(class, doc);
                }
            });
            let id = self.inner.host.subscribe(class, callback)?;
            tracing::debug!(class = %class, subscription = id.0, "subscribed to host events");
            subs.insert(class, id);
        }
        Ok(())
    }

    /// Removes every subscription. Host refusals are logged and skipped.
    pub fn detach(&self) {
        let subs = std::mem::take(&mut *self.inner.subscriptions());
        for (class, id) in subs {
            if let Err(e) = self.inner.host.unsubscribe(id) {
                tracing::warn!(class = %class, subscription = id.0, error = %e, "unsubscribe failed");
            }
        }
    }

    /// Active subscriptions for `class` (0 or 1).
    pub fn subscription_count(&self, class: HostEventClass) -> usize {
        usize::from(self.inner.subscriptions().contains_key(&class))
    }

    /// Delivers one host event as if the host had invoked the callback.
    pub fn deliver(&self, class: HostEventClass, document: Arc<dyn DocumentRef>) {
        self.inner.deliver(class, document);
    }

    /// Events that matched a tracked document and were dispatched.
    pub fn dispatched(&self) -> usize {
        self.inner.dispatched.load(Ordering::Relaxed)
    }

    /// Dispatches that failed or panicked (caught at this boundary).
    pub fn fault_count(&self) -> usize {
        self.inner.faults.load(Ordering::Relaxed)
    }
}

impl Drop for EventFilterRouter {
    fn drop(&mut self) {
        self.detach();
    }
}

impl RouterInner {
    fn subscriptions(&self) -> MutexGuard<'_, BTreeMap<HostEventClass, SubscriptionId>> {
        self.subscriptions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn deliver(&self, class: HostEventClass, document: Arc<dyn DocumentRef>) {
        let resolved = catch_unwind(AssertUnwindSafe(|| {
            self.registry.resolve_document(document.as_ref())
        }));
        let id = match resolved {
            Ok(Ok(id)) => id,
            Ok(Err(why)) => {
                tracing::trace!(class = %class, reason = why.as_label(), "event dropped");
                return;
            }
            Err(panic) => {
                self.fault(class, None, panic_message(panic.as_ref()));
                return;
            }
        };

        self.dispatched.fetch_add(1, Ordering::Relaxed);
        match catch_unwind(AssertUnwindSafe(|| self.dispatch(class, id))) {
            Ok(Ok(())) => {}
            Ok(Err(e)) => self.fault(class, Some(id), e.to_string()),
            Err(panic) => self.fault(class, Some(id), panic_message(panic.as_ref())),
        }
    }

    fn dispatch(&self, class: HostEventClass, id: DocumentId) -> Result<(), ExportError> {
        match class {
            HostEventClass::BeforeClose => {
                self.registry.advance(id, DocumentState::CloseRequested);
                self.bus
                    .publish(Event::new(EventKind::CloseRequested).with_document(id));
                self.export(id)
            }
            HostEventClass::SaveCompleted => {
                self.bus
                    .publish(Event::new(EventKind::SaveCompleted).with_document(id));
                if self.export_on_save {
                    self.export(id)?;
                }
                Ok(())
            }
            HostEventClass::CloseFinal => {
                self.bus
                    .publish(Event::new(EventKind::CloseFinal).with_document(id));
                let exported = match self.registry.state(id) {
                    Some(state) if state < DocumentState::Closed => self.export(id),
                    _ => Ok(()),
                };
                self.ledger.request_release(id);
                exported
            }
        }
    }

    /// Exports `id`; another context exporting it concurrently is not a failure.
    fn export(&self, id: DocumentId) -> Result<(), ExportError> {
        match self.coordinator.export(id) {
            Ok(_) | Err(ExportError::InProgress(_)) => Ok(()),
            Err(e) => Err(e),
        }
    }

    fn fault(&self, class: HostEventClass, id: Option<DocumentId>, reason: String) {
        self.faults.fetch_add(1, Ordering::Relaxed);
        tracing::error!(class = %class, document = ?id, reason = %reason, "callback fault contained");
        let ev = Event::new(EventKind::CallbackFault).with_reason(reason);
        self.bus.publish(match id {
            Some(id) => ev.with_document(id),
            None => ev,
        });
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(msg) = panic.downcast_ref::<&'static str>() {
        (*msg).to_string()
    } else if let Some(msg) = panic.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
