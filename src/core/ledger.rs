//! # Resource ledger: exactly-once release of host handles.
//!
//! Every native proxy the runtime holds (document, page, clipboard buffer,
//! application) is tracked as a [`ResourceHandle`] with a single owner. Release
//! goes through one idempotent path, [`ResourceLedger::release`], which may be
//! reached from several call sites (explicit cleanup, [`HandleGuard`] drop, forced
//! cleanup) without double-releasing.
//!
//! ## Flow
//! ```text
//! track(owner, kind, proxy) ──► handles[owner].push(handle{released=false})
//!
//! release(handle) ──► released.swap(true)
//!                       ├─ was true  → AlreadyReleased (no side effect)
//!                       └─ was false → proxy.release()
//!                                        ├─ Ok   → HandleReleased
//!                                        └─ Err  → ReleaseFailed (logged, recorded)
//!
//! release_all(doc) ──► release(h) for every handle of doc (continue past failures)
//!                  └─► registry.advance(doc, ResourceReleased)   (unconditional)
//!
//! request_release(doc) ──► slot.release_pending = true
//!                            ├─ Exporting → None; the export releases when its job is recorded
//!                            └─ otherwise → release_all(doc)
//! ```

use std::collections::HashMap;
use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;

use crate::core::registry::{DocumentId, DocumentState, TargetRegistry};
use crate::error::HostError;
use crate::events::{Bus, Event, EventKind};
use crate::host::Releasable;

/// Category of native resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandleKind {
    /// Document proxy.
    Document,
    /// Page/slide proxy.
    Page,
    /// Clipboard buffer.
    Clipboard,
    /// Application proxy.
    Application,
}

impl HandleKind {
    /// Returns a short stable label (snake_case).
    pub fn as_label(&self) -> &'static str {
        match self {
            HandleKind::Document => "document",
            HandleKind::Page => "page",
            HandleKind::Clipboard => "clipboard",
            HandleKind::Application => "application",
        }
    }
}

impl fmt::Display for HandleKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Exclusive owner of a handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Owner {
    /// A tracked document.
    Document(DocumentId),
    /// The session itself (application proxy).
    Session,
}

impl Owner {
    fn document(&self) -> Option<DocumentId> {
        match self {
            Owner::Document(id) => Some(*id),
            Owner::Session => None,
        }
    }
}

/// Result of a successful [`ResourceLedger::release`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Released {
    /// This call performed the release.
    Now,
    /// An earlier call already did; nothing happened.
    AlreadyReleased,
}

/// A handle whose release failed. Recorded; cleanup continues.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("releasing {kind} handle of {owner:?} failed: {error}")]
pub struct ReleaseFailure {
    /// Owner of the handle.
    pub owner: Owner,
    /// Kind of the handle.
    pub kind: HandleKind,
    /// Host failure.
    pub error: HostError,
}

/// A tracked native resource.
pub struct ResourceHandle {
    id: u64,
    kind: HandleKind,
    owner: Owner,
    released: AtomicBool,
    resource: Mutex<Option<Arc<dyn Releasable>>>,
}

impl ResourceHandle {
    /// Ledger-unique handle id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Resource category.
    pub fn kind(&self) -> HandleKind {
        self.kind
    }

    /// Exclusive owner.
    pub fn owner(&self) -> Owner {
        self.owner
    }

    /// `true` once released; never reset.
    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }
}

impl fmt::Debug for ResourceHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourceHandle")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("owner", &self.owner)
            .field("released", &self.is_released())
            .finish()
    }
}

/// Releases its handle through the ledger when dropped.
pub struct HandleGuard<'a> {
    ledger: &'a ResourceLedger,
    handle: Arc<ResourceHandle>,
}

impl HandleGuard<'_> {
    /// The guarded handle.
    pub fn handle(&self) -> &Arc<ResourceHandle> {
        &self.handle
    }
}

impl Drop for HandleGuard<'_> {
    fn drop(&mut self) {
        let _ = self.ledger.release(&self.handle);
    }
}

/// Owns release state for every handle of the session.
pub struct ResourceLedger {
    handles: Mutex<HashMap<Owner, Vec<Arc<ResourceHandle>>>>,
    failures: Mutex<Vec<ReleaseFailure>>,
    next_id: AtomicU64,
    registry: Arc<TargetRegistry>,
    bus: Bus,
}

impl ResourceLedger {
    /// Creates an empty ledger finalizing documents in `registry`.
    pub fn new(registry: Arc<TargetRegistry>, bus: Bus) -> Self {
        Self {
            handles: Mutex::new(HashMap::new()),
            failures: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            registry,
            bus,
        }
    }

    /// Starts tracking `resource` for `owner`.
    pub fn track(
        &self,
        owner: Owner,
        kind: HandleKind,
        resource: Arc<dyn Releasable>,
    ) -> Arc<ResourceHandle> {
        let handle = Arc::new(ResourceHandle {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            kind,
            owner,
            released: AtomicBool::new(false),
            resource: Mutex::new(Some(resource)),
        });

        let mut handles = lock(&self.handles);
        let list = handles.entry(owner).or_default();
        list.retain(|h| !h.is_released());
        list.push(Arc::clone(&handle));
        handle
    }

    /// Tracks `resource` and returns a guard that releases it on every exit path.
    pub fn guard(
        &self,
        owner: Owner,
        kind: HandleKind,
        resource: Arc<dyn Releasable>,
    ) -> HandleGuard<'_> {
        HandleGuard {
            ledger: self,
            handle: self.track(owner, kind, resource),
        }
    }

    /// Releases `handle`. Idempotent: only the first call has a side effect.
    ///
    /// A failed release still retires the handle; the failure is logged,
    /// published and kept for the session report.
    pub fn release(&self, handle: &ResourceHandle) -> Result<Released, ReleaseFailure> {
        if handle.released.swap(true, Ordering::AcqRel) {
            return Ok(Released::AlreadyReleased);
        }
        let Some(resource) = lock(&handle.resource).take() else {
            return Ok(Released::AlreadyReleased);
        };

        let result = catch_unwind(AssertUnwindSafe(|| resource.release()))
            .unwrap_or_else(|_| Err(HostError::fail("release panicked")));
        drop(resource);

        match result {
            Ok(()) => {
                self.bus.publish(self.event(EventKind::HandleReleased, handle));
                Ok(Released::Now)
            }
            Err(error) => {
                tracing::warn!(
                    owner = ?handle.owner,
                    kind = %handle.kind,
                    error = %error,
                    "handle release failed; continuing cleanup"
                );
                self.bus.publish(
                    self.event(EventKind::ReleaseFailed, handle)
                        .with_reason(error.to_string()),
                );
                let failure = ReleaseFailure {
                    owner: handle.owner,
                    kind: handle.kind,
                    error,
                };
                lock(&self.failures).push(failure.clone());
                Err(failure)
            }
        }
    }

    /// Releases every handle of `id`, continuing past failures, then marks the
    /// document `ResourceReleased`.
    pub fn release_all(&self, id: DocumentId) -> Vec<ReleaseFailure> {
        let failures = self.release_owner(Owner::Document(id));
        self.registry.advance(id, DocumentState::ResourceReleased);
        self.bus.publish(
            Event::new(EventKind::DocumentReleased)
                .with_document(id)
                .with_count(failures.len()),
        );
        failures
    }

    /// Releases `id` unless an export is using its handles right now.
    ///
    /// Returns `None` when the release was deferred: the running export calls
    /// [`ResourceLedger::release_all`] itself once its job is recorded. Exports
    /// that have not started yet are refused from here on.
    pub fn request_release(&self, id: DocumentId) -> Option<Vec<ReleaseFailure>> {
        if let Some(doc) = self.registry.get(id) {
            let mut slot = doc.lock();
            slot.release_pending = true;
            if slot.state == DocumentState::Exporting {
                tracing::debug!(document = %id, "export in flight; release deferred");
                return None;
            }
        }
        Some(self.release_all(id))
    }

    /// Releases session-owned handles (application proxy).
    pub fn release_session(&self) -> Vec<ReleaseFailure> {
        self.release_owner(Owner::Session)
    }

    /// Handles of `owner` not yet released.
    pub fn open_handles(&self, owner: Owner) -> usize {
        lock(&self.handles)
            .get(&owner)
            .map(|list| list.iter().filter(|h| !h.is_released()).count())
            .unwrap_or(0)
    }

    /// Every release failure recorded so far.
    pub fn failures(&self) -> Vec<ReleaseFailure> {
        lock(&self.failures).clone()
    }

    fn release_owner(&self, owner: Owner) -> Vec<ReleaseFailure> {
        let handles = lock(&self.handles).remove(&owner).unwrap_or_default();
        handles
            .iter()
            .filter_map(|h| self.release(h).err())
            .collect()
    }

    fn event(&self, kind: EventKind, handle: &ResourceHandle) -> Event {
        let ev = Event::new(kind).with_handle(handle.kind);
        match handle.owner.document() {
            Some(id) => ev.with_document(id),
            None => ev,
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
