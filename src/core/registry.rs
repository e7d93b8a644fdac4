//! # Target registry: stable identities for tracked documents.
//!
//! The host delivers every lifecycle event with *some* proxy object for the
//! document, not necessarily the one the runtime registered, and may recycle its
//! own object identifiers after release. The registry therefore writes a fresh
//! random tag onto each document and maps observed tags back to a stable
//! [`DocumentId`].
//!
//! ## Architecture
//! ```text
//! register(doc) ──► id = next++ ; tag = uuid v4 ; doc.set_tag(key, tag)
//!                     └─► tags[tag] = id ; docs[id] = TrackedDocument{Open}
//!
//! host event(doc') ──► doc'.tag(key) ──► resolve(tag)
//!                                          ├─ unknown tag        → Unresolved::UnknownTag
//!                                          ├─ ResourceReleased   → Unresolved::Finalized
//!                                          └─ otherwise          → id
//! ```
//!
//! ## Rules
//! - State only moves forward: `Open < CloseRequested < Exporting < Closed < ResourceReleased`
//! - Each document has its own mutex; there is no cross-document lock on mutation
//! - Every state change wakes the supervisor through [`TargetRegistry::changed`]

use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, RwLock};

use tokio::sync::Notify;
use uuid::Uuid;

use crate::core::export::ExportJob;
use crate::error::{HostError, Unresolved};
use crate::events::{Bus, Event, EventKind};
use crate::host::DocumentRef;

/// Stable identity of a tracked document, assigned at registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocumentId(u64);

impl DocumentId {
    /// Builds an id from its raw value.
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw value.
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doc-{}", self.0)
    }
}

/// Application-visible marker written onto a tracked document.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Tag(Arc<str>);

impl Tag {
    /// A new collision-free tag (random 128-bit identifier).
    pub fn generate() -> Self {
        Self(Arc::from(Uuid::new_v4().to_string()))
    }

    /// Tag text.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Tag {
    fn from(s: &str) -> Self {
        Self(Arc::from(s))
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle state of a tracked document. Ordered; never revisited.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DocumentState {
    /// Registered, host has it open.
    Open,
    /// The host announced the close.
    CloseRequested,
    /// Pages are being exported.
    Exporting,
    /// Every page has an export outcome.
    Closed,
    /// Every handle was released.
    ResourceReleased,
}

impl DocumentState {
    /// Returns a short stable label (snake_case).
    pub fn as_label(&self) -> &'static str {
        match self {
            DocumentState::Open => "open",
            DocumentState::CloseRequested => "close_requested",
            DocumentState::Exporting => "exporting",
            DocumentState::Closed => "closed",
            DocumentState::ResourceReleased => "resource_released",
        }
    }
}

/// Mutable part of a [`TrackedDocument`], guarded by its own mutex.
#[derive(Debug)]
pub(crate) struct DocumentSlot {
    pub(crate) state: DocumentState,
    pub(crate) job: Option<ExportJob>,
    pub(crate) forced: bool,
    /// Release was requested; an export in flight releases on completion.
    pub(crate) release_pending: bool,
}

impl DocumentSlot {
    /// Moves forward to `to`; returns `false` (and changes nothing) otherwise.
    pub(crate) fn advance(&mut self, to: DocumentState) -> bool {
        if to > self.state {
            self.state = to;
            true
        } else {
            false
        }
    }
}

/// A document the session registered interest in.
pub struct TrackedDocument {
    id: DocumentId,
    tag: Tag,
    document: Arc<dyn DocumentRef>,
    slot: Mutex<DocumentSlot>,
}

impl TrackedDocument {
    /// Stable id.
    pub fn id(&self) -> DocumentId {
        self.id
    }

    /// Tag written onto the document.
    pub fn tag(&self) -> &Tag {
        &self.tag
    }

    /// Proxy captured at registration.
    pub fn document(&self) -> &Arc<dyn DocumentRef> {
        &self.document
    }

    /// Current state.
    pub fn state(&self) -> DocumentState {
        self.lock().state
    }

    /// Whether the supervisor, rather than the host's own close, released this document.
    pub fn forced(&self) -> bool {
        self.lock().forced
    }

    /// Recorded export job, if any.
    pub fn job(&self) -> Option<ExportJob> {
        self.lock().job.clone()
    }

    /// Locks the slot. A panic inside a host callback may poison the mutex; the
    /// state it guards stays consistent, so the poison is ignored.
    pub(crate) fn lock(&self) -> MutexGuard<'_, DocumentSlot> {
        self.slot.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl fmt::Debug for TrackedDocument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedDocument")
            .field("id", &self.id)
            .field("tag", &self.tag)
            .field("state", &self.state())
            .finish()
    }
}

/// Registry of tracked documents and the `tag → id` mapping.
pub struct TargetRegistry {
    tag_key: String,
    tags: RwLock<HashMap<Tag, DocumentId>>,
    docs: RwLock<BTreeMap<DocumentId, Arc<TrackedDocument>>>,
    next_id: AtomicU64,
    changed: Arc<Notify>,
    bus: Bus,
}

impl TargetRegistry {
    /// Creates an empty registry writing tags under `tag_key`.
    pub fn new(tag_key: impl Into<String>, bus: Bus) -> Self {
        Self {
            tag_key: tag_key.into(),
            tags: RwLock::new(HashMap::new()),
            docs: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            changed: Arc::new(Notify::new()),
            bus,
        }
    }

    /// Key under which tags are stored on documents.
    pub fn tag_key(&self) -> &str {
        &self.tag_key
    }

    /// Registers `document`: new id, new tag written onto the document.
    ///
    /// Fails only when the host refuses the tag write; nothing is recorded then.
    pub fn register(&self, document: Arc<dyn DocumentRef>) -> Result<DocumentId, HostError> {
        let tag = Tag::generate();
        document.set_tag(&self.tag_key, tag.as_str())?;

        let id = DocumentId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let tracked = Arc::new(TrackedDocument {
            id,
            tag: tag.clone(),
            document,
            slot: Mutex::new(DocumentSlot {
                state: DocumentState::Open,
                job: None,
                forced: false,
                release_pending: false,
            }),
        });

        write(&self.tags).insert(tag.clone(), id);
        write(&self.docs).insert(id, tracked);
        self.bus.publish(
            Event::new(EventKind::DocumentRegistered)
                .with_document(id)
                .with_reason(tag.as_str()),
        );
        self.changed.notify_one();
        Ok(id)
    }

    /// Tag issued for `id`.
    pub fn tag_of(&self, id: DocumentId) -> Option<Tag> {
        self.get(id).map(|d| d.tag().clone())
    }

    /// Maps an observed tag to a live tracked document.
    pub fn resolve(&self, observed: &str) -> Result<DocumentId, Unresolved> {
        let id = read(&self.tags)
            .get(&Tag::from(observed))
            .copied()
            .ok_or(Unresolved::UnknownTag)?;
        match self.state(id) {
            Some(DocumentState::ResourceReleased) | None => Err(Unresolved::Finalized),
            Some(_) => Ok(id),
        }
    }

    /// Reads the tag off an event's document proxy and resolves it.
    pub fn resolve_document(&self, document: &dyn DocumentRef) -> Result<DocumentId, Unresolved> {
        let tag = document.tag(&self.tag_key).ok_or(Unresolved::Untagged)?;
        self.resolve(&tag)
    }

    /// Tracked document by id.
    pub fn get(&self, id: DocumentId) -> Option<Arc<TrackedDocument>> {
        read(&self.docs).get(&id).cloned()
    }

    /// Current state of `id`.
    pub fn state(&self, id: DocumentId) -> Option<DocumentState> {
        self.get(id).map(|d| d.state())
    }

    /// Moves `id` forward to `to`. Returns `true` if the state changed.
    pub fn advance(&self, id: DocumentId, to: DocumentState) -> bool {
        let Some(doc) = self.get(id) else {
            return false;
        };
        let moved = doc.lock().advance(to);
        if moved {
            self.changed.notify_one();
        }
        moved
    }

    /// Records that the supervisor (not the host) finalized `id`.
    pub fn mark_forced(&self, id: DocumentId) {
        if let Some(doc) = self.get(id) {
            let mut slot = doc.lock();
            if slot.state < DocumentState::ResourceReleased {
                slot.forced = true;
            }
        }
    }

    /// All tracked documents, in registration order.
    pub fn documents(&self) -> Vec<Arc<TrackedDocument>> {
        read(&self.docs).values().cloned().collect()
    }

    /// Every tracked id, in registration order.
    pub fn ids(&self) -> Vec<DocumentId> {
        read(&self.docs).keys().copied().collect()
    }

    /// Ids of documents not yet `ResourceReleased`, in registration order.
    pub fn unreleased(&self) -> Vec<DocumentId> {
        self.documents()
            .into_iter()
            .filter(|d| d.state() < DocumentState::ResourceReleased)
            .map(|d| d.id())
            .collect()
    }

    /// `true` when every tracked document is `ResourceReleased` (vacuously with none).
    pub fn all_released(&self) -> bool {
        self.unreleased().is_empty()
    }

    /// Number of tracked documents.
    pub fn len(&self) -> usize {
        read(&self.docs).len()
    }

    /// `true` when nothing was registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Notified on every registration and state change.
    pub fn changed(&self) -> Arc<Notify> {
        Arc::clone(&self.changed)
    }
}

fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
    lock.read().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
    lock.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::host::InMemoryHost;

    fn registry() -> TargetRegistry {
        TargetRegistry::new("TargetGuid", Bus::new(16))
    }

    #[test]
    fn register_writes_unique_tags() {
        let host = InMemoryHost::new();
        let reg = registry();
        let a = host.add_document("a", 1);
        let b = host.add_document("b", 1);

        let ida = reg.register(a.proxy()).unwrap();
        let idb = reg.register(b.proxy()).unwrap();
        assert_ne!(ida, idb);

        let ta = a.tag("TargetGuid").unwrap();
        let tb = b.tag("TargetGuid").unwrap();
        assert_ne!(ta, tb);
        assert_eq!(reg.tag_of(ida).unwrap().as_str(), ta);
        assert_eq!(reg.resolve(&tb), Ok(idb));
    }

    #[test]
    fn resolve_rejects_unknown_and_finalized() {
        let host = InMemoryHost::new();
        let reg = registry();
        let doc = host.add_document("a", 1);
        let id = reg.register(doc.proxy()).unwrap();
        let tag = reg.tag_of(id).unwrap();

        assert_eq!(reg.resolve("not-a-tag"), Err(Unresolved::UnknownTag));
        assert!(reg.advance(id, DocumentState::ResourceReleased));
        assert_eq!(reg.resolve(tag.as_str()), Err(Unresolved::Finalized));
    }

    #[test]
    fn untagged_proxy_is_unresolved() {
        let host = InMemoryHost::new();
        let reg = registry();
        let stranger = host.add_document("other", 1);
        assert_eq!(
            reg.resolve_document(&stranger),
            Err(Unresolved::Untagged)
        );
    }

    #[test]
    fn state_never_moves_backwards() {
        let host = InMemoryHost::new();
        let reg = registry();
        let id = reg.register(host.add_document("a", 1).proxy()).unwrap();

        assert!(reg.advance(id, DocumentState::Exporting));
        assert!(!reg.advance(id, DocumentState::CloseRequested));
        assert!(!reg.advance(id, DocumentState::Exporting));
        assert_eq!(reg.state(id), Some(DocumentState::Exporting));
    }

    #[test]
    fn all_released_tracks_every_document() {
        let host = InMemoryHost::new();
        let reg = registry();
        assert!(reg.all_released());

        let a = reg.register(host.add_document("a", 1).proxy()).unwrap();
        let b = reg.register(host.add_document("b", 1).proxy()).unwrap();
        reg.advance(a, DocumentState::ResourceReleased);
        assert_eq!(reg.ids(), vec![a, b]);
        assert_eq!(reg.unreleased(), vec![b]);
        assert!(!reg.all_released());

        reg.advance(b, DocumentState::ResourceReleased);
        assert!(reg.all_released());
    }
}
