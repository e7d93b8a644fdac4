//! # Lifecycle events emitted by the supervision runtime.
//!
//! The [`EventKind`] enum classifies event types across four categories:
//! - **Document events**: registration and host lifecycle notifications that matched a tracked document
//! - **Export events**: per-job and per-page export progress
//! - **Resource events**: handle releases and release failures
//! - **Process events**: capture, cooperative quit, deadline, kill
//!
//! The [`Event`] struct carries additional metadata such as timestamps, document id,
//! page index, a count, handle kind, process id and a reason.
//!
//! ## Ordering guarantees
//! Each event has a globally unique sequence number (`seq`) that increases monotonically.
//!
//! ## Example
//! ```rust
//! use hostvisor::{DocumentId, Event, EventKind};
//!
//! let ev = Event::new(EventKind::PageExportFailed)
//!     .with_document(DocumentId::from_raw(1))
//!     .with_page(3)
//!     .with_reason("export rejected");
//!
//! assert_eq!(ev.kind, EventKind::PageExportFailed);
//! assert_eq!(ev.page, Some(3));
//! assert_eq!(ev.reason.as_deref(), Some("export rejected"));
//! ```

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::SystemTime;

use crate::core::{DocumentId, HandleKind};

/// Global sequence counter for event ordering.
static EVENT_SEQ: AtomicU64 = AtomicU64::new(0);

/// Classification of lifecycle events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    // === Subscriber events ===
    /// Subscriber panicked during event processing.
    ///
    /// Sets: `reason` (subscriber name and panic message).
    SubscriberPanicked,

    /// Subscriber dropped an event (queue full or worker closed).
    ///
    /// Sets: `reason` (subscriber name and "full"/"closed").
    SubscriberOverflow,

    // === Document events ===
    /// A document was registered and tagged.
    ///
    /// Sets: `document`, `reason` (the tag).
    DocumentRegistered,

    /// The host announced that a tracked document is about to close.
    ///
    /// Sets: `document`.
    CloseRequested,

    /// The host finished saving a tracked document.
    ///
    /// Sets: `document`.
    SaveCompleted,

    /// The host finished closing a tracked document.
    ///
    /// Sets: `document`.
    CloseFinal,

    /// A callback failed or panicked inside dispatch; the host never saw it.
    ///
    /// Sets: `document` (if resolved), `reason`.
    CallbackFault,

    // === Export events ===
    /// Export job started.
    ///
    /// Sets: `document`, `count` (pages observed), `path` (output directory).
    ExportStarted,

    /// One page was written.
    ///
    /// Sets: `document`, `page`, `path`.
    PageExported,

    /// One page failed; the job continues.
    ///
    /// Sets: `document`, `page`, `reason`.
    PageExportFailed,

    /// Every page has an outcome; the document is `Closed`.
    ///
    /// Sets: `document`, `count` (failed pages), `path`.
    ExportCompleted,

    // === Resource events ===
    /// A handle was released (first and only side effect).
    ///
    /// Sets: `document` (unless session-owned), `handle`.
    HandleReleased,

    /// Releasing a handle failed; cleanup continues.
    ///
    /// Sets: `document` (unless session-owned), `handle`, `reason`.
    ReleaseFailed,

    /// All handles of a document were walked; the document is `ResourceReleased`.
    ///
    /// Sets: `document`, `count` (release failures).
    DocumentReleased,

    // === Process events ===
    /// The host process was identified.
    ///
    /// Sets: `pid`.
    ProcessCaptured,

    /// Process disambiguation failed; nothing will be killed.
    ///
    /// Sets: `reason` (candidate list).
    AmbiguousProcess,

    /// Cooperative quit was requested from the host application.
    ///
    /// Sets: `pid`, `reason` (on failure).
    HostTerminateRequested,

    /// The session was cancelled from outside.
    ShutdownRequested,

    /// The session deadline elapsed while documents or the host were still alive.
    ///
    /// Sets: `pid`.
    DeadlineElapsed,

    /// The host process was killed (or was already gone when the kill ran).
    ///
    /// Sets: `pid`, `reason` (kill error if the process was already gone).
    ProcessKilled,

    /// The kill call failed and the process is still alive.
    ///
    /// Sets: `pid`, `reason`.
    ForcedTerminationFailed,

    /// Every tracked document was released and the host exited on its own.
    ///
    /// Sets: `pid`.
    AllClosedGracefully,
}

/// Lifecycle event with optional metadata.
///
/// - `seq`: monotonic global sequence for ordering
/// - `at`: wall-clock timestamp (for logs)
/// - other optional fields are set depending on the [`EventKind`]
#[derive(Clone, Debug)]
pub struct Event {
    /// Globally unique, monotonically increasing sequence number.
    pub seq: u64,
    /// Wall-clock timestamp.
    pub at: SystemTime,
    /// Event classification.
    pub kind: EventKind,

    /// Tracked document, if applicable.
    pub document: Option<DocumentId>,
    /// Page index (1-based).
    pub page: Option<u32>,
    /// Number of pages or failures, depending on the kind.
    pub count: Option<usize>,
    /// Kind of the released handle.
    pub handle: Option<HandleKind>,
    /// Host process identifier.
    pub pid: Option<u32>,
    /// Output file or directory.
    pub path: Option<Arc<Path>>,
    /// Human-readable reason (errors, tags, candidate lists).
    pub reason: Option<Arc<str>>,
}

impl Event {
    /// Creates a new event of the given kind with current timestamp and next sequence number.
    pub fn new(kind: EventKind) -> Self {
        Self {
            seq: EVENT_SEQ.fetch_add(1, AtomicOrdering::Relaxed),
            at: SystemTime::now(),
            kind,
            document: None,
            page: None,
            count: None,
            handle: None,
            pid: None,
            path: None,
            reason: None,
        }
    }

    /// Attaches a document id.
    #[inline]
    pub fn with_document(mut self, id: DocumentId) -> Self {
        self.document = Some(id);
        self
    }

    /// Attaches a 1-based page index.
    #[inline]
    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    /// Attaches a page or failure count.
    #[inline]
    pub fn with_count(mut self, count: usize) -> Self {
        self.count = Some(count);
        self
    }

    /// Attaches a handle kind.
    #[inline]
    pub fn with_handle(mut self, kind: HandleKind) -> Self {
        self.handle = Some(kind);
        self
    }

    /// Attaches a process id.
    #[inline]
    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    /// Attaches an output path.
    #[inline]
    pub fn with_path(mut self, path: impl Into<Arc<Path>>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Attaches a human-readable reason.
    #[inline]
    pub fn with_reason(mut self, reason: impl Into<Arc<str>>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    /// Creates a subscriber overflow event.
    #[inline]
    pub fn subscriber_overflow(subscriber: &'static str, reason: &'static str) -> Self {
        Event::new(EventKind::SubscriberOverflow)
            .with_reason(format!("subscriber={subscriber} reason={reason}"))
    }

    /// Creates a subscriber panic event.
    #[inline]
    pub fn subscriber_panicked(subscriber: &'static str, info: String) -> Self {
        Event::new(EventKind::SubscriberPanicked)
            .with_reason(format!("subscriber={subscriber} info={info}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sequence_is_monotonic() {
        let a = Event::new(EventKind::CloseRequested);
        let b = Event::new(EventKind::CloseFinal);
        assert!(b.seq > a.seq);
    }

    #[test]
    fn builders_fill_metadata() {
        let ev = Event::new(EventKind::ReleaseFailed)
            .with_document(DocumentId::from_raw(4))
            .with_handle(HandleKind::Page)
            .with_reason("disconnected");
        assert_eq!(ev.document, Some(DocumentId::from_raw(4)));
        assert_eq!(ev.handle, Some(HandleKind::Page));
        assert_eq!(ev.pid, None);
    }

    #[test]
    fn counts_do_not_share_the_page_field() {
        let ev = Event::new(EventKind::ExportCompleted)
            .with_document(DocumentId::from_raw(2))
            .with_count(0);
        assert_eq!(ev.count, Some(0));
        assert_eq!(ev.page, None);
    }
}
