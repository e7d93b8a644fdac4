//! # In-process host application.
//!
//! [`InMemoryHost`] behaves like a real document host from the runtime's point of
//! view: events fire globally for every document, every delivery hands out a **new
//! proxy** for the same logical document, pages really write files, and every call is
//! counted so callers can observe side effects. Failures can be injected per page,
//! per release and per kill.
//!
//! [`InMemoryProcesses`] is the matching process table.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use crate::error::HostError;
use crate::host::{
    DocumentRef, HostApp, HostCallback, HostEventClass, PageRef, ProcessCandidate, ProcessControl,
    Releasable, SubscriptionId,
};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One page of an [`InMemoryDocument`].
#[derive(Debug)]
pub struct InMemoryPage {
    index: u32,
    fail: AtomicBool,
    exports: AtomicUsize,
    releases: AtomicUsize,
}

impl InMemoryPage {
    fn new(index: u32) -> Self {
        Self {
            index,
            fail: AtomicBool::new(false),
            exports: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        }
    }

    /// Makes every future export of this page fail.
    pub fn fail_exports(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    /// Number of export attempts so far.
    pub fn export_calls(&self) -> usize {
        self.exports.load(Ordering::SeqCst)
    }

    /// Number of release calls so far.
    pub fn release_calls(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

impl Releasable for InMemoryPage {
    fn release(&self) -> Result<(), HostError> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl PageRef for InMemoryPage {
    fn export_to(&self, path: &Path, format: &str) -> Result<(), HostError> {
        self.exports.fetch_add(1, Ordering::SeqCst);
        if self.fail.load(Ordering::SeqCst) {
            return Err(HostError::fail(format!("page {} cannot be rendered", self.index)));
        }
        fs::write(path, format!("page={} format={format}\n", self.index))
            .map_err(|e| HostError::fail(e.to_string()))
    }
}

#[derive(Debug)]
struct DocumentInner {
    name: String,
    tags: Mutex<HashMap<String, String>>,
    pages: Vec<Arc<InMemoryPage>>,
    open: AtomicBool,
    fail_pages: AtomicBool,
    fail_release: AtomicBool,
    page_calls: AtomicUsize,
    releases: AtomicUsize,
}

/// Proxy for a document held by an [`InMemoryHost`].
///
/// Several proxies may exist for the same logical document; they share all state.
#[derive(Debug, Clone)]
pub struct InMemoryDocument {
    inner: Arc<DocumentInner>,
}

impl InMemoryDocument {
    fn new(name: &str, pages: u32) -> Self {
        Self {
            inner: Arc::new(DocumentInner {
                name: name.to_string(),
                tags: Mutex::new(HashMap::new()),
                pages: (1..=pages).map(|i| Arc::new(InMemoryPage::new(i))).collect(),
                open: AtomicBool::new(true),
                fail_pages: AtomicBool::new(false),
                fail_release: AtomicBool::new(false),
                page_calls: AtomicUsize::new(0),
                releases: AtomicUsize::new(0),
            }),
        }
    }

    /// Returns a distinct proxy object for the same document.
    pub fn proxy(&self) -> Arc<InMemoryDocument> {
        Arc::new(self.clone())
    }

    /// Returns `true` if `other` is a proxy for the same document.
    pub fn same_document(&self, other: &InMemoryDocument) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Document name (file name it was opened from, or the name given at creation).
    pub fn name(&self) -> &str {
        &self.inner.name
    }

    /// Page `index` (1-based).
    pub fn page(&self, index: u32) -> Option<Arc<InMemoryPage>> {
        let slot = usize::try_from(index).ok()?.checked_sub(1)?;
        self.inner.pages.get(slot).cloned()
    }

    /// Whether the host still has the document open.
    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::SeqCst)
    }

    /// Makes page enumeration fail.
    pub fn fail_page_listing(&self) {
        self.inner.fail_pages.store(true, Ordering::SeqCst);
    }

    /// Makes releasing this document fail.
    pub fn fail_release(&self) {
        self.inner.fail_release.store(true, Ordering::SeqCst);
    }

    /// Total export attempts across all pages.
    pub fn export_calls(&self) -> usize {
        self.inner.pages.iter().map(|p| p.export_calls()).sum()
    }

    /// Number of times the page list was requested.
    pub fn page_listing_calls(&self) -> usize {
        self.inner.page_calls.load(Ordering::SeqCst)
    }

    /// Release calls made on any proxy of this document.
    pub fn release_calls(&self) -> usize {
        self.inner.releases.load(Ordering::SeqCst)
    }
}

impl Releasable for InMemoryDocument {
    fn release(&self) -> Result<(), HostError> {
        self.inner.releases.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_release.load(Ordering::SeqCst) {
            return Err(HostError::Disconnected);
        }
        Ok(())
    }
}

impl DocumentRef for InMemoryDocument {
    fn tag(&self, key: &str) -> Option<String> {
        lock(&self.inner.tags).get(key).cloned()
    }

    fn set_tag(&self, key: &str, value: &str) -> Result<(), HostError> {
        lock(&self.inner.tags).insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn pages(&self) -> Result<Vec<Arc<dyn PageRef>>, HostError> {
        self.inner.page_calls.fetch_add(1, Ordering::SeqCst);
        if self.inner.fail_pages.load(Ordering::SeqCst) {
            return Err(HostError::Disconnected);
        }
        Ok(self
            .inner
            .pages
            .iter()
            .map(|p| Arc::clone(p) as Arc<dyn PageRef>)
            .collect())
    }
}

struct Subscription {
    id: SubscriptionId,
    class: HostEventClass,
    callback: HostCallback,
}

/// In-process host application.
pub struct InMemoryHost {
    subscriptions: Mutex<Vec<Subscription>>,
    next_subscription: AtomicU64,
    documents: Mutex<Vec<InMemoryDocument>>,
    staged: Mutex<HashMap<PathBuf, u32>>,
    process: Mutex<Option<(Arc<InMemoryProcesses>, u32)>>,
    terminations: AtomicUsize,
    releases: AtomicUsize,
}

impl InMemoryHost {
    /// Creates an empty host.
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            subscriptions: Mutex::new(Vec::new()),
            next_subscription: AtomicU64::new(1),
            documents: Mutex::new(Vec::new()),
            staged: Mutex::new(HashMap::new()),
            process: Mutex::new(None),
            terminations: AtomicUsize::new(0),
            releases: AtomicUsize::new(0),
        })
    }

    /// Links the host to a process entry: a cooperative quit makes `pid` exit.
    pub fn bind_process(&self, processes: Arc<InMemoryProcesses>, pid: u32) {
        *lock(&self.process) = Some((processes, pid));
    }

    /// Creates and opens a new document with `pages` pages.
    pub fn add_document(&self, name: &str, pages: u32) -> InMemoryDocument {
        let doc = InMemoryDocument::new(name, pages);
        lock(&self.documents).push(doc.clone());
        doc
    }

    /// Makes `path` openable through [`HostApp::open`] with `pages` pages.
    pub fn stage_file(&self, path: impl Into<PathBuf>, pages: u32) {
        lock(&self.staged).insert(path.into(), pages);
    }

    /// Fires `class` for `doc` to every subscribed callback, each receiving a fresh proxy.
    pub fn fire(&self, class: HostEventClass, doc: &InMemoryDocument) {
        let callbacks: Vec<HostCallback> = lock(&self.subscriptions)
            .iter()
            .filter(|s| s.class == class)
            .map(|s| Arc::clone(&s.callback))
            .collect();
        for cb in callbacks {
            let proxy: Arc<dyn DocumentRef> = doc.proxy();
            cb(proxy);
        }
    }

    /// Saves the document: fires `SaveCompleted`.
    pub fn save(&self, doc: &InMemoryDocument) {
        self.fire(HostEventClass::SaveCompleted, doc);
    }

    /// Closes the document: fires `BeforeClose`, marks it closed, fires `CloseFinal`.
    pub fn close(&self, doc: &InMemoryDocument) {
        self.fire(HostEventClass::BeforeClose, doc);
        doc.inner.open.store(false, Ordering::SeqCst);
        lock(&self.documents).retain(|d| !d.same_document(doc));
        self.fire(HostEventClass::CloseFinal, doc);
    }

    /// Number of documents still open.
    pub fn open_documents(&self) -> usize {
        lock(&self.documents).len()
    }

    /// Callbacks currently registered for `class` (the host-side delegate list).
    pub fn subscriber_count(&self, class: HostEventClass) -> usize {
        lock(&self.subscriptions)
            .iter()
            .filter(|s| s.class == class)
            .count()
    }

    /// Number of cooperative quit requests.
    pub fn terminate_calls(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }

    /// Number of times the application proxy was released.
    pub fn release_calls(&self) -> usize {
        self.releases.load(Ordering::SeqCst)
    }
}

impl Releasable for InMemoryHost {
    fn release(&self) -> Result<(), HostError> {
        self.releases.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

impl HostApp for InMemoryHost {
    fn subscribe(
        &self,
        class: HostEventClass,
        callback: HostCallback,
    ) -> Result<SubscriptionId, HostError> {
        let id = SubscriptionId(self.next_subscription.fetch_add(1, Ordering::SeqCst));
        lock(&self.subscriptions).push(Subscription {
            id,
            class,
            callback,
        });
        Ok(id)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), HostError> {
        let mut subs = lock(&self.subscriptions);
        let before = subs.len();
        subs.retain(|s| s.id != id);
        if subs.len() == before {
            return Err(HostError::fail(format!("unknown subscription {}", id.0)));
        }
        Ok(())
    }

    fn open(&self, path: &Path) -> Result<Arc<dyn DocumentRef>, HostError> {
        let pages = lock(&self.staged)
            .get(path)
            .copied()
            .ok_or_else(|| HostError::fail(format!("cannot open {}", path.display())))?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Arc::new(self.add_document(&name, pages)))
    }

    fn terminate(&self) -> Result<(), HostError> {
        self.terminations.fetch_add(1, Ordering::SeqCst);
        if let Some((procs, pid)) = lock(&self.process).as_ref() {
            procs.exit(*pid);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy)]
struct ProcessEntry {
    pid: u32,
    visible: bool,
    alive: bool,
}

/// In-process process table.
#[derive(Default)]
pub struct InMemoryProcesses {
    entries: Mutex<Vec<ProcessEntry>>,
    kill_error: Mutex<Option<(HostError, bool)>>,
    kills: AtomicUsize,
}

impl InMemoryProcesses {
    /// Creates an empty table.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Adds a running process.
    pub fn spawn(&self, pid: u32, has_visible_surface: bool) {
        lock(&self.entries).push(ProcessEntry {
            pid,
            visible: has_visible_surface,
            alive: true,
        });
    }

    /// Marks `pid` as exited.
    pub fn exit(&self, pid: u32) {
        for e in lock(&self.entries).iter_mut().filter(|e| e.pid == pid) {
            e.alive = false;
        }
    }

    /// Makes every future kill fail with `error`; `still_alive` decides whether the
    /// process survives the failed kill.
    pub fn fail_kills(&self, error: HostError, still_alive: bool) {
        *lock(&self.kill_error) = Some((error, still_alive));
    }

    /// Number of kill calls so far.
    pub fn kill_calls(&self) -> usize {
        self.kills.load(Ordering::SeqCst)
    }
}

impl ProcessControl for InMemoryProcesses {
    fn enumerate(&self, _name_filter: &str) -> Vec<ProcessCandidate> {
        lock(&self.entries)
            .iter()
            .filter(|e| e.alive)
            .map(|e| ProcessCandidate {
                pid: e.pid,
                has_visible_surface: e.visible,
            })
            .collect()
    }

    fn is_alive(&self, pid: u32) -> bool {
        lock(&self.entries).iter().any(|e| e.pid == pid && e.alive)
    }

    fn kill(&self, pid: u32) -> Result<(), HostError> {
        self.kills.fetch_add(1, Ordering::SeqCst);
        if let Some((err, still_alive)) = lock(&self.kill_error).clone() {
            if !still_alive {
                self.exit(pid);
            }
            return Err(err);
        }
        if !self.is_alive(pid) {
            return Err(HostError::NoSuchProcess { pid });
        }
        self.exit(pid);
        Ok(())
    }
}
