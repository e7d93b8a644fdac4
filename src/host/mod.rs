//! # Host application interfaces.
//!
//! The supervised host is a black box that owns documents, fires lifecycle events
//! globally (for every open document) and accepts a small set of commands. The
//! runtime consumes it exclusively through the traits below.
//!
//! ```text
//!   HostApp ── subscribe(class, callback) ──► callback(Arc<dyn DocumentRef>)
//!      │                                         (any thread, any proxy)
//!      ├── open(path) ──► DocumentRef ── tag/set_tag
//!      │                      └── pages() ──► PageRef ── export_to(path, format)
//!      └── terminate()        (cooperative quit)
//!
//!   ProcessControl ── enumerate(name) / is_alive(pid) / kill(pid)   (uncooperative)
//! ```
//!
//! Every proxy the host hands out is [`Releasable`]: the runtime releases it exactly
//! once through the [`ResourceLedger`](crate::ResourceLedger).
//!
//! ## Implementations
//! - [`InMemoryHost`]: complete in-process host used by demos and tests.
//! - [`SystemProcesses`]: [`ProcessControl`] backed by the OS process table.

mod memory;
mod process;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use crate::error::HostError;

pub use memory::{InMemoryDocument, InMemoryHost, InMemoryPage, InMemoryProcesses};
pub use process::{SurfaceProbe, SystemProcesses};

/// Lifecycle event classes the host fires for every open document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum HostEventClass {
    /// A document is about to close; it is still fully usable.
    BeforeClose,
    /// A document finished saving.
    SaveCompleted,
    /// A document finished closing; its proxy may be half torn down.
    CloseFinal,
}

impl HostEventClass {
    /// Every class, in subscription order.
    pub const ALL: [HostEventClass; 3] = [
        HostEventClass::BeforeClose,
        HostEventClass::SaveCompleted,
        HostEventClass::CloseFinal,
    ];

    /// Returns a short stable label (snake_case).
    pub fn as_label(&self) -> &'static str {
        match self {
            HostEventClass::BeforeClose => "before_close",
            HostEventClass::SaveCompleted => "save_completed",
            HostEventClass::CloseFinal => "close_final",
        }
    }
}

impl fmt::Display for HostEventClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Identifier the host returns for one registered callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// Callback the host invokes with the document the event is about.
///
/// The host may invoke it from any thread and may pass a different proxy object
/// for the same logical document on every call.
pub type HostCallback = Arc<dyn Fn(Arc<dyn DocumentRef>) + Send + Sync>;

/// A native/opaque host object that must be released exactly once.
pub trait Releasable: Send + Sync {
    /// Releases the underlying object.
    ///
    /// Called at most once per tracked handle.
    fn release(&self) -> Result<(), HostError>;
}

/// Host-side document proxy.
pub trait DocumentRef: Releasable {
    /// Reads an application-visible tag stored on the document.
    fn tag(&self, key: &str) -> Option<String>;

    /// Writes an application-visible tag onto the document.
    fn set_tag(&self, key: &str, value: &str) -> Result<(), HostError>;

    /// Returns the document's pages in order (page 1 first).
    fn pages(&self) -> Result<Vec<Arc<dyn PageRef>>, HostError>;
}

/// Host-side page proxy.
pub trait PageRef: Releasable {
    /// Renders the page to `path` in the given format.
    fn export_to(&self, path: &Path, format: &str) -> Result<(), HostError>;
}

/// The host application (command target and event source).
pub trait HostApp: Releasable {
    /// Registers `callback` for every future event of `class`.
    ///
    /// Subscribing twice registers the callback twice; callers must deduplicate.
    fn subscribe(&self, class: HostEventClass, callback: HostCallback)
    -> Result<SubscriptionId, HostError>;

    /// Removes a previously registered callback.
    fn unsubscribe(&self, id: SubscriptionId) -> Result<(), HostError>;

    /// Opens a document by path.
    fn open(&self, path: &Path) -> Result<Arc<dyn DocumentRef>, HostError>;

    /// Asks the application to quit on its own.
    fn terminate(&self) -> Result<(), HostError>;
}

/// One process matching the host's name filter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessCandidate {
    /// Process identifier.
    pub pid: u32,
    /// Whether the process exposes a non-empty main surface (window).
    pub has_visible_surface: bool,
}

/// OS-level process control (does not need the host's cooperation).
pub trait ProcessControl: Send + Sync {
    /// Lists processes whose name matches `name_filter`.
    fn enumerate(&self, name_filter: &str) -> Vec<ProcessCandidate>;

    /// Returns `true` while the process is running.
    fn is_alive(&self, pid: u32) -> bool;

    /// Kills the process.
    fn kill(&self, pid: u32) -> Result<(), HostError>;
}
