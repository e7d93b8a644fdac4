//! Runtime core: document tracking, export, release and process supervision.
//!
//! Internal modules:
//! - [`registry`]: document identity (tags) and lifecycle state;
//! - [`ledger`]: exactly-once release of host handles;
//! - [`export`]: page export jobs with per-page failure isolation;
//! - [`router`]: host event filtering and dispatch;
//! - [`supervisor`]: deadline-bound wait and forced termination;
//! - [`session`] / [`builder`]: the context tying them together;
//! - [`shutdown`]: OS signal → session cancellation.

mod builder;
mod export;
mod ledger;
mod registry;
mod report;
mod router;
mod session;
mod shutdown;
mod supervisor;

pub use builder::SessionBuilder;
pub use export::{ExportCoordinator, ExportJob, PageNaming, PageOutcome, PageStatus};
pub use ledger::{HandleGuard, HandleKind, Owner, ReleaseFailure, Released, ResourceHandle, ResourceLedger};
pub use registry::{DocumentId, DocumentState, Tag, TargetRegistry, TrackedDocument};
pub use report::{DocumentReport, ForceReason, SessionOutcome, SessionReport};
pub use router::EventFilterRouter;
pub use session::Session;
pub use supervisor::{ProcessSupervisor, SupervisorParams, SupervisorState};
