//! # hostvisor
//!
//! **Hostvisor** supervises an external document host application that keeps
//! many documents open at once. It tracks the documents you care about, exports
//! their pages at the right lifecycle moment, releases every native handle
//! exactly once and makes sure the host process is gone at the end, killing it
//! if it will not quit before the deadline.
//!
//! ## Architecture
//! ```text
//!        host process (black box)                         hostvisor Session
//! ┌───────────────────────────────────┐      ┌──────────────────────────────────────────────┐
//! │ HostApp                           │      │ TargetRegistry   tag → DocumentId, state     │
//! │  ├─ BeforeClose / SaveCompleted / │ ───► │ EventFilterRouter  (drops foreign documents) │
//! │  │  CloseFinal  (every document)  │      │    ├─► ExportCoordinator ─► Page_{i}.{ext}   │
//! │  ├─ DocumentRef ── PageRef        │ ◄─── │    └─► ResourceLedger   (release once)       │
//! │  └─ terminate()                   │      │ ProcessSupervisor                            │
//! └───────────────────────────────────┘      │    ├─ wait: all released ∧ process gone      │
//!        ▲                                   │    └─ deadline / cancel ─► release_all, kill │
//!        └──────── ProcessControl::kill ◄────┴──────────────────────────────────────────────┘
//!                                                    │ publish(Event)
//!                                                    ▼
//!                                      Bus ─► SubscriberSet ─► LogWriter / custom
//! ```
//!
//! ### Document lifecycle
//! ```text
//! Open ─► CloseRequested ─► Exporting ─► Closed ─► ResourceReleased
//!   └──────────── (forced cleanup, any state) ─────────────┘
//! ```
//!
//! ## Features
//! | Area              | Description                                             | Key types / traits                         |
//! |-------------------|---------------------------------------------------------|--------------------------------------------|
//! | **Session**       | Context, run loop, report                               | [`SessionBuilder`], [`Session`], [`SessionReport`] |
//! | **Tracking**      | Tag-based identity, forward-only state                  | [`TargetRegistry`], [`DocumentState`]      |
//! | **Export**        | One file per page, failures isolated per page           | [`ExportCoordinator`], [`ExportJob`]       |
//! | **Release**       | Exactly-once handle release                             | [`ResourceLedger`], [`HandleGuard`]        |
//! | **Supervision**   | Deadline, cooperative quit, kill                        | [`ProcessSupervisor`], [`SessionOutcome`]  |
//! | **Host**          | Integration seams and an in-memory host                 | [`host::HostApp`], [`host::InMemoryHost`]  |
//! | **Events**        | Lifecycle events and subscribers                        | [`Event`], [`Subscribe`]                   |
//! | **Configuration** | TOML-loadable settings                                  | [`SessionConfig`]                          |
//!
//! ## Optional features
//! - `logging` (default): exports [`LogWriter`], a `tracing`-backed subscriber.
//!
//! ## Example
//! ```rust
//! use std::sync::Arc;
//! use std::time::Duration;
//! use hostvisor::host::{InMemoryHost, InMemoryProcesses};
//! use hostvisor::{SessionBuilder, SessionConfig, SessionOutcome};
//!
//! #[tokio::main(flavor = "current_thread")]
//! async fn main() {
//!     let dir = std::env::temp_dir().join("hostvisor-doc-example");
//!     let cfg = SessionConfig {
//!         output_dir: dir,
//!         deadline: Duration::from_secs(5),
//!         poll_interval: Duration::from_millis(20),
//!         cancel_on_signal: false,
//!         ..SessionConfig::default()
//!     };
//!
//!     let host = InMemoryHost::new();
//!     let procs = InMemoryProcesses::new();
//!     procs.spawn(100, true);
//!     host.bind_process(procs.clone(), 100);
//!
//!     let session = SessionBuilder::new(cfg, host.clone(), procs.clone()).build();
//!     let deck = host.add_document("deck.pptx", 3);
//!     let id = session.track(deck.proxy()).unwrap();
//!
//!     session.router().attach().unwrap();
//!     host.close(&deck);
//!
//!     let report = session.run().await;
//!     assert_eq!(report.outcome, Ok(SessionOutcome::AllClosedGracefully));
//!     assert_eq!(report.document(id).unwrap().job.as_ref().unwrap().succeeded(), 3);
//! }
//! ```

mod config;
mod core;
mod error;
pub mod events;
pub mod host;
pub mod subscribers;

// ---- Public re-exports ----

pub use config::SessionConfig;
pub use core::{
    DocumentId, DocumentReport, DocumentState, EventFilterRouter, ExportCoordinator, ExportJob,
    ForceReason, HandleGuard, HandleKind, Owner, PageNaming, PageOutcome, PageStatus,
    ProcessSupervisor, ReleaseFailure, Released, ResourceHandle, ResourceLedger, Session,
    SessionBuilder, SessionOutcome, SessionReport, SupervisorParams, SupervisorState, Tag,
    TargetRegistry, TrackedDocument,
};
pub use error::{ConfigError, ExportError, HostError, SessionError, Unresolved};
pub use events::{Event, EventKind};
pub use subscribers::{Subscribe, SubscriberSet};

// Optional: built-in tracing subscriber.
// Enabled by default through the `logging` feature.
#[cfg(feature = "logging")]
pub use subscribers::LogWriter;
