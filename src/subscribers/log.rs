//! # Logging subscriber.
//!
//! [`LogWriter`] renders session events as `tracing` records under the
//! `hostvisor::events` target. Failures log at `warn`/`error`, progress at
//! `info`/`debug`.
//!
//! ## Output (with a `fmt` subscriber)
//! ```text
//! INFO  hostvisor::events: [captured] pid=4242
//! INFO  hostvisor::events: [export-completed] document=doc-1 failed_pages=0 dir=exports
//! WARN  hostvisor::events: [page-failed] document=doc-1 page=3 reason=host call failed: busy
//! WARN  hostvisor::events: [deadline] pid=4242
//! ```

use async_trait::async_trait;

use crate::events::{Event, EventKind};
use crate::subscribers::Subscribe;

/// Subscriber that forwards events to `tracing`.
///
/// Enabled via the `logging` feature (on by default).
#[derive(Debug, Default, Clone, Copy)]
pub struct LogWriter;

impl LogWriter {
    /// Creates the writer.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Subscribe for LogWriter {
    async fn on_event(&self, e: &Event) {
        let doc = e.document.map(|d| d.to_string()).unwrap_or_default();
        let reason = e.reason.as_deref().unwrap_or("");
        let path = e.path.as_deref().map(|p| p.display().to_string()).unwrap_or_default();

        match e.kind {
            EventKind::DocumentRegistered => {
                tracing::debug!(target: "hostvisor::events", "[registered] document={doc} tag={reason}")
            }
            EventKind::CloseRequested => {
                tracing::info!(target: "hostvisor::events", "[close-requested] document={doc}")
            }
            EventKind::SaveCompleted => {
                tracing::debug!(target: "hostvisor::events", "[saved] document={doc}")
            }
            EventKind::CloseFinal => {
                tracing::info!(target: "hostvisor::events", "[closed] document={doc}")
            }
            EventKind::CallbackFault => {
                tracing::error!(target: "hostvisor::events", "[callback-fault] document={doc} reason={reason}")
            }
            EventKind::ExportStarted => tracing::info!(
                target: "hostvisor::events",
                "[export-started] document={doc} pages={:?} dir={path}",
                e.count
            ),
            EventKind::PageExported => tracing::debug!(
                target: "hostvisor::events",
                "[page-exported] document={doc} page={:?} path={path}",
                e.page
            ),
            EventKind::PageExportFailed => tracing::warn!(
                target: "hostvisor::events",
                "[page-failed] document={doc} page={:?} reason={reason}",
                e.page
            ),
            EventKind::ExportCompleted => tracing::info!(
                target: "hostvisor::events",
                "[export-completed] document={doc} failed_pages={:?} dir={path}",
                e.count
            ),
            EventKind::HandleReleased => tracing::debug!(
                target: "hostvisor::events",
                "[released] document={doc} handle={:?}",
                e.handle
            ),
            EventKind::ReleaseFailed => tracing::warn!(
                target: "hostvisor::events",
                "[release-failed] document={doc} handle={:?} reason={reason}",
                e.handle
            ),
            EventKind::DocumentReleased => tracing::info!(
                target: "hostvisor::events",
                "[document-released] document={doc} failures={:?}",
                e.count
            ),
            EventKind::ProcessCaptured => {
                tracing::info!(target: "hostvisor::events", "[captured] pid={:?}", e.pid)
            }
            EventKind::AmbiguousProcess => {
                tracing::error!(target: "hostvisor::events", "[ambiguous-process] {reason}")
            }
            EventKind::HostTerminateRequested => tracing::info!(
                target: "hostvisor::events",
                "[quit-requested] pid={:?} {reason}",
                e.pid
            ),
            EventKind::ShutdownRequested => {
                tracing::warn!(target: "hostvisor::events", "[shutdown-requested] {reason}")
            }
            EventKind::DeadlineElapsed => {
                tracing::warn!(target: "hostvisor::events", "[deadline] pid={:?}", e.pid)
            }
            EventKind::ProcessKilled => tracing::warn!(
                target: "hostvisor::events",
                "[killed] pid={:?} {reason}",
                e.pid
            ),
            EventKind::ForcedTerminationFailed => tracing::error!(
                target: "hostvisor::events",
                "[kill-failed] pid={:?} reason={reason}",
                e.pid
            ),
            EventKind::AllClosedGracefully => {
                tracing::info!(target: "hostvisor::events", "[all-closed-gracefully] pid={:?}", e.pid)
            }
            EventKind::SubscriberPanicked | EventKind::SubscriberOverflow => {
                tracing::warn!(target: "hostvisor::events", "[subscriber] {:?} {reason}", e.kind)
            }
        }
    }

    fn name(&self) -> &'static str {
        "log"
    }
}
