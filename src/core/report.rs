//! # Session report.
//!
//! [`SessionReport`] is the single value a session run produces. It carries the
//! outcome, per-document results and every cleanup failure that was tolerated
//! along the way.

use std::fmt;

use crate::core::export::ExportJob;
use crate::core::ledger::{Owner, ReleaseFailure};
use crate::core::registry::{DocumentId, DocumentState, Tag};
use crate::error::SessionError;

/// Why the supervisor took the forced path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForceReason {
    /// The configured deadline elapsed with documents still unreleased or the host alive.
    DeadlineElapsed,
    /// The session token was cancelled (explicitly or by an OS signal).
    Cancelled,
}

impl ForceReason {
    /// Returns a short stable label (snake_case).
    pub fn as_label(&self) -> &'static str {
        match self {
            ForceReason::DeadlineElapsed => "deadline_elapsed",
            ForceReason::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ForceReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// Terminal state of a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Every tracked document was released and the host exited on its own.
    AllClosedGracefully,
    /// The supervisor finalized the session itself.
    ForcedTermination {
        /// What triggered it.
        reason: ForceReason,
        /// Whether the host process was killed (or was found already gone).
        killed: bool,
    },
}

/// Final view of one tracked document.
#[derive(Debug, Clone)]
pub struct DocumentReport {
    /// Stable id.
    pub id: DocumentId,
    /// Tag written onto the document.
    pub tag: Tag,
    /// State at the end of the run.
    pub state: DocumentState,
    /// `true` when the supervisor, not the host's own close, released it.
    pub forced: bool,
    /// Export job, when one ran.
    pub job: Option<ExportJob>,
}

/// Everything a session run produced.
#[derive(Debug, Clone)]
pub struct SessionReport {
    /// Outcome, or the error that ended the run.
    pub outcome: Result<SessionOutcome, SessionError>,
    /// Captured host process, when capture succeeded.
    pub host_pid: Option<u32>,
    /// One entry per tracked document, in registration order.
    pub documents: Vec<DocumentReport>,
    /// Release failures tolerated during the run.
    pub cleanup_failures: Vec<ReleaseFailure>,
}

impl SessionReport {
    /// `true` for [`SessionOutcome::AllClosedGracefully`].
    pub fn is_graceful(&self) -> bool {
        matches!(self.outcome, Ok(SessionOutcome::AllClosedGracefully))
    }

    /// Documents with at least one failed handle release.
    pub fn failed_cleanup_documents(&self) -> Vec<DocumentId> {
        let mut ids: Vec<DocumentId> = self
            .cleanup_failures
            .iter()
            .filter_map(|f| match f.owner {
                Owner::Document(id) => Some(id),
                Owner::Session => None,
            })
            .collect();
        ids.sort();
        ids.dedup();
        ids
    }

    /// Report entry for `id`.
    pub fn document(&self, id: DocumentId) -> Option<&DocumentReport> {
        self.documents.iter().find(|d| d.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ledger::HandleKind;
    use crate::error::HostError;

    fn failure(owner: Owner) -> ReleaseFailure {
        ReleaseFailure {
            owner,
            kind: HandleKind::Page,
            error: HostError::Disconnected,
        }
    }

    #[test]
    fn failed_cleanup_documents_are_unique_and_sorted() {
        let a = DocumentId::from_raw(2);
        let b = DocumentId::from_raw(1);
        let report = SessionReport {
            outcome: Ok(SessionOutcome::AllClosedGracefully),
            host_pid: Some(10),
            documents: Vec::new(),
            cleanup_failures: vec![
                failure(Owner::Document(a)),
                failure(Owner::Session),
                failure(Owner::Document(b)),
                failure(Owner::Document(a)),
            ],
        };
        assert!(report.is_graceful());
        assert_eq!(report.failed_cleanup_documents(), vec![b, a]);
    }

    #[test]
    fn forced_outcome_is_not_graceful() {
        let report = SessionReport {
            outcome: Ok(SessionOutcome::ForcedTermination {
                reason: ForceReason::DeadlineElapsed,
                killed: true,
            }),
            host_pid: None,
            documents: Vec::new(),
            cleanup_failures: Vec::new(),
        };
        assert!(!report.is_graceful());
        assert_eq!(ForceReason::Cancelled.to_string(), "cancelled");
    }
}
