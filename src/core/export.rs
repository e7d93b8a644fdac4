//! # Export coordinator: one artifact per page, failures isolated per page.
//!
//! ## Flow
//! ```text
//! export(id)
//!   ├─ job recorded (Closed or later)  → return recorded job (no page touched)
//!   ├─ state == Exporting              → ExportError::InProgress
//!   ├─ release requested, no job       → ExportError::NotExported
//!   └─ claim: state → Exporting
//!        ├─ create output_dir
//!        ├─ pages = doc.pages()        (observed once; fixes the job length)
//!        ├─ for index in 1..=N:
//!        │     guard(page) ─► page.export_to(dir/Page_{index}.{ext}, format)
//!        │       ├─ Ok         → Success{path}
//!        │       ├─ Err        → Failed{reason}   (continue)
//!        │       └─ panic      → Failed{reason}   (continue)
//!        │     guard dropped → page handle released
//!        └─ record job, state → Closed
//!             └─ release requested meanwhile → release_all(id)
//! ```

use std::fs;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;

use crate::core::ledger::{HandleKind, Owner, ResourceLedger};
use crate::core::registry::{DocumentId, DocumentState, TargetRegistry, TrackedDocument};
use crate::error::ExportError;
use crate::events::{Bus, Event, EventKind};
use crate::host::PageRef;

/// File naming scheme for exported pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageNaming {
    /// `Page_1.png`, `Page_2.png`, ..., `Page_10.png`
    #[default]
    Plain,
    /// `Page_01.png`, ..., `Page_10.png` (width = digits of the page count)
    ZeroPadded,
}

impl PageNaming {
    /// File name of page `index` out of `total`.
    pub fn file_name(&self, index: u32, total: u32, ext: &str) -> String {
        match self {
            PageNaming::Plain => format!("Page_{index}.{ext}"),
            PageNaming::ZeroPadded => {
                let width = total.max(1).to_string().len();
                format!("Page_{index:0width$}.{ext}")
            }
        }
    }
}

/// Outcome of exporting one page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PageOutcome {
    /// The artifact was written.
    Success {
        /// Where it was written.
        path: PathBuf,
    },
    /// The page could not be exported.
    Failed {
        /// Why.
        reason: String,
    },
}

impl PageOutcome {
    /// `true` for [`PageOutcome::Success`].
    pub fn is_success(&self) -> bool {
        matches!(self, PageOutcome::Success { .. })
    }
}

/// Outcome of one page, by 1-based index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageStatus {
    /// 1-based page index.
    pub index: u32,
    /// What happened.
    pub outcome: PageOutcome,
}

/// Result of exporting one document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportJob {
    /// Exported document.
    pub document: DocumentId,
    /// Target directory.
    pub output_dir: PathBuf,
    /// Pages observed at job start.
    pub page_count: u32,
    /// One entry per observed page, in page order.
    pub pages: Vec<PageStatus>,
    /// Set when the host could not list the pages at all (`page_count` is 0 then).
    pub listing_error: Option<String>,
}

impl ExportJob {
    /// `true` when every observed page has an outcome.
    pub fn is_complete(&self) -> bool {
        self.pages.len() == self.page_count as usize
    }

    /// Number of pages written.
    pub fn succeeded(&self) -> usize {
        self.pages.iter().filter(|p| p.outcome.is_success()).count()
    }

    /// Number of pages that failed.
    pub fn failed(&self) -> usize {
        self.pages.len() - self.succeeded()
    }
}

/// Writes page artifacts for tracked documents.
pub struct ExportCoordinator {
    registry: Arc<TargetRegistry>,
    ledger: Arc<ResourceLedger>,
    bus: Bus,
    output_dir: PathBuf,
    format: String,
    extension: String,
    naming: PageNaming,
}

impl ExportCoordinator {
    /// Creates a coordinator writing `format` files into `output_dir`.
    pub fn new(
        registry: Arc<TargetRegistry>,
        ledger: Arc<ResourceLedger>,
        bus: Bus,
        output_dir: impl Into<PathBuf>,
        format: impl Into<String>,
        naming: PageNaming,
    ) -> Self {
        let format = format.into();
        Self {
            registry,
            ledger,
            bus,
            output_dir: output_dir.into(),
            extension: format.to_ascii_lowercase(),
            format,
            naming,
        }
    }

    /// Exports every page of `id`, or returns the job recorded by an earlier call.
    pub fn export(&self, id: DocumentId) -> Result<ExportJob, ExportError> {
        let doc = self
            .registry
            .get(id)
            .ok_or(ExportError::UnknownDocument(id))?;

        {
            let mut slot = doc.lock();
            if let Some(job) = &slot.job {
                return Ok(job.clone());
            }
            if slot.state == DocumentState::Exporting {
                return Err(ExportError::InProgress(id));
            }
            if slot.release_pending || slot.state == DocumentState::ResourceReleased {
                return Err(ExportError::NotExported(id));
            }
            slot.advance(DocumentState::Exporting);
        }

        let job = self.run(&doc);

        let release_now = {
            let mut slot = doc.lock();
            slot.job = Some(job.clone());
            slot.advance(DocumentState::Closed);
            slot.release_pending
        };
        self.registry.changed().notify_one();
        self.bus.publish(
            Event::new(EventKind::ExportCompleted)
                .with_document(id)
                .with_count(job.failed())
                .with_path(self.output_dir.as_path()),
        );

        if release_now {
            let failures = self.ledger.release_all(id);
            tracing::debug!(document = %id, failures = failures.len(), "deferred release done");
        }
        Ok(job)
    }

    fn run(&self, doc: &TrackedDocument) -> ExportJob {
        let id = doc.id();
        let mut job = ExportJob {
            document: id,
            output_dir: self.output_dir.clone(),
            page_count: 0,
            pages: Vec::new(),
            listing_error: None,
        };

        let pages = match doc.document().pages() {
            Ok(pages) => pages,
            Err(e) => {
                tracing::warn!(document = %id, error = %e, "cannot list pages; nothing exported");
                job.listing_error = Some(e.to_string());
                return job;
            }
        };
        let total = u32::try_from(pages.len()).unwrap_or(u32::MAX);
        job.page_count = total;
        self.bus.publish(
            Event::new(EventKind::ExportStarted)
                .with_document(id)
                .with_count(pages.len())
                .with_path(self.output_dir.as_path()),
        );

        let dir_error = fs::create_dir_all(&self.output_dir)
            .err()
            .map(|e| format!("cannot create {}: {e}", self.output_dir.display()));

        for (index, page) in (1..=total).zip(pages) {
            let outcome = match &dir_error {
                Some(reason) => PageOutcome::Failed {
                    reason: reason.clone(),
                },
                None => self.export_page(id, index, total, page),
            };
            self.publish_page(id, index, &outcome);
            job.pages.push(PageStatus { index, outcome });
        }
        job
    }

    fn export_page(
        &self,
        id: DocumentId,
        index: u32,
        total: u32,
        page: Arc<dyn PageRef>,
    ) -> PageOutcome {
        let _guard = self
            .ledger
            .guard(Owner::Document(id), HandleKind::Page, page.clone());
        let path = self
            .output_dir
            .join(self.naming.file_name(index, total, &self.extension));

        let result = catch_unwind(AssertUnwindSafe(|| page.export_to(&path, &self.format)));
        match result {
            Ok(Ok(())) => PageOutcome::Success { path },
            Ok(Err(e)) => PageOutcome::Failed {
                reason: e.to_string(),
            },
            Err(_) => PageOutcome::Failed {
                reason: "page export panicked".to_string(),
            },
        }
    }

    fn publish_page(&self, id: DocumentId, index: u32, outcome: &PageOutcome) {
        let ev = match outcome {
            PageOutcome::Success { path } => Event::new(EventKind::PageExported)
                .with_path(path.as_path()),
            PageOutcome::Failed { reason } => {
                tracing::warn!(document = %id, page = index, reason = %reason, "page export failed");
                Event::new(EventKind::PageExportFailed).with_reason(reason.as_str())
            }
        };
        self.bus.publish(ev.with_document(id).with_page(index));
    }

    /// Target directory.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}
