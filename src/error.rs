//! Error types used by the hostvisor runtime and its host adapters.
//!
//! This module defines:
//!
//! - [`HostError`]: failures reported by the host application or the OS.
//! - [`SessionError`]: failures that end a supervision session unsuccessfully.
//! - [`ExportError`]: reasons an export job could not be produced at all.
//! - [`Unresolved`]: why an incoming host event did not match a tracked document.
//! - [`ConfigError`]: configuration loading failures.
//!
//! Every type provides `as_label` (stable snake_case string for logs/metrics).
//! Per-page and per-handle failures are **not** errors of the session: they are
//! recorded in the export job / report and the session carries on.

use std::time::Duration;
use thiserror::Error;

use crate::core::DocumentId;

/// # Errors produced by the host application or the operating system.
///
/// Returned by the [`host`](crate::host) traits. The runtime never lets one of these
/// escape into the host's own event delivery.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HostError {
    /// The host rejected or failed the call.
    #[error("host call failed: {error}")]
    Fail {
        /// The underlying error message.
        error: String,
    },

    /// The proxy object no longer refers to a live host object.
    #[error("host object disconnected")]
    Disconnected,

    /// The OS refused the request (e.g. kill without permission).
    #[error("permission denied: {error}")]
    PermissionDenied {
        /// The underlying error message.
        error: String,
    },

    /// The process does not exist (anymore).
    #[error("no such process: {pid}")]
    NoSuchProcess {
        /// Process identifier that was looked up.
        pid: u32,
    },
}

impl HostError {
    /// Shorthand for [`HostError::Fail`].
    pub fn fail(error: impl Into<String>) -> Self {
        HostError::Fail {
            error: error.into(),
        }
    }

    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use hostvisor::HostError;
    ///
    /// assert_eq!(HostError::Disconnected.as_label(), "host_disconnected");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            HostError::Fail { .. } => "host_failed",
            HostError::Disconnected => "host_disconnected",
            HostError::PermissionDenied { .. } => "host_permission_denied",
            HostError::NoSuchProcess { .. } => "host_no_such_process",
        }
    }
}

/// # Errors that end a session as failed.
///
/// Only these two conditions surface to the session caller; everything else is
/// recorded in the [`SessionReport`](crate::SessionReport) and tolerated.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    /// The host process could not be identified unambiguously; nothing was killed.
    #[error("host process is ambiguous; candidates with a visible surface: {visible:?} of {candidates:?}")]
    AmbiguousProcess {
        /// Every process matching the name filter.
        candidates: Vec<u32>,
        /// The subset exposing a visible surface.
        visible: Vec<u32>,
    },

    /// The kill call failed and the process is still running.
    #[error("forced termination of pid {pid} failed after {deadline:?}: {error}")]
    ForcedTerminationFailed {
        /// Host process identifier.
        pid: u32,
        /// The configured deadline that triggered the kill.
        deadline: Duration,
        /// Reason reported by the kill call.
        error: String,
    },
}

impl SessionError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    ///
    /// # Example
    /// ```
    /// use hostvisor::SessionError;
    ///
    /// let err = SessionError::AmbiguousProcess { candidates: vec![1, 2], visible: vec![] };
    /// assert_eq!(err.as_label(), "session_ambiguous_process");
    /// ```
    pub fn as_label(&self) -> &'static str {
        match self {
            SessionError::AmbiguousProcess { .. } => "session_ambiguous_process",
            SessionError::ForcedTerminationFailed { .. } => "session_forced_termination_failed",
        }
    }
}

/// # Reasons an export job could not be produced.
///
/// Page failures are not represented here: they are outcomes inside the job.
#[non_exhaustive]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExportError {
    /// No document with this id was ever registered.
    #[error("unknown document {0}")]
    UnknownDocument(DocumentId),

    /// Another export of the same document is running right now.
    #[error("export of document {0} already in progress")]
    InProgress(DocumentId),

    /// The document was released, or its release began, before any export ran.
    #[error("document {0} was released without an export")]
    NotExported(DocumentId),
}

impl ExportError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ExportError::UnknownDocument(_) => "export_unknown_document",
            ExportError::InProgress(_) => "export_in_progress",
            ExportError::NotExported(_) => "export_not_exported",
        }
    }
}

/// # Why an observed tag did not resolve to a tracked document.
///
/// Not a failure: unresolved events are dropped silently.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unresolved {
    /// The document carries no tag under the configured key.
    #[error("event document carries no tag")]
    Untagged,

    /// The tag was never issued by this session.
    #[error("tag was never registered")]
    UnknownTag,

    /// The tag belongs to a document that already released its resources.
    #[error("document already finalized")]
    Finalized,
}

impl Unresolved {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            Unresolved::Untagged => "unresolved_untagged",
            Unresolved::UnknownTag => "unresolved_unknown_tag",
            Unresolved::Finalized => "unresolved_finalized",
        }
    }
}

/// # Configuration loading failures.
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("cannot read config: {0}")]
    Io(#[from] std::io::Error),

    /// The configuration text is not valid.
    #[error("invalid config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl ConfigError {
    /// Returns a short stable label (snake_case) for use in logs/metrics.
    pub fn as_label(&self) -> &'static str {
        match self {
            ConfigError::Io(_) => "config_io",
            ConfigError::Parse(_) => "config_parse",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_are_stable() {
        assert_eq!(HostError::fail("x").as_label(), "host_failed");
        assert_eq!(
            HostError::NoSuchProcess { pid: 7 }.as_label(),
            "host_no_such_process"
        );
        assert_eq!(
            ExportError::InProgress(DocumentId::from_raw(3)).as_label(),
            "export_in_progress"
        );
        assert_eq!(Unresolved::Finalized.as_label(), "unresolved_finalized");
    }

    #[test]
    fn forced_termination_message_names_pid() {
        let err = SessionError::ForcedTerminationFailed {
            pid: 4242,
            deadline: Duration::from_secs(2),
            error: "denied".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("4242"));
        assert!(msg.contains("denied"));
    }
}
