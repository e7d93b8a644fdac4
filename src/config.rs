//! # Session configuration.
//!
//! [`SessionConfig`] defines where pages go, how long the host may stay alive and
//! which process is supervised. Every field has a default, so a TOML file only
//! needs the values it changes.
//!
//! ## Sentinel values
//! - `poll_interval = 0s` → clamped to 10ms by [`SessionConfig::poll_interval_clamped`]
//! - `bus_capacity = 0` → clamped to 1
//!
//! # Example
//! ```
//! use std::time::Duration;
//! use hostvisor::SessionConfig;
//!
//! let cfg = SessionConfig::from_toml_str(r#"
//!     output_dir = "/tmp/slides"
//!     deadline = "90s"
//!     naming = "zero_padded"
//! "#).unwrap();
//!
//! assert_eq!(cfg.deadline, Duration::from_secs(90));
//! assert_eq!(cfg.format, "png");
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::core::PageNaming;
use crate::error::ConfigError;

const MIN_POLL: Duration = Duration::from_millis(10);

/// Configuration for one supervised session.
///
/// ## Field semantics
/// - `output_dir`: directory receiving `Page_{i}.{ext}` files (created on demand)
/// - `format`: export format passed to the host; its lowercase form is the file extension
/// - `deadline`: time from `run()` start until the host is forcibly terminated
/// - `poll_interval`: how often process liveness is checked between state changes
/// - `process_name`: name filter used to find the host process
/// - `tag_key`: document tag key carrying the session's identity marker
#[derive(Clone, Debug, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Target directory for exported pages.
    pub output_dir: PathBuf,
    /// Export format (e.g. `png`).
    pub format: String,
    /// Page file naming scheme.
    pub naming: PageNaming,
    /// Liveness polling interval.
    #[serde(with = "humantime_serde")]
    pub poll_interval: Duration,
    /// Hard deadline for the whole session.
    #[serde(with = "humantime_serde")]
    pub deadline: Duration,
    /// Host process name filter.
    pub process_name: String,
    /// Tag key written onto tracked documents.
    pub tag_key: String,
    /// Event bus ring buffer size.
    pub bus_capacity: usize,
    /// Export when the host reports a completed save, not only on close.
    ///
    /// The first save produces the document's only export job and moves it to
    /// `Closed` while the host still has it open. Edits made after that save do
    /// not reach the artifacts; set this to `false` to export on close instead.
    pub export_on_save: bool,
    /// Ask the host to quit once every tracked document is released.
    pub terminate_when_idle: bool,
    /// Kill the host when the session is cancelled.
    pub kill_on_cancel: bool,
    /// Cancel the session on SIGINT/SIGTERM/SIGQUIT (Ctrl-C elsewhere).
    pub cancel_on_signal: bool,
}

impl SessionConfig {
    /// Parses a TOML document; missing keys keep their defaults.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Reads and parses a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Poll interval clamped to a small positive minimum.
    #[inline]
    pub fn poll_interval_clamped(&self) -> Duration {
        self.poll_interval.max(MIN_POLL)
    }

    /// Returns a bus capacity clamped to a minimum of 1.
    #[inline]
    pub fn bus_capacity_clamped(&self) -> usize {
        self.bus_capacity.max(1)
    }
}

impl Default for SessionConfig {
    /// Default configuration:
    ///
    /// - `output_dir = "exports"`, `format = "png"`, `naming = plain`
    /// - `poll_interval = 1s`, `deadline = 60s`
    /// - `process_name = "POWERPNT"`, `tag_key = "TargetGuid"`
    /// - `bus_capacity = 1024`
    /// - every behaviour flag on
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("exports"),
            format: "png".to_string(),
            naming: PageNaming::Plain,
            poll_interval: Duration::from_secs(1),
            deadline: Duration::from_secs(60),
            process_name: "POWERPNT".to_string(),
            tag_key: "TargetGuid".to_string(),
            bus_capacity: 1024,
            export_on_save: true,
            terminate_when_idle: true,
            kill_on_cancel: true,
            cancel_on_signal: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_yields_defaults() {
        let cfg = SessionConfig::from_toml_str("").unwrap();
        assert_eq!(cfg.deadline, Duration::from_secs(60));
        assert_eq!(cfg.poll_interval, Duration::from_secs(1));
        assert_eq!(cfg.tag_key, "TargetGuid");
        assert!(cfg.export_on_save);
    }

    #[test]
    fn durations_use_humantime() {
        let cfg = SessionConfig::from_toml_str(
            r#"
            poll_interval = "250ms"
            deadline = "2m"
            format = "PNG"
            export_on_save = false
            "#,
        )
        .unwrap();
        assert_eq!(cfg.poll_interval, Duration::from_millis(250));
        assert_eq!(cfg.deadline, Duration::from_secs(120));
        assert_eq!(cfg.format, "PNG");
        assert!(!cfg.export_on_save);
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let err = SessionConfig::from_toml_str("grace = \"5s\"").unwrap_err();
        assert_eq!(err.as_label(), "config_parse");
    }

    #[test]
    fn load_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "process_name = \"soffice\"\nbus_capacity = 0").unwrap();
        let cfg = SessionConfig::load(file.path()).unwrap();
        assert_eq!(cfg.process_name, "soffice");
        assert_eq!(cfg.bus_capacity_clamped(), 1);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = SessionConfig::load("/definitely/not/here.toml").unwrap_err();
        assert_eq!(err.as_label(), "config_io");
    }

    #[test]
    fn poll_interval_is_clamped() {
        let cfg = SessionConfig {
            poll_interval: Duration::ZERO,
            ..SessionConfig::default()
        };
        assert_eq!(cfg.poll_interval_clamped(), MIN_POLL);
    }
}
