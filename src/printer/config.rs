//! # Printer Configuration
//!
//! This module defines the hardware of supported label printers and the
//! runtime tuning of the session and print job.
//!
//! ## Supported Printers
//!
//! | Model | BLE prefix | Printhead (dots) |
//! |-------|------------|------------------|
//! | D11 | `D11` | 96 |
//!
//! ## Runtime Configuration
//!
//! [`Config`] can be loaded from JSON. Every field is optional; missing
//! fields keep their defaults. Durations are written in milliseconds:
//!
//! ```json
//! {
//!   "device_prefix": "D11",
//!   "session": { "command_timeout_ms": 10000, "heartbeat_policy": "suspend_during_job" },
//!   "job": { "status_timeout_ms": null }
//! }
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{NiimbotError, Result};

/// # Printer Model
///
/// Hardware characteristics of a label printer.
///
/// A raster line is one row of the bit matrix after rotation, so the
/// matrix width can't exceed the printhead:
///
/// ```text
/// D11: 96 dots at 203 DPI = 12mm printhead
///      a 313 x 96 label rotates to 96-dot lines, 313 rows long
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrinterModel {
    /// Model name
    pub name: &'static str,

    /// Advertised BLE name prefix
    pub name_prefix: &'static str,

    /// Printhead width in dots (the width of one printer line)
    pub width_dots: u16,
}

impl PrinterModel {
    /// # Niimbot D11
    ///
    /// 12mm printhead, labels fed along their long edge.
    pub const D11: Self = Self {
        name: "Niimbot D11",
        name_prefix: "D11",
        width_dots: 96,
    };

    pub const ALL: [Self; 1] = [Self::D11];

    /// Model for a device prefix, matched on the model's advertised prefix
    /// (`D11-H` is a D11).
    pub fn for_device(device_prefix: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|m| device_prefix.starts_with(m.name_prefix))
    }

    /// Reject lines wider than the printhead.
    pub fn check_line_width(&self, dots: usize) -> Result<()> {
        if dots > self.width_dots as usize {
            return Err(NiimbotError::InvalidParameter(format!(
                "lines are {} dots wide, {} prints at most {}",
                dots, self.name, self.width_dots
            )));
        }
        Ok(())
    }
}

/// How the background heartbeat coexists with foreground commands.
///
/// Both policies funnel every request-response command through one lock, so
/// a heartbeat never collides with another command in the session's single
/// request slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeartbeatPolicy {
    /// Heartbeats queue behind foreground commands and keep running during
    /// print jobs
    #[default]
    Serialized,
    /// Heartbeat ticks are skipped while a print job is active
    SuspendDuringJob,
}

/// Transport session and heartbeat tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Time to wait for a command's response notification
    #[serde(rename = "command_timeout_ms", with = "millis")]
    pub command_timeout: Duration,

    /// Interval between background heartbeats
    #[serde(rename = "heartbeat_interval_ms", with = "millis")]
    pub heartbeat_interval: Duration,

    pub heartbeat_policy: HeartbeatPolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_millis(10_000),
            heartbeat_interval: Duration::from_millis(5_000),
            heartbeat_policy: HeartbeatPolicy::default(),
        }
    }
}

/// Print job pacing and polling limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobConfig {
    /// Pause after each raster line; the printer has no other flow control
    #[serde(rename = "line_delay_ms", with = "millis")]
    pub line_delay: Duration,

    /// Retry interval for END_PAGE_PRINT
    #[serde(rename = "end_page_interval_ms", with = "millis")]
    pub end_page_interval: Duration,

    /// Poll interval for GET_PRINT_STATUS
    #[serde(rename = "status_interval_ms", with = "millis")]
    pub status_interval: Duration,

    /// Give up on END_PAGE_PRINT after this long (`None` = never)
    #[serde(rename = "end_page_timeout_ms", with = "opt_millis")]
    pub end_page_timeout: Option<Duration>,

    /// Give up on status polling after this long (`None` = never)
    #[serde(rename = "status_timeout_ms", with = "opt_millis")]
    pub status_timeout: Option<Duration>,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            line_delay: Duration::from_millis(10),
            end_page_interval: Duration::from_millis(50),
            status_interval: Duration::from_millis(100),
            end_page_timeout: Some(Duration::from_secs(30)),
            status_timeout: Some(Duration::from_secs(120)),
        }
    }
}

/// Complete runtime configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// BLE name prefix used to pick the device when scanning
    pub device_prefix: String,
    pub session: SessionConfig,
    pub job: JobConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            device_prefix: PrinterModel::D11.name_prefix.to_string(),
            session: SessionConfig::default(),
            job: JobConfig::default(),
        }
    }
}

impl Config {
    pub fn from_json_str(s: &str) -> Result<Self> {
        serde_json::from_str(s).map_err(|e| NiimbotError::Config(e.to_string()))
    }

    pub fn from_json_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        serde_json::from_str(&text)
            .map_err(|e| NiimbotError::Config(format!("{}: {}", path.display(), e)))
    }
}

mod millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}

mod opt_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match d {
            Some(d) => s.serialize_some(&(d.as_millis() as u64)),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Option::<u64>::deserialize(d).map(|ms| ms.map(Duration::from_millis))
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults() {
        let c = Config::default();
        assert_eq!(c.device_prefix, "D11");
        assert_eq!(c.session.command_timeout, Duration::from_millis(10_000));
        assert_eq!(c.session.heartbeat_interval, Duration::from_millis(5_000));
        assert_eq!(c.session.heartbeat_policy, HeartbeatPolicy::Serialized);
        assert_eq!(c.job.line_delay, Duration::from_millis(10));
        assert_eq!(c.job.end_page_interval, Duration::from_millis(50));
        assert_eq!(c.job.status_interval, Duration::from_millis(100));
    }

    #[test]
    fn test_partial_json_keeps_defaults() {
        let c = Config::from_json_str(
            r#"{"session": {"heartbeat_policy": "suspend_during_job", "command_timeout_ms": 2500},
                "job": {"status_timeout_ms": null}}"#,
        )
        .unwrap();
        assert_eq!(c.device_prefix, "D11");
        assert_eq!(c.session.heartbeat_policy, HeartbeatPolicy::SuspendDuringJob);
        assert_eq!(c.session.command_timeout, Duration::from_millis(2500));
        assert_eq!(c.session.heartbeat_interval, Duration::from_millis(5_000));
        assert_eq!(c.job.status_timeout, None);
        assert_eq!(c.job.end_page_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_json_round_trip() {
        let c = Config::default();
        let text = serde_json::to_string(&c).unwrap();
        assert!(text.contains("\"line_delay_ms\":10"));
        assert_eq!(Config::from_json_str(&text).unwrap(), c);
    }

    #[test]
    fn test_bad_json_is_config_error() {
        assert!(matches!(
            Config::from_json_str("{\"session\": 5}"),
            Err(NiimbotError::Config(_))
        ));
    }

    #[test]
    fn test_model_lookup_by_prefix() {
        assert_eq!(PrinterModel::for_device("D11"), Some(PrinterModel::D11));
        assert_eq!(PrinterModel::for_device("D11-H"), Some(PrinterModel::D11));
        assert_eq!(PrinterModel::for_device("B21"), None);
    }

    #[test]
    fn test_line_width_against_printhead() {
        let m = PrinterModel::D11;
        assert!(m.check_line_width(96).is_ok());
        assert!(m.check_line_width(1).is_ok());
        assert!(matches!(
            m.check_line_width(97),
            Err(NiimbotError::InvalidParameter(_))
        ));
    }
}
