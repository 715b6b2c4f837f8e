//! Transport configuration.
//!
//! Everything here has a sensible default, so a configuration file is
//! optional. When present it is plain TOML:
//!
//! ```toml
//! [stream]
//! read_timeout = 3000        # milliseconds
//! write_timeout = "infinite"
//! input_queue_capacity = 100
//!
//! [manager]
//! backend = "auto"           # "auto" | "native" | "hidapi"
//! ```
//!
//! The crate only reads configuration; it never writes it back.

use std::fmt;
use std::path::Path;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};

use crate::error::{HidError, Result};

/// Default read/write timeout, matching the usual HID stream convention.
pub const DEFAULT_TIMEOUT_MS: u64 = 3000;

/// Default cap on buffered input reports per stream.
pub const DEFAULT_INPUT_QUEUE_CAPACITY: usize = 100;

/// A stream timeout: a finite duration or the `Infinite` sentinel.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "TimeoutRepr", into = "TimeoutRepr")]
pub enum Timeout {
    Finite(Duration),
    Infinite,
}

impl Timeout {
    pub const fn from_millis(ms: u64) -> Self {
        Timeout::Finite(Duration::from_millis(ms))
    }

    /// `None` for [`Timeout::Infinite`].
    pub fn as_duration(self) -> Option<Duration> {
        match self {
            Timeout::Finite(d) => Some(d),
            Timeout::Infinite => None,
        }
    }

    /// Absolute deadline for a call that started at `start`. A duration too
    /// large to represent has no deadline, like [`Timeout::Infinite`].
    pub fn deadline_from(self, start: Instant) -> Option<Instant> {
        self.as_duration().and_then(|d| start.checked_add(d))
    }
}

impl Default for Timeout {
    fn default() -> Self {
        Timeout::from_millis(DEFAULT_TIMEOUT_MS)
    }
}

impl From<Duration> for Timeout {
    fn from(d: Duration) -> Self {
        Timeout::Finite(d)
    }
}

impl fmt::Display for Timeout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Timeout::Finite(d) => write!(f, "{}ms", d.as_millis()),
            Timeout::Infinite => f.write_str("infinite"),
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum TimeoutRepr {
    Millis(u64),
    Word(String),
}

impl TryFrom<TimeoutRepr> for Timeout {
    type Error = String;

    fn try_from(repr: TimeoutRepr) -> std::result::Result<Self, Self::Error> {
        match repr {
            TimeoutRepr::Millis(ms) => Ok(Timeout::from_millis(ms)),
            TimeoutRepr::Word(w) if w.eq_ignore_ascii_case("infinite") => Ok(Timeout::Infinite),
            TimeoutRepr::Word(w) => Err(format!(
                "invalid timeout `{w}`: expected milliseconds or \"infinite\""
            )),
        }
    }
}

impl From<Timeout> for TimeoutRepr {
    fn from(t: Timeout) -> Self {
        match t {
            Timeout::Finite(d) => {
                TimeoutRepr::Millis(u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
            }
            Timeout::Infinite => TimeoutRepr::Word("infinite".to_string()),
        }
    }
}

/// Per-stream settings applied at open time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StreamConfig {
    pub read_timeout: Timeout,
    pub write_timeout: Timeout,
    /// Oldest reports are dropped once this many are waiting to be read.
    pub input_queue_capacity: usize,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            read_timeout: Timeout::default(),
            write_timeout: Timeout::default(),
            input_queue_capacity: DEFAULT_INPUT_QUEUE_CAPACITY,
        }
    }
}

/// Which backend the manager should probe for.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendPreference {
    /// Native platform backend first, then the hidapi fallback.
    #[default]
    Auto,
    Native,
    Hidapi,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagerConfig {
    pub backend: BackendPreference,
}

/// Top-level configuration document.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HidConfig {
    pub stream: StreamConfig,
    pub manager: ManagerConfig,
}

impl HidConfig {
    pub fn from_toml_str(s: &str) -> Result<Self> {
        let cfg: HidConfig = toml::from_str(s)?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| HidError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    fn validate(&self) -> Result<()> {
        if self.stream.input_queue_capacity == 0 {
            return Err(HidError::Config(
                "stream.input_queue_capacity must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn huge_timeouts_have_no_deadline() {
        let now = Instant::now();
        assert_eq!(Timeout::Finite(Duration::MAX).deadline_from(now), None);
        assert_eq!(Timeout::Infinite.deadline_from(now), None);
        assert_eq!(
            Timeout::from_millis(10).deadline_from(now),
            Some(now + Duration::from_millis(10))
        );
    }

    #[test]
    fn empty_document_yields_defaults() {
        let cfg = HidConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, HidConfig::default());
        assert_eq!(cfg.stream.read_timeout, Timeout::from_millis(3000));
        assert_eq!(cfg.stream.input_queue_capacity, 100);
        assert_eq!(cfg.manager.backend, BackendPreference::Auto);
    }

    #[test]
    fn parses_millis_and_infinite() {
        let cfg = HidConfig::from_toml_str(
            r#"
            [stream]
            read_timeout = 50
            write_timeout = "infinite"

            [manager]
            backend = "hidapi"
            "#,
        )
        .unwrap();
        assert_eq!(cfg.stream.read_timeout, Timeout::from_millis(50));
        assert_eq!(cfg.stream.write_timeout, Timeout::Infinite);
        assert_eq!(cfg.manager.backend, BackendPreference::Hidapi);
    }

    #[test]
    fn rejects_unknown_timeout_word() {
        let err = HidConfig::from_toml_str("[stream]\nread_timeout = \"soon\"\n").unwrap_err();
        assert!(matches!(err, HidError::Config(_)));
    }

    #[test]
    fn rejects_zero_capacity() {
        let err = HidConfig::from_toml_str("[stream]\ninput_queue_capacity = 0\n").unwrap_err();
        assert!(matches!(err, HidError::Config(_)));
    }

    #[test]
    fn infinite_has_no_deadline() {
        let now = Instant::now();
        assert_eq!(Timeout::Infinite.deadline_from(now), None);
        assert_eq!(
            Timeout::from_millis(10).deadline_from(now),
            Some(now + Duration::from_millis(10))
        );
    }
}
