//! Error taxonomy shared by the manager, streams and backends.
//!
//! Backends translate their native failures (errno, Win32 error codes,
//! `IOReturn`) into one of these variants so callers see the same shape of
//! error on every platform.

use std::io;

use thiserror::Error;

/// Errors produced by enumeration, opening and stream I/O.
#[derive(Error, Debug)]
pub enum HidError {
    /// The device key vanished between enumeration and open.
    #[error("device not found: {0}")]
    NotFound(String),

    /// The OS refused access to the device node.
    #[error("permission denied: {0}")]
    PermissionDenied(String),

    /// The stream was closed before or during the call.
    #[error("stream closed")]
    Closed,

    /// The call exceeded its configured timeout.
    #[error("operation timed out")]
    Timeout,

    /// Low-level transport failure (short write, device NAK, OS error).
    #[error("I/O error: {0}")]
    Io(String),

    /// Not implemented by the active backend.
    #[error("unsupported: {0}")]
    Unsupported(String),

    #[error("configuration error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, HidError>;

impl HidError {
    pub(crate) fn io(context: impl Into<String>) -> Self {
        HidError::Io(context.into())
    }

    /// Maps an OS error onto the taxonomy, prefixing the message with `context`.
    pub(crate) fn from_os(context: &str, err: io::Error) -> Self {
        let msg = format!("{context}: {err}");
        match err.kind() {
            io::ErrorKind::NotFound => HidError::NotFound(msg),
            io::ErrorKind::PermissionDenied => HidError::PermissionDenied(msg),
            io::ErrorKind::TimedOut => HidError::Timeout,
            _ => HidError::Io(msg),
        }
    }
}

impl From<io::Error> for HidError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => HidError::NotFound(err.to_string()),
            io::ErrorKind::PermissionDenied => HidError::PermissionDenied(err.to_string()),
            io::ErrorKind::TimedOut => HidError::Timeout,
            _ => HidError::Io(err.to_string()),
        }
    }
}

#[cfg(feature = "hidapi")]
impl From<hidapi::HidError> for HidError {
    fn from(e: hidapi::HidError) -> Self {
        let msg = e.to_string();
        if msg.contains("Permission denied") || msg.contains("EPERM") || msg.contains("EACCES") {
            HidError::PermissionDenied(msg)
        } else {
            HidError::Io(msg)
        }
    }
}

impl From<toml::de::Error> for HidError {
    fn from(e: toml::de::Error) -> Self {
        HidError::Config(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn io_kinds_map_onto_taxonomy() {
        let denied = io::Error::from(io::ErrorKind::PermissionDenied);
        assert!(matches!(HidError::from(denied), HidError::PermissionDenied(_)));

        let gone = io::Error::from(io::ErrorKind::NotFound);
        assert!(matches!(HidError::from(gone), HidError::NotFound(_)));

        let slow = io::Error::from(io::ErrorKind::TimedOut);
        assert!(matches!(HidError::from(slow), HidError::Timeout));

        let other = io::Error::from(io::ErrorKind::BrokenPipe);
        assert!(matches!(HidError::from(other), HidError::Io(_)));
    }

    #[test]
    fn from_os_keeps_context() {
        let denied = io::Error::new(io::ErrorKind::PermissionDenied, "denied");
        let err = HidError::from_os("open /dev/hidraw3", denied);
        match err {
            HidError::PermissionDenied(msg) => assert!(msg.starts_with("open /dev/hidraw3")),
            other => panic!("unexpected {other:?}"),
        }
    }
}
