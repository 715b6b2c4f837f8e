//! Device identity.
//!
//! [`DeviceDescriptor`] is the immutable description of one connected HID
//! device: where it lives, who made it, and how large its reports are.
//! Backends fill it in once when the device is first seen; the
//! [`Manager`](crate::manager::Manager) then publishes it behind an `Arc` and
//! never touches it again.
//!
//! # Conventions
//! - `path` is an opaque OS identity (interface path, udev syspath, IORegistry
//!   path). It is unique among devices present at the same time, but a replug
//!   usually produces a new one.
//! - Report lengths include the leading Report-ID byte and are `0` when the
//!   device declares no report of that kind.
//! - Strings the device does not provide are empty, not absent.
//!
//! ## Persistence notes
//! - `vendor_id`/`product_id` and `serial_number` (when present) are the
//!   fields to persist for re-identification. `path` is diagnostic first,
//!   identity second.
//!
//! # Example
//! ```no_run
//! use hidlink::Manager;
//!
//! let mgr = Manager::new();
//! for dev in mgr.enumerate().expect("enumerate devices") {
//!     println!("{dev} at {}", dev.path);
//! }
//! ```

use std::fmt;
use std::hash::{Hash, Hasher};
use std::ops::Deref;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::backends::PlatformManager;
use crate::config::StreamConfig;
use crate::error::Result;
use crate::stream::HidStream;

/// Platform key a backend uses to track a device between enumerations.
#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DeviceKey(String);

impl DeviceKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeviceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for DeviceKey {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for DeviceKey {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Identity and report geometry of a single HID device.
///
/// Equality and hashing consider `path` only.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct DeviceDescriptor {
    /// Opaque OS path; also the backend's [`DeviceKey`].
    pub path: String,

    /// USB Vendor ID (VID).
    pub vendor_id: u16,

    /// USB Product ID (PID).
    pub product_id: u16,

    /// Device release number, BCD-style `major << 8 | minor`.
    pub version: u16,

    pub manufacturer: String,
    pub product: String,
    pub serial_number: String,

    /// Largest input report, Report-ID byte included.
    pub max_input_len: usize,

    /// Largest output report, Report-ID byte included.
    pub max_output_len: usize,

    /// Largest feature report, Report-ID byte included.
    pub max_feature_len: usize,
}

impl DeviceDescriptor {
    pub fn key(&self) -> DeviceKey {
        DeviceKey::new(self.path.clone())
    }

    /// True if every field set in `filter` matches.
    pub fn matches(&self, filter: &DeviceFilter) -> bool {
        filter.vendor_id.map_or(true, |v| v == self.vendor_id)
            && filter.product_id.map_or(true, |p| p == self.product_id)
            && filter.version.map_or(true, |v| v == self.version)
            && filter
                .serial_number
                .as_deref()
                .filter(|s| !s.is_empty())
                .map_or(true, |s| s == self.serial_number)
    }
}

impl PartialEq for DeviceDescriptor {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path
    }
}

impl Eq for DeviceDescriptor {}

impl Hash for DeviceDescriptor {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let manufacturer = self.manufacturer.trim();
        let product = self.product.trim();
        if manufacturer.is_empty() && product.is_empty() {
            f.write_str("(unnamed)")?;
        } else {
            write!(f, "{manufacturer} {product}")?;
        }
        f.write_str(" (")?;
        let serial = self.serial_number.trim();
        if !serial.is_empty() {
            write!(f, "serial {serial}, ")?;
        }
        write!(
            f,
            "VID {}, PID {}, version {})",
            self.vendor_id, self.product_id, self.version
        )
    }
}

/// Lookup criteria for [`Manager::find`](crate::manager::Manager::find).
///
/// Unset fields match anything; an empty serial number also matches anything.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeviceFilter {
    pub vendor_id: Option<u16>,
    pub product_id: Option<u16>,
    pub version: Option<u16>,
    pub serial_number: Option<String>,
}

impl DeviceFilter {
    pub fn vid_pid(vendor_id: u16, product_id: u16) -> Self {
        Self {
            vendor_id: Some(vendor_id),
            product_id: Some(product_id),
            ..Self::default()
        }
    }

    pub fn with_version(mut self, version: u16) -> Self {
        self.version = Some(version);
        self
    }

    pub fn with_serial(mut self, serial: impl Into<String>) -> Self {
        self.serial_number = Some(serial.into());
        self
    }
}

/// A device as published by the manager: its descriptor plus the backend
/// that can open it.
///
/// Cheap to clone. Derefs to [`DeviceDescriptor`].
#[derive(Clone)]
pub struct HidDevice {
    descriptor: Arc<DeviceDescriptor>,
    backend: Arc<dyn PlatformManager>,
    defaults: StreamConfig,
}

impl HidDevice {
    pub(crate) fn new(
        descriptor: DeviceDescriptor,
        backend: Arc<dyn PlatformManager>,
        defaults: StreamConfig,
    ) -> Self {
        Self {
            descriptor: Arc::new(descriptor),
            backend,
            defaults,
        }
    }

    pub fn descriptor(&self) -> &Arc<DeviceDescriptor> {
        &self.descriptor
    }

    /// Opens a stream using the manager's stream defaults.
    pub fn open(&self) -> Result<HidStream> {
        self.open_with(&self.defaults)
    }

    pub fn open_with(&self, config: &StreamConfig) -> Result<HidStream> {
        let platform = self.backend.open(&self.descriptor)?;
        HidStream::start(Arc::clone(&self.descriptor), platform, config)
    }

    /// Like [`open`](Self::open), but logs and swallows the error.
    pub fn try_open(&self) -> Option<HidStream> {
        match self.open() {
            Ok(stream) => Some(stream),
            Err(e) => {
                tracing::debug!(path = %self.descriptor.path, error = %e, "open failed");
                None
            }
        }
    }

    /// Raw report descriptor bytes, where the backend can retrieve them.
    pub fn report_descriptor(&self) -> Result<Vec<u8>> {
        self.backend.report_descriptor(&self.descriptor)
    }
}

impl Deref for HidDevice {
    type Target = DeviceDescriptor;

    fn deref(&self) -> &DeviceDescriptor {
        &self.descriptor
    }
}

impl PartialEq for HidDevice {
    fn eq(&self, other: &Self) -> bool {
        self.descriptor == other.descriptor
    }
}

impl Eq for HidDevice {}

impl fmt::Debug for HidDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HidDevice")
            .field("descriptor", &self.descriptor)
            .field("backend", &self.backend.name())
            .finish()
    }
}

impl fmt::Display for HidDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.descriptor.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DeviceDescriptor {
        DeviceDescriptor {
            path: "/sys/devices/usb1/1-2/hidraw/hidraw0".into(),
            vendor_id: 0x046D,
            product_id: 0xC52B,
            version: 0x1201,
            manufacturer: "Logitech ".into(),
            product: "USB Receiver".into(),
            serial_number: String::new(),
            max_input_len: 8,
            ..Default::default()
        }
    }

    #[test]
    fn display_matches_conventional_format() {
        assert_eq!(
            sample().to_string(),
            "Logitech USB Receiver (VID 1133, PID 50475, version 4609)"
        );

        let mut with_serial = sample();
        with_serial.serial_number = "ABC123".into();
        assert_eq!(
            with_serial.to_string(),
            "Logitech USB Receiver (serial ABC123, VID 1133, PID 50475, version 4609)"
        );

        let unnamed = DeviceDescriptor::default();
        assert_eq!(unnamed.to_string(), "(unnamed) (VID 0, PID 0, version 0)");
    }

    #[test]
    fn equality_is_by_path() {
        let a = sample();
        let mut b = sample();
        b.product = "Something else".into();
        assert_eq!(a, b);

        b.path.push('1');
        assert_ne!(a, b);
    }

    #[test]
    fn filters() {
        let d = sample();
        assert!(d.matches(&DeviceFilter::default()));
        assert!(d.matches(&DeviceFilter::vid_pid(0x046D, 0xC52B)));
        assert!(!d.matches(&DeviceFilter::vid_pid(0x046D, 0x0001)));
        assert!(d.matches(&DeviceFilter::vid_pid(0x046D, 0xC52B).with_version(0x1201)));
        assert!(d.matches(&DeviceFilter::default().with_serial("")));
        assert!(!d.matches(&DeviceFilter::default().with_serial("XYZ")));
    }

    #[test]
    fn serializes_to_json() {
        let json = serde_json::to_string(&sample()).unwrap();
        assert!(json.contains("\"vendor_id\":1133"));
        let back: DeviceDescriptor = serde_json::from_str(&json).unwrap();
        assert_eq!(back.product, "USB Receiver");
    }
}
