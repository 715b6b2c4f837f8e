//! Platform backends for `hidlink`.
//!
//! Every backend implements two traits: [`PlatformManager`] (enumeration and
//! opening) and [`PlatformStream`] (the I/O primitives a
//! [`HidStream`](crate::stream::HidStream) drives from its worker threads).
//! The queueing, timeouts and handle lifetime live in the stream, so a
//! backend only has to move bytes.
//!
//! # Backends
//! - **`linux`**: udev + hidraw + `poll`, report sizes from the report descriptor.
//! - **`windows`**: SetupAPI + overlapped `ReadFile`/`WriteFile` + HIDP caps.
//! - **`macos`**: IOKit `IOHIDDevice` + a `CFRunLoop` owned by the reader.
//! - **`hid`**: hidapi, used when the native backend is unavailable
//!   (feature `hidapi`, on by default).
//! - **`virtual_input`**: in-memory devices for tests and demos.
//!
//! [`select`] picks a backend at runtime by probing, in order: native, hidapi,
//! and finally [`unsupported::UnsupportedManager`], which enumerates nothing.

use std::sync::Arc;

use crate::config::BackendPreference;
use crate::device::{DeviceDescriptor, DeviceKey};
use crate::error::{HidError, Result};
use crate::stream::ReaderContext;

#[cfg(target_os = "linux")]
#[cfg_attr(docsrs, doc(cfg(target_os = "linux")))]
pub mod linux;

#[cfg(target_os = "windows")]
#[cfg_attr(docsrs, doc(cfg(target_os = "windows")))]
pub mod windows;

#[cfg(target_os = "macos")]
#[cfg_attr(docsrs, doc(cfg(target_os = "macos")))]
pub mod macos;

#[cfg(feature = "hidapi")]
#[cfg_attr(docsrs, doc(cfg(feature = "hidapi")))]
pub mod hid;

pub mod unsupported;
pub mod virtual_input;

/// Deferred second phase of device construction.
pub type FinishDevice = Box<dyn FnOnce(DeviceDescriptor) -> DeviceDescriptor + Send>;

/// Result of constructing a device during enumeration.
///
/// Some platforms read identity cheaply but need a slower second pass for
/// strings and capabilities. They return [`DeviceCreation::Deferred`]; the
/// manager runs `finish` before the descriptor is published, so callers never
/// see a half-filled descriptor.
pub enum DeviceCreation {
    Ready(DeviceDescriptor),
    Deferred {
        partial: DeviceDescriptor,
        finish: FinishDevice,
    },
}

impl DeviceCreation {
    pub fn complete(self) -> DeviceDescriptor {
        match self {
            DeviceCreation::Ready(desc) => desc,
            DeviceCreation::Deferred { partial, finish } => finish(partial),
        }
    }
}

/// Enumeration and opening on one platform.
pub trait PlatformManager: Send + Sync {
    fn name(&self) -> &'static str;

    /// Runtime probe: can this backend work on the running system?
    fn is_supported(&self) -> bool;

    /// Keys of all devices currently present.
    fn refresh(&self) -> Result<Vec<DeviceKey>>;

    /// Builds the descriptor for a newly seen key.
    fn create_device(&self, key: &DeviceKey) -> Result<DeviceCreation>;

    /// Opens the device's OS handle.
    fn open(&self, device: &DeviceDescriptor) -> Result<Box<dyn PlatformStream>>;

    /// Raw report descriptor. Most platforms cannot provide it.
    fn report_descriptor(&self, device: &DeviceDescriptor) -> Result<Vec<u8>> {
        Err(HidError::Unsupported(format!(
            "{} backend cannot read report descriptors ({})",
            self.name(),
            device.path
        )))
    }
}

/// I/O primitives on one open OS handle.
///
/// All methods take `&self`: the reader thread, the writer thread and
/// `get_feature` callers use the stream concurrently. The stream guarantees
/// [`free`](Self::free) is called exactly once, after every other call has
/// returned.
pub trait PlatformStream: Send + Sync {
    /// Input loop. Push each report with [`ReaderContext::push`] (Report ID
    /// first) and return once [`ReaderContext::should_stop`] is true. An
    /// error return marks the stream faulted.
    fn run_reader(&self, ctx: &ReaderContext<'_>) -> Result<()>;

    /// Unblocks a reader or writer waiting inside the OS. Called once, at close.
    fn cancel_io(&self) {}

    fn write_output(&self, report: &[u8]) -> Result<()>;

    fn set_feature(&self, report: &[u8]) -> Result<()>;

    /// Fills `buf` (whose first byte is the requested Report ID) and returns
    /// the number of bytes received.
    fn get_feature(&self, buf: &mut [u8]) -> Result<usize>;

    /// Releases the OS handle.
    fn free(&self);
}

type Probe = fn() -> Option<Arc<dyn PlatformManager>>;

#[allow(unreachable_code)]
fn native() -> Option<Arc<dyn PlatformManager>> {
    #[cfg(target_os = "linux")]
    return Some(Arc::new(linux::LinuxManager::new()));
    #[cfg(target_os = "windows")]
    return Some(Arc::new(windows::WinManager::new()));
    #[cfg(target_os = "macos")]
    return Some(Arc::new(macos::MacManager::new()));
    None
}

fn fallback() -> Option<Arc<dyn PlatformManager>> {
    #[cfg(feature = "hidapi")]
    {
        match hid::HidapiManager::new() {
            Ok(mgr) => return Some(Arc::new(mgr)),
            Err(e) => tracing::debug!(error = %e, "hidapi unavailable"),
        }
    }
    None
}

/// Picks the first supported backend for `preference`.
pub fn select(preference: BackendPreference) -> Arc<dyn PlatformManager> {
    let probes: &[Probe] = match preference {
        BackendPreference::Auto => &[native, fallback],
        BackendPreference::Native => &[native],
        BackendPreference::Hidapi => &[fallback],
    };

    for probe in probes {
        let Some(backend) = probe() else { continue };
        if backend.is_supported() {
            tracing::info!(backend = backend.name(), "selected HID backend");
            return backend;
        }
        tracing::debug!(backend = backend.name(), "backend not supported here");
    }

    tracing::warn!(?preference, "no usable HID backend; enumeration will be empty");
    Arc::new(unsupported::UnsupportedManager)
}
