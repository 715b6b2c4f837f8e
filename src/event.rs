//! Device arrival and removal events.
//!
//! Every [`Manager::enumerate`](crate::Manager::enumerate) pass compares the
//! devices it finds with the previous pass and emits one [`DeviceEvent`] per
//! difference. Events carry the published descriptor, so a listener sees the
//! same `Arc` the manager hands out.

use std::fmt;
use std::sync::Arc;
use std::time::Instant;

use crate::device::DeviceDescriptor;

/// What happened to a device.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DeviceEventKind {
    /// First seen by this enumeration pass.
    Arrived,
    /// Present in the previous pass, gone now.
    Removed,
}

/// Timestamped device change captured by the manager.
#[derive(Clone, Debug)]
pub struct DeviceEvent {
    /// Capture time (monotonic).
    pub at: Instant,
    pub kind: DeviceEventKind,
    pub device: Arc<DeviceDescriptor>,
}

impl DeviceEvent {
    pub fn arrived(device: Arc<DeviceDescriptor>) -> Self {
        Self {
            at: Instant::now(),
            kind: DeviceEventKind::Arrived,
            device,
        }
    }

    pub fn removed(device: Arc<DeviceDescriptor>) -> Self {
        Self {
            at: Instant::now(),
            kind: DeviceEventKind::Removed,
            device,
        }
    }

    pub fn path(&self) -> &str {
        &self.device.path
    }
}

impl fmt::Display for DeviceEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceEventKind::Arrived => f.write_str("arrived"),
            DeviceEventKind::Removed => f.write_str("removed"),
        }
    }
}

impl fmt::Display for DeviceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.kind, self.device)
    }
}
