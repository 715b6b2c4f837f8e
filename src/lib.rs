//! Cross-platform HID transport.
//!
//! `hidlink` finds HID devices, opens report streams to them and decodes
//! their report descriptors. One [`Manager`] sits on top of a platform
//! backend (hidraw on Linux, the HID class driver on Windows, IOKit on macOS,
//! with `hidapi` as the fallback) and hands out [`HidDevice`]s; each device
//! opens into a [`HidStream`] with queued, timeout-bounded reads and writes.
//!
//! ```no_run
//! use hidlink::{DeviceFilter, Manager};
//!
//! let mgr = Manager::new();
//! for dev in mgr.find(&DeviceFilter::vid_pid(0x1209, 0x0001))? {
//!     let stream = dev.open()?;
//!     stream.write(&[0x00, 0x01, 0x02])?;
//!     println!("{:02X?}", stream.read_report()?);
//! }
//! # Ok::<(), hidlink::HidError>(())
//! ```
//!
//! Every buffer starts with the Report ID byte (`0` when the device uses no
//! IDs), on every platform.

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod backends;
pub mod config;
pub mod device;
pub mod error;
pub mod event;
pub mod eventbus;
pub mod filtered_listener;
pub mod logger;
pub mod manager;
pub mod report_descriptor;
pub mod snapshot;
pub mod stream;

pub use config::{BackendPreference, HidConfig, ManagerConfig, StreamConfig, Timeout};
pub use device::{DeviceDescriptor, DeviceFilter, DeviceKey, HidDevice};
pub use error::{HidError, Result};
pub use event::{DeviceEvent, DeviceEventKind};
pub use eventbus::{DeviceEventBus, DeviceListener, EventFilter};
pub use filtered_listener::FilteredListener;
pub use logger::Logger;
pub use manager::Manager;
pub use report_descriptor::ReportLayout;
pub use snapshot::{DeviceSnapshot, SnapshotDiff};
pub use stream::{HidStream, Pending};
