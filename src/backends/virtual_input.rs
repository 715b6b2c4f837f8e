//! In-memory HID devices.
//!
//! [`VirtualManager`] is a fully working backend whose devices live in
//! process memory. Tests and demos plug and unplug [`VirtualDevice`]s, feed
//! input reports, and inspect what the stream wrote, without touching real
//! hardware.
//!
//! ```
//! use std::sync::Arc;
//! use hidlink::backends::virtual_input::{VirtualDevice, VirtualManager};
//! use hidlink::Manager;
//!
//! let bus = VirtualManager::new();
//! let pad = VirtualDevice::new("virtual:0", "Virtual Pad").with_report_lengths(8, 8, 0);
//! bus.plug(&pad);
//!
//! let mgr = Manager::with_backend(Arc::new(bus.clone()));
//! let dev = mgr.enumerate().unwrap().remove(0);
//! let stream = dev.open().unwrap();
//!
//! pad.feed(vec![0, 1, 2, 3, 4, 5, 6, 7]);
//! assert_eq!(stream.read_report().unwrap(), vec![0, 1, 2, 3, 4, 5, 6, 7]);
//! ```

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crossbeam::channel::{bounded, select, unbounded, Receiver, Sender};
use parking_lot::{Condvar, Mutex};

use super::{DeviceCreation, PlatformManager, PlatformStream};
use crate::device::{DeviceDescriptor, DeviceKey};
use crate::error::{HidError, Result};
use crate::report_descriptor::{with_report_id_byte, ReportLayout};
use crate::stream::ReaderContext;

enum Feed {
    Report(Vec<u8>),
    Unplug,
}

struct DeviceState {
    descriptor: Mutex<DeviceDescriptor>,
    report_descriptor: Mutex<Option<Vec<u8>>>,
    feed_tx: Sender<Feed>,
    feed_rx: Receiver<Feed>,
    written: Mutex<Vec<Vec<u8>>>,
    features: Mutex<HashMap<u8, Vec<u8>>>,
    hold_writes: Mutex<bool>,
    writes_released: Condvar,
    fail_writes: AtomicBool,
    deny_open: AtomicBool,
    opens: AtomicUsize,
    frees: AtomicUsize,
}

/// A programmable device. Clones share the same device.
#[derive(Clone)]
pub struct VirtualDevice {
    state: Arc<DeviceState>,
}

impl VirtualDevice {
    /// New device with no reports. Use the builder methods to shape it.
    pub fn new(path: &str, product: &str) -> Self {
        let (feed_tx, feed_rx) = unbounded();
        let descriptor = DeviceDescriptor {
            path: path.to_string(),
            manufacturer: "hidlink".to_string(),
            product: product.to_string(),
            ..DeviceDescriptor::default()
        };
        Self {
            state: Arc::new(DeviceState {
                descriptor: Mutex::new(descriptor),
                report_descriptor: Mutex::new(None),
                feed_tx,
                feed_rx,
                written: Mutex::new(Vec::new()),
                features: Mutex::new(HashMap::new()),
                hold_writes: Mutex::new(false),
                writes_released: Condvar::new(),
                fail_writes: AtomicBool::new(false),
                deny_open: AtomicBool::new(false),
                opens: AtomicUsize::new(0),
                frees: AtomicUsize::new(0),
            }),
        }
    }

    pub fn with_ids(self, vendor_id: u16, product_id: u16, version: u16) -> Self {
        {
            let mut d = self.state.descriptor.lock();
            d.vendor_id = vendor_id;
            d.product_id = product_id;
            d.version = version;
        }
        self
    }

    pub fn with_serial(self, serial: &str) -> Self {
        self.state.descriptor.lock().serial_number = serial.to_string();
        self
    }

    /// Report lengths, Report-ID byte included.
    pub fn with_report_lengths(self, input: usize, output: usize, feature: usize) -> Self {
        {
            let mut d = self.state.descriptor.lock();
            d.max_input_len = input;
            d.max_output_len = output;
            d.max_feature_len = feature;
        }
        self
    }

    /// Attaches a report descriptor and sizes the reports from it.
    pub fn with_report_descriptor(self, bytes: &[u8]) -> Self {
        let layout = ReportLayout::parse(bytes);
        *self.state.report_descriptor.lock() = Some(bytes.to_vec());
        self.with_report_lengths(
            with_report_id_byte(layout.max_input_len()),
            with_report_id_byte(layout.max_output_len()),
            with_report_id_byte(layout.max_feature_len()),
        )
    }

    pub fn path(&self) -> String {
        self.state.descriptor.lock().path.clone()
    }

    pub fn descriptor(&self) -> DeviceDescriptor {
        self.state.descriptor.lock().clone()
    }

    /// Injects an input report (Report ID first).
    pub fn feed(&self, report: impl Into<Vec<u8>>) {
        let _ = self.state.feed_tx.send(Feed::Report(report.into()));
    }

    /// Makes the open stream's reader fail as if the device vanished.
    pub fn disconnect(&self) {
        let _ = self.state.feed_tx.send(Feed::Unplug);
    }

    /// Output reports written so far, in order.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.state.written.lock().clone()
    }

    /// Answer for `get_feature` with `report[0]` as the Report ID. Also what
    /// `set_feature` updates.
    pub fn set_feature_report(&self, report: Vec<u8>) {
        if let Some(&id) = report.first() {
            self.state.features.lock().insert(id, report);
        }
    }

    pub fn feature_report(&self, id: u8) -> Option<Vec<u8>> {
        self.state.features.lock().get(&id).cloned()
    }

    /// While held, writes block inside the backend (like a stalled device).
    pub fn hold_writes(&self, hold: bool) {
        *self.state.hold_writes.lock() = hold;
        if !hold {
            self.state.writes_released.notify_all();
        }
    }

    pub fn fail_writes(&self, fail: bool) {
        self.state.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Subsequent opens fail with [`HidError::PermissionDenied`].
    pub fn deny_open(&self, deny: bool) {
        self.state.deny_open.store(deny, Ordering::SeqCst);
    }

    pub fn open_count(&self) -> usize {
        self.state.opens.load(Ordering::SeqCst)
    }

    /// How many times an open handle on this device was freed.
    pub fn free_count(&self) -> usize {
        self.state.frees.load(Ordering::SeqCst)
    }
}

#[derive(Default)]
struct Bus {
    devices: BTreeMap<DeviceKey, VirtualDevice>,
    failures: HashMap<DeviceKey, usize>,
    refresh_error: Option<String>,
    deferred: bool,
    creations: usize,
}

/// Backend over a set of [`VirtualDevice`]s. Clones share the same bus.
#[derive(Clone, Default)]
pub struct VirtualManager {
    bus: Arc<Mutex<Bus>>,
}

impl VirtualManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn plug(&self, device: &VirtualDevice) {
        let key = DeviceKey::new(device.path());
        self.bus.lock().devices.insert(key, device.clone());
    }

    pub fn unplug(&self, path: &str) -> Option<VirtualDevice> {
        self.bus.lock().devices.remove(&DeviceKey::from(path))
    }

    /// The next `times` constructions of `path` fail, as during a hot-plug
    /// permission race.
    pub fn fail_creation(&self, path: &str, times: usize) {
        self.bus.lock().failures.insert(DeviceKey::from(path), times);
    }

    /// Makes `refresh` itself fail until cleared with `None`.
    pub fn fail_refresh(&self, message: Option<&str>) {
        self.bus.lock().refresh_error = message.map(str::to_string);
    }

    /// Use two-phase construction: identity first, strings in `finish`.
    pub fn set_deferred(&self, deferred: bool) {
        self.bus.lock().deferred = deferred;
    }

    /// Number of device constructions attempted so far.
    pub fn creations(&self) -> usize {
        self.bus.lock().creations
    }

    fn device(&self, key: &DeviceKey) -> Option<VirtualDevice> {
        self.bus.lock().devices.get(key).cloned()
    }
}

impl PlatformManager for VirtualManager {
    fn name(&self) -> &'static str {
        "virtual"
    }

    fn is_supported(&self) -> bool {
        true
    }

    fn refresh(&self) -> Result<Vec<DeviceKey>> {
        let bus = self.bus.lock();
        if let Some(msg) = &bus.refresh_error {
            return Err(HidError::io(msg.clone()));
        }
        Ok(bus.devices.keys().cloned().collect())
    }

    fn create_device(&self, key: &DeviceKey) -> Result<DeviceCreation> {
        let (device, deferred) = {
            let mut bus = self.bus.lock();
            bus.creations += 1;
            if let Some(left) = bus.failures.get_mut(key) {
                if *left > 0 {
                    *left -= 1;
                    return Err(HidError::PermissionDenied(format!("{key} (simulated)")));
                }
            }
            let device = bus
                .devices
                .get(key)
                .cloned()
                .ok_or_else(|| HidError::NotFound(key.to_string()))?;
            (device, bus.deferred)
        };

        let full = device.descriptor();
        if !deferred {
            return Ok(DeviceCreation::Ready(full));
        }
        let partial = DeviceDescriptor {
            path: full.path.clone(),
            vendor_id: full.vendor_id,
            product_id: full.product_id,
            version: full.version,
            ..DeviceDescriptor::default()
        };
        Ok(DeviceCreation::Deferred {
            partial,
            finish: Box::new(move |partial| DeviceDescriptor {
                manufacturer: full.manufacturer,
                product: full.product,
                serial_number: full.serial_number,
                max_input_len: full.max_input_len,
                max_output_len: full.max_output_len,
                max_feature_len: full.max_feature_len,
                ..partial
            }),
        })
    }

    fn open(&self, device: &DeviceDescriptor) -> Result<Box<dyn PlatformStream>> {
        let dev = self
            .device(&device.key())
            .ok_or_else(|| HidError::NotFound(device.path.clone()))?;
        if dev.state.deny_open.load(Ordering::SeqCst) {
            return Err(HidError::PermissionDenied(device.path.clone()));
        }
        dev.state.opens.fetch_add(1, Ordering::SeqCst);
        let (wake_tx, wake_rx) = bounded(1);
        Ok(Box::new(VirtualStream {
            device: dev,
            wake_tx,
            wake_rx,
            cancelled: AtomicBool::new(false),
        }))
    }

    fn report_descriptor(&self, device: &DeviceDescriptor) -> Result<Vec<u8>> {
        let dev = self
            .device(&device.key())
            .ok_or_else(|| HidError::NotFound(device.path.clone()))?;
        let bytes = dev.state.report_descriptor.lock().clone();
        bytes.ok_or_else(|| HidError::Unsupported(format!("{} has no report descriptor", device.path)))
    }
}

struct VirtualStream {
    device: VirtualDevice,
    wake_tx: Sender<()>,
    wake_rx: Receiver<()>,
    cancelled: AtomicBool,
}

impl VirtualStream {
    fn wait_for_release(&self) -> Result<()> {
        let state = &self.device.state;
        let mut held = state.hold_writes.lock();
        while *held {
            if self.cancelled.load(Ordering::SeqCst) {
                return Err(HidError::Closed);
            }
            state
                .writes_released
                .wait_for(&mut held, Duration::from_millis(10));
        }
        Ok(())
    }
}

impl PlatformStream for VirtualStream {
    fn run_reader(&self, ctx: &ReaderContext<'_>) -> Result<()> {
        let feed = &self.device.state.feed_rx;
        while !ctx.should_stop() {
            select! {
                recv(feed) -> msg => match msg {
                    Ok(Feed::Report(report)) => ctx.push(report),
                    Ok(Feed::Unplug) => return Err(HidError::io("virtual device unplugged")),
                    Err(_) => return Ok(()),
                },
                recv(self.wake_rx) -> _ => return Ok(()),
            }
        }
        Ok(())
    }

    fn cancel_io(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        let _ = self.wake_tx.try_send(());
        self.device.state.writes_released.notify_all();
    }

    fn write_output(&self, report: &[u8]) -> Result<()> {
        self.wait_for_release()?;
        if self.device.state.fail_writes.load(Ordering::SeqCst) {
            return Err(HidError::io("virtual device rejected the report"));
        }
        self.device.state.written.lock().push(report.to_vec());
        Ok(())
    }

    fn set_feature(&self, report: &[u8]) -> Result<()> {
        self.wait_for_release()?;
        if self.device.state.fail_writes.load(Ordering::SeqCst) {
            return Err(HidError::io("virtual device rejected the feature report"));
        }
        self.device.set_feature_report(report.to_vec());
        Ok(())
    }

    fn get_feature(&self, buf: &mut [u8]) -> Result<usize> {
        let id = buf.first().copied().unwrap_or(0);
        let report = self
            .device
            .feature_report(id)
            .ok_or_else(|| HidError::io(format!("no feature report with ID {id}")))?;
        let n = buf.len().min(report.len());
        buf[..n].copy_from_slice(&report[..n]);
        Ok(n)
    }

    fn free(&self) {
        self.device.state.frees.fetch_add(1, Ordering::SeqCst);
    }
}
