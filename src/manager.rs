//! Device enumeration.
//!
//! The [`Manager`] keeps a table of every device the backend has reported,
//! keyed by [`DeviceKey`]. Each [`enumerate`](Manager::enumerate) call asks
//! the backend for the current keys, constructs descriptors for new keys (in
//! parallel), drops vanished ones and returns the full set sorted by path.
//! Devices that did not change keep the same `Arc<DeviceDescriptor>`, so
//! handles compare equal across calls.
//!
//! A key whose construction fails (for instance a node that udev has not yet
//! made readable) is left out of the result and retried on the next call.
//!
//! # Example
//! ```no_run
//! use hidlink::{EventFilter, Logger, Manager};
//!
//! let mgr = Manager::new();
//! mgr.add_listener(Logger::new(), EventFilter::All, None);
//! for dev in mgr.enumerate().unwrap() {
//!     println!("{dev}");
//! }
//! ```

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::backends::{self, DeviceCreation, PlatformManager};
use crate::config::{HidConfig, StreamConfig};
use crate::device::{DeviceDescriptor, DeviceFilter, DeviceKey, HidDevice};
use crate::error::{HidError, Result};
use crate::event::DeviceEvent;
use crate::eventbus::{DeviceEventBus, DeviceListener, EventFilter};
use crate::snapshot::DeviceSnapshot;
use crate::stream::HidStream;

/// Devices constructed concurrently by one enumeration pass.
const MAX_CREATE_WORKERS: usize = 8;

#[derive(Default)]
struct Known {
    devices: HashMap<DeviceKey, HidDevice>,
    snapshot: DeviceSnapshot,
}

pub struct Manager {
    backend: Arc<dyn PlatformManager>,
    stream_defaults: StreamConfig,
    known: Mutex<Known>,
    events: Mutex<DeviceEventBus>,
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

impl Manager {
    /// Manager over the best backend available at runtime.
    pub fn new() -> Self {
        Self::with_config(HidConfig::default())
    }

    pub fn with_config(config: HidConfig) -> Self {
        let backend = backends::select(config.manager.backend);
        Self::with_backend(backend).with_stream_defaults(config.stream)
    }

    /// Manager over an explicit backend, such as
    /// [`VirtualManager`](crate::backends::virtual_input::VirtualManager).
    pub fn with_backend(backend: Arc<dyn PlatformManager>) -> Self {
        Self {
            backend,
            stream_defaults: StreamConfig::default(),
            known: Mutex::new(Known::default()),
            events: Mutex::new(DeviceEventBus::new()),
        }
    }

    /// Settings used by [`HidDevice::open`] for devices from this manager.
    pub fn with_stream_defaults(mut self, config: StreamConfig) -> Self {
        self.stream_defaults = config;
        self
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    /// Lists the devices currently present, sorted by path.
    ///
    /// Backend refresh errors propagate; per-device construction errors do
    /// not (the device is retried next call).
    ///
    /// Listeners run on the calling thread after the device table is
    /// updated, while the event bus is held, so concurrent passes deliver
    /// their events in table order. A listener must not call back into
    /// this manager.
    pub fn enumerate(&self) -> Result<Vec<HidDevice>> {
        let (devices, events, mut bus) = {
            let mut known = self.known.lock();
            let present: HashSet<DeviceKey> = self.backend.refresh()?.into_iter().collect();

            let mut removed: Vec<DeviceKey> = known
                .devices
                .keys()
                .filter(|k| !present.contains(*k))
                .cloned()
                .collect();
            removed.sort();
            let mut added: Vec<&DeviceKey> = present
                .iter()
                .filter(|k| !known.devices.contains_key(*k))
                .collect();
            added.sort();

            let mut events = Vec::with_capacity(removed.len() + added.len());
            for key in removed {
                if let Some(dev) = known.devices.remove(&key) {
                    trace!(path = %key, "device removed");
                    events.push(DeviceEvent::removed(Arc::clone(dev.descriptor())));
                }
            }
            for dev in self.create_all(&added) {
                trace!(path = %dev.path, "device added");
                events.push(DeviceEvent::arrived(Arc::clone(dev.descriptor())));
                known.devices.insert(dev.key(), dev);
            }

            let mut devices: Vec<HidDevice> = known.devices.values().cloned().collect();
            devices.sort_by(|a, b| a.path.cmp(&b.path));
            known.snapshot =
                DeviceSnapshot::new(devices.iter().map(|d| Arc::clone(d.descriptor())).collect());

            // Passes reach the bus in the order they diffed.
            (devices, events, self.events.lock())
        };

        if !events.is_empty() {
            debug!(count = events.len(), "device set changed");
            bus.emit_all(&events);
        }
        Ok(devices)
    }

    /// Constructs one device per key on scoped worker threads, at most
    /// [`MAX_CREATE_WORKERS`] at a time.
    fn create_all(&self, keys: &[&DeviceKey]) -> Vec<HidDevice> {
        let backend = &self.backend;

        let mut results = Vec::with_capacity(keys.len());
        for chunk in keys.chunks(MAX_CREATE_WORKERS) {
            thread::scope(|s| {
                let workers: Vec<_> = chunk
                    .iter()
                    .map(|&key| {
                        let worker = s.spawn(move || {
                            backend
                                .create_device(key)
                                .map(DeviceCreation::complete)
                        });
                        (key, worker)
                    })
                    .collect();
                results.extend(
                    workers
                        .into_iter()
                        .map(|(key, worker)| (key, worker.join())),
                );
            });
        }

        let mut created = Vec::with_capacity(results.len());
        for (key, joined) in results {
            match joined {
                Ok(Ok(mut descriptor)) => {
                    // The table is keyed by path.
                    descriptor.path = key.to_string();
                    created.push(HidDevice::new(
                        descriptor,
                        Arc::clone(&self.backend),
                        self.stream_defaults.clone(),
                    ));
                }
                Ok(Err(e)) => debug!(path = %key, error = %e, "device construction failed; will retry"),
                Err(_) => warn!(path = %key, "device construction panicked; will retry"),
            }
        }
        created
    }

    /// Opens a device from the last enumeration.
    ///
    /// Fails with [`HidError::NotFound`] when the device is not (or no
    /// longer) known to this manager.
    pub fn open(&self, device: &DeviceDescriptor) -> Result<HidStream> {
        let dev = self
            .known
            .lock()
            .devices
            .get(&device.key())
            .cloned()
            .ok_or_else(|| HidError::NotFound(device.path.clone()))?;
        dev.open()
    }

    /// Enumerates and keeps the devices matching `filter`.
    pub fn find(&self, filter: &DeviceFilter) -> Result<Vec<HidDevice>> {
        Ok(self
            .enumerate()?
            .into_iter()
            .filter(|d| d.matches(filter))
            .collect())
    }

    pub fn find_first(&self, filter: &DeviceFilter) -> Result<Option<HidDevice>> {
        Ok(self.find(filter)?.into_iter().next())
    }

    /// Devices published by the last enumeration.
    pub fn snapshot(&self) -> DeviceSnapshot {
        self.known.lock().snapshot.clone()
    }

    /// Registers a listener for arrivals and removals seen by `enumerate`.
    pub fn add_listener(
        &self,
        listener: impl DeviceListener + 'static,
        filter: EventFilter,
        tag: Option<String>,
    ) -> u64 {
        self.events.lock().add_listener(listener, filter, tag)
    }

    pub fn enable_listener(&self, id: u64) {
        self.events.lock().enable(id);
    }

    pub fn disable_listener(&self, id: u64) {
        self.events.lock().disable(id);
    }

    pub fn remove_listener(&self, id: u64) {
        self.events.lock().remove_listener(id);
    }
}
