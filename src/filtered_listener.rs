//! Per-device listener wrapper.
//!
//! A [`FilteredListener`] forwards only the events of devices it cares about
//! and keeps arrival/removal balanced for them: a removal reaches the inner
//! listener only if the matching arrival did. A listener attached after a
//! device was already published therefore never sees a lone removal.

use std::collections::HashSet;

use crate::device::DeviceFilter;
use crate::event::{DeviceEvent, DeviceEventKind};
use crate::eventbus::DeviceListener;

type Predicate = Box<dyn Fn(&DeviceEvent) -> bool + Send + Sync>;

/// Forwards the events of matching devices to an inner listener.
pub struct FilteredListener {
    filter: DeviceFilter,
    predicate: Option<Predicate>,
    inner: Box<dyn DeviceListener>,
    // Paths whose arrival was forwarded and not yet removed.
    present: HashSet<String>,
}

impl FilteredListener {
    /// Devices matching `filter` (vendor, product, version, serial).
    pub fn matching(filter: DeviceFilter, inner: impl DeviceListener + 'static) -> Self {
        Self {
            filter,
            predicate: None,
            inner: Box::new(inner),
            present: HashSet::new(),
        }
    }

    /// Devices accepted by an arbitrary predicate.
    pub fn new(
        predicate: impl Fn(&DeviceEvent) -> bool + Send + Sync + 'static,
        inner: Box<dyn DeviceListener>,
    ) -> Self {
        Self {
            filter: DeviceFilter::default(),
            predicate: Some(Box::new(predicate)),
            inner,
            present: HashSet::new(),
        }
    }

    /// Narrows a filter-based listener with an extra predicate.
    pub fn and(mut self, predicate: impl Fn(&DeviceEvent) -> bool + Send + Sync + 'static) -> Self {
        self.predicate = Some(match self.predicate.take() {
            Some(first) => Box::new(move |e| first(e) && predicate(e)),
            None => Box::new(predicate),
        });
        self
    }

    /// Paths of matching devices currently believed present.
    pub fn present(&self) -> impl Iterator<Item = &str> + '_ {
        self.present.iter().map(String::as_str)
    }

    fn accepts(&self, event: &DeviceEvent) -> bool {
        event.device.matches(&self.filter) && self.predicate.as_ref().map_or(true, |p| p(event))
    }
}

impl DeviceListener for FilteredListener {
    fn on_device(&mut self, event: &DeviceEvent) {
        let forward = match event.kind {
            DeviceEventKind::Arrived => {
                self.accepts(event) && self.present.insert(event.path().to_owned())
            }
            DeviceEventKind::Removed => self.present.remove(event.path()),
        };
        if forward {
            self.inner.on_device(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use parking_lot::Mutex;

    use super::*;
    use crate::device::DeviceDescriptor;

    #[derive(Clone, Default)]
    struct Seen(Arc<Mutex<Vec<String>>>);

    impl DeviceListener for Seen {
        fn on_device(&mut self, event: &DeviceEvent) {
            self.0.lock().push(format!("{} {}", event.kind, event.path()));
        }
    }

    fn device(path: &str, vid: u16, pid: u16, serial: &str) -> Arc<DeviceDescriptor> {
        Arc::new(DeviceDescriptor {
            path: path.into(),
            vendor_id: vid,
            product_id: pid,
            serial_number: serial.into(),
            ..Default::default()
        })
    }

    #[test]
    fn forwards_only_matching_devices() {
        let seen = Seen::default();
        let mut listener =
            FilteredListener::matching(DeviceFilter::vid_pid(0x1209, 0x0001), seen.clone());

        let pad = device("hid:pad", 0x1209, 0x0001, "");
        let mouse = device("hid:mouse", 0x046D, 0xC077, "");
        listener.on_device(&DeviceEvent::arrived(pad.clone()));
        listener.on_device(&DeviceEvent::arrived(mouse.clone()));
        listener.on_device(&DeviceEvent::removed(mouse));
        listener.on_device(&DeviceEvent::removed(pad));

        assert_eq!(*seen.0.lock(), ["arrived hid:pad", "removed hid:pad"]);
        assert_eq!(listener.present().count(), 0);
    }

    #[test]
    fn removal_without_forwarded_arrival_is_dropped() {
        let seen = Seen::default();
        let mut listener = FilteredListener::matching(DeviceFilter::default(), seen.clone());

        listener.on_device(&DeviceEvent::removed(device("hid:early", 1, 1, "")));
        listener.on_device(&DeviceEvent::arrived(device("hid:late", 1, 1, "")));
        listener.on_device(&DeviceEvent::arrived(device("hid:late", 1, 1, "")));

        assert_eq!(*seen.0.lock(), ["arrived hid:late"]);
        assert_eq!(listener.present().collect::<Vec<_>>(), ["hid:late"]);
    }

    #[test]
    fn predicate_narrows_the_filter() {
        let seen = Seen::default();
        let mut listener = FilteredListener::matching(DeviceFilter::vid_pid(1, 2), seen.clone())
            .and(|e| e.device.serial_number.starts_with("A"));

        listener.on_device(&DeviceEvent::arrived(device("hid:a", 1, 2, "A-1")));
        listener.on_device(&DeviceEvent::arrived(device("hid:b", 1, 2, "B-1")));
        listener.on_device(&DeviceEvent::arrived(device("hid:c", 1, 3, "A-2")));

        assert_eq!(*seen.0.lock(), ["arrived hid:a"]);
    }
}
