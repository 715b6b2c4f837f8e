use std::sync::Arc;

use hidlink::backends::virtual_input::{VirtualDevice, VirtualManager};
use hidlink::{
    DeviceEvent, DeviceEventKind, DeviceFilter, DeviceListener, EventFilter, FilteredListener,
    HidError, Manager,
};
use parking_lot::Mutex;

fn manager(bus: &VirtualManager) -> Manager {
    Manager::with_backend(Arc::new(bus.clone()))
}

#[derive(Clone, Default)]
struct Seen(Arc<Mutex<Vec<String>>>);

impl Seen {
    fn take(&self) -> Vec<String> {
        std::mem::take(&mut *self.0.lock())
    }
}

impl DeviceListener for Seen {
    fn on_device(&mut self, event: &DeviceEvent) {
        self.0.lock().push(format!("{} {}", event.kind, event.path()));
    }
}

#[test]
fn repeated_enumeration_is_stable() {
    let bus = VirtualManager::new();
    bus.plug(&VirtualDevice::new("virtual:a", "A"));
    bus.plug(&VirtualDevice::new("virtual:b", "B"));
    let mgr = manager(&bus);

    let first = mgr.enumerate().unwrap();
    let second = mgr.enumerate().unwrap();
    assert_eq!(first, second);
    for (a, b) in first.iter().zip(&second) {
        assert!(Arc::ptr_eq(a.descriptor(), b.descriptor()));
    }
    assert_eq!(bus.creations(), 2);
}

#[test]
fn replugged_device_gets_a_new_descriptor() {
    let bus = VirtualManager::new();
    let pad = VirtualDevice::new("virtual:pad", "Pad");
    bus.plug(&pad);
    let mgr = manager(&bus);

    let before = mgr.enumerate().unwrap().remove(0);
    bus.unplug("virtual:pad");
    assert!(mgr.enumerate().unwrap().is_empty());
    bus.plug(&pad);
    let after = mgr.enumerate().unwrap().remove(0);

    assert_eq!(before, after);
    assert!(!Arc::ptr_eq(before.descriptor(), after.descriptor()));
}

#[test]
fn failed_construction_is_retried() {
    let bus = VirtualManager::new();
    bus.plug(&VirtualDevice::new("virtual:slow", "Slow"));
    bus.plug(&VirtualDevice::new("virtual:ok", "Ok"));
    bus.fail_creation("virtual:slow", 2);
    let mgr = manager(&bus);
    let seen = Seen::default();
    mgr.add_listener(seen.clone(), EventFilter::ArrivalsOnly, None);

    let paths = |mgr: &Manager| -> Vec<String> {
        mgr.enumerate()
            .unwrap()
            .iter()
            .map(|d| d.path.clone())
            .collect()
    };
    assert_eq!(paths(&mgr), ["virtual:ok"]);
    assert_eq!(paths(&mgr), ["virtual:ok"]);
    assert_eq!(paths(&mgr), ["virtual:ok", "virtual:slow"]);
    assert_eq!(
        seen.take(),
        ["arrived virtual:ok", "arrived virtual:slow"]
    );
}

#[test]
fn opening_through_the_manager() {
    let bus = VirtualManager::new();
    let pad = VirtualDevice::new("virtual:pad", "Pad").with_report_lengths(4, 4, 0);
    bus.plug(&pad);
    let mgr = manager(&bus);

    let dev = mgr.enumerate().unwrap().remove(0);
    let stream = mgr.open(&dev).unwrap();
    pad.feed(vec![0, 1, 2, 3]);
    assert_eq!(stream.read_report().unwrap(), vec![0, 1, 2, 3]);
    stream.close();

    let stranger = hidlink::DeviceDescriptor {
        path: "virtual:nobody".into(),
        ..Default::default()
    };
    assert!(matches!(mgr.open(&stranger), Err(HidError::NotFound(_))));

    bus.unplug("virtual:pad");
    mgr.enumerate().unwrap();
    assert!(matches!(mgr.open(&dev), Err(HidError::NotFound(_))));
}

#[test]
fn listeners_can_be_muted_filtered_and_removed() {
    let bus = VirtualManager::new();
    let mgr = manager(&bus);
    let all = Seen::default();
    let pads = Seen::default();

    let all_id = mgr.add_listener(all.clone(), EventFilter::All, None);
    mgr.add_listener(
        FilteredListener::matching(
            DeviceFilter {
                vendor_id: Some(0x1209),
                ..Default::default()
            },
            pads.clone(),
        ),
        EventFilter::All,
        None,
    );

    bus.plug(&VirtualDevice::new("virtual:a", "A").with_ids(0x1209, 1, 0));
    bus.plug(&VirtualDevice::new("virtual:b", "B").with_ids(0x046D, 1, 0));
    mgr.enumerate().unwrap();
    assert_eq!(all.take(), ["arrived virtual:a", "arrived virtual:b"]);
    assert_eq!(pads.take(), ["arrived virtual:a"]);

    mgr.disable_listener(all_id);
    bus.unplug("virtual:b");
    mgr.enumerate().unwrap();
    assert!(all.take().is_empty());

    mgr.enable_listener(all_id);
    bus.unplug("virtual:a");
    mgr.enumerate().unwrap();
    assert_eq!(all.take(), ["removed virtual:a"]);
    assert_eq!(pads.take(), ["removed virtual:a"]);

    mgr.remove_listener(all_id);
    bus.plug(&VirtualDevice::new("virtual:c", "C"));
    mgr.enumerate().unwrap();
    assert!(all.take().is_empty());
}

#[test]
fn late_filtered_listener_sees_no_lone_removal() {
    let bus = VirtualManager::new();
    let mgr = manager(&bus);
    bus.plug(&VirtualDevice::new("virtual:old", "Old").with_ids(0x1209, 1, 0));
    mgr.enumerate().unwrap();

    let pads = Seen::default();
    mgr.add_listener(
        FilteredListener::matching(DeviceFilter::vid_pid(0x1209, 1), pads.clone()),
        EventFilter::All,
        None,
    );
    bus.unplug("virtual:old");
    bus.plug(&VirtualDevice::new("virtual:new", "New").with_ids(0x1209, 1, 0));
    mgr.enumerate().unwrap();
    bus.unplug("virtual:new");
    mgr.enumerate().unwrap();

    assert_eq!(pads.take(), ["arrived virtual:new", "removed virtual:new"]);
}

#[test]
fn tagged_listener_follows_one_path() {
    let bus = VirtualManager::new();
    let mgr = manager(&bus);
    let seen = Seen::default();
    mgr.add_listener(seen.clone(), EventFilter::All, Some("virtual:b".into()));

    bus.plug(&VirtualDevice::new("virtual:a", "A"));
    bus.plug(&VirtualDevice::new("virtual:b", "B"));
    mgr.enumerate().unwrap();
    bus.unplug("virtual:b");
    mgr.enumerate().unwrap();

    assert_eq!(seen.take(), ["arrived virtual:b", "removed virtual:b"]);
}

#[test]
fn find_matches_identity() {
    let bus = VirtualManager::new();
    bus.plug(
        &VirtualDevice::new("virtual:1", "One")
            .with_ids(0x1209, 0x0010, 0x0200)
            .with_serial("S1"),
    );
    bus.plug(
        &VirtualDevice::new("virtual:2", "Two")
            .with_ids(0x1209, 0x0010, 0x0300)
            .with_serial("S2"),
    );
    let mgr = manager(&bus);

    let both = mgr.find(&DeviceFilter::vid_pid(0x1209, 0x0010)).unwrap();
    assert_eq!(both.len(), 2);

    let by_version = mgr
        .find_first(&DeviceFilter::vid_pid(0x1209, 0x0010).with_version(0x0300))
        .unwrap()
        .unwrap();
    assert_eq!(by_version.serial_number, "S2");

    let by_serial = mgr
        .find(&DeviceFilter::default().with_serial("S1"))
        .unwrap();
    assert_eq!(by_serial.len(), 1);
    assert_eq!(by_serial[0].product, "One");

    assert!(mgr
        .find_first(&DeviceFilter::vid_pid(0x1209, 0x0011))
        .unwrap()
        .is_none());
}

#[test]
fn snapshots_diff_between_passes() {
    let bus = VirtualManager::new();
    bus.plug(&VirtualDevice::new("virtual:a", "A"));
    let mgr = manager(&bus);
    mgr.enumerate().unwrap();
    let before = mgr.snapshot();

    bus.unplug("virtual:a");
    bus.plug(&VirtualDevice::new("virtual:b", "B"));
    mgr.enumerate().unwrap();
    let diff = mgr.snapshot().diff(&before);

    assert_eq!(diff.added.len(), 1);
    assert_eq!(diff.added[0].path, "virtual:b");
    assert_eq!(diff.removed[0].path, "virtual:a");
    assert!(mgr.snapshot().to_json().unwrap().contains("virtual:b"));
}

#[test]
fn report_descriptor_sizes_reports() {
    // Report ID 1: 8-byte input, 2-byte output.
    let descriptor = [
        0x06, 0x00, 0xFF, // Usage Page (vendor)
        0x09, 0x01, // Usage
        0xA1, 0x01, // Collection (Application)
        0x85, 0x01, // Report ID 1
        0x75, 0x08, // Report Size 8
        0x95, 0x08, // Report Count 8
        0x09, 0x01, 0x81, 0x02, // Input
        0x95, 0x02, // Report Count 2
        0x09, 0x01, 0x91, 0x02, // Output
        0xC0, // End Collection
    ];
    let bus = VirtualManager::new();
    bus.plug(&VirtualDevice::new("virtual:rd", "Described").with_report_descriptor(&descriptor));
    let mgr = manager(&bus);

    let dev = mgr.enumerate().unwrap().remove(0);
    assert_eq!(dev.max_input_len, 9);
    assert_eq!(dev.max_output_len, 3);
    assert_eq!(dev.max_feature_len, 0);
    assert_eq!(dev.report_descriptor().unwrap(), descriptor);
}

#[test]
fn backend_name_is_reported() {
    let mgr = manager(&VirtualManager::new());
    assert_eq!(mgr.backend_name(), "virtual");
    assert!(mgr.enumerate().unwrap().is_empty());
}
