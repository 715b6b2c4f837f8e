use std::sync::Arc;
use std::thread;
use std::time::Duration;

use hidlink::backends::virtual_input::{VirtualDevice, VirtualManager};
use hidlink::{EventFilter, Logger, Manager};

fn main() {
    tracing_subscriber::fmt::init();

    // A virtual device with 8-byte reports that echoes every output report back as input.
    let bus = VirtualManager::new();
    let device = VirtualDevice::new("virtual:echo", "Echo Device")
        .with_ids(0x1209, 0x0001, 0x0100)
        .with_report_lengths(8, 8, 0);
    bus.plug(&device);

    let mgr = Manager::with_backend(Arc::new(bus.clone()));
    mgr.add_listener(Logger::new(), EventFilter::All, None);
    let dev = mgr.enumerate().expect("enumerate").remove(0);
    println!("opened {dev}");
    let stream = dev.open().expect("open");

    let echo = {
        let device = device.clone();
        thread::spawn(move || {
            let mut seen = 0;
            while seen < 3 {
                let written = device.written();
                for report in &written[seen..] {
                    device.feed(report.clone());
                }
                seen = written.len();
                thread::sleep(Duration::from_millis(5));
            }
        })
    };

    for i in 1..=3u8 {
        stream.write(&[0, i, i * 2, i * 3]).expect("write");
        let report = stream.read_report().expect("read");
        println!("(Virtual) echo {:02X?}", report);
    }
    echo.join().expect("echo thread");

    stream.close();
    bus.unplug("virtual:echo");
    mgr.enumerate().expect("enumerate");
}
