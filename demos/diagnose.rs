use std::time::Duration;

use hidlink::{HidConfig, Logger, EventFilter, Manager};
use tracing_subscriber::EnvFilter;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    // Optional config file as the first argument.
    let config = match std::env::args().nth(1) {
        Some(path) => HidConfig::load(&path).expect("load config"),
        None => HidConfig::default(),
    };

    let mgr = Manager::with_config(config);
    println!("backend: {}", mgr.backend_name());

    let devices = mgr.enumerate().expect("enumerate devices");
    println!("Discovered {} HID device(s)", devices.len());
    for d in &devices {
        println!(
            "VID:PID={:04x}:{:04x} ver={:04x} in={} out={} feat={} name={:?} ser={:?} path={}",
            d.vendor_id,
            d.product_id,
            d.version,
            d.max_input_len,
            d.max_output_len,
            d.max_feature_len,
            d.product,
            d.serial_number,
            d.path
        );
        match d.report_descriptor() {
            Ok(bytes) => println!("  report descriptor: {} bytes", bytes.len()),
            Err(e) => println!("  report descriptor: {e}"),
        }
    }

    // Watch for hot-plug changes.
    mgr.add_listener(Logger::new(), EventFilter::All, None);
    loop {
        std::thread::sleep(Duration::from_secs(1));
        if let Err(e) = mgr.enumerate() {
            eprintln!("enumeration failed: {e}");
        }
    }
}
