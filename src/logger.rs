use crate::event::{DeviceEvent, DeviceEventKind};
use crate::eventbus::DeviceListener;

/// A listener that reports every device event through `tracing`.
#[derive(Debug, Default)]
pub struct Logger;

impl Logger {
    pub fn new() -> Self {
        Logger
    }
}

impl DeviceListener for Logger {
    fn on_device(&mut self, event: &DeviceEvent) {
        let d = &event.device;
        match event.kind {
            DeviceEventKind::Arrived => tracing::info!(
                path = %d.path,
                vid = format_args!("{:04X}", d.vendor_id),
                pid = format_args!("{:04X}", d.product_id),
                product = %d.product,
                "device arrived"
            ),
            DeviceEventKind::Removed => tracing::info!(path = %d.path, "device removed"),
        }
    }
}
