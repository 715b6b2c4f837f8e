//! hidapi-backed fallback.
//!
//! Used when the native backend is unavailable or explicitly requested with
//! [`BackendPreference::Hidapi`](crate::config::BackendPreference::Hidapi).
//! hidapi strips the Report-ID byte from input reports of devices without
//! IDs, so the stream re-adds it to keep the buffer layout uniform.

use std::collections::BTreeSet;
use std::ffi::CString;
use std::sync::Arc;

use hidapi::{DeviceInfo, HidApi, HidDevice};
use parking_lot::Mutex;

use super::{DeviceCreation, PlatformManager, PlatformStream};
use crate::device::{DeviceDescriptor, DeviceKey};
use crate::error::{HidError, Result};
use crate::report_descriptor::{with_report_id_byte, ReportLayout};
use crate::stream::ReaderContext;

/// Read slice for the reader thread, in milliseconds.
const READ_SLICE_MS: i32 = 50;

/// Report-descriptor buffer size hidapi accepts.
const MAX_REPORT_DESCRIPTOR: usize = 4096;

/// Length assumed when a device will not hand over its report descriptor.
const FALLBACK_REPORT_LEN: usize = 65;

pub struct HidapiManager {
    api: Arc<Mutex<HidApi>>,
}

impl HidapiManager {
    pub fn new() -> Result<Self> {
        let api = HidApi::new()?;
        Ok(Self {
            api: Arc::new(Mutex::new(api)),
        })
    }
}

fn path_key(info: &DeviceInfo) -> DeviceKey {
    DeviceKey::new(info.path().to_string_lossy().into_owned())
}

fn identity(info: &DeviceInfo) -> DeviceDescriptor {
    DeviceDescriptor {
        path: info.path().to_string_lossy().into_owned(),
        vendor_id: info.vendor_id(),
        product_id: info.product_id(),
        version: info.release_number(),
        manufacturer: info.manufacturer_string().unwrap_or_default().to_string(),
        product: info.product_string().unwrap_or_default().to_string(),
        serial_number: info.serial_number().unwrap_or_default().to_string(),
        ..DeviceDescriptor::default()
    }
}

fn open_path(api: &HidApi, path: &str) -> Result<HidDevice> {
    let cpath = CString::new(path).map_err(|_| HidError::NotFound(path.to_string()))?;
    Ok(api.open_path(&cpath)?)
}

fn read_layout(device: &HidDevice) -> Result<ReportLayout> {
    let mut buf = vec![0u8; MAX_REPORT_DESCRIPTOR];
    let n = device.get_report_descriptor(&mut buf)?;
    Ok(ReportLayout::parse(&buf[..n]))
}

impl PlatformManager for HidapiManager {
    fn name(&self) -> &'static str {
        "hidapi"
    }

    fn is_supported(&self) -> bool {
        true
    }

    fn refresh(&self) -> Result<Vec<DeviceKey>> {
        let mut api = self.api.lock();
        api.refresh_devices()?;
        // Collections of one device share a path on some platforms.
        let keys: BTreeSet<DeviceKey> = api.device_list().map(path_key).collect();
        Ok(keys.into_iter().collect())
    }

    fn create_device(&self, key: &DeviceKey) -> Result<DeviceCreation> {
        let partial = {
            let api = self.api.lock();
            let info = api
                .device_list()
                .find(|info| path_key(info) == *key)
                .ok_or_else(|| HidError::NotFound(key.to_string()))?;
            identity(info)
        };

        let api = Arc::clone(&self.api);
        Ok(DeviceCreation::Deferred {
            partial,
            finish: Box::new(move |mut desc| {
                let layout = {
                    let api = api.lock();
                    open_path(&api, &desc.path).and_then(|dev| read_layout(&dev))
                };
                match layout {
                    Ok(layout) => {
                        desc.max_input_len = with_report_id_byte(layout.max_input_len());
                        desc.max_output_len = with_report_id_byte(layout.max_output_len());
                        desc.max_feature_len = with_report_id_byte(layout.max_feature_len());
                    }
                    Err(e) => {
                        tracing::debug!(path = %desc.path, error = %e, "no report descriptor; assuming default lengths");
                        desc.max_input_len = FALLBACK_REPORT_LEN;
                        desc.max_output_len = FALLBACK_REPORT_LEN;
                        desc.max_feature_len = FALLBACK_REPORT_LEN;
                    }
                }
                desc
            }),
        })
    }

    fn open(&self, device: &DeviceDescriptor) -> Result<Box<dyn PlatformStream>> {
        let raw = open_path(&self.api.lock(), &device.path)?;
        let reports_use_id = read_layout(&raw)
            .map(|layout| layout.reports_use_id())
            .unwrap_or(false);
        Ok(Box::new(HidapiStream {
            device: Mutex::new(Some(raw)),
            reports_use_id,
            max_input_len: device.max_input_len.max(1),
        }))
    }

    fn report_descriptor(&self, device: &DeviceDescriptor) -> Result<Vec<u8>> {
        let raw = open_path(&self.api.lock(), &device.path)?;
        let mut buf = vec![0u8; MAX_REPORT_DESCRIPTOR];
        let n = raw.get_report_descriptor(&mut buf)?;
        buf.truncate(n);
        Ok(buf)
    }
}

struct HidapiStream {
    // `HidDevice` is not `Sync`; the lock is held for one read slice at most.
    device: Mutex<Option<HidDevice>>,
    reports_use_id: bool,
    max_input_len: usize,
}

impl HidapiStream {
    fn with_device<T>(&self, f: impl FnOnce(&HidDevice) -> Result<T>) -> Result<T> {
        match self.device.lock().as_ref() {
            Some(dev) => f(dev),
            None => Err(HidError::Closed),
        }
    }
}

impl PlatformStream for HidapiStream {
    fn run_reader(&self, ctx: &ReaderContext<'_>) -> Result<()> {
        let mut buf = vec![0u8; self.max_input_len];
        while !ctx.should_stop() {
            let n = self.with_device(|dev| Ok(dev.read_timeout(&mut buf, READ_SLICE_MS)?))?;
            if n == 0 {
                continue;
            }
            let report = if self.reports_use_id {
                buf[..n].to_vec()
            } else {
                let mut report = Vec::with_capacity(n + 1);
                report.push(0);
                report.extend_from_slice(&buf[..n]);
                report
            };
            ctx.push(report);
        }
        Ok(())
    }

    fn write_output(&self, report: &[u8]) -> Result<()> {
        let written = self.with_device(|dev| Ok(dev.write(report)?))?;
        if written == 0 {
            return Err(HidError::io("device accepted no bytes"));
        }
        Ok(())
    }

    fn set_feature(&self, report: &[u8]) -> Result<()> {
        self.with_device(|dev| Ok(dev.send_feature_report(report)?))
    }

    fn get_feature(&self, buf: &mut [u8]) -> Result<usize> {
        self.with_device(|dev| Ok(dev.get_feature_report(buf)?))
    }

    fn free(&self) {
        drop(self.device.lock().take());
    }
}
