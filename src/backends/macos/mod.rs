//! macOS backend: IOKit `IOHIDDevice` services.
//!
//! Devices are keyed by their IOService registry path. Identity comes from
//! the registry properties; report lengths come from the `ReportDescriptor`
//! property when present, falling back to the `Max*ReportSize` properties.
//! The reader thread owns a `CFRunLoop` that delivers input reports.

mod ffi;
mod stream;

use std::ffi::{CStr, CString};
use std::ptr::null;

use core_foundation::base::{CFType, TCFType};
use core_foundation::data::CFData;
use core_foundation::number::CFNumber;
use core_foundation::string::CFString;
use core_foundation_sys::base::kCFAllocatorDefault;

use super::{DeviceCreation, PlatformManager, PlatformStream};
use crate::device::{DeviceDescriptor, DeviceKey};
use crate::error::{HidError, Result};
use crate::report_descriptor::{with_report_id_byte, ReportLayout};

use ffi::*;
use stream::MacStream;

#[derive(Debug, Default)]
pub struct MacManager;

impl MacManager {
    pub fn new() -> Self {
        Self
    }
}

pub(super) fn io_error(path: &str, ret: IOReturn) -> HidError {
    let msg = format!("{path}: IOReturn {ret:#010x}");
    match ret {
        kIOReturnNotPrivileged | kIOReturnNotPermitted | kIOReturnExclusiveAccess => {
            HidError::PermissionDenied(msg)
        }
        kIOReturnNoDevice => HidError::NotFound(msg),
        _ => HidError::Io(msg),
    }
}

/// A registry object released on drop.
struct IoObject(io_object_t);

impl IoObject {
    fn from_path(path: &str) -> Result<Self> {
        let cpath = CString::new(path).map_err(|_| HidError::NotFound(path.to_string()))?;
        // SAFETY: NUL-terminated path.
        let entry = unsafe { IORegistryEntryFromPath(kIOMainPortDefault, cpath.as_ptr()) };
        if entry == 0 {
            return Err(HidError::NotFound(path.to_string()));
        }
        Ok(Self(entry))
    }

    fn property(&self, key: &str) -> Option<CFType> {
        let key = CFString::new(key);
        // SAFETY: returns a +1 reference or null.
        let value = unsafe {
            IORegistryEntryCreateCFProperty(self.0, key.as_concrete_TypeRef(), kCFAllocatorDefault, 0)
        };
        if value.is_null() {
            return None;
        }
        // SAFETY: create rule; we own the reference.
        Some(unsafe { CFType::wrap_under_create_rule(value) })
    }

    fn int(&self, key: &str) -> Option<i64> {
        self.property(key)?.downcast::<CFNumber>()?.to_i64()
    }

    fn string(&self, key: &str) -> String {
        self.property(key)
            .and_then(|v| v.downcast::<CFString>())
            .map(|s| s.to_string())
            .unwrap_or_default()
    }

    fn report_descriptor(&self) -> Option<Vec<u8>> {
        let data = self.property("ReportDescriptor")?.downcast::<CFData>()?;
        Some(data.bytes().to_vec())
    }
}

impl Drop for IoObject {
    fn drop(&mut self) {
        // SAFETY: owned registry reference.
        unsafe { IOObjectRelease(self.0) };
    }
}

fn registry_path(entry: &IoObject) -> Option<String> {
    let mut buf: io_string_t = [0; 512];
    // SAFETY: `buf` is an io_string_t.
    let ret = unsafe { IORegistryEntryGetPath(entry.0, c"IOService".as_ptr(), buf.as_mut_ptr()) };
    if ret != kIOReturnSuccess {
        return None;
    }
    // SAFETY: IOKit NUL-terminates the path within `buf`.
    let path = unsafe { CStr::from_ptr(buf.as_ptr()) };
    Some(path.to_string_lossy().into_owned())
}

fn as_u16(value: Option<i64>) -> Option<u16> {
    value.and_then(|v| u16::try_from(v).ok())
}

impl PlatformManager for MacManager {
    fn name(&self) -> &'static str {
        "macos-iokit"
    }

    fn is_supported(&self) -> bool {
        // SAFETY: matching dictionary is consumed below or released.
        let matching = unsafe { IOServiceMatching(c"IOHIDDevice".as_ptr()) };
        if matching.is_null() {
            return false;
        }
        unsafe { core_foundation_sys::base::CFRelease(matching as *const _) };
        true
    }

    fn refresh(&self) -> Result<Vec<DeviceKey>> {
        // SAFETY: IOServiceGetMatchingServices consumes `matching`.
        let matching = unsafe { IOServiceMatching(c"IOHIDDevice".as_ptr()) };
        if matching.is_null() {
            return Err(HidError::io("IOServiceMatching(IOHIDDevice) failed"));
        }
        let mut iterator: io_iterator_t = 0;
        let ret = unsafe { IOServiceGetMatchingServices(kIOMainPortDefault, matching, &mut iterator) };
        if ret != kIOReturnSuccess {
            return Err(io_error("IOServiceGetMatchingServices", ret));
        }
        let iterator = IoObject(iterator);

        let mut keys = Vec::new();
        loop {
            // SAFETY: valid iterator; each object is released by the guard.
            let next = unsafe { IOIteratorNext(iterator.0) };
            if next == 0 {
                break;
            }
            if let Some(path) = registry_path(&IoObject(next)) {
                keys.push(DeviceKey::new(path));
            }
        }
        Ok(keys)
    }

    fn create_device(&self, key: &DeviceKey) -> Result<DeviceCreation> {
        let entry = IoObject::from_path(key.as_str())?;
        let (Some(vendor_id), Some(product_id)) = (
            as_u16(entry.int("VendorID")),
            as_u16(entry.int("ProductID")),
        ) else {
            return Err(HidError::io(format!("{key} has no vendor/product IDs")));
        };

        let mut desc = DeviceDescriptor {
            path: key.to_string(),
            vendor_id,
            product_id,
            version: as_u16(entry.int("VersionNumber")).unwrap_or(0),
            manufacturer: entry.string("Manufacturer"),
            product: entry.string("Product"),
            serial_number: entry.string("SerialNumber"),
            ..DeviceDescriptor::default()
        };

        match entry.report_descriptor() {
            Some(bytes) => {
                let layout = ReportLayout::parse(&bytes);
                desc.max_input_len = with_report_id_byte(layout.max_input_len());
                desc.max_output_len = with_report_id_byte(layout.max_output_len());
                desc.max_feature_len = with_report_id_byte(layout.max_feature_len());
            }
            None => {
                let size = |k| entry.int(k).and_then(|v| usize::try_from(v).ok()).unwrap_or(0);
                desc.max_input_len = size("MaxInputReportSize");
                desc.max_output_len = size("MaxOutputReportSize");
                desc.max_feature_len = size("MaxFeatureReportSize");
            }
        }
        Ok(DeviceCreation::Ready(desc))
    }

    fn open(&self, device: &DeviceDescriptor) -> Result<Box<dyn PlatformStream>> {
        let entry = IoObject::from_path(&device.path)?;
        // SAFETY: +1 reference, released by MacStream::free or below.
        let handle = unsafe { IOHIDDeviceCreate(kCFAllocatorDefault, entry.0) };
        if handle.is_null() {
            return Err(HidError::NotFound(device.path.clone()));
        }
        let ret = unsafe { IOHIDDeviceOpen(handle, kIOHIDOptionsTypeNone) };
        if ret != kIOReturnSuccess {
            unsafe { core_foundation_sys::base::CFRelease(handle as *const _) };
            return Err(io_error(&device.path, ret));
        }
        Ok(Box::new(MacStream::new(handle, device.path.clone(), device.max_input_len)))
    }

    fn report_descriptor(&self, device: &DeviceDescriptor) -> Result<Vec<u8>> {
        IoObject::from_path(&device.path)?
            .report_descriptor()
            .ok_or_else(|| HidError::Unsupported(format!("{} exposes no report descriptor", device.path)))
    }
}
