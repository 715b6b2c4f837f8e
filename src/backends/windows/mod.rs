//! Windows backend.
//!
//! Devices are enumerated through SetupAPI over the HID interface class, and
//! keyed by their interface path. Construction is two-phase: vendor, product
//! and version come from `HidD_GetAttributes` on a query-only handle; strings
//! and report lengths (`HidP_GetCaps`) are read in the deferred phase.
//!
//! Streams use overlapped `ReadFile`/`WriteFile`. Windows always includes the
//! Report-ID byte and expects writes of exactly the output report length, so
//! the stream pads short output and feature reports with zeros.

mod handle;
mod stream;

use std::mem::size_of;
use std::ptr::{null, null_mut};

use windows_sys::core::GUID;
use windows_sys::Win32::Devices::DeviceAndDriverInstallation::{
    SetupDiDestroyDeviceInfoList, SetupDiEnumDeviceInterfaces, SetupDiGetClassDevsW,
    SetupDiGetDeviceInterfaceDetailW, DIGCF_DEVICEINTERFACE, DIGCF_PRESENT, HDEVINFO,
    SP_DEVICE_INTERFACE_DATA, SP_DEVICE_INTERFACE_DETAIL_DATA_W,
};
use windows_sys::Win32::Devices::HumanInterfaceDevice::HidD_GetHidGuid;
use windows_sys::Win32::Foundation::INVALID_HANDLE_VALUE;

use super::{DeviceCreation, PlatformManager, PlatformStream};
use crate::device::{DeviceDescriptor, DeviceKey};
use crate::error::{HidError, Result};

use handle::{open_device_handle, Access};
use stream::WinStream;

#[derive(Debug, Default)]
pub struct WinManager;

impl WinManager {
    pub fn new() -> Self {
        Self
    }
}

/// Destroys the SetupAPI device list on drop.
struct DeviceInfoSet(HDEVINFO);

impl Drop for DeviceInfoSet {
    fn drop(&mut self) {
        // SAFETY: valid list returned by SetupDiGetClassDevsW.
        unsafe { SetupDiDestroyDeviceInfoList(self.0) };
    }
}

fn hid_guid() -> GUID {
    // SAFETY: GUID is plain data, filled by the call.
    let mut guid: GUID = unsafe { std::mem::zeroed() };
    unsafe { HidD_GetHidGuid(&mut guid) };
    guid
}

fn interface_path(set: &DeviceInfoSet, iface: &SP_DEVICE_INTERFACE_DATA) -> Option<String> {
    let mut required = 0u32;
    // SAFETY: size query with no output buffer.
    unsafe {
        SetupDiGetDeviceInterfaceDetailW(set.0, iface, null_mut(), 0, &mut required, null_mut())
    };
    if (required as usize) < size_of::<SP_DEVICE_INTERFACE_DETAIL_DATA_W>() {
        return None;
    }

    // u32 storage keeps the detail struct aligned.
    let mut storage = vec![0u32; (required as usize).div_ceil(4)];
    let detail = storage.as_mut_ptr().cast::<SP_DEVICE_INTERFACE_DETAIL_DATA_W>();
    // SAFETY: `storage` holds at least `required` bytes.
    let ok = unsafe {
        (*detail).cbSize = size_of::<SP_DEVICE_INTERFACE_DETAIL_DATA_W>() as u32;
        SetupDiGetDeviceInterfaceDetailW(set.0, iface, detail, required, null_mut(), null_mut())
    };
    if ok == 0 {
        return None;
    }

    let offset = std::mem::offset_of!(SP_DEVICE_INTERFACE_DETAIL_DATA_W, DevicePath);
    let units = (required as usize - offset) / 2;
    // SAFETY: DevicePath is a NUL-terminated UTF-16 string inside `storage`.
    let path = unsafe {
        let start = detail.cast::<u8>().add(offset).cast::<u16>();
        std::slice::from_raw_parts(start, units)
    };
    let end = path.iter().position(|&c| c == 0).unwrap_or(path.len());
    Some(String::from_utf16_lossy(&path[..end]))
}

impl PlatformManager for WinManager {
    fn name(&self) -> &'static str {
        "windows-hid"
    }

    fn is_supported(&self) -> bool {
        true
    }

    fn refresh(&self) -> Result<Vec<DeviceKey>> {
        let guid = hid_guid();
        // SAFETY: present HID interfaces; the list is destroyed by the guard.
        let raw = unsafe {
            SetupDiGetClassDevsW(&guid, null(), null_mut(), DIGCF_PRESENT | DIGCF_DEVICEINTERFACE)
        };
        if raw as isize == INVALID_HANDLE_VALUE as isize {
            return Err(handle::last_error("SetupDiGetClassDevsW"));
        }
        let set = DeviceInfoSet(raw);

        let mut keys = Vec::new();
        for index in 0.. {
            // SAFETY: SP_DEVICE_INTERFACE_DATA is plain data.
            let mut iface: SP_DEVICE_INTERFACE_DATA = unsafe { std::mem::zeroed() };
            iface.cbSize = size_of::<SP_DEVICE_INTERFACE_DATA>() as u32;
            // SAFETY: `iface` is sized; enumeration ends when the call fails.
            let ok = unsafe { SetupDiEnumDeviceInterfaces(set.0, null(), &guid, index, &mut iface) };
            if ok == 0 {
                break;
            }
            if let Some(path) = interface_path(&set, &iface) {
                keys.push(DeviceKey::new(path));
            }
        }
        Ok(keys)
    }

    fn create_device(&self, key: &DeviceKey) -> Result<DeviceCreation> {
        let handle = open_device_handle(key.as_str(), Access::Query)?;
        let attrs = handle::attributes(&handle)
            .ok_or_else(|| HidError::io(format!("HidD_GetAttributes failed for {key}")))?;

        let partial = DeviceDescriptor {
            path: key.to_string(),
            vendor_id: attrs.vendor_id,
            product_id: attrs.product_id,
            version: attrs.version,
            ..DeviceDescriptor::default()
        };
        Ok(DeviceCreation::Deferred {
            partial,
            finish: Box::new(move |mut desc| {
                let strings = handle::strings(&handle);
                desc.manufacturer = strings.manufacturer;
                desc.product = strings.product;
                desc.serial_number = strings.serial_number;
                if let Some((input, output, feature)) = handle::report_lengths(&handle) {
                    desc.max_input_len = input;
                    desc.max_output_len = output;
                    desc.max_feature_len = feature;
                }
                desc
            }),
        })
    }

    fn open(&self, device: &DeviceDescriptor) -> Result<Box<dyn PlatformStream>> {
        let handle = open_device_handle(&device.path, Access::Stream)?;
        let stream = WinStream::new(
            handle,
            device.path.clone(),
            device.max_input_len,
            device.max_output_len,
            device.max_feature_len,
        )?;
        Ok(Box::new(stream))
    }
}
