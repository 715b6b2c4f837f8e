//! Linux backend: udev enumeration over the `hidraw` subsystem.
//!
//! Device keys are udev syspaths. Identity comes from the parent USB device
//! when there is one, otherwise from the `HID_*` properties of the parent HID
//! device (Bluetooth, I2C). Report lengths come from the report descriptor,
//! read with `HIDIOCGRDESC`.

mod ioctl;
mod stream;

use std::fs::{File, OpenOptions};
use std::os::fd::AsRawFd;
use std::os::unix::fs::OpenOptionsExt;
use std::path::{Path, PathBuf};

use super::{DeviceCreation, PlatformManager, PlatformStream};
use crate::device::{DeviceDescriptor, DeviceKey};
use crate::error::{HidError, Result};
use crate::report_descriptor::{with_report_id_byte, ReportLayout};

use stream::HidrawStream;

#[derive(Debug, Default)]
pub struct LinuxManager;

impl LinuxManager {
    pub fn new() -> Self {
        Self
    }
}

fn attr(device: &udev::Device, name: &str) -> Option<String> {
    device
        .attribute_value(name)
        .map(|v| v.to_string_lossy().trim().to_string())
}

fn property(device: &udev::Device, name: &str) -> Option<String> {
    device
        .property_value(name)
        .map(|v| v.to_string_lossy().trim().to_string())
}

fn parse_hex_u16(s: &str) -> Option<u16> {
    u16::from_str_radix(s.trim(), 16).ok()
}

/// `HID_ID=0003:0000046D:0000C52B` (bus, vendor, product).
fn parse_hid_id(s: &str) -> Option<(u16, u16)> {
    let mut parts = s.split(':').skip(1);
    let vendor = u32::from_str_radix(parts.next()?, 16).ok()?;
    let product = u32::from_str_radix(parts.next()?, 16).ok()?;
    Some((vendor as u16, product as u16))
}

fn udev_device(key: &DeviceKey) -> Result<udev::Device> {
    udev::Device::from_syspath(Path::new(key.as_str()))
        .map_err(|e| HidError::from_os(key.as_str(), e))
}

fn devnode(device: &udev::Device) -> Result<PathBuf> {
    device
        .devnode()
        .map(Path::to_path_buf)
        .ok_or_else(|| HidError::NotFound(format!("{} has no device node", device.syspath().display())))
}

fn open_node(node: &Path, write: bool) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(write)
        .custom_flags(libc::O_NONBLOCK | libc::O_CLOEXEC)
        .open(node)
        .map_err(|e| HidError::from_os(&node.display().to_string(), e))
}

fn read_layout(file: &File, node: &Path) -> Result<(Vec<u8>, ReportLayout)> {
    let bytes = ioctl::report_descriptor(file.as_raw_fd())
        .map_err(|e| HidError::from_os(&node.display().to_string(), e))?;
    let layout = ReportLayout::parse(&bytes);
    Ok((bytes, layout))
}

fn fill_identity(device: &udev::Device, desc: &mut DeviceDescriptor) -> Result<()> {
    let usb = device
        .parent_with_subsystem_devtype("usb", "usb_device")
        .ok()
        .flatten();
    if let Some(usb) = usb {
        let vendor = attr(&usb, "idVendor").as_deref().and_then(parse_hex_u16);
        let product = attr(&usb, "idProduct").as_deref().and_then(parse_hex_u16);
        if let (Some(vendor), Some(product)) = (vendor, product) {
            desc.vendor_id = vendor;
            desc.product_id = product;
            desc.version = attr(&usb, "bcdDevice")
                .as_deref()
                .and_then(parse_hex_u16)
                .unwrap_or(0);
            desc.manufacturer = attr(&usb, "manufacturer").unwrap_or_default();
            desc.product = attr(&usb, "product").unwrap_or_default();
            desc.serial_number = attr(&usb, "serial").unwrap_or_default();
            return Ok(());
        }
    }

    let hid = device
        .parent_with_subsystem("hid")
        .ok()
        .flatten()
        .ok_or_else(|| HidError::NotFound(format!("{} has no HID parent", desc.path)))?;
    let (vendor, product) = property(&hid, "HID_ID")
        .as_deref()
        .and_then(parse_hid_id)
        .ok_or_else(|| HidError::io(format!("{} has no readable HID_ID", desc.path)))?;
    desc.vendor_id = vendor;
    desc.product_id = product;
    desc.product = property(&hid, "HID_NAME").unwrap_or_default();
    desc.serial_number = property(&hid, "HID_UNIQ").unwrap_or_default();
    Ok(())
}

impl PlatformManager for LinuxManager {
    fn name(&self) -> &'static str {
        "linux-hidraw"
    }

    fn is_supported(&self) -> bool {
        udev::Enumerator::new().is_ok()
    }

    fn refresh(&self) -> Result<Vec<DeviceKey>> {
        let mut enumerator = udev::Enumerator::new()?;
        enumerator.match_subsystem("hidraw")?;
        let keys = enumerator
            .scan_devices()?
            .map(|device| DeviceKey::new(device.syspath().to_string_lossy().into_owned()))
            .collect();
        Ok(keys)
    }

    fn create_device(&self, key: &DeviceKey) -> Result<DeviceCreation> {
        let device = udev_device(key)?;
        let mut desc = DeviceDescriptor {
            path: key.to_string(),
            ..DeviceDescriptor::default()
        };
        fill_identity(&device, &mut desc)?;

        let node = devnode(&device)?;
        let file = open_node(&node, false)?;
        let (_, layout) = read_layout(&file, &node)?;
        desc.max_input_len = with_report_id_byte(layout.max_input_len());
        desc.max_output_len = with_report_id_byte(layout.max_output_len());
        desc.max_feature_len = with_report_id_byte(layout.max_feature_len());
        Ok(DeviceCreation::Ready(desc))
    }

    fn open(&self, device: &DeviceDescriptor) -> Result<Box<dyn PlatformStream>> {
        let node = devnode(&udev_device(&device.key())?)?;
        let file = open_node(&node, true)?;
        let (_, layout) = read_layout(&file, &node)?;
        tracing::trace!(node = %node.display(), reports_use_id = layout.reports_use_id(), "opened hidraw node");
        Ok(Box::new(HidrawStream::new(
            file,
            node.display().to_string(),
            layout.reports_use_id(),
            device.max_input_len,
        )))
    }

    fn report_descriptor(&self, device: &DeviceDescriptor) -> Result<Vec<u8>> {
        let node = devnode(&udev_device(&device.key())?)?;
        let file = open_node(&node, false)?;
        let (bytes, _) = read_layout(&file, &node)?;
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hid_id_property() {
        assert_eq!(parse_hid_id("0005:0000054C:000009CC"), Some((0x054C, 0x09CC)));
        assert_eq!(parse_hid_id("0003:0000046D"), None);
        assert_eq!(parse_hid_id("garbage"), None);
    }

    #[test]
    fn sysfs_hex_attributes() {
        assert_eq!(parse_hex_u16("046d\n"), Some(0x046D));
        assert_eq!(parse_hex_u16("0110"), Some(0x0110));
        assert_eq!(parse_hex_u16(""), None);
    }
}
