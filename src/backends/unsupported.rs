//! Last-resort backend for platforms with no usable HID access.

use super::{DeviceCreation, PlatformManager, PlatformStream};
use crate::device::{DeviceDescriptor, DeviceKey};
use crate::error::{HidError, Result};

/// Enumerates nothing and refuses to open anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedManager;

impl PlatformManager for UnsupportedManager {
    fn name(&self) -> &'static str {
        "unsupported"
    }

    fn is_supported(&self) -> bool {
        true
    }

    fn refresh(&self) -> Result<Vec<DeviceKey>> {
        Ok(Vec::new())
    }

    fn create_device(&self, key: &DeviceKey) -> Result<DeviceCreation> {
        Err(HidError::NotFound(key.to_string()))
    }

    fn open(&self, device: &DeviceDescriptor) -> Result<Box<dyn PlatformStream>> {
        Err(HidError::Unsupported(format!(
            "no HID backend available to open {}",
            device.path
        )))
    }
}
