//! Owned Win32 handles and the HidD/HidP queries made on them.

use std::ffi::OsStr;
use std::io;
use std::mem::MaybeUninit;
use std::os::windows::ffi::OsStrExt;
use std::ptr::{null, null_mut};

use windows_sys::Win32::Devices::HumanInterfaceDevice::{
    HidD_FreePreparsedData, HidD_GetAttributes, HidD_GetManufacturerString,
    HidD_GetPreparsedData, HidD_GetProductString, HidD_GetSerialNumberString, HidP_GetCaps,
    HIDD_ATTRIBUTES, HIDP_CAPS, HIDP_STATUS_SUCCESS, PHIDP_PREPARSED_DATA,
};
use windows_sys::Win32::Foundation::{
    CloseHandle, GetLastError, GENERIC_READ, GENERIC_WRITE, HANDLE, INVALID_HANDLE_VALUE,
};
use windows_sys::Win32::Storage::FileSystem::{
    CreateFileW, FILE_FLAG_OVERLAPPED, FILE_SHARE_READ, FILE_SHARE_WRITE, OPEN_EXISTING,
};
use windows_sys::Win32::System::Threading::CreateEventW;

use crate::error::HidError;

/// Room for the HID string descriptors, in UTF-16 units.
const STRING_CAPACITY: usize = 128;

/// A Win32 handle closed on drop.
pub(super) struct OwnedHandle(HANDLE);

// SAFETY: kernel handles may be used and closed from any thread.
unsafe impl Send for OwnedHandle {}
unsafe impl Sync for OwnedHandle {}

impl OwnedHandle {
    pub(super) fn raw(&self) -> HANDLE {
        self.0
    }
}

impl Drop for OwnedHandle {
    fn drop(&mut self) {
        // SAFETY: the handle is valid and owned.
        unsafe { CloseHandle(self.0) };
    }
}

pub(super) fn last_error(context: &str) -> HidError {
    // SAFETY: no preconditions.
    let code = unsafe { GetLastError() };
    HidError::from_os(context, io::Error::from_raw_os_error(code as i32))
}

pub(super) fn wide(s: &str) -> Vec<u16> {
    OsStr::new(s).encode_wide().chain(std::iter::once(0)).collect()
}

/// How a device node is opened.
#[derive(Clone, Copy, PartialEq, Eq)]
pub(super) enum Access {
    /// No read or write access; enough for attribute and string queries.
    Query,
    /// Read/write (read-only as a fallback) with overlapped I/O.
    Stream,
}

pub(super) fn open_device_handle(path: &str, access: Access) -> Result<OwnedHandle, HidError> {
    let wide = wide(path);
    let flags = match access {
        Access::Query => 0,
        Access::Stream => FILE_FLAG_OVERLAPPED,
    };
    let try_open = |desired: u32| unsafe {
        CreateFileW(
            wide.as_ptr(),
            desired,
            FILE_SHARE_READ | FILE_SHARE_WRITE,
            null(),
            OPEN_EXISTING,
            flags,
            null_mut(),
        )
    };

    let mut handle = match access {
        Access::Query => try_open(0),
        Access::Stream => try_open(GENERIC_READ | GENERIC_WRITE),
    };
    if handle == INVALID_HANDLE_VALUE && access == Access::Stream {
        handle = try_open(GENERIC_READ);
    }
    if handle == INVALID_HANDLE_VALUE {
        return Err(last_error(path));
    }
    Ok(OwnedHandle(handle))
}

pub(super) fn manual_reset_event() -> Result<OwnedHandle, HidError> {
    // SAFETY: unnamed event, default security.
    let event = unsafe { CreateEventW(null(), 1, 0, null()) };
    if event.is_null() {
        return Err(last_error("CreateEventW"));
    }
    Ok(OwnedHandle(event))
}

pub(super) struct Attributes {
    pub(super) vendor_id: u16,
    pub(super) product_id: u16,
    pub(super) version: u16,
}

pub(super) fn attributes(handle: &OwnedHandle) -> Option<Attributes> {
    let mut attrs = HIDD_ATTRIBUTES {
        Size: std::mem::size_of::<HIDD_ATTRIBUTES>() as u32,
        VendorID: 0,
        ProductID: 0,
        VersionNumber: 0,
    };
    // SAFETY: `attrs` is a properly sized HIDD_ATTRIBUTES.
    let ok = unsafe { HidD_GetAttributes(handle.raw(), &mut attrs) };
    (ok != 0).then_some(Attributes {
        vendor_id: attrs.VendorID,
        product_id: attrs.ProductID,
        version: attrs.VersionNumber,
    })
}

type StringQuery = unsafe extern "system" fn(HANDLE, *mut core::ffi::c_void, u32) -> u8;

fn query_string(handle: &OwnedHandle, query: StringQuery) -> String {
    let mut buf = [0u16; STRING_CAPACITY];
    // SAFETY: the length passed is the buffer size in bytes.
    let ok = unsafe {
        query(
            handle.raw(),
            buf.as_mut_ptr().cast(),
            (buf.len() * std::mem::size_of::<u16>()) as u32,
        )
    };
    if ok == 0 {
        return String::new();
    }
    let end = buf.iter().position(|&c| c == 0).unwrap_or(buf.len());
    String::from_utf16_lossy(&buf[..end])
}

pub(super) struct Strings {
    pub(super) manufacturer: String,
    pub(super) product: String,
    pub(super) serial_number: String,
}

pub(super) fn strings(handle: &OwnedHandle) -> Strings {
    Strings {
        manufacturer: query_string(handle, HidD_GetManufacturerString),
        product: query_string(handle, HidD_GetProductString),
        serial_number: query_string(handle, HidD_GetSerialNumberString),
    }
}

/// Report byte lengths (input, output, feature), Report-ID byte included.
pub(super) fn report_lengths(handle: &OwnedHandle) -> Option<(usize, usize, usize)> {
    let mut ppd: PHIDP_PREPARSED_DATA = 0;
    // SAFETY: `ppd` receives an allocation freed below.
    let ok = unsafe { HidD_GetPreparsedData(handle.raw(), &mut ppd) };
    if ok == 0 || ppd == 0 {
        return None;
    }

    let mut caps = MaybeUninit::<HIDP_CAPS>::uninit();
    // SAFETY: `ppd` is valid until freed; `caps` is written on success.
    let status = unsafe { HidP_GetCaps(ppd, caps.as_mut_ptr()) };
    let lengths = (status == HIDP_STATUS_SUCCESS).then(|| {
        // SAFETY: HidP_GetCaps succeeded.
        let caps = unsafe { caps.assume_init() };
        (
            caps.InputReportByteLength as usize,
            caps.OutputReportByteLength as usize,
            caps.FeatureReportByteLength as usize,
        )
    });
    // SAFETY: allocated by HidD_GetPreparsedData above.
    unsafe { HidD_FreePreparsedData(ppd) };
    lengths
}
