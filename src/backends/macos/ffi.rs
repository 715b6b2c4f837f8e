//! The slice of IOKit used by the backend.
#![allow(non_camel_case_types, non_upper_case_globals)]

use std::os::raw::{c_char, c_void};

use core_foundation_sys::base::{CFAllocatorRef, CFIndex, CFTypeRef};
use core_foundation_sys::dictionary::CFMutableDictionaryRef;
use core_foundation_sys::runloop::CFRunLoopRef;
use core_foundation_sys::string::CFStringRef;

pub type kern_return_t = i32;
pub type IOReturn = kern_return_t;
pub type IOOptionBits = u32;
pub type mach_port_t = u32;
pub type io_object_t = mach_port_t;
pub type io_iterator_t = io_object_t;
pub type io_service_t = io_object_t;
pub type io_registry_entry_t = io_object_t;
pub type io_string_t = [c_char; 512];

pub type IOHIDDeviceRef = *mut c_void;
pub type IOHIDReportType = u32;

pub type IOHIDReportCallback = unsafe extern "C" fn(
    context: *mut c_void,
    result: IOReturn,
    sender: *mut c_void,
    kind: IOHIDReportType,
    report_id: u32,
    report: *mut u8,
    report_len: CFIndex,
);
pub type IOHIDCallback = unsafe extern "C" fn(context: *mut c_void, result: IOReturn, sender: *mut c_void);

/// `MACH_PORT_NULL` selects the default main port.
pub const kIOMainPortDefault: mach_port_t = 0;
pub const kIOHIDOptionsTypeNone: IOOptionBits = 0;

pub const kIOHIDReportTypeInput: IOHIDReportType = 0;
pub const kIOHIDReportTypeOutput: IOHIDReportType = 1;
pub const kIOHIDReportTypeFeature: IOHIDReportType = 2;

pub const kIOReturnSuccess: IOReturn = 0;
pub const kIOReturnNoDevice: IOReturn = 0xE000_02C0_u32 as i32;
pub const kIOReturnNotPrivileged: IOReturn = 0xE000_02C1_u32 as i32;
pub const kIOReturnExclusiveAccess: IOReturn = 0xE000_02C5_u32 as i32;
pub const kIOReturnNotPermitted: IOReturn = 0xE000_02E2_u32 as i32;

#[link(name = "IOKit", kind = "framework")]
extern "C" {
    pub fn IOServiceMatching(name: *const c_char) -> CFMutableDictionaryRef;
    /// Consumes one reference to `matching`.
    pub fn IOServiceGetMatchingServices(
        main_port: mach_port_t,
        matching: CFMutableDictionaryRef,
        existing: *mut io_iterator_t,
    ) -> kern_return_t;
    pub fn IOIteratorNext(iterator: io_iterator_t) -> io_object_t;
    pub fn IOObjectRelease(object: io_object_t) -> kern_return_t;

    pub fn IORegistryEntryGetPath(
        entry: io_registry_entry_t,
        plane: *const c_char,
        path: *mut c_char,
    ) -> kern_return_t;
    pub fn IORegistryEntryFromPath(main_port: mach_port_t, path: *const c_char) -> io_registry_entry_t;
    pub fn IORegistryEntryCreateCFProperty(
        entry: io_registry_entry_t,
        key: CFStringRef,
        allocator: CFAllocatorRef,
        options: IOOptionBits,
    ) -> CFTypeRef;

    pub fn IOHIDDeviceCreate(allocator: CFAllocatorRef, service: io_service_t) -> IOHIDDeviceRef;
    pub fn IOHIDDeviceOpen(device: IOHIDDeviceRef, options: IOOptionBits) -> IOReturn;
    pub fn IOHIDDeviceClose(device: IOHIDDeviceRef, options: IOOptionBits) -> IOReturn;
    pub fn IOHIDDeviceScheduleWithRunLoop(device: IOHIDDeviceRef, run_loop: CFRunLoopRef, mode: CFStringRef);
    pub fn IOHIDDeviceUnscheduleFromRunLoop(device: IOHIDDeviceRef, run_loop: CFRunLoopRef, mode: CFStringRef);
    pub fn IOHIDDeviceRegisterInputReportCallback(
        device: IOHIDDeviceRef,
        report: *mut u8,
        report_len: CFIndex,
        callback: Option<IOHIDReportCallback>,
        context: *mut c_void,
    );
    pub fn IOHIDDeviceRegisterRemovalCallback(
        device: IOHIDDeviceRef,
        callback: Option<IOHIDCallback>,
        context: *mut c_void,
    );
    pub fn IOHIDDeviceSetReport(
        device: IOHIDDeviceRef,
        kind: IOHIDReportType,
        report_id: CFIndex,
        report: *const u8,
        report_len: CFIndex,
    ) -> IOReturn;
    pub fn IOHIDDeviceGetReport(
        device: IOHIDDeviceRef,
        kind: IOHIDReportType,
        report_id: CFIndex,
        report: *mut u8,
        report_len: *mut CFIndex,
    ) -> IOReturn;
}
