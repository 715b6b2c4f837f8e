use std::os::raw::c_void;
use std::sync::atomic::{AtomicBool, Ordering};

use core_foundation_sys::base::{CFIndex, CFRelease};
use core_foundation_sys::runloop::{
    kCFRunLoopDefaultMode, CFRunLoopGetCurrent, CFRunLoopRef, CFRunLoopRunInMode, CFRunLoopStop,
};
use parking_lot::Mutex;

use super::ffi::*;
use super::io_error;
use crate::backends::PlatformStream;
use crate::error::{HidError, Result};
use crate::stream::ReaderContext;

/// Run-loop slice, in seconds; bounds how long close waits for the reader.
const RUN_SLICE_SECS: f64 = 0.25;

struct RunLoop(CFRunLoopRef);

// SAFETY: CFRunLoopStop may be called from any thread.
unsafe impl Send for RunLoop {}

pub(super) struct MacStream {
    device: IOHIDDeviceRef,
    path: String,
    max_input_len: usize,
    run_loop: Mutex<Option<RunLoop>>,
    released: AtomicBool,
}

// SAFETY: IOHIDDevice calls are thread-safe; the reference is released only
// by `free`, after every other call has returned.
unsafe impl Send for MacStream {}
unsafe impl Sync for MacStream {}

impl MacStream {
    pub(super) fn new(device: IOHIDDeviceRef, path: String, max_input_len: usize) -> Self {
        Self {
            device,
            path,
            max_input_len,
            run_loop: Mutex::new(None),
            released: AtomicBool::new(false),
        }
    }

    fn set_report(&self, kind: IOHIDReportType, report: &[u8]) -> Result<()> {
        let id = report[0];
        // Without Report IDs the leading 0 is not part of the payload.
        let payload = if id == 0 { &report[1..] } else { report };
        // SAFETY: `payload` is valid for its length.
        let ret = unsafe {
            IOHIDDeviceSetReport(
                self.device,
                kind,
                id as CFIndex,
                payload.as_ptr(),
                payload.len() as CFIndex,
            )
        };
        if ret != kIOReturnSuccess {
            return Err(io_error(&self.path, ret));
        }
        Ok(())
    }
}

struct ReaderState<'a, 'b> {
    ctx: &'a ReaderContext<'b>,
    removed: AtomicBool,
}

unsafe extern "C" fn on_input_report(
    context: *mut c_void,
    result: IOReturn,
    _sender: *mut c_void,
    kind: IOHIDReportType,
    report_id: u32,
    report: *mut u8,
    report_len: CFIndex,
) {
    if result != kIOReturnSuccess || kind != kIOHIDReportTypeInput || report_len <= 0 {
        return;
    }
    // SAFETY: `context` is the ReaderState registered by `run_reader`, alive
    // while the device is scheduled; `report` holds `report_len` bytes.
    let (state, bytes) = unsafe {
        (
            &*(context as *const ReaderState<'_, '_>),
            std::slice::from_raw_parts(report, report_len as usize),
        )
    };
    let report = if report_id == 0 {
        let mut with_id = Vec::with_capacity(bytes.len() + 1);
        with_id.push(0);
        with_id.extend_from_slice(bytes);
        with_id
    } else {
        bytes.to_vec()
    };
    state.ctx.push(report);
}

unsafe extern "C" fn on_removed(context: *mut c_void, _result: IOReturn, _sender: *mut c_void) {
    // SAFETY: see `on_input_report`.
    let state = unsafe { &*(context as *const ReaderState<'_, '_>) };
    state.removed.store(true, Ordering::Release);
}

impl PlatformStream for MacStream {
    fn run_reader(&self, ctx: &ReaderContext<'_>) -> Result<()> {
        let mut buf = vec![0u8; self.max_input_len.max(1)];
        let state = ReaderState {
            ctx,
            removed: AtomicBool::new(false),
        };
        let context = &state as *const ReaderState<'_, '_> as *mut c_void;

        // SAFETY: `buf` and `state` outlive the schedule; the callbacks are
        // unregistered before either is dropped.
        let run_loop = unsafe {
            let run_loop = CFRunLoopGetCurrent();
            IOHIDDeviceRegisterInputReportCallback(
                self.device,
                buf.as_mut_ptr(),
                buf.len() as CFIndex,
                Some(on_input_report),
                context,
            );
            IOHIDDeviceRegisterRemovalCallback(self.device, Some(on_removed), context);
            IOHIDDeviceScheduleWithRunLoop(self.device, run_loop, kCFRunLoopDefaultMode);
            run_loop
        };
        *self.run_loop.lock() = Some(RunLoop(run_loop));

        while !ctx.should_stop() && !state.removed.load(Ordering::Acquire) {
            // SAFETY: runs the current thread's loop.
            unsafe { CFRunLoopRunInMode(kCFRunLoopDefaultMode, RUN_SLICE_SECS, 0) };
        }

        self.run_loop.lock().take();
        // SAFETY: undoes the registration above on the same thread.
        unsafe {
            IOHIDDeviceUnscheduleFromRunLoop(self.device, run_loop, kCFRunLoopDefaultMode);
            IOHIDDeviceRegisterInputReportCallback(
                self.device,
                buf.as_mut_ptr(),
                buf.len() as CFIndex,
                None,
                std::ptr::null_mut(),
            );
            IOHIDDeviceRegisterRemovalCallback(self.device, None, std::ptr::null_mut());
        }

        if state.removed.load(Ordering::Acquire) && !ctx.should_stop() {
            return Err(HidError::io(format!("{} was removed", self.path)));
        }
        Ok(())
    }

    fn cancel_io(&self) {
        if let Some(run_loop) = self.run_loop.lock().as_ref() {
            // SAFETY: the loop is alive while the reader is inside it.
            unsafe { CFRunLoopStop(run_loop.0) };
        }
    }

    fn write_output(&self, report: &[u8]) -> Result<()> {
        self.set_report(kIOHIDReportTypeOutput, report)
    }

    fn set_feature(&self, report: &[u8]) -> Result<()> {
        self.set_report(kIOHIDReportTypeFeature, report)
    }

    fn get_feature(&self, buf: &mut [u8]) -> Result<usize> {
        let id = buf[0];
        let target = if id == 0 { &mut buf[1..] } else { &mut buf[..] };
        let mut len = target.len() as CFIndex;
        // SAFETY: `target` is valid for `len` bytes.
        let ret = unsafe {
            IOHIDDeviceGetReport(
                self.device,
                kIOHIDReportTypeFeature,
                id as CFIndex,
                target.as_mut_ptr(),
                &mut len,
            )
        };
        if ret != kIOReturnSuccess {
            return Err(io_error(&self.path, ret));
        }
        let len = len.max(0) as usize;
        Ok(if id == 0 { len + 1 } else { len })
    }

    fn free(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }
        // SAFETY: opened and created in `MacManager::open`; released once.
        unsafe {
            IOHIDDeviceClose(self.device, kIOHIDOptionsTypeNone);
            CFRelease(self.device as *const c_void);
        }
    }
}
