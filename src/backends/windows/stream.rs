use std::ptr::null_mut;

use parking_lot::Mutex;
use windows_sys::Win32::Devices::HumanInterfaceDevice::{HidD_GetFeature, HidD_SetFeature};
use windows_sys::Win32::Foundation::{GetLastError, ERROR_IO_PENDING, HANDLE, WAIT_OBJECT_0};
use windows_sys::Win32::Storage::FileSystem::{ReadFile, WriteFile};
use windows_sys::Win32::System::IO::{CancelIo, GetOverlappedResult, OVERLAPPED};
use windows_sys::Win32::System::Threading::{ResetEvent, SetEvent, WaitForMultipleObjects, INFINITE};

use super::handle::{last_error, manual_reset_event, OwnedHandle};
use crate::backends::PlatformStream;
use crate::error::{HidError, Result};
use crate::stream::ReaderContext;

struct Handles {
    device: OwnedHandle,
    read_event: OwnedHandle,
    write_event: OwnedHandle,
    close_event: OwnedHandle,
}

pub(super) struct WinStream {
    // Dropped (closed) on free.
    handles: Mutex<Option<Handles>>,
    device: HANDLE,
    read_event: HANDLE,
    write_event: HANDLE,
    close_event: HANDLE,
    path: String,
    max_input_len: usize,
    max_output_len: usize,
    max_feature_len: usize,
}

// SAFETY: the raw handles are owned by `handles` and stay valid until
// `free`, which runs after every other call has returned.
unsafe impl Send for WinStream {}
unsafe impl Sync for WinStream {}

impl WinStream {
    pub(super) fn new(
        device: OwnedHandle,
        path: String,
        max_input_len: usize,
        max_output_len: usize,
        max_feature_len: usize,
    ) -> Result<Self> {
        let handles = Handles {
            read_event: manual_reset_event()?,
            write_event: manual_reset_event()?,
            close_event: manual_reset_event()?,
            device,
        };
        Ok(Self {
            device: handles.device.raw(),
            read_event: handles.read_event.raw(),
            write_event: handles.write_event.raw(),
            close_event: handles.close_event.raw(),
            handles: Mutex::new(Some(handles)),
            path,
            max_input_len,
            max_output_len,
            max_feature_len,
        })
    }

    /// Waits for an issued overlapped operation. `None` when the stream
    /// closed first; the operation is then cancelled and drained.
    fn finish(&self, ov: &OVERLAPPED, event: HANDLE) -> Result<Option<u32>> {
        let waits = [event, self.close_event];
        let mut transferred = 0u32;
        // SAFETY: both handles are valid events.
        let which = unsafe { WaitForMultipleObjects(2, waits.as_ptr(), 0, INFINITE) };
        if which == WAIT_OBJECT_0 {
            // SAFETY: `ov` belongs to the completed operation.
            if unsafe { GetOverlappedResult(self.device, ov, &mut transferred, 0) } == 0 {
                return Err(last_error(&self.path));
            }
            return Ok(Some(transferred));
        }

        // CancelIo only affects I/O issued by this thread, which is the one
        // that started `ov`.
        // SAFETY: wait for the cancelled operation so `ov` and its buffer
        // outlive it.
        unsafe {
            CancelIo(self.device);
            GetOverlappedResult(self.device, ov, &mut transferred, 1);
        }
        Ok(None)
    }

    fn start(&self, event: HANDLE, issue: impl FnOnce(*mut OVERLAPPED) -> i32) -> Result<Option<u32>> {
        // SAFETY: OVERLAPPED is plain data.
        let mut ov: OVERLAPPED = unsafe { std::mem::zeroed() };
        ov.hEvent = event;
        // SAFETY: `event` is a valid manual-reset event.
        unsafe { ResetEvent(event) };
        if issue(&mut ov) == 0 {
            // SAFETY: no preconditions.
            let code = unsafe { GetLastError() };
            if code != ERROR_IO_PENDING {
                return Err(HidError::from_os(
                    &self.path,
                    std::io::Error::from_raw_os_error(code as i32),
                ));
            }
        }
        self.finish(&ov, event)
    }

    fn padded(report: &[u8], len: usize) -> Vec<u8> {
        let mut buf = vec![0u8; len.max(report.len())];
        buf[..report.len()].copy_from_slice(report);
        buf
    }
}

impl PlatformStream for WinStream {
    fn run_reader(&self, ctx: &ReaderContext<'_>) -> Result<()> {
        let mut buf = vec![0u8; self.max_input_len.max(1)];
        while !ctx.should_stop() {
            let ptr = buf.as_mut_ptr();
            let len = buf.len() as u32;
            // SAFETY: `buf` outlives the operation; `finish` drains it.
            let done = self.start(self.read_event, |ov| unsafe {
                ReadFile(self.device, ptr, len, null_mut(), ov)
            })?;
            match done {
                Some(0) => continue,
                Some(n) => ctx.push(buf[..n as usize].to_vec()),
                None => break,
            }
        }
        Ok(())
    }

    fn cancel_io(&self) {
        // SAFETY: valid event until free.
        unsafe { SetEvent(self.close_event) };
    }

    fn write_output(&self, report: &[u8]) -> Result<()> {
        // Windows only accepts writes of exactly the output report length.
        let buf = Self::padded(report, self.max_output_len);
        let mut offset = 0usize;
        while offset < buf.len() {
            let rest = &buf[offset..];
            // SAFETY: `buf` outlives the operation; `finish` drains it.
            let done = self.start(self.write_event, |ov| unsafe {
                WriteFile(self.device, rest.as_ptr(), rest.len() as u32, null_mut(), ov)
            })?;
            match done {
                Some(0) => return Err(HidError::io(format!("{} accepted no bytes", self.path))),
                Some(n) => offset += n as usize,
                None => return Err(HidError::Closed),
            }
        }
        Ok(())
    }

    fn set_feature(&self, report: &[u8]) -> Result<()> {
        let buf = Self::padded(report, self.max_feature_len);
        // SAFETY: `buf` is valid for its length.
        let ok = unsafe { HidD_SetFeature(self.device, buf.as_ptr().cast(), buf.len() as u32) };
        if ok == 0 {
            return Err(last_error(&self.path));
        }
        Ok(())
    }

    fn get_feature(&self, buf: &mut [u8]) -> Result<usize> {
        // SAFETY: `buf` is valid for its length.
        let ok = unsafe { HidD_GetFeature(self.device, buf.as_mut_ptr().cast(), buf.len() as u32) };
        if ok == 0 {
            return Err(last_error(&self.path));
        }
        Ok(buf.len())
    }

    fn free(&self) {
        drop(self.handles.lock().take());
    }
}
