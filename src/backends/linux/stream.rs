use std::fs::File;
use std::io;
use std::os::fd::{AsRawFd, RawFd};

use parking_lot::Mutex;

use super::ioctl;
use crate::backends::PlatformStream;
use crate::error::{HidError, Result};
use crate::stream::ReaderContext;

/// `poll` slice; bounds how long close waits for the reader.
const POLL_SLICE_MS: libc::c_int = 250;

pub(super) struct HidrawStream {
    // Owns the descriptor; taken on free. I/O goes through `fd`, which stays
    // valid until then.
    file: Mutex<Option<File>>,
    fd: RawFd,
    devnode: String,
    reports_use_id: bool,
    max_input_len: usize,
}

impl HidrawStream {
    pub(super) fn new(file: File, devnode: String, reports_use_id: bool, max_input_len: usize) -> Self {
        let fd = file.as_raw_fd();
        Self {
            file: Mutex::new(Some(file)),
            fd,
            devnode,
            reports_use_id,
            max_input_len,
        }
    }

    fn os_error(&self, err: io::Error) -> HidError {
        HidError::from_os(&self.devnode, err)
    }
}

/// Input report as the stream sees it: hidraw omits the Report ID for
/// devices without IDs, so a `0` is prepended.
fn with_report_id(reports_use_id: bool, raw: &[u8]) -> Vec<u8> {
    if reports_use_id {
        return raw.to_vec();
    }
    let mut report = Vec::with_capacity(raw.len() + 1);
    report.push(0);
    report.extend_from_slice(raw);
    report
}

/// Output bytes for hidraw: the synthetic leading `0` is dropped for devices
/// without IDs.
fn without_report_id(reports_use_id: bool, report: &[u8]) -> &[u8] {
    if reports_use_id {
        report
    } else {
        report.get(1..).unwrap_or(&[])
    }
}

fn retry<T: PartialOrd + Default>(mut call: impl FnMut() -> T) -> (T, Option<io::Error>) {
    loop {
        let rc = call();
        if rc >= T::default() {
            return (rc, None);
        }
        let err = io::Error::last_os_error();
        if err.kind() != io::ErrorKind::Interrupted {
            return (rc, Some(err));
        }
    }
}

impl PlatformStream for HidrawStream {
    fn run_reader(&self, ctx: &ReaderContext<'_>) -> Result<()> {
        // hidraw omits the Report ID for devices that do not use one.
        let read_len = if self.reports_use_id {
            self.max_input_len
        } else {
            self.max_input_len.saturating_sub(1)
        }
        .max(1);
        let mut buf = vec![0u8; read_len];

        while !ctx.should_stop() {
            let mut pfd = libc::pollfd {
                fd: self.fd,
                events: libc::POLLIN,
                revents: 0,
            };
            // SAFETY: one valid pollfd.
            let (ready, err) = retry(|| unsafe { libc::poll(&mut pfd, 1, POLL_SLICE_MS) });
            if let Some(err) = err {
                return Err(self.os_error(err));
            }
            if ready == 0 {
                continue;
            }
            if pfd.revents & (libc::POLLERR | libc::POLLHUP | libc::POLLNVAL) != 0 {
                return Err(HidError::io(format!("{} disconnected", self.devnode)));
            }
            if pfd.revents & libc::POLLIN == 0 {
                continue;
            }

            // SAFETY: `buf` is valid for `buf.len()` bytes.
            let (n, err) = retry(|| unsafe { libc::read(self.fd, buf.as_mut_ptr().cast(), buf.len()) });
            if let Some(err) = err {
                if err.kind() == io::ErrorKind::WouldBlock {
                    continue;
                }
                return Err(self.os_error(err));
            }
            let n = n as usize;
            ctx.push(with_report_id(self.reports_use_id, &buf[..n]));
        }
        Ok(())
    }

    fn write_output(&self, report: &[u8]) -> Result<()> {
        let payload = without_report_id(self.reports_use_id, report);
        if payload.is_empty() {
            return Ok(());
        }
        // SAFETY: `payload` is valid for `payload.len()` bytes.
        let (n, err) = retry(|| unsafe { libc::write(self.fd, payload.as_ptr().cast(), payload.len()) });
        if let Some(err) = err {
            return Err(self.os_error(err));
        }
        if n as usize != payload.len() {
            return Err(HidError::io(format!(
                "short write to {} ({n} of {} bytes)",
                self.devnode,
                payload.len()
            )));
        }
        Ok(())
    }

    fn set_feature(&self, report: &[u8]) -> Result<()> {
        ioctl::set_feature(self.fd, report).map_err(|e| self.os_error(e))?;
        Ok(())
    }

    fn get_feature(&self, buf: &mut [u8]) -> Result<usize> {
        ioctl::get_feature(self.fd, buf).map_err(|e| self.os_error(e))
    }

    fn free(&self) {
        drop(self.file.lock().take());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn input_gets_a_zero_id_without_report_ids() {
        assert_eq!(with_report_id(false, &[0xAA, 0xBB]), vec![0, 0xAA, 0xBB]);
        assert_eq!(with_report_id(false, &[]), vec![0]);
    }

    #[test]
    fn input_is_untouched_with_report_ids() {
        assert_eq!(with_report_id(true, &[2, 0xAA]), vec![2, 0xAA]);
    }

    #[test]
    fn output_drops_the_zero_id_without_report_ids() {
        assert_eq!(without_report_id(false, &[0, 0xAA, 0xBB]), &[0xAA, 0xBB]);
        assert!(without_report_id(false, &[0]).is_empty());
        assert!(without_report_id(false, &[]).is_empty());
    }

    #[test]
    fn output_keeps_the_id_with_report_ids() {
        assert_eq!(without_report_id(true, &[3, 0xAA]), &[3, 0xAA]);
    }
}
