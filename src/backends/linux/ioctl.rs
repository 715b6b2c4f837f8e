//! hidraw ioctl requests.

use std::io;
use std::os::fd::RawFd;

pub(super) const HID_MAX_DESCRIPTOR_SIZE: usize = 4096;
const HIDRAW_IOCTL_TYPE: u8 = b'H';
const HIDIOC_NR_GRDESC_SIZE: u8 = 0x01;
const HIDIOC_NR_GRDESC: u8 = 0x02;
const HIDIOC_NR_SET_FEATURE: u8 = 0x06;
const HIDIOC_NR_GET_FEATURE: u8 = 0x07;

const IOC_NRBITS: u32 = 8;
const IOC_TYPEBITS: u32 = 8;
const IOC_SIZEBITS: u32 = 14;
const IOC_NRSHIFT: u32 = 0;
const IOC_TYPESHIFT: u32 = IOC_NRSHIFT + IOC_NRBITS;
const IOC_SIZESHIFT: u32 = IOC_TYPESHIFT + IOC_TYPEBITS;
const IOC_DIRSHIFT: u32 = IOC_SIZESHIFT + IOC_SIZEBITS;
const IOC_READ: u32 = 2;
const IOC_READ_WRITE: u32 = 3;

#[repr(C)]
struct RawReportDescriptor {
    size: u32,
    value: [u8; HID_MAX_DESCRIPTOR_SIZE],
}

const fn ioctl_code(direction: u32, kind: u8, nr: u8, size: usize) -> libc::c_ulong {
    ((direction << IOC_DIRSHIFT)
        | ((kind as u32) << IOC_TYPESHIFT)
        | ((nr as u32) << IOC_NRSHIFT)
        | ((size as u32) << IOC_SIZESHIFT)) as libc::c_ulong
}

const HIDIOCGRDESCSIZE: libc::c_ulong = ioctl_code(
    IOC_READ,
    HIDRAW_IOCTL_TYPE,
    HIDIOC_NR_GRDESC_SIZE,
    std::mem::size_of::<libc::c_int>(),
);
const HIDIOCGRDESC: libc::c_ulong = ioctl_code(
    IOC_READ,
    HIDRAW_IOCTL_TYPE,
    HIDIOC_NR_GRDESC,
    std::mem::size_of::<RawReportDescriptor>(),
);

fn hidiocsfeature(len: usize) -> libc::c_ulong {
    ioctl_code(IOC_READ_WRITE, HIDRAW_IOCTL_TYPE, HIDIOC_NR_SET_FEATURE, len)
}

fn hidiocgfeature(len: usize) -> libc::c_ulong {
    ioctl_code(IOC_READ_WRITE, HIDRAW_IOCTL_TYPE, HIDIOC_NR_GET_FEATURE, len)
}

fn check(rc: libc::c_int) -> io::Result<usize> {
    if rc < 0 {
        Err(io::Error::last_os_error())
    } else {
        Ok(rc as usize)
    }
}

/// Reads the raw report descriptor of an open hidraw node.
pub(super) fn report_descriptor(fd: RawFd) -> io::Result<Vec<u8>> {
    let mut size: libc::c_int = 0;
    // SAFETY: HIDIOCGRDESCSIZE writes one c_int.
    check(unsafe { libc::ioctl(fd, HIDIOCGRDESCSIZE as _, &mut size) })?;
    let size = usize::try_from(size).unwrap_or(0);
    if size > HID_MAX_DESCRIPTOR_SIZE {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("report descriptor too large ({size} bytes)"),
        ));
    }

    let mut desc = Box::new(RawReportDescriptor {
        size: size as u32,
        value: [0u8; HID_MAX_DESCRIPTOR_SIZE],
    });
    // SAFETY: the kernel fills at most `size` bytes of `value`.
    check(unsafe { libc::ioctl(fd, HIDIOCGRDESC as _, &mut *desc as *mut RawReportDescriptor) })?;
    let used = (desc.size as usize).min(size);
    Ok(desc.value[..used].to_vec())
}

/// `report[0]` is the Report ID (0 for devices without IDs).
pub(super) fn set_feature(fd: RawFd, report: &[u8]) -> io::Result<usize> {
    let mut buf = report.to_vec();
    // SAFETY: the request size matches `buf`, which outlives the call.
    check(unsafe { libc::ioctl(fd, hidiocsfeature(buf.len()) as _, buf.as_mut_ptr()) })
}

/// `buf[0]` must hold the Report ID; the reply overwrites `buf`.
pub(super) fn get_feature(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    // SAFETY: the request size matches `buf`.
    check(unsafe { libc::ioctl(fd, hidiocgfeature(buf.len()) as _, buf.as_mut_ptr()) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_codes_match_kernel_headers() {
        assert_eq!(HIDIOCGRDESCSIZE, 0x8004_4801);
        assert_eq!(HIDIOCGRDESC, 0x9004_4802);
        assert_eq!(hidiocsfeature(9), 0xC009_4806);
        assert_eq!(hidiocgfeature(9), 0xC009_4807);
    }
}
