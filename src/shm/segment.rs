// SPDX-License-Identifier: MIT OR Apache-2.0

//! POSIX shared memory segments.

/* ---------------------------------------------------------------------------------------------- */

use std::ffi::CString;
use std::io;

use log::debug;

use crate::error::{Error, Result};

/* ---------------------------------------------------------------------------------------------- */

/// A named, mapped POSIX shared memory segment.
///
/// The creating side owns the name and unlinks it on drop; attaching sides only unmap.
#[derive(Debug)]
pub struct ShmSegment {
    name: CString,
    ptr: *mut u8,
    len: usize,
    owner: bool,
}

// The mapping is plain memory; all concurrent access goes through the exchange protocol's
// process-shared mutex.
unsafe impl Send for ShmSegment {}
unsafe impl Sync for ShmSegment {}

impl ShmSegment {
    /// Create and map a fresh segment of `len` bytes. Fails if a segment of that name already
    /// exists. The new memory is zero-filled.
    pub fn create(name: &str, len: usize) -> Result<ShmSegment> {
        if len == 0 {
            return Err(Error::Configuration("empty shared memory segment".to_owned()));
        }
        let cname = shm_name(name)?;

        let fd = unsafe {
            libc::shm_open(
                cname.as_ptr(),
                libc::O_CREAT | libc::O_EXCL | libc::O_RDWR,
                0o600,
            )
        };
        if fd < 0 {
            return Err(io::Error::last_os_error().into());
        }

        if unsafe { libc::ftruncate(fd, len as libc::off_t) } != 0 {
            let e = io::Error::last_os_error();
            unsafe {
                libc::close(fd);
                libc::shm_unlink(cname.as_ptr());
            }
            return Err(e.into());
        }

        let ptr = map(fd, len);
        unsafe { libc::close(fd) };
        let ptr = match ptr {
            Ok(ptr) => ptr,
            Err(e) => {
                unsafe { libc::shm_unlink(cname.as_ptr()) };
                return Err(e);
            }
        };

        debug!("created shared memory segment {}, {} bytes", name, len);
        Ok(ShmSegment {
            name: cname,
            ptr,
            len,
            owner: true,
        })
    }

    /// Map an existing segment at its current size.
    pub fn open(name: &str) -> Result<ShmSegment> {
        let cname = shm_name(name)?;

        let fd = unsafe { libc::shm_open(cname.as_ptr(), libc::O_RDWR, 0) };
        if fd < 0 {
            return Err(io::Error::last_os_error().into());
        }

        let mut stat = unsafe { std::mem::zeroed::<libc::stat>() };
        if unsafe { libc::fstat(fd, &mut stat) } != 0 {
            let e = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(e.into());
        }
        let len = stat.st_size as usize;

        let ptr = map(fd, len);
        unsafe { libc::close(fd) };
        let ptr = ptr?;

        debug!("attached shared memory segment {}, {} bytes", name, len);
        Ok(ShmSegment {
            name: cname,
            ptr,
            len,
            owner: false,
        })
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// A pointer `offset` bytes into the segment, bounds-checked against the mapping.
    pub fn at_offset(&self, offset: usize) -> Result<*mut u8> {
        if offset >= self.len {
            return Err(Error::Protocol(format!(
                "offset {:#x} outside shared memory segment of {:#x} bytes",
                offset, self.len
            )));
        }
        Ok(unsafe { self.ptr.add(offset) })
    }
}

impl Drop for ShmSegment {
    fn drop(&mut self) {
        unsafe {
            libc::munmap(self.ptr as *mut libc::c_void, self.len);
            if self.owner {
                libc::shm_unlink(self.name.as_ptr());
            }
        }
    }
}

/* ---------------------------------------------------------------------------------------------- */

fn shm_name(name: &str) -> Result<CString> {
    if name.is_empty() || name.contains('/') {
        return Err(Error::Configuration(format!(
            "invalid shared memory name {:?}",
            name
        )));
    }
    CString::new(format!("/{}", name))
        .map_err(|_| Error::Configuration(format!("invalid shared memory name {:?}", name)))
}

fn map(fd: libc::c_int, len: usize) -> Result<*mut u8> {
    let ptr = unsafe {
        libc::mmap(
            std::ptr::null_mut(),
            len,
            libc::PROT_READ | libc::PROT_WRITE,
            libc::MAP_SHARED,
            fd,
            0,
        )
    };
    if ptr == libc::MAP_FAILED {
        return Err(io::Error::last_os_error().into());
    }
    Ok(ptr as *mut u8)
}

/* ---------------------------------------------------------------------------------------------- */


/* ---------------------------------------------------------------------------------------------- */
