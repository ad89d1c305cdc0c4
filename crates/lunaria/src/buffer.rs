//! Buffer handles
//!
//! Buffer contents are only ever copied in or out; the bridge never lends a
//! slice into VM memory. Bounds come from the buffer length queried at the
//! time of each access.

use std::ptr;

use lunaria_sys::{self as ffi, lua_State};

use crate::error::{Error, Result};
use crate::registry::registry_handle;

registry_handle!(
    /// Handle to a fixed-size byte buffer on the VM heap.
    Buffer,
    "buffer"
);

/// Data pointer and length of the buffer on top of `l`.
unsafe fn raw_parts(l: *mut lua_State) -> (*mut u8, usize) {
    let mut len = 0usize;
    let data = ffi::lua_tobuffer(l, -1, &mut len) as *mut u8;
    (data, len)
}

fn check_range(offset: usize, count: usize, len: usize) -> Result<()> {
    match offset.checked_add(count) {
        Some(end) if end <= len => Ok(()),
        _ => Err(Error::InvalidArgument(format!(
            "range {}..{} is out of bounds for a buffer of {} bytes",
            offset,
            offset.saturating_add(count),
            len
        ))),
    }
}

impl Buffer {
    /// Size in bytes.
    pub fn len(&self) -> Result<usize> {
        self.pinned
            .with_value(Self::KIND, |l, _| unsafe { Ok(raw_parts(l).1) })
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Copy of the whole buffer.
    pub fn to_vec(&self) -> Result<Vec<u8>> {
        self.pinned.with_value(Self::KIND, |l, _| unsafe {
            let (data, len) = raw_parts(l);
            if len == 0 {
                return Ok(Vec::new());
            }
            Ok(std::slice::from_raw_parts(data, len).to_vec())
        })
    }

    /// Copy `dest.len()` bytes starting at `offset` into `dest`.
    pub fn read_at(&self, offset: usize, dest: &mut [u8]) -> Result<()> {
        self.pinned.with_value(Self::KIND, |l, _| unsafe {
            let (data, len) = raw_parts(l);
            check_range(offset, dest.len(), len)?;
            if !dest.is_empty() {
                ptr::copy_nonoverlapping(data.add(offset), dest.as_mut_ptr(), dest.len());
            }
            Ok(())
        })
    }

    /// Copy `bytes` into the buffer starting at `offset`.
    pub fn write_at(&self, offset: usize, bytes: &[u8]) -> Result<()> {
        self.pinned.with_value(Self::KIND, |l, _| unsafe {
            let (data, len) = raw_parts(l);
            check_range(offset, bytes.len(), len)?;
            if !bytes.is_empty() {
                ptr::copy_nonoverlapping(bytes.as_ptr(), data.add(offset), bytes.len());
            }
            Ok(())
        })
    }

    /// Set every byte to `value`.
    pub fn fill(&self, value: u8) -> Result<()> {
        self.pinned.with_value(Self::KIND, |l, _| unsafe {
            let (data, len) = raw_parts(l);
            if len > 0 {
                ptr::write_bytes(data, value, len);
            }
            Ok(())
        })
    }
}
