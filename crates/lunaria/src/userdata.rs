//! Userdata handles

use std::mem;

use lunaria_sys as ffi;

use crate::error::{Error, Result};
use crate::registry::registry_handle;

registry_handle!(
    /// Handle to a full userdata block on the VM heap.
    UserData,
    "userdata"
);

impl UserData {
    /// Size of the block in bytes.
    pub fn size(&self) -> Result<usize> {
        self.pinned
            .with_value(Self::KIND, |l, _| unsafe { Ok(ffi::lua_objlen(l, -1).max(0) as usize) })
    }

    /// Copy the block out as a `T`, or `None` when the sizes differ.
    ///
    /// # Safety
    /// The block must hold a valid `T`, as it does when it was created with
    /// [`State::create_userdata::<T>`](crate::State::create_userdata).
    pub unsafe fn try_read<T: Copy>(&self) -> Result<Option<T>> {
        self.pinned.with_value(Self::KIND, |l, _| {
            let size = ffi::lua_objlen(l, -1).max(0) as usize;
            if size != mem::size_of::<T>() {
                return Ok(None);
            }
            let data = ffi::lua_touserdata(l, -1) as *const T;
            if data.is_null() {
                return Ok(None);
            }
            Ok(Some(data.read_unaligned()))
        })
    }

    /// Copy the block out as a `T`.
    ///
    /// # Safety
    /// Same contract as [`try_read`](Self::try_read).
    pub unsafe fn read<T: Copy>(&self) -> Result<T> {
        self.try_read()?.ok_or_else(|| {
            Error::InvalidArgument(format!(
                "userdata cannot be read as {}",
                std::any::type_name::<T>()
            ))
        })
    }
}
