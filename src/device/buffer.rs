//! Device buffers and resolved addresses

use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::error::ForgeResult;
use crate::tensor::DType;

/// A block of device memory.
///
/// Clones share the same storage; the allocator owns the canonical handle and
/// kernels keep non-owning clones obtained at bind time.
#[derive(Clone)]
pub struct DeviceBuffer {
    id: usize,
    bytes: Arc<RwLock<Vec<u8>>>,
    len: usize,
}

impl DeviceBuffer {
    pub(crate) fn zeroed(id: usize, len: usize) -> Self {
        Self {
            id,
            bytes: Arc::new(RwLock::new(vec![0u8; len])),
            len,
        }
    }

    pub fn id(&self) -> usize {
        self.id
    }

    /// Size in bytes.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn same_storage(&self, other: &DeviceBuffer) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes)
    }

    pub(crate) fn read(&self) -> ForgeResult<RwLockReadGuard<'_, Vec<u8>>> {
        Ok(self.bytes.read()?)
    }

    pub(crate) fn write(&self) -> ForgeResult<RwLockWriteGuard<'_, Vec<u8>>> {
        Ok(self.bytes.write()?)
    }
}

impl fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("id", &self.id)
            .field("len", &self.len)
            .finish()
    }
}

/// Physical address of a tensor's first element: buffer plus element offset.
#[derive(Debug, Clone)]
pub struct DeviceAddress {
    pub buffer: DeviceBuffer,
    pub offset: usize,
    pub dtype: DType,
}

impl DeviceAddress {
    pub fn byte_offset(&self) -> usize {
        self.offset * self.dtype.size()
    }
}

impl fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "buf{}+{:#x}", self.buffer.id, self.byte_offset())
    }
}
