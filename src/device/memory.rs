//! Device memory allocator and address resolution.
//!
//! Every description in a computation is allocated before any kernel binds.
//! Root descriptions get their own zeroed buffer sized for their layout;
//! views share the buffer of their base, so bases must be allocated first.
//! Scratch buffers back kernel-private temporaries and are not addressable
//! by description.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use crate::device::{DeviceBuffer, DeviceTensor};
use crate::error::{FlexForgeError, ForgeResult};
use crate::tensor::{DType, TensorDescription, TensorId};

/// Maps a symbolic description to device memory.
///
/// Only valid after the owning allocator has processed the description.
pub trait AddressResolver {
    fn resolve(&self, td: &TensorDescription) -> ForgeResult<DeviceTensor>;
}

/// Allocation statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryStats {
    pub buffers: usize,
    pub bytes: usize,
    pub views: usize,
    pub scratch_buffers: usize,
    pub scratch_bytes: usize,
}

impl MemoryStats {
    pub fn total_bytes(&self) -> usize {
        self.bytes + self.scratch_bytes
    }
}

impl fmt::Display for MemoryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} buffers ({} bytes), {} views, {} scratch ({} bytes)",
            self.buffers, self.bytes, self.views, self.scratch_buffers, self.scratch_bytes
        )
    }
}

#[derive(Debug, Default)]
struct Allocations {
    buffers: HashMap<TensorId, DeviceBuffer>,
    stats: MemoryStats,
}

/// Device memory for one endpoint.
#[derive(Debug)]
pub struct DeviceMemory {
    allocations: Mutex<Allocations>,
    next_buffer: AtomicUsize,
    limit: Option<usize>,
}

impl Default for DeviceMemory {
    fn default() -> Self {
        Self::new(None)
    }
}

impl DeviceMemory {
    /// Create an allocator, optionally capped at `limit` bytes.
    pub fn new(limit: Option<usize>) -> Self {
        Self {
            allocations: Mutex::new(Allocations::default()),
            next_buffer: AtomicUsize::new(0),
            limit,
        }
    }

    /// Allocate storage for `td`. Re-allocating an id is a no-op.
    pub fn allocate(&self, td: &TensorDescription) -> ForgeResult<()> {
        td.validate()?;
        let mut allocs = self.allocations.lock()?;
        if allocs.buffers.contains_key(&td.id) {
            return Ok(());
        }

        match td.base {
            Some(base) => {
                let buffer = allocs
                    .buffers
                    .get(&base)
                    .cloned()
                    .ok_or(FlexForgeError::TensorNotAllocated(base))?;
                let needed = td.storage_len() * td.dtype.size();
                if needed > buffer.len() {
                    return Err(FlexForgeError::AllocationFailed(format!(
                        "view {} needs {} bytes of base {} which holds {}",
                        td.id,
                        needed,
                        base,
                        buffer.len()
                    )));
                }
                allocs.buffers.insert(td.id, buffer);
                allocs.stats.views += 1;
            }
            None => {
                let bytes = td.storage_len() * td.dtype.size();
                self.check_limit(&allocs.stats, bytes)?;
                let buffer = self.new_buffer(bytes);
                tracing::debug!(tensor = %td.id, bytes, buffer = buffer.id(), "allocated");
                allocs.buffers.insert(td.id, buffer);
                allocs.stats.buffers += 1;
                allocs.stats.bytes += bytes;
            }
        }
        Ok(())
    }

    /// Allocate every description, roots before views.
    pub fn allocate_all<'a, I>(&self, descs: I) -> ForgeResult<()>
    where
        I: IntoIterator<Item = &'a TensorDescription>,
    {
        let (roots, views): (Vec<_>, Vec<_>) = descs.into_iter().partition(|td| !td.is_view());
        for td in roots.into_iter().chain(views) {
            self.allocate(td)?;
        }
        Ok(())
    }

    /// Private contiguous buffer for a kernel temporary.
    pub fn allocate_scratch(&self, dtype: DType, shape: &[usize]) -> ForgeResult<DeviceTensor> {
        let td = TensorDescription::new(TensorId(usize::MAX), dtype, shape.to_vec());
        let bytes = td.storage_len() * dtype.size();
        let mut allocs = self.allocations.lock()?;
        self.check_limit(&allocs.stats, bytes)?;
        allocs.stats.scratch_buffers += 1;
        allocs.stats.scratch_bytes += bytes;
        drop(allocs);
        DeviceTensor::new(self.new_buffer(bytes), &td)
    }

    pub fn is_allocated(&self, id: TensorId) -> bool {
        self.allocations
            .lock()
            .map(|a| a.buffers.contains_key(&id))
            .unwrap_or(false)
    }

    pub fn stats(&self) -> ForgeResult<MemoryStats> {
        Ok(self.allocations.lock()?.stats)
    }

    fn new_buffer(&self, bytes: usize) -> DeviceBuffer {
        DeviceBuffer::zeroed(self.next_buffer.fetch_add(1, Ordering::Relaxed), bytes)
    }

    fn check_limit(&self, stats: &MemoryStats, bytes: usize) -> ForgeResult<()> {
        match self.limit {
            Some(limit) if stats.total_bytes() + bytes > limit => {
                Err(FlexForgeError::AllocationFailed(format!(
                    "{} bytes requested, {} of {} in use",
                    bytes,
                    stats.total_bytes(),
                    limit
                )))
            }
            _ => Ok(()),
        }
    }
}

impl AddressResolver for DeviceMemory {
    fn resolve(&self, td: &TensorDescription) -> ForgeResult<DeviceTensor> {
        let buffer = self
            .allocations
            .lock()?
            .buffers
            .get(&td.id)
            .cloned()
            .ok_or(FlexForgeError::TensorNotAllocated(td.id))?;
        DeviceTensor::new(buffer, td)
    }
}
