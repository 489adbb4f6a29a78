//! Device memory seam for GPU builds.
//!
//! The crate ships no GPU runtime; an embedder provides the allocator. All
//! device allocations made for one build are released when the allocator is
//! dropped.

use strata_result::Result;

/// Opaque handle to one device allocation.
#[derive(Debug)]
pub struct DeviceBuffer {
    pub device_id: usize,
    pub len: usize,
    /// Runtime-specific handle (device pointer) owned by the allocator.
    pub handle: u64,
}

/// Per-device allocator constructed before fetching columns; its lifetime
/// bounds every allocation of the build.
pub trait DeviceAllocator: Send + Sync {
    fn device_id(&self) -> usize;

    fn alloc(&self, num_bytes: usize) -> Result<DeviceBuffer>;

    fn zero_device_mem(&self, buffer: &mut DeviceBuffer) -> Result<()>;

    fn copy_to_device(&self, buffer: &mut DeviceBuffer, src: &[u8]) -> Result<()>;

    fn copy_from_device(&self, dst: &mut [u8], buffer: &DeviceBuffer) -> Result<()>;
}

/// Allocate device memory of the exact CPU layout and copy the CPU buffer
/// byte-for-byte, for builds forced onto the CPU by dictionary translation.
pub fn copy_hash_table_to_device(
    table: &mut crate::table::CompositeHashTable,
    allocator: &dyn DeviceAllocator,
) -> Result<()> {
    let mut buffer = allocator.alloc(table.buffer_size())?;
    allocator.copy_to_device(&mut buffer, table.cpu_buffer())?;
    table.set_gpu_buffer(buffer);
    Ok(())
}
