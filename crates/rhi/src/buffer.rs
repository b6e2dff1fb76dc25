//! Host-visible buffers split into per-frame instances.
//!
//! A [`Buffer`] holds `instance_count` copies of an `instance_size` block,
//! each starting on a multiple of the minimum offset alignment so that slot
//! `i` can be bound by offset. The usual pattern is one slot per frame in
//! flight, written only while that frame's fence has signaled.
//!
//! # Overview
//!
//! - [`BufferLayout`] is the pure size and offset arithmetic
//! - [`Buffer`] wraps a `VkBuffer` in persistently mapped gpu-allocator memory
//! - [`BufferMapping`] is the scoped host view handed out by [`Buffer::map`]
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vge_rhi::buffer::{Buffer, BufferUsage};
//! use vge_rhi::device::Device;
//!
//! # fn example(device: Arc<Device>, frame_index: usize) -> vge_rhi::RhiResult<()> {
//! let alignment = device.limits().min_uniform_buffer_offset_alignment;
//! let mut ubo = Buffer::new(device, BufferUsage::Uniform, 64, 2, alignment)?;
//! ubo.map()?.write_to_index(&[1.0f32; 16], frame_index);
//! ubo.flush_index(frame_index)?;
//! # Ok(())
//! # }
//! ```

use std::sync::{Arc, PoisonError};

use ash::vk;
use gpu_allocator::MemoryLocation;
use gpu_allocator::vulkan::{Allocation, AllocationCreateDesc, AllocationScheme};
use tracing::{debug, error};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};

/// Buffer usage type.
///
/// Decides the Vulkan usage flags the buffer is created with.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum BufferUsage {
    /// Uniform buffer - per-frame shader constants
    Uniform,
    /// Storage buffer - general-purpose shader storage
    Storage,
    /// Upload source for transfer commands
    Staging,
}

impl BufferUsage {
    /// Converts to Vulkan buffer usage flags.
    pub fn to_vk_usage(self) -> vk::BufferUsageFlags {
        match self {
            BufferUsage::Uniform => {
                vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Storage => {
                vk::BufferUsageFlags::STORAGE_BUFFER | vk::BufferUsageFlags::TRANSFER_DST
            }
            BufferUsage::Staging => vk::BufferUsageFlags::TRANSFER_SRC,
        }
    }

    /// Every usage is written from the CPU each frame, so all live in mappable memory.
    pub fn memory_location(self) -> MemoryLocation {
        MemoryLocation::CpuToGpu
    }

    /// Returns a human-readable name for logs and allocation labels.
    pub fn name(self) -> &'static str {
        match self {
            BufferUsage::Uniform => "uniform",
            BufferUsage::Storage => "storage",
            BufferUsage::Staging => "staging",
        }
    }
}

/// Byte layout of a buffer made of equally sized, aligned instances.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferLayout {
    /// Bytes the caller asked for per instance.
    instance_size: vk::DeviceSize,
    /// Number of instances.
    instance_count: u32,
    /// Instance size rounded up to the offset alignment.
    alignment_size: vk::DeviceSize,
}

impl BufferLayout {
    /// Computes the layout of `instance_count` aligned instances.
    ///
    /// # Arguments
    ///
    /// * `instance_size` - Bytes per instance
    /// * `instance_count` - Number of instances, typically frames in flight
    /// * `min_offset_alignment` - Required start alignment of each instance;
    ///   0 or 1 packs instances tightly
    ///
    /// # Panics
    ///
    /// If `instance_size` or `instance_count` is zero.
    pub fn new(
        instance_size: vk::DeviceSize,
        instance_count: u32,
        min_offset_alignment: vk::DeviceSize,
    ) -> Self {
        assert!(instance_size > 0, "instance size must be non-zero");
        assert!(instance_count > 0, "instance count must be non-zero");
        Self {
            instance_size,
            instance_count,
            alignment_size: aligned_stride(instance_size, min_offset_alignment),
        }
    }

    #[inline]
    pub fn instance_size(&self) -> vk::DeviceSize {
        self.instance_size
    }

    #[inline]
    pub fn instance_count(&self) -> u32 {
        self.instance_count
    }

    /// Distance in bytes between consecutive instances.
    #[inline]
    pub fn alignment_size(&self) -> vk::DeviceSize {
        self.alignment_size
    }

    /// Total bytes covering every instance including padding.
    #[inline]
    pub fn buffer_size(&self) -> vk::DeviceSize {
        self.alignment_size * self.instance_count as vk::DeviceSize
    }

    /// Byte offset of instance `index`.
    ///
    /// # Panics
    ///
    /// If `index` is not below the instance count.
    pub fn offset_of(&self, index: usize) -> vk::DeviceSize {
        assert!(
            index < self.instance_count as usize,
            "instance index {index} out of range (count: {})",
            self.instance_count
        );
        index as vk::DeviceSize * self.alignment_size
    }
}

/// `ceil(instance_size / min_offset_alignment) * min_offset_alignment`.
pub fn aligned_stride(
    instance_size: vk::DeviceSize,
    min_offset_alignment: vk::DeviceSize,
) -> vk::DeviceSize {
    if min_offset_alignment <= 1 {
        return instance_size;
    }
    instance_size.div_ceil(min_offset_alignment) * min_offset_alignment
}

/// Widens `[offset, offset + size)` to `atom` boundaries as non-coherent flushes require.
///
/// # Arguments
///
/// * `offset` - Start of the range within the `VkDeviceMemory`
/// * `size` - Length of the range in bytes
/// * `atom` - `nonCoherentAtomSize` of the device
/// * `memory_size` - Size of the whole `VkDeviceMemory`, when the range may
///   sit at its end
///
/// # Returns
///
/// The widened `(offset, size)`. When rounding up would run past
/// `memory_size`, the size becomes `vk::WHOLE_SIZE` so the range ends
/// exactly at the end of the memory.
pub fn atom_aligned_range(
    offset: vk::DeviceSize,
    size: vk::DeviceSize,
    atom: vk::DeviceSize,
    memory_size: Option<vk::DeviceSize>,
) -> (vk::DeviceSize, vk::DeviceSize) {
    if atom <= 1 {
        return (offset, size);
    }
    let start = offset - offset % atom;
    let end = (offset + size).div_ceil(atom) * atom;
    match memory_size {
        Some(memory_size) if end > memory_size => (start, vk::WHOLE_SIZE),
        _ => (start, end - start),
    }
}

/// GPU buffer made of per-frame instances in host-visible memory.
///
/// Memory comes from gpu-allocator as `CpuToGpu` and stays mapped for the
/// buffer's whole life. On non-coherent memory, writes must be followed by
/// [`flush_index`](Self::flush_index) before the GPU reads them.
///
/// # Thread Safety
///
/// Not synchronized. Each instance must only be written by the frame that
/// owns it, after that frame's fence has signaled.
pub struct Buffer {
    /// Reference to the logical device.
    device: Arc<Device>,
    /// Vulkan buffer handle.
    buffer: vk::Buffer,
    /// GPU memory allocation, taken on drop.
    allocation: Option<Allocation>,
    /// Instance sizes and offsets.
    layout: BufferLayout,
    /// Buffer usage type.
    usage: BufferUsage,
}

impl Buffer {
    /// Creates a buffer of `instance_count` aligned instances.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `usage` - The intended buffer usage
    /// * `instance_size` - Bytes per instance
    /// * `instance_count` - Number of instances
    /// * `min_offset_alignment` - Start alignment of every instance, e.g.
    ///   `minUniformBufferOffsetAlignment` for uniform buffers
    ///
    /// # Errors
    ///
    /// Returns an error if buffer creation, memory allocation or binding fails.
    pub fn new(
        device: Arc<Device>,
        usage: BufferUsage,
        instance_size: vk::DeviceSize,
        instance_count: u32,
        min_offset_alignment: vk::DeviceSize,
    ) -> RhiResult<Self> {
        let layout = BufferLayout::new(instance_size, instance_count, min_offset_alignment);

        let buffer_info = vk::BufferCreateInfo::default()
            .size(layout.buffer_size())
            .usage(usage.to_vk_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let raw = device.handle();
        let buffer = unsafe { raw.create_buffer(&buffer_info, None)? };
        let requirements = unsafe { raw.get_buffer_memory_requirements(buffer) };

        let allocation = device
            .allocator()
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .allocate(&AllocationCreateDesc {
                name: usage.name(),
                requirements,
                location: usage.memory_location(),
                linear: true,
                allocation_scheme: AllocationScheme::GpuAllocatorManaged,
            });
        let allocation = match allocation {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { raw.destroy_buffer(buffer, None) };
                return Err(e.into());
            }
        };

        let this = Self {
            device: device.clone(),
            buffer,
            allocation: Some(allocation),
            layout,
            usage,
        };
        if let Some(allocation) = this.allocation.as_ref() {
            unsafe { raw.bind_buffer_memory(buffer, allocation.memory(), allocation.offset())? };
        }

        debug!(
            "Created {} buffer: {} x {} bytes (stride {})",
            usage.name(),
            instance_count,
            instance_size,
            layout.alignment_size()
        );
        Ok(this)
    }

    /// Borrows the persistent host mapping for writing and reading.
    ///
    /// The mapping lives as long as the buffer; the borrow only scopes access.
    ///
    /// # Errors
    ///
    /// Returns [`RhiError::Configuration`] if the memory is not host visible.
    pub fn map(&mut self) -> RhiResult<BufferMapping<'_>> {
        let size = self.layout.buffer_size() as usize;
        let layout = self.layout;
        let usage = self.usage;
        let bytes = self
            .allocation
            .as_mut()
            .and_then(Allocation::mapped_slice_mut)
            .ok_or_else(|| {
                RhiError::Configuration(format!(
                    "{} buffer memory is not host visible",
                    usage.name()
                ))
            })?;
        Ok(BufferMapping {
            layout,
            bytes: &mut bytes[..size],
        })
    }

    /// Copies one instance into slot `index`.
    ///
    /// # Arguments
    ///
    /// * `value` - Exactly one instance worth of data
    /// * `index` - Slot to write, usually the current frame index
    ///
    /// # Panics
    ///
    /// If `value` is not `instance_size` bytes or `index` is out of range.
    pub fn write_to_index<T: bytemuck::Pod>(&mut self, value: &T, index: usize) -> RhiResult<()> {
        self.map()?.write_to_index(value, index);
        Ok(())
    }

    /// Copies raw bytes starting at `offset`, ignoring instance boundaries.
    ///
    /// # Panics
    ///
    /// If the write would run past the end of the buffer.
    pub fn write_to_buffer(&mut self, data: &[u8], offset: vk::DeviceSize) -> RhiResult<()> {
        self.map()?.write(data, offset);
        Ok(())
    }

    /// Makes host writes to slot `index` visible to the device.
    ///
    /// A no-op on coherent memory.
    ///
    /// # Errors
    ///
    /// Returns an error if `vkFlushMappedMemoryRanges` fails.
    pub fn flush_index(&self, index: usize) -> RhiResult<()> {
        self.flush_range(self.layout.offset_of(index), self.layout.alignment_size())
    }

    /// Makes device writes to slot `index` visible to the host.
    ///
    /// A no-op on coherent memory.
    pub fn invalidate_index(&self, index: usize) -> RhiResult<()> {
        self.invalidate_range(self.layout.offset_of(index), self.layout.alignment_size())
    }

    /// Flushes every instance at once.
    pub fn flush(&self) -> RhiResult<()> {
        self.flush_range(0, self.layout.buffer_size())
    }

    /// Invalidates every instance at once.
    pub fn invalidate(&self) -> RhiResult<()> {
        self.invalidate_range(0, self.layout.buffer_size())
    }

    fn flush_range(&self, offset: vk::DeviceSize, size: vk::DeviceSize) -> RhiResult<()> {
        if let Some(range) = self.mapped_range(offset, size) {
            unsafe { self.device.handle().flush_mapped_memory_ranges(&[range])? };
        }
        Ok(())
    }

    fn invalidate_range(&self, offset: vk::DeviceSize, size: vk::DeviceSize) -> RhiResult<()> {
        if let Some(range) = self.mapped_range(offset, size) {
            unsafe {
                self.device
                    .handle()
                    .invalidate_mapped_memory_ranges(&[range])?
            };
        }
        Ok(())
    }

    /// Memory range to flush or invalidate, `None` when the memory is coherent.
    fn mapped_range(
        &self,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
    ) -> Option<vk::MappedMemoryRange<'static>> {
        let allocation = self.allocation.as_ref()?;
        if allocation
            .memory_properties()
            .contains(vk::MemoryPropertyFlags::HOST_COHERENT)
        {
            return None;
        }
        let atom = self.device.limits().non_coherent_atom_size;
        // Shared blocks are atom multiples; a dedicated one ends with the buffer.
        let memory_size = allocation
            .is_dedicated()
            .then(|| allocation.offset() + allocation.size());
        let (offset, size) =
            atom_aligned_range(allocation.offset() + offset, size, atom, memory_size);
        Some(
            vk::MappedMemoryRange::default()
                .memory(unsafe { allocation.memory() })
                .offset(offset)
                .size(size),
        )
    }

    /// Descriptor addressing slot `index`: offset `index * stride`, range one instance.
    ///
    /// One descriptor set per slot, or a single set with a dynamic offset,
    /// can then address per-frame data.
    pub fn descriptor_info_for_index(&self, index: usize) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.buffer,
            offset: self.layout.offset_of(index),
            range: self.layout.instance_size(),
        }
    }

    /// Descriptor covering the whole buffer.
    pub fn descriptor_info(&self) -> vk::DescriptorBufferInfo {
        vk::DescriptorBufferInfo {
            buffer: self.buffer,
            offset: 0,
            range: vk::WHOLE_SIZE,
        }
    }

    #[inline]
    pub fn handle(&self) -> vk::Buffer {
        self.buffer
    }

    #[inline]
    pub fn layout(&self) -> &BufferLayout {
        &self.layout
    }

    #[inline]
    pub fn usage(&self) -> BufferUsage {
        self.usage
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if let Some(allocation) = self.allocation.take() {
            let mut allocator = self
                .device
                .allocator()
                .lock()
                .unwrap_or_else(PoisonError::into_inner);
            if let Err(e) = allocator.free(allocation) {
                error!("Failed to free buffer allocation: {:?}", e);
            }
        }
        unsafe {
            self.device.handle().destroy_buffer(self.buffer, None);
        }
        debug!("Destroyed {} buffer", self.usage.name());
    }
}

/// Host view of a buffer's instances. Writes are not visible to the device
/// until the matching range is flushed.
pub struct BufferMapping<'a> {
    /// Layout of the buffer behind `bytes`.
    layout: BufferLayout,
    /// Mapped memory, at least `layout.buffer_size()` long.
    bytes: &'a mut [u8],
}

impl<'a> BufferMapping<'a> {
    /// Wraps host memory laid out as `layout`.
    ///
    /// # Panics
    ///
    /// If `bytes` is shorter than the layout.
    pub fn new(layout: BufferLayout, bytes: &'a mut [u8]) -> Self {
        assert!(
            bytes.len() as vk::DeviceSize >= layout.buffer_size(),
            "mapping of {} bytes is smaller than the {} byte layout",
            bytes.len(),
            layout.buffer_size()
        );
        Self { layout, bytes }
    }

    /// Copy exactly one instance's bytes into slot `index`.
    pub fn write_to_index<T: bytemuck::Pod>(&mut self, value: &T, index: usize) {
        self.write_bytes_to_index(bytemuck::bytes_of(value), index);
    }

    pub fn write_bytes_to_index(&mut self, data: &[u8], index: usize) {
        assert_eq!(
            data.len() as vk::DeviceSize,
            self.layout.instance_size(),
            "instance writes must cover exactly one instance"
        );
        let offset = self.layout.offset_of(index) as usize;
        self.bytes[offset..offset + data.len()].copy_from_slice(data);
    }

    /// Copy `data` to an arbitrary byte offset.
    pub fn write(&mut self, data: &[u8], offset: vk::DeviceSize) {
        let offset = offset as usize;
        assert!(
            offset + data.len() <= self.bytes.len(),
            "write of {} bytes at {} exceeds buffer of {} bytes",
            data.len(),
            offset,
            self.bytes.len()
        );
        self.bytes[offset..offset + data.len()].copy_from_slice(data);
    }

    /// Bytes currently stored in slot `index`.
    pub fn read_index(&self, index: usize) -> &[u8] {
        let offset = self.layout.offset_of(index) as usize;
        &self.bytes[offset..offset + self.layout.instance_size() as usize]
    }

    pub fn as_bytes(&self) -> &[u8] {
        self.bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stride_rounds_up_to_alignment() {
        assert_eq!(aligned_stride(200, 256), 256);
        assert_eq!(aligned_stride(256, 256), 256);
        assert_eq!(aligned_stride(257, 256), 512);
        assert_eq!(aligned_stride(100, 48), 144);
    }

    #[test]
    fn test_default_alignment_packs_tightly() {
        assert_eq!(aligned_stride(100, 1), 100);
        assert_eq!(aligned_stride(100, 0), 100);
        let layout = BufferLayout::new(100, 3, 1);
        assert_eq!(layout.offset_of(2), 200);
        assert_eq!(layout.buffer_size(), 300);
    }

    #[test]
    fn test_second_slot_offset_matches_alignment() {
        let layout = BufferLayout::new(256, 2, 256);
        assert_eq!(layout.alignment_size(), 256);
        assert_eq!(layout.offset_of(1), 256);
        assert_eq!(layout.buffer_size(), 512);
    }

    #[test]
    #[should_panic(expected = "out of range")]
    fn test_offset_of_rejects_index_past_count() {
        BufferLayout::new(64, 2, 64).offset_of(2);
    }

    #[test]
    fn test_mapping_round_trip_per_slot() {
        let layout = BufferLayout::new(8, 2, 64);
        let mut memory = vec![0u8; layout.buffer_size() as usize];
        let mut mapping = BufferMapping::new(layout, &mut memory);

        mapping.write_to_index(&[1u32, 2u32], 0);
        mapping.write_to_index(&[3u32, 4u32], 1);

        assert_eq!(mapping.read_index(1), bytemuck::bytes_of(&[3u32, 4u32]));
        assert_eq!(mapping.read_index(0), bytemuck::bytes_of(&[1u32, 2u32]));
        // Padding between slots is untouched.
        assert!(mapping.as_bytes()[8..64].iter().all(|&b| b == 0));
    }

    #[test]
    #[should_panic(expected = "exactly one instance")]
    fn test_instance_write_size_must_match() {
        let layout = BufferLayout::new(16, 1, 1);
        let mut memory = vec![0u8; 16];
        BufferMapping::new(layout, &mut memory).write_bytes_to_index(&[0u8; 8], 0);
    }

    #[test]
    fn test_atom_aligned_range() {
        assert_eq!(atom_aligned_range(256, 100, 64, None), (256, 128));
        assert_eq!(atom_aligned_range(300, 10, 64, None), (256, 64));
        assert_eq!(atom_aligned_range(5, 7, 1, None), (5, 7));
        assert_eq!(atom_aligned_range(256, 100, 64, Some(4096)), (256, 128));
    }

    #[test]
    fn test_atom_aligned_range_stays_inside_memory() {
        // Last slot of a 2 x 100 byte buffer in its own 200 byte allocation.
        let layout = BufferLayout::new(100, 2, 1);
        let (offset, size) = atom_aligned_range(
            layout.offset_of(1),
            layout.alignment_size(),
            64,
            Some(layout.buffer_size()),
        );
        assert_eq!(offset, 64);
        assert_eq!(size, vk::WHOLE_SIZE);

        // Ending exactly on the memory size keeps the explicit range.
        assert_eq!(atom_aligned_range(128, 128, 64, Some(256)), (128, 128));
    }

    #[test]
    fn test_usage_flags() {
        assert!(
            BufferUsage::Uniform
                .to_vk_usage()
                .contains(vk::BufferUsageFlags::UNIFORM_BUFFER)
        );
        assert_eq!(BufferUsage::Storage.memory_location(), MemoryLocation::CpuToGpu);
    }
}
