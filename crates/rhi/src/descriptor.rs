//! Descriptor set layouts, fixed-capacity pools and write composition.
//!
//! - [`DescriptorSetLayoutBuilder`] / [`DescriptorSetLayout`]: immutable binding table
//! - [`DescriptorPoolBuilder`] / [`DescriptorPool`]: allocation that never grows;
//!   exhaustion is reported as `Ok(None)`
//! - [`DescriptorWriter`]: accumulates buffer and image writes, then allocates
//!   and applies them in one step
//!
//! ```no_run
//! use std::sync::Arc;
//! use ash::vk;
//! use vge_rhi::device::Device;
//! use vge_rhi::descriptor::{DescriptorPool, DescriptorSetLayout, DescriptorWriter};
//!
//! # fn example(device: Arc<Device>, info: vk::DescriptorBufferInfo) -> vge_rhi::RhiResult<()> {
//! let layout = DescriptorSetLayout::builder()
//!     .add_binding(0, vk::DescriptorType::UNIFORM_BUFFER, vk::ShaderStageFlags::ALL_GRAPHICS, 1)
//!     .build(device.clone())?;
//! let pool = DescriptorPool::builder()
//!     .max_sets(2)
//!     .add_pool_size(vk::DescriptorType::UNIFORM_BUFFER, 2)
//!     .build(device)?;
//!
//! match DescriptorWriter::new(&layout, &pool).write_buffer(0, info).build()? {
//!     Some(set) => { /* bind `set` */ }
//!     None => { /* pool exhausted: grow or fail */ }
//! }
//! # Ok(())
//! # }
//! ```

use std::cell::Cell;
use std::collections::BTreeMap;
use std::sync::Arc;

use ash::vk;
use tracing::{debug, warn};

use crate::device::Device;
use crate::error::RhiResult;

/// Type, stages and array size of one layout binding.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BindingInfo {
    /// Kind of descriptor at this binding.
    pub descriptor_type: vk::DescriptorType,
    /// Shader stages that can access it.
    pub stage_flags: vk::ShaderStageFlags,
    /// Array size; 1 for a single descriptor.
    pub count: u32,
}

/// Binding index to [`BindingInfo`], each index registered at most once.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DescriptorBindings {
    bindings: BTreeMap<u32, BindingInfo>,
}

impl DescriptorBindings {
    /// Registers `binding`.
    ///
    /// # Panics
    ///
    /// If `binding` is already registered.
    pub fn insert(&mut self, binding: u32, info: BindingInfo) {
        assert!(
            !self.bindings.contains_key(&binding),
            "descriptor binding {binding} is already in use"
        );
        self.bindings.insert(binding, info);
    }

    pub fn get(&self, binding: u32) -> Option<&BindingInfo> {
        self.bindings.get(&binding)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Binding info for a single-descriptor write.
    ///
    /// # Panics
    ///
    /// If the binding is absent or declares an array.
    pub fn expect_single(&self, binding: u32) -> BindingInfo {
        let Some(info) = self.get(binding) else {
            panic!("layout does not contain binding {binding}");
        };
        assert_eq!(
            info.count, 1,
            "binding {binding} expects {} descriptors but a single info was supplied",
            info.count
        );
        *info
    }

    fn to_vk(&self) -> Vec<vk::DescriptorSetLayoutBinding<'static>> {
        self.bindings
            .iter()
            .map(|(&binding, info)| {
                vk::DescriptorSetLayoutBinding::default()
                    .binding(binding)
                    .descriptor_type(info.descriptor_type)
                    .descriptor_count(info.count)
                    .stage_flags(info.stage_flags)
            })
            .collect()
    }
}

/// Builder for [`DescriptorSetLayout`].
#[derive(Default)]
pub struct DescriptorSetLayoutBuilder {
    bindings: DescriptorBindings,
}

impl DescriptorSetLayoutBuilder {
    /// Adds a binding to the layout.
    ///
    /// # Arguments
    ///
    /// * `binding` - Binding index in the shader
    /// * `descriptor_type` - Kind of descriptor
    /// * `stage_flags` - Shader stages that access it
    /// * `count` - Array size, 1 for a single descriptor
    ///
    /// # Panics
    ///
    /// If `binding` was already added.
    pub fn add_binding(
        mut self,
        binding: u32,
        descriptor_type: vk::DescriptorType,
        stage_flags: vk::ShaderStageFlags,
        count: u32,
    ) -> Self {
        self.bindings.insert(
            binding,
            BindingInfo {
                descriptor_type,
                stage_flags,
                count,
            },
        );
        self
    }

    /// Creates the layout.
    ///
    /// # Errors
    ///
    /// Returns an error if layout creation fails.
    pub fn build(self, device: Arc<Device>) -> RhiResult<DescriptorSetLayout> {
        DescriptorSetLayout::new(device, self.bindings)
    }
}

/// Immutable descriptor set layout.
///
/// Keeps its binding table so writers can validate writes against it.
pub struct DescriptorSetLayout {
    /// Reference to the logical device.
    device: Arc<Device>,
    /// Vulkan layout handle.
    layout: vk::DescriptorSetLayout,
    /// Bindings the layout was created with.
    bindings: DescriptorBindings,
}

impl DescriptorSetLayout {
    /// Starts an empty [`DescriptorSetLayoutBuilder`].
    pub fn builder() -> DescriptorSetLayoutBuilder {
        DescriptorSetLayoutBuilder::default()
    }

    /// Creates a layout from a finished binding table.
    ///
    /// # Errors
    ///
    /// Returns an error if layout creation fails.
    pub fn new(device: Arc<Device>, bindings: DescriptorBindings) -> RhiResult<Self> {
        let vk_bindings = bindings.to_vk();
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&vk_bindings);
        let layout = unsafe {
            device
                .handle()
                .create_descriptor_set_layout(&create_info, None)?
        };
        debug!(
            "Created descriptor set layout with {} binding(s)",
            bindings.len()
        );
        Ok(Self {
            device,
            layout,
            bindings,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorSetLayout {
        self.layout
    }

    #[inline]
    pub fn bindings(&self) -> &DescriptorBindings {
        &self.bindings
    }
}

impl Drop for DescriptorSetLayout {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_set_layout(self.layout, None);
        }
    }
}

/// Book-keeping of sets handed out against a fixed `max_sets`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PoolCapacity {
    max_sets: u32,
    allocated: u32,
}

impl PoolCapacity {
    pub fn new(max_sets: u32) -> Self {
        Self {
            max_sets,
            allocated: 0,
        }
    }

    /// Claim one set, false when the pool is full.
    pub fn try_reserve(&mut self) -> bool {
        if self.allocated >= self.max_sets {
            return false;
        }
        self.allocated += 1;
        true
    }

    /// Gives back `count` sets.
    pub fn release(&mut self, count: u32) {
        self.allocated = self.allocated.saturating_sub(count);
    }

    pub fn reset(&mut self) {
        self.allocated = 0;
    }

    pub fn remaining(&self) -> u32 {
        self.max_sets - self.allocated
    }
}

/// Builder for [`DescriptorPool`]. Defaults to 1000 sets and no flags.
pub struct DescriptorPoolBuilder {
    max_sets: u32,
    flags: vk::DescriptorPoolCreateFlags,
    pool_sizes: Vec<vk::DescriptorPoolSize>,
}

impl Default for DescriptorPoolBuilder {
    fn default() -> Self {
        Self {
            max_sets: 1000,
            flags: vk::DescriptorPoolCreateFlags::empty(),
            pool_sizes: Vec::new(),
        }
    }
}

impl DescriptorPoolBuilder {
    /// Reserves room for `count` descriptors of `descriptor_type`.
    pub fn add_pool_size(mut self, descriptor_type: vk::DescriptorType, count: u32) -> Self {
        self.pool_sizes.push(vk::DescriptorPoolSize {
            ty: descriptor_type,
            descriptor_count: count,
        });
        self
    }

    /// Pool creation flags; `FREE_DESCRIPTOR_SET` enables
    /// [`DescriptorPool::free_descriptors`].
    pub fn pool_flags(mut self, flags: vk::DescriptorPoolCreateFlags) -> Self {
        self.flags = flags;
        self
    }

    pub fn max_sets(mut self, max_sets: u32) -> Self {
        self.max_sets = max_sets;
        self
    }

    /// Creates the pool.
    ///
    /// # Errors
    ///
    /// Returns an error if pool creation fails.
    pub fn build(self, device: Arc<Device>) -> RhiResult<DescriptorPool> {
        DescriptorPool::new(device, self.max_sets, self.flags, &self.pool_sizes)
    }
}

/// Fixed-capacity descriptor pool. Used from the render thread only.
///
/// The pool never grows. Running out is an expected outcome reported as
/// `Ok(None)`; whether to create another pool is up to the caller.
pub struct DescriptorPool {
    /// Reference to the logical device.
    device: Arc<Device>,
    /// Vulkan pool handle.
    pool: vk::DescriptorPool,
    /// Creation flags, checked before freeing individual sets.
    flags: vk::DescriptorPoolCreateFlags,
    /// Sets handed out so far against `max_sets`.
    capacity: Cell<PoolCapacity>,
}

impl DescriptorPool {
    /// Starts a [`DescriptorPoolBuilder`].
    pub fn builder() -> DescriptorPoolBuilder {
        DescriptorPoolBuilder::default()
    }

    /// Creates a pool holding at most `max_sets` sets.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `max_sets` - Upper bound on live sets
    /// * `flags` - Pool creation flags
    /// * `pool_sizes` - Descriptor counts per type across all sets
    ///
    /// # Errors
    ///
    /// Returns an error if pool creation fails.
    pub fn new(
        device: Arc<Device>,
        max_sets: u32,
        flags: vk::DescriptorPoolCreateFlags,
        pool_sizes: &[vk::DescriptorPoolSize],
    ) -> RhiResult<Self> {
        let create_info = vk::DescriptorPoolCreateInfo::default()
            .max_sets(max_sets)
            .pool_sizes(pool_sizes)
            .flags(flags);
        let pool = unsafe { device.handle().create_descriptor_pool(&create_info, None)? };
        debug!(
            "Created descriptor pool: max_sets={}, pool_sizes={}",
            max_sets,
            pool_sizes.len()
        );
        Ok(Self {
            device,
            pool,
            flags,
            capacity: Cell::new(PoolCapacity::new(max_sets)),
        })
    }

    /// Allocate one set for `layout`.
    ///
    /// Returns `Ok(None)` when the pool has no room left; only device
    /// failures are errors.
    ///
    /// # Errors
    ///
    /// Any Vulkan failure other than `VK_ERROR_OUT_OF_POOL_MEMORY` and
    /// `VK_ERROR_FRAGMENTED_POOL`.
    pub fn allocate(&self, layout: &DescriptorSetLayout) -> RhiResult<Option<vk::DescriptorSet>> {
        let mut capacity = self.capacity.get();
        if !capacity.try_reserve() {
            warn!("Descriptor pool exhausted");
            return Ok(None);
        }

        let layouts = [layout.handle()];
        let alloc_info = vk::DescriptorSetAllocateInfo::default()
            .descriptor_pool(self.pool)
            .set_layouts(&layouts);

        match unsafe { self.device.handle().allocate_descriptor_sets(&alloc_info) } {
            Ok(sets) => {
                self.capacity.set(capacity);
                Ok(sets.into_iter().next())
            }
            Err(vk::Result::ERROR_OUT_OF_POOL_MEMORY | vk::Result::ERROR_FRAGMENTED_POOL) => {
                warn!("Descriptor pool out of descriptors");
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Returns sets to the pool.
    ///
    /// # Panics
    ///
    /// If the pool was created without `FREE_DESCRIPTOR_SET`.
    pub fn free_descriptors(&self, sets: &[vk::DescriptorSet]) -> RhiResult<()> {
        assert!(
            self.flags
                .contains(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET),
            "pool was not created with FREE_DESCRIPTOR_SET"
        );
        unsafe {
            self.device.handle().free_descriptor_sets(self.pool, sets)?;
        }
        let mut capacity = self.capacity.get();
        capacity.release(sets.len() as u32);
        self.capacity.set(capacity);
        Ok(())
    }

    /// Returns every set allocated from this pool at once.
    ///
    /// Sets from before the reset must no longer be in use by the GPU.
    pub fn reset_pool(&self) -> RhiResult<()> {
        unsafe {
            self.device
                .handle()
                .reset_descriptor_pool(self.pool, vk::DescriptorPoolResetFlags::empty())?;
        }
        let mut capacity = self.capacity.get();
        capacity.reset();
        self.capacity.set(capacity);
        debug!("Reset descriptor pool");
        Ok(())
    }

    #[inline]
    pub fn handle(&self) -> vk::DescriptorPool {
        self.pool
    }

    /// Sets that can still be allocated.
    pub fn remaining_sets(&self) -> u32 {
        self.capacity.get().remaining()
    }
}

impl Drop for DescriptorPool {
    fn drop(&mut self) {
        unsafe {
            self.device
                .handle()
                .destroy_descriptor_pool(self.pool, None);
        }
    }
}

#[derive(Clone, Copy, Debug)]
enum PendingWrite {
    Buffer {
        binding: u32,
        descriptor_type: vk::DescriptorType,
        info: vk::DescriptorBufferInfo,
    },
    Image {
        binding: u32,
        descriptor_type: vk::DescriptorType,
        info: vk::DescriptorImageInfo,
    },
}

/// Collects writes against one layout and applies them to a set.
///
/// Each write is checked against the layout as it is added, so a bad
/// binding fails at the call site rather than inside the driver.
pub struct DescriptorWriter<'a> {
    /// Layout every write is validated against.
    layout: &'a DescriptorSetLayout,
    /// Pool [`build`](Self::build) allocates from.
    pool: &'a DescriptorPool,
    /// Writes in the order they were added.
    writes: Vec<PendingWrite>,
}

impl<'a> DescriptorWriter<'a> {
    /// Starts a writer with no pending writes.
    pub fn new(layout: &'a DescriptorSetLayout, pool: &'a DescriptorPool) -> Self {
        Self {
            layout,
            pool,
            writes: Vec::new(),
        }
    }

    /// Queues a buffer descriptor for `binding`.
    ///
    /// # Panics
    ///
    /// If `binding` is not in the layout or is an array binding.
    pub fn write_buffer(mut self, binding: u32, info: vk::DescriptorBufferInfo) -> Self {
        let binding_info = self.layout.bindings().expect_single(binding);
        self.writes.push(PendingWrite::Buffer {
            binding,
            descriptor_type: binding_info.descriptor_type,
            info,
        });
        self
    }

    /// Queues an image or sampler descriptor for `binding`.
    ///
    /// # Panics
    ///
    /// If `binding` is not in the layout or is an array binding.
    pub fn write_image(mut self, binding: u32, info: vk::DescriptorImageInfo) -> Self {
        let binding_info = self.layout.bindings().expect_single(binding);
        self.writes.push(PendingWrite::Image {
            binding,
            descriptor_type: binding_info.descriptor_type,
            info,
        });
        self
    }

    /// Allocate a set and apply the writes to it.
    ///
    /// `Ok(None)` means the pool is exhausted and nothing was written.
    ///
    /// # Errors
    ///
    /// Same as [`DescriptorPool::allocate`].
    pub fn build(&self) -> RhiResult<Option<vk::DescriptorSet>> {
        let Some(set) = self.pool.allocate(self.layout)? else {
            return Ok(None);
        };
        self.overwrite(set);
        Ok(Some(set))
    }

    /// Apply the accumulated writes to an existing set.
    ///
    /// The set must not be in use by a pending command buffer.
    pub fn overwrite(&self, set: vk::DescriptorSet) {
        let writes: Vec<vk::WriteDescriptorSet> = self
            .writes
            .iter()
            .map(|write| match write {
                PendingWrite::Buffer {
                    binding,
                    descriptor_type,
                    info,
                } => vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(*binding)
                    .descriptor_type(*descriptor_type)
                    .buffer_info(std::slice::from_ref(info)),
                PendingWrite::Image {
                    binding,
                    descriptor_type,
                    info,
                } => vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(*binding)
                    .descriptor_type(*descriptor_type)
                    .image_info(std::slice::from_ref(info)),
            })
            .collect();

        unsafe {
            self.pool
                .device
                .handle()
                .update_descriptor_sets(&writes, &[]);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn uniform(count: u32) -> BindingInfo {
        BindingInfo {
            descriptor_type: vk::DescriptorType::UNIFORM_BUFFER,
            stage_flags: vk::ShaderStageFlags::VERTEX,
            count,
        }
    }

    #[test]
    fn test_bindings_are_kept_by_index() {
        let mut bindings = DescriptorBindings::default();
        bindings.insert(1, uniform(1));
        bindings.insert(0, uniform(4));

        let vk_bindings = bindings.to_vk();
        assert_eq!(vk_bindings.len(), 2);
        assert_eq!(vk_bindings[0].binding, 0);
        assert_eq!(vk_bindings[0].descriptor_count, 4);
        assert_eq!(bindings.expect_single(1), uniform(1));
    }

    #[test]
    #[should_panic(expected = "already in use")]
    fn test_duplicate_binding_panics() {
        DescriptorSetLayoutBuilder::default()
            .add_binding(
                0,
                vk::DescriptorType::UNIFORM_BUFFER,
                vk::ShaderStageFlags::VERTEX,
                1,
            )
            .add_binding(
                0,
                vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                vk::ShaderStageFlags::FRAGMENT,
                1,
            );
    }

    #[test]
    #[should_panic(expected = "does not contain binding 3")]
    fn test_write_to_missing_binding_panics() {
        let mut bindings = DescriptorBindings::default();
        bindings.insert(0, uniform(1));
        bindings.expect_single(3);
    }

    #[test]
    #[should_panic(expected = "expects 2 descriptors")]
    fn test_single_write_to_array_binding_panics() {
        let mut bindings = DescriptorBindings::default();
        bindings.insert(0, uniform(2));
        bindings.expect_single(0);
    }

    #[test]
    fn test_pool_capacity_never_exceeds_max_sets() {
        let mut capacity = PoolCapacity::new(2);
        assert!(capacity.try_reserve());
        assert!(capacity.try_reserve());
        assert!(!capacity.try_reserve());
        assert_eq!(capacity.remaining(), 0);

        capacity.release(1);
        assert!(capacity.try_reserve());

        capacity.reset();
        assert_eq!(capacity.remaining(), 2);
    }

    #[test]
    fn test_pool_builder_defaults() {
        let builder = DescriptorPool::builder();
        assert_eq!(builder.max_sets, 1000);
        assert!(builder.flags.is_empty());

        let builder = builder
            .add_pool_size(vk::DescriptorType::UNIFORM_BUFFER, 4)
            .pool_flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
            .max_sets(4);
        assert_eq!(builder.max_sets, 4);
        assert_eq!(builder.pool_sizes[0].descriptor_count, 4);
    }
}
