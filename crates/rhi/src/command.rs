//! Command pool and command-buffer lifecycle helpers.
//!
//! The frame scheduler allocates one primary buffer per frame slot and
//! re-records it every frame. Upload code uses [`CommandPool::submit_one_time`]
//! instead, which blocks until the GPU is done.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use vge_rhi::command::CommandPool;
//! use vge_rhi::device::Device;
//!
//! # fn example(device: Arc<Device>, family: u32) -> vge_rhi::RhiResult<()> {
//! let pool = CommandPool::new(device, family)?;
//! let cmd = pool.allocate_command_buffers(1)?[0];
//! pool.begin(cmd)?;
//! // Record commands...
//! pool.end(cmd)?;
//! pool.free_command_buffers(&[cmd]);
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;

use ash::vk;
use tracing::debug;

use crate::device::Device;
use crate::error::RhiResult;

/// Command pool whose buffers can be reset individually.
///
/// Not thread-safe; the engine records from a single thread.
pub struct CommandPool {
    /// Reference to the logical device.
    device: Arc<Device>,
    /// Vulkan command pool handle.
    pool: vk::CommandPool,
    /// Queue family every buffer from this pool is submitted to.
    queue_family_index: u32,
}

impl CommandPool {
    /// Creates a pool for `queue_family_index` with `RESET_COMMAND_BUFFER` set.
    ///
    /// # Arguments
    ///
    /// * `device` - The logical device
    /// * `queue_family_index` - Family of the queue the buffers will be submitted to
    ///
    /// # Errors
    ///
    /// Returns an error if pool creation fails.
    pub fn new(device: Arc<Device>, queue_family_index: u32) -> RhiResult<Self> {
        let create_info = vk::CommandPoolCreateInfo::default()
            .queue_family_index(queue_family_index)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe { device.handle().create_command_pool(&create_info, None)? };
        debug!(
            "Command pool created for queue family {}",
            queue_family_index
        );

        Ok(Self {
            device,
            pool,
            queue_family_index,
        })
    }

    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.pool
    }

    #[inline]
    pub fn queue_family_index(&self) -> u32 {
        self.queue_family_index
    }

    /// Allocates `count` primary command buffers.
    ///
    /// # Errors
    ///
    /// Returns an error if the pool cannot provide them.
    pub fn allocate_command_buffers(&self, count: u32) -> RhiResult<Vec<vk::CommandBuffer>> {
        let alloc_info = vk::CommandBufferAllocateInfo::default()
            .command_pool(self.pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(count);

        let buffers = unsafe { self.device.handle().allocate_command_buffers(&alloc_info)? };
        debug!("Allocated {} command buffer(s)", count);
        Ok(buffers)
    }

    /// Return buffers to the pool. They must not be pending execution.
    pub fn free_command_buffers(&self, buffers: &[vk::CommandBuffer]) {
        if buffers.is_empty() {
            return;
        }
        unsafe {
            self.device
                .handle()
                .free_command_buffers(self.pool, buffers);
        }
        debug!("Freed {} command buffer(s)", buffers.len());
    }

    /// Resets `buffer` and begins recording it for a single submission.
    ///
    /// # Errors
    ///
    /// Returns an error if the reset or begin fails.
    pub fn begin(&self, buffer: vk::CommandBuffer) -> RhiResult<()> {
        let begin_info = vk::CommandBufferBeginInfo::default()
            .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
        unsafe {
            let device = self.device.handle();
            device.reset_command_buffer(buffer, vk::CommandBufferResetFlags::empty())?;
            device.begin_command_buffer(buffer, &begin_info)?;
        }
        Ok(())
    }

    /// Finishes recording `buffer`.
    ///
    /// # Errors
    ///
    /// Returns an error if recording failed, e.g. `VK_ERROR_OUT_OF_DEVICE_MEMORY`.
    pub fn end(&self, buffer: vk::CommandBuffer) -> RhiResult<()> {
        unsafe { self.device.handle().end_command_buffer(buffer)? };
        Ok(())
    }

    /// Record `record` into a temporary buffer, submit it on the graphics
    /// queue and block until it completes.
    ///
    /// Used by upload paths, never by the per-frame loop.
    ///
    /// # Arguments
    ///
    /// * `record` - Receives the raw device and the buffer to record into
    ///
    /// # Errors
    ///
    /// Returns an error if allocation, recording, submission or the wait
    /// fails. The temporary buffer is freed in every case.
    pub fn submit_one_time<F>(&self, record: F) -> RhiResult<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let buffers = self.allocate_command_buffers(1)?;
        let result = self.record_and_wait(buffers[0], record);
        self.free_command_buffers(&buffers);
        result
    }

    fn record_and_wait<F>(&self, buffer: vk::CommandBuffer, record: F) -> RhiResult<()>
    where
        F: FnOnce(&ash::Device, vk::CommandBuffer),
    {
        let device = self.device.handle();
        self.begin(buffer)?;
        record(device, buffer);
        self.end(buffer)?;

        let buffers = [buffer];
        let submit_info = vk::SubmitInfo::default().command_buffers(&buffers);
        unsafe {
            device.queue_submit(self.device.graphics_queue(), &[submit_info], vk::Fence::null())?;
            device.queue_wait_idle(self.device.graphics_queue())?;
        }
        Ok(())
    }
}

impl Drop for CommandPool {
    fn drop(&mut self) {
        unsafe {
            self.device.handle().destroy_command_pool(self.pool, None);
        }
        debug!(
            "Command pool destroyed for queue family {}",
            self.queue_family_index
        );
    }
}
