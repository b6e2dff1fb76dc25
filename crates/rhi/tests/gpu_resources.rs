//! Buffer and descriptor behavior on a real headless Vulkan device.
//!
//! Each test skips when no Vulkan implementation is available.

use std::sync::Arc;

use ash::vk;
use vge_rhi::RhiError;
use vge_rhi::buffer::{Buffer, BufferUsage};
use vge_rhi::command::CommandPool;
use vge_rhi::descriptor::{DescriptorPool, DescriptorSetLayout, DescriptorWriter};
use vge_rhi::device::Device;
use vge_rhi::instance::Instance;
use vge_rhi::physical_device::select_physical_device;

/// Fields drop in order, so the device goes before its instance.
struct Gpu {
    device: Arc<Device>,
    _instance: Instance,
}

fn headless_gpu() -> Option<Gpu> {
    // Several tests share the process; only the first install wins.
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("vge_rhi=debug")
        .try_init();

    let instance = match Instance::headless(false) {
        Ok(instance) => instance,
        Err(e) => {
            eprintln!("Skipping test: Vulkan not available ({e})");
            return None;
        }
    };
    let info = match select_physical_device(instance.handle(), None) {
        Ok(info) => info,
        Err(e) => {
            eprintln!("Skipping test: no usable GPU ({e})");
            return None;
        }
    };
    let device = match Device::new(&instance, &info) {
        Ok(device) => device,
        Err(e) => {
            eprintln!("Skipping test: device creation failed ({e})");
            return None;
        }
    };
    Some(Gpu {
        device,
        _instance: instance,
    })
}

fn uniform_layout(device: &Arc<Device>) -> DescriptorSetLayout {
    DescriptorSetLayout::builder()
        .add_binding(
            0,
            vk::DescriptorType::UNIFORM_BUFFER,
            vk::ShaderStageFlags::ALL_GRAPHICS,
            1,
        )
        .build(device.clone())
        .unwrap()
}

/// A 4x4 sampled color image in raw device-local memory, with a sampler.
struct SampledImage {
    device: Arc<Device>,
    image: vk::Image,
    memory: vk::DeviceMemory,
    view: vk::ImageView,
    sampler: vk::Sampler,
}

impl SampledImage {
    fn new(device: &Arc<Device>) -> Self {
        let raw = device.handle();
        let format = vk::Format::R8G8B8A8_UNORM;
        let image_info = vk::ImageCreateInfo::default()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(vk::Extent3D {
                width: 4,
                height: 4,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::SAMPLED)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let image = unsafe { raw.create_image(&image_info, None) }.unwrap();

        let requirements = unsafe { raw.get_image_memory_requirements(image) };
        let memory_type_index = device
            .find_memory_type(
                requirements.memory_type_bits,
                vk::MemoryPropertyFlags::DEVICE_LOCAL,
            )
            .unwrap();
        let alloc_info = vk::MemoryAllocateInfo::default()
            .allocation_size(requirements.size)
            .memory_type_index(memory_type_index);
        let memory = unsafe { raw.allocate_memory(&alloc_info, None) }.unwrap();
        unsafe { raw.bind_image_memory(image, memory, 0) }.unwrap();

        let view_info = vk::ImageViewCreateInfo::default()
            .image(image)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(
                vk::ImageSubresourceRange::default()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .level_count(1)
                    .layer_count(1),
            );
        let view = unsafe { raw.create_image_view(&view_info, None) }.unwrap();
        let sampler_info = vk::SamplerCreateInfo::default()
            .mag_filter(vk::Filter::LINEAR)
            .min_filter(vk::Filter::LINEAR);
        let sampler = unsafe { raw.create_sampler(&sampler_info, None) }.unwrap();

        Self {
            device: device.clone(),
            image,
            memory,
            view,
            sampler,
        }
    }

    fn descriptor_info(&self) -> vk::DescriptorImageInfo {
        vk::DescriptorImageInfo {
            sampler: self.sampler,
            image_view: self.view,
            image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        }
    }
}

impl Drop for SampledImage {
    fn drop(&mut self) {
        let raw = self.device.handle();
        unsafe {
            raw.destroy_sampler(self.sampler, None);
            raw.destroy_image_view(self.view, None);
            raw.destroy_image(self.image, None);
            raw.free_memory(self.memory, None);
        }
    }
}

#[test]
fn second_slot_descriptor_offset_is_aligned() {
    let Some(gpu) = headless_gpu() else { return };
    let buffer = Buffer::new(gpu.device.clone(), BufferUsage::Uniform, 256, 2, 256).unwrap();

    let info = buffer.descriptor_info_for_index(1);
    assert_eq!(info.offset, 256);
    assert_eq!(info.range, 256);
    assert_eq!(info.buffer, buffer.handle());
}

#[test]
fn written_slot_reads_back_after_flush() {
    let Some(gpu) = headless_gpu() else { return };
    let alignment = gpu.device.limits().min_uniform_buffer_offset_alignment;
    let mut buffer =
        Buffer::new(gpu.device.clone(), BufferUsage::Uniform, 64, 2, alignment).unwrap();

    let payload: [f32; 16] = std::array::from_fn(|i| i as f32 * 0.5);
    buffer.write_to_index(&payload, 1).unwrap();
    buffer.flush_index(1).unwrap();
    buffer.invalidate_index(1).unwrap();

    let mapping = buffer.map().unwrap();
    assert_eq!(mapping.read_index(1), bytemuck::bytes_of(&payload));
}

#[test]
fn exhausted_pool_returns_none() {
    let Some(gpu) = headless_gpu() else { return };
    let layout = uniform_layout(&gpu.device);
    let pool = DescriptorPool::builder()
        .max_sets(1)
        .add_pool_size(vk::DescriptorType::UNIFORM_BUFFER, 1)
        .build(gpu.device.clone())
        .unwrap();
    let buffer = Buffer::new(gpu.device.clone(), BufferUsage::Uniform, 64, 1, 1).unwrap();

    let writer = DescriptorWriter::new(&layout, &pool).write_buffer(0, buffer.descriptor_info());
    let first = writer.build().unwrap();
    assert!(first.is_some_and(|set| set != vk::DescriptorSet::null()));

    let second = writer.build().unwrap();
    assert!(second.is_none());
    assert_eq!(pool.remaining_sets(), 0);
}

#[test]
fn freed_sets_can_be_reallocated() {
    let Some(gpu) = headless_gpu() else { return };
    let layout = uniform_layout(&gpu.device);
    let pool = DescriptorPool::builder()
        .max_sets(1)
        .pool_flags(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET)
        .add_pool_size(vk::DescriptorType::UNIFORM_BUFFER, 1)
        .build(gpu.device.clone())
        .unwrap();

    let set = pool.allocate(&layout).unwrap().unwrap();
    assert!(pool.allocate(&layout).unwrap().is_none());

    pool.free_descriptors(&[set]).unwrap();
    assert!(pool.allocate(&layout).unwrap().is_some());

    pool.reset_pool().unwrap();
    assert_eq!(pool.remaining_sets(), 1);
}

#[test]
fn buffer_and_image_writes_build_one_set() {
    let Some(gpu) = headless_gpu() else { return };
    let layout = DescriptorSetLayout::builder()
        .add_binding(
            0,
            vk::DescriptorType::UNIFORM_BUFFER,
            vk::ShaderStageFlags::VERTEX,
            1,
        )
        .add_binding(
            1,
            vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            vk::ShaderStageFlags::FRAGMENT,
            1,
        )
        .build(gpu.device.clone())
        .unwrap();
    let pool = DescriptorPool::builder()
        .max_sets(2)
        .add_pool_size(vk::DescriptorType::UNIFORM_BUFFER, 2)
        .add_pool_size(vk::DescriptorType::COMBINED_IMAGE_SAMPLER, 2)
        .build(gpu.device.clone())
        .unwrap();
    let buffer = Buffer::new(gpu.device.clone(), BufferUsage::Uniform, 64, 1, 1).unwrap();
    let image = SampledImage::new(&gpu.device);

    let set = DescriptorWriter::new(&layout, &pool)
        .write_buffer(0, buffer.descriptor_info())
        .write_image(1, image.descriptor_info())
        .build()
        .unwrap();

    assert!(set.is_some_and(|set| set != vk::DescriptorSet::null()));
    assert_eq!(pool.remaining_sets(), 1);
}

#[test]
fn overwrite_updates_existing_set_without_allocating() {
    let Some(gpu) = headless_gpu() else { return };
    let layout = uniform_layout(&gpu.device);
    let pool = DescriptorPool::builder()
        .max_sets(1)
        .add_pool_size(vk::DescriptorType::UNIFORM_BUFFER, 1)
        .build(gpu.device.clone())
        .unwrap();
    let alignment = gpu.device.limits().min_uniform_buffer_offset_alignment;
    let buffer = Buffer::new(gpu.device.clone(), BufferUsage::Uniform, 64, 2, alignment).unwrap();

    let set = DescriptorWriter::new(&layout, &pool)
        .write_buffer(0, buffer.descriptor_info_for_index(0))
        .build()
        .unwrap()
        .unwrap();
    assert_eq!(pool.remaining_sets(), 0);

    // Point the same set at slot 1; the full pool is not touched.
    DescriptorWriter::new(&layout, &pool)
        .write_buffer(0, buffer.descriptor_info_for_index(1))
        .overwrite(set);
    assert_eq!(pool.remaining_sets(), 0);
}

#[test]
fn one_time_copy_moves_staging_bytes() {
    let Some(gpu) = headless_gpu() else { return };
    let family = gpu.device.queue_families().graphics_family.unwrap();
    let pool = CommandPool::new(gpu.device.clone(), family).unwrap();

    let payload: Vec<u8> = (0..64u8).collect();
    let mut staging = Buffer::new(gpu.device.clone(), BufferUsage::Staging, 64, 1, 1).unwrap();
    staging.write_to_buffer(&payload, 0).unwrap();
    staging.flush().unwrap();
    let mut target = Buffer::new(gpu.device.clone(), BufferUsage::Storage, 64, 1, 1).unwrap();

    let (src, dst) = (staging.handle(), target.handle());
    pool.submit_one_time(|device, cmd| {
        let region = vk::BufferCopy {
            src_offset: 0,
            dst_offset: 0,
            size: 64,
        };
        unsafe { device.cmd_copy_buffer(cmd, src, dst, &[region]) };
    })
    .unwrap();

    target.invalidate().unwrap();
    assert_eq!(target.map().unwrap().as_bytes(), payload.as_slice());
}

#[test]
fn raw_write_spans_instances() {
    let Some(gpu) = headless_gpu() else { return };
    let mut buffer = Buffer::new(gpu.device.clone(), BufferUsage::Uniform, 16, 4, 1).unwrap();

    buffer.write_to_index(&[1u8; 16], 0).unwrap();
    let payload: [u8; 32] = std::array::from_fn(|i| i as u8 + 100);
    buffer.write_to_buffer(&payload, 16).unwrap();
    buffer.flush().unwrap();
    buffer.invalidate().unwrap();

    let mapping = buffer.map().unwrap();
    assert_eq!(mapping.read_index(0), &[1u8; 16]);
    assert_eq!(mapping.read_index(1), &payload[..16]);
    assert_eq!(mapping.read_index(2), &payload[16..]);
}

#[test]
fn memory_type_lookup_follows_filter() {
    let Some(gpu) = headless_gpu() else { return };
    let host = vk::MemoryPropertyFlags::HOST_VISIBLE;

    let index = gpu.device.find_memory_type(u32::MAX, host).unwrap();
    assert!(index < vk::MAX_MEMORY_TYPES as u32);
    // Restricting the filter to the found type still finds it.
    assert_eq!(gpu.device.find_memory_type(1 << index, host).unwrap(), index);

    assert!(matches!(
        gpu.device.find_memory_type(0, host),
        Err(RhiError::Configuration(_))
    ));
}
