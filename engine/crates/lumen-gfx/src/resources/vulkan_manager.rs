//! Vulkan 后端的资源管理器
//!
//! 所有资源存放在 [`Pool`] 中，对外只发出 handle。销毁时 handle 立即失效，
//! 底层对象进入延迟释放队列，直到引用它的帧在 GPU 上执行完毕。
//!
//! texture 在两次操作之间总是处于创建时的 layout（由 usage 决定），
//! 上传与 mipmap 生成结束之后都会转换回这个 layout。

use std::{mem::ManuallyDrop, rc::Rc};

use ash::vk;
use itertools::Itertools;
use lumen_pool::{Pool, PoolError, pool::MAX_CAPACITY};
use vk_mem::Alloc;

use crate::{
    GfxError, GfxResult,
    commands::barrier::{GfxBufferBarrier, GfxImageBarrier},
    gfx_core::GfxCore,
    pipelines::shader::{GfxShaderModule, merge_push_constants},
    resources::{
        deferred::{DeferredQueue, completed_frames_below},
        descriptor_pool::{GfxDescriptorPool, uniform_pool_sizes},
        desc::{
            BindGroupDesc, BindGroupLayoutDesc, BufferBinding, BufferDesc, MemoryClass, PipelineDesc,
            TextureBinding, TextureDesc, TextureInfo, TextureRange, check_range, mip_extent,
            validate_bind_group_writes, write_mapped,
        },
        handles::{
            BindGroup, BindGroupHandle, BindGroupLayout, BindGroupLayoutHandle, Buffer, BufferHandle, Pipeline,
            PipelineHandle, Texture, TextureHandle,
        },
        manager::ResourceManager,
        resource_data::{
            BindGroupLayoutResource, BindGroupResource, BindGroupState, BufferResource, PipelineResource, Retired,
            TextureResource,
        },
        sampler::GfxSamplerDesc,
        usage::{Usage, buffer_transition, image_transition},
    },
    settings::MAX_FRAMES_IN_FLIGHT,
};

/// 上传时使用的临时 buffer，一次性命令完成之后立即销毁
struct StagingBuffer {
    buffer: vk::Buffer,
    allocation: vk_mem::Allocation,
}

impl StagingBuffer {
    fn new(core: &GfxCore, data: &[u8], name: &str) -> GfxResult<Self> {
        let buffer_ci = vk::BufferCreateInfo::default()
            .size(data.len() as vk::DeviceSize)
            .usage(vk::BufferUsageFlags::TRANSFER_SRC)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let alloc_ci = VulkanResourceManager::allocation_info(MemoryClass::Upload);

        let allocator = core.allocator();
        let (buffer, mut allocation) = unsafe { allocator.create_buffer(&buffer_ci, &alloc_ci)? };
        core.device().set_object_debug_name(buffer, format!("Buffer::stage-{}", name));

        let copied = unsafe {
            allocator.map_memory(&mut allocation).and_then(|ptr| {
                std::ptr::copy_nonoverlapping(data.as_ptr(), ptr, data.len());
                allocator.unmap_memory(&mut allocation);
                allocator.flush_allocation(&allocation, 0, data.len() as vk::DeviceSize)
            })
        };
        let mut staging = Self { buffer, allocation };
        if let Err(e) = copied {
            staging.destroy(core);
            return Err(e.into());
        }
        Ok(staging)
    }

    fn destroy(&mut self, core: &GfxCore) {
        unsafe { core.allocator().destroy_buffer(self.buffer, &mut self.allocation) };
    }
}

pub struct VulkanResourceManager {
    core: Rc<GfxCore>,

    buffers: Pool<BufferResource, Buffer>,
    textures: Pool<TextureResource, Texture>,
    bind_group_layouts: Pool<BindGroupLayoutResource, BindGroupLayout>,
    bind_groups: Pool<BindGroupResource, BindGroup>,
    pipelines: Pool<PipelineResource, Pipeline>,

    /// 长期存在的 bind group 从这里分配，set 可以单独归还
    descriptor_pool: ManuallyDrop<GfxDescriptorPool>,

    retired: DeferredQueue<Retired>,

    /// 最近一次 `advance_frame` 的 frame id，销毁的对象以它作为标记
    frame_id: u64,
    /// frame id 小于该值的帧都已经执行完毕
    completed_below: u64,
}

// new & init
impl VulkanResourceManager {
    pub fn new(core: Rc<GfxCore>) -> GfxResult<Self> {
        let settings = core.settings();
        let descriptor_pool = GfxDescriptorPool::new(
            core.device().clone(),
            vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET,
            settings.max_bind_groups,
            &uniform_pool_sizes(settings.descriptors_per_type),
            "bind-groups",
        )?;

        Ok(Self {
            core,
            buffers: Pool::new(),
            textures: Pool::new(),
            bind_group_layouts: Pool::new(),
            bind_groups: Pool::new(),
            pipelines: Pool::new(),
            descriptor_pool: ManuallyDrop::new(descriptor_pool),
            retired: DeferredQueue::new(),
            frame_id: 0,
            completed_below: 0,
        })
    }

    /// 不同内存用途对应的 vma 分配参数
    fn allocation_info(memory: MemoryClass) -> vk_mem::AllocationCreateInfo {
        let flags = match memory {
            MemoryClass::DeviceLocal => vk_mem::AllocationCreateFlags::empty(),
            MemoryClass::Upload => vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE,
            MemoryClass::Readback => vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM,
        };
        vk_mem::AllocationCreateInfo {
            usage: vk_mem::MemoryUsage::AutoPreferDevice,
            flags,
            ..Default::default()
        }
    }
}

// getters
impl VulkanResourceManager {
    #[inline]
    pub fn core(&self) -> &Rc<GfxCore> {
        &self.core
    }

    pub fn buffer_resource(&self, buffer: BufferHandle) -> GfxResult<&BufferResource> {
        self.buffers.get(buffer).ok_or_else(|| GfxError::invalid_handle(buffer))
    }

    pub fn texture_resource(&self, texture: TextureHandle) -> GfxResult<&TextureResource> {
        self.textures.get(texture).ok_or_else(|| GfxError::invalid_handle(texture))
    }

    pub fn bind_group_layout_resource(&self, layout: BindGroupLayoutHandle) -> GfxResult<&BindGroupLayoutResource> {
        self.bind_group_layouts.get(layout).ok_or_else(|| GfxError::invalid_handle(layout))
    }

    pub fn bind_group_resource(&self, group: BindGroupHandle) -> GfxResult<&BindGroupResource> {
        self.bind_groups.get(group).ok_or_else(|| GfxError::invalid_handle(group))
    }

    pub fn pipeline_resource(&self, pipeline: PipelineHandle) -> GfxResult<&PipelineResource> {
        self.pipelines.get(pipeline).ok_or_else(|| GfxError::invalid_handle(pipeline))
    }
}

// tools
impl VulkanResourceManager {
    /// 创建底层对象之前检查池是否还有空位
    fn ensure_room<T, K>(pool: &Pool<T, K>) -> GfxResult<()> {
        if pool.is_full() {
            return Err(PoolError::Exhausted { capacity: MAX_CAPACITY }.into());
        }
        Ok(())
    }

    #[inline]
    fn retire(&mut self, item: Retired) {
        self.retired.push(self.frame_id, item);
    }

    /// 真正释放底层对象，调用前需要确保 GPU 不再引用
    fn destroy_retired(&self, item: Retired) {
        let device = self.core.device();
        let allocator = self.core.allocator();
        match item {
            Retired::Buffer(mut buffer) => unsafe {
                if buffer.mapped_ptr.is_some() {
                    allocator.unmap_memory(&mut buffer.allocation);
                }
                allocator.destroy_buffer(buffer.buffer, &mut buffer.allocation);
            },
            Retired::Texture(mut texture) => unsafe {
                for view in texture.sampled_view.iter().chain(texture.attachment_views.iter()) {
                    device.destroy_image_view(*view, None);
                }
                device.destroy_sampler(texture.sampler, None);
                allocator.destroy_image(texture.image, &mut texture.allocation);
            },
            Retired::BindGroupLayout(layout) => unsafe {
                device.destroy_descriptor_set_layout(layout, None);
            },
            Retired::DescriptorSet(set) => self.descriptor_pool.free(set),
            Retired::Pipeline(pipeline) => unsafe {
                device.destroy_pipeline(pipeline.pipeline, None);
                device.destroy_pipeline_layout(pipeline.layout, None);
            },
        }
    }

    /// 释放所有资源，包括还存活的 handle。调用前需要确保 device idle
    pub fn destroy_all(&mut self) {
        let _span = tracy_client::span!("VulkanResourceManager::destroy_all");
        self.release_deferred();

        let alive = self
            .bind_groups
            .drain()
            .into_iter()
            .map(|group| Retired::DescriptorSet(group.set))
            .chain(self.pipelines.drain().into_iter().map(Retired::Pipeline))
            .chain(self.bind_group_layouts.drain().into_iter().map(|layout| Retired::BindGroupLayout(layout.layout)))
            .chain(self.textures.drain().into_iter().map(Retired::Texture))
            .chain(self.buffers.drain().into_iter().map(Retired::Buffer))
            .collect_vec();
        if !alive.is_empty() {
            log::info!("destroying {} resources still alive", alive.len());
        }
        for item in alive {
            self.destroy_retired(item);
        }
    }

    /// 把 texture 转换到创建时的 layout
    fn init_texture_layout(&self, texture: &TextureResource) -> GfxResult<()> {
        let primary = texture.info.usage.primary_image_usage();
        if primary.is_empty() {
            return Ok(());
        }
        let transition = image_transition(Usage::empty(), primary)?;
        let barrier = GfxImageBarrier::from_transition(texture.image, full_range(&texture.info), &transition);
        self.core.one_time_exec("texture-init-layout", |cmd| {
            cmd.image_memory_barrier(vk::DependencyFlags::empty(), std::slice::from_ref(&barrier));
        })
    }

    /// 创建 view 和 sampler，失败时已经创建的对象仍然记录在 `texture` 中
    fn init_texture_views(&self, texture: &mut TextureResource, sampler: &GfxSamplerDesc) -> GfxResult<()> {
        let device = self.core.device();
        let info = texture.info;

        if info.usage.contains(Usage::SHADER_RESOURCE) {
            // 采样 depth stencil 时只能选择一个 aspect
            let aspect = if info.aspect.contains(vk::ImageAspectFlags::DEPTH) {
                vk::ImageAspectFlags::DEPTH
            } else {
                info.aspect
            };
            let view_ci = vk::ImageViewCreateInfo::default()
                .image(texture.image)
                .view_type(info.ty.sampled_view_type())
                .format(info.format)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: aspect,
                    ..full_range(&info)
                });
            let view = unsafe { device.create_image_view(&view_ci, None)? };
            device.set_object_debug_name(view, format!("ImageView::sampled-{}", texture.debug_name));
            texture.sampled_view = Some(view);

            texture.sampler =
                sampler.create(device, self.core.physical_device().max_sampler_anisotropy(), &texture.debug_name)?;
        }

        if info.usage.intersects(Usage::RENDER_TARGET | Usage::DEPTH_STENCIL) {
            for layer in 0..info.num_layers {
                let view_ci = vk::ImageViewCreateInfo::default()
                    .image(texture.image)
                    .view_type(vk::ImageViewType::TYPE_2D)
                    .format(info.format)
                    .subresource_range(vk::ImageSubresourceRange {
                        aspect_mask: info.aspect,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: layer,
                        layer_count: 1,
                    });
                let view = unsafe { device.create_image_view(&view_ci, None)? };
                device.set_object_debug_name(view, format!("ImageView::attachment-{}-{}", texture.debug_name, layer));
                texture.attachment_views.push(view);
            }
        }
        Ok(())
    }

    /// 检查绑定的资源是否存在，以及 usage 是否允许被 shader 访问
    ///
    /// uniform buffer descriptor 的 offset 需要满足设备的对齐要求
    fn check_bound_resources(&self, textures: &[TextureBinding], buffers: &[BufferBinding]) -> GfxResult<()> {
        for binding in textures {
            let texture = self.texture_resource(binding.texture)?;
            if !texture.info.usage.contains(Usage::SHADER_RESOURCE) {
                return Err(GfxError::IncompatibleDescriptor(format!(
                    "texture {} is not a shader resource",
                    texture.debug_name
                )));
            }
        }
        let align = self.core.min_ubo_offset_align();
        for binding in buffers {
            let buffer = self.buffer_resource(binding.buffer)?;
            if !buffer.usage.contains(Usage::UNIFORM_BUFFER) {
                return Err(GfxError::IncompatibleDescriptor(format!(
                    "buffer {} is not a uniform buffer",
                    buffer.debug_name
                )));
            }
            binding.resolved_range(buffer.size)?;
            if binding.offset % align != 0 {
                return Err(GfxError::IncompatibleDescriptor(format!(
                    "binding {} offset {} is not aligned to {}",
                    binding.binding, binding.offset, align
                )));
            }
        }
        Ok(())
    }

    /// 写入 descriptor set
    fn write_descriptors(
        &self,
        set: vk::DescriptorSet,
        layout: &BindGroupLayoutDesc,
        textures: &[TextureBinding],
        buffers: &[BufferBinding],
    ) -> GfxResult<()> {
        let image_infos = textures
            .iter()
            .map(|binding| {
                let texture = self.texture_resource(binding.texture)?;
                let view = texture.sampled_view.ok_or_else(|| {
                    GfxError::IncompatibleDescriptor(format!("texture {} has no sampled view", texture.debug_name))
                })?;
                Ok(vk::DescriptorImageInfo::default()
                    .sampler(texture.sampler)
                    .image_view(view)
                    .image_layout(Usage::bind_group_texture_layout()))
            })
            .collect::<GfxResult<Vec<_>>>()?;
        let buffer_infos = buffers
            .iter()
            .map(|binding| {
                let buffer = self.buffer_resource(binding.buffer)?;
                Ok(vk::DescriptorBufferInfo::default()
                    .buffer(buffer.buffer)
                    .offset(binding.offset)
                    .range(binding.resolved_range(buffer.size)?))
            })
            .collect::<GfxResult<Vec<_>>>()?;

        let descriptor_type = |binding: u32| {
            layout.find(binding).map(|b| b.kind.descriptor_type()).ok_or_else(|| {
                GfxError::IncompatibleDescriptor(format!("binding {} is not declared in {}", binding, layout.debug_name))
            })
        };

        let mut writes = Vec::with_capacity(textures.len() + buffers.len());
        for (binding, info) in textures.iter().zip(image_infos.iter()) {
            writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(binding.binding)
                    .descriptor_type(descriptor_type(binding.binding)?)
                    .image_info(std::slice::from_ref(info)),
            );
        }
        for (binding, info) in buffers.iter().zip(buffer_infos.iter()) {
            writes.push(
                vk::WriteDescriptorSet::default()
                    .dst_set(set)
                    .dst_binding(binding.binding)
                    .descriptor_type(descriptor_type(binding.binding)?)
                    .buffer_info(std::slice::from_ref(info)),
            );
        }

        unsafe { self.core.device().update_descriptor_sets(&writes, &[]) };
        Ok(())
    }

    fn update_bind_group(
        &mut self,
        group: BindGroupHandle,
        textures: &[TextureBinding],
        buffers: &[BufferBinding],
    ) -> GfxResult<()> {
        let _span = tracy_client::span!("VulkanResourceManager::update_bind_group");
        let current = self.bind_group_resource(group)?;
        let layout = self.bind_group_layout_resource(current.state.layout)?;
        validate_bind_group_writes(&layout.desc, textures, buffers, false)?;
        self.check_bound_resources(textures, buffers)?;

        if !current.state.maybe_in_flight(self.completed_below) {
            // 没有 in-flight 的帧引用，直接覆盖
            self.write_descriptors(current.set, &layout.desc, textures, buffers)?;
            let state = &mut self.bind_groups[group].state;
            state.apply_textures(textures);
            state.apply_buffers(buffers);
            return Ok(());
        }

        // 分配新的版本，写入全部绑定
        let mut next = BindGroupState::new(current.state.layout);
        next.textures.clone_from(&current.state.textures);
        next.buffers.clone_from(&current.state.buffers);
        next.apply_textures(textures);
        next.apply_buffers(buffers);

        let set = self.descriptor_pool.allocate(layout.layout)?;
        if let Err(e) = self.write_descriptors(set, &layout.desc, &next.textures, &next.buffers) {
            self.descriptor_pool.free(set);
            return Err(e);
        }

        let resource = &mut self.bind_groups[group];
        let old_set = std::mem::replace(&mut resource.set, set);
        resource.state.textures = next.textures;
        resource.state.buffers = next.buffers;
        resource.state.bump_version();
        log::debug!("bind group {} moved to version {}", resource.debug_name, resource.state.version);

        self.retire(Retired::DescriptorSet(old_set));
        Ok(())
    }

    /// 通过 staging buffer 拷贝到 buffer 的开头
    fn copy_to_buffer(&self, buffer: &BufferResource, data: &[u8]) -> GfxResult<()> {
        let mut staging = StagingBuffer::new(&self.core, data, &buffer.debug_name)?;
        // buffer 之后的用途不确定，让后续的所有读取都等待拷贝完成
        let transfer = buffer_transition(Usage::TRANSFER_SRC, Usage::TRANSFER_DST)?;
        let barrier = GfxBufferBarrier::new()
            .buffer(buffer.buffer, 0, data.len() as vk::DeviceSize)
            .src_mask(transfer.dst.stage, transfer.dst.src_access())
            .dst_mask(vk::PipelineStageFlags2::ALL_COMMANDS, vk::AccessFlags2::MEMORY_READ);
        let region = vk::BufferCopy::default().size(data.len() as vk::DeviceSize);

        let result = self.core.one_time_exec("upload-buffer", |cmd| {
            cmd.cmd_copy_buffer(staging.buffer, buffer.buffer, std::slice::from_ref(&region));
            cmd.buffer_memory_barrier(vk::DependencyFlags::empty(), std::slice::from_ref(&barrier));
        });
        release_staging(&self.core, &mut staging, &result);
        result
    }
}

/// 一次性命令超时时 GPU 可能还在读 staging buffer，只能泄漏
fn release_staging<R>(core: &GfxCore, staging: &mut StagingBuffer, result: &GfxResult<R>) {
    match result {
        Err(GfxError::Timeout(_)) => log::error!("staging buffer leaked because the upload did not finish"),
        _ => staging.destroy(core),
    }
}

/// 覆盖所有 mip 和 layer 的范围
fn full_range(info: &TextureInfo) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        aspect_mask: info.aspect,
        base_mip_level: 0,
        level_count: info.num_mip_levels,
        base_array_layer: 0,
        layer_count: info.num_layers,
    }
}

fn mip_range(info: &TextureInfo, mip_level: u32) -> vk::ImageSubresourceRange {
    vk::ImageSubresourceRange {
        base_mip_level: mip_level,
        level_count: 1,
        ..full_range(info)
    }
}

impl ResourceManager for VulkanResourceManager {
    fn create_buffer(&mut self, desc: &BufferDesc) -> GfxResult<BufferHandle> {
        let _span = tracy_client::span!("VulkanResourceManager::create_buffer");
        desc.validate()?;
        Self::ensure_room(&self.buffers)?;

        // 所有 buffer 都可以作为拷贝的目标，upload_buffer 依赖这一点
        let usage = desc.usage | Usage::TRANSFER_DST;
        let buffer_ci = vk::BufferCreateInfo::default()
            .size(desc.byte_size)
            .usage(usage.to_vk_buffer_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);
        let alloc_ci = Self::allocation_info(desc.memory);

        let allocator = self.core.allocator();
        let (buffer, mut allocation) = unsafe { allocator.create_buffer(&buffer_ci, &alloc_ci)? };
        self.core.device().set_object_debug_name(buffer, format!("Buffer::{}", desc.debug_name));

        let mapped_ptr = if desc.memory.is_host_visible() {
            match unsafe { allocator.map_memory(&mut allocation) } {
                Ok(ptr) => Some(ptr),
                Err(e) => {
                    unsafe { allocator.destroy_buffer(buffer, &mut allocation) };
                    return Err(e.into());
                }
            }
        } else {
            None
        };

        let handle = self.buffers.emplace(BufferResource {
            buffer,
            allocation,
            size: desc.byte_size,
            usage,
            memory: desc.memory,
            mapped_ptr,
            debug_name: desc.debug_name.clone(),
        })?;

        if let Some(data) = desc.initial_data {
            let written = if desc.memory.is_host_visible() {
                self.write_buffer(handle, data, 0)
            } else {
                self.upload_buffer(handle, data)
            };
            if let Err(e) = written {
                self.destroy_buffer(handle)?;
                return Err(e);
            }
        }
        Ok(handle)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, data: &[u8], offset: u64) -> GfxResult<()> {
        let buffer = self.buffer_resource(buffer)?;
        let ptr = buffer.mapped_ptr.ok_or(GfxError::NotMapped)?;
        // SAFETY: 映射的范围覆盖整个 buffer
        let mapped = unsafe { std::slice::from_raw_parts_mut(ptr, buffer.size as usize) };
        write_mapped(mapped, offset, data)?;
        // coherent 内存上 vma 会跳过 flush
        self.core.allocator().flush_allocation(&buffer.allocation, offset, data.len() as vk::DeviceSize)?;
        Ok(())
    }

    fn upload_buffer(&mut self, buffer: BufferHandle, data: &[u8]) -> GfxResult<()> {
        let _span = tracy_client::span!("VulkanResourceManager::upload_buffer");
        let buffer = self.buffer_resource(buffer)?;
        check_range(0, data.len() as u64, buffer.size)?;
        if data.is_empty() {
            return Ok(());
        }
        self.copy_to_buffer(buffer, data)
    }

    fn map(&mut self, buffer: BufferHandle) -> GfxResult<()> {
        let allocator = self.core.allocator();
        let buffer = self.buffers.get_mut(buffer).ok_or_else(|| GfxError::invalid_handle(buffer))?;
        if !buffer.memory.is_host_visible() {
            return Err(GfxError::NotMapped);
        }
        if buffer.mapped_ptr.is_none() {
            buffer.mapped_ptr = Some(unsafe { allocator.map_memory(&mut buffer.allocation)? });
        }
        Ok(())
    }

    fn unmap(&mut self, buffer: BufferHandle) -> GfxResult<()> {
        let allocator = self.core.allocator();
        let buffer = self.buffers.get_mut(buffer).ok_or_else(|| GfxError::invalid_handle(buffer))?;
        if buffer.mapped_ptr.take().is_some() {
            unsafe { allocator.unmap_memory(&mut buffer.allocation) };
        }
        Ok(())
    }

    fn is_mapped(&self, buffer: BufferHandle) -> bool {
        self.buffers.get(buffer).is_some_and(|b| b.mapped_ptr.is_some())
    }

    fn get_mapped(&self, buffer: BufferHandle) -> GfxResult<&[u8]> {
        let buffer = self.buffer_resource(buffer)?;
        let ptr = buffer.mapped_ptr.ok_or(GfxError::NotMapped)?;
        if buffer.memory == MemoryClass::Readback {
            self.core.allocator().invalidate_allocation(&buffer.allocation, 0, buffer.size)?;
        }
        // SAFETY: 映射在 unmap 或者 destroy 之前一直有效，二者都需要 &mut self
        Ok(unsafe { std::slice::from_raw_parts(ptr, buffer.size as usize) })
    }

    fn buffer_size(&self, buffer: BufferHandle) -> GfxResult<u64> {
        Ok(self.buffer_resource(buffer)?.size)
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) -> GfxResult<()> {
        let buffer = self.buffers.free(buffer).ok_or_else(|| GfxError::invalid_handle(buffer))?;
        self.retire(Retired::Buffer(buffer));
        Ok(())
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> GfxResult<TextureHandle> {
        let _span = tracy_client::span!("VulkanResourceManager::create_texture");
        desc.validate()?;
        Self::ensure_room(&self.textures)?;

        let info = desc.info();
        let image_ci = vk::ImageCreateInfo::default()
            .flags(info.ty.image_create_flags())
            .image_type(vk::ImageType::TYPE_2D)
            .format(info.format)
            .extent(vk::Extent3D {
                width: info.width,
                height: info.height,
                depth: 1,
            })
            .mip_levels(info.num_mip_levels)
            .array_layers(info.num_layers)
            .samples(info.samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(info.usage.to_vk_image_usage())
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);
        let alloc_ci = Self::allocation_info(MemoryClass::DeviceLocal);

        let (image, allocation) = unsafe { self.core.allocator().create_image(&image_ci, &alloc_ci)? };
        self.core.device().set_object_debug_name(image, format!("Image::{}", desc.debug_name));

        let mut texture = TextureResource {
            image,
            allocation,
            sampler: vk::Sampler::null(),
            info,
            layout: info.usage.creation_layout(),
            sampled_view: None,
            attachment_views: Vec::new(),
            debug_name: desc.debug_name.clone(),
        };
        let initialized =
            self.init_texture_views(&mut texture, &desc.sampler).and_then(|_| self.init_texture_layout(&texture));
        match initialized {
            Ok(()) => Ok(self.textures.emplace(texture)?),
            Err(GfxError::Timeout(timeout)) => {
                log::error!("texture {} leaked because its layout transition did not finish", desc.debug_name);
                Err(GfxError::Timeout(timeout))
            }
            Err(e) => {
                self.destroy_retired(Retired::Texture(texture));
                Err(e)
            }
        }
    }

    fn create_texture_with_data(&mut self, data: &[u8], desc: &TextureDesc) -> GfxResult<TextureHandle> {
        let _span = tracy_client::span!("VulkanResourceManager::create_texture_with_data");
        let desc = TextureDesc {
            usage: desc.usage | Usage::TRANSFER_DST,
            ..desc.clone()
        };
        let handle = self.create_texture(&desc)?;
        let range = TextureRange::whole_level(0, desc.num_layers);
        let uploaded = self.upload_texture(handle, data, &range).and_then(|_| {
            if desc.generate_mips { self.generate_mipmaps(handle) } else { Ok(()) }
        });
        if let Err(e) = uploaded {
            self.destroy_texture(handle)?;
            return Err(e);
        }
        Ok(handle)
    }

    fn upload_texture(&mut self, handle: TextureHandle, data: &[u8], range: &TextureRange) -> GfxResult<()> {
        let _span = tracy_client::span!("VulkanResourceManager::upload_texture");
        let texture = self.texture_resource(handle)?;
        if !texture.info.usage.contains(Usage::TRANSFER_DST) {
            return Err(GfxError::IncompatibleDescriptor(format!(
                "texture {} cannot be a transfer destination",
                texture.debug_name
            )));
        }
        let resolved = texture.info.resolve_range(range)?;
        if (data.len() as u64) < resolved.byte_size {
            return Err(GfxError::OutOfBounds {
                offset: 0,
                len: resolved.byte_size,
                size: data.len() as u64,
            });
        }

        let primary = texture.info.usage.primary_image_usage();
        let barrier_range = vk::ImageSubresourceRange {
            base_array_layer: resolved.base_layer,
            layer_count: resolved.layer_count,
            ..mip_range(&texture.info, resolved.mip_level)
        };
        let to_dst = GfxImageBarrier::from_transition(
            texture.image,
            barrier_range,
            &image_transition(primary, Usage::TRANSFER_DST)?,
        );
        let to_primary = GfxImageBarrier::from_transition(
            texture.image,
            barrier_range,
            &image_transition(Usage::TRANSFER_DST, primary)?,
        );
        let copy_region = vk::BufferImageCopy2::default()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_offset(resolved.offset)
            .image_extent(resolved.extent)
            .image_subresource(vk::ImageSubresourceLayers {
                aspect_mask: texture.info.aspect,
                mip_level: resolved.mip_level,
                base_array_layer: resolved.base_layer,
                layer_count: resolved.layer_count,
            });

        let mut staging =
            StagingBuffer::new(&self.core, &data[..resolved.byte_size as usize], &texture.debug_name)?;
        let result = self.core.one_time_exec("upload-texture", |cmd| {
            cmd.image_memory_barrier(vk::DependencyFlags::empty(), std::slice::from_ref(&to_dst));
            cmd.cmd_copy_buffer_to_image(
                &vk::CopyBufferToImageInfo2::default()
                    .src_buffer(staging.buffer)
                    .dst_image(texture.image)
                    .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                    .regions(std::slice::from_ref(&copy_region)),
            );
            cmd.image_memory_barrier(vk::DependencyFlags::empty(), std::slice::from_ref(&to_primary));
        });
        release_staging(&self.core, &mut staging, &result);
        result
    }

    fn generate_mipmaps(&mut self, handle: TextureHandle) -> GfxResult<()> {
        let _span = tracy_client::span!("VulkanResourceManager::generate_mipmaps");
        let texture = self.texture_resource(handle)?;
        let info = texture.info;
        if !info.usage.contains(Usage::TRANSFER_SRC | Usage::TRANSFER_DST) {
            return Err(GfxError::IncompatibleDescriptor(format!(
                "texture {} needs transfer usages to generate mipmaps",
                texture.debug_name
            )));
        }
        if info.num_mip_levels <= 1 {
            return Ok(());
        }
        if !self.core.physical_device().supports_linear_blit(self.core.instance().ash_instance(), info.format) {
            return Err(GfxError::IncompatibleDescriptor(format!(
                "format {:?} does not support linear blit",
                info.format
            )));
        }

        let primary = info.usage.primary_image_usage();
        let image = texture.image;
        let all_to_dst =
            GfxImageBarrier::from_transition(image, full_range(&info), &image_transition(primary, Usage::TRANSFER_DST)?);
        let dst_to_src = image_transition(Usage::TRANSFER_DST, Usage::TRANSFER_SRC)?;
        let all_to_primary =
            GfxImageBarrier::from_transition(image, full_range(&info), &image_transition(Usage::TRANSFER_SRC, primary)?);

        let subresource = |mip_level: u32| vk::ImageSubresourceLayers {
            aspect_mask: info.aspect,
            mip_level,
            base_array_layer: 0,
            layer_count: info.num_layers,
        };
        let corner = |mip_level: u32| {
            let extent = mip_extent(info.width, info.height, mip_level);
            vk::Offset3D {
                x: extent.width as i32,
                y: extent.height as i32,
                z: 1,
            }
        };

        self.core.one_time_exec("generate-mipmaps", |cmd| {
            cmd.image_memory_barrier(vk::DependencyFlags::empty(), std::slice::from_ref(&all_to_dst));
            for level in 1..info.num_mip_levels {
                // 上一级写完之后作为 blit 的来源
                let src_ready = GfxImageBarrier::from_transition(image, mip_range(&info, level - 1), &dst_to_src);
                cmd.image_memory_barrier(vk::DependencyFlags::empty(), std::slice::from_ref(&src_ready));

                let blit = vk::ImageBlit2::default()
                    .src_subresource(subresource(level - 1))
                    .src_offsets([vk::Offset3D::default(), corner(level - 1)])
                    .dst_subresource(subresource(level))
                    .dst_offsets([vk::Offset3D::default(), corner(level)]);
                cmd.cmd_blit_image(
                    &vk::BlitImageInfo2::default()
                        .src_image(image)
                        .src_image_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL)
                        .dst_image(image)
                        .dst_image_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL)
                        .regions(std::slice::from_ref(&blit))
                        .filter(vk::Filter::LINEAR),
                );
            }
            let last_ready =
                GfxImageBarrier::from_transition(image, mip_range(&info, info.num_mip_levels - 1), &dst_to_src);
            cmd.image_memory_barrier(vk::DependencyFlags::empty(), std::slice::from_ref(&last_ready));
            cmd.image_memory_barrier(vk::DependencyFlags::empty(), std::slice::from_ref(&all_to_primary));
        })
    }

    fn texture_info(&self, texture: TextureHandle) -> GfxResult<TextureInfo> {
        Ok(self.texture_resource(texture)?.info)
    }

    fn destroy_texture(&mut self, texture: TextureHandle) -> GfxResult<()> {
        let texture = self.textures.free(texture).ok_or_else(|| GfxError::invalid_handle(texture))?;
        self.retire(Retired::Texture(texture));
        Ok(())
    }

    fn create_bind_group_layout(&mut self, desc: &BindGroupLayoutDesc) -> GfxResult<BindGroupLayoutHandle> {
        desc.validate()?;
        Self::ensure_room(&self.bind_group_layouts)?;

        let bindings = desc.bindings.iter().map(|b| b.to_vk()).collect_vec();
        let create_info = vk::DescriptorSetLayoutCreateInfo::default().bindings(&bindings);
        let device = self.core.device();
        let layout = unsafe { device.create_descriptor_set_layout(&create_info, None)? };
        device.set_object_debug_name(layout, format!("BindGroupLayout::{}", desc.debug_name));

        Ok(self.bind_group_layouts.emplace(BindGroupLayoutResource {
            layout,
            desc: desc.clone(),
        })?)
    }

    fn destroy_bind_group_layout(&mut self, layout: BindGroupLayoutHandle) -> GfxResult<()> {
        let layout = self.bind_group_layouts.free(layout).ok_or_else(|| GfxError::invalid_handle(layout))?;
        self.retire(Retired::BindGroupLayout(layout.layout));
        Ok(())
    }

    fn create_bind_group(&mut self, desc: &BindGroupDesc) -> GfxResult<BindGroupHandle> {
        let _span = tracy_client::span!("VulkanResourceManager::create_bind_group");
        let layout = self.bind_group_layout_resource(desc.layout)?;
        validate_bind_group_writes(&layout.desc, &desc.textures, &desc.buffers, true)?;
        self.check_bound_resources(&desc.textures, &desc.buffers)?;
        Self::ensure_room(&self.bind_groups)?;

        let set = self.descriptor_pool.allocate(layout.layout)?;
        if let Err(e) = self.write_descriptors(set, &layout.desc, &desc.textures, &desc.buffers) {
            self.descriptor_pool.free(set);
            return Err(e);
        }
        self.core.device().set_object_debug_name(set, format!("BindGroup::{}", desc.debug_name));

        let mut state = BindGroupState::new(desc.layout);
        state.apply_textures(&desc.textures);
        state.apply_buffers(&desc.buffers);
        Ok(self.bind_groups.emplace(BindGroupResource {
            set,
            state,
            debug_name: desc.debug_name.clone(),
        })?)
    }

    fn update_bind_group_textures(&mut self, group: BindGroupHandle, textures: &[TextureBinding]) -> GfxResult<()> {
        self.update_bind_group(group, textures, &[])
    }

    fn update_bind_group_buffers(&mut self, group: BindGroupHandle, buffers: &[BufferBinding]) -> GfxResult<()> {
        self.update_bind_group(group, &[], buffers)
    }

    fn mark_bind_group_used(&self, group: BindGroupHandle, frame_id: u64) -> GfxResult<()> {
        self.bind_group_resource(group)?.state.mark_used(frame_id);
        Ok(())
    }

    fn destroy_bind_group(&mut self, group: BindGroupHandle) -> GfxResult<()> {
        let group = self.bind_groups.free(group).ok_or_else(|| GfxError::invalid_handle(group))?;
        self.retire(Retired::DescriptorSet(group.set));
        Ok(())
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> GfxResult<PipelineHandle> {
        let _span = tracy_client::span!("VulkanResourceManager::create_pipeline");
        if desc.shaders.is_empty() {
            return Err(GfxError::IncompatibleDescriptor(format!("pipeline {} has no shader", desc.debug_name)));
        }
        let set_layouts = desc
            .bind_group_layouts
            .iter()
            .map(|layout| self.bind_group_layout_resource(*layout).map(|l| l.layout))
            .collect::<GfxResult<Vec<_>>>()?;
        let push_constant = merge_push_constants(&desc.shaders)?;
        Self::ensure_room(&self.pipelines)?;

        let device = self.core.device();
        let layout_ci =
            vk::PipelineLayoutCreateInfo::default().set_layouts(&set_layouts).push_constant_ranges(push_constant.as_slice());
        let layout = unsafe { device.create_pipeline_layout(&layout_ci, None)? };
        device.set_object_debug_name(layout, format!("PipelineLayout::{}", desc.debug_name));

        let mut modules = Vec::with_capacity(desc.shaders.len());
        for shader in &desc.shaders {
            match GfxShaderModule::new(device.clone(), shader) {
                Ok(module) => modules.push(module),
                Err(e) => {
                    modules.into_iter().for_each(GfxShaderModule::destroy);
                    unsafe { device.destroy_pipeline_layout(layout, None) };
                    return Err(e);
                }
            }
        }

        let state = &desc.graphics_state;
        let shader_stages = desc
            .shaders
            .iter()
            .zip(modules.iter())
            .map(|(shader, module)| {
                vk::PipelineShaderStageCreateInfo::default()
                    .stage(shader.stage)
                    .module(module.handle())
                    .name(shader.entry_point.as_c_str())
            })
            .collect_vec();

        // dynamic rendering 需要的 framebuffer 信息
        let mut attach_info = vk::PipelineRenderingCreateInfo::default()
            .color_attachment_formats(&state.color_formats)
            .depth_attachment_format(state.depth_format)
            .stencil_attachment_format(state.stencil_format);
        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::default()
            .vertex_binding_descriptions(&state.vertex_bindings)
            .vertex_attribute_descriptions(&state.vertex_attributes);
        let input_assembly_info = vk::PipelineInputAssemblyStateCreateInfo::default()
            .topology(state.topology)
            .primitive_restart_enable(false);
        // viewport 和 scissor 具体值由 dynamic 决定，但是数量由该 create info 决定
        let viewport_info = vk::PipelineViewportStateCreateInfo::default().viewport_count(1).scissor_count(1);
        let rasterization_info = state.rasterization_info();
        let msaa_info = vk::PipelineMultisampleStateCreateInfo::default().rasterization_samples(state.samples);
        let blend_attachments = state.blend_attachments();
        let color_blend_info = vk::PipelineColorBlendStateCreateInfo::default()
            .attachments(&blend_attachments)
            .blend_constants(state.blend_constants);
        let depth_stencil_info = state.depth_stencil_info();
        let dynamic_state_info = vk::PipelineDynamicStateCreateInfo::default().dynamic_states(&state.dynamic_states);

        let pipeline_ci = vk::GraphicsPipelineCreateInfo::default()
            .stages(&shader_stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly_info)
            .viewport_state(&viewport_info)
            .rasterization_state(&rasterization_info)
            .multisample_state(&msaa_info)
            .color_blend_state(&color_blend_info)
            .depth_stencil_state(&depth_stencil_info)
            .dynamic_state(&dynamic_state_info)
            .layout(layout)
            .push_next(&mut attach_info);

        let created = unsafe {
            device.create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(&pipeline_ci), None)
        };
        modules.into_iter().for_each(GfxShaderModule::destroy);

        let pipeline = match created {
            Ok(pipelines) => pipelines[0],
            Err((_, e)) => {
                unsafe { device.destroy_pipeline_layout(layout, None) };
                return Err(e.into());
            }
        };
        device.set_object_debug_name(pipeline, format!("Pipeline::{}", desc.debug_name));

        Ok(self.pipelines.emplace(PipelineResource {
            layout,
            pipeline,
            push_constant,
            bind_group_layouts: desc.bind_group_layouts.clone(),
        })?)
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) -> GfxResult<()> {
        let pipeline = self.pipelines.free(pipeline).ok_or_else(|| GfxError::invalid_handle(pipeline))?;
        self.retire(Retired::Pipeline(pipeline));
        Ok(())
    }

    fn advance_frame(&mut self, frame_id: u64) {
        let _span = tracy_client::span!("VulkanResourceManager::advance_frame");
        self.frame_id = frame_id;
        self.completed_below = completed_frames_below(frame_id, MAX_FRAMES_IN_FLIGHT);
        for item in self.retired.drain_completed(self.completed_below) {
            self.destroy_retired(item);
        }
    }

    fn release_deferred(&mut self) {
        for item in self.retired.drain_all() {
            self.destroy_retired(item);
        }
    }

    fn pending_release_count(&self) -> usize {
        self.retired.len()
    }
}

impl Drop for VulkanResourceManager {
    fn drop(&mut self) {
        if let Err(e) = self.core.device().wait_idle() {
            log::error!("wait idle before destroying resources: {}", e);
        }
        self.destroy_all();
        unsafe { ManuallyDrop::take(&mut self.descriptor_pool).destroy() };
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::desc::TextureType;

    #[test]
    fn host_access_follows_memory_class() {
        let flags = |memory| VulkanResourceManager::allocation_info(memory).flags;
        assert!(flags(MemoryClass::DeviceLocal).is_empty());
        assert!(flags(MemoryClass::Upload).contains(vk_mem::AllocationCreateFlags::HOST_ACCESS_SEQUENTIAL_WRITE));
        assert!(flags(MemoryClass::Readback).contains(vk_mem::AllocationCreateFlags::HOST_ACCESS_RANDOM));
    }

    #[test]
    fn mip_range_selects_single_level() {
        let info = TextureInfo {
            ty: TextureType::D2,
            width: 64,
            height: 64,
            num_layers: 2,
            num_mip_levels: 7,
            samples: vk::SampleCountFlags::TYPE_1,
            format: vk::Format::R8G8B8A8_UNORM,
            usage: Usage::SHADER_RESOURCE,
            aspect: vk::ImageAspectFlags::COLOR,
        };
        let full = full_range(&info);
        assert_eq!((full.level_count, full.layer_count), (7, 2));

        let level = mip_range(&info, 3);
        assert_eq!((level.base_mip_level, level.level_count), (3, 1));
        assert_eq!(level.layer_count, 2);
    }
}
