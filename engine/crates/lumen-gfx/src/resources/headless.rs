//! 不依赖 GPU 的资源管理器
//!
//! buffer 的内容保存在 CPU 内存中，texture 只记录属性，
//! 提交给 GPU 的工作（上传、blit）记录为 [`RecordedOp`]，用于测试资源管理的语义

use lumen_pool::Pool;

use crate::{
    GfxError, GfxResult,
    pipelines::shader::merge_push_constants,
    resources::{
        deferred::{DeferredQueue, completed_frames_below},
        desc::{
            BindGroupDesc, BindGroupLayoutDesc, BufferBinding, BufferDesc, MemoryClass, PipelineDesc, TextureBinding,
            TextureDesc, TextureInfo, TextureRange, check_range, validate_bind_group_writes, write_mapped,
        },
        handles::{
            BindGroup, BindGroupHandle, BindGroupLayout, BindGroupLayoutHandle, Buffer, BufferHandle, Pipeline,
            PipelineHandle, Texture, TextureHandle,
        },
        manager::ResourceManager,
        resource_data::BindGroupState,
        usage::Usage,
    },
    settings::MAX_FRAMES_IN_FLIGHT,
};

/// 被记录下来的 GPU 工作
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RecordedOp {
    UploadBuffer { buffer: BufferHandle, len: u64 },
    UploadTexture { texture: TextureHandle, mip_level: u32, byte_size: u64 },
    Blit { texture: TextureHandle, src_mip: u32, dst_mip: u32 },
}

struct HeadlessBuffer {
    data: Vec<u8>,
    usage: Usage,
    memory: MemoryClass,
    mapped: bool,
    debug_name: String,
}

struct HeadlessTexture {
    info: TextureInfo,
    debug_name: String,
}

struct HeadlessPipeline {
    debug_name: String,
}

#[derive(Default)]
pub struct HeadlessResourceManager {
    buffers: Pool<HeadlessBuffer, Buffer>,
    textures: Pool<HeadlessTexture, Texture>,
    bind_group_layouts: Pool<BindGroupLayoutDesc, BindGroupLayout>,
    bind_groups: Pool<(BindGroupState, String), BindGroup>,
    pipelines: Pool<HeadlessPipeline, Pipeline>,

    /// 延迟释放的对象，这里只保存 debug name
    retired: DeferredQueue<String>,
    released: Vec<String>,
    recorded: Vec<RecordedOp>,

    frame_id: u64,
    completed_below: u64,
}

// new & init
impl HeadlessResourceManager {
    pub fn new() -> Self {
        Self::default()
    }
}

// getters
impl HeadlessResourceManager {
    /// 按提交顺序记录的 GPU 工作
    #[inline]
    pub fn recorded_ops(&self) -> &[RecordedOp] {
        &self.recorded
    }

    /// 已经真正释放的对象的 debug name
    #[inline]
    pub fn released(&self) -> &[String] {
        &self.released
    }

    pub fn bind_group_version(&self, group: BindGroupHandle) -> GfxResult<u32> {
        Ok(self.bind_group(group)?.0.version)
    }

    pub fn bind_group_buffers(&self, group: BindGroupHandle) -> GfxResult<&[BufferBinding]> {
        Ok(&self.bind_group(group)?.0.buffers)
    }
}

// tools
impl HeadlessResourceManager {
    fn buffer(&self, buffer: BufferHandle) -> GfxResult<&HeadlessBuffer> {
        self.buffers.get(buffer).ok_or_else(|| GfxError::invalid_handle(buffer))
    }

    fn buffer_mut(&mut self, buffer: BufferHandle) -> GfxResult<&mut HeadlessBuffer> {
        self.buffers.get_mut(buffer).ok_or_else(|| GfxError::invalid_handle(buffer))
    }

    fn texture(&self, texture: TextureHandle) -> GfxResult<&HeadlessTexture> {
        self.textures.get(texture).ok_or_else(|| GfxError::invalid_handle(texture))
    }

    fn bind_group(&self, group: BindGroupHandle) -> GfxResult<&(BindGroupState, String)> {
        self.bind_groups.get(group).ok_or_else(|| GfxError::invalid_handle(group))
    }

    fn layout_desc(&self, layout: BindGroupLayoutHandle) -> GfxResult<&BindGroupLayoutDesc> {
        self.bind_group_layouts.get(layout).ok_or_else(|| GfxError::invalid_handle(layout))
    }

    /// 检查绑定的资源是否存在，以及 usage 是否允许被 shader 访问
    fn check_bound_resources(&self, textures: &[TextureBinding], buffers: &[BufferBinding]) -> GfxResult<()> {
        for binding in textures {
            let texture = self.texture(binding.texture)?;
            if !texture.info.usage.contains(Usage::SHADER_RESOURCE) {
                return Err(GfxError::IncompatibleDescriptor(format!(
                    "texture {} is not a shader resource",
                    texture.debug_name
                )));
            }
        }
        for binding in buffers {
            let buffer = self.buffer(binding.buffer)?;
            if !buffer.usage.contains(Usage::UNIFORM_BUFFER) {
                return Err(GfxError::IncompatibleDescriptor(format!(
                    "buffer {} is not a uniform buffer",
                    buffer.debug_name
                )));
            }
            binding.resolved_range(buffer.data.len() as u64)?;
        }
        Ok(())
    }

    fn update_bind_group(
        &mut self,
        group: BindGroupHandle,
        textures: &[TextureBinding],
        buffers: &[BufferBinding],
    ) -> GfxResult<()> {
        let layout = self.bind_group(group)?.0.layout;
        validate_bind_group_writes(self.layout_desc(layout)?, textures, buffers, false)?;
        self.check_bound_resources(textures, buffers)?;

        let completed_below = self.completed_below;
        let frame_id = self.frame_id;
        let (state, name) = &mut self.bind_groups[group];
        if state.maybe_in_flight(completed_below) {
            self.retired.push(frame_id, format!("{}@v{}", name, state.version));
            state.bump_version();
        }
        state.apply_textures(textures);
        state.apply_buffers(buffers);
        Ok(())
    }

    fn retire(&mut self, name: String) {
        self.retired.push(self.frame_id, name);
    }
}

impl ResourceManager for HeadlessResourceManager {
    fn create_buffer(&mut self, desc: &BufferDesc) -> GfxResult<BufferHandle> {
        desc.validate()?;
        let mut data = vec![0; desc.byte_size as usize];
        if let Some(initial) = desc.initial_data {
            data[..initial.len()].copy_from_slice(initial);
        }
        let handle = self.buffers.emplace(HeadlessBuffer {
            data,
            usage: desc.usage,
            memory: desc.memory,
            mapped: desc.memory.is_host_visible(),
            debug_name: desc.debug_name.clone(),
        })?;
        if let (Some(initial), MemoryClass::DeviceLocal) = (desc.initial_data, desc.memory) {
            self.recorded.push(RecordedOp::UploadBuffer {
                buffer: handle,
                len: initial.len() as u64,
            });
        }
        Ok(handle)
    }

    fn write_buffer(&mut self, buffer: BufferHandle, data: &[u8], offset: u64) -> GfxResult<()> {
        let buffer = self.buffer_mut(buffer)?;
        if !buffer.mapped {
            return Err(GfxError::NotMapped);
        }
        write_mapped(&mut buffer.data, offset, data)
    }

    fn upload_buffer(&mut self, handle: BufferHandle, data: &[u8]) -> GfxResult<()> {
        let buffer = self.buffer_mut(handle)?;
        check_range(0, data.len() as u64, buffer.data.len() as u64)?;
        buffer.data[..data.len()].copy_from_slice(data);
        self.recorded.push(RecordedOp::UploadBuffer {
            buffer: handle,
            len: data.len() as u64,
        });
        Ok(())
    }

    fn map(&mut self, buffer: BufferHandle) -> GfxResult<()> {
        let buffer = self.buffer_mut(buffer)?;
        if !buffer.memory.is_host_visible() {
            return Err(GfxError::NotMapped);
        }
        buffer.mapped = true;
        Ok(())
    }

    fn unmap(&mut self, buffer: BufferHandle) -> GfxResult<()> {
        self.buffer_mut(buffer)?.mapped = false;
        Ok(())
    }

    fn is_mapped(&self, buffer: BufferHandle) -> bool {
        self.buffers.get(buffer).is_some_and(|b| b.mapped)
    }

    fn get_mapped(&self, buffer: BufferHandle) -> GfxResult<&[u8]> {
        let buffer = self.buffer(buffer)?;
        if !buffer.mapped {
            return Err(GfxError::NotMapped);
        }
        Ok(&buffer.data)
    }

    fn buffer_size(&self, buffer: BufferHandle) -> GfxResult<u64> {
        Ok(self.buffer(buffer)?.data.len() as u64)
    }

    fn destroy_buffer(&mut self, buffer: BufferHandle) -> GfxResult<()> {
        let buffer = self.buffers.free(buffer).ok_or_else(|| GfxError::invalid_handle(buffer))?;
        self.retire(buffer.debug_name);
        Ok(())
    }

    fn create_texture(&mut self, desc: &TextureDesc) -> GfxResult<TextureHandle> {
        desc.validate()?;
        Ok(self.textures.emplace(HeadlessTexture {
            info: desc.info(),
            debug_name: desc.debug_name.clone(),
        })?)
    }

    fn create_texture_with_data(&mut self, data: &[u8], desc: &TextureDesc) -> GfxResult<TextureHandle> {
        let desc = TextureDesc {
            usage: desc.usage | Usage::TRANSFER_DST,
            ..desc.clone()
        };
        let handle = self.create_texture(&desc)?;
        let range = TextureRange::whole_level(0, desc.num_layers);
        let uploaded = self.upload_texture(handle, data, &range).and_then(|_| {
            if desc.generate_mips { self.generate_mipmaps(handle) } else { Ok(()) }
        });
        if let Err(err) = uploaded {
            self.textures.free(handle);
            return Err(err);
        }
        Ok(handle)
    }

    fn upload_texture(&mut self, handle: TextureHandle, data: &[u8], range: &TextureRange) -> GfxResult<()> {
        let texture = self.texture(handle)?;
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
        self.recorded.push(RecordedOp::UploadTexture {
            texture: handle,
            mip_level: resolved.mip_level,
            byte_size: resolved.byte_size,
        });
        Ok(())
    }

    fn generate_mipmaps(&mut self, handle: TextureHandle) -> GfxResult<()> {
        let texture = self.texture(handle)?;
        if !texture.info.usage.contains(Usage::TRANSFER_SRC | Usage::TRANSFER_DST) {
            return Err(GfxError::IncompatibleDescriptor(format!(
                "texture {} needs transfer usages to generate mipmaps",
                texture.debug_name
            )));
        }
        let mip_levels = texture.info.num_mip_levels;
        self.recorded.extend((1..mip_levels).map(|level| RecordedOp::Blit {
            texture: handle,
            src_mip: level - 1,
            dst_mip: level,
        }));
        Ok(())
    }

    fn texture_info(&self, texture: TextureHandle) -> GfxResult<TextureInfo> {
        Ok(self.texture(texture)?.info)
    }

    fn destroy_texture(&mut self, texture: TextureHandle) -> GfxResult<()> {
        let texture = self.textures.free(texture).ok_or_else(|| GfxError::invalid_handle(texture))?;
        self.retire(texture.debug_name);
        Ok(())
    }

    fn create_bind_group_layout(&mut self, desc: &BindGroupLayoutDesc) -> GfxResult<BindGroupLayoutHandle> {
        desc.validate()?;
        Ok(self.bind_group_layouts.emplace(desc.clone())?)
    }

    fn destroy_bind_group_layout(&mut self, layout: BindGroupLayoutHandle) -> GfxResult<()> {
        let desc = self.bind_group_layouts.free(layout).ok_or_else(|| GfxError::invalid_handle(layout))?;
        self.retire(desc.debug_name);
        Ok(())
    }

    fn create_bind_group(&mut self, desc: &BindGroupDesc) -> GfxResult<BindGroupHandle> {
        validate_bind_group_writes(self.layout_desc(desc.layout)?, &desc.textures, &desc.buffers, true)?;
        self.check_bound_resources(&desc.textures, &desc.buffers)?;

        let mut state = BindGroupState::new(desc.layout);
        state.apply_textures(&desc.textures);
        state.apply_buffers(&desc.buffers);
        Ok(self.bind_groups.emplace((state, desc.debug_name.clone()))?)
    }

    fn update_bind_group_textures(&mut self, group: BindGroupHandle, textures: &[TextureBinding]) -> GfxResult<()> {
        self.update_bind_group(group, textures, &[])
    }

    fn update_bind_group_buffers(&mut self, group: BindGroupHandle, buffers: &[BufferBinding]) -> GfxResult<()> {
        self.update_bind_group(group, &[], buffers)
    }

    fn mark_bind_group_used(&self, group: BindGroupHandle, frame_id: u64) -> GfxResult<()> {
        self.bind_group(group)?.0.mark_used(frame_id);
        Ok(())
    }

    fn destroy_bind_group(&mut self, group: BindGroupHandle) -> GfxResult<()> {
        let (state, name) = self.bind_groups.free(group).ok_or_else(|| GfxError::invalid_handle(group))?;
        self.retire(format!("{}@v{}", name, state.version));
        Ok(())
    }

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> GfxResult<PipelineHandle> {
        for layout in &desc.bind_group_layouts {
            self.layout_desc(*layout)?;
        }
        if desc.shaders.is_empty() {
            return Err(GfxError::IncompatibleDescriptor(format!("pipeline {} has no shader", desc.debug_name)));
        }
        merge_push_constants(&desc.shaders)?;
        Ok(self.pipelines.emplace(HeadlessPipeline {
            debug_name: desc.debug_name.clone(),
        })?)
    }

    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) -> GfxResult<()> {
        let pipeline = self.pipelines.free(pipeline).ok_or_else(|| GfxError::invalid_handle(pipeline))?;
        self.retire(pipeline.debug_name);
        Ok(())
    }

    fn advance_frame(&mut self, frame_id: u64) {
        self.frame_id = frame_id;
        self.completed_below = completed_frames_below(frame_id, MAX_FRAMES_IN_FLIGHT);
        let completed = self.retired.drain_completed(self.completed_below);
        self.released.extend(completed);
    }

    fn release_deferred(&mut self) {
        let all = self.retired.drain_all();
        self.released.extend(all);
    }

    fn pending_release_count(&self) -> usize {
        self.retired.len()
    }
}

#[cfg(test)]
mod tests {
    use ash::vk;

    use super::*;
    use crate::{
        pipelines::shader::ShaderDesc,
        resources::desc::{BindingDesc, BindingKind},
    };

    fn uniform_buffer(rm: &mut HeadlessResourceManager, size: u64) -> BufferHandle {
        rm.create_buffer(&BufferDesc::new("ubo", size, Usage::UNIFORM_BUFFER, MemoryClass::Upload)).unwrap()
    }

    #[test]
    fn write_then_read_mapped_bytes() {
        let mut rm = HeadlessResourceManager::new();
        let buffer = uniform_buffer(&mut rm, 256);
        assert!(rm.is_mapped(buffer));

        let data = (0..64u8).collect::<Vec<_>>();
        rm.write_buffer(buffer, &data, 0).unwrap();
        assert_eq!(&rm.get_mapped(buffer).unwrap()[..64], data.as_slice());

        rm.write_buffer(buffer, &data, 192).unwrap();
        assert_eq!(&rm.get_mapped(buffer).unwrap()[192..], data.as_slice());
    }

    #[test]
    fn out_of_bounds_write_changes_nothing() {
        let mut rm = HeadlessResourceManager::new();
        let buffer = uniform_buffer(&mut rm, 256);
        let err = rm.write_buffer(buffer, &[0xFF; 64], 200).unwrap_err();
        assert!(matches!(err, GfxError::OutOfBounds { offset: 200, len: 64, size: 256 }));
        assert!(rm.get_mapped(buffer).unwrap().iter().all(|b| *b == 0));
    }

    #[test]
    fn pod_values_keep_their_layout() {
        #[repr(C)]
        #[derive(Clone, Copy, Debug, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
        struct Light {
            color: [f32; 3],
            intensity: f32,
        }

        let mut rm = HeadlessResourceManager::new();
        let buffer = uniform_buffer(&mut rm, 64);
        let light = Light {
            color: [1.0, 0.5, 0.25],
            intensity: 4.0,
        };
        rm.write_buffer_pod(buffer, &light, 16).unwrap();

        let mapped = rm.get_mapped(buffer).unwrap();
        let read: Light = bytemuck::pod_read_unaligned(&mapped[16..16 + size_of::<Light>()]);
        assert_eq!(read, light);
        assert!(matches!(rm.write_buffer_pod(buffer, &light, 56), Err(GfxError::OutOfBounds { .. })));
    }

    #[test]
    fn initial_data_lands_in_the_buffer() {
        let mut rm = HeadlessResourceManager::new();
        let data = [7u8; 16];
        let upload = rm
            .create_buffer(&BufferDesc::new("init", 32, Usage::UNIFORM_BUFFER, MemoryClass::Upload).initial_data(&data))
            .unwrap();
        assert_eq!(&rm.get_mapped(upload).unwrap()[..16], &data);
        assert!(rm.recorded_ops().is_empty());

        let device_local = rm
            .create_buffer(&BufferDesc::new("vb", 32, Usage::VERTEX_BUFFER, MemoryClass::DeviceLocal).initial_data(&data))
            .unwrap();
        assert_eq!(rm.recorded_ops(), &[RecordedOp::UploadBuffer { buffer: device_local, len: 16 }]);
    }

    #[test]
    fn map_rules() {
        let mut rm = HeadlessResourceManager::new();
        let device_local =
            rm.create_buffer(&BufferDesc::new("vb", 64, Usage::VERTEX_BUFFER, MemoryClass::DeviceLocal)).unwrap();
        assert!(!rm.is_mapped(device_local));
        assert!(matches!(rm.map(device_local), Err(GfxError::NotMapped)));
        assert!(matches!(rm.get_mapped(device_local), Err(GfxError::NotMapped)));

        let readback = rm.create_buffer(&BufferDesc::new("rb", 64, Usage::TRANSFER_DST, MemoryClass::Readback)).unwrap();
        rm.unmap(readback).unwrap();
        assert!(matches!(rm.write_buffer(readback, &[1], 0), Err(GfxError::NotMapped)));
        rm.map(readback).unwrap();
        rm.write_buffer(readback, &[1], 0).unwrap();
    }

    #[test]
    fn generate_mips_creates_full_chain() {
        let mut rm = HeadlessResourceManager::new();
        let desc = TextureDesc {
            debug_name: "albedo".to_string(),
            width: 256,
            height: 256,
            generate_mips: true,
            ..Default::default()
        };
        let data = vec![0u8; 256 * 256 * 4];
        let texture = rm.create_texture_with_data(&data, &desc).unwrap();

        assert_eq!(rm.texture_info(texture).unwrap().num_mip_levels, 9);
        let blits = rm.recorded_ops().iter().filter(|op| matches!(op, RecordedOp::Blit { .. })).count();
        assert_eq!(blits, 8);
        assert_eq!(
            rm.recorded_ops().last(),
            Some(&RecordedOp::Blit {
                texture,
                src_mip: 7,
                dst_mip: 8
            })
        );
    }

    #[test]
    fn short_texture_data_is_rejected() {
        let mut rm = HeadlessResourceManager::new();
        let desc = TextureDesc {
            width: 16,
            height: 16,
            ..Default::default()
        };
        assert!(matches!(rm.create_texture_with_data(&[0; 16], &desc), Err(GfxError::OutOfBounds { .. })));
        // 失败时不会留下 texture
        assert_eq!(rm.textures.len(), 0);
    }

    #[test]
    fn upload_needs_transfer_dst() {
        let mut rm = HeadlessResourceManager::new();
        let texture = rm.create_texture(&TextureDesc::default()).unwrap();
        let err = rm.upload_texture(texture, &[0; 4], &TextureRange::whole_level(0, 1)).unwrap_err();
        assert!(matches!(err, GfxError::IncompatibleDescriptor(_)));
    }

    #[test]
    fn destroy_invalidates_now_and_releases_later() {
        let mut rm = HeadlessResourceManager::new();
        rm.advance_frame(0);
        let buffer = uniform_buffer(&mut rm, 64);
        rm.destroy_buffer(buffer).unwrap();

        assert!(matches!(rm.buffer_size(buffer), Err(GfxError::InvalidHandle(_))));
        assert!(matches!(rm.destroy_buffer(buffer), Err(GfxError::InvalidHandle(_))));
        assert_eq!(rm.pending_release_count(), 1);

        rm.advance_frame(1);
        assert_eq!(rm.pending_release_count(), 1);
        rm.advance_frame(2);
        assert_eq!(rm.pending_release_count(), 0);
        assert_eq!(rm.released(), &["ubo".to_string()]);
    }

    #[test]
    fn release_deferred_frees_everything() {
        let mut rm = HeadlessResourceManager::new();
        let buffer = uniform_buffer(&mut rm, 64);
        let texture = rm.create_texture(&TextureDesc::default()).unwrap();
        rm.destroy_buffer(buffer).unwrap();
        rm.destroy_texture(texture).unwrap();
        rm.release_deferred();
        assert_eq!(rm.pending_release_count(), 0);
        assert_eq!(rm.released().len(), 2);
    }

    fn material_layout(rm: &mut HeadlessResourceManager) -> BindGroupLayoutHandle {
        rm.create_bind_group_layout(&BindGroupLayoutDesc {
            debug_name: "material".to_string(),
            bindings: vec![
                BindingDesc::new(0, BindingKind::Buffer, vk::ShaderStageFlags::VERTEX),
                BindingDesc::new(1, BindingKind::Texture, vk::ShaderStageFlags::FRAGMENT),
            ],
        })
        .unwrap()
    }

    fn material_group(
        rm: &mut HeadlessResourceManager,
        layout: BindGroupLayoutHandle,
        buffer: BufferHandle,
        texture: TextureHandle,
    ) -> GfxResult<BindGroupHandle> {
        rm.create_bind_group(&BindGroupDesc {
            debug_name: "material-0".to_string(),
            layout,
            textures: vec![TextureBinding { binding: 1, texture }],
            buffers: vec![BufferBinding::whole(0, buffer)],
        })
    }

    #[test]
    fn bind_group_must_match_layout() {
        let mut rm = HeadlessResourceManager::new();
        let layout = material_layout(&mut rm);
        let buffer = uniform_buffer(&mut rm, 64);
        let texture = rm.create_texture(&TextureDesc::default()).unwrap();

        let missing_texture = rm.create_bind_group(&BindGroupDesc {
            debug_name: "partial".to_string(),
            layout,
            textures: vec![],
            buffers: vec![BufferBinding::whole(0, buffer)],
        });
        assert!(matches!(missing_texture, Err(GfxError::IncompatibleDescriptor(_))));

        assert!(material_group(&mut rm, layout, buffer, texture).is_ok());

        rm.destroy_texture(texture).unwrap();
        assert!(matches!(material_group(&mut rm, layout, buffer, texture), Err(GfxError::InvalidHandle(_))));
    }

    #[test]
    fn non_uniform_buffer_cannot_be_bound() {
        let mut rm = HeadlessResourceManager::new();
        let layout = material_layout(&mut rm);
        let vertex = rm.create_buffer(&BufferDesc::new("vb", 64, Usage::VERTEX_BUFFER, MemoryClass::Upload)).unwrap();
        let texture = rm.create_texture(&TextureDesc::default()).unwrap();
        assert!(matches!(material_group(&mut rm, layout, vertex, texture), Err(GfxError::IncompatibleDescriptor(_))));
    }

    #[test]
    fn rebinding_idle_group_updates_in_place() {
        let mut rm = HeadlessResourceManager::new();
        let layout = material_layout(&mut rm);
        let (a, b) = (uniform_buffer(&mut rm, 64), uniform_buffer(&mut rm, 64));
        let texture = rm.create_texture(&TextureDesc::default()).unwrap();
        let group = material_group(&mut rm, layout, a, texture).unwrap();

        rm.update_bind_group_buffers(group, &[BufferBinding::whole(0, b)]).unwrap();
        assert_eq!(rm.bind_group_version(group).unwrap(), 0);
        assert_eq!(rm.bind_group_buffers(group).unwrap()[0].buffer, b);
        assert_eq!(rm.pending_release_count(), 0);
    }

    #[test]
    fn rebinding_in_flight_group_creates_new_version() {
        let mut rm = HeadlessResourceManager::new();
        let layout = material_layout(&mut rm);
        let (a, b) = (uniform_buffer(&mut rm, 64), uniform_buffer(&mut rm, 64));
        let texture = rm.create_texture(&TextureDesc::default()).unwrap();
        let group = material_group(&mut rm, layout, a, texture).unwrap();

        rm.advance_frame(0);
        rm.mark_bind_group_used(group, 0).unwrap();
        rm.advance_frame(1);
        rm.update_bind_group_buffers(group, &[BufferBinding::whole(0, b)]).unwrap();

        assert_eq!(rm.bind_group_version(group).unwrap(), 1);
        assert_eq!(rm.pending_release_count(), 1);

        // 同一帧内再次更新，新版本还没有被使用过
        rm.update_bind_group_buffers(group, &[BufferBinding::whole(0, a)]).unwrap();
        assert_eq!(rm.bind_group_version(group).unwrap(), 1);

        rm.advance_frame(3);
        assert_eq!(rm.released(), &["material-0@v0".to_string()]);
    }

    #[test]
    fn update_with_wrong_kind_fails() {
        let mut rm = HeadlessResourceManager::new();
        let layout = material_layout(&mut rm);
        let buffer = uniform_buffer(&mut rm, 64);
        let texture = rm.create_texture(&TextureDesc::default()).unwrap();
        let group = material_group(&mut rm, layout, buffer, texture).unwrap();

        let err = rm.update_bind_group_buffers(group, &[BufferBinding::whole(1, buffer)]).unwrap_err();
        assert!(matches!(err, GfxError::IncompatibleDescriptor(_)));
    }

    #[test]
    fn pipeline_push_constants_must_agree() {
        let mut rm = HeadlessResourceManager::new();
        let layout = material_layout(&mut rm);
        let vs = ShaderDesc::new("vs", vec![], "main", vk::ShaderStageFlags::VERTEX).unwrap().push_constant(0, 64);
        let fs = ShaderDesc::new("fs", vec![], "main", vk::ShaderStageFlags::FRAGMENT).unwrap().push_constant(0, 16);

        let desc = PipelineDesc {
            debug_name: "mesh".to_string(),
            shaders: vec![vs.clone(), fs],
            bind_group_layouts: vec![layout],
            ..Default::default()
        };
        assert!(matches!(rm.create_pipeline(&desc), Err(GfxError::IncompatibleDescriptor(_))));

        let desc = PipelineDesc {
            shaders: vec![vs],
            ..desc
        };
        let pipeline = rm.create_pipeline(&desc).unwrap();
        rm.destroy_pipeline(pipeline).unwrap();
        assert!(rm.destroy_pipeline(pipeline).is_err());
    }
}
