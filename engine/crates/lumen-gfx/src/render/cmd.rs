//! 通过 handle 录制命令
//!
//! [`CommandBuffer`] 借用 device 的资源管理器与 swapchain，录制期间资源不能被创建或销毁。
//! 所有 handle 都在录制时解析，无效时返回 [`GfxError::InvalidHandle`]。

use ash::vk;

use crate::{
    GfxError, GfxResult,
    basic::color::LabelColor,
    commands::{
        barrier::{GfxBufferBarrier, GfxImageBarrier},
        command_buffer::GfxCommandBuffer,
    },
    resources::{
        handles::{BindGroupHandle, BufferHandle, PipelineHandle, TextureHandle},
        manager::ResourceManager,
        resource_data::{PipelineResource, TextureResource},
        usage::{Usage, buffer_transition, image_transition, resolve_subresource_range},
        vulkan_manager::VulkanResourceManager,
    },
    swapchain::render_swapchain::GfxSwapchain,
};

/// 颜色 attachment；`clear` 为 None 时保留原有内容
#[derive(Clone, Copy, Debug)]
pub struct ColorAttachment {
    pub texture: TextureHandle,
    pub layer: u32,
    pub clear: Option<glam::Vec4>,
}

/// depth stencil attachment；清除时 stencil 固定清为 0
#[derive(Clone, Copy, Debug)]
pub struct DepthAttachment {
    pub texture: TextureHandle,
    pub layer: u32,
    pub clear: Option<f32>,
}

fn full_rect(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D::default(),
        extent,
    }
}

fn load_op(clear: bool) -> vk::AttachmentLoadOp {
    if clear { vk::AttachmentLoadOp::CLEAR } else { vk::AttachmentLoadOp::LOAD }
}

/// dynamic offset 的数量需要和 layout 中 dynamic buffer 的数量一致，并且满足对齐要求
fn check_dynamic_offsets(expected: usize, offsets: &[u32], align: vk::DeviceSize) -> GfxResult<()> {
    if offsets.len() != expected {
        return Err(GfxError::IncompatibleDescriptor(format!(
            "{} dynamic offsets given, layout expects {}",
            offsets.len(),
            expected
        )));
    }
    if let Some(offset) = offsets.iter().find(|offset| **offset as vk::DeviceSize % align != 0) {
        return Err(GfxError::IncompatibleDescriptor(format!("dynamic offset {} is not aligned to {}", offset, align)));
    }
    Ok(())
}

/// push constant 需要落在 pipeline 声明的范围之内
fn check_push_constants(range: Option<vk::PushConstantRange>, offset: u32, len: usize) -> GfxResult<()> {
    let Some(range) = range else {
        return Err(GfxError::IncompatibleDescriptor("pipeline has no push constant".to_string()));
    };
    let end = offset as u64 + len as u64;
    if offset < range.offset || end > (range.offset + range.size) as u64 {
        return Err(GfxError::OutOfBounds {
            offset: offset as u64,
            len: len as u64,
            size: (range.offset + range.size) as u64,
        });
    }
    Ok(())
}

pub struct CommandBuffer<'a> {
    cmd: &'a GfxCommandBuffer,
    resources: &'a VulkanResourceManager,
    swapchain: &'a GfxSwapchain,
    frame_id: u64,
    min_ubo_offset_align: vk::DeviceSize,

    /// 最近一次 set_pipeline 的 pipeline，bind group 与 push constant 需要它的 layout
    pipeline: Option<PipelineHandle>,
}

// new & init
impl<'a> CommandBuffer<'a> {
    pub(crate) fn new(
        cmd: &'a GfxCommandBuffer,
        resources: &'a VulkanResourceManager,
        swapchain: &'a GfxSwapchain,
        frame_id: u64,
    ) -> Self {
        Self {
            cmd,
            resources,
            swapchain,
            frame_id,
            min_ubo_offset_align: resources.core().min_ubo_offset_align(),
            pipeline: None,
        }
    }
}

// getters
impl CommandBuffer<'_> {
    /// 底层的命令缓冲，用于录制这里没有封装的命令
    #[inline]
    pub fn gfx_cmd(&self) -> &GfxCommandBuffer {
        self.cmd
    }

    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }
}

// tools
impl CommandBuffer<'_> {
    fn bound_pipeline(&self) -> GfxResult<&PipelineResource> {
        let pipeline = self
            .pipeline
            .ok_or_else(|| GfxError::IncompatibleDescriptor("no pipeline is bound".to_string()))?;
        self.resources.pipeline_resource(pipeline)
    }

    fn attachment_view(texture: &TextureResource, layer: u32, usage: Usage) -> GfxResult<vk::ImageView> {
        if !texture.info.usage.contains(usage) {
            return Err(GfxError::IncompatibleDescriptor(format!(
                "texture {} cannot be used as {:?}",
                texture.debug_name, usage
            )));
        }
        texture.attachment_views.get(layer as usize).copied().ok_or(GfxError::OutOfBounds {
            offset: layer as u64,
            len: 1,
            size: texture.attachment_views.len() as u64,
        })
    }

    /// 返回 attachment 信息，以及 format 是否带 stencil
    fn depth_attachment_info(&self, depth: &DepthAttachment) -> GfxResult<(vk::RenderingAttachmentInfo<'static>, bool)> {
        let texture = self.resources.texture_resource(depth.texture)?;
        let view = Self::attachment_view(texture, depth.layer, Usage::DEPTH_STENCIL)?;
        let mut info = vk::RenderingAttachmentInfo::default()
            .image_view(view)
            .image_layout(texture.layout)
            .load_op(load_op(depth.clear.is_some()))
            .store_op(vk::AttachmentStoreOp::STORE);
        if let Some(clear) = depth.clear {
            info = info.clear_value(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: clear,
                    stencil: 0,
                },
            });
        }
        Ok((info, texture.info.aspect.contains(vk::ImageAspectFlags::STENCIL)))
    }

    fn color_attachment_info(
        view: vk::ImageView,
        layout: vk::ImageLayout,
        clear: Option<glam::Vec4>,
    ) -> vk::RenderingAttachmentInfo<'static> {
        let info = vk::RenderingAttachmentInfo::default()
            .image_view(view)
            .image_layout(layout)
            .load_op(load_op(clear.is_some()))
            .store_op(vk::AttachmentStoreOp::STORE);
        match clear {
            Some(color) => info.clear_value(vk::ClearValue {
                color: vk::ClearColorValue {
                    float32: color.to_array(),
                },
            }),
            None => info,
        }
    }

    fn begin_rendering_with(
        &self,
        extent: vk::Extent2D,
        colors: &[vk::RenderingAttachmentInfo],
        depth: Option<&DepthAttachment>,
    ) -> GfxResult<()> {
        let depth_info = depth.map(|depth| self.depth_attachment_info(depth)).transpose()?;
        let mut rendering_info = vk::RenderingInfo::default()
            .render_area(full_rect(extent))
            .layer_count(1)
            .color_attachments(colors);
        if let Some((info, has_stencil)) = depth_info.as_ref() {
            rendering_info = rendering_info.depth_attachment(info);
            if *has_stencil {
                rendering_info = rendering_info.stencil_attachment(info);
            }
        }
        self.cmd.cmd_begin_rendering(&rendering_info);
        Ok(())
    }
}

// rendering
impl CommandBuffer<'_> {
    /// 渲染到 texture，render area 为第一个 attachment 的尺寸
    ///
    /// attachment 需要处于创建时的 layout
    pub fn begin_rendering(&self, colors: &[ColorAttachment], depth: Option<&DepthAttachment>) -> GfxResult<()> {
        let mut extent = None;
        let color_infos = colors
            .iter()
            .map(|color| {
                let texture = self.resources.texture_resource(color.texture)?;
                let view = Self::attachment_view(texture, color.layer, Usage::RENDER_TARGET)?;
                extent.get_or_insert(vk::Extent2D {
                    width: texture.info.width,
                    height: texture.info.height,
                });
                Ok(Self::color_attachment_info(view, texture.layout, color.clear))
            })
            .collect::<GfxResult<Vec<_>>>()?;
        let extent = match (extent, depth) {
            (Some(extent), _) => extent,
            (None, Some(depth)) => {
                let info = self.resources.texture_info(depth.texture)?;
                vk::Extent2D {
                    width: info.width,
                    height: info.height,
                }
            }
            (None, None) => {
                return Err(GfxError::IncompatibleDescriptor("rendering needs at least one attachment".to_string()));
            }
        };

        self.begin_rendering_with(extent, &color_infos, depth)
    }

    /// 渲染到当前的 swapchain image
    pub fn begin_rendering_swapchain(&self, clear: Option<glam::Vec4>, depth: Option<&DepthAttachment>) -> GfxResult<()> {
        let color = Self::color_attachment_info(
            self.swapchain.current_image_view(),
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
            clear,
        );
        self.begin_rendering_with(self.swapchain.extent(), std::slice::from_ref(&color), depth)
    }

    #[inline]
    pub fn end_rendering(&self) {
        self.cmd.cmd_end_rendering();
    }
}

// barrier
impl CommandBuffer<'_> {
    /// `mip_count` 与 `layer_count` 可以是 [`crate::resources::usage::REMAINING`]
    #[allow(clippy::too_many_arguments)]
    pub fn image_barrier(
        &self,
        texture: TextureHandle,
        src: Usage,
        dst: Usage,
        base_mip: u32,
        mip_count: u32,
        base_layer: u32,
        layer_count: u32,
    ) -> GfxResult<()> {
        let texture = self.resources.texture_resource(texture)?;
        let transition = image_transition(src, dst)?;
        let range = resolve_subresource_range(
            texture.info.aspect,
            texture.info.num_mip_levels,
            texture.info.num_layers,
            base_mip,
            mip_count,
            base_layer,
            layer_count,
        )?;
        let barrier = GfxImageBarrier::from_transition(texture.image, range, &transition);
        self.cmd.image_memory_barrier(vk::DependencyFlags::empty(), std::slice::from_ref(&barrier));
        Ok(())
    }

    /// 覆盖整个 buffer
    pub fn buffer_barrier(&self, buffer: BufferHandle, src: Usage, dst: Usage) -> GfxResult<()> {
        let buffer = self.resources.buffer_resource(buffer)?;
        let transition = buffer_transition(src, dst)?;
        let barrier = GfxBufferBarrier::from_transition(buffer.buffer, 0, vk::WHOLE_SIZE, &transition);
        self.cmd.buffer_memory_barrier(vk::DependencyFlags::empty(), std::slice::from_ref(&barrier));
        Ok(())
    }
}

// 状态设置
impl CommandBuffer<'_> {
    pub fn set_pipeline(&mut self, pipeline: PipelineHandle) -> GfxResult<()> {
        let resource = self.resources.pipeline_resource(pipeline)?;
        self.cmd.cmd_bind_pipeline(vk::PipelineBindPoint::GRAPHICS, resource.pipeline);
        self.pipeline = Some(pipeline);
        Ok(())
    }

    /// 绑定到 `set_index`，同时记录 bind group 在本帧被使用
    pub fn set_bind_group(&self, set_index: u32, group: BindGroupHandle, dynamic_offsets: &[u32]) -> GfxResult<()> {
        let pipeline = self.bound_pipeline()?;
        let resource = self.resources.bind_group_resource(group)?;
        let layout = self.resources.bind_group_layout_resource(resource.state.layout)?;
        if pipeline.bind_group_layouts.get(set_index as usize) != Some(&resource.state.layout) {
            return Err(GfxError::IncompatibleDescriptor(format!(
                "bind group {} does not match set {} of the bound pipeline",
                resource.debug_name, set_index
            )));
        }
        check_dynamic_offsets(layout.desc.dynamic_buffer_count(), dynamic_offsets, self.min_ubo_offset_align)?;

        self.resources.mark_bind_group_used(group, self.frame_id)?;
        self.cmd.cmd_bind_descriptor_sets(
            vk::PipelineBindPoint::GRAPHICS,
            pipeline.layout,
            set_index,
            std::slice::from_ref(&resource.set),
            dynamic_offsets,
        );
        Ok(())
    }

    pub fn push_constants(&self, offset: u32, data: &[u8]) -> GfxResult<()> {
        let pipeline = self.bound_pipeline()?;
        check_push_constants(pipeline.push_constant, offset, data.len())?;
        let stages = pipeline.push_constant.map_or(vk::ShaderStageFlags::empty(), |range| range.stage_flags);
        self.cmd.cmd_push_constants(pipeline.layout, stages, offset, data);
        Ok(())
    }

    pub fn set_vertex_buffer(&self, binding: u32, buffer: BufferHandle, offset: u64) -> GfxResult<()> {
        let buffer = self.resources.buffer_resource(buffer)?;
        self.cmd.cmd_bind_vertex_buffers(binding, &[buffer.buffer], &[offset]);
        Ok(())
    }

    pub fn set_index_buffer(&self, buffer: BufferHandle, offset: u64, index_type: vk::IndexType) -> GfxResult<()> {
        let buffer = self.resources.buffer_resource(buffer)?;
        self.cmd.cmd_bind_index_buffer(buffer.buffer, offset, index_type);
        Ok(())
    }

    #[inline]
    pub fn set_scissor(&self, scissor: vk::Rect2D) {
        self.cmd.cmd_set_scissor(0, std::slice::from_ref(&scissor));
    }

    #[inline]
    pub fn set_viewport(&self, viewport: vk::Viewport) {
        self.cmd.cmd_set_viewport(0, std::slice::from_ref(&viewport));
    }

    /// viewport 与 scissor 都覆盖整个 swapchain，viewport 的 y 轴翻转向上
    pub fn set_full_viewport(&self) {
        let extent = self.swapchain.extent();
        self.set_viewport(vk::Viewport {
            x: 0.0,
            y: extent.height as f32,
            width: extent.width as f32,
            height: -(extent.height as f32),
            min_depth: 0.0,
            max_depth: 1.0,
        });
        self.set_scissor(full_rect(extent));
    }
}

// draw
impl CommandBuffer<'_> {
    #[inline]
    pub fn draw(&self, vertex_count: u32, instance_count: u32, first_vertex: u32, first_instance: u32) {
        self.cmd.cmd_draw(vertex_count, instance_count, first_vertex, first_instance);
    }

    #[inline]
    pub fn draw_indexed(
        &self,
        index_count: u32,
        instance_count: u32,
        first_index: u32,
        vertex_offset: i32,
        first_instance: u32,
    ) {
        self.cmd.cmd_draw_indexed(index_count, instance_count, first_index, vertex_offset, first_instance);
    }
}

// debug
impl CommandBuffer<'_> {
    #[inline]
    pub fn begin_label(&self, name: &str) {
        self.cmd.begin_label(name, LabelColor::COLOR_CMD);
    }

    #[inline]
    pub fn end_label(&self) {
        self.cmd.end_label();
    }

    #[inline]
    pub fn insert_label(&self, name: &str) {
        self.cmd.insert_label(name, LabelColor::COLOR_CMD);
    }

    /// 标记出错的位置，便于在 RenderDoc 中定位
    pub fn insert_error_label(&self, error: &GfxError) {
        self.cmd.insert_label(&format!("error: {}", error), LabelColor::COLOR_ERROR);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dynamic_offsets_count_and_alignment() {
        assert!(check_dynamic_offsets(1, &[256], 256).is_ok());
        assert!(check_dynamic_offsets(0, &[], 256).is_ok());
        assert!(matches!(check_dynamic_offsets(2, &[0], 256), Err(GfxError::IncompatibleDescriptor(_))));
        assert!(matches!(check_dynamic_offsets(1, &[64], 256), Err(GfxError::IncompatibleDescriptor(_))));
    }

    #[test]
    fn push_constants_stay_inside_range() {
        let range = vk::PushConstantRange {
            stage_flags: vk::ShaderStageFlags::VERTEX,
            offset: 0,
            size: 64,
        };
        assert!(check_push_constants(Some(range), 0, 64).is_ok());
        assert!(check_push_constants(Some(range), 48, 16).is_ok());
        assert!(matches!(check_push_constants(Some(range), 48, 32), Err(GfxError::OutOfBounds { .. })));
        assert!(matches!(check_push_constants(None, 0, 4), Err(GfxError::IncompatibleDescriptor(_))));
    }

    #[test]
    fn load_op_follows_clear() {
        assert_eq!(load_op(true), vk::AttachmentLoadOp::CLEAR);
        assert_eq!(load_op(false), vk::AttachmentLoadOp::LOAD);
    }
}
