use ash::vk;

use crate::resources::usage::Transition;

/// 便捷创建 image memory barrier 的结构体
pub struct GfxImageBarrier {
    inner: vk::ImageMemoryBarrier2<'static>,
}

impl Default for GfxImageBarrier {
    fn default() -> Self {
        Self {
            inner: vk::ImageMemoryBarrier2 {
                old_layout: vk::ImageLayout::UNDEFINED,
                new_layout: vk::ImageLayout::UNDEFINED,
                src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                subresource_range: vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::empty(),
                    base_array_layer: 0,
                    layer_count: 1,
                    base_mip_level: 0,
                    level_count: 1,
                },
                ..Default::default()
            },
        }
    }
}

impl GfxImageBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn inner(&self) -> &vk::ImageMemoryBarrier2<'static> {
        &self.inner
    }

    /// builder
    #[inline]
    pub fn layout_transfer(mut self, old_layout: vk::ImageLayout, new_layout: vk::ImageLayout) -> Self {
        self.inner.old_layout = old_layout;
        self.inner.new_layout = new_layout;
        self
    }

    /// builder
    #[inline]
    pub fn src_mask(mut self, src_stage_mask: vk::PipelineStageFlags2, src_access_mask: vk::AccessFlags2) -> Self {
        self.inner.src_stage_mask = src_stage_mask;
        self.inner.src_access_mask = src_access_mask;
        self
    }

    /// builder
    #[inline]
    pub fn dst_mask(mut self, dst_stage_mask: vk::PipelineStageFlags2, dst_access_mask: vk::AccessFlags2) -> Self {
        self.inner.dst_stage_mask = dst_stage_mask;
        self.inner.dst_access_mask = dst_access_mask;
        self
    }

    /// builder
    /// layer 和 miplevel 都使用默认值
    #[inline]
    pub fn image_aspect_flag(mut self, aspect_mask: vk::ImageAspectFlags) -> Self {
        self.inner.subresource_range.aspect_mask = aspect_mask;
        self
    }

    /// builder
    #[inline]
    pub fn subresource_range(mut self, range: vk::ImageSubresourceRange) -> Self {
        self.inner.subresource_range = range;
        self
    }

    /// builder
    #[inline]
    pub fn image(mut self, image: vk::Image) -> Self {
        self.inner.image = image;
        self
    }

    /// 由 usage 表推导出的 image 状态转换
    pub fn from_transition(image: vk::Image, range: vk::ImageSubresourceRange, transition: &Transition) -> Self {
        Self::new()
            .image(image)
            .subresource_range(range)
            .src_mask(transition.src.stage, transition.src.src_access())
            .dst_mask(transition.dst.stage, transition.dst.access)
            .layout_transfer(transition.src.layout, transition.dst.layout)
    }
}

/// 便捷创建 buffer memory barrier 的结构体，默认覆盖整个 buffer
pub struct GfxBufferBarrier {
    inner: vk::BufferMemoryBarrier2<'static>,
}

impl Default for GfxBufferBarrier {
    fn default() -> Self {
        Self {
            inner: vk::BufferMemoryBarrier2 {
                src_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                dst_queue_family_index: vk::QUEUE_FAMILY_IGNORED,
                offset: 0,
                size: vk::WHOLE_SIZE,
                ..Default::default()
            },
        }
    }
}

impl GfxBufferBarrier {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn inner(&self) -> &vk::BufferMemoryBarrier2<'static> {
        &self.inner
    }

    #[inline]
    pub fn src_mask(mut self, src_stage_mask: vk::PipelineStageFlags2, src_access_mask: vk::AccessFlags2) -> Self {
        self.inner.src_stage_mask = src_stage_mask;
        self.inner.src_access_mask = src_access_mask;
        self
    }

    #[inline]
    pub fn dst_mask(mut self, dst_stage_mask: vk::PipelineStageFlags2, dst_access_mask: vk::AccessFlags2) -> Self {
        self.inner.dst_stage_mask = dst_stage_mask;
        self.inner.dst_access_mask = dst_access_mask;
        self
    }

    #[inline]
    pub fn buffer(mut self, buffer: vk::Buffer, offset: vk::DeviceSize, size: vk::DeviceSize) -> Self {
        self.inner.buffer = buffer;
        self.inner.offset = offset;
        self.inner.size = size;
        self
    }
    /// 由 usage 表推导出的 buffer 状态转换，buffer 没有 layout
    pub fn from_transition(
        buffer: vk::Buffer,
        offset: vk::DeviceSize,
        size: vk::DeviceSize,
        transition: &Transition,
    ) -> Self {
        Self::new()
            .buffer(buffer, offset, size)
            .src_mask(transition.src.stage, transition.src.src_access())
            .dst_mask(transition.dst.stage, transition.dst.access)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::resources::usage::{Usage, image_transition};

    #[test]
    fn image_barrier_builder_fills_fields() {
        let range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 1,
            level_count: 3,
            base_array_layer: 0,
            layer_count: 2,
        };
        let barrier = GfxImageBarrier::new()
            .layout_transfer(vk::ImageLayout::UNDEFINED, vk::ImageLayout::TRANSFER_DST_OPTIMAL)
            .src_mask(vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::NONE)
            .dst_mask(vk::PipelineStageFlags2::TRANSFER, vk::AccessFlags2::TRANSFER_WRITE)
            .subresource_range(range);

        let inner = barrier.inner();
        assert_eq!(inner.new_layout, vk::ImageLayout::TRANSFER_DST_OPTIMAL);
        assert_eq!(inner.dst_access_mask, vk::AccessFlags2::TRANSFER_WRITE);
        assert_eq!(inner.subresource_range.level_count, 3);
        assert_eq!(inner.src_queue_family_index, vk::QUEUE_FAMILY_IGNORED);
    }

    #[test]
    fn transition_barrier_uses_usage_table() {
        let transition = image_transition(Usage::RENDER_TARGET, Usage::SHADER_RESOURCE).unwrap();
        let range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };
        let barrier = GfxImageBarrier::from_transition(vk::Image::null(), range, &transition);
        let inner = barrier.inner();
        assert_eq!(inner.old_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(inner.new_layout, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(inner.src_stage_mask, vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT);
        // 读操作不需要出现在 src access 中
        assert_eq!(inner.src_access_mask, vk::AccessFlags2::COLOR_ATTACHMENT_WRITE);
    }

    #[test]
    fn buffer_barrier_defaults_to_whole_size() {
        let barrier = GfxBufferBarrier::new();
        assert_eq!(barrier.inner().size, vk::WHOLE_SIZE);
        assert_eq!(barrier.inner().offset, 0);
    }
}
