use std::cell::Cell;

use ash::vk;
use vk_mem::Allocation;

use crate::resources::{
    desc::{BindGroupLayoutDesc, BufferBinding, MemoryClass, TextureBinding, TextureInfo},
    handles::BindGroupLayoutHandle,
    usage::Usage,
};

// --- Buffer Resource ---

/// Buffer 资源结构体
///
/// 包含 Vulkan Buffer 对象、内存分配信息以及元数据。
pub struct BufferResource {
    pub buffer: vk::Buffer,
    pub allocation: Allocation,

    /// Buffer 大小（字节）
    pub size: vk::DeviceSize,
    pub usage: Usage,
    pub memory: MemoryClass,

    /// 映射的主机内存指针（Buffer 是 Host Visible 且已映射）
    pub mapped_ptr: Option<*mut u8>,

    pub debug_name: String,
}

// --- Texture Resource ---

/// Texture 资源结构体
///
/// 一个 texture 包含 image、sampler 以及按 usage 创建的 view
pub struct TextureResource {
    pub image: vk::Image,
    pub allocation: Allocation,
    pub sampler: vk::Sampler,

    pub info: TextureInfo,
    /// 创建完成之后 image 所处的 layout，由 usage 决定
    pub layout: vk::ImageLayout,

    /// 覆盖所有 mip 和 layer 的采样 view，只有 shader resource 才有
    pub sampled_view: Option<vk::ImageView>,
    /// 每个 array layer 一个 view，render target 以及 depth stencil 才有
    pub attachment_views: Vec<vk::ImageView>,

    pub debug_name: String,
}

// --- BindGroupLayout Resource ---

pub struct BindGroupLayoutResource {
    pub layout: vk::DescriptorSetLayout,
    pub desc: BindGroupLayoutDesc,
}

// --- BindGroup Resource ---

/// bind group 当前绑定的内容，以及版本信息
///
/// 两个后端共用。bind group 被 in-flight 的帧使用时，更新会生成一个新的版本，
/// 旧版本交给延迟释放队列
#[derive(Debug, Default)]
pub struct BindGroupState {
    pub layout: BindGroupLayoutHandle,
    pub textures: Vec<TextureBinding>,
    pub buffers: Vec<BufferBinding>,
    /// 最近一次被 `set_bind_group` 使用时的 frame id
    ///
    /// 录制命令时只持有共享引用，因此使用 Cell
    pub last_used_frame: Cell<Option<u64>>,
    /// 每次生成新的 descriptor set 都加一
    pub version: u32,
}

impl BindGroupState {
    pub fn new(layout: BindGroupLayoutHandle) -> Self {
        Self {
            layout,
            ..Default::default()
        }
    }

    #[inline]
    pub fn mark_used(&self, frame_id: u64) {
        self.last_used_frame.set(Some(frame_id));
    }

    /// 是否可能被尚未完成的帧引用
    ///
    /// `completed_below`：frame id 小于该值的帧都已经执行完毕
    #[inline]
    pub fn maybe_in_flight(&self, completed_below: u64) -> bool {
        self.last_used_frame.get().is_some_and(|frame| frame >= completed_below)
    }

    /// 按 binding 覆盖已有的 texture 绑定
    pub fn apply_textures(&mut self, textures: &[TextureBinding]) {
        for texture in textures {
            match self.textures.iter_mut().find(|t| t.binding == texture.binding) {
                Some(existing) => *existing = *texture,
                None => self.textures.push(*texture),
            }
        }
    }

    /// 按 binding 覆盖已有的 buffer 绑定
    pub fn apply_buffers(&mut self, buffers: &[BufferBinding]) {
        for buffer in buffers {
            match self.buffers.iter_mut().find(|b| b.binding == buffer.binding) {
                Some(existing) => *existing = *buffer,
                None => self.buffers.push(*buffer),
            }
        }
    }

    /// 切换到新版本之后，旧版本的使用记录不再有意义
    pub fn bump_version(&mut self) {
        self.version = self.version.wrapping_add(1);
        self.last_used_frame.set(None);
    }
}

pub struct BindGroupResource {
    pub set: vk::DescriptorSet,
    pub state: BindGroupState,
    pub debug_name: String,
}

// --- Pipeline Resource ---

pub struct PipelineResource {
    pub layout: vk::PipelineLayout,
    pub pipeline: vk::Pipeline,
    pub push_constant: Option<vk::PushConstantRange>,
    pub bind_group_layouts: Vec<BindGroupLayoutHandle>,
}

/// 等待延迟释放的底层对象
pub enum Retired {
    Buffer(BufferResource),
    Texture(TextureResource),
    BindGroupLayout(vk::DescriptorSetLayout),
    DescriptorSet(vk::DescriptorSet),
    Pipeline(PipelineResource),
}

#[cfg(test)]
mod tests {
    use lumen_pool::Handle;

    use super::*;

    #[test]
    fn apply_overrides_by_binding() {
        let mut state = BindGroupState::new(Handle::from_raw_parts(1, 0));
        state.apply_buffers(&[BufferBinding::whole(0, Handle::from_raw_parts(1, 0))]);
        state.apply_buffers(&[
            BufferBinding::whole(0, Handle::from_raw_parts(2, 0)),
            BufferBinding::whole(3, Handle::from_raw_parts(4, 0)),
        ]);
        assert_eq!(state.buffers.len(), 2);
        assert_eq!(state.buffers[0].buffer, Handle::from_raw_parts(2, 0));

        state.apply_textures(&[TextureBinding {
            binding: 1,
            texture: Handle::from_raw_parts(5, 1),
        }]);
        assert_eq!(state.textures.len(), 1);
    }

    #[test]
    fn in_flight_tracking() {
        let mut state = BindGroupState::new(Handle::INVALID);
        assert!(!state.maybe_in_flight(0));

        state.mark_used(4);
        assert!(state.maybe_in_flight(4));
        assert!(state.maybe_in_flight(3));
        assert!(!state.maybe_in_flight(5));

        state.bump_version();
        assert_eq!(state.version, 1);
        assert!(!state.maybe_in_flight(0));
    }
}
