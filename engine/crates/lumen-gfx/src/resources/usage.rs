//! usage 到 Vulkan 状态的映射表
//!
//! 所有与 "usage X 意味着什么" 有关的问题都由这里回答：
//! - barrier 两侧的 stage / access / layout
//! - texture 创建后所处的 layout
//! - bind group 中 texture 期望的 layout
//! - 创建 image / buffer 时的 usage flags

use ash::vk;

use crate::{GfxError, GfxResult};

bitflags::bitflags! {
    /// 资源的用途
    ///
    /// 创建资源时可以组合多个 bit；barrier 的两侧必须是单个 bit（或者空，表示 undefined）
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct Usage: u32 {
        const SHADER_RESOURCE = 1 << 0;
        const RENDER_TARGET = 1 << 1;
        const DEPTH_STENCIL = 1 << 2;
        const TRANSFER_SRC = 1 << 3;
        const TRANSFER_DST = 1 << 4;
        const VERTEX_BUFFER = 1 << 5;
        const INDEX_BUFFER = 1 << 6;
        const UNIFORM_BUFFER = 1 << 7;
    }
}

impl Usage {
    /// image 可以使用的 usage
    pub const IMAGE_USAGES: Self = Self::SHADER_RESOURCE
        .union(Self::RENDER_TARGET)
        .union(Self::DEPTH_STENCIL)
        .union(Self::TRANSFER_SRC)
        .union(Self::TRANSFER_DST);

    /// buffer 可以使用的 usage
    pub const BUFFER_USAGES: Self = Self::SHADER_RESOURCE
        .union(Self::TRANSFER_SRC)
        .union(Self::TRANSFER_DST)
        .union(Self::VERTEX_BUFFER)
        .union(Self::INDEX_BUFFER)
        .union(Self::UNIFORM_BUFFER);

    /// 决定 texture 创建 layout 的优先级，越靠前越优先
    const CREATION_PRIORITY: [Self; 5] = [
        Self::DEPTH_STENCIL,
        Self::RENDER_TARGET,
        Self::SHADER_RESOURCE,
        Self::TRANSFER_DST,
        Self::TRANSFER_SRC,
    ];

    #[inline]
    fn is_single(self) -> bool {
        self.bits().count_ones() == 1
    }
}

/// 一次访问所对应的同步状态
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct UsageState {
    pub stage: vk::PipelineStageFlags2,
    pub access: vk::AccessFlags2,
    /// 只对 image 有意义
    pub layout: vk::ImageLayout,
}

// 常量定义
impl UsageState {
    #[inline]
    pub const fn new(stage: vk::PipelineStageFlags2, access: vk::AccessFlags2, layout: vk::ImageLayout) -> Self {
        Self { stage, access, layout }
    }

    /// 未定义状态（初始状态或不关心内容）
    pub const UNDEFINED: Self =
        Self::new(vk::PipelineStageFlags2::TOP_OF_PIPE, vk::AccessFlags2::NONE, vk::ImageLayout::UNDEFINED);

    const SHADER_STAGES: vk::PipelineStageFlags2 = vk::PipelineStageFlags2::from_raw(
        vk::PipelineStageFlags2::VERTEX_SHADER.as_raw()
            | vk::PipelineStageFlags2::FRAGMENT_SHADER.as_raw()
            | vk::PipelineStageFlags2::COMPUTE_SHADER.as_raw(),
    );

    const DEPTH_STAGES: vk::PipelineStageFlags2 = vk::PipelineStageFlags2::from_raw(
        vk::PipelineStageFlags2::EARLY_FRAGMENT_TESTS.as_raw() | vk::PipelineStageFlags2::LATE_FRAGMENT_TESTS.as_raw(),
    );

    pub const SHADER_READ_IMAGE: Self =
        Self::new(Self::SHADER_STAGES, vk::AccessFlags2::SHADER_SAMPLED_READ, vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);

    pub const SHADER_READ_BUFFER: Self =
        Self::new(Self::SHADER_STAGES, vk::AccessFlags2::SHADER_STORAGE_READ, vk::ImageLayout::UNDEFINED);

    pub const COLOR_ATTACHMENT: Self = Self::new(
        vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
        vk::AccessFlags2::from_raw(
            vk::AccessFlags2::COLOR_ATTACHMENT_READ.as_raw() | vk::AccessFlags2::COLOR_ATTACHMENT_WRITE.as_raw(),
        ),
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    );

    pub const DEPTH_ATTACHMENT: Self = Self::new(
        Self::DEPTH_STAGES,
        vk::AccessFlags2::from_raw(
            vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ.as_raw()
                | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw(),
        ),
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    );

    pub const TRANSFER_SRC: Self = Self::new(
        vk::PipelineStageFlags2::TRANSFER,
        vk::AccessFlags2::TRANSFER_READ,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
    );

    pub const TRANSFER_DST: Self = Self::new(
        vk::PipelineStageFlags2::TRANSFER,
        vk::AccessFlags2::TRANSFER_WRITE,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    );

    pub const VERTEX_INPUT: Self = Self::new(
        vk::PipelineStageFlags2::VERTEX_ATTRIBUTE_INPUT,
        vk::AccessFlags2::VERTEX_ATTRIBUTE_READ,
        vk::ImageLayout::UNDEFINED,
    );

    pub const INDEX_INPUT: Self =
        Self::new(vk::PipelineStageFlags2::INDEX_INPUT, vk::AccessFlags2::INDEX_READ, vk::ImageLayout::UNDEFINED);

    pub const UNIFORM_READ: Self =
        Self::new(Self::SHADER_STAGES, vk::AccessFlags2::UNIFORM_READ, vk::ImageLayout::UNDEFINED);

    /// swapchain image 呈现时的状态，不属于任何 usage
    pub const PRESENT: Self =
        Self::new(vk::PipelineStageFlags2::BOTTOM_OF_PIPE, vk::AccessFlags2::NONE, vk::ImageLayout::PRESENT_SRC_KHR);

    const READ_ACCESS: vk::AccessFlags2 = vk::AccessFlags2::from_raw(
        vk::AccessFlags2::SHADER_SAMPLED_READ.as_raw()
            | vk::AccessFlags2::SHADER_STORAGE_READ.as_raw()
            | vk::AccessFlags2::TRANSFER_READ.as_raw()
            | vk::AccessFlags2::VERTEX_ATTRIBUTE_READ.as_raw()
            | vk::AccessFlags2::INDEX_READ.as_raw()
            | vk::AccessFlags2::UNIFORM_READ.as_raw()
            | vk::AccessFlags2::COLOR_ATTACHMENT_READ.as_raw()
            | vk::AccessFlags2::DEPTH_STENCIL_ATTACHMENT_READ.as_raw(),
    );

    /// 作为 barrier src 时的 access：读操作不需要 make available
    #[inline]
    pub fn src_access(&self) -> vk::AccessFlags2 {
        self.access & !Self::READ_ACCESS
    }
}

// 查表
impl Usage {
    const IMAGE_TABLE: [(Self, UsageState); 5] = [
        (Self::SHADER_RESOURCE, UsageState::SHADER_READ_IMAGE),
        (Self::RENDER_TARGET, UsageState::COLOR_ATTACHMENT),
        (Self::DEPTH_STENCIL, UsageState::DEPTH_ATTACHMENT),
        (Self::TRANSFER_SRC, UsageState::TRANSFER_SRC),
        (Self::TRANSFER_DST, UsageState::TRANSFER_DST),
    ];

    const BUFFER_TABLE: [(Self, UsageState); 6] = [
        (Self::SHADER_RESOURCE, UsageState::SHADER_READ_BUFFER),
        (Self::TRANSFER_SRC, UsageState::TRANSFER_SRC),
        (Self::TRANSFER_DST, UsageState::TRANSFER_DST),
        (Self::VERTEX_BUFFER, UsageState::VERTEX_INPUT),
        (Self::INDEX_BUFFER, UsageState::INDEX_INPUT),
        (Self::UNIFORM_BUFFER, UsageState::UNIFORM_READ),
    ];

    /// image 上单个 usage bit 对应的状态，空 usage 对应 undefined
    pub fn image_state(self) -> Option<UsageState> {
        Self::lookup(self, &Self::IMAGE_TABLE)
    }

    /// buffer 上单个 usage bit 对应的状态，空 usage 对应 undefined
    pub fn buffer_state(self) -> Option<UsageState> {
        Self::lookup(self, &Self::BUFFER_TABLE)
    }

    fn lookup(self, table: &[(Self, UsageState)]) -> Option<UsageState> {
        if self.is_empty() {
            return Some(UsageState::UNDEFINED);
        }
        if !self.is_single() {
            return None;
        }
        table.iter().find(|(usage, _)| *usage == self).map(|(_, state)| *state)
    }

    /// 多个 usage 组合时，texture 创建后所处状态对应的 usage
    pub fn primary_image_usage(self) -> Self {
        Self::CREATION_PRIORITY.into_iter().find(|usage| self.contains(*usage)).unwrap_or(Self::empty())
    }

    /// texture 创建后被转换到的 layout
    pub fn creation_layout(self) -> vk::ImageLayout {
        self.primary_image_usage()
            .image_state()
            .map_or(vk::ImageLayout::UNDEFINED, |state| state.layout)
    }

    /// bind group 中 texture descriptor 期望的 layout
    #[inline]
    pub const fn bind_group_texture_layout() -> vk::ImageLayout {
        UsageState::SHADER_READ_IMAGE.layout
    }

    pub fn to_vk_image_usage(self) -> vk::ImageUsageFlags {
        let mut flags = vk::ImageUsageFlags::empty();
        if self.contains(Self::SHADER_RESOURCE) {
            flags |= vk::ImageUsageFlags::SAMPLED;
        }
        if self.contains(Self::RENDER_TARGET) {
            flags |= vk::ImageUsageFlags::COLOR_ATTACHMENT;
        }
        if self.contains(Self::DEPTH_STENCIL) {
            flags |= vk::ImageUsageFlags::DEPTH_STENCIL_ATTACHMENT;
        }
        if self.contains(Self::TRANSFER_SRC) {
            flags |= vk::ImageUsageFlags::TRANSFER_SRC;
        }
        if self.contains(Self::TRANSFER_DST) {
            flags |= vk::ImageUsageFlags::TRANSFER_DST;
        }
        flags
    }

    pub fn to_vk_buffer_usage(self) -> vk::BufferUsageFlags {
        let mut flags = vk::BufferUsageFlags::empty();
        if self.contains(Self::SHADER_RESOURCE) {
            flags |= vk::BufferUsageFlags::STORAGE_BUFFER;
        }
        if self.contains(Self::TRANSFER_SRC) {
            flags |= vk::BufferUsageFlags::TRANSFER_SRC;
        }
        if self.contains(Self::TRANSFER_DST) {
            flags |= vk::BufferUsageFlags::TRANSFER_DST;
        }
        if self.contains(Self::VERTEX_BUFFER) {
            flags |= vk::BufferUsageFlags::VERTEX_BUFFER;
        }
        if self.contains(Self::INDEX_BUFFER) {
            flags |= vk::BufferUsageFlags::INDEX_BUFFER;
        }
        if self.contains(Self::UNIFORM_BUFFER) {
            flags |= vk::BufferUsageFlags::UNIFORM_BUFFER;
        }
        flags
    }
}

/// 一次 barrier 两侧的状态
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Transition {
    pub src: UsageState,
    pub dst: UsageState,
}

/// image 从 `src` 转换到 `dst`
///
/// 两侧都必须是单个 bit；`dst` 不能为空
pub fn image_transition(src: Usage, dst: Usage) -> GfxResult<Transition> {
    transition(src, dst, Usage::image_state)
}

/// buffer 从 `src` 转换到 `dst`，规则与 image 相同
pub fn buffer_transition(src: Usage, dst: Usage) -> GfxResult<Transition> {
    transition(src, dst, Usage::buffer_state)
}

fn transition(src: Usage, dst: Usage, lookup: fn(Usage) -> Option<UsageState>) -> GfxResult<Transition> {
    let unsupported = || GfxError::UnsupportedTransition { src, dst };
    if dst.is_empty() {
        return Err(unsupported());
    }
    let src_state = lookup(src).ok_or_else(unsupported)?;
    let dst_state = lookup(dst).ok_or_else(unsupported)?;
    Ok(Transition {
        src: src_state,
        dst: dst_state,
    })
}

/// mip 和 layer 数量的 "剩余全部" 标记
pub const REMAINING: u32 = u32::MAX;

/// 将 base / count（count 可以是 [`REMAINING`]）解析为具体的 subresource range
pub fn resolve_subresource_range(
    aspect_mask: vk::ImageAspectFlags,
    total_mips: u32,
    total_layers: u32,
    base_mip: u32,
    mip_count: u32,
    base_layer: u32,
    layer_count: u32,
) -> GfxResult<vk::ImageSubresourceRange> {
    let resolve = |base: u32, count: u32, total: u32| -> GfxResult<u32> {
        if base >= total {
            return Err(GfxError::OutOfBounds {
                offset: base as u64,
                len: 1,
                size: total as u64,
            });
        }
        if count == REMAINING {
            return Ok(total - base);
        }
        if count == 0 || base as u64 + count as u64 > total as u64 {
            return Err(GfxError::OutOfBounds {
                offset: base as u64,
                len: count as u64,
                size: total as u64,
            });
        }
        Ok(count)
    };

    Ok(vk::ImageSubresourceRange {
        aspect_mask,
        base_mip_level: base_mip,
        level_count: resolve(base_mip, mip_count, total_mips)?,
        base_array_layer: base_layer,
        layer_count: resolve(base_layer, layer_count, total_layers)?,
    })
}

/// format 对应的 aspect
pub fn format_aspect(format: vk::Format) -> vk::ImageAspectFlags {
    match format {
        vk::Format::D16_UNORM | vk::Format::D32_SFLOAT | vk::Format::X8_D24_UNORM_PACK32 => {
            vk::ImageAspectFlags::DEPTH
        }
        vk::Format::D16_UNORM_S8_UINT | vk::Format::D24_UNORM_S8_UINT | vk::Format::D32_SFLOAT_S8_UINT => {
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        }
        vk::Format::S8_UINT => vk::ImageAspectFlags::STENCIL,
        _ => vk::ImageAspectFlags::COLOR,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SINGLE_BITS: [Usage; 8] = [
        Usage::SHADER_RESOURCE,
        Usage::RENDER_TARGET,
        Usage::DEPTH_STENCIL,
        Usage::TRANSFER_SRC,
        Usage::TRANSFER_DST,
        Usage::VERTEX_BUFFER,
        Usage::INDEX_BUFFER,
        Usage::UNIFORM_BUFFER,
    ];

    fn sources() -> impl Iterator<Item = Usage> {
        std::iter::once(Usage::empty()).chain(SINGLE_BITS)
    }

    #[test]
    fn every_supported_image_pair_has_non_zero_stages() {
        let mut supported = 0;
        for src in sources() {
            for dst in SINGLE_BITS {
                let expect_ok = (src.is_empty() || Usage::IMAGE_USAGES.contains(src)) && Usage::IMAGE_USAGES.contains(dst);
                match image_transition(src, dst) {
                    Ok(t) => {
                        assert!(expect_ok, "{:?} -> {:?} should be unsupported", src, dst);
                        assert!(!t.src.stage.is_empty());
                        assert!(!t.dst.stage.is_empty());
                        assert_ne!(t.dst.layout, vk::ImageLayout::UNDEFINED);
                        supported += 1;
                    }
                    Err(GfxError::UnsupportedTransition { .. }) => assert!(!expect_ok, "{:?} -> {:?}", src, dst),
                    Err(e) => panic!("unexpected error {:?}", e),
                }
            }
        }
        // (undefined + 5 种 image usage) * 5 种 image usage
        assert_eq!(supported, 30);
    }

    #[test]
    fn every_supported_buffer_pair_has_non_zero_stages() {
        for src in sources() {
            for dst in SINGLE_BITS {
                let expect_ok =
                    (src.is_empty() || Usage::BUFFER_USAGES.contains(src)) && Usage::BUFFER_USAGES.contains(dst);
                let result = buffer_transition(src, dst);
                assert_eq!(result.is_ok(), expect_ok, "{:?} -> {:?}", src, dst);
                if let Ok(t) = result {
                    assert!(!t.src.stage.is_empty());
                    assert!(!t.dst.stage.is_empty());
                }
            }
        }
    }

    #[test]
    fn undefined_is_only_a_source() {
        assert!(image_transition(Usage::empty(), Usage::TRANSFER_DST).is_ok());
        assert!(matches!(
            image_transition(Usage::SHADER_RESOURCE, Usage::empty()),
            Err(GfxError::UnsupportedTransition { .. })
        ));
    }

    #[test]
    fn multi_bit_usage_is_rejected() {
        let combined = Usage::SHADER_RESOURCE | Usage::RENDER_TARGET;
        assert!(image_transition(combined, Usage::TRANSFER_SRC).is_err());
        assert!(image_transition(Usage::TRANSFER_SRC, combined).is_err());
    }

    #[test]
    fn buffer_only_bits_are_not_image_states() {
        assert!(image_transition(Usage::TRANSFER_DST, Usage::VERTEX_BUFFER).is_err());
        assert!(image_transition(Usage::UNIFORM_BUFFER, Usage::SHADER_RESOURCE).is_err());
    }

    #[test]
    fn src_access_drops_reads() {
        assert_eq!(UsageState::TRANSFER_SRC.src_access(), vk::AccessFlags2::NONE);
        assert_eq!(UsageState::COLOR_ATTACHMENT.src_access(), vk::AccessFlags2::COLOR_ATTACHMENT_WRITE);
    }

    #[test]
    fn creation_layout_follows_priority() {
        assert_eq!(Usage::SHADER_RESOURCE.creation_layout(), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
        assert_eq!(
            (Usage::SHADER_RESOURCE | Usage::RENDER_TARGET).creation_layout(),
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
        assert_eq!(
            (Usage::SHADER_RESOURCE | Usage::DEPTH_STENCIL).creation_layout(),
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );
        assert_eq!(
            (Usage::TRANSFER_SRC | Usage::TRANSFER_DST).creation_layout(),
            vk::ImageLayout::TRANSFER_DST_OPTIMAL
        );
        assert_eq!(Usage::empty().creation_layout(), vk::ImageLayout::UNDEFINED);
        assert_eq!(Usage::bind_group_texture_layout(), vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL);
    }

    #[test]
    fn vk_usage_flags() {
        let image = (Usage::SHADER_RESOURCE | Usage::TRANSFER_DST).to_vk_image_usage();
        assert_eq!(image, vk::ImageUsageFlags::SAMPLED | vk::ImageUsageFlags::TRANSFER_DST);

        let buffer = (Usage::UNIFORM_BUFFER | Usage::VERTEX_BUFFER).to_vk_buffer_usage();
        assert_eq!(buffer, vk::BufferUsageFlags::UNIFORM_BUFFER | vk::BufferUsageFlags::VERTEX_BUFFER);
    }

    #[test]
    fn remaining_extends_to_full_extent() {
        let range = resolve_subresource_range(vk::ImageAspectFlags::COLOR, 9, 6, 2, REMAINING, 1, REMAINING).unwrap();
        assert_eq!(range.base_mip_level, 2);
        assert_eq!(range.level_count, 7);
        assert_eq!(range.base_array_layer, 1);
        assert_eq!(range.layer_count, 5);
    }

    #[test]
    fn explicit_counts_are_bounds_checked() {
        let ok = resolve_subresource_range(vk::ImageAspectFlags::COLOR, 4, 1, 1, 3, 0, 1).unwrap();
        assert_eq!(ok.level_count, 3);

        assert!(matches!(
            resolve_subresource_range(vk::ImageAspectFlags::COLOR, 4, 1, 1, 4, 0, 1),
            Err(GfxError::OutOfBounds { .. })
        ));
        assert!(resolve_subresource_range(vk::ImageAspectFlags::COLOR, 4, 1, 4, REMAINING, 0, 1).is_err());
        assert!(resolve_subresource_range(vk::ImageAspectFlags::COLOR, 4, 1, 0, 0, 0, 1).is_err());
    }

    #[test]
    fn depth_formats_have_depth_aspect() {
        assert_eq!(format_aspect(vk::Format::D32_SFLOAT), vk::ImageAspectFlags::DEPTH);
        assert_eq!(
            format_aspect(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
        assert_eq!(format_aspect(vk::Format::R8G8B8A8_UNORM), vk::ImageAspectFlags::COLOR);
    }
}
