use std::convert::identity;

use ash::vk;

/// 图形管线的固定功能状态
///
/// 使用 dynamic rendering，因此 attachment 的格式直接记录在这里
#[derive(Clone, Debug)]
pub struct GraphicsState {
    pub color_formats: Vec<vk::Format>,
    /// undefined 表示不使用 depth attachment
    pub depth_format: vk::Format,
    pub stencil_format: vk::Format,

    pub vertex_bindings: Vec<vk::VertexInputBindingDescription>,
    pub vertex_attributes: Vec<vk::VertexInputAttributeDescription>,
    pub topology: vk::PrimitiveTopology,

    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub samples: vk::SampleCountFlags,

    /// 为空时，每个 color attachment 使用不混合、写入全部通道的默认状态
    pub blend_states: Vec<vk::PipelineColorBlendAttachmentState>,
    pub blend_constants: [f32; 4],

    /// None 表示关闭深度测试
    pub depth_test: Option<vk::CompareOp>,
    pub depth_write: bool,
    pub stencil_test: bool,

    pub dynamic_states: Vec<vk::DynamicState>,
}

impl Default for GraphicsState {
    fn default() -> Self {
        Self {
            color_formats: vec![],
            depth_format: vk::Format::UNDEFINED,
            stencil_format: vk::Format::UNDEFINED,

            vertex_bindings: vec![],
            vertex_attributes: vec![],
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,

            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            // 按照 OpenGL 的传统，将 CCW 视为 front face
            front_face: vk::FrontFace::COUNTER_CLOCKWISE,
            samples: vk::SampleCountFlags::TYPE_1,

            blend_states: vec![],
            blend_constants: [0.0; 4],

            depth_test: Some(vk::CompareOp::LESS),
            depth_write: true,
            stencil_test: false,

            dynamic_states: vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR],
        }
    }
}

// builder
impl GraphicsState {
    #[inline]
    pub fn attach_info(mut self, color_formats: Vec<vk::Format>, depth_format: Option<vk::Format>) -> Self {
        self.color_formats = color_formats;
        self.depth_format = depth_format.unwrap_or(vk::Format::UNDEFINED);
        self
    }

    #[inline]
    pub fn vertex_input(
        mut self,
        bindings: Vec<vk::VertexInputBindingDescription>,
        attributes: Vec<vk::VertexInputAttributeDescription>,
    ) -> Self {
        self.vertex_bindings = bindings;
        self.vertex_attributes = attributes;
        self
    }

    #[inline]
    pub fn cull_mode(mut self, mode: vk::CullModeFlags, front_face: vk::FrontFace) -> Self {
        self.cull_mode = mode;
        self.front_face = front_face;
        self
    }

    #[inline]
    pub fn depth_test(mut self, op: Option<vk::CompareOp>, depth_write: bool) -> Self {
        self.depth_test = op;
        self.depth_write = depth_write;
        self
    }

    /// 为每个 color attachment 指定 blend 操作
    #[inline]
    pub fn color_blend(mut self, states: Vec<vk::PipelineColorBlendAttachmentState>, constants: [f32; 4]) -> Self {
        self.blend_states = states;
        self.blend_constants = constants;
        self
    }
}

// 转换为 vk 结构体
impl GraphicsState {
    pub fn blend_attachments(&self) -> Vec<vk::PipelineColorBlendAttachmentState> {
        if !self.blend_states.is_empty() {
            return self.blend_states.clone();
        }
        let opaque = vk::PipelineColorBlendAttachmentState::default()
            .blend_enable(false)
            .color_write_mask(vk::ColorComponentFlags::RGBA);
        vec![opaque; self.color_formats.len()]
    }

    pub fn rasterization_info(&self) -> vk::PipelineRasterizationStateCreateInfo<'static> {
        vk::PipelineRasterizationStateCreateInfo::default()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(self.polygon_mode)
            .line_width(1.0)
            .cull_mode(self.cull_mode)
            .front_face(self.front_face)
            .depth_bias_enable(false)
    }

    pub fn depth_stencil_info(&self) -> vk::PipelineDepthStencilStateCreateInfo<'static> {
        vk::PipelineDepthStencilStateCreateInfo::default()
            .depth_test_enable(self.depth_test.is_some())
            .depth_compare_op(self.depth_test.map_or(vk::CompareOp::NEVER, identity))
            .depth_write_enable(self.depth_write && self.depth_test.is_some())
            .depth_bounds_test_enable(false)
            .stencil_test_enable(self.stencil_test)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_state_uses_dynamic_viewport() {
        let state = GraphicsState::default();
        assert_eq!(state.dynamic_states, vec![vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR]);
        assert_eq!(state.rasterization_info().front_face, vk::FrontFace::COUNTER_CLOCKWISE);
        assert_eq!(state.depth_stencil_info().depth_compare_op, vk::CompareOp::LESS);
    }

    #[test]
    fn default_blend_per_color_attachment() {
        let state = GraphicsState::default()
            .attach_info(vec![vk::Format::B8G8R8A8_SRGB, vk::Format::R16G16B16A16_SFLOAT], None);
        let blends = state.blend_attachments();
        assert_eq!(blends.len(), 2);
        assert!(blends.iter().all(|b| b.color_write_mask == vk::ColorComponentFlags::RGBA));
    }

    #[test]
    fn depth_write_needs_depth_test() {
        let state = GraphicsState::default().depth_test(None, true);
        let info = state.depth_stencil_info();
        assert_eq!(info.depth_test_enable, vk::FALSE);
        assert_eq!(info.depth_write_enable, vk::FALSE);
    }
}
