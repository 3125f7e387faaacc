//! 资源的创建描述
//!
//! 描述只包含与后端无关的信息，校验逻辑也放在这里，两个后端共用

use ash::vk;

use crate::{
    GfxError, GfxResult,
    pipelines::{graphics_state::GraphicsState, shader::ShaderDesc},
    resources::{
        handles::{BindGroupLayoutHandle, BufferHandle, TextureHandle},
        sampler::GfxSamplerDesc,
        usage::{Usage, format_aspect},
    },
};

/// 内存的用途
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum MemoryClass {
    /// 只有 GPU 访问
    #[default]
    DeviceLocal,
    /// CPU 顺序写入，GPU 读取。常驻 map
    Upload,
    /// GPU 写入，CPU 随机读取。常驻 map
    Readback,
}

impl MemoryClass {
    #[inline]
    pub fn is_host_visible(self) -> bool {
        !matches!(self, Self::DeviceLocal)
    }
}

// ---------------------------------------------------------------------------
// buffer
// ---------------------------------------------------------------------------

#[derive(Clone, Debug)]
pub struct BufferDesc<'a> {
    pub debug_name: String,
    pub byte_size: u64,
    pub usage: Usage,
    pub memory: MemoryClass,
    /// 创建后立即写入 buffer 开头的数据
    pub initial_data: Option<&'a [u8]>,
}

impl<'a> BufferDesc<'a> {
    pub fn new(debug_name: impl Into<String>, byte_size: u64, usage: Usage, memory: MemoryClass) -> Self {
        Self {
            debug_name: debug_name.into(),
            byte_size,
            usage,
            memory,
            initial_data: None,
        }
    }

    /// builder
    #[inline]
    pub fn initial_data(mut self, data: &'a [u8]) -> Self {
        self.initial_data = Some(data);
        self
    }

    pub fn validate(&self) -> GfxResult<()> {
        if self.byte_size == 0 {
            return Err(GfxError::IncompatibleDescriptor(format!("buffer {} has zero size", self.debug_name)));
        }
        if !Usage::BUFFER_USAGES.contains(self.usage) {
            return Err(GfxError::IncompatibleDescriptor(format!(
                "buffer {} has image-only usage {:?}",
                self.debug_name, self.usage
            )));
        }
        if let Some(data) = self.initial_data {
            check_range(0, data.len() as u64, self.byte_size)?;
        }
        Ok(())
    }
}

/// `offset + len` 是否在 `size` 之内
pub fn check_range(offset: u64, len: u64, size: u64) -> GfxResult<()> {
    match offset.checked_add(len) {
        Some(end) if end <= size => Ok(()),
        _ => Err(GfxError::OutOfBounds { offset, len, size }),
    }
}

/// 向映射后的内存写入 `data`，越界时不写入任何字节
pub fn write_mapped(mapped: &mut [u8], offset: u64, data: &[u8]) -> GfxResult<()> {
    check_range(offset, data.len() as u64, mapped.len() as u64)?;
    let start = offset as usize;
    mapped[start..start + data.len()].copy_from_slice(data);
    Ok(())
}

// ---------------------------------------------------------------------------
// texture
// ---------------------------------------------------------------------------

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub enum TextureType {
    #[default]
    D2,
    D2Array,
    Cube,
}

impl TextureType {
    /// 采样时使用的 view 类型
    pub fn sampled_view_type(self) -> vk::ImageViewType {
        match self {
            Self::D2 => vk::ImageViewType::TYPE_2D,
            Self::D2Array => vk::ImageViewType::TYPE_2D_ARRAY,
            Self::Cube => vk::ImageViewType::CUBE,
        }
    }

    pub fn image_create_flags(self) -> vk::ImageCreateFlags {
        match self {
            Self::Cube => vk::ImageCreateFlags::CUBE_COMPATIBLE,
            _ => vk::ImageCreateFlags::empty(),
        }
    }
}

#[derive(Clone, Debug)]
pub struct TextureDesc {
    pub debug_name: String,
    pub ty: TextureType,
    pub width: u32,
    pub height: u32,
    pub num_layers: u32,
    /// `generate_mips` 为 true 时会被忽略
    pub num_mip_levels: u32,
    pub samples: vk::SampleCountFlags,
    pub format: vk::Format,
    pub memory: MemoryClass,
    pub usage: Usage,
    pub generate_mips: bool,
    pub sampler: GfxSamplerDesc,
}

impl Default for TextureDesc {
    fn default() -> Self {
        Self {
            debug_name: String::new(),
            ty: TextureType::D2,
            width: 1,
            height: 1,
            num_layers: 1,
            num_mip_levels: 1,
            samples: vk::SampleCountFlags::TYPE_1,
            format: vk::Format::R8G8B8A8_UNORM,
            memory: MemoryClass::DeviceLocal,
            usage: Usage::SHADER_RESOURCE,
            generate_mips: false,
            sampler: GfxSamplerDesc::default(),
        }
    }
}

/// 完整 mip 链的层数：`floor(log2(max(width, height))) + 1`
#[inline]
pub fn mip_levels_for(width: u32, height: u32) -> u32 {
    let largest = width.max(height).max(1);
    u32::BITS - largest.leading_zeros()
}

/// 第 `level` 层 mip 的尺寸，每个维度最小为 1
#[inline]
pub fn mip_extent(width: u32, height: u32, level: u32) -> vk::Extent2D {
    vk::Extent2D {
        width: (width >> level).max(1),
        height: (height >> level).max(1),
    }
}

/// 常见格式每个 texel 的字节数，压缩格式返回 None
pub fn format_texel_size(format: vk::Format) -> Option<u32> {
    let size = match format {
        vk::Format::R8_UNORM | vk::Format::R8_UINT | vk::Format::S8_UINT => 1,
        vk::Format::R8G8_UNORM | vk::Format::R16_SFLOAT | vk::Format::D16_UNORM => 2,
        vk::Format::R8G8B8A8_UNORM
        | vk::Format::R8G8B8A8_SRGB
        | vk::Format::B8G8R8A8_UNORM
        | vk::Format::B8G8R8A8_SRGB
        | vk::Format::R32_SFLOAT
        | vk::Format::R32_UINT
        | vk::Format::R16G16_SFLOAT
        | vk::Format::A2B10G10R10_UNORM_PACK32
        | vk::Format::D32_SFLOAT
        | vk::Format::D24_UNORM_S8_UINT => 4,
        vk::Format::R16G16B16A16_SFLOAT | vk::Format::R32G32_SFLOAT | vk::Format::D32_SFLOAT_S8_UINT => 8,
        vk::Format::R32G32B32A32_SFLOAT => 16,
        _ => return None,
    };
    Some(size)
}

impl TextureDesc {
    /// 实际创建的 mip 层数
    pub fn resolved_mip_levels(&self) -> u32 {
        if self.generate_mips { mip_levels_for(self.width, self.height) } else { self.num_mip_levels.max(1) }
    }

    /// 实际创建时使用的 usage：生成 mipmap 需要 blit 的 src 和 dst
    pub fn resolved_usage(&self) -> Usage {
        if self.generate_mips { self.usage | Usage::TRANSFER_SRC | Usage::TRANSFER_DST } else { self.usage }
    }

    pub fn validate(&self) -> GfxResult<()> {
        let incompatible = |reason: &str| Err(GfxError::IncompatibleDescriptor(format!("texture {}: {}", self.debug_name, reason)));

        if self.width == 0 || self.height == 0 || self.num_layers == 0 {
            return incompatible("zero sized");
        }
        if self.usage.is_empty() || !Usage::IMAGE_USAGES.contains(self.usage) {
            return incompatible("usage must be a non-empty set of image usages");
        }
        if self.ty == TextureType::D2 && self.num_layers != 1 {
            return incompatible("2D texture must have exactly one layer");
        }
        if self.ty == TextureType::Cube && self.num_layers % 6 != 0 {
            return incompatible("cube texture needs a multiple of 6 layers");
        }
        if self.resolved_mip_levels() > mip_levels_for(self.width, self.height) {
            return incompatible("more mip levels than the full chain");
        }
        if self.memory != MemoryClass::DeviceLocal {
            return incompatible("textures must live in device local memory");
        }
        Ok(())
    }

    pub fn info(&self) -> TextureInfo {
        TextureInfo {
            ty: self.ty,
            width: self.width,
            height: self.height,
            num_layers: self.num_layers,
            num_mip_levels: self.resolved_mip_levels(),
            samples: self.samples,
            format: self.format,
            usage: self.resolved_usage(),
            aspect: format_aspect(self.format),
        }
    }
}

/// 创建之后 texture 的不可变属性
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureInfo {
    pub ty: TextureType,
    pub width: u32,
    pub height: u32,
    pub num_layers: u32,
    pub num_mip_levels: u32,
    pub samples: vk::SampleCountFlags,
    pub format: vk::Format,
    pub usage: Usage,
    pub aspect: vk::ImageAspectFlags,
}

/// texture 上传的目标区域，只能位于单个 mip 层
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureRange {
    pub mip_level: u32,
    pub base_layer: u32,
    pub layer_count: u32,
    pub offset: vk::Offset3D,
    /// None 表示从 offset 开始到该 mip 层的边缘
    pub extent: Option<vk::Extent3D>,
}

impl TextureRange {
    /// 整个 mip 层的所有 layer
    pub fn whole_level(mip_level: u32, layer_count: u32) -> Self {
        Self {
            mip_level,
            base_layer: 0,
            layer_count,
            offset: vk::Offset3D::default(),
            extent: None,
        }
    }
}

/// 检查过边界的上传区域
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ResolvedTextureRange {
    pub mip_level: u32,
    pub base_layer: u32,
    pub layer_count: u32,
    pub offset: vk::Offset3D,
    pub extent: vk::Extent3D,
    /// 紧密排列时需要的字节数
    pub byte_size: u64,
}

impl TextureInfo {
    /// 检查上传区域，并计算需要的数据大小
    pub fn resolve_range(&self, range: &TextureRange) -> GfxResult<ResolvedTextureRange> {
        let out_of_bounds = |offset: u64, len: u64, size: u64| GfxError::OutOfBounds { offset, len, size };

        if range.mip_level >= self.num_mip_levels {
            return Err(out_of_bounds(range.mip_level as u64, 1, self.num_mip_levels as u64));
        }
        check_range(range.base_layer as u64, range.layer_count.max(1) as u64, self.num_layers as u64)?;
        if range.offset.x < 0 || range.offset.y < 0 || range.offset.z != 0 {
            return Err(GfxError::IncompatibleDescriptor(format!("negative texture offset {:?}", range.offset)));
        }

        let level = mip_extent(self.width, self.height, range.mip_level);
        let (x, y) = (range.offset.x as u32, range.offset.y as u32);
        let extent = match range.extent {
            Some(extent) => extent,
            None => vk::Extent3D {
                width: level.width.saturating_sub(x),
                height: level.height.saturating_sub(y),
                depth: 1,
            },
        };
        check_range(x as u64, extent.width as u64, level.width as u64)?;
        check_range(y as u64, extent.height as u64, level.height as u64)?;
        if extent.width == 0 || extent.height == 0 || extent.depth != 1 {
            return Err(GfxError::IncompatibleDescriptor(format!("empty texture range {:?}", extent)));
        }

        let texel_size = format_texel_size(self.format).ok_or_else(|| {
            GfxError::IncompatibleDescriptor(format!("upload of format {:?} is not supported", self.format))
        })?;
        let layer_count = range.layer_count.max(1);
        let byte_size = extent.width as u64 * extent.height as u64 * texel_size as u64 * layer_count as u64;

        Ok(ResolvedTextureRange {
            mip_level: range.mip_level,
            base_layer: range.base_layer,
            layer_count,
            offset: range.offset,
            extent,
            byte_size,
        })
    }
}

// ---------------------------------------------------------------------------
// bind group
// ---------------------------------------------------------------------------

/// binding 的种类
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum BindingKind {
    /// combined image sampler
    Texture,
    /// uniform buffer
    Buffer,
    /// 带 dynamic offset 的 uniform buffer
    DynamicBuffer,
}

impl BindingKind {
    pub fn descriptor_type(self) -> vk::DescriptorType {
        match self {
            Self::Texture => vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            Self::Buffer => vk::DescriptorType::UNIFORM_BUFFER,
            Self::DynamicBuffer => vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
        }
    }

    #[inline]
    fn is_buffer(self) -> bool {
        matches!(self, Self::Buffer | Self::DynamicBuffer)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BindingDesc {
    pub binding: u32,
    pub kind: BindingKind,
    pub stages: vk::ShaderStageFlags,
}

impl BindingDesc {
    pub fn new(binding: u32, kind: BindingKind, stages: vk::ShaderStageFlags) -> Self {
        Self { binding, kind, stages }
    }

    pub fn to_vk(&self) -> vk::DescriptorSetLayoutBinding<'static> {
        vk::DescriptorSetLayoutBinding::default()
            .binding(self.binding)
            .descriptor_type(self.kind.descriptor_type())
            .descriptor_count(1)
            .stage_flags(self.stages)
    }
}

#[derive(Clone, Debug, Default)]
pub struct BindGroupLayoutDesc {
    pub debug_name: String,
    /// 有序的 binding 列表
    pub bindings: Vec<BindingDesc>,
}

impl BindGroupLayoutDesc {
    pub fn validate(&self) -> GfxResult<()> {
        for (i, a) in self.bindings.iter().enumerate() {
            if self.bindings[i + 1..].iter().any(|b| b.binding == a.binding) {
                return Err(GfxError::IncompatibleDescriptor(format!(
                    "layout {}: binding {} declared twice",
                    self.debug_name, a.binding
                )));
            }
        }
        Ok(())
    }

    pub fn find(&self, binding: u32) -> Option<&BindingDesc> {
        self.bindings.iter().find(|b| b.binding == binding)
    }

    pub fn dynamic_buffer_count(&self) -> usize {
        self.bindings.iter().filter(|b| b.kind == BindingKind::DynamicBuffer).count()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureBinding {
    pub binding: u32,
    pub texture: TextureHandle,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BufferBinding {
    pub binding: u32,
    pub buffer: BufferHandle,
    pub offset: u64,
    /// None 表示从 offset 到 buffer 末尾
    pub range: Option<u64>,
}

impl BufferBinding {
    pub fn whole(binding: u32, buffer: BufferHandle) -> Self {
        Self {
            binding,
            buffer,
            offset: 0,
            range: None,
        }
    }

    /// 实际绑定的字节数，超出 buffer 大小时返回 OutOfBounds
    pub fn resolved_range(&self, buffer_size: u64) -> GfxResult<u64> {
        let range = self.range.unwrap_or(buffer_size.saturating_sub(self.offset));
        check_range(self.offset, range, buffer_size)?;
        Ok(range)
    }
}

#[derive(Clone, Debug)]
pub struct BindGroupDesc {
    pub debug_name: String,
    pub layout: BindGroupLayoutHandle,
    pub textures: Vec<TextureBinding>,
    pub buffers: Vec<BufferBinding>,
}

/// 检查 bind group 的写入是否与 layout 一致
///
/// - 每个 binding 都必须存在于 layout 中，且种类匹配
/// - 同一个 binding 不能出现两次
/// - dynamic buffer 必须指定 range
/// - `complete` 为 true 时（创建 bind group），layout 中的每个 binding 都必须被写入
pub fn validate_bind_group_writes(
    layout: &BindGroupLayoutDesc,
    textures: &[TextureBinding],
    buffers: &[BufferBinding],
    complete: bool,
) -> GfxResult<()> {
    let mismatch = |reason: String| Err(GfxError::IncompatibleDescriptor(format!("layout {}: {}", layout.debug_name, reason)));

    let written = textures
        .iter()
        .map(|t| (t.binding, BindingKind::Texture, None))
        .chain(buffers.iter().map(|b| (b.binding, BindingKind::Buffer, Some(b.range))))
        .collect::<Vec<_>>();

    for (i, (binding, kind, range)) in written.iter().enumerate() {
        if written[i + 1..].iter().any(|(other, _, _)| other == binding) {
            return mismatch(format!("binding {} written twice", binding));
        }
        let Some(declared) = layout.find(*binding) else {
            return mismatch(format!("binding {} is not declared", binding));
        };
        let kind_matches = match kind {
            BindingKind::Texture => declared.kind == BindingKind::Texture,
            _ => declared.kind.is_buffer(),
        };
        if !kind_matches {
            return mismatch(format!("binding {} expects {:?}", binding, declared.kind));
        }
        // dynamic offset 叠加在 offset 之上，range 覆盖到 buffer 末尾时任何非零的 dynamic offset 都会越界
        if declared.kind == BindingKind::DynamicBuffer && *range == Some(None) {
            return mismatch(format!("dynamic binding {} needs an explicit range", binding));
        }
    }

    if complete && written.len() != layout.bindings.len() {
        return mismatch(format!("{} bindings declared, {} written", layout.bindings.len(), written.len()));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// pipeline
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, Default)]
pub struct PipelineDesc {
    pub debug_name: String,
    pub shaders: Vec<ShaderDesc>,
    /// 按 set 的顺序排列
    pub bind_group_layouts: Vec<BindGroupLayoutHandle>,
    pub graphics_state: GraphicsState,
}

#[cfg(test)]
mod tests {
    use lumen_pool::Handle;

    use super::*;

    #[test]
    fn mip_levels_of_common_sizes() {
        assert_eq!(mip_levels_for(256, 256), 9);
        assert_eq!(mip_levels_for(1, 1), 1);
        assert_eq!(mip_levels_for(300, 20), 9);
        assert_eq!(mip_levels_for(1024, 512), 11);
        assert_eq!(mip_levels_for(0, 0), 1);
    }

    #[test]
    fn generate_mips_overrides_requested_levels() {
        let desc = TextureDesc {
            width: 256,
            height: 256,
            num_mip_levels: 1,
            generate_mips: true,
            ..Default::default()
        };
        assert_eq!(desc.resolved_mip_levels(), 9);
        assert!(desc.resolved_usage().contains(Usage::TRANSFER_SRC | Usage::TRANSFER_DST));
        assert!(desc.validate().is_ok());
    }

    #[test]
    fn mip_extent_never_reaches_zero() {
        assert_eq!(mip_extent(256, 64, 3), vk::Extent2D { width: 32, height: 8 });
        assert_eq!(mip_extent(256, 64, 8), vk::Extent2D { width: 1, height: 1 });
    }

    #[test]
    fn texture_validation() {
        let cube = TextureDesc {
            ty: TextureType::Cube,
            num_layers: 4,
            ..Default::default()
        };
        assert!(matches!(cube.validate(), Err(GfxError::IncompatibleDescriptor(_))));

        let vertex_texture = TextureDesc {
            usage: Usage::VERTEX_BUFFER,
            ..Default::default()
        };
        assert!(vertex_texture.validate().is_err());

        let too_many_mips = TextureDesc {
            width: 4,
            height: 4,
            num_mip_levels: 4,
            ..Default::default()
        };
        assert!(too_many_mips.validate().is_err());
    }

    #[test]
    fn buffer_validation() {
        let data = [0u8; 32];
        assert!(BufferDesc::new("ok", 32, Usage::UNIFORM_BUFFER, MemoryClass::Upload).initial_data(&data).validate().is_ok());
        assert!(matches!(
            BufferDesc::new("small", 16, Usage::UNIFORM_BUFFER, MemoryClass::Upload).initial_data(&data).validate(),
            Err(GfxError::OutOfBounds { .. })
        ));
        assert!(BufferDesc::new("rt", 16, Usage::RENDER_TARGET, MemoryClass::Upload).validate().is_err());
        assert!(BufferDesc::new("empty", 0, Usage::UNIFORM_BUFFER, MemoryClass::Upload).validate().is_err());
    }

    #[test]
    fn check_range_handles_overflow() {
        assert!(check_range(0, 64, 256).is_ok());
        assert!(check_range(192, 64, 256).is_ok());
        assert!(check_range(193, 64, 256).is_err());
        assert!(check_range(u64::MAX, 2, 256).is_err());
    }

    fn rgba_info() -> TextureInfo {
        TextureDesc {
            width: 64,
            height: 32,
            generate_mips: true,
            ..Default::default()
        }
        .info()
    }

    #[test]
    fn whole_level_range_covers_the_mip() {
        let resolved = rgba_info().resolve_range(&TextureRange::whole_level(1, 1)).unwrap();
        assert_eq!(resolved.extent, vk::Extent3D { width: 32, height: 16, depth: 1 });
        assert_eq!(resolved.byte_size, 32 * 16 * 4);
    }

    #[test]
    fn range_outside_the_mip_fails() {
        let info = rgba_info();
        let range = TextureRange {
            offset: vk::Offset3D { x: 60, y: 0, z: 0 },
            extent: Some(vk::Extent3D { width: 8, height: 8, depth: 1 }),
            ..TextureRange::whole_level(0, 1)
        };
        assert!(matches!(info.resolve_range(&range), Err(GfxError::OutOfBounds { .. })));
        assert!(info.resolve_range(&TextureRange::whole_level(info.num_mip_levels, 1)).is_err());
        assert!(info.resolve_range(&TextureRange { base_layer: 1, ..TextureRange::whole_level(0, 1) }).is_err());
    }

    fn layout() -> BindGroupLayoutDesc {
        BindGroupLayoutDesc {
            debug_name: "material".to_string(),
            bindings: vec![
                BindingDesc::new(0, BindingKind::Buffer, vk::ShaderStageFlags::VERTEX),
                BindingDesc::new(1, BindingKind::Texture, vk::ShaderStageFlags::FRAGMENT),
            ],
        }
    }

    #[test]
    fn complete_bind_group_passes() {
        let textures = [TextureBinding {
            binding: 1,
            texture: Handle::from_raw_parts(1, 0),
        }];
        let buffers = [BufferBinding::whole(0, Handle::from_raw_parts(1, 0))];
        assert!(validate_bind_group_writes(&layout(), &textures, &buffers, true).is_ok());
        // 更新时允许只写一部分
        assert!(validate_bind_group_writes(&layout(), &textures, &[], false).is_ok());
    }

    #[test]
    fn mismatched_bind_group_fails() {
        let texture_in_buffer_slot = [TextureBinding {
            binding: 0,
            texture: Handle::from_raw_parts(1, 0),
        }];
        assert!(matches!(
            validate_bind_group_writes(&layout(), &texture_in_buffer_slot, &[], false),
            Err(GfxError::IncompatibleDescriptor(_))
        ));

        let missing = [BufferBinding::whole(0, Handle::from_raw_parts(1, 0))];
        assert!(validate_bind_group_writes(&layout(), &[], &missing, true).is_err());

        let undeclared = [BufferBinding::whole(7, Handle::from_raw_parts(1, 0))];
        assert!(validate_bind_group_writes(&layout(), &[], &undeclared, false).is_err());

        let twice = [
            BufferBinding::whole(0, Handle::from_raw_parts(1, 0)),
            BufferBinding::whole(0, Handle::from_raw_parts(2, 0)),
        ];
        assert!(validate_bind_group_writes(&layout(), &[], &twice, false).is_err());
    }

    #[test]
    fn buffer_binding_range() {
        let binding = BufferBinding {
            offset: 64,
            ..BufferBinding::whole(0, Handle::from_raw_parts(1, 0))
        };
        assert_eq!(binding.resolved_range(256).unwrap(), 192);
        assert!(BufferBinding { range: Some(256), ..binding }.resolved_range(256).is_err());
        assert!(binding.resolved_range(32).is_err());
    }

    #[test]
    fn mapped_write_is_bounds_checked() {
        let mut mapped = vec![0u8; 256];
        let data = (0..64).collect::<Vec<u8>>();
        write_mapped(&mut mapped, 0, &data).unwrap();
        assert_eq!(&mapped[..64], data.as_slice());

        write_mapped(&mut mapped, 192, &data).unwrap();
        assert_eq!(&mapped[192..], data.as_slice());

        let before = mapped.clone();
        assert!(matches!(
            write_mapped(&mut mapped, 200, &data),
            Err(GfxError::OutOfBounds {
                offset: 200,
                len: 64,
                size: 256
            })
        ));
        assert!(write_mapped(&mut mapped, u64::MAX, &data).is_err());
        assert_eq!(mapped, before);
    }

    #[test]
    fn dynamic_binding_needs_explicit_range() {
        let dynamic_layout = BindGroupLayoutDesc {
            debug_name: "per-frame".to_string(),
            bindings: vec![BindingDesc::new(0, BindingKind::DynamicBuffer, vk::ShaderStageFlags::ALL_GRAPHICS)],
        };
        let whole = [BufferBinding::whole(0, Handle::from_raw_parts(1, 0))];
        assert!(matches!(
            validate_bind_group_writes(&dynamic_layout, &[], &whole, true),
            Err(GfxError::IncompatibleDescriptor(_))
        ));

        let ranged = [BufferBinding {
            range: Some(64),
            ..whole[0]
        }];
        assert!(validate_bind_group_writes(&dynamic_layout, &[], &ranged, true).is_ok());
        // 普通的 uniform buffer 仍然可以绑定整个 buffer
        assert!(validate_bind_group_writes(&layout(), &[], &whole, false).is_ok());
    }

    #[test]
    fn duplicate_layout_binding_fails() {
        let mut desc = layout();
        desc.bindings.push(BindingDesc::new(1, BindingKind::DynamicBuffer, vk::ShaderStageFlags::ALL));
        assert!(desc.validate().is_err());
        assert!(layout().validate().is_ok());
    }
}
