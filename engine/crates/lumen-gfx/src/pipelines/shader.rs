use std::{ffi::CString, path::Path, rc::Rc};

use ash::vk;

use crate::{
    GfxError, GfxResult,
    foundation::{debug_messenger::DebugType, device::GfxDevice},
};

/// 某个 shader stage 反射出的 push constant 范围
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PushConstantRange {
    pub offset: u32,
    pub size: u32,
}

/// 编译好的 shader，以及反射得到的元数据
///
/// 反射由外部的 shader 工具完成，这里只负责携带结果
#[derive(Clone, Debug)]
pub struct ShaderDesc {
    pub debug_name: String,
    pub spirv: Vec<u32>,
    pub entry_point: CString,
    pub stage: vk::ShaderStageFlags,
    pub push_constant: Option<PushConstantRange>,
}

impl ShaderDesc {
    pub fn new(
        debug_name: impl Into<String>,
        spirv: Vec<u32>,
        entry_point: &str,
        stage: vk::ShaderStageFlags,
    ) -> GfxResult<Self> {
        let debug_name = debug_name.into();
        let entry_point = CString::new(entry_point).map_err(|_| {
            GfxError::IncompatibleDescriptor(format!("shader {}: entry point contains nul", debug_name))
        })?;
        Ok(Self {
            debug_name,
            spirv,
            entry_point,
            stage,
            push_constant: None,
        })
    }

    /// # param
    /// * path - spv shader 文件路径
    pub fn from_spv_file(path: &Path, entry_point: &str, stage: vk::ShaderStageFlags) -> GfxResult<Self> {
        let mut file = std::fs::File::open(path)?;
        let spirv = ash::util::read_spv(&mut file)?;
        Self::new(path.to_string_lossy(), spirv, entry_point, stage)
    }

    /// builder
    #[inline]
    pub fn push_constant(mut self, offset: u32, size: u32) -> Self {
        self.push_constant = Some(PushConstantRange { offset, size });
        self
    }
}

/// 合并所有 stage 的 push constant 范围
///
/// 所有声明了 push constant 的 stage 必须使用相同的 offset 和 size，合并后的 stage flags 是它们的并集
pub fn merge_push_constants(shaders: &[ShaderDesc]) -> GfxResult<Option<vk::PushConstantRange>> {
    let mut merged: Option<vk::PushConstantRange> = None;
    for shader in shaders {
        let Some(range) = shader.push_constant else {
            continue;
        };
        match merged.as_mut() {
            None => {
                merged = Some(
                    vk::PushConstantRange::default().stage_flags(shader.stage).offset(range.offset).size(range.size),
                );
            }
            Some(existing) if existing.offset == range.offset && existing.size == range.size => {
                existing.stage_flags |= shader.stage;
            }
            Some(existing) => {
                return Err(GfxError::IncompatibleDescriptor(format!(
                    "push constant of {} ({}+{}) disagrees with {:?} ({}+{})",
                    shader.debug_name, range.offset, range.size, existing.stage_flags, existing.offset, existing.size
                )));
            }
        }
    }
    Ok(merged)
}

/// # Destroy
///
/// 需要手动调用 `destroy` 方法来释放资源。
pub struct GfxShaderModule {
    handle: vk::ShaderModule,
    device: Rc<GfxDevice>,
}

impl GfxShaderModule {
    pub fn new(device: Rc<GfxDevice>, desc: &ShaderDesc) -> GfxResult<Self> {
        let info = vk::ShaderModuleCreateInfo::default().code(&desc.spirv);
        let handle = unsafe { device.create_shader_module(&info, None)? };
        let module = Self { handle, device };
        module.device.set_debug_name(&module, &desc.debug_name);
        Ok(module)
    }

    #[inline]
    pub fn handle(&self) -> vk::ShaderModule {
        self.handle
    }

    #[inline]
    pub fn destroy(self) {
        unsafe {
            self.device.destroy_shader_module(self.handle, None);
        }
    }
}

impl DebugType for GfxShaderModule {
    fn debug_type_name() -> &'static str {
        "GfxShaderModule"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shader(name: &str, stage: vk::ShaderStageFlags) -> ShaderDesc {
        ShaderDesc::new(name, vec![0x0723_0203], "main", stage).unwrap()
    }

    #[test]
    fn no_push_constants_gives_none() {
        let shaders = [shader("vs", vk::ShaderStageFlags::VERTEX), shader("fs", vk::ShaderStageFlags::FRAGMENT)];
        assert_eq!(merge_push_constants(&shaders).unwrap(), None);
    }

    #[test]
    fn matching_ranges_union_stages() {
        let shaders = [
            shader("vs", vk::ShaderStageFlags::VERTEX).push_constant(0, 64),
            shader("fs", vk::ShaderStageFlags::FRAGMENT).push_constant(0, 64),
        ];
        let range = merge_push_constants(&shaders).unwrap().unwrap();
        assert_eq!(range.stage_flags, vk::ShaderStageFlags::VERTEX | vk::ShaderStageFlags::FRAGMENT);
        assert_eq!((range.offset, range.size), (0, 64));
    }

    #[test]
    fn stage_without_range_is_skipped() {
        let shaders =
            [shader("vs", vk::ShaderStageFlags::VERTEX), shader("fs", vk::ShaderStageFlags::FRAGMENT).push_constant(16, 8)];
        let range = merge_push_constants(&shaders).unwrap().unwrap();
        assert_eq!(range.stage_flags, vk::ShaderStageFlags::FRAGMENT);
        assert_eq!((range.offset, range.size), (16, 8));
    }

    #[test]
    fn disagreeing_ranges_fail() {
        let shaders = [
            shader("vs", vk::ShaderStageFlags::VERTEX).push_constant(0, 64),
            shader("fs", vk::ShaderStageFlags::FRAGMENT).push_constant(0, 32),
        ];
        assert!(matches!(merge_push_constants(&shaders), Err(GfxError::IncompatibleDescriptor(_))));
    }

    #[test]
    fn entry_point_with_nul_fails() {
        assert!(ShaderDesc::new("bad", vec![], "ma\0in", vk::ShaderStageFlags::VERTEX).is_err());
    }
}
