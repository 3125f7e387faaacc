use ash::vk;

use crate::{GfxResult, foundation::device::GfxDevice};

/// sampler 的配置，作为 texture 描述的一部分
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct GfxSamplerDesc {
    pub mag_filter: vk::Filter,
    pub min_filter: vk::Filter,
    pub mipmap_mode: vk::SamplerMipmapMode,
    pub address_mode_u: vk::SamplerAddressMode,
    pub address_mode_v: vk::SamplerAddressMode,
    pub address_mode_w: vk::SamplerAddressMode,
    /// 0 表示关闭各向异性过滤
    pub max_anisotropy: u32,
    /// 用于 shadow map 的比较采样
    pub compare_op: Option<vk::CompareOp>,
}

impl Default for GfxSamplerDesc {
    fn default() -> Self {
        Self {
            mag_filter: vk::Filter::LINEAR,
            min_filter: vk::Filter::LINEAR,
            mipmap_mode: vk::SamplerMipmapMode::LINEAR,
            address_mode_u: vk::SamplerAddressMode::REPEAT,
            address_mode_v: vk::SamplerAddressMode::REPEAT,
            address_mode_w: vk::SamplerAddressMode::REPEAT,
            max_anisotropy: 0,
            compare_op: None,
        }
    }
}

impl GfxSamplerDesc {
    /// 最近邻采样，边缘 clamp，一般用于 render target 的读取
    pub fn nearest_clamp() -> Self {
        Self {
            mag_filter: vk::Filter::NEAREST,
            min_filter: vk::Filter::NEAREST,
            mipmap_mode: vk::SamplerMipmapMode::NEAREST,
            address_mode_u: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            address_mode_v: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            address_mode_w: vk::SamplerAddressMode::CLAMP_TO_EDGE,
            ..Default::default()
        }
    }

    /// 生成 create info，各向异性会被限制在设备支持的范围内
    pub fn create_info(&self, device_max_anisotropy: f32) -> vk::SamplerCreateInfo<'static> {
        let mut create_info = vk::SamplerCreateInfo::default()
            .mag_filter(self.mag_filter)
            .min_filter(self.min_filter)
            .mipmap_mode(self.mipmap_mode)
            .address_mode_u(self.address_mode_u)
            .address_mode_v(self.address_mode_v)
            .address_mode_w(self.address_mode_w)
            .min_lod(0.0)
            .max_lod(vk::LOD_CLAMP_NONE)
            .border_color(vk::BorderColor::INT_OPAQUE_BLACK);

        create_info = if self.max_anisotropy > 0 {
            create_info.anisotropy_enable(true).max_anisotropy((self.max_anisotropy as f32).min(device_max_anisotropy))
        } else {
            create_info.anisotropy_enable(false)
        };

        create_info = match self.compare_op {
            Some(compare_op) => create_info.compare_enable(true).compare_op(compare_op),
            None => create_info.compare_enable(false),
        };

        create_info
    }

    pub fn create(&self, device: &GfxDevice, device_max_anisotropy: f32, name: &str) -> GfxResult<vk::Sampler> {
        let sampler = unsafe { device.create_sampler(&self.create_info(device_max_anisotropy), None)? };
        device.set_object_debug_name(sampler, format!("Sampler::{}", name));
        Ok(sampler)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anisotropy_is_clamped_to_device_limit() {
        let desc = GfxSamplerDesc {
            max_anisotropy: 16,
            ..Default::default()
        };
        let info = desc.create_info(8.0);
        assert_eq!(info.anisotropy_enable, vk::TRUE);
        assert_eq!(info.max_anisotropy, 8.0);
    }

    #[test]
    fn compare_op_enables_compare() {
        let desc = GfxSamplerDesc {
            compare_op: Some(vk::CompareOp::LESS_OR_EQUAL),
            ..GfxSamplerDesc::nearest_clamp()
        };
        let info = desc.create_info(16.0);
        assert_eq!(info.compare_enable, vk::TRUE);
        assert_eq!(info.compare_op, vk::CompareOp::LESS_OR_EQUAL);
        assert_eq!(info.anisotropy_enable, vk::FALSE);
        assert_eq!(info.address_mode_u, vk::SamplerAddressMode::CLAMP_TO_EDGE);
    }
}
