use std::ffi::CStr;

use ash::vk;
use itertools::Itertools;

use crate::{GfxError, GfxResult, commands::command_queue::GfxQueueFamily, foundation::debug_messenger::DebugType};

/// 表示一张物理显卡
pub struct GfxPhysicalDevice {
    pub(crate) vk_handle: vk::PhysicalDevice,

    /// 当前 gpu 的基础属性
    pub(crate) basic_props: vk::PhysicalDeviceProperties,
    pub(crate) mem_props: vk::PhysicalDeviceMemoryProperties,

    /// 同时支持 graphics、compute、transfer 的 queue family
    pub(crate) gfx_queue_family: GfxQueueFamily,
}

// new & init
impl GfxPhysicalDevice {
    /// 优先选择独立显卡，如果没有则选择第一个带有图形队列的显卡
    pub fn new_descrete_physical_device(instance: &ash::Instance) -> GfxResult<Self> {
        let pdevices = unsafe { instance.enumerate_physical_devices()? };
        pdevices
            .into_iter()
            .filter_map(|pdevice| Self::new(pdevice, instance))
            .find_or_first(Self::is_descrete_gpu)
            .ok_or_else(|| {
                log::error!("no gpu with a graphics queue found");
                GfxError::Vulkan(vk::Result::ERROR_INITIALIZATION_FAILED)
            })
    }

    /// 没有合适的 queue family 时返回 None
    fn new(pdevice: vk::PhysicalDevice, instance: &ash::Instance) -> Option<Self> {
        let basic_props = unsafe { instance.get_physical_device_properties(pdevice) };
        let device_name = unsafe { CStr::from_ptr(basic_props.device_name.as_ptr()) };
        log::info!("found gpu: {:?}", device_name);

        let queue_family_props = unsafe { instance.get_physical_device_queue_family_properties(pdevice) };
        log::debug!("queue family props of {:?}:\n{:#?}", device_name, queue_family_props);

        // 全能的 Queue：graphics, compute, transfer
        let required = vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE | vk::QueueFlags::TRANSFER;
        let gfx_queue_family = queue_family_props
            .iter()
            .enumerate()
            .find(|(_, props)| props.queue_flags.contains(required))
            .map(|(family_idx, props)| GfxQueueFamily {
                name: "gfx".to_string(),
                queue_family_index: family_idx as u32,
                queue_flags: props.queue_flags,
                queue_count: props.queue_count,
            })?;

        Some(Self {
            vk_handle: pdevice,
            basic_props,
            mem_props: unsafe { instance.get_physical_device_memory_properties(pdevice) },
            gfx_queue_family,
        })
    }
}

// getters
impl GfxPhysicalDevice {
    #[inline]
    pub fn is_descrete_gpu(&self) -> bool {
        self.basic_props.device_type == vk::PhysicalDeviceType::DISCRETE_GPU
    }

    #[inline]
    pub fn max_sampler_anisotropy(&self) -> f32 {
        self.basic_props.limits.max_sampler_anisotropy
    }

    #[inline]
    pub fn non_coherent_atom_size(&self) -> u64 {
        self.basic_props.limits.non_coherent_atom_size
    }
}

// tools
impl GfxPhysicalDevice {
    /// 从候选格式中找到第一个支持 `features` 的格式
    pub fn find_supported_format(
        &self,
        instance: &ash::Instance,
        candidates: &[vk::Format],
        tiling: vk::ImageTiling,
        features: vk::FormatFeatureFlags,
    ) -> Option<vk::Format> {
        candidates.iter().copied().find(|format| {
            let props = unsafe { instance.get_physical_device_format_properties(self.vk_handle, *format) };
            match tiling {
                vk::ImageTiling::LINEAR => props.linear_tiling_features.contains(features),
                vk::ImageTiling::OPTIMAL => props.optimal_tiling_features.contains(features),
                _ => false,
            }
        })
    }

    /// format 是否支持 linear filter 的 blit，mipmap 生成需要
    pub fn supports_linear_blit(&self, instance: &ash::Instance, format: vk::Format) -> bool {
        let props = unsafe { instance.get_physical_device_format_properties(self.vk_handle, format) };
        props.optimal_tiling_features.contains(
            vk::FormatFeatureFlags::BLIT_SRC
                | vk::FormatFeatureFlags::BLIT_DST
                | vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR,
        )
    }
}

impl DebugType for GfxPhysicalDevice {
    fn debug_type_name() -> &'static str {
        "GfxPhysicalDevice"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.vk_handle
    }
}
