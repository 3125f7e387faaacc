use std::{
    cell::Cell,
    ffi::{CStr, CString},
    ops::Deref,
};

use ash::vk;
use itertools::Itertools;

use crate::{GfxResult, foundation::debug_messenger::DebugType};

/// Vulkan 逻辑设备封装
///
/// 包含核心设备 API 以及 swapchain、debug utils 扩展的函数指针。
/// dynamic rendering 和 synchronization2 在 1.3 中已经是 core，直接使用 `ash::Device`。
pub struct GfxDevice {
    pub(crate) device: ash::Device,
    pub(crate) debug_utils: ash::ext::debug_utils::Device,
    pub(crate) swapchain: ash::khr::swapchain::Device,

    #[cfg(debug_assertions)]
    destroyed: Cell<bool>,
}

// 构造与销毁
impl GfxDevice {
    pub fn new(
        instance: &ash::Instance,
        pdevice: vk::PhysicalDevice,
        queue_create_info: &[vk::DeviceQueueCreateInfo],
    ) -> GfxResult<Self> {
        let _span = tracy_client::span!("GfxDevice::new");

        let device_exts = Self::basic_device_exts().iter().map(|e| e.as_ptr()).collect_vec();
        log::info!(
            "device exts: {}",
            device_exts.iter().map(|ext| format!("\n\t{:?}", unsafe { CStr::from_ptr(*ext) })).join("")
        );

        let mut vk13_features =
            vk::PhysicalDeviceVulkan13Features::default().dynamic_rendering(true).synchronization2(true);
        let mut all_features = vk::PhysicalDeviceFeatures2::default()
            .features(vk::PhysicalDeviceFeatures::default().sampler_anisotropy(true))
            .push_next(&mut vk13_features);

        let device_create_info = vk::DeviceCreateInfo::default()
            .queue_create_infos(queue_create_info)
            .enabled_extension_names(&device_exts)
            .push_next(&mut all_features);

        let device = unsafe { instance.create_device(pdevice, &device_create_info, None)? };

        let debug_utils = ash::ext::debug_utils::Device::new(instance, &device);
        let swapchain = ash::khr::swapchain::Device::new(instance, &device);

        Ok(Self {
            device,
            debug_utils,
            swapchain,

            #[cfg(debug_assertions)]
            destroyed: Cell::new(false),
        })
    }

    pub fn destroy(&self) {
        log::info!("destroying device");

        #[cfg(debug_assertions)]
        self.destroyed.set(true);

        unsafe {
            self.device.destroy_device(None);
        }
    }

    /// 必要的 device extensions
    fn basic_device_exts() -> [&'static CStr; 1] {
        [ash::khr::swapchain::NAME]
    }
}

// getters
impl GfxDevice {
    #[inline]
    pub fn vk_handle(&self) -> vk::Device {
        self.device.handle()
    }
    #[inline]
    pub fn debug_utils(&self) -> &ash::ext::debug_utils::Device {
        &self.debug_utils
    }
    #[inline]
    pub fn swapchain(&self) -> &ash::khr::swapchain::Device {
        &self.swapchain
    }
}

// tools
impl GfxDevice {
    /// debug name 只用于调试，设置失败时只打印日志
    pub fn set_object_debug_name<T: vk::Handle>(&self, handle: T, name: impl AsRef<str>) {
        let Ok(name) = CString::new(name.as_ref()) else {
            return;
        };
        let result = unsafe {
            self.debug_utils.set_debug_utils_object_name(
                &vk::DebugUtilsObjectNameInfoEXT::default().object_name(name.as_c_str()).object_handle(handle),
            )
        };
        if let Err(e) = result {
            log::warn!("failed to set debug name {:?}: {:?}", name, e);
        }
    }

    /// debug name 的格式为 `类型名::name`
    pub fn set_debug_name<T: DebugType>(&self, handle: &T, name: impl AsRef<str>) {
        self.set_object_debug_name(handle.vk_handle(), format!("{}::{}", T::debug_type_name(), name.as_ref()));
    }

    #[inline]
    pub fn wait_idle(&self) -> GfxResult<()> {
        unsafe { self.device.device_wait_idle()? };
        Ok(())
    }
}

impl Deref for GfxDevice {
    type Target = ash::Device;
    fn deref(&self) -> &Self::Target {
        &self.device
    }
}
impl Drop for GfxDevice {
    fn drop(&mut self) {
        #[cfg(debug_assertions)]
        debug_assert!(self.destroyed.get(), "GfxDevice must be destroyed before being dropped.");
    }
}
impl DebugType for GfxDevice {
    fn debug_type_name() -> &'static str {
        "GfxDevice"
    }
    fn vk_handle(&self) -> impl vk::Handle {
        self.device.handle()
    }
}
