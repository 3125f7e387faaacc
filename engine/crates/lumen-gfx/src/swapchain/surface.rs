use ash::vk;

use crate::{
    GfxError, GfxResult, foundation::debug_messenger::DebugType, gfx_core::GfxCore, window::WindowProvider,
};

/// # Destroy
///
/// 需要在 swapchain 销毁之后手动调用 `destroy`
pub struct GfxSurface {
    handle: vk::SurfaceKHR,
    loader: ash::khr::surface::Instance,
}

// new & init
impl GfxSurface {
    pub fn new(core: &GfxCore, window: &dyn WindowProvider) -> GfxResult<Self> {
        let loader = ash::khr::surface::Instance::new(core.vk_entry(), core.instance().ash_instance());

        let handle_error = |e: raw_window_handle::HandleError| {
            log::error!("window handle is not available: {}", e);
            GfxError::Vulkan(vk::Result::ERROR_INITIALIZATION_FAILED)
        };
        let display_handle = window.display_handle().map_err(handle_error)?;
        let window_handle = window.window_handle().map_err(handle_error)?;

        let handle = unsafe {
            ash_window::create_surface(
                core.vk_entry(),
                core.instance().ash_instance(),
                display_handle.as_raw(),
                window_handle.as_raw(),
                None,
            )?
        };

        let surface = Self { handle, loader };
        core.device().set_debug_name(&surface, "main");
        Ok(surface)
    }

    pub fn destroy(&self) {
        unsafe { self.loader.destroy_surface(self.handle, None) }
    }
}

// getters
impl GfxSurface {
    #[inline]
    pub fn handle(&self) -> vk::SurfaceKHR {
        self.handle
    }
}

// tools
impl GfxSurface {
    /// surface 的能力会随窗口尺寸变化，每次重建 swapchain 前都需要重新查询
    pub fn capabilities(&self, pdevice: vk::PhysicalDevice) -> GfxResult<vk::SurfaceCapabilitiesKHR> {
        Ok(unsafe { self.loader.get_physical_device_surface_capabilities(pdevice, self.handle)? })
    }

    pub fn present_modes(&self, pdevice: vk::PhysicalDevice) -> GfxResult<Vec<vk::PresentModeKHR>> {
        Ok(unsafe { self.loader.get_physical_device_surface_present_modes(pdevice, self.handle)? })
    }

    pub fn formats(&self, pdevice: vk::PhysicalDevice) -> GfxResult<Vec<vk::SurfaceFormatKHR>> {
        Ok(unsafe { self.loader.get_physical_device_surface_formats(pdevice, self.handle)? })
    }

    pub fn supports_present(&self, pdevice: vk::PhysicalDevice, queue_family_index: u32) -> GfxResult<bool> {
        Ok(unsafe { self.loader.get_physical_device_surface_support(pdevice, queue_family_index, self.handle)? })
    }
}

impl DebugType for GfxSurface {
    fn debug_type_name() -> &'static str {
        "GfxSurface"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}
