use std::{
    collections::HashSet,
    ffi::{CStr, CString, c_char},
};

use ash::vk;
use itertools::Itertools;

use crate::{GfxError, GfxResult, foundation::debug_messenger::GfxDebugMsger};

pub struct GfxInstance {
    pub(crate) ash_instance: ash::Instance,
}

// new & destroy
impl GfxInstance {
    /// 设置所需的 layers 和 extensions，创建 vk instance
    ///
    /// `extra_instance_exts` 一般是 surface 所需的 extensions
    pub fn new(
        vk_entry: &ash::Entry,
        app_name: &str,
        engine_name: &str,
        extra_instance_exts: &[&'static CStr],
    ) -> GfxResult<Self> {
        let _span = tracy_client::span!("GfxInstance::new");

        let app_name = CString::new(app_name).unwrap_or_default();
        let engine_name = CString::new(engine_name).unwrap_or_default();
        let app_info = vk::ApplicationInfo::default()
            .api_version(vk::API_VERSION_1_3) // dynamic rendering 和 synchronization2 都需要 1.3
            .application_name(app_name.as_ref())
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(engine_name.as_ref())
            .engine_version(vk::make_api_version(0, 1, 0, 0));

        let enabled_extensions = Self::get_extensions(vk_entry, extra_instance_exts)?;
        log::info!(
            "instance extensions: {}",
            enabled_extensions.iter().map(|ext| format!("\n\t{:?}", unsafe { CStr::from_ptr(*ext) })).join("")
        );

        // 无需在代码中开启 validation layer，使用 vulkan configurator 控制
        let mut debug_utils_messenger_ci = GfxDebugMsger::debug_utils_messenger_ci();
        let instance_ci = vk::InstanceCreateInfo::default()
            .application_info(&app_info)
            .enabled_extension_names(&enabled_extensions)
            .push_next(&mut debug_utils_messenger_ci);

        let ash_instance = unsafe { vk_entry.create_instance(&instance_ci, None)? };

        Ok(Self { ash_instance })
    }

    pub fn destroy(&self) {
        log::info!("destroying instance");
        unsafe {
            self.ash_instance.destroy_instance(None);
        }
    }
}

// getters
impl GfxInstance {
    #[inline]
    pub fn ash_instance(&self) -> &ash::Instance {
        &self.ash_instance
    }

    #[inline]
    pub fn vk_instance(&self) -> vk::Instance {
        self.ash_instance.handle()
    }
}

// 构造过程
impl GfxInstance {
    /// instance 所需的，且受支持的 extension
    fn get_extensions(vk_entry: &ash::Entry, extra_instance_exts: &[&'static CStr]) -> GfxResult<Vec<*const c_char>> {
        let all_ext_props = unsafe { vk_entry.enumerate_instance_extension_properties(None)? };

        let mut enabled_extensions: HashSet<&'static CStr> = HashSet::new();
        for ext in extra_instance_exts.iter().chain(Self::basic_instance_exts().iter()) {
            let supported = all_ext_props
                .iter()
                .any(|supported_ext| supported_ext.extension_name_as_c_str().is_ok_and(|name| name == *ext));
            if !supported {
                log::error!("required instance extension {:?} is missing", ext);
                return Err(GfxError::Vulkan(vk::Result::ERROR_EXTENSION_NOT_PRESENT));
            }
            enabled_extensions.insert(ext);
        }

        Ok(enabled_extensions.iter().map(|ext| ext.as_ptr()).collect_vec())
    }

    /// 必须要开启的 instance extensions
    fn basic_instance_exts() -> [&'static CStr; 1] {
        [
            // debug messenger、debug name 以及 debug label
            vk::EXT_DEBUG_UTILS_NAME,
        ]
    }
}
