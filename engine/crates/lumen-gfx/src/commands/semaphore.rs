use std::rc::Rc;

use ash::vk;

use crate::{GfxResult, foundation::debug_messenger::DebugType, foundation::device::GfxDevice};

/// binary semaphore，用于 GPU 内部的同步
///
/// # Destroy
/// 不实现 Drop，需要手动 destroy
pub struct GfxSemaphore {
    semaphore: vk::Semaphore,
    device: Rc<GfxDevice>,
}

// 创建与销毁
impl GfxSemaphore {
    pub fn new(device: Rc<GfxDevice>, debug_name: &str) -> GfxResult<Self> {
        let semaphore = unsafe { device.create_semaphore(&vk::SemaphoreCreateInfo::default(), None)? };

        let semaphore = Self { semaphore, device };
        semaphore.device.set_debug_name(&semaphore, debug_name);
        Ok(semaphore)
    }

    #[inline]
    pub fn destroy(self) {
        unsafe {
            self.device.destroy_semaphore(self.semaphore, None);
        }
    }
}

// getters
impl GfxSemaphore {
    #[inline]
    pub fn handle(&self) -> vk::Semaphore {
        self.semaphore
    }
}

impl DebugType for GfxSemaphore {
    fn debug_type_name() -> &'static str {
        "GfxSemaphore"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.semaphore
    }
}
