use std::{rc::Rc, time::Duration};

use ash::vk;

use crate::{GfxError, GfxResult, foundation::debug_messenger::DebugType, foundation::device::GfxDevice};

/// # Destroy
/// 不实现 Drop，需要手动 destroy
pub struct GfxFence {
    fence: vk::Fence,
    device: Rc<GfxDevice>,
}

impl DebugType for GfxFence {
    fn debug_type_name() -> &'static str {
        "GfxFence"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.fence
    }
}

// 创建与销毁
impl GfxFence {
    /// # param
    /// * signaled - 是否创建时就 signaled
    pub fn new(device: Rc<GfxDevice>, signaled: bool, debug_name: &str) -> GfxResult<Self> {
        let fence_flags = if signaled { vk::FenceCreateFlags::SIGNALED } else { vk::FenceCreateFlags::empty() };
        let fence = unsafe { device.create_fence(&vk::FenceCreateInfo::default().flags(fence_flags), None)? };

        let fence = Self { fence, device };
        fence.device.set_debug_name(&fence, debug_name);
        Ok(fence)
    }

    #[inline]
    pub fn destroy(self) {
        unsafe {
            self.device.destroy_fence(self.fence, None);
        }
    }
}

// getters
impl GfxFence {
    #[inline]
    pub fn handle(&self) -> vk::Fence {
        self.fence
    }
}

// tools
impl GfxFence {
    /// 阻塞等待 fence，直到 signaled
    #[inline]
    pub fn wait(&self) -> GfxResult<()> {
        unsafe { self.device.wait_for_fences(std::slice::from_ref(&self.fence), true, u64::MAX)? };
        Ok(())
    }

    /// 最多等待 `timeout`，超时返回 [`GfxError::Timeout`]
    pub fn wait_timeout(&self, timeout: Duration) -> GfxResult<()> {
        let timeout_ns = u64::try_from(timeout.as_nanos()).unwrap_or(u64::MAX);
        match unsafe { self.device.wait_for_fences(std::slice::from_ref(&self.fence), true, timeout_ns) } {
            Ok(()) => Ok(()),
            Err(vk::Result::TIMEOUT) => Err(GfxError::Timeout(timeout)),
            Err(e) => Err(e.into()),
        }
    }

    #[inline]
    pub fn reset(&self) -> GfxResult<()> {
        unsafe { self.device.reset_fences(std::slice::from_ref(&self.fence))? };
        Ok(())
    }
}
