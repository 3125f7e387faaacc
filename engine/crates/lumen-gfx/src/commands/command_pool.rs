use std::rc::Rc;

use ash::vk;

use crate::{
    GfxResult,
    commands::command_queue::GfxQueueFamily,
    foundation::{debug_messenger::DebugType, device::GfxDevice},
};

/// command pool 是和 queue family 绑定的，而不是和 queue 绑定的
pub struct GfxCommandPool {
    handle: vk::CommandPool,
    device: Rc<GfxDevice>,

    debug_name: String,
    valid: bool,
}

// init & destroy
impl GfxCommandPool {
    pub fn new(
        device: Rc<GfxDevice>,
        queue_family: &GfxQueueFamily,
        flags: vk::CommandPoolCreateFlags,
        debug_name: &str,
    ) -> GfxResult<Self> {
        let handle = unsafe {
            device.create_command_pool(
                &vk::CommandPoolCreateInfo::default().queue_family_index(queue_family.queue_family_index).flags(flags),
                None,
            )?
        };

        let command_pool = Self {
            handle,
            device,
            debug_name: debug_name.to_string(),
            valid: true,
        };
        command_pool.device.set_debug_name(&command_pool, debug_name);
        Ok(command_pool)
    }

    pub fn destroy(mut self) {
        unsafe {
            self.device.destroy_command_pool(self.handle, None);
        }
        self.valid = false;
    }
}

// getters
impl GfxCommandPool {
    #[inline]
    pub fn handle(&self) -> vk::CommandPool {
        self.handle
    }

    #[inline]
    pub fn device(&self) -> &Rc<GfxDevice> {
        &self.device
    }
}

// tools
impl GfxCommandPool {
    /// 这个调用并不会释放资源，而是将 pool 内的 command buffer 设置到初始状态
    ///
    /// reset 之后，pool 内的 command buffer 又可以重新录制命令
    pub fn reset_all_buffers(&self) -> GfxResult<()> {
        unsafe { self.device.reset_command_pool(self.handle, vk::CommandPoolResetFlags::empty())? };
        Ok(())
    }

    /// 释放 command buffer，释放之后 command buffer 不能再被使用
    pub fn free_command_buffers(&self, command_buffers: &[vk::CommandBuffer]) {
        if command_buffers.is_empty() {
            return;
        }
        unsafe {
            self.device.free_command_buffers(self.handle, command_buffers);
        }
    }
}

impl DebugType for GfxCommandPool {
    fn debug_type_name() -> &'static str {
        "GfxCommandPool"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}

impl Drop for GfxCommandPool {
    fn drop(&mut self) {
        debug_assert!(!self.valid, "CommandPool {} must be destroyed manually.", self.debug_name);
    }
}
