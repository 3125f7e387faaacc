use std::{ffi::CString, rc::Rc};

use ash::vk;
use itertools::Itertools;

use crate::{
    GfxResult,
    commands::{fence::GfxFence, submit_info::GfxSubmitInfo},
    foundation::{debug_messenger::DebugType, device::GfxDevice},
};

#[derive(Clone, Debug)]
pub struct GfxQueueFamily {
    pub name: String,
    pub queue_family_index: u32,
    pub queue_flags: vk::QueueFlags,
    pub queue_count: u32,
}

/// # destroy
///
/// queue 随 device 一起销毁
pub struct GfxCommandQueue {
    pub(crate) vk_queue: vk::Queue,
    pub(crate) queue_family: GfxQueueFamily,
    pub(crate) device: Rc<GfxDevice>,
}

impl DebugType for GfxCommandQueue {
    fn debug_type_name() -> &'static str {
        "GfxCommandQueue"
    }
    fn vk_handle(&self) -> impl vk::Handle {
        self.vk_queue
    }
}

// getters
impl GfxCommandQueue {
    #[inline]
    pub fn queue_family(&self) -> &GfxQueueFamily {
        &self.queue_family
    }

    #[inline]
    pub fn handle(&self) -> vk::Queue {
        self.vk_queue
    }
}

// tools
impl GfxCommandQueue {
    pub fn submit(&self, batches: &[GfxSubmitInfo], fence: Option<&GfxFence>) -> GfxResult<()> {
        let _span = tracy_client::span!("GfxCommandQueue::submit");
        // batches 的存在是有必要的，submit_infos 引用的 batches 的内存
        let submit_infos = batches.iter().map(|b| b.submit_info()).collect_vec();
        unsafe {
            self.device.queue_submit2(self.vk_queue, &submit_infos, fence.map_or(vk::Fence::null(), |f| f.handle()))?
        };
        Ok(())
    }

    /// 根据 Vulkan 规范，vkQueueWaitIdle 应该和 Fence 效率相同
    #[inline]
    pub fn wait_idle(&self) -> GfxResult<()> {
        unsafe { self.device.queue_wait_idle(self.vk_queue)? };
        Ok(())
    }
}

// debug 相关命令
impl GfxCommandQueue {
    #[inline]
    pub fn begin_label(&self, label_name: &str, label_color: glam::Vec4) {
        let name = CString::new(label_name).unwrap_or_default();
        unsafe {
            self.device.debug_utils.queue_begin_debug_utils_label(
                self.vk_queue,
                &vk::DebugUtilsLabelEXT::default().label_name(name.as_c_str()).color(label_color.into()),
            );
        }
    }

    #[inline]
    pub fn end_label(&self) {
        unsafe {
            self.device.debug_utils.queue_end_debug_utils_label(self.vk_queue);
        }
    }
}
