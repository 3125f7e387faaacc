use ash::vk;
use raw_window_handle::{HasDisplayHandle, HasWindowHandle};

/// 窗口系统需要提供的能力
///
/// device 通过它创建 surface，并在重建 swapchain 时查询 framebuffer 的尺寸
pub trait WindowProvider: HasDisplayHandle + HasWindowHandle {
    /// framebuffer 的像素尺寸，窗口最小化时为 0
    fn framebuffer_size(&self) -> vk::Extent2D;

    #[inline]
    fn is_minimized(&self) -> bool {
        let size = self.framebuffer_size();
        size.width == 0 || size.height == 0
    }
}
