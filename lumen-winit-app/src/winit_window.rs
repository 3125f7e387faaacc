use ash::vk;
use lumen_gfx::window::WindowProvider;
use raw_window_handle::{DisplayHandle, HandleError, HasDisplayHandle, HasWindowHandle, WindowHandle};
use winit::window::Window;

/// 把 winit 的窗口交给 device 使用
pub struct WinitWindow {
    window: Window,
}

impl WinitWindow {
    pub fn new(window: Window) -> Self {
        Self { window }
    }

    #[inline]
    pub fn window(&self) -> &Window {
        &self.window
    }
}

impl HasDisplayHandle for WinitWindow {
    fn display_handle(&self) -> Result<DisplayHandle<'_>, HandleError> {
        self.window.display_handle()
    }
}

impl HasWindowHandle for WinitWindow {
    fn window_handle(&self) -> Result<WindowHandle<'_>, HandleError> {
        self.window.window_handle()
    }
}

impl WindowProvider for WinitWindow {
    fn framebuffer_size(&self) -> vk::Extent2D {
        let size = self.window.inner_size();
        vk::Extent2D {
            width: size.width,
            height: size.height,
        }
    }
}
