//! 最小的 lumen-gfx 示例：每帧用随时间变化的颜色清屏
//!
//! - `V` 切换 vsync
//! - 调整窗口尺寸会触发 swapchain 重建

mod app;
mod clear_renderer;
mod winit_window;

fn main() -> anyhow::Result<()> {
    app::WinitApp::run()
}
