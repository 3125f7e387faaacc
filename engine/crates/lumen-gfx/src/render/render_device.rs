use ash::vk;

use crate::{GfxResult, resources::manager::ResourceManager};

/// 逐帧的同步协议
///
/// ```ignore
/// if device.begin_frame()? {
///     // 录制命令...
///     device.end_frame()?;
/// }
/// ```
///
/// `begin_frame` 返回 false 表示本帧被跳过（swapchain 过期或者窗口最小化），此时不能调用 `end_frame`
pub trait RenderDevice {
    type Resources: ResourceManager;

    /// 等待当前 slot 的 fence，获取 swapchain image，重置该 slot 的 transient 资源
    fn begin_frame(&mut self) -> GfxResult<bool>;

    /// 提交并呈现，切换到下一个 slot
    fn end_frame(&mut self) -> GfxResult<()>;

    /// 当前 slot 的索引，在 `0..MAX_FRAMES_IN_FLIGHT` 之间循环
    fn frame_idx(&self) -> usize;

    /// 单调递增的帧计数
    fn frame_id(&self) -> u64;

    fn wait_idle(&mut self) -> GfxResult<()>;

    fn swapchain_format(&self) -> vk::Format;
    fn swapchain_extent(&self) -> vk::Extent2D;

    /// 窗口尺寸发生变化，下一次合适的时机重建 swapchain
    fn notify_resized(&mut self);
    fn set_vsync(&mut self, vsync: bool);

    fn resources(&self) -> &Self::Resources;
    fn resources_mut(&mut self) -> &mut Self::Resources;
}
