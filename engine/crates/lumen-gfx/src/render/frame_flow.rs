//! begin_frame / end_frame 的公共流程
//!
//! Vulkan 与 headless 的 device 只提供 acquire、提交、present 等具体操作，
//! 顺序、状态转换以及 swapchain 过期的处理都在这里完成

use crate::{
    GfxError, GfxResult,
    render::frame_ring::{FrameRing, FrameSlot},
};

pub(crate) trait FrameBackend {
    type Slot: FrameSlot;

    fn frame_ring(&mut self) -> &mut FrameRing<Self::Slot>;

    /// 新的一帧开始，通知资源管理器回收已经完成的帧的资源
    fn advance_resources(&mut self, frame_id: u64);

    fn recreate_pending(&self) -> bool;

    fn request_recreate(&mut self);

    /// 重建 swapchain，无法重建（例如窗口最小化）时返回 false，并保持 pending
    fn rebuild_swapchain(&mut self) -> GfxResult<bool>;

    /// 获取下一张 swapchain image，返回是否 suboptimal
    ///
    /// surface 过期时返回 [`GfxError::SurfaceOutOfDate`]
    fn acquire_image(&mut self) -> GfxResult<bool>;

    /// 分配并打开本帧的主命令
    fn open_frame_commands(&mut self) -> GfxResult<()>;

    /// 结束本帧的所有 command buffer，reset 当前 slot 的 fence 并提交
    fn submit_frame(&mut self) -> GfxResult<()>;

    /// 呈现本帧的 image，返回是否 suboptimal
    fn present_image(&mut self) -> GfxResult<bool>;
}

/// 返回 false 表示这一帧被跳过，调用方不应该录制命令，也不应该调用 [`end_frame`]
pub(crate) fn begin_frame<B: FrameBackend>(backend: &mut B) -> GfxResult<bool> {
    if backend.recreate_pending() && !backend.rebuild_swapchain()? {
        return Ok(false);
    }

    backend.frame_ring().begin()?;
    let frame_id = backend.frame_ring().frame_id();
    backend.advance_resources(frame_id);

    match backend.acquire_image() {
        Ok(suboptimal) => {
            if suboptimal {
                backend.request_recreate();
            }
        }
        Err(GfxError::SurfaceOutOfDate) => {
            log::debug!("surface out of date on acquire");
            backend.frame_ring().abort_acquire()?;
            backend.request_recreate();
            backend.rebuild_swapchain()?;
            return Ok(false);
        }
        Err(e) => {
            backend.frame_ring().abort_acquire()?;
            return Err(e);
        }
    }

    if let Err(e) = backend.frame_ring().start_recording() {
        backend.frame_ring().abort_acquire()?;
        return Err(e);
    }
    if let Err(e) = backend.open_frame_commands() {
        backend.frame_ring().abort_recording()?;
        return Err(e);
    }
    Ok(true)
}

/// 提交失败时当前 slot 回到 Idle，frame_idx 与 frame_id 不变
pub(crate) fn end_frame<B: FrameBackend>(backend: &mut B) -> GfxResult<()> {
    backend.frame_ring().ensure_recording()?;

    if let Err(e) = backend.submit_frame() {
        log::error!("failed to submit frame {}: {}", backend.frame_ring().frame_id(), e);
        backend.frame_ring().abort_recording()?;
        return Err(e);
    }
    backend.frame_ring().submitted()?;

    match backend.present_image() {
        Ok(suboptimal) => {
            if suboptimal {
                backend.request_recreate();
            }
        }
        Err(GfxError::SurfaceOutOfDate) => backend.request_recreate(),
        Err(e) => return Err(e),
    }
    if backend.recreate_pending() {
        backend.rebuild_swapchain()?;
    }
    Ok(())
}
