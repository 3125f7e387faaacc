use ash::vk;
use itertools::Itertools;

use crate::{
    GfxResult,
    commands::{command_buffer::GfxCommandBuffer, command_pool::GfxCommandPool, fence::GfxFence, semaphore::GfxSemaphore},
    gfx_core::GfxCore,
    render::frame_ring::FrameSlot,
    resources::descriptor_pool::{GfxDescriptorPool, uniform_pool_sizes},
};

struct FrameCmd<C> {
    cmd: C,
    /// 已经通过 flush 单独提交
    submitted: bool,
}

/// 一帧之内分配的 command buffer，第一个是 begin_frame 打开的主命令
///
/// slot 被复用时通过 [`FrameCmds::take_all`] 整体取出，交还给 command pool
pub(crate) struct FrameCmds<C> {
    cmds: Vec<FrameCmd<C>>,
}

impl<C> Default for FrameCmds<C> {
    fn default() -> Self {
        Self { cmds: Vec::new() }
    }
}

impl<C> FrameCmds<C> {
    /// 返回它在本帧中的序号
    pub fn push(&mut self, cmd: C) -> usize {
        self.cmds.push(FrameCmd { cmd, submitted: false });
        self.cmds.len() - 1
    }

    /// 还可以录制的 command buffer，已经提交的返回 None
    pub fn recording(&self, idx: usize) -> Option<&C> {
        self.cmds.get(idx).filter(|c| !c.submitted).map(|c| &c.cmd)
    }

    /// 除主命令之外，还没有提交的 command buffer，按分配顺序排列
    pub fn unsubmitted_extras(&self) -> impl Iterator<Item = &C> {
        self.cmds.iter().skip(1).filter(|c| !c.submitted).map(|c| &c.cmd)
    }

    pub fn mark_submitted(&mut self, idx: usize) {
        if let Some(cmd) = self.cmds.get_mut(idx) {
            cmd.submitted = true;
        }
    }

    /// 取出所有 command buffer，无论是否已经提交
    pub fn take_all(&mut self) -> Vec<C> {
        std::mem::take(&mut self.cmds).into_iter().map(|c| c.cmd).collect()
    }
}

/// 一个 frame in flight 独占的同步对象与临时资源
///
/// 同一个 slot 再次被使用之前，需要等待 `in_flight` fence，
/// 之后 command pool 与 descriptor pool 才能被整体 reset
pub struct FrameData {
    /// swapchain image 可以被写入时 signal
    pub image_available: GfxSemaphore,
    /// 该 slot 的提交执行完毕时 signal，创建时处于 signaled 状态
    pub in_flight: GfxFence,

    command_pool: GfxCommandPool,
    /// 每帧临时分配的 bind group
    descriptor_pool: GfxDescriptorPool,

    cmds: FrameCmds<GfxCommandBuffer>,
}

// new & init
impl FrameData {
    pub fn new(core: &GfxCore, idx: usize) -> GfxResult<Self> {
        let device = core.device();
        let settings = core.settings();

        let image_available = GfxSemaphore::new(device.clone(), &format!("image-available-{}", idx))?;
        let in_flight = GfxFence::new(device.clone(), true, &format!("in-flight-{}", idx))?;
        let command_pool = GfxCommandPool::new(
            device.clone(),
            &core.physical_device().gfx_queue_family,
            vk::CommandPoolCreateFlags::TRANSIENT,
            &format!("frame-{}", idx),
        )?;
        let descriptor_pool = GfxDescriptorPool::new(
            device.clone(),
            vk::DescriptorPoolCreateFlags::empty(),
            settings.max_transient_bind_groups,
            &uniform_pool_sizes(settings.descriptors_per_type),
            &format!("transient-{}", idx),
        )?;

        Ok(Self {
            image_available,
            in_flight,
            command_pool,
            descriptor_pool,
            cmds: FrameCmds::default(),
        })
    }

    /// 调用前需要确保 GPU 不再使用该 slot
    pub fn destroy(self) {
        self.descriptor_pool.destroy();
        self.command_pool.destroy();
        self.in_flight.destroy();
        self.image_available.destroy();
    }
}

// getters
impl FrameData {
    /// 还可以录制的 command buffer，已经提交的返回 None
    #[inline]
    pub fn recording_cmd(&self, idx: usize) -> Option<&GfxCommandBuffer> {
        self.cmds.recording(idx)
    }

    /// 除主命令之外，还没有提交的 command buffer，按分配顺序排列
    #[inline]
    pub fn unsubmitted_extra_cmds(&self) -> impl Iterator<Item = &GfxCommandBuffer> {
        self.cmds.unsubmitted_extras()
    }
}

// tools
impl FrameData {
    /// 从 transient pool 中分配一个 primary command buffer，返回它在本帧中的序号
    pub fn alloc_cmd(&mut self, name: &str) -> GfxResult<usize> {
        let cmd = GfxCommandBuffer::new(&self.command_pool, name)?;
        Ok(self.cmds.push(cmd))
    }

    #[inline]
    pub fn mark_submitted(&mut self, idx: usize) {
        self.cmds.mark_submitted(idx);
    }
}

impl FrameSlot for FrameData {
    fn wait_in_flight(&mut self) -> GfxResult<()> {
        let _span = tracy_client::span!("FrameData::wait_in_flight");
        self.in_flight.wait()
    }

    fn reset_transient(&mut self) -> GfxResult<()> {
        // reset pool 只会让 command buffer 回到初始状态，不会回收，需要先显式 free
        let freed = self.cmds.take_all().iter().map(GfxCommandBuffer::vk_handle).collect_vec();
        self.command_pool.free_command_buffers(&freed);
        self.command_pool.reset_all_buffers()?;
        self.descriptor_pool.reset()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flushed_cmds_are_skipped_but_still_released() {
        let mut cmds = FrameCmds::default();
        assert_eq!(cmds.push("frame"), 0);
        assert_eq!(cmds.push("upload"), 1);
        assert_eq!(cmds.push("compute"), 2);

        cmds.mark_submitted(1);
        assert_eq!(cmds.recording(0), Some(&"frame"));
        assert_eq!(cmds.recording(1), None);
        assert_eq!(cmds.recording(3), None);
        assert_eq!(cmds.unsubmitted_extras().copied().collect::<Vec<_>>(), vec!["compute"]);

        // flush 过的 command buffer 同样要归还给 pool
        assert_eq!(cmds.take_all(), vec!["frame", "upload", "compute"]);
        assert!(cmds.take_all().is_empty());
    }
}
