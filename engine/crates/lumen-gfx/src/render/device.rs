use std::{mem::ManuallyDrop, rc::Rc};

use ash::vk;
use itertools::Itertools;

use crate::{
    GfxError, GfxResult,
    basic::color::LabelColor,
    commands::{barrier::GfxImageBarrier, semaphore::GfxSemaphore, submit_info::GfxSubmitInfo},
    gfx_core::GfxCore,
    render::{
        cmd::CommandBuffer,
        frame_flow::{self, FrameBackend},
        frame_ring::FrameRing,
        frame_slot::FrameData,
        render_device::RenderDevice,
    },
    resources::{
        manager::ResourceManager,
        usage::{Transition, UsageState},
        vulkan_manager::VulkanResourceManager,
    },
    settings::MAX_FRAMES_IN_FLIGHT,
    swapchain::{render_swapchain::GfxSwapchain, surface::GfxSurface},
    window::WindowProvider,
};

const SWAPCHAIN_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

/// 刚获取的 swapchain image 转换为 color attachment，不关心原有内容
///
/// src stage 与 image available 的等待阶段相同，layout 转换会排在 acquire 之后
fn acquire_barrier(image: vk::Image) -> GfxImageBarrier {
    let transition = Transition {
        src: UsageState::new(
            vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT,
            vk::AccessFlags2::NONE,
            vk::ImageLayout::UNDEFINED,
        ),
        dst: UsageState::COLOR_ATTACHMENT,
    };
    GfxImageBarrier::from_transition(image, SWAPCHAIN_RANGE, &transition)
}

fn present_barrier(image: vk::Image) -> GfxImageBarrier {
    let transition = Transition {
        src: UsageState::COLOR_ATTACHMENT,
        dst: UsageState::PRESENT,
    };
    GfxImageBarrier::from_transition(image, SWAPCHAIN_RANGE, &transition)
}

fn create_render_finished(core: &GfxCore, count: usize) -> GfxResult<Vec<GfxSemaphore>> {
    let mut semaphores = Vec::with_capacity(count);
    for idx in 0..count {
        match GfxSemaphore::new(core.device().clone(), &format!("render-finished-{}", idx)) {
            Ok(semaphore) => semaphores.push(semaphore),
            Err(e) => {
                semaphores.into_iter().for_each(GfxSemaphore::destroy);
                return Err(e);
            }
        }
    }
    Ok(semaphores)
}

fn create_frames(core: &GfxCore) -> GfxResult<Vec<FrameData>> {
    let mut frames = Vec::with_capacity(MAX_FRAMES_IN_FLIGHT);
    for idx in 0..MAX_FRAMES_IN_FLIGHT {
        match FrameData::new(core, idx) {
            Ok(frame) => frames.push(frame),
            Err(e) => {
                frames.into_iter().for_each(FrameData::destroy);
                return Err(e);
            }
        }
    }
    Ok(frames)
}

/// 窗口上的渲染设备
///
/// 负责 frames in flight 的同步、swapchain 的获取、呈现与重建，并拥有资源管理器。
///
/// - 每个 frame slot 有独立的 fence、image available semaphore 以及 transient pool
/// - render finished semaphore 与 swapchain image 一一对应，present 会一直持有它直到 image 再次被获取
/// - 窗口最小化时 swapchain 的重建被推迟，`begin_frame` 返回 false
pub struct Device {
    resources: VulkanResourceManager,

    ring: ManuallyDrop<FrameRing<FrameData>>,
    swapchain: ManuallyDrop<GfxSwapchain>,
    render_finished: Vec<GfxSemaphore>,
    surface: GfxSurface,

    window: Rc<dyn WindowProvider>,
    core: Rc<GfxCore>,

    vsync: bool,
    /// 窗口尺寸变化、vsync 切换或者 present 报告过期之后置位
    pending_recreate: bool,
}

// new & init
impl Device {
    pub fn new(core: Rc<GfxCore>, window: Rc<dyn WindowProvider>) -> GfxResult<Self> {
        let _span = tracy_client::span!("Device::new");

        let surface = GfxSurface::new(&core, window.as_ref())?;
        match Self::init_presentation(&core, &surface, window.as_ref()) {
            Ok((swapchain, render_finished, frames)) => {
                let resources = match VulkanResourceManager::new(core.clone()) {
                    Ok(resources) => resources,
                    Err(e) => {
                        frames.into_iter().for_each(FrameData::destroy);
                        render_finished.into_iter().for_each(GfxSemaphore::destroy);
                        swapchain.destroy();
                        surface.destroy();
                        return Err(e);
                    }
                };
                Ok(Self {
                    resources,
                    ring: ManuallyDrop::new(FrameRing::new(frames)),
                    swapchain: ManuallyDrop::new(swapchain),
                    render_finished,
                    surface,
                    window,
                    vsync: core.settings().vsync,
                    core,
                    pending_recreate: false,
                })
            }
            Err(e) => {
                surface.destroy();
                Err(e)
            }
        }
    }

    fn init_presentation(
        core: &GfxCore,
        surface: &GfxSurface,
        window: &dyn WindowProvider,
    ) -> GfxResult<(GfxSwapchain, Vec<GfxSemaphore>, Vec<FrameData>)> {
        let pdevice = core.physical_device();
        if !surface.supports_present(pdevice.vk_handle, pdevice.gfx_queue_family.queue_family_index)? {
            log::error!("gfx queue family can not present to the window surface");
            return Err(GfxError::Vulkan(vk::Result::ERROR_INCOMPATIBLE_DISPLAY_KHR));
        }

        let swapchain = GfxSwapchain::new(
            core,
            surface,
            window.framebuffer_size(),
            core.settings().vsync,
            vk::SwapchainKHR::null(),
        )?;
        let render_finished = match create_render_finished(core, swapchain.image_count()) {
            Ok(semaphores) => semaphores,
            Err(e) => {
                swapchain.destroy();
                return Err(e);
            }
        };
        match create_frames(core) {
            Ok(frames) => Ok((swapchain, render_finished, frames)),
            Err(e) => {
                render_finished.into_iter().for_each(GfxSemaphore::destroy);
                swapchain.destroy();
                Err(e)
            }
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if let Err(e) = self.core.device().wait_idle() {
            log::error!("wait idle before destroying device: {}", e);
        }
        unsafe {
            ManuallyDrop::take(&mut self.ring).into_slots().into_iter().for_each(FrameData::destroy);
            ManuallyDrop::take(&mut self.swapchain).destroy();
        }
        self.render_finished.drain(..).for_each(GfxSemaphore::destroy);
        self.surface.destroy();
        // resources 随字段一起 drop，它会释放所有剩余的资源
    }
}

// getters
impl Device {
    #[inline]
    pub fn core(&self) -> &Rc<GfxCore> {
        &self.core
    }

    #[inline]
    pub fn window(&self) -> &Rc<dyn WindowProvider> {
        &self.window
    }

    #[inline]
    pub fn swapchain(&self) -> &GfxSwapchain {
        &self.swapchain
    }

    #[inline]
    pub fn vsync(&self) -> bool {
        self.vsync
    }
}

// tools
impl Device {
    /// 等待 device idle 之后重建 swapchain，返回是否重建成功
    ///
    /// framebuffer 尺寸为 0（窗口最小化）时不会阻塞等待窗口恢复：
    /// 重建请求保持 pending 并返回 `Ok(false)`，之后每次 `begin_frame` 都会重试，
    /// 在尺寸恢复之前 `begin_frame` 都返回 false，跳过这些帧
    pub fn recreate_swapchain(&mut self) -> GfxResult<bool> {
        let framebuffer_size = self.window.framebuffer_size();
        if framebuffer_size.width == 0 || framebuffer_size.height == 0 {
            log::debug!("framebuffer is zero sized, swapchain recreation deferred");
            self.pending_recreate = true;
            return Ok(false);
        }

        let _span = tracy_client::span!("Device::recreate_swapchain");
        self.core.device().wait_idle()?;
        self.ring.wait_all()?;

        let swapchain =
            GfxSwapchain::new(&self.core, &self.surface, framebuffer_size, self.vsync, self.swapchain.handle())?;
        let old = std::mem::replace(&mut *self.swapchain, swapchain);
        old.destroy();

        if self.render_finished.len() != self.swapchain.image_count() {
            let render_finished = create_render_finished(&self.core, self.swapchain.image_count())?;
            std::mem::replace(&mut self.render_finished, render_finished).into_iter().for_each(GfxSemaphore::destroy);
        }

        self.pending_recreate = false;
        Ok(true)
    }

    /// 本帧的主命令，由 begin_frame 打开，end_frame 提交
    pub fn cmd(&self) -> GfxResult<CommandBuffer<'_>> {
        self.command_buffer(0)
    }

    /// 从当前 slot 的 transient pool 中分配并打开一个新的 command buffer，返回它在本帧中的序号
    ///
    /// 没有被 flush 的 command buffer 会在 end_frame 时先于主命令提交
    pub fn get_command_buffer(&mut self, name: &str) -> GfxResult<usize> {
        self.ring.ensure_recording()?;
        let frame = self.ring.current_mut();
        let idx = frame.alloc_cmd(name)?;
        if let Some(cmd) = frame.recording_cmd(idx) {
            cmd.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, name)?;
        }
        Ok(idx)
    }

    /// 本帧中序号为 `idx` 的 command buffer 的录制接口
    pub fn command_buffer(&self, idx: usize) -> GfxResult<CommandBuffer<'_>> {
        self.ring.ensure_recording()?;
        let cmd = self
            .ring
            .current()
            .recording_cmd(idx)
            .ok_or_else(|| GfxError::InvalidHandle(format!("command buffer {} of frame {}", idx, self.ring.frame_id())))?;
        Ok(CommandBuffer::new(cmd, &self.resources, &self.swapchain, self.ring.frame_id()))
    }

    /// 结束并立即提交某个 command buffer
    ///
    /// 不等待任何 semaphore；之后提交的 in-flight fence 会覆盖它的执行
    pub fn flush_command_buffer(&mut self, idx: usize) -> GfxResult<()> {
        self.ring.ensure_recording()?;
        if idx == 0 {
            return Err(GfxError::InvalidHandle("the frame command buffer is submitted by end_frame".to_string()));
        }
        let frame = self.ring.current_mut();
        let cmd = frame
            .recording_cmd(idx)
            .ok_or_else(|| GfxError::InvalidHandle(format!("command buffer {} is not recording", idx)))?;
        cmd.end()?;
        self.core.gfx_queue().submit(&[GfxSubmitInfo::new(&[cmd])], None)?;
        frame.mark_submitted(idx);
        Ok(())
    }
}

impl FrameBackend for Device {
    type Slot = FrameData;

    #[inline]
    fn frame_ring(&mut self) -> &mut FrameRing<FrameData> {
        &mut *self.ring
    }

    #[inline]
    fn advance_resources(&mut self, frame_id: u64) {
        self.resources.advance_frame(frame_id);
    }

    #[inline]
    fn recreate_pending(&self) -> bool {
        self.pending_recreate
    }

    #[inline]
    fn request_recreate(&mut self) {
        self.pending_recreate = true;
    }

    #[inline]
    fn rebuild_swapchain(&mut self) -> GfxResult<bool> {
        self.recreate_swapchain()
    }

    fn acquire_image(&mut self) -> GfxResult<bool> {
        self.swapchain.acquire_next_image(&self.ring.current().image_available)
    }

    fn open_frame_commands(&mut self) -> GfxResult<()> {
        let frame_id = self.ring.frame_id();
        let barrier = acquire_barrier(self.swapchain.current_image());
        let frame = self.ring.current_mut();
        let idx = frame.alloc_cmd(&format!("frame-{}", frame_id))?;
        if let Some(cmd) = frame.recording_cmd(idx) {
            cmd.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, "frame")?;
            cmd.insert_label(&format!("frame-{}", frame_id), LabelColor::COLOR_FRAME);
            cmd.image_memory_barrier(vk::DependencyFlags::empty(), std::slice::from_ref(&barrier));
        }
        Ok(())
    }

    fn submit_frame(&mut self) -> GfxResult<()> {
        let frame = self.ring.current();
        let primary = frame
            .recording_cmd(0)
            .ok_or_else(|| GfxError::InvalidHandle("frame command buffer is missing".to_string()))?;
        primary.insert_label("present", LabelColor::COLOR_PRESENT);
        primary.image_memory_barrier(
            vk::DependencyFlags::empty(),
            std::slice::from_ref(&present_barrier(self.swapchain.current_image())),
        );

        let extras = frame.unsubmitted_extra_cmds().collect_vec();
        for cmd in &extras {
            cmd.end()?;
        }
        primary.end()?;

        let render_finished = &self.render_finished[self.swapchain.current_image_index() as usize];
        let batch = extras.into_iter().chain(std::iter::once(primary)).collect_vec();
        let submit_info = GfxSubmitInfo::new(&batch)
            .wait(&frame.image_available, vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT)
            .signal(render_finished, vk::PipelineStageFlags2::ALL_COMMANDS);

        // fence 紧挨着提交 reset，提交之前的任何失败都不会留下一个永远不会 signal 的 fence
        frame.in_flight.reset()?;
        match self.core.gfx_queue().submit(&[submit_info], Some(&frame.in_flight)) {
            Ok(()) => Ok(()),
            Err(e) => {
                // flush 过的 command buffer 不受 fence 覆盖，slot 复用之前需要等它们执行完
                if let Err(wait_err) = self.core.device().wait_idle() {
                    log::error!("wait idle after failed submit: {}", wait_err);
                }
                Err(e)
            }
        }
    }

    fn present_image(&mut self) -> GfxResult<bool> {
        let render_finished = &self.render_finished[self.swapchain.current_image_index() as usize];
        self.swapchain.present_image(self.core.gfx_queue(), &[render_finished])
    }
}

impl RenderDevice for Device {
    type Resources = VulkanResourceManager;

    fn begin_frame(&mut self) -> GfxResult<bool> {
        let _span = tracy_client::span!("Device::begin_frame");
        frame_flow::begin_frame(self)
    }

    fn end_frame(&mut self) -> GfxResult<()> {
        let _span = tracy_client::span!("Device::end_frame");
        frame_flow::end_frame(self)?;
        tracy_client::frame_mark();
        Ok(())
    }

    #[inline]
    fn frame_idx(&self) -> usize {
        self.ring.frame_idx()
    }

    #[inline]
    fn frame_id(&self) -> u64 {
        self.ring.frame_id()
    }

    fn wait_idle(&mut self) -> GfxResult<()> {
        self.core.device().wait_idle()?;
        self.ring.wait_all()
    }

    #[inline]
    fn swapchain_format(&self) -> vk::Format {
        self.swapchain.format()
    }

    #[inline]
    fn swapchain_extent(&self) -> vk::Extent2D {
        self.swapchain.extent()
    }

    fn notify_resized(&mut self) {
        self.pending_recreate = true;
    }

    fn set_vsync(&mut self, vsync: bool) {
        if self.vsync != vsync {
            log::info!("vsync {}", if vsync { "on" } else { "off" });
            self.vsync = vsync;
            self.pending_recreate = true;
        }
    }

    #[inline]
    fn resources(&self) -> &Self::Resources {
        &self.resources
    }

    #[inline]
    fn resources_mut(&mut self) -> &mut Self::Resources {
        &mut self.resources
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn swapchain_barriers_bracket_the_frame() {
        let image = vk::Image::null();

        let acquire = *acquire_barrier(image).inner();
        assert_eq!(acquire.old_layout, vk::ImageLayout::UNDEFINED);
        assert_eq!(acquire.new_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(acquire.src_stage_mask, vk::PipelineStageFlags2::COLOR_ATTACHMENT_OUTPUT);
        assert!(acquire.dst_access_mask.contains(vk::AccessFlags2::COLOR_ATTACHMENT_WRITE));

        let present = *present_barrier(image).inner();
        assert_eq!(present.old_layout, vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL);
        assert_eq!(present.new_layout, vk::ImageLayout::PRESENT_SRC_KHR);
        assert_eq!(present.src_access_mask, vk::AccessFlags2::COLOR_ATTACHMENT_WRITE);
        assert_eq!(present.subresource_range.aspect_mask, vk::ImageAspectFlags::COLOR);
    }
}
