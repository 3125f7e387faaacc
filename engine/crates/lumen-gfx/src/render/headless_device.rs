//! 不依赖 GPU 与窗口的 device
//!
//! 和 Vulkan device 走同一套 begin_frame / end_frame 流程与 [`FrameRing`]，
//! 只把 fence、swapchain 等操作替换为 [`FrameEvent`] 记录

use std::{cell::RefCell, rc::Rc};

use ash::vk;

use crate::{
    GfxError, GfxResult,
    render::{
        frame_flow::{self, FrameBackend},
        frame_ring::{FrameRing, FrameSlot, FrameState},
        frame_slot::FrameCmds,
        render_device::RenderDevice,
    },
    resources::{headless::HeadlessResourceManager, manager::ResourceManager},
    settings::{DefaultGfxSettings, MAX_FRAMES_IN_FLIGHT},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameEvent {
    FenceWait { slot: usize },
    ResetPools { slot: usize },
    Acquire { slot: usize },
    FenceReset { slot: usize },
    Submit { slot: usize, frame_id: u64 },
    Present { slot: usize },
    RecreateSwapchain { extent: vk::Extent2D },
}

type EventLog = Rc<RefCell<Vec<FrameEvent>>>;

pub(crate) struct HeadlessSlot {
    idx: usize,
    log: EventLog,

    cmds: FrameCmds<u64>,
    /// 模拟 command pool 中还没有 free 的 command buffer
    pool: Vec<u64>,
}

impl HeadlessSlot {
    fn alloc_cmd(&mut self, id: u64) -> usize {
        self.pool.push(id);
        self.cmds.push(id)
    }
}

impl FrameSlot for HeadlessSlot {
    fn wait_in_flight(&mut self) -> GfxResult<()> {
        self.log.borrow_mut().push(FrameEvent::FenceWait { slot: self.idx });
        Ok(())
    }

    fn reset_transient(&mut self) -> GfxResult<()> {
        let freed = self.cmds.take_all();
        self.pool.retain(|id| !freed.contains(id));
        self.log.borrow_mut().push(FrameEvent::ResetPools { slot: self.idx });
        Ok(())
    }
}

pub struct HeadlessDevice {
    ring: FrameRing<HeadlessSlot>,
    resources: HeadlessResourceManager,
    log: EventLog,

    framebuffer_size: vk::Extent2D,
    swapchain_extent: vk::Extent2D,
    vsync: bool,

    /// 下一次 acquire 时报告 surface 过期
    out_of_date_on_acquire: bool,
    /// 下一次 present 时报告 surface 过期
    out_of_date_on_present: bool,
    /// 下一次提交失败，报告 device lost
    fail_next_submit: bool,
    pending_recreate: bool,

    next_cmd_id: u64,
}

// new & init
impl HeadlessDevice {
    pub fn new(extent: vk::Extent2D) -> Self {
        let log = EventLog::default();
        let slots = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|idx| HeadlessSlot {
                idx,
                log: log.clone(),
                cmds: FrameCmds::default(),
                pool: Vec::new(),
            })
            .collect();
        Self {
            ring: FrameRing::new(slots),
            resources: HeadlessResourceManager::new(),
            log,
            framebuffer_size: extent,
            swapchain_extent: extent,
            vsync: true,
            out_of_date_on_acquire: false,
            out_of_date_on_present: false,
            fail_next_submit: false,
            pending_recreate: false,
            next_cmd_id: 0,
        }
    }
}

// getters
impl HeadlessDevice {
    pub fn events(&self) -> Vec<FrameEvent> {
        self.log.borrow().clone()
    }

    #[inline]
    pub fn vsync(&self) -> bool {
        self.vsync
    }

    #[inline]
    pub fn frame_state(&self) -> FrameState {
        self.ring.state()
    }

    /// slot 的 command pool 中还没有 free 的 command buffer 数量
    #[inline]
    pub fn live_command_buffers(&self, slot: usize) -> usize {
        self.ring.slot(slot).pool.len()
    }
}

// 模拟窗口系统
impl HeadlessDevice {
    /// 模拟窗口尺寸变化，尺寸为 0 表示最小化
    pub fn set_framebuffer_size(&mut self, size: vk::Extent2D) {
        self.framebuffer_size = size;
        self.notify_resized();
    }

    /// 下一次 acquire 报告 surface 过期
    pub fn simulate_out_of_date(&mut self) {
        self.out_of_date_on_acquire = true;
    }

    /// 下一次 present 报告 surface 过期
    pub fn simulate_out_of_date_on_present(&mut self) {
        self.out_of_date_on_present = true;
    }

    /// 下一次提交报告 device lost
    pub fn simulate_submit_failure(&mut self) {
        self.fail_next_submit = true;
    }
}

// tools
impl HeadlessDevice {
    /// 在当前 slot 中分配一个额外的 command buffer，返回它在本帧中的序号
    pub fn get_command_buffer(&mut self) -> GfxResult<usize> {
        self.ring.ensure_recording()?;
        let id = self.next_cmd_id;
        self.next_cmd_id += 1;
        Ok(self.ring.current_mut().alloc_cmd(id))
    }
}

impl FrameBackend for HeadlessDevice {
    type Slot = HeadlessSlot;

    #[inline]
    fn frame_ring(&mut self) -> &mut FrameRing<HeadlessSlot> {
        &mut self.ring
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

    /// 尺寸为 0 时无法重建，返回 false
    fn rebuild_swapchain(&mut self) -> GfxResult<bool> {
        if self.framebuffer_size.width == 0 || self.framebuffer_size.height == 0 {
            log::debug!("framebuffer is zero sized, swapchain recreation deferred");
            return Ok(false);
        }
        self.ring.wait_all()?;
        self.swapchain_extent = self.framebuffer_size;
        self.pending_recreate = false;
        self.log.borrow_mut().push(FrameEvent::RecreateSwapchain {
            extent: self.swapchain_extent,
        });
        Ok(true)
    }

    fn acquire_image(&mut self) -> GfxResult<bool> {
        if std::mem::take(&mut self.out_of_date_on_acquire) {
            return Err(GfxError::SurfaceOutOfDate);
        }
        self.log.borrow_mut().push(FrameEvent::Acquire {
            slot: self.ring.frame_idx(),
        });
        Ok(false)
    }

    fn open_frame_commands(&mut self) -> GfxResult<()> {
        self.get_command_buffer().map(|_| ())
    }

    fn submit_frame(&mut self) -> GfxResult<()> {
        if std::mem::take(&mut self.fail_next_submit) {
            return Err(GfxError::DeviceLost);
        }
        let slot = self.ring.frame_idx();
        let mut log = self.log.borrow_mut();
        log.push(FrameEvent::FenceReset { slot });
        log.push(FrameEvent::Submit {
            slot,
            frame_id: self.ring.frame_id(),
        });
        Ok(())
    }

    fn present_image(&mut self) -> GfxResult<bool> {
        // 提交之后 ring 已经切换到下一个 slot
        let slot = (self.ring.frame_idx() + MAX_FRAMES_IN_FLIGHT - 1) % MAX_FRAMES_IN_FLIGHT;
        self.log.borrow_mut().push(FrameEvent::Present { slot });
        if std::mem::take(&mut self.out_of_date_on_present) {
            return Err(GfxError::SurfaceOutOfDate);
        }
        Ok(false)
    }
}

impl RenderDevice for HeadlessDevice {
    type Resources = HeadlessResourceManager;

    fn begin_frame(&mut self) -> GfxResult<bool> {
        frame_flow::begin_frame(self)
    }

    fn end_frame(&mut self) -> GfxResult<()> {
        frame_flow::end_frame(self)
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
        self.ring.wait_all()
    }

    #[inline]
    fn swapchain_format(&self) -> vk::Format {
        DefaultGfxSettings::DEFAULT_SURFACE_FORMAT.format
    }

    #[inline]
    fn swapchain_extent(&self) -> vk::Extent2D {
        self.swapchain_extent
    }

    fn notify_resized(&mut self) {
        self.pending_recreate = true;
    }

    fn set_vsync(&mut self, vsync: bool) {
        if self.vsync != vsync {
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
    use itertools::Itertools;

    use super::*;
    use crate::{
        resources::{
            desc::{BufferDesc, MemoryClass},
            usage::Usage,
        },
    };

    const EXTENT: vk::Extent2D = vk::Extent2D { width: 800, height: 600 };

    fn run_frames(device: &mut HeadlessDevice, n: usize) -> Vec<usize> {
        (0..n)
            .map(|_| {
                assert!(device.begin_frame().unwrap());
                let idx = device.frame_idx();
                device.end_frame().unwrap();
                idx
            })
            .collect()
    }

    #[test]
    fn frame_indices_cycle() {
        let mut device = HeadlessDevice::new(EXTENT);
        assert_eq!(run_frames(&mut device, 5), vec![0, 1, 0, 1, 0]);
        assert_eq!(device.frame_id(), 5);
    }

    #[test]
    fn slot_fence_waited_before_its_pools_reset() {
        let mut device = HeadlessDevice::new(EXTENT);
        run_frames(&mut device, 8);
        let events = device.events();

        for (i, event) in events.iter().enumerate() {
            let FrameEvent::ResetPools { slot } = *event else {
                continue;
            };
            let last_submit = events[..i].iter().rposition(|e| matches!(e, FrameEvent::Submit { slot: s, .. } if *s == slot));
            if let Some(submit_pos) = last_submit {
                let waited = events[submit_pos..i].contains(&FrameEvent::FenceWait { slot });
                assert!(waited, "slot {} reset without waiting its fence", slot);
            }
        }
    }

    #[test]
    fn out_of_date_skips_frame_and_recreates() {
        let mut device = HeadlessDevice::new(EXTENT);
        run_frames(&mut device, 1);
        device.set_framebuffer_size(vk::Extent2D { width: 1024, height: 768 });
        device.simulate_out_of_date();

        // 先处理 resize，然后 acquire 报告过期
        assert!(!device.begin_frame().unwrap());
        assert_eq!(device.frame_idx(), 1);
        assert!(matches!(device.end_frame(), Err(GfxError::InvalidFrameState { .. })));

        assert!(device.begin_frame().unwrap());
        device.end_frame().unwrap();
        assert_eq!(device.swapchain_extent(), vk::Extent2D { width: 1024, height: 768 });
        assert_eq!(device.frame_idx(), 0);
    }

    #[test]
    fn minimized_window_defers_recreation() {
        let mut device = HeadlessDevice::new(EXTENT);
        device.set_framebuffer_size(vk::Extent2D { width: 0, height: 0 });
        assert!(!device.begin_frame().unwrap());
        assert!(!device.begin_frame().unwrap());
        assert_eq!(device.frame_state(), FrameState::Idle);

        device.set_framebuffer_size(vk::Extent2D { width: 640, height: 480 });
        assert!(device.begin_frame().unwrap());
        device.end_frame().unwrap();
        assert_eq!(device.swapchain_extent(), vk::Extent2D { width: 640, height: 480 });
    }

    #[test]
    fn vsync_change_triggers_recreation() {
        let mut device = HeadlessDevice::new(EXTENT);
        device.set_vsync(false);
        run_frames(&mut device, 1);
        assert!(device.events().contains(&FrameEvent::RecreateSwapchain { extent: EXTENT }));
        assert!(!device.vsync());
    }

    #[test]
    fn destroyed_resources_released_after_frames_complete() {
        let mut device = HeadlessDevice::new(EXTENT);
        run_frames(&mut device, 1);

        let rm = device.resources_mut();
        let buffer = rm.create_buffer(&BufferDesc::new("ubo", 64, Usage::UNIFORM_BUFFER, MemoryClass::Upload)).unwrap();
        rm.destroy_buffer(buffer).unwrap();
        assert_eq!(device.resources().pending_release_count(), 1);

        // 销毁之前最后提交的是 frame 0，frame 2 开始时 frame 0 已经完成
        run_frames(&mut device, 1);
        assert_eq!(device.resources().pending_release_count(), 1);
        run_frames(&mut device, 1);
        assert_eq!(device.resources().pending_release_count(), 0);
    }

    #[test]
    fn command_buffers_are_freed_when_slot_is_reused() {
        let mut device = HeadlessDevice::new(EXTENT);
        for _ in 0..10 {
            assert!(device.begin_frame().unwrap());
            device.get_command_buffer().unwrap();
            device.get_command_buffer().unwrap();
            device.end_frame().unwrap();
        }
        // 每个 slot 只保留最近一帧的主命令与两个额外的 command buffer
        for slot in 0..MAX_FRAMES_IN_FLIGHT {
            assert_eq!(device.live_command_buffers(slot), 3);
        }

        // 复用 slot 0 时，上一轮的 command buffer 全部归还
        assert!(device.begin_frame().unwrap());
        assert_eq!(device.live_command_buffers(0), 1);
    }

    #[test]
    fn fence_reset_immediately_precedes_submit() {
        let mut device = HeadlessDevice::new(EXTENT);
        run_frames(&mut device, 5);
        let events = device.events();

        let submits = events.iter().positions(|e| matches!(e, FrameEvent::Submit { .. })).collect::<Vec<_>>();
        assert_eq!(submits.len(), 5);
        for i in submits {
            let FrameEvent::Submit { slot, .. } = events[i] else {
                unreachable!()
            };
            assert_eq!(events[i - 1], FrameEvent::FenceReset { slot });
        }
        // fence 只在提交之前 reset，回收 transient 资源时不会 reset
        let resets = events.iter().filter(|e| matches!(e, FrameEvent::FenceReset { .. })).count();
        assert_eq!(resets, 5);
    }

    #[test]
    fn failed_submit_returns_slot_to_idle() {
        let mut device = HeadlessDevice::new(EXTENT);
        run_frames(&mut device, 2);

        assert!(device.begin_frame().unwrap());
        device.simulate_submit_failure();
        assert!(matches!(device.end_frame(), Err(GfxError::DeviceLost)));
        assert_eq!(device.frame_state(), FrameState::Idle);
        assert_eq!(device.frame_idx(), 0);
        assert_eq!(device.frame_id(), 2);

        // 失败的一帧没有 signal fence，再次使用 slot 0 时不能等待它
        let waits_before = device.events().iter().filter(|e| **e == FrameEvent::FenceWait { slot: 0 }).count();
        assert_eq!(run_frames(&mut device, 1), vec![0]);
        let waits_after = device.events().iter().filter(|e| **e == FrameEvent::FenceWait { slot: 0 }).count();
        assert_eq!(waits_before, waits_after);
        assert_eq!(device.frame_id(), 3);
        assert_eq!(device.live_command_buffers(0), 1);
    }

    #[test]
    fn out_of_date_on_present_recreates_after_submit() {
        let mut device = HeadlessDevice::new(EXTENT);
        assert!(device.begin_frame().unwrap());
        device.simulate_out_of_date_on_present();
        device.end_frame().unwrap();

        let events = device.events();
        let present = events.iter().position(|e| *e == FrameEvent::Present { slot: 0 }).unwrap();
        assert_eq!(events.get(present + 2), Some(&FrameEvent::RecreateSwapchain { extent: EXTENT }));
        assert_eq!(device.frame_id(), 1);
        assert_eq!(run_frames(&mut device, 1), vec![1]);
    }
}
