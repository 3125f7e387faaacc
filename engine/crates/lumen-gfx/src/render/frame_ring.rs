//! frames in flight 的环形调度
//!
//! 每个 slot 的状态按 `Idle -> Acquiring -> Recording -> Submitted` 循环，
//! 再次轮到该 slot 时，等待它的 fence 之后回到 `Idle`。
//! Vulkan 与 headless 的 device 共用这一套状态机。

use crate::{GfxError, GfxResult, settings::MAX_FRAMES_IN_FLIGHT};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FrameState {
    /// fence 已经确认，slot 可以复用
    Idle,
    /// 正在获取 swapchain image
    Acquiring,
    /// transient 资源已经重置，正在录制命令
    Recording,
    /// 已经提交，GPU 可能还在执行
    Submitted,
}

/// 一个 frame slot 需要提供的同步操作
pub trait FrameSlot {
    /// 阻塞直到该 slot 上一次提交的工作在 GPU 上执行完毕
    fn wait_in_flight(&mut self) -> GfxResult<()>;

    /// 回收上一次使用该 slot 时分配的 command buffer，并重置 transient 的 command pool、descriptor pool
    ///
    /// 只会在 `wait_in_flight` 之后调用。fence 由提交的一方在提交之前 reset
    fn reset_transient(&mut self) -> GfxResult<()>;
}

pub struct FrameRing<S: FrameSlot> {
    slots: Vec<S>,
    states: Vec<FrameState>,

    /// 当前 slot 的索引，范围是 `0..MAX_FRAMES_IN_FLIGHT`
    frame_idx: usize,
    /// 单调递增的帧计数，每次提交加一
    frame_id: u64,
}

// new & init
impl<S: FrameSlot> FrameRing<S> {
    /// # Panics
    /// slot 的数量必须等于 [`MAX_FRAMES_IN_FLIGHT`]
    pub fn new(slots: Vec<S>) -> Self {
        assert_eq!(slots.len(), MAX_FRAMES_IN_FLIGHT, "frame ring needs exactly MAX_FRAMES_IN_FLIGHT slots");
        Self {
            states: vec![FrameState::Idle; slots.len()],
            slots,
            frame_idx: 0,
            frame_id: 0,
        }
    }
}

// getters
impl<S: FrameSlot> FrameRing<S> {
    #[inline]
    pub fn frame_idx(&self) -> usize {
        self.frame_idx
    }

    #[inline]
    pub fn frame_id(&self) -> u64 {
        self.frame_id
    }

    /// 当前 slot 的状态
    #[inline]
    pub fn state(&self) -> FrameState {
        self.states[self.frame_idx]
    }

    #[inline]
    pub fn slot_state(&self, idx: usize) -> FrameState {
        self.states[idx]
    }

    #[inline]
    pub fn slot(&self, idx: usize) -> &S {
        &self.slots[idx]
    }

    #[inline]
    pub fn current(&self) -> &S {
        &self.slots[self.frame_idx]
    }

    #[inline]
    pub fn current_mut(&mut self) -> &mut S {
        &mut self.slots[self.frame_idx]
    }

    #[inline]
    pub fn slots_mut(&mut self) -> impl Iterator<Item = &mut S> {
        self.slots.iter_mut()
    }
}

// 状态转换
impl<S: FrameSlot> FrameRing<S> {
    fn expect_state(&self, expected: FrameState) -> GfxResult<()> {
        let actual = self.state();
        if actual != expected {
            return Err(GfxError::InvalidFrameState { expected, actual });
        }
        Ok(())
    }

    /// 等待当前 slot 的 fence，进入 Acquiring
    pub fn begin(&mut self) -> GfxResult<()> {
        match self.state() {
            FrameState::Idle => {}
            FrameState::Submitted => {
                self.slots[self.frame_idx].wait_in_flight()?;
                self.states[self.frame_idx] = FrameState::Idle;
            }
            actual => {
                return Err(GfxError::InvalidFrameState {
                    expected: FrameState::Idle,
                    actual,
                });
            }
        }
        self.states[self.frame_idx] = FrameState::Acquiring;
        Ok(())
    }

    /// 获取 swapchain image 失败，回到 Idle，下次 begin 不需要再等待 fence
    pub fn abort_acquire(&mut self) -> GfxResult<()> {
        self.expect_state(FrameState::Acquiring)?;
        self.states[self.frame_idx] = FrameState::Idle;
        Ok(())
    }

    /// 重置 transient 资源，开始录制
    pub fn start_recording(&mut self) -> GfxResult<()> {
        self.expect_state(FrameState::Acquiring)?;
        self.slots[self.frame_idx].reset_transient()?;
        self.states[self.frame_idx] = FrameState::Recording;
        Ok(())
    }

    /// 检查当前是否可以提交
    #[inline]
    pub fn ensure_recording(&self) -> GfxResult<()> {
        self.expect_state(FrameState::Recording)
    }

    /// 本帧没有提交成功，回到 Idle
    ///
    /// fence 不会被这一帧 signal，下次 begin 不需要等待；frame_idx 与 frame_id 保持不变
    pub fn abort_recording(&mut self) -> GfxResult<()> {
        self.expect_state(FrameState::Recording)?;
        self.states[self.frame_idx] = FrameState::Idle;
        Ok(())
    }

    /// 当前 slot 已经提交，切换到下一个 slot
    pub fn submitted(&mut self) -> GfxResult<()> {
        self.expect_state(FrameState::Recording)?;
        self.states[self.frame_idx] = FrameState::Submitted;
        self.frame_idx = (self.frame_idx + 1) % MAX_FRAMES_IN_FLIGHT;
        self.frame_id += 1;
        Ok(())
    }

    /// 等待所有已提交的 slot，用于 device idle 之后同步状态
    pub fn wait_all(&mut self) -> GfxResult<()> {
        for (slot, state) in self.slots.iter_mut().zip(self.states.iter_mut()) {
            if *state == FrameState::Submitted {
                slot.wait_in_flight()?;
                *state = FrameState::Idle;
            }
        }
        Ok(())
    }

    pub fn into_slots(self) -> Vec<S> {
        self.slots
    }
}

#[cfg(test)]
mod tests {
    use std::{cell::RefCell, rc::Rc};

    use super::*;

    #[derive(Debug, PartialEq, Eq)]
    enum Event {
        Wait(usize),
        Reset(usize),
    }

    struct MockSlot {
        idx: usize,
        log: Rc<RefCell<Vec<Event>>>,
    }

    impl FrameSlot for MockSlot {
        fn wait_in_flight(&mut self) -> GfxResult<()> {
            self.log.borrow_mut().push(Event::Wait(self.idx));
            Ok(())
        }

        fn reset_transient(&mut self) -> GfxResult<()> {
            self.log.borrow_mut().push(Event::Reset(self.idx));
            Ok(())
        }
    }

    fn ring() -> (FrameRing<MockSlot>, Rc<RefCell<Vec<Event>>>) {
        let log = Rc::new(RefCell::new(Vec::new()));
        let slots = (0..MAX_FRAMES_IN_FLIGHT)
            .map(|idx| MockSlot {
                idx,
                log: log.clone(),
            })
            .collect();
        (FrameRing::new(slots), log)
    }

    fn run_frame(ring: &mut FrameRing<MockSlot>) -> usize {
        ring.begin().unwrap();
        ring.start_recording().unwrap();
        let idx = ring.frame_idx();
        ring.submitted().unwrap();
        idx
    }

    #[test]
    fn frame_indices_alternate() {
        let (mut ring, _) = ring();
        let indices = (0..6).map(|_| run_frame(&mut ring)).collect::<Vec<_>>();
        assert_eq!(indices, vec![0, 1, 0, 1, 0, 1]);
        assert_eq!(ring.frame_id(), 6);
    }

    #[test]
    fn fence_wait_precedes_reset_on_reuse() {
        let (mut ring, log) = ring();
        for _ in 0..4 {
            run_frame(&mut ring);
        }
        // 前两帧的 slot 从未提交过，不需要等待
        assert_eq!(
            *log.borrow(),
            vec![Event::Reset(0), Event::Reset(1), Event::Wait(0), Event::Reset(0), Event::Wait(1), Event::Reset(1)]
        );
    }

    #[test]
    fn aborted_acquire_does_not_wait_again() {
        let (mut ring, log) = ring();
        run_frame(&mut ring);
        run_frame(&mut ring);

        ring.begin().unwrap();
        ring.abort_acquire().unwrap();
        assert_eq!(ring.state(), FrameState::Idle);
        assert_eq!(ring.frame_idx(), 0);

        ring.begin().unwrap();
        ring.start_recording().unwrap();
        let waits = log.borrow().iter().filter(|e| **e == Event::Wait(0)).count();
        assert_eq!(waits, 1);
    }

    #[test]
    fn out_of_order_transitions_fail() {
        let (mut ring, _) = ring();
        assert!(matches!(
            ring.submitted(),
            Err(GfxError::InvalidFrameState {
                expected: FrameState::Recording,
                actual: FrameState::Idle
            })
        ));
        assert!(ring.start_recording().is_err());

        ring.begin().unwrap();
        assert!(ring.begin().is_err());
        ring.start_recording().unwrap();
        assert!(ring.abort_acquire().is_err());
        assert!(ring.ensure_recording().is_ok());
    }

    #[test]
    fn aborted_recording_keeps_frame_and_skips_wait() {
        let (mut ring, log) = ring();
        run_frame(&mut ring);
        run_frame(&mut ring);

        ring.begin().unwrap();
        ring.start_recording().unwrap();
        ring.abort_recording().unwrap();
        assert_eq!(ring.state(), FrameState::Idle);
        assert_eq!(ring.frame_idx(), 0);
        assert_eq!(ring.frame_id(), 2);
        assert!(ring.abort_recording().is_err());

        // 失败的那一帧没有提交，再次 begin 不等待 fence，但仍会回收 transient 资源
        assert_eq!(run_frame(&mut ring), 0);
        assert_eq!(ring.frame_id(), 3);
        let slot0 = log.borrow().iter().filter(|e| matches!(e, Event::Wait(0) | Event::Reset(0))).count();
        assert_eq!(slot0, 4);
        assert_eq!(log.borrow().iter().filter(|e| **e == Event::Wait(0)).count(), 1);
    }

    #[test]
    fn wait_all_returns_slots_to_idle() {
        let (mut ring, log) = ring();
        run_frame(&mut ring);
        run_frame(&mut ring);
        ring.wait_all().unwrap();
        assert_eq!(ring.slot_state(0), FrameState::Idle);
        assert_eq!(ring.slot_state(1), FrameState::Idle);
        assert_eq!(log.borrow().iter().filter(|e| matches!(e, Event::Wait(_))).count(), 2);
    }
}
