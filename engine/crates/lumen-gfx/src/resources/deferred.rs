/// 延迟释放队列
///
/// 资源的 handle 在 destroy 时立即失效，但底层对象可能还被 in-flight 的帧引用，
/// 因此先放入队列，记录提交销毁时的 frame id，等对应的 fence 等待完成后再真正释放。
pub struct DeferredQueue<T> {
    /// (提交销毁时的 frame id, 待释放的对象)，frame id 单调不减
    items: Vec<(u64, T)>,
}

impl<T> Default for DeferredQueue<T> {
    fn default() -> Self {
        Self { items: Vec::new() }
    }
}

impl<T> DeferredQueue<T> {
    pub fn new() -> Self {
        Self::default()
    }

    #[inline]
    pub fn push(&mut self, frame_id: u64, item: T) {
        debug_assert!(self.items.last().is_none_or(|(last, _)| *last <= frame_id));
        self.items.push((frame_id, item));
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.items.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// 取出所有 frame id 小于 `complete_below` 的对象
    pub fn drain_completed(&mut self, complete_below: u64) -> Vec<T> {
        let split = self.items.partition_point(|(frame_id, _)| *frame_id < complete_below);
        self.items.drain(..split).map(|(_, item)| item).collect()
    }

    /// 取出全部对象，只能在 device idle 之后调用
    pub fn drain_all(&mut self) -> Vec<T> {
        self.items.drain(..).map(|(_, item)| item).collect()
    }
}

/// 在 frame `frame_id` 开始（已经等待过该 slot 的 fence）时，
/// frame id 小于该返回值的帧都已经在 GPU 上执行完毕
#[inline]
pub fn completed_frames_below(frame_id: u64, frames_in_flight: usize) -> u64 {
    (frame_id + 1).saturating_sub(frames_in_flight as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn drains_only_completed_frames() {
        let mut queue = DeferredQueue::new();
        queue.push(0, "a");
        queue.push(1, "b");
        queue.push(1, "c");
        queue.push(3, "d");

        assert!(queue.drain_completed(0).is_empty());
        assert_eq!(queue.drain_completed(2), vec!["a", "b", "c"]);
        assert_eq!(queue.len(), 1);
        assert_eq!(queue.drain_all(), vec!["d"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn completed_threshold_follows_frames_in_flight() {
        // 前两帧开始时，还没有任何帧被确认完成
        assert_eq!(completed_frames_below(0, 2), 0);
        assert_eq!(completed_frames_below(1, 2), 0);
        // frame 2 复用 frame 0 的 slot，等待 fence 之后 frame 0 已完成
        assert_eq!(completed_frames_below(2, 2), 1);
        assert_eq!(completed_frames_below(10, 2), 9);
    }
}
