use std::{
    marker::PhantomData,
    ops::{Index, IndexMut},
};

use crate::handle::Handle;

/// 16 位 index 能表示的最大槽位数量
pub const MAX_CAPACITY: usize = 1 << 16;
/// 未指定容量时的初始槽位数量
pub const DEFAULT_CAPACITY: usize = 128;

/// freelist 的结束标记
const NIL: u32 = u32::MAX;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum PoolError {
    /// 所有可表示的槽位都已被占用
    #[error("handle pool exhausted: all {capacity} slots are in use")]
    Exhausted { capacity: usize },
}

struct Slot<T> {
    value: Option<T>,
    generation: u16,
    /// 下一个空闲槽位的 index，只有在槽位空闲时才有意义
    next_free: u32,
}

impl<T> Slot<T> {
    fn vacant(next_free: u32) -> Self {
        Self {
            value: None,
            generation: 0,
            next_free,
        }
    }
}

/// 代际句柄池
///
/// - `T`: 池中实际存储的数据
/// - `K`: handle 的种类标记，默认与 `T` 相同。后端可以用自己的资源记录类型作为 `T`，
///   同时对外发出与后端无关的 `Handle<K>`
///
/// # 存储
/// 存储由若干个 chunk 组成，每个 chunk 是一块独立的堆内存。扩容时追加一个新 chunk，
/// 大小等于当前容量（即容量翻倍），旧 chunk 不会被重新分配，因此元素地址在扩容前后保持不变。
///
/// index 0 被保留，保证全零的 handle 永远不会被分配出去。
pub struct Pool<T, K = T> {
    chunks: Vec<Box<[Slot<T>]>>,
    /// 每个 chunk 第一个槽位的全局 index，与 `chunks` 一一对应
    chunk_starts: Vec<usize>,
    capacity: usize,
    free_head: u32,
    len: usize,
    _marker: PhantomData<fn() -> K>,
}

impl<T, K> Default for Pool<T, K> {
    fn default() -> Self {
        Self::new()
    }
}

// 创建
impl<T, K> Pool<T, K> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// 以给定的初始容量创建池，容量会被限制在 `[1, MAX_CAPACITY]` 内
    pub fn with_capacity(initial_capacity: usize) -> Self {
        let mut pool = Self {
            chunks: Vec::new(),
            chunk_starts: Vec::new(),
            capacity: 0,
            free_head: NIL,
            len: 0,
            _marker: PhantomData,
        };
        pool.push_chunk(initial_capacity.clamp(1, MAX_CAPACITY));
        pool
    }
}

// getters
impl<T, K> Pool<T, K> {
    /// 当前存活的元素数量
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// 当前已经提交的槽位数量（包括保留的 index 0）
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// 再分配一个元素是否会失败
    ///
    /// 创建底层对象之前先检查，避免对象创建成功之后无处存放
    #[inline]
    pub fn is_full(&self) -> bool {
        self.free_head == NIL && self.capacity >= MAX_CAPACITY
    }

    /// handle 是否有效：index 在范围内，且 generation 与槽位当前的 generation 相同
    pub fn valid(&self, handle: Handle<K>) -> bool {
        self.slot(handle.index() as usize)
            .is_some_and(|slot| slot.value.is_some() && slot.generation == handle.generation())
    }

    pub fn get(&self, handle: Handle<K>) -> Option<&T> {
        let slot = self.slot(handle.index() as usize)?;
        if slot.generation != handle.generation() {
            return None;
        }
        slot.value.as_ref()
    }

    pub fn get_mut(&mut self, handle: Handle<K>) -> Option<&mut T> {
        let slot = self.slot_mut(handle.index() as usize)?;
        if slot.generation != handle.generation() {
            return None;
        }
        slot.value.as_mut()
    }

    /// 遍历所有存活的元素
    pub fn iter(&self) -> impl Iterator<Item = (Handle<K>, &T)> {
        self.chunks.iter().zip(self.chunk_starts.iter()).flat_map(|(chunk, &start)| {
            chunk.iter().enumerate().filter_map(move |(offset, slot)| {
                let value = slot.value.as_ref()?;
                Some((Handle::from_raw_parts((start + offset) as u16, slot.generation), value))
            })
        })
    }
}

// 分配与释放
impl<T, K> Pool<T, K> {
    /// 分配一个槽位并放入 `T::default()`
    pub fn allocate(&mut self) -> Result<Handle<K>, PoolError>
    where
        T: Default,
    {
        self.emplace(T::default())
    }

    /// 分配一个槽位并放入 `value`
    ///
    /// 只有当 `MAX_CAPACITY` 个槽位全部用尽时才会失败
    pub fn emplace(&mut self, value: T) -> Result<Handle<K>, PoolError> {
        if self.free_head == NIL {
            self.grow()?;
        }

        let index = self.free_head as usize;
        let slot = self.slot_mut(index).expect("freelist points outside the pool");
        debug_assert!(slot.value.is_none(), "freelist points to an occupied slot");

        let next_free = slot.next_free;
        let generation = slot.generation;
        slot.value = Some(value);
        slot.next_free = NIL;

        self.free_head = next_free;
        self.len += 1;

        Ok(Handle::from_raw_parts(index as u16, generation))
    }

    /// 释放 handle 对应的元素，并把元素交还给调用者
    ///
    /// 对已经失效（重复释放、从未分配）的 handle 是 no-op，返回 `None`。
    pub fn free(&mut self, handle: Handle<K>) -> Option<T> {
        if !self.valid(handle) {
            return None;
        }

        let free_head = self.free_head;
        let slot = self.slot_mut(handle.index() as usize)?;
        let value = slot.value.take();
        slot.generation = slot.generation.wrapping_add(1);
        slot.next_free = free_head;

        self.free_head = handle.index() as u32;
        self.len -= 1;

        value
    }

    /// 释放所有元素，所有已发出的 handle 都会失效
    ///
    /// 容量保持不变
    pub fn drain(&mut self) -> Vec<T> {
        let handles = self.iter().map(|(handle, _)| handle).collect::<Vec<_>>();
        handles.into_iter().filter_map(|handle| self.free(handle)).collect()
    }
}

// 内部实现
impl<T, K> Pool<T, K> {
    fn locate(&self, index: usize) -> Option<(usize, usize)> {
        if index >= self.capacity {
            return None;
        }
        // chunk_starts 递增，找到最后一个 start <= index 的 chunk
        let chunk_idx = self.chunk_starts.partition_point(|&start| start <= index) - 1;
        Some((chunk_idx, index - self.chunk_starts[chunk_idx]))
    }

    fn slot(&self, index: usize) -> Option<&Slot<T>> {
        let (chunk_idx, offset) = self.locate(index)?;
        Some(&self.chunks[chunk_idx][offset])
    }

    fn slot_mut(&mut self, index: usize) -> Option<&mut Slot<T>> {
        let (chunk_idx, offset) = self.locate(index)?;
        Some(&mut self.chunks[chunk_idx][offset])
    }

    /// 容量翻倍，最多到 `MAX_CAPACITY`
    fn grow(&mut self) -> Result<(), PoolError> {
        if self.capacity >= MAX_CAPACITY {
            return Err(PoolError::Exhausted {
                capacity: MAX_CAPACITY,
            });
        }
        let additional = self.capacity.min(MAX_CAPACITY - self.capacity);
        self.push_chunk(additional);
        Ok(())
    }

    /// 追加一个 chunk，并把其中的槽位按 index 从小到大的顺序挂到 freelist 上
    fn push_chunk(&mut self, size: usize) {
        let start = self.capacity;
        let end = start + size;

        let mut next_free = self.free_head;
        let mut slots = Vec::with_capacity(size);
        for index in start..end {
            let link = if index + 1 < end { (index + 1) as u32 } else { next_free };
            slots.push(Slot::vacant(link));
        }

        // index 0 保留，不进入 freelist
        let first_free = if start == 0 { 1 } else { start };
        next_free = if first_free < end { first_free as u32 } else { next_free };

        self.chunks.push(slots.into_boxed_slice());
        self.chunk_starts.push(start);
        self.capacity = end;
        self.free_head = next_free;
    }
}

impl<T, K> Index<Handle<K>> for Pool<T, K> {
    type Output = T;

    /// 无效 handle 属于调用者的编程错误，直接 panic
    fn index(&self, handle: Handle<K>) -> &Self::Output {
        match self.get(handle) {
            Some(value) => value,
            None => panic!("invalid handle {:?} used with pool of {} slots", handle, self.capacity),
        }
    }
}

impl<T, K> IndexMut<Handle<K>> for Pool<T, K> {
    fn index_mut(&mut self, handle: Handle<K>) -> &mut Self::Output {
        let capacity = self.capacity;
        match self.get_mut(handle) {
            Some(value) => value,
            None => panic!("invalid handle {:?} used with pool of {} slots", handle, capacity),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn handle_is_valid_until_freed() {
        let mut pool = Pool::<u32>::new();
        let handle = pool.emplace(42).unwrap();
        assert!(pool.valid(handle));
        assert_eq!(pool.get(handle), Some(&42));

        assert_eq!(pool.free(handle), Some(42));
        assert!(!pool.valid(handle));
        assert_eq!(pool.get(handle), None);
    }

    #[test]
    fn stale_handle_stays_invalid_after_slot_reuse() {
        let mut pool = Pool::<u32>::with_capacity(4);
        let first = pool.emplace(1).unwrap();
        pool.free(first);

        // 同一个槽位被重新分配，generation 严格递增
        let second = pool.emplace(2).unwrap();
        assert_eq!(second.index(), first.index());
        assert!(second.generation() > first.generation());

        assert!(!pool.valid(first));
        assert!(pool.valid(second));
        assert_eq!(pool[second], 2);
    }

    #[test]
    fn generation_increases_on_every_free() {
        let mut pool = Pool::<u32>::with_capacity(2);
        let mut seen = Vec::new();
        for i in 0..10 {
            let handle = pool.emplace(i).unwrap();
            seen.push(handle);
            pool.free(handle);
        }
        for pair in seen.windows(2) {
            assert_eq!(pair[0].index(), pair[1].index());
            assert_eq!(pair[0].generation() + 1, pair[1].generation());
        }
        assert!(seen.iter().all(|handle| !pool.valid(*handle)));
    }

    #[test]
    fn allocate_uses_default() {
        let mut pool = Pool::<Vec<u8>>::new();
        let handle = pool.allocate().unwrap();
        assert!(pool[handle].is_empty());
        pool[handle].push(7);
        assert_eq!(pool.get(handle).map(Vec::len), Some(1));
    }

    #[test]
    fn double_free_is_noop() {
        let mut pool = Pool::<u32>::new();
        let a = pool.emplace(1).unwrap();
        let b = pool.emplace(2).unwrap();

        assert_eq!(pool.free(a), Some(1));
        assert_eq!(pool.free(a), None);
        assert_eq!(pool.len(), 1);

        // freelist 没有被破坏：下一次分配复用 a 的槽位，并且 b 不受影响
        let c = pool.emplace(3).unwrap();
        assert_eq!(c.index(), a.index());
        let d = pool.emplace(4).unwrap();
        assert_ne!(d.index(), c.index());
        assert_ne!(d.index(), b.index());
        assert_eq!(pool[b], 2);
        assert_eq!(pool.len(), 3);
    }

    #[test]
    fn free_of_never_allocated_handle_is_noop() {
        let mut pool = Pool::<u32>::with_capacity(8);
        let live = pool.emplace(9).unwrap();

        assert_eq!(pool.free(Handle::from_raw_parts(5, 0)), None);
        assert_eq!(pool.free(Handle::from_raw_parts(1000, 0)), None);
        assert_eq!(pool.free(Handle::INVALID), None);

        assert!(pool.valid(live));
        assert_eq!(pool.len(), 1);
        let next = pool.emplace(10).unwrap();
        assert_ne!(next, live);
        assert!(pool.valid(next));
    }

    #[test]
    fn null_handle_is_never_valid() {
        let mut pool = Pool::<u32>::new();
        for i in 0..16 {
            let handle = pool.emplace(i).unwrap();
            assert!(!handle.is_null());
        }
        assert!(!pool.valid(Handle::INVALID));
    }

    #[test]
    fn growth_from_128_to_256() {
        let mut pool = Pool::<usize>::with_capacity(128);
        assert_eq!(pool.capacity(), 128);

        let handles = (0..130).map(|i| pool.emplace(i).unwrap()).collect::<Vec<_>>();

        // 只发生了一次扩容
        assert_eq!(pool.capacity(), 256);
        assert!(handles.iter().all(|handle| pool.valid(*handle)));
        let distinct = handles.iter().copied().collect::<HashSet<_>>();
        assert_eq!(distinct.len(), 130);
        for (i, handle) in handles.iter().enumerate() {
            assert_eq!(pool[*handle], i);
        }
    }

    #[test]
    fn growth_never_moves_elements() {
        let mut pool = Pool::<[u64; 4]>::with_capacity(4);
        let first = pool.emplace([1, 2, 3, 4]).unwrap();
        let address = pool.get(first).unwrap() as *const [u64; 4];

        for i in 0..1000 {
            pool.emplace([i; 4]).unwrap();
        }
        assert!(pool.capacity() >= 1001);

        let address_after = pool.get(first).unwrap() as *const [u64; 4];
        assert_eq!(address, address_after);
        assert_eq!(pool[first], [1, 2, 3, 4]);
    }

    #[test]
    fn free_of_others_keeps_address() {
        let mut pool = Pool::<String>::with_capacity(8);
        let keep = pool.emplace("keep".to_string()).unwrap();
        let address = pool.get(keep).unwrap() as *const String;

        let others = (0..6).map(|i| pool.emplace(i.to_string()).unwrap()).collect::<Vec<_>>();
        for handle in others {
            pool.free(handle);
        }
        assert_eq!(pool.get(keep).unwrap() as *const String, address);
    }

    #[test]
    fn exhausts_at_max_capacity() {
        let mut pool = Pool::<u8>::with_capacity(MAX_CAPACITY);
        // index 0 保留，可用槽位比容量少一个
        for _ in 0..MAX_CAPACITY - 1 {
            pool.emplace(0).unwrap();
        }
        assert!(pool.is_full());
        assert_eq!(
            pool.emplace(0),
            Err(PoolError::Exhausted {
                capacity: MAX_CAPACITY
            })
        );

        // 释放一个之后又可以继续分配
        let (handle, _) = pool.iter().next().unwrap();
        pool.free(handle);
        assert!(!pool.is_full());
        assert!(pool.emplace(1).is_ok());
    }

    #[test]
    fn iter_and_drain_visit_live_elements() {
        let mut pool = Pool::<u32>::new();
        let a = pool.emplace(1).unwrap();
        let b = pool.emplace(2).unwrap();
        let c = pool.emplace(3).unwrap();
        pool.free(b);

        let live = pool.iter().map(|(handle, value)| (handle, *value)).collect::<Vec<_>>();
        assert_eq!(live, vec![(a, 1), (c, 3)]);

        let mut drained = pool.drain();
        drained.sort();
        assert_eq!(drained, vec![1, 3]);
        assert!(pool.is_empty());
        assert!(!pool.valid(a));
        assert!(!pool.valid(c));
    }

    #[test]
    #[should_panic(expected = "invalid handle")]
    fn index_with_stale_handle_panics() {
        let mut pool = Pool::<u32>::new();
        let handle = pool.emplace(1).unwrap();
        pool.free(handle);
        let _ = pool[handle];
    }

    #[test]
    fn typed_handles_for_foreign_storage() {
        struct BufferTag;
        let mut pool = Pool::<String, BufferTag>::new();
        let handle: Handle<BufferTag> = pool.emplace("vertex".to_string()).unwrap();
        assert_eq!(pool[handle], "vertex");
    }
}
