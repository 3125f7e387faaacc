//! 代际句柄池 (Generational Handle Pool)
//!
//! 对外只暴露轻量的 [`Handle`]（16 位 index + 16 位 generation），与资源的实际存储位置解耦。
//!
//! - 分配与释放都是 O(1)，空闲槽位通过 freelist 串起来
//! - 每次释放都会让槽位的 generation 加一，之前发出去的所有 handle 拷贝都会立刻失效
//! - 存储按 chunk 分段增长，已有元素永远不会被搬移，`get()` 得到的引用地址在扩容前后保持不变
//!
//! 池内部不加锁，只适合在单个提交线程上使用。

pub mod handle;
pub mod pool;

pub use handle::Handle;
pub use pool::{Pool, PoolError};
