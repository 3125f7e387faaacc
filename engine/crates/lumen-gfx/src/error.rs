use ash::vk;
use lumen_pool::{Handle, PoolError};

use crate::{render::frame_ring::FrameState, resources::usage::Usage};

/// GFX 层统一的错误类型
///
/// Resource Manager、Device 以及 CommandBuffer 的所有公开接口都返回 [`GfxResult`]
#[derive(Debug, thiserror::Error)]
pub enum GfxError {
    /// 显存、descriptor pool 或 handle 池耗尽
    #[error("out of resources: {0}")]
    OutOfResources(String),

    /// handle 已经被释放，或者从未被分配
    #[error("invalid handle: {0}")]
    InvalidHandle(String),

    /// bind group 与 layout 不匹配，或者 push constant 范围冲突
    #[error("incompatible descriptor: {0}")]
    IncompatibleDescriptor(String),

    /// usage 表中不存在的状态转换
    #[error("unsupported transition: {src:?} -> {dst:?}")]
    UnsupportedTransition { src: Usage, dst: Usage },

    #[error("out of bounds: offset {offset} + len {len} > size {size}")]
    OutOfBounds { offset: u64, len: u64, size: u64 },

    /// buffer 不是 host visible，或者已经被 unmap
    #[error("buffer is not host mapped")]
    NotMapped,

    #[error("gpu did not finish within {0:?}")]
    Timeout(std::time::Duration),

    #[error("device lost")]
    DeviceLost,

    /// surface 已经过期，需要重建 swapchain
    #[error("surface out of date")]
    SurfaceOutOfDate,

    /// frame ring 的状态转换顺序不对，例如没有 begin_frame 就调用 end_frame
    #[error("frame is {actual:?}, expected {expected:?}")]
    InvalidFrameState { expected: FrameState, actual: FrameState },

    #[error("vulkan error: {0}")]
    Vulkan(vk::Result),

    #[error(transparent)]
    Pool(#[from] PoolError),

    /// 读取 shader 文件失败
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type GfxResult<T> = Result<T, GfxError>;

impl GfxError {
    #[inline]
    pub fn invalid_handle<T>(handle: Handle<T>) -> Self {
        Self::InvalidHandle(format!("{:?}", handle))
    }
}

impl From<vk::Result> for GfxError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_DEVICE_LOST => Self::DeviceLost,
            vk::Result::ERROR_OUT_OF_DATE_KHR => Self::SurfaceOutOfDate,
            vk::Result::ERROR_OUT_OF_HOST_MEMORY
            | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
            | vk::Result::ERROR_OUT_OF_POOL_MEMORY
            | vk::Result::ERROR_FRAGMENTED_POOL
            | vk::Result::ERROR_TOO_MANY_OBJECTS => Self::OutOfResources(format!("{:?}", result)),
            other => Self::Vulkan(other),
        }
    }
}
