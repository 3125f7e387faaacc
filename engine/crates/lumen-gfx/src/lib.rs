//! Lumen 的 GFX 层
//!
//! 提供 Vulkan 资源管理与帧同步的核心功能：
//! - 资源通过代际 handle 访问，由 [`resources::manager::ResourceManager`] 统一创建与销毁
//! - [`render::device::Device`] 负责 frames in flight 的同步、swapchain 的获取与呈现
//! - [`render::cmd::CommandBuffer`] 负责录制命令，并通过 usage 表推导 barrier
//!
//! 所有 Vulkan 对象都共享同一个 [`gfx_core::GfxCore`]，通过 `Rc` 注入，不使用全局单例。

pub mod basic;
pub mod commands;
pub mod error;
pub mod foundation;
pub mod gfx_core;
pub mod pipelines;
pub mod render;
pub mod resources;
pub mod settings;
pub mod swapchain;
pub mod window;

pub use error::{GfxError, GfxResult};
