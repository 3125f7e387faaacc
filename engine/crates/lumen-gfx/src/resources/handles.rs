//! 对外暴露的资源 handle
//!
//! 这里的类型只用于区分 handle 的种类，后端自己决定池中实际存放的数据

use lumen_pool::Handle;

/// GPU Buffer
pub enum Buffer {}
/// GPU Texture，包含 image、view 以及 sampler
pub enum Texture {}
/// descriptor set layout
pub enum BindGroupLayout {}
/// descriptor set
pub enum BindGroup {}
/// graphics pipeline 以及它的 pipeline layout
pub enum Pipeline {}

pub type BufferHandle = Handle<Buffer>;
pub type TextureHandle = Handle<Texture>;
pub type BindGroupLayoutHandle = Handle<BindGroupLayout>;
pub type BindGroupHandle = Handle<BindGroup>;
pub type PipelineHandle = Handle<Pipeline>;
