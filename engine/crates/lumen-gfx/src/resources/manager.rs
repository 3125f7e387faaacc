use crate::{
    GfxResult,
    resources::{
        desc::{
            BindGroupDesc, BindGroupLayoutDesc, BufferBinding, BufferDesc, PipelineDesc, TextureBinding, TextureDesc,
            TextureInfo, TextureRange,
        },
        handles::{BindGroupHandle, BindGroupLayoutHandle, BufferHandle, PipelineHandle, TextureHandle},
    },
};

/// 资源管理器
///
/// 负责所有 GPU 资源的生命周期，对外只提供轻量级的 handle。
///
/// - 所有接口在 handle 无效时返回 [`crate::GfxError::InvalidHandle`]
/// - `destroy_*` 会立即让 handle 失效，底层对象进入延迟释放队列，
///   在 [`ResourceManager::advance_frame`] 确认引用它的帧都执行完毕之后才真正释放
/// - 上传类接口都是同步的：提交之后阻塞等待 GPU 完成
///
/// 实现：[`crate::resources::vulkan_manager::VulkanResourceManager`]，
/// 以及用于测试的 [`crate::resources::headless::HeadlessResourceManager`]
pub trait ResourceManager {
    // --- Buffer ---

    fn create_buffer(&mut self, desc: &BufferDesc) -> GfxResult<BufferHandle>;

    /// 直接写入常驻映射的 buffer
    ///
    /// `offset + data.len()` 超出 buffer 大小时返回 OutOfBounds，不会写入任何数据
    fn write_buffer(&mut self, buffer: BufferHandle, data: &[u8], offset: u64) -> GfxResult<()>;

    /// 以 `T` 的内存布局写入一个值，例如 `#[repr(C)]` 的 uniform 结构体
    #[inline]
    fn write_buffer_pod<T: bytemuck::Pod>(&mut self, buffer: BufferHandle, value: &T, offset: u64) -> GfxResult<()>
    where
        Self: Sized,
    {
        self.write_buffer(buffer, bytemuck::bytes_of(value), offset)
    }

    /// 通过 staging buffer 上传到 buffer 的开头，阻塞直到拷贝完成
    fn upload_buffer(&mut self, buffer: BufferHandle, data: &[u8]) -> GfxResult<()>;

    fn map(&mut self, buffer: BufferHandle) -> GfxResult<()>;
    fn unmap(&mut self, buffer: BufferHandle) -> GfxResult<()>;
    fn is_mapped(&self, buffer: BufferHandle) -> bool;
    /// 映射内存的只读视图，长度为 buffer 大小
    fn get_mapped(&self, buffer: BufferHandle) -> GfxResult<&[u8]>;

    fn buffer_size(&self, buffer: BufferHandle) -> GfxResult<u64>;
    fn destroy_buffer(&mut self, buffer: BufferHandle) -> GfxResult<()>;

    // --- Texture ---

    fn create_texture(&mut self, desc: &TextureDesc) -> GfxResult<TextureHandle>;

    /// 创建 texture 并上传 mip 0 的数据；`generate_mips` 时同时生成完整的 mip 链
    fn create_texture_with_data(&mut self, data: &[u8], desc: &TextureDesc) -> GfxResult<TextureHandle>;

    fn upload_texture(&mut self, texture: TextureHandle, data: &[u8], range: &TextureRange) -> GfxResult<()>;

    /// 从 mip 0 逐级 blit 生成后续的 mip
    fn generate_mipmaps(&mut self, texture: TextureHandle) -> GfxResult<()>;

    fn texture_info(&self, texture: TextureHandle) -> GfxResult<TextureInfo>;
    fn destroy_texture(&mut self, texture: TextureHandle) -> GfxResult<()>;

    // --- Bind Group ---

    fn create_bind_group_layout(&mut self, desc: &BindGroupLayoutDesc) -> GfxResult<BindGroupLayoutHandle>;
    fn destroy_bind_group_layout(&mut self, layout: BindGroupLayoutHandle) -> GfxResult<()>;

    /// 分配 bind group，并写入 desc 中的全部绑定；layout 中的每个 binding 都必须被覆盖
    fn create_bind_group(&mut self, desc: &BindGroupDesc) -> GfxResult<BindGroupHandle>;

    /// 重新绑定部分 texture
    ///
    /// bind group 可能还在被 in-flight 的帧使用时，会分配新的版本，旧版本延迟释放
    fn update_bind_group_textures(&mut self, group: BindGroupHandle, textures: &[TextureBinding]) -> GfxResult<()>;
    fn update_bind_group_buffers(&mut self, group: BindGroupHandle, buffers: &[BufferBinding]) -> GfxResult<()>;

    /// 记录 bind group 在某一帧中被使用，录制命令时调用
    fn mark_bind_group_used(&self, group: BindGroupHandle, frame_id: u64) -> GfxResult<()>;

    fn destroy_bind_group(&mut self, group: BindGroupHandle) -> GfxResult<()>;

    // --- Pipeline ---

    fn create_pipeline(&mut self, desc: &PipelineDesc) -> GfxResult<PipelineHandle>;
    fn destroy_pipeline(&mut self, pipeline: PipelineHandle) -> GfxResult<()>;

    // --- 生命周期 ---

    /// 新的一帧开始，且该 slot 的 fence 已经等待完成
    ///
    /// 释放所有已经不可能被 GPU 引用的对象
    fn advance_frame(&mut self, frame_id: u64);

    /// 释放全部延迟释放的对象，调用前需要确保 device idle
    fn release_deferred(&mut self);

    /// 延迟释放队列中的对象数量
    fn pending_release_count(&self) -> usize;
}
