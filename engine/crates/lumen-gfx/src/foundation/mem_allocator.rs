use std::ops::Deref;

use ash::vk;

use crate::GfxResult;

/// vma 分配器
///
/// vma 内部引用了 Instance 和 Device，因此必须在 Device 之后创建，并在 Device 销毁之前 drop
pub struct GfxMemAllocator {
    inner: vk_mem::Allocator,
}

impl GfxMemAllocator {
    pub fn new(instance: &ash::Instance, pdevice: vk::PhysicalDevice, device: &ash::Device) -> GfxResult<Self> {
        let mut vma_ci = vk_mem::AllocatorCreateInfo::new(instance, device, pdevice);
        vma_ci.vulkan_api_version = vk::API_VERSION_1_3;

        let inner = unsafe { vk_mem::Allocator::new(vma_ci)? };
        Ok(Self { inner })
    }
}

impl Deref for GfxMemAllocator {
    type Target = vk_mem::Allocator;
    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}
