use std::rc::Rc;

use ash::vk;
use itertools::Itertools;

use crate::{
    GfxResult,
    foundation::{debug_messenger::DebugType, device::GfxDevice},
};

/// bind group 会用到的 descriptor 类型
const POOL_DESCRIPTOR_TYPES: [vk::DescriptorType; 3] = [
    vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
    vk::DescriptorType::UNIFORM_BUFFER,
    vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
];

/// 每种 descriptor 类型的数量都相同
pub fn uniform_pool_sizes(descriptors_per_type: u32) -> Vec<vk::DescriptorPoolSize> {
    POOL_DESCRIPTOR_TYPES
        .iter()
        .map(|ty| vk::DescriptorPoolSize {
            ty: *ty,
            descriptor_count: descriptors_per_type,
        })
        .collect_vec()
}

/// descriptor pool
///
/// - 长期存在的 bind group 使用带 `FREE_DESCRIPTOR_SET` 的 pool，set 可以单独归还
/// - 每一帧的临时 bind group 使用普通的 pool，在帧开始时整体 reset
///
/// # Destroy
/// 需要手动调用 `destroy`
pub struct GfxDescriptorPool {
    handle: vk::DescriptorPool,
    flags: vk::DescriptorPoolCreateFlags,
    device: Rc<GfxDevice>,
}

// new & init
impl GfxDescriptorPool {
    pub fn new(
        device: Rc<GfxDevice>,
        flags: vk::DescriptorPoolCreateFlags,
        max_sets: u32,
        pool_sizes: &[vk::DescriptorPoolSize],
        debug_name: &str,
    ) -> GfxResult<Self> {
        let create_info =
            vk::DescriptorPoolCreateInfo::default().flags(flags).max_sets(max_sets).pool_sizes(pool_sizes);
        let handle = unsafe { device.create_descriptor_pool(&create_info, None)? };
        let pool = Self { handle, flags, device };
        pool.device.set_debug_name(&pool, debug_name);
        Ok(pool)
    }

    pub fn destroy(self) {
        unsafe { self.device.destroy_descriptor_pool(self.handle, None) };
    }
}

// getters
impl GfxDescriptorPool {
    #[inline]
    pub fn handle(&self) -> vk::DescriptorPool {
        self.handle
    }
}

// tools
impl GfxDescriptorPool {
    /// pool 耗尽时返回 [`crate::GfxError::OutOfResources`]
    pub fn allocate(&self, layout: vk::DescriptorSetLayout) -> GfxResult<vk::DescriptorSet> {
        let layouts = [layout];
        let alloc_info = vk::DescriptorSetAllocateInfo::default().descriptor_pool(self.handle).set_layouts(&layouts);
        let sets = unsafe { self.device.allocate_descriptor_sets(&alloc_info)? };
        Ok(sets[0])
    }

    /// 只有带 `FREE_DESCRIPTOR_SET` 的 pool 才能单独归还 set
    pub fn free(&self, set: vk::DescriptorSet) {
        debug_assert!(self.flags.contains(vk::DescriptorPoolCreateFlags::FREE_DESCRIPTOR_SET));
        if let Err(e) = unsafe { self.device.free_descriptor_sets(self.handle, std::slice::from_ref(&set)) } {
            log::error!("failed to free descriptor set: {:?}", e);
        }
    }

    /// 归还 pool 中所有的 set
    pub fn reset(&self) -> GfxResult<()> {
        unsafe { self.device.reset_descriptor_pool(self.handle, vk::DescriptorPoolResetFlags::empty())? };
        Ok(())
    }
}

impl DebugType for GfxDescriptorPool {
    fn debug_type_name() -> &'static str {
        "GfxDescriptorPool"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_sizes_cover_all_binding_kinds() {
        let sizes = uniform_pool_sizes(64);
        assert_eq!(sizes.len(), 3);
        assert!(sizes.iter().all(|s| s.descriptor_count == 64));
        assert!(sizes.iter().any(|s| s.ty == vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC));
    }
}
