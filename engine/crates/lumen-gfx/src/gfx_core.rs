use std::{ffi::CStr, mem::ManuallyDrop, rc::Rc};

use ash::vk;

use crate::{
    GfxError, GfxResult,
    basic::color::LabelColor,
    commands::{
        command_buffer::GfxCommandBuffer,
        command_pool::GfxCommandPool,
        command_queue::GfxCommandQueue,
        fence::GfxFence,
        submit_info::GfxSubmitInfo,
    },
    foundation::{
        debug_messenger::GfxDebugMsger, device::GfxDevice, instance::GfxInstance, mem_allocator::GfxMemAllocator,
        physical_device::GfxPhysicalDevice,
    },
    settings::GfxSettings,
};

/// Vulkan 图形上下文
///
/// 管理 instance、device、queue、内存分配器等核心对象。
/// 创建一次之后通过 `Rc<GfxCore>` 注入到 Resource Manager 和 Device 中。
///
/// # 销毁
/// 最后一个 `Rc` 释放时按照依赖的逆序销毁，此前所有引用 device 的对象都必须已经销毁
pub struct GfxCore {
    /// vk 基础函数的接口
    ///
    /// 在 drop 之后，会卸载 dll，因此需要确保该字段最后 drop
    vk_entry: ash::Entry,

    instance: GfxInstance,
    physical_device: GfxPhysicalDevice,

    /// Vulkan 设备函数指针集合
    ///
    /// GfxCommandBuffer、GfxFence 等对象都持有一份 Rc，用于在自己的生命周期内访问设备函数
    device: Rc<GfxDevice>,
    debug_msger: GfxDebugMsger,
    gfx_queue: GfxCommandQueue,

    allocator: ManuallyDrop<GfxMemAllocator>,

    /// 临时的 graphics command pool，用于上传、mipmap 生成等一次性命令
    one_time_pool: ManuallyDrop<GfxCommandPool>,

    settings: GfxSettings,
}

// 创建与销毁
impl GfxCore {
    pub fn new(settings: GfxSettings, instance_extra_exts: &[&'static CStr]) -> GfxResult<Self> {
        let _span = tracy_client::span!("GfxCore::new");

        let vk_entry = unsafe { ash::Entry::load() }.map_err(|e| {
            log::error!("failed to load vulkan entry: {}", e);
            GfxError::Vulkan(vk::Result::ERROR_INITIALIZATION_FAILED)
        })?;
        let instance = GfxInstance::new(&vk_entry, &settings.app_name, &settings.engine_name, instance_extra_exts)?;
        let physical_device = GfxPhysicalDevice::new_descrete_physical_device(instance.ash_instance())?;

        // graphics、compute、transfer 使用同一个 queue family，简化同步
        let queue_priorities = [1.0];
        let queue_create_infos = [vk::DeviceQueueCreateInfo::default()
            .queue_family_index(physical_device.gfx_queue_family.queue_family_index)
            .queue_priorities(&queue_priorities)];

        let device =
            Rc::new(GfxDevice::new(instance.ash_instance(), physical_device.vk_handle, &queue_create_infos)?);
        let gfx_queue = GfxCommandQueue {
            vk_queue: unsafe { device.get_device_queue(physical_device.gfx_queue_family.queue_family_index, 0) },
            queue_family: physical_device.gfx_queue_family.clone(),
            device: device.clone(),
        };

        let debug_msger = GfxDebugMsger::new(&vk_entry, instance.ash_instance())?;
        log::info!("gfx queue's queue family:\n{:#?}", gfx_queue.queue_family);

        // 在 device 以及 debug_utils 之前创建的 vk::Handle
        {
            device.set_object_debug_name(instance.vk_instance(), "GfxInstance");
            device.set_object_debug_name(physical_device.vk_handle, "GfxPhysicalDevice");
            device.set_object_debug_name(device.vk_handle(), "GfxDevice");
            device.set_object_debug_name(gfx_queue.vk_queue, "GfxCommandQueue-gfx");
        }

        let allocator = GfxMemAllocator::new(instance.ash_instance(), physical_device.vk_handle, &device)?;
        let one_time_pool = GfxCommandPool::new(
            device.clone(),
            &physical_device.gfx_queue_family,
            vk::CommandPoolCreateFlags::TRANSIENT,
            "one-time",
        )?;

        Ok(Self {
            vk_entry,
            instance,
            physical_device,
            device,
            debug_msger,
            gfx_queue,
            allocator: ManuallyDrop::new(allocator),
            one_time_pool: ManuallyDrop::new(one_time_pool),
            settings,
        })
    }
}

impl Drop for GfxCore {
    fn drop(&mut self) {
        if let Err(e) = self.device.wait_idle() {
            log::error!("wait idle before destroying gfx core: {}", e);
        }
        unsafe {
            ManuallyDrop::take(&mut self.one_time_pool).destroy();
            // vma 需要在 device 销毁之前释放
            ManuallyDrop::drop(&mut self.allocator);
        }
        self.debug_msger.destroy();
        self.device.destroy();
        self.instance.destroy();
    }
}

// getters
impl GfxCore {
    #[inline]
    pub fn vk_entry(&self) -> &ash::Entry {
        &self.vk_entry
    }

    #[inline]
    pub fn instance(&self) -> &GfxInstance {
        &self.instance
    }

    #[inline]
    pub fn physical_device(&self) -> &GfxPhysicalDevice {
        &self.physical_device
    }

    #[inline]
    pub fn device(&self) -> &Rc<GfxDevice> {
        &self.device
    }

    #[inline]
    pub fn gfx_queue(&self) -> &GfxCommandQueue {
        &self.gfx_queue
    }

    #[inline]
    pub fn allocator(&self) -> &GfxMemAllocator {
        &self.allocator
    }

    #[inline]
    pub fn settings(&self) -> &GfxSettings {
        &self.settings
    }

    /// 当 uniform buffer 的 descriptor 在更新时，其 offset 必须是这个值的整数倍
    ///
    /// 注：这个值一定是 power of 2
    #[inline]
    pub fn min_ubo_offset_align(&self) -> vk::DeviceSize {
        self.physical_device.basic_props.limits.min_uniform_buffer_offset_alignment
    }
}

// tools
impl GfxCore {
    /// 按照配置中的候选顺序，找到第一个可以作为 depth attachment 的格式
    pub fn find_depth_format(&self) -> Option<vk::Format> {
        self.physical_device.find_supported_format(
            self.instance.ash_instance(),
            &self.settings.depth_format_candidates,
            vk::ImageTiling::OPTIMAL,
            vk::FormatFeatureFlags::DEPTH_STENCIL_ATTACHMENT,
        )
    }

    /// 立即执行某个 command，并同步等待执行结果
    ///
    /// 使用一次性的 fence，最多等待 `settings.one_time_timeout`，超时返回 [`GfxError::Timeout`]
    pub fn one_time_exec<F, R>(&self, name: &str, func: F) -> GfxResult<R>
    where
        F: FnOnce(&GfxCommandBuffer) -> R,
    {
        let _span = tracy_client::span!("GfxCore::one_time_exec");

        let command_buffer = GfxCommandBuffer::new(&self.one_time_pool, &format!("one-time-{}", name))?;
        let result = match Self::record_one_time(&command_buffer, name, func) {
            Ok(result) => result,
            Err(e) => {
                command_buffer.free();
                return Err(e);
            }
        };

        let fence = match GfxFence::new(self.device.clone(), false, &format!("one-time-{}", name)) {
            Ok(fence) => fence,
            Err(e) => {
                command_buffer.free();
                return Err(e);
            }
        };
        if let Err(e) = self.gfx_queue.submit(&[GfxSubmitInfo::new(&[&command_buffer])], Some(&fence)) {
            fence.destroy();
            command_buffer.free();
            return Err(e);
        }

        match fence.wait_timeout(self.settings.one_time_timeout) {
            Ok(()) => {
                fence.destroy();
                command_buffer.free();
                Ok(result)
            }
            Err(e) if gpu_may_still_use(&e) => {
                // GPU 可能仍在使用 command buffer，无法安全释放
                log::error!("one-time command {} did not complete, leaking its command buffer: {}", name, e);
                Err(e)
            }
            Err(e) => {
                log::error!("one-time command {} failed: {}", name, e);
                fence.destroy();
                command_buffer.free();
                Err(e)
            }
        }
    }

    fn record_one_time<F, R>(command_buffer: &GfxCommandBuffer, name: &str, func: F) -> GfxResult<R>
    where
        F: FnOnce(&GfxCommandBuffer) -> R,
    {
        command_buffer.begin(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT, name)?;
        command_buffer.insert_label(name, LabelColor::COLOR_ONE_TIME);
        let result = func(command_buffer);
        command_buffer.end()?;
        Ok(result)
    }
}

/// 等待 fence 失败之后，提交的命令是否可能仍在执行
///
/// device lost 之后所有对象都可以直接销毁
fn gpu_may_still_use(err: &GfxError) -> bool {
    !matches!(err, GfxError::DeviceLost)
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn only_device_lost_allows_release_after_failed_wait() {
        assert!(gpu_may_still_use(&GfxError::Timeout(Duration::from_secs(1))));
        assert!(gpu_may_still_use(&GfxError::OutOfResources("device memory".to_string())));
        assert!(!gpu_may_still_use(&GfxError::DeviceLost));
    }
}
