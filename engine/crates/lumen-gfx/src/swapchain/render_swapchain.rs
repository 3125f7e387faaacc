use std::rc::Rc;

use ash::vk;
use itertools::Itertools;

use crate::{
    GfxResult,
    commands::{command_queue::GfxCommandQueue, semaphore::GfxSemaphore},
    foundation::{debug_messenger::DebugType, device::GfxDevice},
    gfx_core::GfxCore,
    swapchain::surface::GfxSurface,
};

/// vsync 时使用 FIFO；否则优先 IMMEDIATE，不支持时退回 FIFO
///
/// FIFO 是所有实现都必须支持的模式
pub fn choose_present_mode(vsync: bool, supported: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    if !vsync && supported.contains(&vk::PresentModeKHR::IMMEDIATE) {
        vk::PresentModeKHR::IMMEDIATE
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// current_extent 为 `u32::MAX` 时，由 framebuffer 尺寸决定，并限制在 surface 允许的范围内
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, framebuffer_size: vk::Extent2D) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }
    vk::Extent2D {
        width: framebuffer_size.width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: framebuffer_size.height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

/// max_image_count == 0 表示不限制 image 数量
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let desired = caps.min_image_count + 1;
    if caps.max_image_count == 0 { desired } else { desired.min(caps.max_image_count) }
}

/// 优先使用配置中的格式，不支持时使用 surface 报告的第一个格式
pub fn choose_surface_format(
    preferred: vk::SurfaceFormatKHR,
    supported: &[vk::SurfaceFormatKHR],
) -> vk::SurfaceFormatKHR {
    supported
        .iter()
        .copied()
        .find(|f| f.format == preferred.format && f.color_space == preferred.color_space)
        .or_else(|| supported.first().copied())
        .unwrap_or(preferred)
}

/// # Destroy
///
/// 需要手动调用 `destroy`；重建时把旧的 handle 传给新的 swapchain，然后再销毁旧的
pub struct GfxSwapchain {
    handle: vk::SwapchainKHR,

    /// 这里的 image 并非手动创建的，由 swapchain 管理生命周期
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
    image_index: u32,

    format: vk::SurfaceFormatKHR,
    extent: vk::Extent2D,
    present_mode: vk::PresentModeKHR,

    device: Rc<GfxDevice>,
}

// new & init
impl GfxSwapchain {
    pub fn new(
        core: &GfxCore,
        surface: &GfxSurface,
        framebuffer_size: vk::Extent2D,
        vsync: bool,
        old_swapchain: vk::SwapchainKHR,
    ) -> GfxResult<Self> {
        let _span = tracy_client::span!("GfxSwapchain::new");
        let pdevice = core.physical_device().vk_handle;

        let caps = surface.capabilities(pdevice)?;
        let format = choose_surface_format(core.settings().surface_format, &surface.formats(pdevice)?);
        let present_mode = choose_present_mode(vsync, &surface.present_modes(pdevice)?);
        let extent = choose_extent(&caps, framebuffer_size);
        log::info!(
            "create swapchain: extent {}x{}, format {:?}, present mode {:?}",
            extent.width,
            extent.height,
            format.format,
            present_mode
        );

        let create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface.handle())
            .min_image_count(choose_image_count(&caps))
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            // TRANSFER_DST 用于 Nsight 分析
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST)
            .pre_transform(caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .old_swapchain(old_swapchain)
            .clipped(true);

        let device = core.device().clone();
        let handle = unsafe { device.swapchain().create_swapchain(&create_info, None)? };
        let images = unsafe { device.swapchain().get_swapchain_images(handle)? };

        let mut swapchain = Self {
            handle,
            images,
            image_views: Vec::new(),
            image_index: 0,
            format,
            extent,
            present_mode,
            device,
        };
        swapchain.device.set_debug_name(&swapchain, "main");

        for (idx, image) in swapchain.images.iter().enumerate() {
            swapchain.device.set_object_debug_name(*image, format!("swapchain-image-{}", idx));
            let view_info = vk::ImageViewCreateInfo::default()
                .image(*image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(format.format)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            // 失败时已经创建的 view 由 destroy 释放
            match unsafe { swapchain.device.create_image_view(&view_info, None) } {
                Ok(view) => {
                    swapchain.device.set_object_debug_name(view, format!("swapchain-view-{}", idx));
                    swapchain.image_views.push(view);
                }
                Err(e) => {
                    swapchain.destroy();
                    return Err(e.into());
                }
            }
        }

        Ok(swapchain)
    }

    pub fn destroy(self) {
        unsafe {
            for view in &self.image_views {
                self.device.destroy_image_view(*view, None);
            }
            self.device.swapchain().destroy_swapchain(self.handle, None);
        }
    }
}

// getters
impl GfxSwapchain {
    #[inline]
    pub fn handle(&self) -> vk::SwapchainKHR {
        self.handle
    }

    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    #[inline]
    pub fn format(&self) -> vk::Format {
        self.format.format
    }

    #[inline]
    pub fn present_mode(&self) -> vk::PresentModeKHR {
        self.present_mode
    }

    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    #[inline]
    pub fn current_image_index(&self) -> u32 {
        self.image_index
    }

    #[inline]
    pub fn current_image(&self) -> vk::Image {
        self.images[self.image_index as usize]
    }

    #[inline]
    pub fn current_image_view(&self) -> vk::ImageView {
        self.image_views[self.image_index as usize]
    }
}

// tools
impl GfxSwapchain {
    /// 获取下一张 image，返回值表示 swapchain 是否 suboptimal
    ///
    /// surface 过期时返回 [`crate::GfxError::SurfaceOutOfDate`]
    pub fn acquire_next_image(&mut self, semaphore: &GfxSemaphore) -> GfxResult<bool> {
        let (image_index, suboptimal) = unsafe {
            self.device.swapchain().acquire_next_image(
                self.handle,
                u64::MAX,
                semaphore.handle(),
                vk::Fence::null(),
            )?
        };
        self.image_index = image_index;
        Ok(suboptimal)
    }

    /// 呈现当前 image，返回值表示 swapchain 是否 suboptimal
    pub fn present_image(&self, queue: &GfxCommandQueue, wait_semaphores: &[&GfxSemaphore]) -> GfxResult<bool> {
        let wait_semaphores = wait_semaphores.iter().map(|s| s.handle()).collect_vec();
        let image_indices = [self.image_index];
        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .image_indices(&image_indices)
            .swapchains(std::slice::from_ref(&self.handle));

        Ok(unsafe { self.device.swapchain().queue_present(queue.handle(), &present_info)? })
    }
}

impl DebugType for GfxSwapchain {
    fn debug_type_name() -> &'static str {
        "GfxSwapchain"
    }

    fn vk_handle(&self) -> impl vk::Handle {
        self.handle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(current: vk::Extent2D) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 3,
            current_extent: current,
            min_image_extent: vk::Extent2D { width: 1, height: 1 },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    #[test]
    fn immediate_falls_back_to_fifo() {
        let fifo_only = [vk::PresentModeKHR::FIFO];
        let both = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::IMMEDIATE];
        assert_eq!(choose_present_mode(true, &both), vk::PresentModeKHR::FIFO);
        assert_eq!(choose_present_mode(false, &both), vk::PresentModeKHR::IMMEDIATE);
        assert_eq!(choose_present_mode(false, &fifo_only), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn extent_follows_surface_when_fixed() {
        let fixed = vk::Extent2D { width: 800, height: 600 };
        let extent = choose_extent(&caps(fixed), vk::Extent2D { width: 1920, height: 1080 });
        assert_eq!(extent, fixed);
    }

    #[test]
    fn extent_is_clamped_when_surface_is_flexible() {
        let flexible = vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        };
        let extent = choose_extent(&caps(flexible), vk::Extent2D { width: 8000, height: 0 });
        assert_eq!(extent, vk::Extent2D { width: 4096, height: 1 });
    }

    #[test]
    fn image_count_respects_max() {
        let mut c = caps(vk::Extent2D::default());
        assert_eq!(choose_image_count(&c), 3);
        c.min_image_count = 3;
        assert_eq!(choose_image_count(&c), 3);
        c.max_image_count = 0;
        assert_eq!(choose_image_count(&c), 4);
    }

    #[test]
    fn surface_format_prefers_configured() {
        let preferred = vk::SurfaceFormatKHR {
            format: vk::Format::B8G8R8A8_SRGB,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        let other = vk::SurfaceFormatKHR {
            format: vk::Format::R8G8B8A8_UNORM,
            color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
        };
        assert_eq!(choose_surface_format(preferred, &[other, preferred]), preferred);
        assert_eq!(choose_surface_format(preferred, &[other]), other);
        assert_eq!(choose_surface_format(preferred, &[]), preferred);
    }
}
