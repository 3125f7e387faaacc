use std::time::Instant;

use ash::vk;
use lumen_gfx::{
    GfxResult,
    render::{device::Device, render_device::RenderDevice},
    resources::{
        desc::{
            BindGroupDesc, BindGroupLayoutDesc, BindingDesc, BindingKind, BufferBinding, BufferDesc, MemoryClass,
            TextureBinding, TextureDesc,
        },
        handles::{BindGroupHandle, BindGroupLayoutHandle, BufferHandle, TextureHandle},
        manager::ResourceManager,
        usage::Usage,
    },
    settings::MAX_FRAMES_IN_FLIGHT,
};

const CHECKER_SIZE: u32 = 256;
const CHECKER_CELL: u32 = 32;

/// 每个 slot 一份，通过 dynamic offset 选择
#[repr(C)]
#[derive(Clone, Copy, bytemuck::Pod, bytemuck::Zeroable)]
struct FrameUniform {
    clear_color: [f32; 4],
    time: f32,
    frame_id: u32,
    _padding: [u32; 2],
}

/// 清屏，并维护一组常驻资源：per-frame uniform、带 mipmap 的棋盘格纹理以及引用它们的 bind group
pub struct ClearRenderer {
    uniform: BufferHandle,
    /// 按 `min_ubo_offset_align` 对齐后的单帧大小
    uniform_stride: u64,
    checker: TextureHandle,
    layout: BindGroupLayoutHandle,
    bind_group: BindGroupHandle,

    start: Instant,
    device: Device,
}

// new & init
impl ClearRenderer {
    pub fn new(mut device: Device) -> GfxResult<Self> {
        let uniform_stride = align_up(size_of::<FrameUniform>() as u64, device.core().min_ubo_offset_align());
        let rm = device.resources_mut();

        let uniform = rm.create_buffer(&BufferDesc::new(
            "frame-uniform",
            uniform_stride * MAX_FRAMES_IN_FLIGHT as u64,
            Usage::UNIFORM_BUFFER,
            MemoryClass::Upload,
        ))?;

        let checker = rm.create_texture_with_data(
            &checker_pixels(CHECKER_SIZE, CHECKER_CELL),
            &TextureDesc {
                debug_name: "checker".to_string(),
                width: CHECKER_SIZE,
                height: CHECKER_SIZE,
                generate_mips: true,
                ..Default::default()
            },
        )?;

        let layout = rm.create_bind_group_layout(&BindGroupLayoutDesc {
            debug_name: "frame".to_string(),
            bindings: vec![
                BindingDesc::new(0, BindingKind::Texture, vk::ShaderStageFlags::FRAGMENT),
                BindingDesc::new(1, BindingKind::DynamicBuffer, vk::ShaderStageFlags::ALL_GRAPHICS),
            ],
        })?;
        let bind_group = rm.create_bind_group(&BindGroupDesc {
            debug_name: "frame".to_string(),
            layout,
            textures: vec![TextureBinding {
                binding: 0,
                texture: checker,
            }],
            buffers: vec![BufferBinding {
                binding: 1,
                buffer: uniform,
                offset: 0,
                range: Some(size_of::<FrameUniform>() as u64),
            }],
        })?;

        let checker_info = rm.texture_info(checker)?;
        log::info!(
            "checker texture: {}x{}, {} mip levels",
            checker_info.width,
            checker_info.height,
            checker_info.num_mip_levels
        );

        Ok(Self {
            uniform,
            uniform_stride,
            checker,
            layout,
            bind_group,
            start: Instant::now(),
            device,
        })
    }
}

// tools
impl ClearRenderer {
    pub fn render(&mut self) -> GfxResult<()> {
        let _span = tracy_client::span!("ClearRenderer::render");

        if !self.device.begin_frame()? {
            return Ok(());
        }

        let time = self.start.elapsed().as_secs_f32();
        let color = clear_color(time);
        let frame_uniform = FrameUniform {
            clear_color: color.to_array(),
            time,
            frame_id: self.device.frame_id() as u32,
            _padding: [0; 2],
        };
        let offset = self.device.frame_idx() as u64 * self.uniform_stride;
        // 写入失败时仍然完成这一帧，frame ring 保持一致之后再返回错误
        let written = self.device.resources_mut().write_buffer_pod(self.uniform, &frame_uniform, offset);

        {
            let cmd = self.device.cmd()?;
            if let Err(e) = &written {
                cmd.insert_error_label(e);
            }
            cmd.begin_label("clear");
            cmd.begin_rendering_swapchain(Some(color), None)?;
            cmd.end_rendering();
            cmd.end_label();
        }

        self.device.end_frame()?;
        written
    }

    #[inline]
    pub fn notify_resized(&mut self) {
        self.device.notify_resized();
    }

    pub fn toggle_vsync(&mut self) {
        let vsync = !self.device.vsync();
        self.device.set_vsync(vsync);
    }
}

impl Drop for ClearRenderer {
    fn drop(&mut self) {
        let rm = self.device.resources_mut();
        let results = [
            rm.destroy_bind_group(self.bind_group),
            rm.destroy_bind_group_layout(self.layout),
            rm.destroy_texture(self.checker),
            rm.destroy_buffer(self.uniform),
        ];
        for e in results.into_iter().filter_map(Result::err) {
            log::error!("failed to destroy renderer resource: {}", e);
        }
        // 剩下的延迟销毁由 device 在 drop 时统一处理
    }
}

#[inline]
fn align_up(size: u64, align: u64) -> u64 {
    let align = align.max(1);
    size.div_ceil(align) * align
}

/// 随时间缓慢变化的清屏颜色
fn clear_color(time: f32) -> glam::Vec4 {
    glam::vec4(0.5 + 0.4 * time.sin(), 0.3, 0.5 + 0.4 * (time * 0.7).cos(), 1.0)
}

/// RGBA8 的黑白棋盘格
fn checker_pixels(size: u32, cell: u32) -> Vec<u8> {
    (0..size)
        .flat_map(|y| (0..size).map(move |x| (x, y)))
        .flat_map(|(x, y)| {
            let v = if (x / cell + y / cell) % 2 == 0 { 230 } else { 25 };
            [v, v, v, 255]
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn uniform_stride_respects_alignment() {
        assert_eq!(size_of::<FrameUniform>(), 32);
        assert_eq!(align_up(32, 256), 256);
        assert_eq!(align_up(256, 256), 256);
        assert_eq!(align_up(257, 256), 512);
        assert_eq!(align_up(32, 0), 32);
    }

    #[test]
    fn checker_has_alternating_cells() {
        let pixels = checker_pixels(4, 2);
        assert_eq!(pixels.len(), 4 * 4 * 4);
        // (0,0) 与 (2,0) 属于相邻的格子
        assert_eq!(pixels[0], 230);
        assert_eq!(pixels[2 * 4], 25);
        // (2,2) 与 (0,0) 颜色相同
        assert_eq!(pixels[(2 * 4 + 2) * 4], 230);
    }
}
