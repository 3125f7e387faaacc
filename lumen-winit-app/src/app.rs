use std::{ffi::CStr, rc::Rc};

use lumen_gfx::{gfx_core::GfxCore, render::device::Device, settings::GfxSettings, window::WindowProvider};
use raw_window_handle::HasDisplayHandle;
use winit::{
    application::ApplicationHandler,
    dpi::LogicalSize,
    event::{ElementState, KeyEvent, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop},
    keyboard::{KeyCode, PhysicalKey},
    window::{Window, WindowId},
};

use crate::{clear_renderer::ClearRenderer, winit_window::WinitWindow};

const WINDOW_TITLE: &str = "Lumen";
const WINDOW_WIDTH: f64 = 1280.0;
const WINDOW_HEIGHT: f64 = 720.0;

pub struct WinitApp {
    /// 持有 device，需要先于窗口销毁
    renderer: Option<ClearRenderer>,
    window: Option<Rc<WinitWindow>>,
}

// new & init
impl WinitApp {
    pub fn run() -> anyhow::Result<()> {
        Self::init_env();

        let event_loop = EventLoop::new()?;
        let mut app = Self {
            renderer: None,
            window: None,
        };
        event_loop.run_app(&mut app)?;

        log::info!("end run");
        Ok(())
    }

    fn init_env() {
        let default_hook = std::panic::take_hook();
        std::panic::set_hook(Box::new(move |info| {
            log::error!("{}", info);
            default_hook(info);
        }));

        lumen_crate_tools::init_log::init_log();
        tracy_client::Client::start();
        tracy_client::set_thread_name!("main");
    }

    fn init_renderer(&mut self, event_loop: &ActiveEventLoop) -> anyhow::Result<()> {
        let attributes = Window::default_attributes()
            .with_title(WINDOW_TITLE)
            .with_inner_size(LogicalSize::new(WINDOW_WIDTH, WINDOW_HEIGHT));
        let window = Rc::new(WinitWindow::new(event_loop.create_window(attributes)?));

        // surface 需要的 instance 扩展由窗口系统决定
        let raw_display_handle = window.display_handle()?.as_raw();
        let extra_exts = ash_window::enumerate_required_extensions(raw_display_handle)?
            .iter()
            .map(|ext| unsafe { CStr::from_ptr(*ext) })
            .collect::<Vec<_>>();

        let core = Rc::new(GfxCore::new(GfxSettings::from_env(), &extra_exts)?);
        let device = Device::new(core, window.clone() as Rc<dyn WindowProvider>)?;

        self.renderer = Some(ClearRenderer::new(device)?);
        self.window = Some(window);
        Ok(())
    }
}

// tools
impl WinitApp {
    fn update(&mut self, event_loop: &ActiveEventLoop) {
        let Some(renderer) = self.renderer.as_mut() else {
            return;
        };
        if let Err(e) = renderer.render() {
            log::error!("render failed: {}", e);
            event_loop.exit();
        }
    }
}

impl ApplicationHandler for WinitApp {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.renderer.is_some() {
            return;
        }
        log::info!("winit event: resumed");
        if let Err(e) = self.init_renderer(event_loop) {
            log::error!("failed to init renderer: {:#}", e);
            event_loop.exit();
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _window_id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("The close button was pressed; stopping");
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                log::debug!("window resized: {}x{}", size.width, size.height);
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.notify_resized();
                }
            }
            WindowEvent::KeyboardInput {
                event:
                    KeyEvent {
                        physical_key: PhysicalKey::Code(KeyCode::KeyV),
                        state: ElementState::Pressed,
                        repeat: false,
                        ..
                    },
                ..
            } => {
                if let Some(renderer) = self.renderer.as_mut() {
                    renderer.toggle_vsync();
                }
            }
            WindowEvent::RedrawRequested => self.update(event_loop),
            _ => (),
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(window) = self.window.as_ref() {
            window.window().request_redraw();
        }
    }

    fn suspended(&mut self, _event_loop: &ActiveEventLoop) {
        log::info!("winit event: suspended");
    }

    fn exiting(&mut self, _event_loop: &ActiveEventLoop) {
        log::info!("winit event: exiting");
        // device 的 drop 会等待 GPU 空闲
        self.renderer = None;
        self.window = None;
    }

    fn memory_warning(&mut self, _event_loop: &ActiveEventLoop) {
        log::warn!("winit event: memory warning");
    }
}
