// =============================================================================
// TRIANGLE DEMO - drives the Vulkan core from a winit window
// =============================================================================
//
// FRAME FLOW:
// 1. winit asks for a redraw
// 2. Rebuild the swapchain if the window changed size
// 3. VulkanRhi::draw_frame (wait, acquire, record, submit, present)
// 4. React to out-of-date/suboptimal by flagging a resize
//
// =============================================================================

use anyhow::{Context, Result};
use ash::vk;
use my_rhi::backend::shader::ShaderCode;
use my_rhi::{Config, FrameStatus, VulkanRhi};
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::ffi::CStr;
use std::fs::OpenOptions;
use std::sync::Arc;
use std::time::Instant;
use winit::{
    application::ApplicationHandler,
    event::WindowEvent,
    event_loop::{ActiveEventLoop, EventLoop},
    window::{Window, WindowAttributes},
};

// =============================================================================
// ENTRY POINT
// =============================================================================

fn main() -> Result<()> {
    // Load configuration from config.toml; a bad file is reported once logging is up
    let (config, config_error) = match Config::load() {
        Ok(config) => (config, None),
        Err(e) => (Config::default(), Some(e)),
    };

    init_logging(&config)?;
    if let Some(e) = config_error {
        log::warn!("{:#}. Using defaults.", e);
    }
    log::info!("Starting triangle demo");
    log::info!(
        "Window: {}x{}",
        config.window.width,
        config.window.height
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    event_loop.run_app(&mut app)?;

    if let Some(e) = app.fatal_error.take() {
        return Err(e);
    }
    Ok(())
}

/// Initialize logging, optionally into a file instead of stderr
fn init_logging(config: &Config) -> Result<()> {
    use env_logger::{Builder, Target};
    use log::LevelFilter;

    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);
    builder.parse_default_env();

    if config.debug.log_to_file {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&config.debug.log_file)
            .with_context(|| format!("Failed to open log file {}", config.debug.log_file))?;
        builder.target(Target::Pipe(Box::new(file)));
    }

    builder.init();
    Ok(())
}

/// Read both SPIR-V programs named in the config
fn load_shaders(config: &Config) -> Result<ShaderCode> {
    let vertex = std::fs::read(&config.shaders.vertex)
        .with_context(|| format!("Failed to read {:?}", config.shaders.vertex))?;
    let fragment = std::fs::read(&config.shaders.fragment)
        .with_context(|| format!("Failed to read {:?}", config.shaders.fragment))?;

    Ok(ShaderCode::from_bytes(&vertex, &fragment)?)
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// IMPORTANT: Field order matters for Drop! The RHI owns the surface, which
/// must be destroyed before the window it was created from.
struct App {
    config: Config,
    rhi: Option<VulkanRhi>,
    window: Option<Arc<Window>>,

    /// Set when the window changes size or the swapchain reports out-of-date
    needs_resize: bool,
    /// Startup or per-frame failure that ended the event loop
    fatal_error: Option<anyhow::Error>,

    frame_count: u32,
    last_fps_update: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        Self {
            config,
            rhi: None,
            window: None,
            needs_resize: false,
            fatal_error: None,
            frame_count: 0,
            last_fps_update: Instant::now(),
        }
    }

    fn init_vulkan(&self, window: &Window) -> Result<VulkanRhi> {
        let display_handle = window.raw_display_handle();
        let window_handle = window.raw_window_handle();

        // Surface extensions for this platform's window system
        let window_extensions: Vec<&CStr> = ash_window::enumerate_required_extensions(display_handle)
            .context("Failed to query surface extensions")?
            .iter()
            .map(|&ptr| unsafe { CStr::from_ptr(ptr) })
            .collect();

        let shaders = load_shaders(&self.config)?;
        let size = window.inner_size();

        let rhi = VulkanRhi::new(
            self.config.rhi_config(),
            &window_extensions,
            |entry, instance| unsafe {
                ash_window::create_surface(entry, instance, display_handle, window_handle, None)
            },
            vk::Extent2D {
                width: size.width,
                height: size.height,
            },
            shaders,
        )?;

        Ok(rhi)
    }

    fn render_frame(&mut self) -> Result<()> {
        let (Some(rhi), Some(window)) = (self.rhi.as_mut(), self.window.as_ref()) else {
            return Ok(());
        };

        if self.needs_resize {
            let size = window.inner_size();
            rhi.recreate_swapchain(size.width, size.height)?;
            self.needs_resize = false;
        }

        match rhi.draw_frame()? {
            FrameStatus::Presented => self.frame_count += 1,
            FrameStatus::Suboptimal => {
                self.frame_count += 1;
                self.needs_resize = true;
            }
            FrameStatus::OutOfDate => self.needs_resize = true,
            FrameStatus::Skipped => {}
        }

        Ok(())
    }

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let elapsed = self.last_fps_update.elapsed().as_secs_f32();
        if elapsed < 1.0 {
            return;
        }

        if let Some(ref window) = self.window {
            let fps = self.frame_count as f32 / elapsed;
            window.set_title(&format!("{} - {:.0} FPS", self.config.window.title, fps));
        }

        self.frame_count = 0;
        self.last_fps_update = Instant::now();
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("{:?}", error);
        self.fatal_error = Some(error);
        event_loop.exit();
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ));

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to create window"));
                return;
            }
        };

        match self.init_vulkan(&window) {
            Ok(rhi) => self.rhi = Some(rhi),
            Err(e) => {
                self.fail(event_loop, e.context("Failed to initialize Vulkan"));
                return;
            }
        }

        self.window = Some(window);
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                if let Some(ref rhi) = self.rhi {
                    let _ = rhi.wait_idle();
                }
                event_loop.exit();
            }

            WindowEvent::Resized(size) => {
                log::debug!("Window resized to {}x{}", size.width, size.height);
                self.needs_resize = true;
            }

            WindowEvent::RedrawRequested => {
                if let Err(e) = self.render_frame() {
                    self.fail(event_loop, e.context("Render error"));
                    return;
                }
                self.update_fps();
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    log::info!("ESC pressed, exiting...");
                    event_loop.exit();
                }
            }

            _ => {}
        }
    }

    /// Request continuous redraws
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}
