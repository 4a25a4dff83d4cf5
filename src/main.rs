// =============================================================================
// COMPUTE RENDERER - one compute pass, composited and presented every frame
// =============================================================================
//
// ARCHITECTURE OVERVIEW:
// ┌─────────────────────────────────────────────────────────────────┐
// │  winit event loop (quit signal, redraw requests)                │
// │    └── FrameLoop (acquire → record → submit → present → next)   │
// │          └── VulkanBackend                                      │
// │                ├── Swapchain (presentable images, FIFO)         │
// │                ├── FrameRing of FrameSlots (fence + semaphores) │
// │                ├── ComputePass (pipeline + intermediate image)  │
// │                └── Compositor (blit onto the swapchain image)   │
// └─────────────────────────────────────────────────────────────────┘
//
// EXIT CODES: 0 after a requested quit, 1 after any fatal failure.
//
// =============================================================================

mod backend;
mod config;
mod error;
mod frame_loop;
mod frame_ring;
mod renderer;
mod teardown;

use anyhow::Result;
use config::Config;
use frame_loop::FrameLoop;
use renderer::VulkanBackend;
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
    init_logging();

    // Load configuration from config.toml
    let config = Config::load();
    log::info!("Starting compute renderer");
    log::info!(
        "Window: {}x{}, kernel: {:?}",
        config.window.width,
        config.window.height,
        config.kernel.path
    );

    let event_loop = EventLoop::new()?;
    let mut app = App::new(config);
    let run = event_loop.run_app(&mut app);

    // Tear down even when the event loop itself failed.
    // Returning an error from main exits with code 1
    let finished = app.finish();
    run?;
    finished
}

/// Initialize logging; RUST_LOG overrides the default `info` level.
fn init_logging() {
    use env_logger::Builder;
    use log::LevelFilter;

    let mut builder = Builder::new();
    builder.filter_level(LevelFilter::Info);
    builder.parse_default_env();
    builder.init();
}

// =============================================================================
// APPLICATION STATE
// =============================================================================

/// IMPORTANT: Field order matters for Drop! The frame loop presents into the
/// window's surface, so it goes before the window.
struct App {
    config: Config,
    frame_loop: Option<FrameLoop<VulkanBackend>>,
    window: Option<Arc<Window>>,

    /// Set on the first quit signal; no frame starts after it.
    quit_requested: bool,
    /// First fatal error; ends the event loop and becomes the exit status.
    failure: Option<anyhow::Error>,

    // FPS TRACKING
    frame_count: u32,
    last_fps_update: Instant,
    last_frame_time: Instant,
}

impl App {
    fn new(config: Config) -> Self {
        let now = Instant::now();
        Self {
            config,
            frame_loop: None,
            window: None,
            quit_requested: false,
            failure: None,
            frame_count: 0,
            last_fps_update: now,
            last_frame_time: now,
        }
    }

    fn fail(&mut self, event_loop: &ActiveEventLoop, error: anyhow::Error) {
        log::error!("Fatal: {:#}", error);
        self.failure.get_or_insert(error);
        event_loop.exit();
    }

    /// Render one frame. Errors of every kind end the loop: there is no
    /// swapchain recreation, so even a stale surface is terminal.
    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        if self.quit_requested {
            return;
        }
        let Some(frame_loop) = self.frame_loop.as_mut() else {
            return;
        };

        match frame_loop.render_frame() {
            Ok(_) => self.update_fps(),
            Err(e) if e.is_transient() => {
                log::error!("Surface changed underneath the swapchain; recreation is not supported");
                self.fail(event_loop, e.into());
            }
            Err(e) => self.fail(event_loop, e.into()),
        }
    }

    /// Drain the GPU, release everything, and report how the run ended.
    fn finish(mut self) -> Result<()> {
        if let Some(frame_loop) = self.frame_loop.take() {
            log::info!("Rendered {} frames", frame_loop.frames_completed());
            if let Err(e) = frame_loop.shutdown() {
                log::error!("Shutdown failed: {}", e);
                self.failure.get_or_insert(e.into());
            }
        }
        match self.failure.take() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    // =========================================================================
    // FPS TRACKING
    // =========================================================================

    fn update_fps(&mut self) {
        if !self.config.debug.show_fps {
            return;
        }

        let now = Instant::now();
        let frame_time = now.duration_since(self.last_frame_time).as_secs_f32();
        self.last_frame_time = now;
        self.frame_count += 1;

        // Update title every second
        let elapsed = now.duration_since(self.last_fps_update).as_secs_f32();
        if elapsed >= 1.0 {
            let fps = self.frame_count as f32 / elapsed;

            if let Some(ref window) = self.window {
                window.set_title(&format!(
                    "{} - {:.0} FPS ({:.2}ms)",
                    self.config.window.title,
                    fps,
                    frame_time * 1000.0
                ));
            }

            self.frame_count = 0;
            self.last_fps_update = now;
        }
    }
}

// =============================================================================
// EVENT HANDLING
// =============================================================================

impl ApplicationHandler for App {
    /// Called when the application is ready to create windows.
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_some() {
            return;
        }

        let window_attributes = WindowAttributes::default()
            .with_title(&self.config.window.title)
            .with_inner_size(winit::dpi::PhysicalSize::new(
                self.config.window.width,
                self.config.window.height,
            ))
            .with_resizable(false);

        let window = match event_loop.create_window(window_attributes) {
            Ok(w) => Arc::new(w),
            Err(e) => {
                self.fail(event_loop, anyhow::Error::new(e).context("Failed to create window"));
                return;
            }
        };

        match renderer::create(&window, &self.config) {
            Ok(frame_loop) => self.frame_loop = Some(frame_loop),
            Err(e) => {
                self.fail(event_loop, e.context("Failed to initialize Vulkan"));
                return;
            }
        }

        self.window = Some(window);
    }

    /// Only the quit signal and redraws matter; everything else is ignored.
    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested => {
                log::info!("Close requested, shutting down...");
                self.quit_requested = true;
                event_loop.exit();
            }

            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::{KeyCode, PhysicalKey};

                if event.state.is_pressed()
                    && event.physical_key == PhysicalKey::Code(KeyCode::Escape)
                {
                    log::info!("ESC pressed, exiting...");
                    self.quit_requested = true;
                    event_loop.exit();
                }
            }

            WindowEvent::RedrawRequested => self.redraw(event_loop),

            _ => {}
        }
    }

    /// Keep frames coming: ask for the next redraw as soon as events are drained.
    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        if self.quit_requested || self.failure.is_some() {
            return;
        }
        if let Some(ref window) = self.window {
            window.request_redraw();
        }
    }
}
