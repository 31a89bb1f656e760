//! Ember demo application.
//!
//! Opens a window and drives the renderer through a two-queue frame graph:
//! an early-graphics pass that prepares the swapchain image and a main
//! graphics pass that clears it to a slowly shifting color. Small, but it
//! exercises the full acquire/record/submit/present machinery.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use tracing::{error, info};
use winit::application::ApplicationHandler;
use winit::event::WindowEvent;
use winit::event_loop::{ActiveEventLoop, ControlFlow, EventLoop};
use winit::window::WindowId;

use ember_core::Timer;
use ember_platform::{InputState, KeyCode, Window};
use ember_render::{FrameGraphBuilder, QueueKind, Renderer, RendererConfig};
use ember_rhi::barrier;
use ember_rhi::command::CommandBuffer;
use ember_rhi::vk;

struct App {
    window: Option<Window>,
    renderer: Option<Renderer>,
    input: InputState,
    timer: Timer,
}

impl App {
    fn new() -> Self {
        Self {
            window: None,
            renderer: None,
            input: InputState::new(),
            timer: Timer::new(),
        }
    }

    fn create_renderer(window: &Window) -> Result<Renderer> {
        let frame_counter = Arc::new(AtomicU64::new(0));

        let renderer = Renderer::new(window, RendererConfig::default(), |setup| {
            let device_early = setup.device.clone();
            let device_main = setup.device.clone();
            let counter = frame_counter.clone();

            FrameGraphBuilder::new()
                .add_pass("prepare", QueueKind::EarlyGraphics, move |ctx| {
                    let cmd = CommandBuffer::from_handle(device_early.clone(), ctx.command_buffer);
                    barrier::transition_color_image(
                        &cmd,
                        ctx.target.image,
                        vk::ImageLayout::UNDEFINED,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        1,
                    );
                    Ok(())
                })
                .add_pass("clear", QueueKind::Graphics, move |ctx| {
                    let cmd = CommandBuffer::from_handle(device_main.clone(), ctx.command_buffer);

                    let frame = counter.fetch_add(1, Ordering::Relaxed);
                    let phase = (frame % 512) as f32 / 512.0;
                    let clear = vk::ClearColorValue {
                        float32: [0.05, 0.05 + 0.2 * phase, 0.2 - 0.1 * phase, 1.0],
                    };
                    let range = vk::ImageSubresourceRange {
                        aspect_mask: vk::ImageAspectFlags::COLOR,
                        base_mip_level: 0,
                        level_count: 1,
                        base_array_layer: 0,
                        layer_count: 1,
                    };
                    cmd.clear_color_image(
                        ctx.target.image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        &clear,
                        &[range],
                    );

                    barrier::transition_color_image(
                        &cmd,
                        ctx.target.image,
                        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                        vk::ImageLayout::PRESENT_SRC_KHR,
                        1,
                    );
                    Ok(())
                })
        })?;

        Ok(renderer)
    }
}

impl ApplicationHandler for App {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.window.is_none() {
            match Window::new(event_loop, 1280, 720, "Ember") {
                Ok(window) => match Self::create_renderer(&window) {
                    Ok(renderer) => {
                        info!("Initialization complete, entering main loop");
                        self.renderer = Some(renderer);
                        self.window = Some(window);
                    }
                    Err(e) => {
                        error!("Failed to create renderer: {:?}", e);
                        event_loop.exit();
                    }
                },
                Err(e) => {
                    error!("Failed to create window: {}", e);
                    event_loop.exit();
                }
            }
        }
    }

    fn window_event(&mut self, event_loop: &ActiveEventLoop, _id: WindowId, event: WindowEvent) {
        match event {
            WindowEvent::CloseRequested => {
                info!("Close requested, shutting down");
                if let Some(renderer) = &mut self.renderer {
                    if let Err(e) = renderer.wait_render() {
                        error!("Failed to drain GPU work: {:?}", e);
                    }
                }
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(window) = &mut self.window {
                    window.resize(size.width, size.height);
                }
                if let Some(renderer) = &mut self.renderer {
                    if let Err(e) = renderer.resize(size.width, size.height) {
                        error!("Resize failed: {:?}", e);
                    }
                }
            }
            WindowEvent::RedrawRequested => {
                let _delta = self.timer.delta_secs();

                if let Some(renderer) = &mut self.renderer {
                    if renderer.needs_resize() {
                        if let Some(window) = &self.window {
                            if let Err(e) = renderer.resize(window.width(), window.height()) {
                                error!("Swapchain recreation failed: {:?}", e);
                                return;
                            }
                        }
                    }
                    if renderer.begin_render() {
                        if let Err(e) = renderer.end_render() {
                            error!("Render error: {:?}", e);
                        }
                    }
                }
            }
            WindowEvent::KeyboardInput { event, .. } => {
                use winit::keyboard::PhysicalKey;
                if let PhysicalKey::Code(key) = event.physical_key {
                    if event.state.is_pressed() {
                        self.input.on_key_pressed(key);
                    } else {
                        self.input.on_key_released(key);
                    }
                }
                if self.input.was_just_pressed(KeyCode::Escape) {
                    event_loop.exit();
                }
            }
            _ => {}
        }
    }

    fn about_to_wait(&mut self, _event_loop: &ActiveEventLoop) {
        self.input.begin_frame();
        if let Some(window) = &self.window {
            window.request_redraw();
        }
    }
}

fn main() -> Result<()> {
    ember_core::init_logging();
    info!("Starting Ember");

    let event_loop = EventLoop::new()?;
    event_loop.set_control_flow(ControlFlow::Poll);

    let mut app = App::new();
    event_loop.run_app(&mut app)?;

    Ok(())
}
