//! The host-facing renderer facade.
//!
//! Assembles instance, surface, device, swapchain, backend, and frame
//! driver, and exposes the loop surface a host application drives:
//! `new` (init) / `resize` / `begin_render` / `end_render` / `wait_render`.

use std::sync::Arc;

use ember_platform::{Surface, Window};
use ember_rhi::descriptor::DescriptorPoolManager;
use ember_rhi::device::Device;
use ember_rhi::instance::Instance;
use ember_rhi::physical_device::select_physical_device;
use ember_rhi::swapchain::Swapchain;
use ember_rhi::vk;
use ember_rhi::{RhiError, RhiResult};
use tracing::info;

use crate::backend::VulkanBackend;
use crate::frame::FrameTransients;
use crate::graph::{FrameDriver, FrameGraphBuilder};
use crate::handoff::FrameHandoff;

/// Renderer construction options.
#[derive(Clone, Copy, Debug)]
pub struct RendererConfig {
    /// Enable validation layers when available.
    pub validation: bool,
    /// Run the logic and render halves inline on one thread.
    pub single_loop: bool,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            validation: cfg!(debug_assertions),
            single_loop: true,
        }
    }
}

/// Everything a host needs to build its pass graph during init.
pub struct GraphSetup<'a> {
    /// The logical device.
    pub device: &'a Arc<Device>,
    /// The descriptor pool manager.
    pub pool_manager: &'a Arc<DescriptorPoolManager>,
    /// The swapchain color format.
    pub surface_format: vk::Format,
    /// The number of frame-in-flight slots.
    pub slot_count: usize,
}

/// The renderer: owns the full Vulkan stack and the frame driver.
///
/// Field order is drop order: the driver drains and releases per-frame
/// resources first, and the instance goes last.
pub struct Renderer {
    driver: FrameDriver<VulkanBackend>,
    pool_manager: Arc<DescriptorPoolManager>,
    handoff: FrameHandoff,
    device: Arc<Device>,
    surface: Surface,
    instance: Instance,
    size: (u32, u32),
    needs_resize: bool,
}

impl Renderer {
    /// Initializes the renderer for a window.
    ///
    /// The pass graph is built by `build_graph` once the device and
    /// swapchain exist, so passes can capture the device and create their
    /// own resources.
    ///
    /// # Errors
    ///
    /// Returns an error if any stage of device or swapchain setup fails.
    pub fn new<F>(window: &Window, config: RendererConfig, build_graph: F) -> RhiResult<Self>
    where
        F: FnOnce(&GraphSetup<'_>) -> FrameGraphBuilder<FrameTransients>,
    {
        let instance = Instance::new(config.validation)?;
        let surface = window
            .create_surface(instance.entry(), instance.handle())
            .map_err(|e| RhiError::SurfaceError(e.to_string()))?;

        let physical_device =
            select_physical_device(instance.handle(), surface.handle(), surface.loader())?;
        let device = Device::new(&instance, &physical_device)?;

        let swapchain = Swapchain::new(
            &instance,
            device.clone(),
            surface.handle(),
            surface.loader(),
            window.width(),
            window.height(),
        )?;

        let pool_manager = Arc::new(DescriptorPoolManager::new(device.clone()));
        let graph = build_graph(&GraphSetup {
            device: &device,
            pool_manager: &pool_manager,
            surface_format: swapchain.format(),
            slot_count: swapchain.image_count(),
        });

        let backend = VulkanBackend::new(device.clone(), swapchain)?;
        let driver = FrameDriver::new(backend, graph)?;

        info!("Renderer initialized on '{}'", physical_device.device_name());

        Ok(Self {
            driver,
            pool_manager,
            handoff: FrameHandoff::new(config.single_loop),
            device,
            surface,
            instance,
            size: (window.width(), window.height()),
            needs_resize: false,
        })
    }

    /// Returns the logical device.
    #[inline]
    pub fn device(&self) -> &Arc<Device> {
        &self.device
    }

    /// Returns the Vulkan instance.
    #[inline]
    pub fn instance(&self) -> &Instance {
        &self.instance
    }

    /// Returns the descriptor pool manager.
    #[inline]
    pub fn descriptor_pools(&self) -> &Arc<DescriptorPoolManager> {
        &self.pool_manager
    }

    /// Returns the swapchain color format, for pass/pipeline setup.
    pub fn surface_format(&self) -> vk::Format {
        self.driver.backend().swapchain().format()
    }

    /// Returns the swapchain extent.
    pub fn extent(&self) -> vk::Extent2D {
        self.driver.backend().swapchain().extent()
    }

    /// Returns the number of frame-in-flight slots.
    pub fn slot_count(&self) -> usize {
        self.driver.backend().swapchain().image_count()
    }

    /// Returns the frame driver, for pass-time access (post-submit hooks,
    /// statistics).
    #[inline]
    pub fn driver(&self) -> &FrameDriver<VulkanBackend> {
        &self.driver
    }

    /// True when a previous frame reported an out-of-date swapchain; call
    /// [`Renderer::resize`] before the next frame.
    #[inline]
    pub fn needs_resize(&self) -> bool {
        self.needs_resize
    }

    /// Recreates the swapchain and every frame context at the new size.
    ///
    /// # Errors
    ///
    /// Returns an error if recreation fails.
    pub fn resize(&mut self, width: u32, height: u32) -> RhiResult<()> {
        if width == 0 || height == 0 {
            // Minimized; remember the size and keep skipping frames.
            self.size = (width, height);
            return Ok(());
        }

        self.device.wait_idle()?;
        self.driver.backend_mut().swapchain_mut().recreate(
            self.surface.handle(),
            self.surface.loader(),
            width,
            height,
        )?;
        self.driver.rebuild_contexts()?;
        self.size = (width, height);
        self.needs_resize = false;

        info!("Renderer resized to {}x{}", width, height);
        Ok(())
    }

    /// Starts a frame on the logic side.
    ///
    /// Blocks until the render side consumed the previous frame (a no-op in
    /// single-loop mode). Returns false when rendering should be skipped
    /// (zero-sized window or pending resize).
    pub fn begin_render(&mut self) -> bool {
        if self.size.0 == 0 || self.size.1 == 0 || self.needs_resize {
            return false;
        }
        self.handoff.wait_logic_ready();
        true
    }

    /// Finishes the logic side of a frame and consumes it.
    ///
    /// Posts render-ready, then runs the render half of the handoff; with
    /// a dedicated render thread the same calls distribute across the two
    /// threads, in single-loop mode they all run inline here.
    ///
    /// # Errors
    ///
    /// Returns the first backend or pass error of the frame.
    pub fn end_render(&mut self) -> RhiResult<()> {
        self.handoff.post_render_ready();

        self.handoff.wait_render_ready();
        let needs_resize = self.driver.render_frame()?;
        if needs_resize {
            self.needs_resize = true;
        }
        self.handoff.post_logic_ready();
        Ok(())
    }

    /// Blocks until all in-flight GPU work completes.
    ///
    /// # Errors
    ///
    /// Returns an error if the wait fails.
    pub fn wait_render(&mut self) -> RhiResult<()> {
        self.driver.wait_idle()
    }
}
