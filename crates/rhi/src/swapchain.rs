//! Swapchain creation, recreation, acquire, and present.
//!
//! The swapchain reports out-of-date/suboptimal conditions to the caller via
//! raw `vk::Result` values; the frame driver decides whether to surface them
//! as a resize request. Recreation happens through [`Swapchain::recreate`]
//! during an explicit resize, never inline in the frame loop.

use std::sync::Arc;

use ash::vk;
use tracing::{debug, info};

use crate::device::Device;
use crate::error::{RhiError, RhiResult};
use crate::instance::Instance;

/// Surface capabilities, formats, and present modes for a device/surface pair.
pub struct SwapchainSupportDetails {
    /// Surface capabilities (image counts, extent bounds, transforms).
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    /// Supported surface formats.
    pub formats: Vec<vk::SurfaceFormatKHR>,
    /// Supported present modes.
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SwapchainSupportDetails {
    /// Queries the support details for a physical device and surface.
    ///
    /// # Errors
    ///
    /// Returns an error if any surface query fails.
    pub fn query(
        physical_device: vk::PhysicalDevice,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
    ) -> RhiResult<Self> {
        let capabilities = unsafe {
            surface_loader.get_physical_device_surface_capabilities(physical_device, surface)?
        };
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(physical_device, surface)?
        };
        let present_modes = unsafe {
            surface_loader.get_physical_device_surface_present_modes(physical_device, surface)?
        };

        Ok(Self {
            capabilities,
            formats,
            present_modes,
        })
    }

    /// True when the surface offers at least one format and present mode.
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }

    /// Picks the preferred surface format (sRGB BGRA when available).
    pub fn choose_format(&self) -> vk::SurfaceFormatKHR {
        self.formats
            .iter()
            .find(|f| {
                f.format == vk::Format::B8G8R8A8_SRGB
                    && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
            })
            .copied()
            .unwrap_or(self.formats[0])
    }

    /// Picks the preferred present mode (mailbox when available, else FIFO,
    /// which is always supported).
    pub fn choose_present_mode(&self) -> vk::PresentModeKHR {
        if self.present_modes.contains(&vk::PresentModeKHR::MAILBOX) {
            vk::PresentModeKHR::MAILBOX
        } else {
            vk::PresentModeKHR::FIFO
        }
    }

    /// Clamps the requested extent to the surface's supported range.
    pub fn choose_extent(&self, width: u32, height: u32) -> vk::Extent2D {
        let caps = &self.capabilities;
        if caps.current_extent.width != u32::MAX {
            return caps.current_extent;
        }
        vk::Extent2D {
            width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// Swapchain wrapper owning the images and their color views.
pub struct Swapchain {
    device: Arc<Device>,
    loader: ash::khr::swapchain::Device,
    swapchain: vk::SwapchainKHR,
    surface_format: vk::SurfaceFormatKHR,
    present_mode: vk::PresentModeKHR,
    extent: vk::Extent2D,
    images: Vec<vk::Image>,
    image_views: Vec<vk::ImageView>,
}

impl Swapchain {
    /// Creates a swapchain for the given surface.
    ///
    /// # Errors
    ///
    /// Returns an error if the surface is inadequate or creation fails.
    pub fn new(
        instance: &Instance,
        device: Arc<Device>,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
        width: u32,
        height: u32,
    ) -> RhiResult<Self> {
        let loader = ash::khr::swapchain::Device::new(instance.handle(), device.handle());
        let mut swapchain = Self {
            device,
            loader,
            swapchain: vk::SwapchainKHR::null(),
            surface_format: vk::SurfaceFormatKHR::default(),
            present_mode: vk::PresentModeKHR::FIFO,
            extent: vk::Extent2D::default(),
            images: Vec::new(),
            image_views: Vec::new(),
        };
        swapchain.create(surface, surface_loader, width, height)?;
        Ok(swapchain)
    }

    /// Destroys the current chain and creates a new one at the given size.
    ///
    /// The caller must ensure the device is idle first.
    ///
    /// # Errors
    ///
    /// Returns an error if recreation fails.
    pub fn recreate(
        &mut self,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
        width: u32,
        height: u32,
    ) -> RhiResult<()> {
        self.destroy_views();
        let old = self.swapchain;
        self.create(surface, surface_loader, width, height)?;
        if old != vk::SwapchainKHR::null() {
            unsafe { self.loader.destroy_swapchain(old, None) };
        }
        info!("Swapchain recreated at {}x{}", width, height);
        Ok(())
    }

    fn create(
        &mut self,
        surface: vk::SurfaceKHR,
        surface_loader: &ash::khr::surface::Instance,
        width: u32,
        height: u32,
    ) -> RhiResult<()> {
        let support = SwapchainSupportDetails::query(
            self.device.physical_device(),
            surface,
            surface_loader,
        )?;
        if !support.is_adequate() {
            return Err(RhiError::SwapchainError(
                "surface offers no formats or present modes".to_string(),
            ));
        }

        let surface_format = support.choose_format();
        let present_mode = support.choose_present_mode();
        let extent = support.choose_extent(width, height);

        // One more than the minimum to avoid waiting on the driver, clamped
        // to the supported maximum (0 means unbounded).
        let mut image_count = support.capabilities.min_image_count + 1;
        if support.capabilities.max_image_count > 0 {
            image_count = image_count.min(support.capabilities.max_image_count);
        }

        let families = self.device.queue_families();
        let graphics = families.graphics_family.unwrap_or(0);
        let present = families.present_family.unwrap_or(graphics);
        let family_indices = [graphics, present];

        let mut create_info = vk::SwapchainCreateInfoKHR::default()
            .surface(surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(
                vk::ImageUsageFlags::COLOR_ATTACHMENT | vk::ImageUsageFlags::TRANSFER_DST,
            )
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true)
            .old_swapchain(self.swapchain);

        create_info = if graphics != present {
            create_info
                .image_sharing_mode(vk::SharingMode::CONCURRENT)
                .queue_family_indices(&family_indices)
        } else {
            create_info.image_sharing_mode(vk::SharingMode::EXCLUSIVE)
        };

        let swapchain = unsafe { self.loader.create_swapchain(&create_info, None)? };
        let images = unsafe { self.loader.get_swapchain_images(swapchain)? };

        let mut image_views = Vec::with_capacity(images.len());
        for &image in &images {
            let view_info = vk::ImageViewCreateInfo::default()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(surface_format.format)
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });
            let view = unsafe { self.device.handle().create_image_view(&view_info, None)? };
            image_views.push(view);
        }

        info!(
            "Swapchain created: {}x{}, {} image(s), {:?}, {:?}",
            extent.width,
            extent.height,
            images.len(),
            surface_format.format,
            present_mode
        );

        self.swapchain = swapchain;
        self.surface_format = surface_format;
        self.present_mode = present_mode;
        self.extent = extent;
        self.images = images;
        self.image_views = image_views;
        Ok(())
    }

    /// Acquires the next image, signaling `semaphore` when it is ready.
    ///
    /// Returns the image index and whether the chain is suboptimal. An
    /// out-of-date chain surfaces as `Err(vk::Result::ERROR_OUT_OF_DATE_KHR)`
    /// for the caller to map to a resize request.
    pub fn acquire_next_image(
        &self,
        semaphore: vk::Semaphore,
    ) -> Result<(u32, bool), vk::Result> {
        unsafe {
            self.loader.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        }
    }

    /// Presents the image at `index`, waiting on `wait_semaphore`.
    ///
    /// Returns whether the chain is suboptimal.
    pub fn present(
        &self,
        queue: vk::Queue,
        index: u32,
        wait_semaphore: vk::Semaphore,
    ) -> Result<bool, vk::Result> {
        let wait_semaphores = [wait_semaphore];
        let swapchains = [self.swapchain];
        let indices = [index];

        let present_info = vk::PresentInfoKHR::default()
            .wait_semaphores(&wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&indices);

        unsafe { self.loader.queue_present(queue, &present_info) }
    }

    /// Returns the color format of the swapchain images.
    #[inline]
    pub fn format(&self) -> vk::Format {
        self.surface_format.format
    }

    /// Returns the swapchain extent.
    #[inline]
    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Returns the number of swapchain images.
    #[inline]
    pub fn image_count(&self) -> usize {
        self.images.len()
    }

    /// Returns the image at `index`.
    #[inline]
    pub fn image(&self, index: usize) -> vk::Image {
        self.images[index]
    }

    /// Returns the color view of the image at `index`.
    #[inline]
    pub fn image_view(&self, index: usize) -> vk::ImageView {
        self.image_views[index]
    }

    fn destroy_views(&mut self) {
        for view in self.image_views.drain(..) {
            unsafe {
                self.device.handle().destroy_image_view(view, None);
            }
        }
        debug!("Destroyed swapchain image views");
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        self.destroy_views();
        if self.swapchain != vk::SwapchainKHR::null() {
            unsafe {
                self.loader.destroy_swapchain(self.swapchain, None);
            }
        }
        info!("Swapchain destroyed");
    }
}
