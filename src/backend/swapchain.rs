// Swapchain - Window presentation
//
// Owns the presentable images' views (the images belong to the surface),
// the chosen format/extent and the acquire/present protocol.
// FIFO only: tear-free and always supported. No recreation: a stale surface
// is reported to the caller as a transient error.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;
use crate::error::RenderError;

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub extent: vk::Extent2D,
    device: Arc<VulkanDevice>,
}

/// `min_image_count + 1`, clamped when the surface reports a maximum.
pub fn desired_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = caps.min_image_count + 1;
    if caps.max_image_count > 0 {
        count.min(caps.max_image_count)
    } else {
        count
    }
}

/// Presentable images are written by the compositor's blit.
pub const SWAPCHAIN_USAGE: vk::ImageUsageFlags = vk::ImageUsageFlags::from_raw(
    vk::ImageUsageFlags::COLOR_ATTACHMENT.as_raw() | vk::ImageUsageFlags::TRANSFER_DST.as_raw(),
);

/// Fail unless the surface allows every usage the frame needs.
pub fn check_usage(caps: &vk::SurfaceCapabilitiesKHR) -> Result<()> {
    anyhow::ensure!(
        caps.supported_usage_flags.contains(SWAPCHAIN_USAGE),
        "Surface does not support {:?} swapchain images (supports {:?})",
        SWAPCHAIN_USAGE,
        caps.supported_usage_flags
    );
    Ok(())
}

/// The surface's current extent, or the window size clamped to the surface
/// limits when the surface leaves it to us.
pub fn choose_extent(caps: &vk::SurfaceCapabilitiesKHR, width: u32, height: u32) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

impl Swapchain {
    pub fn new(device: Arc<VulkanDevice>, width: u32, height: u32) -> Result<Self> {
        let surface_loader = &device.caps.surface;

        // Query surface capabilities
        let surface_caps = unsafe {
            surface_loader.get_physical_device_surface_capabilities(device.physical_device, device.surface)
        }?;
        check_usage(&surface_caps)?;

        // Query supported formats
        let formats = unsafe {
            surface_loader.get_physical_device_surface_formats(device.physical_device, device.surface)
        }?;

        // First reported format; the blit converts whatever we render into it
        let surface_format = *formats.first().context("Surface reports no formats")?;

        let extent = choose_extent(&surface_caps, width, height);
        let image_count = desired_image_count(&surface_caps);

        log::info!(
            "Creating swapchain: {}x{} {:?}, {} images, FIFO",
            extent.width,
            extent.height,
            surface_format.format,
            image_count
        );

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(device.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(SWAPCHAIN_USAGE)
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(surface_caps.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(vk::PresentModeKHR::FIFO)
            .clipped(true);

        let swapchain = unsafe { device.caps.swapchain.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;

        // Get swapchain images
        let images = match unsafe { device.caps.swapchain.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { device.caps.swapchain.destroy_swapchain(swapchain, None) };
                return Err(e).context("Failed to query swapchain images");
            }
        };

        log::info!("Created swapchain with {} images", images.len());

        // From here on a failure drops `this`, which destroys the views built
        // so far and the swapchain
        let mut this = Self {
            swapchain,
            images,
            image_views: Vec::new(),
            extent,
            device,
        };

        for &image in &this.images {
            let create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(surface_format.format)
                .components(vk::ComponentMapping {
                    r: vk::ComponentSwizzle::IDENTITY,
                    g: vk::ComponentSwizzle::IDENTITY,
                    b: vk::ComponentSwizzle::IDENTITY,
                    a: vk::ComponentSwizzle::IDENTITY,
                })
                .subresource_range(vk::ImageSubresourceRange {
                    aspect_mask: vk::ImageAspectFlags::COLOR,
                    base_mip_level: 0,
                    level_count: 1,
                    base_array_layer: 0,
                    layer_count: 1,
                });

            let view = unsafe { this.device.device.create_image_view(&create_info, None) }
                .context("Failed to create image view")?;
            this.image_views.push(view);
        }

        Ok(this)
    }

    /// Acquire the next image, signaling `semaphore` once it is usable.
    ///
    /// Blocks without a timeout. A suboptimal image counts as a stale surface.
    pub fn acquire(&self, semaphore: vk::Semaphore) -> Result<u32, RenderError> {
        let result = unsafe {
            self.device.caps.swapchain.acquire_next_image(
                self.swapchain,
                u64::MAX,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, false)) => Ok(index),
            Ok((_, true)) => Err(RenderError::TransientSurface(vk::Result::SUBOPTIMAL_KHR)),
            Err(e) => Err(e.into()),
        }
    }

    /// Queue `image_index` for presentation once `wait_semaphores` signal.
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> Result<(), RenderError> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.device.caps.swapchain.queue_present(queue, &present_info) };

        match result {
            Ok(false) => Ok(()),
            Ok(true) => Err(RenderError::TransientSurface(vk::Result::SUBOPTIMAL_KHR)),
            Err(e) => Err(e.into()),
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            self.device.caps.swapchain.destroy_swapchain(self.swapchain, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: 500,
                height: 500,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    #[test]
    fn one_more_than_the_minimum() {
        assert_eq!(desired_image_count(&caps(2, 0)), 3);
        assert_eq!(desired_image_count(&caps(2, 8)), 3);
    }

    #[test]
    fn image_count_respects_surface_maximum() {
        assert_eq!(desired_image_count(&caps(3, 3)), 3);
    }

    #[test]
    fn surface_must_allow_blit_targets() {
        let mut caps = caps(2, 0);
        caps.supported_usage_flags = vk::ImageUsageFlags::COLOR_ATTACHMENT;
        let err = check_usage(&caps).unwrap_err();
        assert!(err.to_string().contains("TRANSFER_DST"));

        caps.supported_usage_flags |= vk::ImageUsageFlags::TRANSFER_DST;
        assert!(check_usage(&caps).is_ok());
    }

    #[test]
    fn current_extent_wins_when_defined() {
        let extent = choose_extent(&caps(2, 0), 800, 600);
        assert_eq!(extent, vk::Extent2D { width: 500, height: 500 });
    }

    #[test]
    fn undefined_extent_falls_back_to_window_size() {
        let mut caps = caps(2, 0);
        caps.current_extent = vk::Extent2D {
            width: u32::MAX,
            height: u32::MAX,
        };
        assert_eq!(
            choose_extent(&caps, 500, 9000),
            vk::Extent2D { width: 500, height: 4096 }
        );
    }
}
