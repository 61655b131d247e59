// Swapchain - Window presentation
//
// Manages the chain of images we render to and present to the screen.
// Format, extent and image count are fixed at creation; a resize means
// building a new swapchain (see VulkanRhi::recreate_swapchain).

use ash::vk;
use std::sync::Arc;

use super::error::{RhiError, RhiResult, VkResultExt};
use super::selector::{ResolvedQueueFamilies, SurfaceSupport};
use super::VulkanDevice;

/// Outcome of acquire/present that the frame loop has to react to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwapchainStatus {
    Optimal,
    /// Still usable, but no longer matches the surface exactly
    Suboptimal,
    /// Unusable until recreated
    OutOfDate,
}

/// Image sharing between the graphics and present queue families
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SharingConfig {
    pub mode: vk::SharingMode,
    pub queue_family_indices: Vec<u32>,
}

impl SharingConfig {
    /// CONCURRENT when the families differ, so no ownership transfer is needed
    pub fn for_families(families: ResolvedQueueFamilies) -> Self {
        if families.graphics != families.present {
            Self {
                mode: vk::SharingMode::CONCURRENT,
                queue_family_indices: vec![families.graphics, families.present],
            }
        } else {
            Self {
                mode: vk::SharingMode::EXCLUSIVE,
                queue_family_indices: Vec::new(),
            }
        }
    }
}

/// B8G8R8A8_SRGB with sRGB non-linear color space, else whatever comes first
pub fn choose_swap_surface_format(formats: &[vk::SurfaceFormatKHR]) -> Option<vk::SurfaceFormatKHR> {
    formats
        .iter()
        .find(|f| {
            f.format == vk::Format::B8G8R8A8_SRGB
                && f.color_space == vk::ColorSpaceKHR::SRGB_NONLINEAR
        })
        .or_else(|| formats.first())
        .copied()
}

// MAILBOX: No vsync tearing, lowest latency
// FIFO: Vsync enabled, guaranteed available
pub fn choose_swap_present_mode(present_modes: &[vk::PresentModeKHR]) -> vk::PresentModeKHR {
    present_modes
        .iter()
        .copied()
        .find(|&mode| mode == vk::PresentModeKHR::MAILBOX)
        .unwrap_or(vk::PresentModeKHR::FIFO)
}

/// `u32::MAX` in current_extent means the surface lets us pick the size
pub fn choose_swap_extent(
    caps: &vk::SurfaceCapabilitiesKHR,
    width: u32,
    height: u32,
) -> vk::Extent2D {
    if caps.current_extent.width != u32::MAX {
        caps.current_extent
    } else {
        vk::Extent2D {
            width: width.clamp(caps.min_image_extent.width, caps.max_image_extent.width),
            height: height.clamp(caps.min_image_extent.height, caps.max_image_extent.height),
        }
    }
}

/// One more than the minimum, capped by the maximum (0 = no maximum)
pub fn choose_image_count(caps: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let image_count = caps.min_image_count + 1;
    if caps.max_image_count > 0 && image_count > caps.max_image_count {
        caps.max_image_count
    } else {
        image_count
    }
}

pub struct Swapchain {
    pub swapchain: vk::SwapchainKHR,
    pub swapchain_loader: ash::extensions::khr::Swapchain,
    pub images: Vec<vk::Image>,
    pub image_views: Vec<vk::ImageView>,
    pub format: vk::Format,
    pub extent: vk::Extent2D,
    pub present_mode: vk::PresentModeKHR,
    device: Arc<VulkanDevice>,
}

impl Swapchain {
    pub fn new(device: Arc<VulkanDevice>, width: u32, height: u32) -> RhiResult<Self> {
        log::info!("Creating swapchain: {}x{}", width, height);

        let support: SurfaceSupport = device.surface_support()?;

        let surface_format = choose_swap_surface_format(&support.formats).ok_or_else(|| {
            RhiError::backend("Surface reports no formats", vk::Result::ERROR_FORMAT_NOT_SUPPORTED)
        })?;
        let present_mode = choose_swap_present_mode(&support.present_modes);
        let extent = choose_swap_extent(&support.capabilities, width, height);
        let image_count = choose_image_count(&support.capabilities);
        let sharing = SharingConfig::for_families(device.queue_families);

        log::info!(
            "Swapchain config: {:?}/{:?}, {:?}, {}x{}, {} images, {:?}",
            surface_format.format,
            surface_format.color_space,
            present_mode,
            extent.width,
            extent.height,
            image_count,
            sharing.mode
        );

        let swapchain_loader =
            ash::extensions::khr::Swapchain::new(&device.instance, &device.device);

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(device.surface)
            .min_image_count(image_count)
            .image_format(surface_format.format)
            .image_color_space(surface_format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .image_sharing_mode(sharing.mode)
            .queue_family_indices(&sharing.queue_family_indices)
            .pre_transform(support.capabilities.current_transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let swapchain = unsafe { swapchain_loader.create_swapchain(&create_info, None) }
            .context("Failed to create swapchain")?;

        let images = match unsafe { swapchain_loader.get_swapchain_images(swapchain) } {
            Ok(images) => images,
            Err(e) => {
                unsafe { swapchain_loader.destroy_swapchain(swapchain, None) };
                return Err(RhiError::backend(
                    "Failed to get swapchain images",
                    e,
                ));
            }
        };

        log::info!("Created swapchain with {} images", images.len());

        // Construct first so Drop cleans up if a view fails part-way
        let mut this = Self {
            swapchain,
            swapchain_loader,
            images,
            image_views: Vec::new(),
            format: surface_format.format,
            extent,
            present_mode,
            device,
        };
        this.create_image_views()?;

        Ok(this)
    }

    fn create_image_views(&mut self) -> RhiResult<()> {
        self.image_views.reserve(self.images.len());

        for &image in &self.images {
            let create_info = vk::ImageViewCreateInfo::builder()
                .image(image)
                .view_type(vk::ImageViewType::TYPE_2D)
                .format(self.format)
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

            let view = unsafe { self.device.device.create_image_view(&create_info, None) }
                .context("Failed to create image view")?;
            self.image_views.push(view);
        }

        Ok(())
    }

    /// Acquire next image for rendering.
    ///
    /// `semaphore` is signaled once the image is actually free to write.
    pub fn acquire_next_image(
        &self,
        timeout: u64,
        semaphore: vk::Semaphore,
    ) -> RhiResult<(u32, SwapchainStatus)> {
        let result = unsafe {
            self.swapchain_loader.acquire_next_image(
                self.swapchain,
                timeout,
                semaphore,
                vk::Fence::null(),
            )
        };

        match result {
            Ok((index, false)) => Ok((index, SwapchainStatus::Optimal)),
            Ok((index, true)) => Ok((index, SwapchainStatus::Suboptimal)),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok((0, SwapchainStatus::OutOfDate)),
            Err(e) => Err(RhiError::backend(
                "Failed to acquire swapchain image",
                e,
            )),
        }
    }

    /// Present rendered image to screen
    pub fn present(
        &self,
        queue: vk::Queue,
        image_index: u32,
        wait_semaphores: &[vk::Semaphore],
    ) -> RhiResult<SwapchainStatus> {
        let swapchains = [self.swapchain];
        let image_indices = [image_index];

        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(wait_semaphores)
            .swapchains(&swapchains)
            .image_indices(&image_indices);

        let result = unsafe { self.swapchain_loader.queue_present(queue, &present_info) };

        match result {
            Ok(false) => Ok(SwapchainStatus::Optimal),
            Ok(true) => Ok(SwapchainStatus::Suboptimal),
            Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => Ok(SwapchainStatus::OutOfDate),
            Err(e) => Err(RhiError::backend(
                "Failed to present swapchain image",
                e,
            )),
        }
    }
}

impl Drop for Swapchain {
    fn drop(&mut self) {
        unsafe {
            for &view in &self.image_views {
                self.device.device.destroy_image_view(view, None);
            }
            self.swapchain_loader.destroy_swapchain(self.swapchain, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fmt(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    fn pair(format: Option<vk::SurfaceFormatKHR>) -> Option<(vk::Format, vk::ColorSpaceKHR)> {
        format.map(|f| (f.format, f.color_space))
    }

    fn flexible_caps() -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            current_extent: vk::Extent2D {
                width: u32::MAX,
                height: u32::MAX,
            },
            min_image_extent: vk::Extent2D {
                width: 64,
                height: 32,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 2048,
            },
            ..Default::default()
        }
    }

    #[test]
    fn prefers_bgra_srgb_anywhere_in_list() {
        let wanted = fmt(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR);
        let formats = [
            fmt(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            fmt(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            wanted,
        ];
        assert_eq!(pair(choose_swap_surface_format(&formats)), pair(Some(wanted)));
    }

    #[test]
    fn falls_back_to_first_format() {
        let formats = [
            fmt(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::EXTENDED_SRGB_LINEAR_EXT),
            // right format, wrong color space
            fmt(vk::Format::B8G8R8A8_SRGB, vk::ColorSpaceKHR::DISPLAY_P3_NONLINEAR_EXT),
        ];
        assert_eq!(pair(choose_swap_surface_format(&formats)), pair(Some(formats[0])));
        assert!(choose_swap_surface_format(&[]).is_none());
    }

    #[test]
    fn present_mode_is_mailbox_or_fifo() {
        let modes = [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_swap_present_mode(&modes), vk::PresentModeKHR::MAILBOX);

        let modes = [vk::PresentModeKHR::IMMEDIATE, vk::PresentModeKHR::FIFO_RELAXED];
        assert_eq!(choose_swap_present_mode(&modes), vk::PresentModeKHR::FIFO);
    }

    #[test]
    fn flexible_extent_keeps_in_range_request() {
        let caps = flexible_caps();
        let extent = choose_swap_extent(&caps, 1280, 720);
        assert_eq!((extent.width, extent.height), (1280, 720));

        let extent = choose_swap_extent(&caps, 64, 2048);
        assert_eq!((extent.width, extent.height), (64, 2048));
    }

    #[test]
    fn flexible_extent_clamps_out_of_range_request() {
        let caps = flexible_caps();
        let extent = choose_swap_extent(&caps, 10, 9000);
        assert_eq!((extent.width, extent.height), (64, 2048));
    }

    #[test]
    fn fixed_extent_is_used_verbatim() {
        let caps = vk::SurfaceCapabilitiesKHR {
            current_extent: vk::Extent2D {
                width: 800,
                height: 600,
            },
            ..flexible_caps()
        };
        let extent = choose_swap_extent(&caps, 1920, 1080);
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn image_count_is_min_plus_one_capped_by_max() {
        let caps = flexible_caps();
        assert_eq!(choose_image_count(&caps), 3);

        let capped = vk::SurfaceCapabilitiesKHR {
            max_image_count: 2,
            ..caps
        };
        assert_eq!(choose_image_count(&capped), 2);
    }

    #[test]
    fn sharing_mode_follows_queue_families() {
        let same = SharingConfig::for_families(ResolvedQueueFamilies {
            graphics: 0,
            present: 0,
        });
        assert_eq!(same.mode, vk::SharingMode::EXCLUSIVE);
        assert!(same.queue_family_indices.is_empty());

        let split = SharingConfig::for_families(ResolvedQueueFamilies {
            graphics: 0,
            present: 2,
        });
        assert_eq!(split.mode, vk::SharingMode::CONCURRENT);
        assert_eq!(split.queue_family_indices, vec![0, 2]);
    }
}
