// Synchronization primitives
//
// Fences, semaphores for GPU-CPU and GPU-GPU sync
// One set per frame in flight

use ash::vk;
use std::sync::Arc;

use super::error::{RhiError, RhiResult, VkResultExt};
use super::VulkanDevice;

/// Frame synchronization - one per frame in flight
pub struct FrameSync {
    /// Signaled by the presentation engine once the acquired image is free
    pub image_available: vk::Semaphore,
    /// Signaled when rendering finishes; presentation waits on it
    pub render_finished: vk::Semaphore,
    /// Signaled when the GPU retires this slot's submission
    pub in_flight_fence: vk::Fence,
    device: Arc<VulkanDevice>,
}

impl FrameSync {
    pub fn new(device: Arc<VulkanDevice>) -> RhiResult<Self> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Start signaled so the first wait on each slot returns immediately
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        let (image_available, render_finished, in_flight_fence) = unsafe {
            let vk_device = &device.device;

            let image_available = vk_device
                .create_semaphore(&semaphore_info, None)
                .context("Failed to create image-available semaphore")?;

            let render_finished = match vk_device.create_semaphore(&semaphore_info, None) {
                Ok(s) => s,
                Err(e) => {
                    vk_device.destroy_semaphore(image_available, None);
                    return Err(RhiError::backend(
                        "Failed to create render-finished semaphore",
                        e,
                    ));
                }
            };

            let in_flight_fence = match vk_device.create_fence(&fence_info, None) {
                Ok(f) => f,
                Err(e) => {
                    vk_device.destroy_semaphore(render_finished, None);
                    vk_device.destroy_semaphore(image_available, None);
                    return Err(RhiError::backend("Failed to create in-flight fence", e));
                }
            };

            (image_available, render_finished, in_flight_fence)
        };

        Ok(Self {
            image_available,
            render_finished,
            in_flight_fence,
            device,
        })
    }
}

impl Drop for FrameSync {
    fn drop(&mut self) {
        let device = &self.device.device;
        unsafe {
            device.destroy_semaphore(self.image_available, None);
            device.destroy_semaphore(self.render_finished, None);
            device.destroy_fence(self.in_flight_fence, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_objects_are_released_by_drop() {
        // Cleanup is tied to ownership, so there is no separate destroy call
        // that could run twice.
        assert!(std::mem::needs_drop::<FrameSync>());
    }
}
