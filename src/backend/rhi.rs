// VulkanRhi - owns every GPU object and drives the frame loop
//
// FRAME TIMELINE (slot f), see frame::run_frame:
// ┌──────────────────────────────────────────────────────────────────────┐
// │ wait fence[f] ─> acquire ─> record ─> reset fence[f] ─> submit ─>    │
// │ present ─> f = (f + 1) % MAX_FRAMES_IN_FLIGHT                        │
// └──────────────────────────────────────────────────────────────────────┘
//
// The control thread only blocks at the fence wait. The GPU side is ordered
// by the two semaphores: the submit waits for image_available[f] at
// COLOR_ATTACHMENT_OUTPUT and signals render_finished[f], which gates present.

use ash::{prelude::VkResult, vk, Entry};
use std::ffi::CStr;
use std::sync::Arc;

use super::commands::record_command_buffer;
use super::error::{RhiResult, VkResultExt};
use super::frame::{run_frame, FrameOps, FrameResources, FrameSlots, FrameStatus};
use super::pipeline::{GraphicsPipeline, PipelineConfig};
use super::shader::ShaderCode;
use super::swapchain::SwapchainStatus;
use super::{Swapchain, VulkanDevice};
use crate::config::RhiConfig;

/// Everything tied to one swapchain lifetime.
/// Field order is drop order: pipeline objects before the swapchain.
struct RenderTargets {
    graphics: GraphicsPipeline,
    swapchain: Swapchain,
}

impl RenderTargets {
    fn new(
        device: &Arc<VulkanDevice>,
        extent: vk::Extent2D,
        shaders: &ShaderCode,
        config: &PipelineConfig,
    ) -> RhiResult<Self> {
        let swapchain = Swapchain::new(device.clone(), extent.width, extent.height)?;
        let graphics = GraphicsPipeline::new(device.clone(), &swapchain, shaders, config)?;
        Ok(Self {
            graphics,
            swapchain,
        })
    }
}

pub struct VulkanRhi {
    // Drop order matters: frame objects, then swapchain dependents, then the
    // device (which takes surface, debug messenger and instance with it)
    frames: FrameResources,
    slots: FrameSlots,
    targets: Option<RenderTargets>,
    shaders: ShaderCode,
    config: RhiConfig,
    device: Arc<VulkanDevice>,
}

impl VulkanRhi {
    /// Run the whole startup sequence: device, swapchain, pipeline, frame pool.
    ///
    /// `create_surface` is invoked once, right after the instance is created.
    /// A zero-sized extent skips swapchain creation until `recreate_swapchain`.
    pub fn new<F>(
        config: RhiConfig,
        window_extensions: &[&CStr],
        create_surface: F,
        extent: vk::Extent2D,
        shaders: ShaderCode,
    ) -> RhiResult<Self>
    where
        F: FnOnce(&Entry, &ash::Instance) -> VkResult<vk::SurfaceKHR>,
    {
        log::info!("Initializing Vulkan...");

        let device = Arc::new(VulkanDevice::new(&config, window_extensions, create_surface)?);

        let targets = if extent.width == 0 || extent.height == 0 {
            log::info!("Zero-sized surface, deferring swapchain creation");
            None
        } else {
            Some(RenderTargets::new(&device, extent, &shaders, &config.pipeline)?)
        };

        let frames = FrameResources::new(device.clone())?;

        log::info!("Vulkan initialized successfully!");
        Ok(Self {
            frames,
            slots: FrameSlots::default(),
            targets,
            shaders,
            config,
            device,
        })
    }

    pub fn device(&self) -> &Arc<VulkanDevice> {
        &self.device
    }

    pub fn config(&self) -> &RhiConfig {
        &self.config
    }

    /// Swapchain extent, or `None` while there is no swapchain
    pub fn extent(&self) -> Option<vk::Extent2D> {
        self.targets.as_ref().map(|t| t.swapchain.extent)
    }

    pub fn swapchain_image_count(&self) -> usize {
        self.targets
            .as_ref()
            .map_or(0, |t| t.swapchain.images.len())
    }

    /// In-flight slot the next `draw_frame` will use
    pub fn current_frame(&self) -> usize {
        self.slots.current()
    }

    /// Render and present one frame.
    ///
    /// Returns `OutOfDate` without submitting anything when the swapchain can
    /// no longer be used; the caller should `recreate_swapchain` and try again.
    pub fn draw_frame(&mut self) -> RhiResult<FrameStatus> {
        let Some(targets) = self.targets.as_ref() else {
            return Ok(FrameStatus::Skipped);
        };

        let mut ops = VulkanFrameOps {
            device: &self.device,
            frames: &self.frames,
            targets,
            clear_color: self.config.clear_color,
        };
        run_frame(&mut ops, &mut self.slots)
    }

    /// Tear down and rebuild everything that depends on the swapchain.
    /// A zero-sized request leaves no swapchain (frames are skipped).
    pub fn recreate_swapchain(&mut self, width: u32, height: u32) -> RhiResult<()> {
        self.device.wait_idle()?;

        self.targets = None;

        if width == 0 || height == 0 {
            log::debug!("Surface is zero-sized, not recreating swapchain");
            return Ok(());
        }

        let extent = vk::Extent2D { width, height };
        self.targets = Some(RenderTargets::new(
            &self.device,
            extent,
            &self.shaders,
            &self.config.pipeline,
        )?);

        Ok(())
    }

    /// Block until all submitted work has finished
    pub fn wait_idle(&self) -> RhiResult<()> {
        self.device.wait_idle()
    }
}

impl Drop for VulkanRhi {
    fn drop(&mut self) {
        log::info!("Cleaning up Vulkan resources...");

        // Wait for GPU to finish before destroying anything; the fields then
        // drop in declaration order
        let _ = self.device.wait_idle();
    }
}

/// Vulkan calls behind each step of `run_frame`
struct VulkanFrameOps<'a> {
    device: &'a VulkanDevice,
    frames: &'a FrameResources,
    targets: &'a RenderTargets,
    clear_color: [f32; 4],
}

impl FrameOps for VulkanFrameOps<'_> {
    fn wait_fence(&mut self, slot: usize) -> RhiResult<()> {
        let (_, sync) = self.frames.slot(slot);
        unsafe {
            self.device
                .device
                .wait_for_fences(&[sync.in_flight_fence], true, u64::MAX)
        }
        .context("Failed to wait for in-flight fence")
    }

    fn acquire(&mut self, slot: usize) -> RhiResult<(u32, SwapchainStatus)> {
        let (_, sync) = self.frames.slot(slot);
        self.targets
            .swapchain
            .acquire_next_image(u64::MAX, sync.image_available)
    }

    fn record(&mut self, slot: usize, image_index: u32) -> RhiResult<()> {
        let (cmd, _) = self.frames.slot(slot);
        record_command_buffer(
            &self.device.device,
            cmd,
            &self.targets.graphics,
            image_index,
            self.clear_color,
        )
    }

    fn reset_fence(&mut self, slot: usize) -> RhiResult<()> {
        let (_, sync) = self.frames.slot(slot);
        unsafe { self.device.device.reset_fences(&[sync.in_flight_fence]) }
            .context("Failed to reset in-flight fence")
    }

    fn submit(&mut self, slot: usize) -> RhiResult<()> {
        let (cmd, sync) = self.frames.slot(slot);

        let wait_semaphores = [sync.image_available];
        let wait_stages = [vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT];
        let command_buffers = [cmd];
        let signal_semaphores = [sync.render_finished];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.device.queue_submit(
                self.device.graphics_queue,
                &[submit_info.build()],
                sync.in_flight_fence,
            )
        }
        .context("Failed to submit draw command buffer")
    }

    fn present(&mut self, slot: usize, image_index: u32) -> RhiResult<SwapchainStatus> {
        let (_, sync) = self.frames.slot(slot);
        self.targets.swapchain.present(
            self.device.present_queue,
            image_index,
            &[sync.render_finished],
        )
    }
}
