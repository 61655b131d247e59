// Command pool, buffers and per-frame recording

use ash::vk;

use super::error::{RhiResult, VkResultExt};
use super::pipeline::{full_scissor, full_viewport, DynamicState, GraphicsPipeline};
use super::VulkanDevice;

/// Pool on the graphics family; buffers are reset one at a time
pub fn create_command_pool(device: &VulkanDevice) -> RhiResult<vk::CommandPool> {
    let pool_info = vk::CommandPoolCreateInfo::builder()
        .queue_family_index(device.queue_families.graphics)
        .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

    unsafe { device.device.create_command_pool(&pool_info, None) }
        .context("Failed to create command pool")
}

/// Exactly `count` primary buffers, allocated once
pub fn allocate_command_buffers(
    device: &VulkanDevice,
    pool: vk::CommandPool,
    count: u32,
) -> RhiResult<Vec<vk::CommandBuffer>> {
    let alloc_info = vk::CommandBufferAllocateInfo::builder()
        .command_pool(pool)
        .level(vk::CommandBufferLevel::PRIMARY)
        .command_buffer_count(count);

    unsafe { device.device.allocate_command_buffers(&alloc_info) }
        .context("Failed to allocate command buffers")
}

/// Reset `cmd` and record the placeholder triangle into the framebuffer
/// of `image_index`.
pub fn record_command_buffer(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    graphics: &GraphicsPipeline,
    image_index: u32,
    clear_color: [f32; 4],
) -> RhiResult<()> {
    let extent = graphics.fixed.scissor.extent;
    let framebuffer = graphics.framebuffers[image_index as usize];

    let clear_values = [vk::ClearValue {
        color: vk::ClearColorValue {
            float32: clear_color,
        },
    }];

    unsafe {
        device
            .reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())
            .context("Failed to reset command buffer")?;

        let begin_info = vk::CommandBufferBeginInfo::builder();
        device
            .begin_command_buffer(cmd, &begin_info)
            .context("Failed to begin recording command buffer")?;

        let render_pass_info = vk::RenderPassBeginInfo::builder()
            .render_pass(graphics.render_pass)
            .framebuffer(framebuffer)
            .render_area(full_scissor(extent))
            .clear_values(&clear_values);

        device.cmd_begin_render_pass(cmd, &render_pass_info, vk::SubpassContents::INLINE);
        device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::GRAPHICS, graphics.pipeline);

        // Anything declared dynamic has no baked value and must be set here
        for state in &graphics.fixed.dynamic_states {
            match state {
                DynamicState::Viewport => {
                    device.cmd_set_viewport(cmd, 0, &[full_viewport(extent)]);
                }
                DynamicState::Scissor => {
                    device.cmd_set_scissor(cmd, 0, &[full_scissor(extent)]);
                }
                DynamicState::LineWidth => {
                    device.cmd_set_line_width(cmd, graphics.fixed.line_width);
                }
            }
        }

        // 3 vertices, 1 instance, positions come from gl_VertexIndex
        device.cmd_draw(cmd, 3, 1, 0, 0);

        device.cmd_end_render_pass(cmd);

        device
            .end_command_buffer(cmd)
            .context("Failed to record command buffer")?;
    }

    Ok(())
}
