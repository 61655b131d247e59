// Graphics pipeline creation and management
//
// The graphics pipeline defines how vertices are processed and rasterized.
// Fixed-function state lives in `FixedFunctionState`; the only knob exposed to
// configuration is which pieces of it are dynamic. Whatever is declared dynamic
// is wired into the create info and set again on every recorded frame.

use ash::vk;
use serde::Deserialize;
use std::sync::Arc;

use super::error::{RhiError, RhiResult, VkResultExt};
use super::shader::{create_shader_module, ShaderCode};
use super::{Swapchain, VulkanDevice};

/// Pipeline state that may be set at record time instead of baked in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DynamicState {
    Viewport,
    Scissor,
    LineWidth,
}

impl DynamicState {
    pub fn to_vk(self) -> vk::DynamicState {
        match self {
            DynamicState::Viewport => vk::DynamicState::VIEWPORT,
            DynamicState::Scissor => vk::DynamicState::SCISSOR,
            DynamicState::LineWidth => vk::DynamicState::LINE_WIDTH,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipelineConfig {
    pub dynamic_states: Vec<DynamicState>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dynamic_states: vec![DynamicState::Viewport, DynamicState::LineWidth],
        }
    }
}

impl PipelineConfig {
    /// Declared states in order, duplicates dropped
    pub fn resolved_dynamic_states(&self) -> Vec<DynamicState> {
        let mut states = Vec::with_capacity(self.dynamic_states.len());
        for &state in &self.dynamic_states {
            if !states.contains(&state) {
                states.push(state);
            }
        }
        states
    }
}

/// Hardcoded rasterization state for the placeholder triangle
#[derive(Debug, Clone)]
pub struct FixedFunctionState {
    pub topology: vk::PrimitiveTopology,
    pub viewport: vk::Viewport,
    pub scissor: vk::Rect2D,
    pub polygon_mode: vk::PolygonMode,
    pub cull_mode: vk::CullModeFlags,
    pub front_face: vk::FrontFace,
    pub line_width: f32,
    pub dynamic_states: Vec<DynamicState>,
}

impl FixedFunctionState {
    pub fn new(extent: vk::Extent2D, config: &PipelineConfig) -> Self {
        Self {
            topology: vk::PrimitiveTopology::TRIANGLE_LIST,
            viewport: full_viewport(extent),
            scissor: full_scissor(extent),
            polygon_mode: vk::PolygonMode::FILL,
            cull_mode: vk::CullModeFlags::BACK,
            front_face: vk::FrontFace::CLOCKWISE,
            line_width: 1.0,
            dynamic_states: config.resolved_dynamic_states(),
        }
    }

    /// Assemble the full create info on the stack and hand it to `f`.
    ///
    /// The create info points into locals, so it can't be returned.
    pub fn with_create_info<R>(
        &self,
        stages: &[vk::PipelineShaderStageCreateInfo],
        layout: vk::PipelineLayout,
        render_pass: vk::RenderPass,
        f: impl FnOnce(&vk::GraphicsPipelineCreateInfo) -> R,
    ) -> R {
        // No vertex buffers: the vertex shader generates positions
        let vertex_input_info = vk::PipelineVertexInputStateCreateInfo::builder();

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(self.topology)
            .primitive_restart_enable(false);

        let viewports = [self.viewport];
        let scissors = [self.scissor];
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewports(&viewports)
            .scissors(&scissors);

        let rasterizer = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(false)
            .rasterizer_discard_enable(false)
            .polygon_mode(self.polygon_mode)
            .line_width(self.line_width)
            .cull_mode(self.cull_mode)
            .front_face(self.front_face)
            .depth_bias_enable(false);

        let multisampling = vk::PipelineMultisampleStateCreateInfo::builder()
            .sample_shading_enable(false)
            .rasterization_samples(vk::SampleCountFlags::TYPE_1)
            .min_sample_shading(1.0);

        // Color blending (no blending, opaque)
        let color_blend_attachment = vk::PipelineColorBlendAttachmentState::builder()
            .color_write_mask(vk::ColorComponentFlags::RGBA)
            .blend_enable(false)
            .src_color_blend_factor(vk::BlendFactor::ONE)
            .dst_color_blend_factor(vk::BlendFactor::ZERO)
            .color_blend_op(vk::BlendOp::ADD)
            .src_alpha_blend_factor(vk::BlendFactor::ONE)
            .dst_alpha_blend_factor(vk::BlendFactor::ZERO)
            .alpha_blend_op(vk::BlendOp::ADD)
            .build();

        let color_blend_attachments = [color_blend_attachment];
        let color_blending = vk::PipelineColorBlendStateCreateInfo::builder()
            .logic_op_enable(false)
            .logic_op(vk::LogicOp::COPY)
            .attachments(&color_blend_attachments);

        let dynamic_states: Vec<vk::DynamicState> =
            self.dynamic_states.iter().map(|s| s.to_vk()).collect();
        let dynamic_state =
            vk::PipelineDynamicStateCreateInfo::builder().dynamic_states(&dynamic_states);

        let mut pipeline_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(stages)
            .vertex_input_state(&vertex_input_info)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterizer)
            .multisample_state(&multisampling)
            .color_blend_state(&color_blending)
            .layout(layout)
            .render_pass(render_pass)
            .subpass(0)
            .base_pipeline_index(-1);
        if !dynamic_states.is_empty() {
            pipeline_info = pipeline_info.dynamic_state(&dynamic_state);
        }

        f(&*pipeline_info)
    }
}

pub fn full_viewport(extent: vk::Extent2D) -> vk::Viewport {
    vk::Viewport {
        x: 0.0,
        y: 0.0,
        width: extent.width as f32,
        height: extent.height as f32,
        min_depth: 0.0,
        max_depth: 1.0,
    }
}

pub fn full_scissor(extent: vk::Extent2D) -> vk::Rect2D {
    vk::Rect2D {
        offset: vk::Offset2D { x: 0, y: 0 },
        extent,
    }
}

/// Single color attachment render pass that ends ready for presentation
pub fn create_render_pass(device: &VulkanDevice, format: vk::Format) -> RhiResult<vk::RenderPass> {
    with_render_pass_info(format, |info| unsafe {
        device.device.create_render_pass(info, None)
    })
    .context("Failed to create render pass")
}

/// Assemble the render pass create info for `format` and hand it to `f`
pub fn with_render_pass_info<R>(
    format: vk::Format,
    f: impl FnOnce(&vk::RenderPassCreateInfo) -> R,
) -> R {
    // Color attachment (the swapchain image)
    let color_attachment = vk::AttachmentDescription::builder()
        .format(format)
        .samples(vk::SampleCountFlags::TYPE_1)
        .load_op(vk::AttachmentLoadOp::CLEAR)
        .store_op(vk::AttachmentStoreOp::STORE)
        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
        .initial_layout(vk::ImageLayout::UNDEFINED)
        .final_layout(vk::ImageLayout::PRESENT_SRC_KHR)
        .build();

    let color_attachment_ref = vk::AttachmentReference::builder()
        .attachment(0)
        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
        .build();

    let color_attachments = &[color_attachment_ref];
    let subpass = vk::SubpassDescription::builder()
        .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
        .color_attachments(color_attachments)
        .build();

    // The layout transition must not start before the acquire semaphore
    // (waited on at COLOR_ATTACHMENT_OUTPUT) has been signaled
    let dependency = vk::SubpassDependency::builder()
        .src_subpass(vk::SUBPASS_EXTERNAL)
        .dst_subpass(0)
        .src_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .src_access_mask(vk::AccessFlags::empty())
        .dst_stage_mask(vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
        .dst_access_mask(vk::AccessFlags::COLOR_ATTACHMENT_WRITE)
        .build();

    let attachments = &[color_attachment];
    let subpasses = &[subpass];
    let dependencies = &[dependency];

    let render_pass_info = vk::RenderPassCreateInfo::builder()
        .attachments(attachments)
        .subpasses(subpasses)
        .dependencies(dependencies);

    f(&*render_pass_info)
}

/// Create framebuffers for each swapchain image
pub fn create_framebuffers(
    device: &VulkanDevice,
    image_views: &[vk::ImageView],
    render_pass: vk::RenderPass,
    extent: vk::Extent2D,
) -> RhiResult<Vec<vk::Framebuffer>> {
    let mut framebuffers = Vec::with_capacity(image_views.len());

    for &image_view in image_views {
        let attachments = &[image_view];
        let framebuffer_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(attachments)
            .width(extent.width)
            .height(extent.height)
            .layers(1);

        match unsafe { device.device.create_framebuffer(&framebuffer_info, None) } {
            Ok(framebuffer) => framebuffers.push(framebuffer),
            Err(e) => {
                for framebuffer in framebuffers {
                    unsafe { device.device.destroy_framebuffer(framebuffer, None) };
                }
                return Err(RhiError::backend("Failed to create framebuffer", e));
            }
        }
    }

    Ok(framebuffers)
}

/// Build pipeline + (empty) layout from two SPIR-V programs.
///
/// Shader modules only live for the duration of this call. On failure
/// nothing created here is left behind.
pub fn create_graphics_pipeline(
    device: &VulkanDevice,
    render_pass: vk::RenderPass,
    fixed: &FixedFunctionState,
    shaders: &ShaderCode,
) -> RhiResult<(vk::Pipeline, vk::PipelineLayout)> {
    let vert_module = create_shader_module(device, &shaders.vertex)?;
    let frag_module = match create_shader_module(device, &shaders.fragment) {
        Ok(module) => module,
        Err(e) => {
            unsafe { device.device.destroy_shader_module(vert_module, None) };
            return Err(e);
        }
    };

    let result = build_pipeline(device, render_pass, fixed, vert_module, frag_module);

    unsafe {
        device.device.destroy_shader_module(frag_module, None);
        device.device.destroy_shader_module(vert_module, None);
    }

    result
}

fn build_pipeline(
    device: &VulkanDevice,
    render_pass: vk::RenderPass,
    fixed: &FixedFunctionState,
    vert_module: vk::ShaderModule,
    frag_module: vk::ShaderModule,
) -> RhiResult<(vk::Pipeline, vk::PipelineLayout)> {
    let entry_point = c"main";

    let vert_stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::VERTEX)
        .module(vert_module)
        .name(entry_point)
        .build();

    let frag_stage = vk::PipelineShaderStageCreateInfo::builder()
        .stage(vk::ShaderStageFlags::FRAGMENT)
        .module(frag_module)
        .name(entry_point)
        .build();

    let shader_stages = [vert_stage, frag_stage];

    // No descriptor sets or push constants yet
    let layout_info = vk::PipelineLayoutCreateInfo::builder();
    let pipeline_layout = unsafe { device.device.create_pipeline_layout(&layout_info, None) }
        .context("Failed to create pipeline layout")?;

    let pipelines = fixed.with_create_info(&shader_stages, pipeline_layout, render_pass, |info| unsafe {
        device
            .device
            .create_graphics_pipelines(vk::PipelineCache::null(), std::slice::from_ref(info), None)
    });

    match pipelines {
        Ok(pipelines) => Ok((pipelines[0], pipeline_layout)),
        Err((partial, e)) => {
            unsafe {
                for pipeline in partial {
                    if pipeline != vk::Pipeline::null() {
                        device.device.destroy_pipeline(pipeline, None);
                    }
                }
                device.device.destroy_pipeline_layout(pipeline_layout, None);
            }
            Err(RhiError::backend("Failed to create graphics pipeline", e))
        }
    }
}

/// Render pass, pipeline and framebuffers for one swapchain lifetime
pub struct GraphicsPipeline {
    pub render_pass: vk::RenderPass,
    pub pipeline: vk::Pipeline,
    pub layout: vk::PipelineLayout,
    pub framebuffers: Vec<vk::Framebuffer>,
    pub fixed: FixedFunctionState,
    device: Arc<VulkanDevice>,
}

impl GraphicsPipeline {
    pub fn new(
        device: Arc<VulkanDevice>,
        swapchain: &Swapchain,
        shaders: &ShaderCode,
        config: &PipelineConfig,
    ) -> RhiResult<Self> {
        let fixed = FixedFunctionState::new(swapchain.extent, config);
        log::info!("Creating graphics pipeline (dynamic: {:?})", fixed.dynamic_states);

        let render_pass = create_render_pass(&device, swapchain.format)?;

        // Fill in as we go; Drop skips null handles
        let mut this = Self {
            render_pass,
            pipeline: vk::Pipeline::null(),
            layout: vk::PipelineLayout::null(),
            framebuffers: Vec::new(),
            fixed,
            device,
        };

        let (pipeline, layout) =
            create_graphics_pipeline(&this.device, render_pass, &this.fixed, shaders)?;
        this.pipeline = pipeline;
        this.layout = layout;

        this.framebuffers = create_framebuffers(
            &this.device,
            &swapchain.image_views,
            render_pass,
            swapchain.extent,
        )?;

        Ok(this)
    }

    pub fn is_dynamic(&self, state: DynamicState) -> bool {
        self.fixed.dynamic_states.contains(&state)
    }
}

impl Drop for GraphicsPipeline {
    fn drop(&mut self) {
        let device = &self.device.device;
        unsafe {
            if self.pipeline != vk::Pipeline::null() {
                device.destroy_pipeline(self.pipeline, None);
            }
            if self.layout != vk::PipelineLayout::null() {
                device.destroy_pipeline_layout(self.layout, None);
            }
            for &framebuffer in &self.framebuffers {
                device.destroy_framebuffer(framebuffer, None);
            }
            device.destroy_render_pass(self.render_pass, None);
        }
    }
}
