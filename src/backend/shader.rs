// Shader module loading
//
// Vulkan consumes SPIR-V as 32-bit words. Bytes coming from the asset side
// are decoded once into owned words (alignment-safe) and kept around, because
// the pipeline is rebuilt whenever the swapchain is.

use ash::vk;
use std::io::Cursor;

use super::error::{RhiError, RhiResult, VkResultExt};
use super::VulkanDevice;

/// Decoded SPIR-V for the two programmable stages
#[derive(Debug, Clone)]
pub struct ShaderCode {
    pub vertex: Vec<u32>,
    pub fragment: Vec<u32>,
}

impl ShaderCode {
    pub fn from_bytes(vertex: &[u8], fragment: &[u8]) -> RhiResult<Self> {
        Ok(Self {
            vertex: decode_spirv(vertex)?,
            fragment: decode_spirv(fragment)?,
        })
    }
}

/// Split raw bytes into SPIR-V words. Only the length and magic number are
/// checked here; the driver validates the rest at module creation.
pub fn decode_spirv(bytes: &[u8]) -> RhiResult<Vec<u32>> {
    ash::util::read_spv(&mut Cursor::new(bytes)).map_err(RhiError::InvalidShader)
}

pub fn create_shader_module(device: &VulkanDevice, code: &[u32]) -> RhiResult<vk::ShaderModule> {
    let create_info = vk::ShaderModuleCreateInfo::builder().code(code);

    unsafe { device.device.create_shader_module(&create_info, None) }
        .context("Failed to create shader module")
}
