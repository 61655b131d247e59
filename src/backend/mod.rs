// Backend module - Vulkan abstraction layer
//
// Design: Thin wrapper around ash with explicit error results
// Startup order: device -> swapchain -> pipeline -> frame resources

pub mod commands;
pub mod device;
pub mod error;
pub mod frame;
pub mod pipeline;
pub mod probe;
pub mod rhi;
pub mod selector;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use device::VulkanDevice;
pub use error::{RhiError, RhiResult};
pub use frame::{FrameStatus, MAX_FRAMES_IN_FLIGHT};
pub use rhi::VulkanRhi;
pub use swapchain::Swapchain;
