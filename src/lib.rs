// Single-GPU, single-swapchain Vulkan rendering core.
//
// `backend` holds the device layer; `config` loads settings from config.toml
// and freezes them into the `RhiConfig` the backend consumes.

pub mod backend;
pub mod config;

pub use backend::{FrameStatus, RhiError, RhiResult, VulkanRhi, MAX_FRAMES_IN_FLIGHT};
pub use config::{Config, RhiConfig};
