// Error taxonomy for the Vulkan backend
//
// Every setup failure is fatal for the phase that raised it. Nothing here is
// retried; callers propagate with `?` and decide whether to abort.

use ash::{prelude::VkResult, vk};
use thiserror::Error;

pub type RhiResult<T> = Result<T, RhiError>;

#[derive(Debug, Error)]
pub enum RhiError {
    /// Caller asked for something the host cannot provide (e.g. validation layer)
    #[error("Configuration error: {0}")]
    Config(String),

    /// No physical device satisfies the selection policy
    #[error("No suitable GPU found: {0}")]
    DeviceNotFound(String),

    /// A Vulkan call was rejected by the driver
    #[error("{context}: {result:?}")]
    Backend {
        context: &'static str,
        result: vk::Result,
    },

    /// The Vulkan loader could not be found or loaded
    #[error("Failed to load Vulkan library. Is Vulkan installed? ({0})")]
    Loading(#[from] ash::LoadingError),

    /// Shader bytes are not a sequence of SPIR-V words
    #[error("Invalid SPIR-V bytecode: {0}")]
    InvalidShader(#[source] std::io::Error),
}

impl RhiError {
    pub fn backend(context: &'static str, result: vk::Result) -> Self {
        Self::Backend { context, result }
    }
}

/// Attach a static description to a raw Vulkan result.
pub trait VkResultExt<T> {
    fn context(self, context: &'static str) -> RhiResult<T>;
}

impl<T> VkResultExt<T> for VkResult<T> {
    fn context(self, context: &'static str) -> RhiResult<T> {
        self.map_err(|result| RhiError::backend(context, result))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_error_keeps_context_and_code() {
        let result: VkResult<()> = Err(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        let err = result.context("Failed to create swapchain").unwrap_err();

        match &err {
            RhiError::Backend { context, result } => {
                assert_eq!(*context, "Failed to create swapchain");
                assert_eq!(*result, vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.to_string().starts_with("Failed to create swapchain"));
    }

    #[test]
    fn ok_values_pass_through() {
        let result: VkResult<u32> = Ok(7);
        assert_eq!(result.context("unused").unwrap(), 7);
    }
}
