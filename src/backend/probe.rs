// Host capability probing
//
// Enumerates what the Vulkan loader offers before an instance exists.
// The result is immutable and passed to instance creation, so nothing
// downstream needs to re-query (or cache in a global) whether portability
// enumeration or the validation layer is available.

use ash::{vk, Entry};
use std::ffi::CStr;

use super::error::{RhiResult, VkResultExt};

pub const VALIDATION_LAYER: &CStr = c"VK_LAYER_KHRONOS_validation";
pub const PORTABILITY_ENUMERATION_EXTENSION: &CStr = c"VK_KHR_portability_enumeration";

/// Instance-level extensions and layers reported by the loader
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostCapabilities {
    pub extensions: Vec<String>,
    pub layers: Vec<String>,
}

impl HostCapabilities {
    pub fn probe(entry: &Entry) -> RhiResult<Self> {
        let extensions = entry
            .enumerate_instance_extension_properties(None)
            .context("Failed to enumerate instance extensions")?;
        let layers = entry
            .enumerate_instance_layer_properties()
            .context("Failed to enumerate instance layers")?;

        let caps = Self {
            extensions: extensions.iter().map(extension_name).collect(),
            layers: layers.iter().map(layer_name).collect(),
        };

        log::info!(
            "{} instance extensions, {} layers available",
            caps.extensions.len(),
            caps.layers.len()
        );
        for name in &caps.extensions {
            log::debug!("  extension: {}", name);
        }
        for name in &caps.layers {
            log::debug!("  layer: {}", name);
        }

        Ok(caps)
    }

    pub fn has_extension(&self, name: &CStr) -> bool {
        contains_name(&self.extensions, name)
    }

    pub fn has_layer(&self, name: &CStr) -> bool {
        contains_name(&self.layers, name)
    }

    pub fn supports_portability_enumeration(&self) -> bool {
        self.has_extension(PORTABILITY_ENUMERATION_EXTENSION)
    }
}

pub(crate) fn contains_name(names: &[String], name: &CStr) -> bool {
    let name = name.to_string_lossy();
    names.iter().any(|n| *n == name)
}

pub(crate) fn extension_name(props: &vk::ExtensionProperties) -> String {
    // Safety: the driver fills extension_name with a NUL-terminated string
    unsafe { CStr::from_ptr(props.extension_name.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

fn layer_name(props: &vk::LayerProperties) -> String {
    unsafe { CStr::from_ptr(props.layer_name.as_ptr()) }
        .to_string_lossy()
        .into_owned()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(extensions: &[&str], layers: &[&str]) -> HostCapabilities {
        HostCapabilities {
            extensions: extensions.iter().map(|s| s.to_string()).collect(),
            layers: layers.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn detects_portability_enumeration() {
        let host = caps(&["VK_KHR_surface", "VK_KHR_portability_enumeration"], &[]);
        assert!(host.supports_portability_enumeration());

        let host = caps(&["VK_KHR_surface"], &[]);
        assert!(!host.supports_portability_enumeration());
    }

    #[test]
    fn layer_lookup_is_exact() {
        let host = caps(&[], &["VK_LAYER_KHRONOS_validation_extra"]);
        assert!(!host.has_layer(VALIDATION_LAYER));

        let host = caps(&[], &["VK_LAYER_KHRONOS_validation"]);
        assert!(host.has_layer(VALIDATION_LAYER));
    }

    #[test]
    fn reads_names_from_driver_structs() {
        let mut props = vk::ExtensionProperties::default();
        for (dst, src) in props.extension_name.iter_mut().zip(b"VK_KHR_swapchain") {
            *dst = *src as std::ffi::c_char;
        }
        assert_eq!(extension_name(&props), "VK_KHR_swapchain");
    }
}
