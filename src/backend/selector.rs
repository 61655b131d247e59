// Physical device selection
//
// Candidates are gathered from the driver up front (see device.rs) and then
// filtered by a policy. The first candidate the policy accepts wins; there is
// no ranking between suitable devices.

use ash::vk;
use std::ffi::CStr;

use super::error::{RhiError, RhiResult};
use super::probe::contains_name;

/// Queue family indices discovered on a physical device
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: Option<u32>,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    /// Scan families in order, recording graphics and present support as they
    /// appear, and stop once both are known.
    pub fn find<I>(families: I) -> Self
    where
        I: IntoIterator<Item = (vk::QueueFlags, bool)>,
    {
        let mut indices = Self::default();
        for (i, (flags, can_present)) in families.into_iter().enumerate() {
            if flags.contains(vk::QueueFlags::GRAPHICS) {
                indices.graphics = Some(i as u32);
            }
            if can_present {
                indices.present = Some(i as u32);
            }
            if indices.is_complete() {
                break;
            }
        }
        indices
    }

    pub fn is_complete(&self) -> bool {
        self.graphics.is_some() && self.present.is_some()
    }

    pub fn resolved(&self) -> Option<ResolvedQueueFamilies> {
        Some(ResolvedQueueFamilies {
            graphics: self.graphics?,
            present: self.present?,
        })
    }
}

/// Queue families of the selected device; both are guaranteed to exist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedQueueFamilies {
    pub graphics: u32,
    pub present: u32,
}

impl ResolvedQueueFamilies {
    /// Families to request queues from, without duplicates
    pub fn unique(&self) -> Vec<u32> {
        if self.graphics == self.present {
            vec![self.graphics]
        } else {
            vec![self.graphics, self.present]
        }
    }
}

/// What a surface offers on a given physical device
#[derive(Debug, Clone, Default)]
pub struct SurfaceSupport {
    pub capabilities: vk::SurfaceCapabilitiesKHR,
    pub formats: Vec<vk::SurfaceFormatKHR>,
    pub present_modes: Vec<vk::PresentModeKHR>,
}

impl SurfaceSupport {
    pub fn is_adequate(&self) -> bool {
        !self.formats.is_empty() && !self.present_modes.is_empty()
    }
}

/// Everything the selection policy may look at for one physical device
#[derive(Debug, Clone)]
pub struct DeviceCandidate {
    pub handle: vk::PhysicalDevice,
    pub name: String,
    pub device_type: vk::PhysicalDeviceType,
    pub queue_families: QueueFamilyIndices,
    pub extensions: Vec<String>,
    pub surface: SurfaceSupport,
}

impl DeviceCandidate {
    pub fn has_extension(&self, name: &CStr) -> bool {
        contains_name(&self.extensions, name)
    }
}

/// Decides whether a physical device can drive the renderer
pub trait DeviceSelectionPolicy {
    fn is_suitable(&self, candidate: &DeviceCandidate) -> bool;
}

impl<F> DeviceSelectionPolicy for F
where
    F: Fn(&DeviceCandidate) -> bool,
{
    fn is_suitable(&self, candidate: &DeviceCandidate) -> bool {
        self(candidate)
    }
}

/// Graphics + present queues, every required extension, and a usable surface
#[derive(Debug, Clone, Copy)]
pub struct RequireSwapchainSupport<'a> {
    pub required_extensions: &'a [&'a CStr],
}

impl DeviceSelectionPolicy for RequireSwapchainSupport<'_> {
    fn is_suitable(&self, candidate: &DeviceCandidate) -> bool {
        let extensions_supported = self
            .required_extensions
            .iter()
            .all(|ext| candidate.has_extension(ext));

        candidate.queue_families.is_complete()
            && extensions_supported
            && candidate.surface.is_adequate()
    }
}

/// Keep the devices whose driver queries succeeded. A device that can't be
/// queried can't be shown to satisfy any policy, so it is logged and dropped
/// rather than failing selection for the devices after it.
pub fn queryable_candidates<I>(results: I) -> Vec<DeviceCandidate>
where
    I: IntoIterator<Item = (String, RhiResult<DeviceCandidate>)>,
{
    results
        .into_iter()
        .filter_map(|(name, result)| match result {
            Ok(candidate) => Some(candidate),
            Err(e) => {
                log::warn!("Skipping GPU {}: {}", name, e);
                None
            }
        })
        .collect()
}

pub fn pick_physical_device<P>(
    candidates: Vec<DeviceCandidate>,
    policy: &P,
) -> RhiResult<DeviceCandidate>
where
    P: DeviceSelectionPolicy + ?Sized,
{
    if candidates.is_empty() {
        return Err(RhiError::DeviceNotFound(
            "no GPUs with Vulkan support".to_string(),
        ));
    }

    let count = candidates.len();
    for candidate in candidates {
        if policy.is_suitable(&candidate) {
            return Ok(candidate);
        }
        log::debug!("Rejected GPU: {}", candidate.name);
    }

    Err(RhiError::DeviceNotFound(format!(
        "none of {} GPUs meet the requirements",
        count
    )))
}

#[cfg(test)]
mod tests {
    use super::*;
    use ash::vk::Handle;

    const SWAPCHAIN: &CStr = c"VK_KHR_swapchain";

    fn candidate(raw: u64, name: &str) -> DeviceCandidate {
        DeviceCandidate {
            handle: vk::PhysicalDevice::from_raw(raw),
            name: name.to_string(),
            device_type: vk::PhysicalDeviceType::DISCRETE_GPU,
            queue_families: QueueFamilyIndices {
                graphics: Some(0),
                present: Some(0),
            },
            extensions: vec!["VK_KHR_swapchain".to_string()],
            surface: SurfaceSupport {
                capabilities: vk::SurfaceCapabilitiesKHR::default(),
                formats: vec![vk::SurfaceFormatKHR::default()],
                present_modes: vec![vk::PresentModeKHR::FIFO],
            },
        }
    }

    #[test]
    fn queue_scan_prefers_shared_family_when_found_together() {
        let families = [
            (vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE, true),
            (vk::QueueFlags::TRANSFER, false),
        ];
        let indices = QueueFamilyIndices::find(families);
        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, Some(0));
    }

    #[test]
    fn queue_scan_finds_separate_families() {
        let families = [
            (vk::QueueFlags::GRAPHICS, false),
            (vk::QueueFlags::TRANSFER, false),
            (vk::QueueFlags::COMPUTE, true),
        ];
        let indices = QueueFamilyIndices::find(families);
        assert_eq!(indices.graphics, Some(0));
        assert_eq!(indices.present, Some(2));
        assert!(indices.is_complete());
    }

    #[test]
    fn queue_scan_reports_missing_graphics() {
        let indices = QueueFamilyIndices::find([(vk::QueueFlags::COMPUTE, true)]);
        assert!(!indices.is_complete());
        assert!(indices.resolved().is_none());
    }

    #[test]
    fn unique_families_are_deduplicated() {
        let same = ResolvedQueueFamilies { graphics: 1, present: 1 };
        assert_eq!(same.unique(), vec![1]);

        let split = ResolvedQueueFamilies { graphics: 0, present: 3 };
        assert_eq!(split.unique(), vec![0, 3]);
    }

    #[test]
    fn picks_first_suitable_device() {
        let mut a = candidate(1, "A");
        a.queue_families.graphics = None;
        let b = candidate(2, "B");

        let policy = RequireSwapchainSupport {
            required_extensions: &[SWAPCHAIN],
        };
        let picked = pick_physical_device(vec![a, b], &policy).unwrap();
        assert_eq!(picked.name, "B");
    }

    #[test]
    fn first_match_wins_without_ranking() {
        let mut integrated = candidate(1, "integrated");
        integrated.device_type = vk::PhysicalDeviceType::INTEGRATED_GPU;
        let discrete = candidate(2, "discrete");

        let policy = RequireSwapchainSupport {
            required_extensions: &[SWAPCHAIN],
        };
        let picked = pick_physical_device(vec![integrated, discrete], &policy).unwrap();
        assert_eq!(picked.name, "integrated");
    }

    #[test]
    fn rejects_missing_extension_or_surface_support() {
        let mut no_ext = candidate(1, "no-ext");
        no_ext.extensions.clear();
        let mut no_modes = candidate(2, "no-modes");
        no_modes.surface.present_modes.clear();
        let mut no_formats = candidate(3, "no-formats");
        no_formats.surface.formats.clear();

        let policy = RequireSwapchainSupport {
            required_extensions: &[SWAPCHAIN],
        };
        let err = pick_physical_device(vec![no_ext, no_modes, no_formats], &policy).unwrap_err();
        assert!(matches!(err, RhiError::DeviceNotFound(_)));
    }

    #[test]
    fn unqueryable_device_does_not_block_later_ones() {
        let lost = Err(RhiError::backend(
            "Failed to query surface support",
            vk::Result::ERROR_SURFACE_LOST_KHR,
        ));
        let candidates = queryable_candidates(vec![
            ("A".to_string(), lost),
            ("B".to_string(), Ok(candidate(2, "B"))),
        ]);

        let policy = RequireSwapchainSupport {
            required_extensions: &[SWAPCHAIN],
        };
        let picked = pick_physical_device(candidates, &policy).unwrap();
        assert_eq!(picked.name, "B");
    }

    #[test]
    fn all_devices_unqueryable_is_not_found() {
        let candidates = queryable_candidates(vec![(
            "A".to_string(),
            Err(RhiError::backend(
                "Failed to query surface formats",
                vk::Result::ERROR_SURFACE_LOST_KHR,
            )),
        )]);
        assert!(candidates.is_empty());

        let policy = RequireSwapchainSupport {
            required_extensions: &[SWAPCHAIN],
        };
        let err = pick_physical_device(candidates, &policy).unwrap_err();
        assert!(matches!(err, RhiError::DeviceNotFound(_)));
    }

    #[test]
    fn empty_device_list_is_not_found() {
        let policy = RequireSwapchainSupport {
            required_extensions: &[SWAPCHAIN],
        };
        let err = pick_physical_device(Vec::new(), &policy).unwrap_err();
        assert!(matches!(err, RhiError::DeviceNotFound(_)));
    }

    #[test]
    fn closures_work_as_policies() {
        let policy = |c: &DeviceCandidate| c.device_type == vk::PhysicalDeviceType::DISCRETE_GPU;
        let mut cpu = candidate(1, "cpu");
        cpu.device_type = vk::PhysicalDeviceType::CPU;
        let gpu = candidate(2, "gpu");

        let picked = pick_physical_device(vec![cpu, gpu], &policy).unwrap();
        assert_eq!(picked.name, "gpu");
    }
}
