// Vulkan Device - Core GPU interface
//
// Responsibilities:
// - Instance creation with optional validation layer + debug messenger
// - Presentation surface (created by the windowing side through a callback)
// - Physical device selection (first device the policy accepts)
// - Logical device + graphics/present queues

use ash::{prelude::VkResult, vk, Entry};
use std::ffi::{c_char, CStr, CString};

use super::error::{RhiError, RhiResult, VkResultExt};
use super::probe::{HostCapabilities, PORTABILITY_ENUMERATION_EXTENSION, VALIDATION_LAYER};
use super::selector::{
    pick_physical_device, queryable_candidates, DeviceCandidate, DeviceSelectionPolicy,
    QueueFamilyIndices, RequireSwapchainSupport, ResolvedQueueFamilies, SurfaceSupport,
};
use crate::config::RhiConfig;

pub const PORTABILITY_SUBSET_EXTENSION: &CStr = c"VK_KHR_portability_subset";

/// Device extensions every candidate must expose
pub fn required_device_extensions() -> [&'static CStr; 1] {
    [ash::extensions::khr::Swapchain::name()]
}

/// Vulkan instance, surface and logical device with ordered cleanup
pub struct VulkanDevice {
    pub device: ash::Device,
    pub physical_device: vk::PhysicalDevice,
    pub queue_families: ResolvedQueueFamilies,
    pub graphics_queue: vk::Queue,
    pub present_queue: vk::Queue,

    pub surface: vk::SurfaceKHR,
    pub surface_loader: ash::extensions::khr::Surface,

    // Debug utils (if validation enabled)
    debug_utils: Option<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,

    pub instance: ash::Instance,
    pub entry: Entry,

    pub properties: vk::PhysicalDeviceProperties,
}

impl VulkanDevice {
    /// Bring up instance, surface and device.
    ///
    /// `create_surface` is called exactly once, right after the instance
    /// exists; the returned surface is owned (and destroyed) by this device.
    pub fn new<F>(
        config: &RhiConfig,
        window_extensions: &[&CStr],
        create_surface: F,
    ) -> RhiResult<Self>
    where
        F: FnOnce(&Entry, &ash::Instance) -> VkResult<vk::SurfaceKHR>,
    {
        let policy = RequireSwapchainSupport {
            required_extensions: &required_device_extensions(),
        };
        Self::with_policy(config, window_extensions, create_surface, &policy)
    }

    pub fn with_policy<F, P>(
        config: &RhiConfig,
        window_extensions: &[&CStr],
        create_surface: F,
        policy: &P,
    ) -> RhiResult<Self>
    where
        F: FnOnce(&Entry, &ash::Instance) -> VkResult<vk::SurfaceKHR>,
        P: DeviceSelectionPolicy + ?Sized,
    {
        log::info!("Creating Vulkan device: {}", config.app_name);

        let entry = unsafe { Entry::load() }?;
        let caps = HostCapabilities::probe(&entry)?;

        let instance = create_instance(&entry, &caps, config, window_extensions)?;

        // From here on, every failure must release what was already created.
        // `Partial` owns the objects until the device struct takes over.
        let mut partial = Partial::new(&entry, &instance);

        if config.enable_validation {
            partial.debug_utils = Some(setup_debug_messenger(&entry, &instance)?);
        }

        let surface = create_surface(&entry, &instance).context("Failed to create window surface")?;
        partial.surface = surface;

        let candidates = enumerate_candidates(&instance, &partial.surface_loader, surface)?;
        let selected = pick_physical_device(candidates, policy)?;
        let queue_families = selected.queue_families.resolved().ok_or_else(|| {
            RhiError::DeviceNotFound(format!("{} has no graphics/present queues", selected.name))
        })?;

        log::info!("Selected GPU: {} ({:?})", selected.name, selected.device_type);

        let device = create_logical_device(&instance, &selected, queue_families)?;

        let graphics_queue = unsafe { device.get_device_queue(queue_families.graphics, 0) };
        let present_queue = unsafe { device.get_device_queue(queue_families.present, 0) };

        let properties = unsafe { instance.get_physical_device_properties(selected.handle) };
        log::info!(
            "API Version: {}.{}.{}",
            vk::api_version_major(properties.api_version),
            vk::api_version_minor(properties.api_version),
            vk::api_version_patch(properties.api_version)
        );

        let (surface_loader, surface, debug_utils) = partial.disarm();

        Ok(Self {
            device,
            physical_device: selected.handle,
            queue_families,
            graphics_queue,
            present_queue,
            surface,
            surface_loader,
            debug_utils,
            instance,
            entry,
            properties,
        })
    }

    /// Current surface capabilities/formats/modes for the selected GPU
    pub fn surface_support(&self) -> RhiResult<SurfaceSupport> {
        query_surface_support(&self.surface_loader, self.physical_device, self.surface)
    }

    /// Wait for device to be idle (e.g., before cleanup)
    pub fn wait_idle(&self) -> RhiResult<()> {
        unsafe { self.device.device_wait_idle() }.context("Failed to wait for device idle")
    }
}

impl Drop for VulkanDevice {
    fn drop(&mut self) {
        log::info!("Destroying Vulkan device...");

        let _ = self.wait_idle();

        // Dependents (swapchain, pipeline, sync objects) hold an Arc to this
        // device, so they are already gone by the time we get here.
        unsafe {
            self.device.destroy_device(None);
            self.surface_loader.destroy_surface(self.surface, None);
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Instance-level objects created before the device exists.
/// Destroys them on early return; `disarm` hands them over.
struct Partial<'a> {
    instance: &'a ash::Instance,
    surface_loader: ash::extensions::khr::Surface,
    surface: vk::SurfaceKHR,
    debug_utils: Option<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,
    armed: bool,
}

impl<'a> Partial<'a> {
    fn new(entry: &Entry, instance: &'a ash::Instance) -> Self {
        Self {
            instance,
            surface_loader: ash::extensions::khr::Surface::new(entry, instance),
            surface: vk::SurfaceKHR::null(),
            debug_utils: None,
            armed: true,
        }
    }

    fn disarm(
        mut self,
    ) -> (
        ash::extensions::khr::Surface,
        vk::SurfaceKHR,
        Option<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)>,
    ) {
        self.armed = false;
        (self.surface_loader.clone(), self.surface, self.debug_utils.take())
    }
}

impl Drop for Partial<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        unsafe {
            if self.surface != vk::SurfaceKHR::null() {
                self.surface_loader.destroy_surface(self.surface, None);
            }
            if let Some((debug_utils, messenger)) = self.debug_utils.take() {
                debug_utils.destroy_debug_utils_messenger(messenger, None);
            }
            self.instance.destroy_instance(None);
        }
    }
}

/// Instance extensions to enable: the window system's, plus debug utils when
/// validating, plus portability enumeration when the host offers it.
pub fn instance_extensions(
    caps: &HostCapabilities,
    config: &RhiConfig,
    window_extensions: &[&CStr],
) -> Vec<CString> {
    let mut extensions: Vec<CString> = window_extensions.iter().map(|&e| e.to_owned()).collect();

    if config.enable_validation {
        extensions.push(ash::extensions::ext::DebugUtils::name().to_owned());
    }
    if caps.supports_portability_enumeration() {
        extensions.push(PORTABILITY_ENUMERATION_EXTENSION.to_owned());
    }

    extensions
}

/// Fails with `Config` before touching the driver if validation was requested
/// but the layer is not installed.
pub fn check_validation_support(caps: &HostCapabilities, config: &RhiConfig) -> RhiResult<()> {
    if config.enable_validation && !caps.has_layer(VALIDATION_LAYER) {
        return Err(RhiError::Config(format!(
            "validation layers requested, but {} is not available",
            VALIDATION_LAYER.to_string_lossy()
        )));
    }
    Ok(())
}

fn create_instance(
    entry: &Entry,
    caps: &HostCapabilities,
    config: &RhiConfig,
    window_extensions: &[&CStr],
) -> RhiResult<ash::Instance> {
    check_validation_support(caps, config)?;

    let app_name_cstr = CString::new(config.app_name.as_str())
        .map_err(|_| RhiError::Config("application name contains a NUL byte".to_string()))?;
    let engine_name = c"my-rhi";

    let app_info = vk::ApplicationInfo::builder()
        .application_name(&app_name_cstr)
        .application_version(vk::make_api_version(0, 1, 0, 0))
        .engine_name(engine_name)
        .engine_version(vk::make_api_version(0, 0, 1, 0))
        .api_version(vk::API_VERSION_1_1);

    let extensions = instance_extensions(caps, config, window_extensions);
    log::info!("Creating instance with extensions:");
    for ext in &extensions {
        log::info!("  {}", ext.to_string_lossy());
    }
    let extension_ptrs: Vec<*const c_char> = extensions.iter().map(|e| e.as_ptr()).collect();

    let layer_names = if config.enable_validation {
        vec![VALIDATION_LAYER.as_ptr()]
    } else {
        vec![]
    };

    let flags = if caps.supports_portability_enumeration() {
        vk::InstanceCreateFlags::ENUMERATE_PORTABILITY_KHR
    } else {
        vk::InstanceCreateFlags::empty()
    };

    // Also validates vkCreateInstance/vkDestroyInstance themselves
    let mut debug_info = debug_messenger_info();

    let mut create_info = vk::InstanceCreateInfo::builder()
        .flags(flags)
        .application_info(&app_info)
        .enabled_extension_names(&extension_ptrs)
        .enabled_layer_names(&layer_names);
    if config.enable_validation {
        create_info = create_info.push_next(&mut debug_info);
    }

    unsafe { entry.create_instance(&create_info, None) }.context("Failed to create Vulkan instance")
}

fn debug_messenger_info() -> vk::DebugUtilsMessengerCreateInfoEXT {
    vk::DebugUtilsMessengerCreateInfoEXT::builder()
        .message_severity(
            vk::DebugUtilsMessageSeverityFlagsEXT::VERBOSE
                | vk::DebugUtilsMessageSeverityFlagsEXT::WARNING
                | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
        )
        .message_type(
            vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
        )
        .pfn_user_callback(Some(debug_callback))
        .build()
}

fn setup_debug_messenger(
    entry: &Entry,
    instance: &ash::Instance,
) -> RhiResult<(ash::extensions::ext::DebugUtils, vk::DebugUtilsMessengerEXT)> {
    let debug_utils = ash::extensions::ext::DebugUtils::new(entry, instance);
    let create_info = debug_messenger_info();

    let messenger = unsafe { debug_utils.create_debug_utils_messenger(&create_info, None) }
        .context("Failed to set up debug messenger")?;

    Ok((debug_utils, messenger))
}

fn query_surface_support(
    surface_loader: &ash::extensions::khr::Surface,
    physical_device: vk::PhysicalDevice,
    surface: vk::SurfaceKHR,
) -> RhiResult<SurfaceSupport> {
    unsafe {
        Ok(SurfaceSupport {
            capabilities: surface_loader
                .get_physical_device_surface_capabilities(physical_device, surface)
                .context("Failed to query surface capabilities")?,
            formats: surface_loader
                .get_physical_device_surface_formats(physical_device, surface)
                .context("Failed to query surface formats")?,
            present_modes: surface_loader
                .get_physical_device_surface_present_modes(physical_device, surface)
                .context("Failed to query surface present modes")?,
        })
    }
}

fn enumerate_candidates(
    instance: &ash::Instance,
    surface_loader: &ash::extensions::khr::Surface,
    surface: vk::SurfaceKHR,
) -> RhiResult<Vec<DeviceCandidate>> {
    let devices = unsafe { instance.enumerate_physical_devices() }
        .context("Failed to enumerate physical devices")?;

    let results = devices.into_iter().map(|handle| {
        let props = unsafe { instance.get_physical_device_properties(handle) };
        let name = unsafe { CStr::from_ptr(props.device_name.as_ptr()) }
            .to_string_lossy()
            .into_owned();

        let result = query_candidate(instance, surface_loader, surface, handle, &props, &name);
        (name, result)
    });

    Ok(queryable_candidates(results))
}

fn query_candidate(
    instance: &ash::Instance,
    surface_loader: &ash::extensions::khr::Surface,
    surface: vk::SurfaceKHR,
    handle: vk::PhysicalDevice,
    props: &vk::PhysicalDeviceProperties,
    name: &str,
) -> RhiResult<DeviceCandidate> {
    let families = unsafe { instance.get_physical_device_queue_family_properties(handle) };
    let mut flags_and_present = Vec::with_capacity(families.len());
    for (i, family) in families.iter().enumerate() {
        let can_present = unsafe {
            surface_loader.get_physical_device_surface_support(handle, i as u32, surface)
        }
        .context("Failed to query surface support")?;
        flags_and_present.push((family.queue_flags, can_present));
    }

    let extensions = unsafe { instance.enumerate_device_extension_properties(handle) }
        .context("Failed to enumerate device extensions")?
        .iter()
        .map(super::probe::extension_name)
        .collect();

    let surface = query_surface_support(surface_loader, handle, surface)?;

    Ok(DeviceCandidate {
        handle,
        name: name.to_string(),
        device_type: props.device_type,
        queue_families: QueueFamilyIndices::find(flags_and_present),
        extensions,
        surface,
    })
}

fn create_logical_device(
    instance: &ash::Instance,
    selected: &DeviceCandidate,
    queue_families: ResolvedQueueFamilies,
) -> RhiResult<ash::Device> {
    let queue_priorities = [1.0];
    let queue_create_infos: Vec<vk::DeviceQueueCreateInfo> = queue_families
        .unique()
        .into_iter()
        .map(|family| {
            vk::DeviceQueueCreateInfo::builder()
                .queue_family_index(family)
                .queue_priorities(&queue_priorities)
                .build()
        })
        .collect();

    let mut extensions: Vec<*const c_char> = required_device_extensions()
        .iter()
        .map(|e| e.as_ptr())
        .collect();
    // Devices behind a portability layer must opt in to the subset
    if selected.has_extension(PORTABILITY_SUBSET_EXTENSION) {
        extensions.push(PORTABILITY_SUBSET_EXTENSION.as_ptr());
    }

    let features = vk::PhysicalDeviceFeatures::default();

    let create_info = vk::DeviceCreateInfo::builder()
        .queue_create_infos(&queue_create_infos)
        .enabled_extension_names(&extensions)
        .enabled_features(&features);

    unsafe { instance.create_device(selected.handle, &create_info, None) }
        .context("Failed to create logical device")
}

// Debug callback for validation layers
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    _message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    p_callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _p_user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if p_callback_data.is_null() || (*p_callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*p_callback_data).p_message);

    match message_severity {
        vk::DebugUtilsMessageSeverityFlagsEXT::ERROR => {
            log::error!("[Vulkan] {}", message.to_string_lossy());
        }
        vk::DebugUtilsMessageSeverityFlagsEXT::WARNING => {
            log::warn!("[Vulkan] {}", message.to_string_lossy());
        }
        _ => {
            log::debug!("[Vulkan] {}", message.to_string_lossy());
        }
    }

    vk::FALSE
}
