//! Vulkan instance, validation hook and surface ownership

use std::ffi::{CStr, CString};
use std::os::raw::c_char;

use ash::extensions::ext::DebugUtils;
use ash::extensions::khr::Surface;
use ash::{vk, Entry, Instance};

use crate::config::RendererConfig;
use crate::render::error::{VulkanError, VulkanResult};
use crate::render::gpu::{GpuInstance, PresentationTarget};
use crate::render::vulkan::device::VulkanGpu;

const VALIDATION_LAYER: &str = "VK_LAYER_KHRONOS_validation";
const ENGINE_NAME: &str = "Strata";

/// Vulkan instance with its optional validation messenger and bound surface
pub struct VulkanInstance {
    entry: Entry,
    instance: Instance,
    debug_utils: Option<(DebugUtils, vk::DebugUtilsMessengerEXT)>,
    surface_loader: Surface,
    surface: Option<vk::SurfaceKHR>,
    prefer_mailbox: bool,
}

impl VulkanInstance {
    /// Create an instance enabling `required_extensions`
    ///
    /// Validation is enabled only when requested and the Khronos layer is
    /// installed; otherwise a warning is logged and startup continues.
    pub fn new(app_name: &str, required_extensions: &[String], config: &RendererConfig) -> VulkanResult<Self> {
        let entry = unsafe { Entry::load() }
            .map_err(|e| VulkanError::InitializationFailed(format!("Failed to load Vulkan: {e}")))?;

        let validation = config.enable_validation && Self::validation_layer_available(&entry)?;
        if config.enable_validation && !validation {
            log::warn!("{VALIDATION_LAYER} requested but not installed; continuing without validation");
        }

        let app_name = to_cstring(app_name)?;
        let engine_name = to_cstring(ENGINE_NAME)?;
        let app_info = vk::ApplicationInfo::builder()
            .application_name(&app_name)
            .application_version(vk::make_api_version(0, 1, 0, 0))
            .engine_name(&engine_name)
            .engine_version(vk::make_api_version(0, 1, 0, 0))
            .api_version(vk::API_VERSION_1_0);

        let extension_names = required_extensions
            .iter()
            .map(|name| to_cstring(name))
            .collect::<VulkanResult<Vec<_>>>()?;
        let mut extensions: Vec<*const c_char> = extension_names.iter().map(|name| name.as_ptr()).collect();
        if validation {
            extensions.push(DebugUtils::name().as_ptr());
        }

        let layer_names = if validation {
            vec![to_cstring(VALIDATION_LAYER)?]
        } else {
            Vec::new()
        };
        let layers: Vec<*const c_char> = layer_names.iter().map(|name| name.as_ptr()).collect();

        let create_info = vk::InstanceCreateInfo::builder()
            .application_info(&app_info)
            .enabled_extension_names(&extensions)
            .enabled_layer_names(&layers);

        let instance = unsafe { entry.create_instance(&create_info, None).map_err(VulkanError::Api)? };

        let debug_utils = if validation {
            let debug_utils = DebugUtils::new(&entry, &instance);
            match Self::setup_debug_messenger(&debug_utils) {
                Ok(messenger) => Some((debug_utils, messenger)),
                Err(e) => {
                    unsafe { instance.destroy_instance(None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        let surface_loader = Surface::new(&entry, &instance);
        log::info!("Vulkan instance created (validation: {validation})");

        Ok(Self {
            entry,
            instance,
            debug_utils,
            surface_loader,
            surface: None,
            prefer_mailbox: config.prefer_mailbox,
        })
    }

    /// Whether the validation messenger is installed
    pub fn has_debug_hook(&self) -> bool {
        self.debug_utils.is_some()
    }

    /// Loaded Vulkan entry points
    pub fn entry(&self) -> &Entry {
        &self.entry
    }

    fn validation_layer_available(entry: &Entry) -> VulkanResult<bool> {
        let layers = entry.enumerate_instance_layer_properties().map_err(VulkanError::Api)?;
        Ok(layers.iter().any(|layer| {
            let name = unsafe { CStr::from_ptr(layer.layer_name.as_ptr()) };
            name.to_bytes() == VALIDATION_LAYER.as_bytes()
        }))
    }

    fn setup_debug_messenger(debug_utils: &DebugUtils) -> VulkanResult<vk::DebugUtilsMessengerEXT> {
        let create_info = vk::DebugUtilsMessengerCreateInfoEXT::builder()
            .message_severity(
                vk::DebugUtilsMessageSeverityFlagsEXT::WARNING | vk::DebugUtilsMessageSeverityFlagsEXT::ERROR,
            )
            .message_type(
                vk::DebugUtilsMessageTypeFlagsEXT::GENERAL
                    | vk::DebugUtilsMessageTypeFlagsEXT::VALIDATION
                    | vk::DebugUtilsMessageTypeFlagsEXT::PERFORMANCE,
            )
            .pfn_user_callback(Some(debug_callback));

        unsafe {
            debug_utils
                .create_debug_utils_messenger(&create_info, None)
                .map_err(VulkanError::Api)
        }
    }
}

impl GpuInstance for VulkanInstance {
    type Gpu = VulkanGpu;

    fn bind_surface(&mut self, target: &mut dyn PresentationTarget) -> VulkanResult<()> {
        if self.surface.is_some() {
            return Err(VulkanError::InvalidOperation {
                reason: "surface already bound".to_string(),
            });
        }
        self.surface = Some(target.create_surface(self.instance.handle())?);
        log::debug!("Presentation surface bound");
        Ok(())
    }

    fn create_device(&mut self) -> VulkanResult<VulkanGpu> {
        let surface = self.surface.ok_or_else(|| VulkanError::InvalidOperation {
            reason: "no surface bound".to_string(),
        })?;
        VulkanGpu::new(&self.instance, self.surface_loader.clone(), surface, self.prefer_mailbox)
    }

    fn destroy_surface(&mut self) {
        if let Some(surface) = self.surface.take() {
            unsafe { self.surface_loader.destroy_surface(surface, None) };
            log::debug!("Presentation surface destroyed");
        }
    }

    fn destroy_debug_hook(&mut self) {
        if let Some((debug_utils, messenger)) = self.debug_utils.take() {
            unsafe { debug_utils.destroy_debug_utils_messenger(messenger, None) };
        }
    }
}

impl Drop for VulkanInstance {
    fn drop(&mut self) {
        self.destroy_surface();
        self.destroy_debug_hook();
        unsafe { self.instance.destroy_instance(None) };
        log::debug!("Vulkan instance destroyed");
    }
}

fn to_cstring(value: &str) -> VulkanResult<CString> {
    CString::new(value).map_err(|e| VulkanError::InitializationFailed(format!("Invalid name {value:?}: {e}")))
}

/// Forwards validation messages to the `log` facade
unsafe extern "system" fn debug_callback(
    message_severity: vk::DebugUtilsMessageSeverityFlagsEXT,
    message_type: vk::DebugUtilsMessageTypeFlagsEXT,
    callback_data: *const vk::DebugUtilsMessengerCallbackDataEXT,
    _user_data: *mut std::ffi::c_void,
) -> vk::Bool32 {
    if callback_data.is_null() || (*callback_data).p_message.is_null() {
        return vk::FALSE;
    }
    let message = CStr::from_ptr((*callback_data).p_message).to_string_lossy();

    if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::ERROR {
        log::error!("[Vulkan] {message_type:?} - {message}");
    } else if message_severity >= vk::DebugUtilsMessageSeverityFlagsEXT::WARNING {
        log::warn!("[Vulkan] {message_type:?} - {message}");
    } else {
        log::debug!("[Vulkan] {message_type:?} - {message}");
    }

    vk::FALSE
}
