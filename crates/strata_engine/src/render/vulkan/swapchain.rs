//! Swapchain parameter selection
//!
//! Pure functions over what the surface reports, so the choices can be
//! tested without a device.

use ash::vk;

use crate::render::error::{VulkanError, VulkanResult};

/// Format used when the surface leaves the choice open or supports it
pub const PREFERRED_SURFACE_FORMAT: vk::SurfaceFormatKHR = vk::SurfaceFormatKHR {
    format: vk::Format::B8G8R8A8_UNORM,
    color_space: vk::ColorSpaceKHR::SRGB_NONLINEAR,
};

/// Pick the color format for the swapchain images
pub fn choose_surface_format(formats: &[vk::SurfaceFormatKHR]) -> VulkanResult<vk::SurfaceFormatKHR> {
    match formats {
        [] => Err(VulkanError::UnsupportedSurfaceFormat),
        [only] if only.format == vk::Format::UNDEFINED => Ok(PREFERRED_SURFACE_FORMAT),
        _ => Ok(formats
            .iter()
            .copied()
            .find(|f| {
                f.format == PREFERRED_SURFACE_FORMAT.format && f.color_space == PREFERRED_SURFACE_FORMAT.color_space
            })
            .unwrap_or(formats[0])),
    }
}

/// MAILBOX when preferred and available, otherwise FIFO (always supported)
pub fn choose_present_mode(modes: &[vk::PresentModeKHR], prefer_mailbox: bool) -> vk::PresentModeKHR {
    if prefer_mailbox && modes.contains(&vk::PresentModeKHR::MAILBOX) {
        vk::PresentModeKHR::MAILBOX
    } else {
        vk::PresentModeKHR::FIFO
    }
}

/// The surface's current extent, or the window extent clamped to the
/// supported range when the surface lets the swapchain decide
pub fn choose_extent(capabilities: &vk::SurfaceCapabilitiesKHR, window_extent: vk::Extent2D) -> vk::Extent2D {
    if capabilities.current_extent.width != u32::MAX {
        return capabilities.current_extent;
    }

    vk::Extent2D {
        width: window_extent.width.clamp(
            capabilities.min_image_extent.width,
            capabilities.max_image_extent.width,
        ),
        height: window_extent.height.clamp(
            capabilities.min_image_extent.height,
            capabilities.max_image_extent.height,
        ),
    }
}

/// One more than the minimum, capped at the maximum when there is one
pub fn desired_image_count(capabilities: &vk::SurfaceCapabilitiesKHR) -> u32 {
    let count = capabilities.min_image_count + 1;
    if capabilities.max_image_count > 0 {
        count.min(capabilities.max_image_count)
    } else {
        count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn format(format: vk::Format, color_space: vk::ColorSpaceKHR) -> vk::SurfaceFormatKHR {
        vk::SurfaceFormatKHR { format, color_space }
    }

    fn extent(width: u32, height: u32) -> vk::Extent2D {
        vk::Extent2D { width, height }
    }

    #[test]
    fn test_undefined_format_means_free_choice() {
        let chosen = choose_surface_format(&[format(vk::Format::UNDEFINED, vk::ColorSpaceKHR::SRGB_NONLINEAR)]).unwrap();
        assert_eq!(chosen.format, vk::Format::B8G8R8A8_UNORM);
        assert_eq!(chosen.color_space, vk::ColorSpaceKHR::SRGB_NONLINEAR);
    }

    #[test]
    fn test_preferred_format_is_picked_when_listed() {
        let formats = [
            format(vk::Format::R8G8B8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::B8G8R8A8_UNORM, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(choose_surface_format(&formats).unwrap().format, vk::Format::B8G8R8A8_UNORM);
    }

    #[test]
    fn test_first_format_is_the_fallback() {
        let formats = [
            format(vk::Format::R8G8B8A8_SRGB, vk::ColorSpaceKHR::SRGB_NONLINEAR),
            format(vk::Format::R16G16B16A16_SFLOAT, vk::ColorSpaceKHR::SRGB_NONLINEAR),
        ];
        assert_eq!(choose_surface_format(&formats).unwrap().format, vk::Format::R8G8B8A8_SRGB);
    }

    #[test]
    fn test_no_formats_is_an_error() {
        assert!(matches!(
            choose_surface_format(&[]),
            Err(VulkanError::UnsupportedSurfaceFormat)
        ));
    }

    #[test]
    fn test_present_mode_selection() {
        let modes = [vk::PresentModeKHR::FIFO, vk::PresentModeKHR::MAILBOX];
        assert_eq!(choose_present_mode(&modes, true), vk::PresentModeKHR::MAILBOX);
        assert_eq!(choose_present_mode(&modes, false), vk::PresentModeKHR::FIFO);
        assert_eq!(
            choose_present_mode(&[vk::PresentModeKHR::IMMEDIATE], true),
            vk::PresentModeKHR::FIFO
        );
    }

    #[test]
    fn test_current_extent_wins() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: extent(800, 600),
            ..Default::default()
        };
        assert_eq!(choose_extent(&capabilities, extent(1920, 1080)), extent(800, 600));
    }

    #[test]
    fn test_window_extent_is_clamped() {
        let capabilities = vk::SurfaceCapabilitiesKHR {
            current_extent: extent(u32::MAX, u32::MAX),
            min_image_extent: extent(100, 100),
            max_image_extent: extent(1000, 1000),
            ..Default::default()
        };
        assert_eq!(choose_extent(&capabilities, extent(50, 4000)), extent(100, 1000));
    }

    #[test]
    fn test_image_count() {
        let unbounded = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 0,
            ..Default::default()
        };
        assert_eq!(desired_image_count(&unbounded), 3);

        let capped = vk::SurfaceCapabilitiesKHR {
            min_image_count: 2,
            max_image_count: 2,
            ..Default::default()
        };
        assert_eq!(desired_image_count(&capped), 2);
    }
}
