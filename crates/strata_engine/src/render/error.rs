//! Vulkan error types

use ash::vk;
use thiserror::Error;

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No physical device exposes the required queues and extensions
    #[error("No suitable GPU found")]
    NoSuitableDevice,

    /// No suitable memory type found for allocation
    #[error("No compatible memory type")]
    NoSuitableMemoryType,

    /// The surface reports no usable format
    #[error("Surface reports no supported format")]
    UnsupportedSurfaceFormat,

    /// None of the candidate depth formats can back a depth attachment
    #[error("Failed to find supported depth format")]
    UnsupportedDepthFormat,

    /// Requested image layout transition has no barrier mapping
    #[error("Unsupported layout transition: {old:?} -> {new:?}")]
    UnsupportedLayoutTransition {
        /// Layout the image is currently in
        old: vk::ImageLayout,
        /// Layout that was requested
        new: vk::ImageLayout,
    },

    /// A transfer would touch bytes outside its source or destination
    #[error("Transfer of {size} bytes at offset {offset} exceeds capacity {capacity}")]
    TransferOutOfBounds {
        /// Byte offset of the write
        offset: vk::DeviceSize,
        /// Number of bytes written
        size: vk::DeviceSize,
        /// Size of the resource being read or written
        capacity: vk::DeviceSize,
    },

    /// An image copy region does not fit one of the images
    #[error("Copy region {width}x{height} exceeds image extent {image_width}x{image_height}")]
    ImageRegionOutOfBounds {
        /// Region width in texels
        width: u32,
        /// Region height in texels
        height: u32,
        /// Width of the smaller image
        image_width: u32,
        /// Height of the smaller image
        image_height: u32,
    },

    /// The swapchain no longer matches the surface and must be recreated
    #[error("Swapchain is out of date")]
    SwapchainOutOfDate,
}

impl From<vk::Result> for VulkanError {
    fn from(result: vk::Result) -> Self {
        if result == vk::Result::ERROR_OUT_OF_DATE_KHR {
            Self::SwapchainOutOfDate
        } else {
            Self::Api(result)
        }
    }
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

/// Fail unless `len` bytes starting at `offset` fit inside `capacity`
pub fn check_range(offset: vk::DeviceSize, len: vk::DeviceSize, capacity: vk::DeviceSize) -> VulkanResult<()> {
    match offset.checked_add(len) {
        Some(end) if end <= capacity => Ok(()),
        _ => Err(VulkanError::TransferOutOfBounds {
            offset,
            size: len,
            capacity,
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_out_of_date_maps_to_dedicated_variant() {
        let error = VulkanError::from(vk::Result::ERROR_OUT_OF_DATE_KHR);
        assert!(matches!(error, VulkanError::SwapchainOutOfDate));
    }

    #[test]
    fn test_other_results_stay_api_errors() {
        let error = VulkanError::from(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        assert!(matches!(error, VulkanError::Api(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY)));
    }

    #[test]
    fn test_check_range_edges() {
        assert!(check_range(0, 16, 16).is_ok());
        assert!(check_range(16, 0, 16).is_ok());
        assert!(matches!(
            check_range(8, 9, 16),
            Err(VulkanError::TransferOutOfBounds { offset: 8, size: 9, capacity: 16 })
        ));
        assert!(check_range(u64::MAX, 2, u64::MAX).is_err());
    }
}
