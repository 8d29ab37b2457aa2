//! Memory type and sharing selection

use ash::vk;

use crate::render::error::{VulkanError, VulkanResult};

/// First memory type allowed by `type_filter` whose flags contain every
/// requested property
pub fn find_memory_type(
    memory_properties: &vk::PhysicalDeviceMemoryProperties,
    type_filter: u32,
    properties: vk::MemoryPropertyFlags,
) -> VulkanResult<u32> {
    (0..memory_properties.memory_type_count)
        .find(|&index| {
            type_filter & (1 << index) != 0
                && memory_properties.memory_types[index as usize]
                    .property_flags
                    .contains(properties)
        })
        .ok_or(VulkanError::NoSuitableMemoryType)
}

/// Sharing mode for a resource used from `families`
///
/// Exclusive when only one distinct family is involved, concurrent across the
/// distinct families otherwise.
pub fn sharing_for(families: &[u32]) -> (vk::SharingMode, Vec<u32>) {
    let mut distinct: Vec<u32> = Vec::with_capacity(families.len());
    for &family in families {
        if !distinct.contains(&family) {
            distinct.push(family);
        }
    }

    if distinct.len() > 1 {
        (vk::SharingMode::CONCURRENT, distinct)
    } else {
        (vk::SharingMode::EXCLUSIVE, Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn properties(types: &[vk::MemoryPropertyFlags]) -> vk::PhysicalDeviceMemoryProperties {
        let mut properties = vk::PhysicalDeviceMemoryProperties::default();
        properties.memory_type_count = types.len() as u32;
        for (slot, flags) in properties.memory_types.iter_mut().zip(types) {
            slot.property_flags = *flags;
        }
        properties
    }

    #[test]
    fn test_first_matching_type_wins() {
        let props = properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
            vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
        ]);
        let wanted = vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT;
        assert_eq!(find_memory_type(&props, 0b111, wanted).unwrap(), 1);
    }

    #[test]
    fn test_type_filter_is_respected() {
        let props = properties(&[
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
        ]);
        assert_eq!(
            find_memory_type(&props, 0b10, vk::MemoryPropertyFlags::DEVICE_LOCAL).unwrap(),
            1
        );
    }

    #[test]
    fn test_no_match_is_an_error() {
        let props = properties(&[vk::MemoryPropertyFlags::DEVICE_LOCAL]);
        let result = find_memory_type(&props, 0b1, vk::MemoryPropertyFlags::HOST_VISIBLE);
        assert!(matches!(result, Err(VulkanError::NoSuitableMemoryType)));
    }

    #[test]
    fn test_single_family_is_exclusive() {
        let (mode, families) = sharing_for(&[2, 2]);
        assert_eq!(mode, vk::SharingMode::EXCLUSIVE);
        assert!(families.is_empty());
    }

    #[test]
    fn test_distinct_families_are_concurrent() {
        let (mode, families) = sharing_for(&[0, 1, 0]);
        assert_eq!(mode, vk::SharingMode::CONCURRENT);
        assert_eq!(families, vec![0, 1]);
    }
}
