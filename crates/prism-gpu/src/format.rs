//! Image format classification helpers.

use ash::vk;
use tracing::warn;

/// Returns `true` if the format has a depth component.
pub fn is_depth_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM
            | vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// Returns `true` if the format has a stencil component.
pub fn is_stencil_format(format: vk::Format) -> bool {
    matches!(
        format,
        vk::Format::D16_UNORM_S8_UINT
            | vk::Format::D24_UNORM_S8_UINT
            | vk::Format::D32_SFLOAT_S8_UINT
    )
}

/// The aspect mask implied by a format: depth (plus stencil where present)
/// for depth formats, color otherwise.
pub fn format_to_aspect_mask(format: vk::Format) -> vk::ImageAspectFlags {
    if is_depth_format(format) {
        let mut aspect = vk::ImageAspectFlags::DEPTH;
        if is_stencil_format(format) {
            aspect |= vk::ImageAspectFlags::STENCIL;
        }
        aspect
    } else {
        vk::ImageAspectFlags::COLOR
    }
}

/// Convert a raw sample count into the corresponding flag. Invalid counts
/// fall back to a single sample.
pub fn sample_count_to_flags(count: u32) -> vk::SampleCountFlags {
    match count {
        1 => vk::SampleCountFlags::TYPE_1,
        2 => vk::SampleCountFlags::TYPE_2,
        4 => vk::SampleCountFlags::TYPE_4,
        8 => vk::SampleCountFlags::TYPE_8,
        16 => vk::SampleCountFlags::TYPE_16,
        32 => vk::SampleCountFlags::TYPE_32,
        64 => vk::SampleCountFlags::TYPE_64,
        other => {
            warn!(count = other, "invalid sample count, falling back to 1");
            vk::SampleCountFlags::TYPE_1
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn depth_and_stencil_classification() {
        assert!(is_depth_format(vk::Format::D32_SFLOAT));
        assert!(!is_stencil_format(vk::Format::D32_SFLOAT));
        assert!(is_stencil_format(vk::Format::D24_UNORM_S8_UINT));
        assert!(!is_depth_format(vk::Format::R8G8B8A8_UNORM));
    }

    #[test]
    fn aspect_masks() {
        assert_eq!(
            format_to_aspect_mask(vk::Format::B8G8R8A8_SRGB),
            vk::ImageAspectFlags::COLOR
        );
        assert_eq!(
            format_to_aspect_mask(vk::Format::D32_SFLOAT),
            vk::ImageAspectFlags::DEPTH
        );
        assert_eq!(
            format_to_aspect_mask(vk::Format::D24_UNORM_S8_UINT),
            vk::ImageAspectFlags::DEPTH | vk::ImageAspectFlags::STENCIL
        );
    }

    #[test]
    fn sample_counts() {
        assert_eq!(sample_count_to_flags(4), vk::SampleCountFlags::TYPE_4);
        assert_eq!(sample_count_to_flags(3), vk::SampleCountFlags::TYPE_1);
    }
}
