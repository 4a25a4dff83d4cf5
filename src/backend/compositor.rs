// Compositor - copies the compute output onto the presentable image
//
// Full extent to full extent, one mip, one layer. No color-space handling:
// the blit converts RGBA32F to whatever format the surface picked.

use ash::vk;

use super::VulkanDevice;

pub struct Compositor {
    linear_supported: bool,
}

impl Compositor {
    /// Query once whether `source_format` may be blitted with linear filtering.
    pub fn new(device: &VulkanDevice, source_format: vk::Format) -> Self {
        let properties = unsafe {
            device
                .instance
                .get_physical_device_format_properties(device.physical_device, source_format)
        };
        let linear_supported = properties
            .optimal_tiling_features
            .contains(vk::FormatFeatureFlags::SAMPLED_IMAGE_FILTER_LINEAR);

        if !linear_supported {
            log::info!("{:?} has no linear filtering, resampling blits use NEAREST", source_format);
        }
        Self { linear_supported }
    }

    /// Blit all of `source` (TRANSFER_SRC) into `target` (TRANSFER_DST).
    pub fn blit(
        &self,
        device: &ash::Device,
        cmd: vk::CommandBuffer,
        source: vk::Image,
        source_extent: vk::Extent2D,
        target: vk::Image,
        target_extent: vk::Extent2D,
    ) {
        let region = blit_region(source_extent, target_extent);
        let filter = choose_filter(source_extent, target_extent, self.linear_supported);

        unsafe {
            device.cmd_blit_image(
                cmd,
                source,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                target,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
                filter,
            );
        }
    }
}

/// LINEAR when the blit resamples and the format allows it.
pub fn choose_filter(
    source: vk::Extent2D,
    target: vk::Extent2D,
    linear_supported: bool,
) -> vk::Filter {
    if source != target && linear_supported {
        vk::Filter::LINEAR
    } else {
        vk::Filter::NEAREST
    }
}

pub fn blit_region(source: vk::Extent2D, target: vk::Extent2D) -> vk::ImageBlit {
    let layers = vk::ImageSubresourceLayers {
        aspect_mask: vk::ImageAspectFlags::COLOR,
        mip_level: 0,
        base_array_layer: 0,
        layer_count: 1,
    };
    vk::ImageBlit {
        src_subresource: layers,
        src_offsets: [vk::Offset3D::default(), far_corner(source)],
        dst_subresource: layers,
        dst_offsets: [vk::Offset3D::default(), far_corner(target)],
    }
}

fn far_corner(extent: vk::Extent2D) -> vk::Offset3D {
    vk::Offset3D {
        x: extent.width as i32,
        y: extent.height as i32,
        z: 1,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQUARE: vk::Extent2D = vk::Extent2D {
        width: 500,
        height: 500,
    };
    const WIDE: vk::Extent2D = vk::Extent2D {
        width: 800,
        height: 450,
    };

    #[test]
    fn region_spans_both_full_extents() {
        let region = blit_region(SQUARE, WIDE);
        assert_eq!(region.src_offsets[0], vk::Offset3D { x: 0, y: 0, z: 0 });
        assert_eq!(region.src_offsets[1], vk::Offset3D { x: 500, y: 500, z: 1 });
        assert_eq!(region.dst_offsets[1], vk::Offset3D { x: 800, y: 450, z: 1 });
        assert_eq!(region.dst_subresource.layer_count, 1);
        assert_eq!(region.src_subresource.mip_level, 0);
    }

    #[test]
    fn resampling_uses_linear_when_supported() {
        assert_eq!(choose_filter(SQUARE, WIDE, true), vk::Filter::LINEAR);
        assert_eq!(choose_filter(SQUARE, WIDE, false), vk::Filter::NEAREST);
    }

    #[test]
    fn same_extent_copies_texel_for_texel() {
        assert_eq!(choose_filter(SQUARE, SQUARE, true), vk::Filter::NEAREST);
    }
}
