//! Image layout transitions and mip-chain generation.
//!
//! Barriers are declarative: callers name the old and new layout, and the
//! access/stage masks come from a fixed lookup table per layout. This covers
//! render-target handoffs, staged texture uploads, and the serialized blit
//! chain used for mip generation. A transition the table does not recognize
//! falls back to an empty access mask with a logged warning.

use ash::vk;
use tracing::warn;

use crate::command::CommandBuffer;

/// Access mask associated with an image layout, per the fixed table.
///
/// Unrecognized layouts return an empty mask and log a warning; an empty
/// mask means the barrier orders execution but no memory dependency, which
/// is almost never what the caller wanted.
pub fn access_mask_for_layout(layout: vk::ImageLayout) -> vk::AccessFlags {
    match layout {
        vk::ImageLayout::UNDEFINED => vk::AccessFlags::empty(),
        vk::ImageLayout::PREINITIALIZED => vk::AccessFlags::HOST_WRITE,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => {
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE
        }
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL => vk::AccessFlags::TRANSFER_READ,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL => vk::AccessFlags::TRANSFER_WRITE,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => vk::AccessFlags::SHADER_READ,
        vk::ImageLayout::GENERAL => vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
        vk::ImageLayout::PRESENT_SRC_KHR => vk::AccessFlags::empty(),
        other => {
            warn!(
                "No access mask known for image layout {:?}; using an empty mask",
                other
            );
            vk::AccessFlags::empty()
        }
    }
}

/// Pipeline stage associated with an image layout, per the fixed table.
pub fn stage_mask_for_layout(layout: vk::ImageLayout) -> vk::PipelineStageFlags {
    match layout {
        vk::ImageLayout::UNDEFINED | vk::ImageLayout::PREINITIALIZED => {
            vk::PipelineStageFlags::TOP_OF_PIPE
        }
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL => {
            vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT
        }
        vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL => {
            vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS
        }
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL | vk::ImageLayout::TRANSFER_DST_OPTIMAL => {
            vk::PipelineStageFlags::TRANSFER
        }
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL => vk::PipelineStageFlags::FRAGMENT_SHADER,
        vk::ImageLayout::GENERAL => vk::PipelineStageFlags::COMPUTE_SHADER,
        vk::ImageLayout::PRESENT_SRC_KHR => vk::PipelineStageFlags::BOTTOM_OF_PIPE,
        _ => vk::PipelineStageFlags::ALL_COMMANDS,
    }
}

/// Records a layout transition barrier for an image subresource range.
pub fn transition_image(
    cmd: &CommandBuffer,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    subresource_range: vk::ImageSubresourceRange,
) {
    let barrier = vk::ImageMemoryBarrier::default()
        .src_access_mask(access_mask_for_layout(old_layout))
        .dst_access_mask(access_mask_for_layout(new_layout))
        .old_layout(old_layout)
        .new_layout(new_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(subresource_range);

    cmd.pipeline_barrier(
        stage_mask_for_layout(old_layout),
        stage_mask_for_layout(new_layout),
        &[barrier],
    );
}

/// Convenience transition covering a color image's full mip chain.
pub fn transition_color_image(
    cmd: &CommandBuffer,
    image: vk::Image,
    old_layout: vk::ImageLayout,
    new_layout: vk::ImageLayout,
    mip_levels: u32,
) {
    transition_image(
        cmd,
        image,
        old_layout,
        new_layout,
        vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: 0,
            level_count: mip_levels,
            base_array_layer: 0,
            layer_count: 1,
        },
    );
}

/// Generates a full mip chain by blitting each level from the previous one.
///
/// Level N is transitioned to `TRANSFER_SRC` once written, blitted into
/// level N+1, then moved to `SHADER_READ_ONLY`; the per-level barriers
/// serialize the blit source/destination dependency. On entry every level
/// must be in `TRANSFER_DST_OPTIMAL`; on return the whole chain is
/// `SHADER_READ_ONLY_OPTIMAL`.
pub fn generate_mipmaps(
    cmd: &CommandBuffer,
    image: vk::Image,
    width: u32,
    height: u32,
    mip_levels: u32,
) {
    let mut mip_width = width as i32;
    let mut mip_height = height as i32;

    for level in 1..mip_levels {
        let src_range = vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: level - 1,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        };

        // The previous level was a blit destination; make it readable.
        transition_image(
            cmd,
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            src_range,
        );

        let next_width = (mip_width / 2).max(1);
        let next_height = (mip_height / 2).max(1);

        let blit = vk::ImageBlit::default()
            .src_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: level - 1,
                base_array_layer: 0,
                layer_count: 1,
            })
            .src_offsets([
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D {
                    x: mip_width,
                    y: mip_height,
                    z: 1,
                },
            ])
            .dst_subresource(vk::ImageSubresourceLayers {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                mip_level: level,
                base_array_layer: 0,
                layer_count: 1,
            })
            .dst_offsets([
                vk::Offset3D { x: 0, y: 0, z: 0 },
                vk::Offset3D {
                    x: next_width,
                    y: next_height,
                    z: 1,
                },
            ]);

        cmd.blit_image(
            image,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            image,
            vk::ImageLayout::TRANSFER_DST_OPTIMAL,
            &[blit],
            vk::Filter::LINEAR,
        );

        // The source level is final; hand it to the shaders.
        transition_image(
            cmd,
            image,
            vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
            vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            src_range,
        );

        mip_width = next_width;
        mip_height = next_height;
    }

    // The last level was only ever a destination.
    transition_image(
        cmd,
        image,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        vk::ImageSubresourceRange {
            aspect_mask: vk::ImageAspectFlags::COLOR,
            base_mip_level: mip_levels - 1,
            level_count: 1,
            base_array_layer: 0,
            layer_count: 1,
        },
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_layout_access_masks() {
        assert_eq!(
            access_mask_for_layout(vk::ImageLayout::UNDEFINED),
            vk::AccessFlags::empty()
        );
        assert_eq!(
            access_mask_for_layout(vk::ImageLayout::TRANSFER_DST_OPTIMAL),
            vk::AccessFlags::TRANSFER_WRITE
        );
        assert_eq!(
            access_mask_for_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL),
            vk::AccessFlags::SHADER_READ
        );
        assert!(
            access_mask_for_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .contains(vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE)
        );
    }

    #[test]
    fn test_unrecognized_layout_falls_back_to_empty_mask() {
        // Not in the table; the helper warns and returns an empty mask.
        assert_eq!(
            access_mask_for_layout(vk::ImageLayout::DEPTH_READ_ONLY_STENCIL_ATTACHMENT_OPTIMAL),
            vk::AccessFlags::empty()
        );
    }

    #[test]
    fn test_stage_masks_pair_with_access_masks() {
        assert_eq!(
            stage_mask_for_layout(vk::ImageLayout::UNDEFINED),
            vk::PipelineStageFlags::TOP_OF_PIPE
        );
        assert_eq!(
            stage_mask_for_layout(vk::ImageLayout::TRANSFER_SRC_OPTIMAL),
            vk::PipelineStageFlags::TRANSFER
        );
        assert_eq!(
            stage_mask_for_layout(vk::ImageLayout::PRESENT_SRC_KHR),
            vk::PipelineStageFlags::BOTTOM_OF_PIPE
        );
    }
}
