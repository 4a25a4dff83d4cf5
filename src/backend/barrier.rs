// Layout transitions
//
// Every transition is one image barrier from ALL_COMMANDS to ALL_COMMANDS.
// Coarse, but the frame is a single pass so there is nothing to overlap.
//
// Nothing is tracked between frames: each frame re-declares UNDEFINED as the
// starting layout of both images, which discards their contents. That is only
// valid because the dispatch overwrites the whole intermediate image and the
// blit overwrites the whole presentable image. Partial updates would need
// real per-image layout tracking.

use ash::vk;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub old: vk::ImageLayout,
    pub new: vk::ImageLayout,
}

/// Which of the two per-frame images a transition applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Target {
    /// The compute pass output.
    Intermediate,
    /// The acquired swapchain image.
    Presentable,
}

/// The point in the frame a group of transitions prepares for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Dispatch,
    Blit,
    Present,
}

impl Stage {
    pub const ORDER: [Stage; 3] = [Stage::Dispatch, Stage::Blit, Stage::Present];

    pub fn transitions(self) -> &'static [(Target, Transition)] {
        match self {
            // Unordered compute writes
            Stage::Dispatch => &[(
                Target::Intermediate,
                Transition {
                    old: vk::ImageLayout::UNDEFINED,
                    new: vk::ImageLayout::GENERAL,
                },
            )],
            Stage::Blit => &[
                (
                    Target::Intermediate,
                    Transition {
                        old: vk::ImageLayout::GENERAL,
                        new: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                    },
                ),
                (
                    Target::Presentable,
                    Transition {
                        old: vk::ImageLayout::UNDEFINED,
                        new: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    },
                ),
            ],
            Stage::Present => &[(
                Target::Presentable,
                Transition {
                    old: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    new: vk::ImageLayout::PRESENT_SRC_KHR,
                },
            )],
        }
    }
}

const COLOR_RANGE: vk::ImageSubresourceRange = vk::ImageSubresourceRange {
    aspect_mask: vk::ImageAspectFlags::COLOR,
    base_mip_level: 0,
    level_count: 1,
    base_array_layer: 0,
    layer_count: 1,
};

pub fn transition_barrier(image: vk::Image, transition: Transition) -> vk::ImageMemoryBarrier {
    vk::ImageMemoryBarrier::builder()
        .src_access_mask(vk::AccessFlags::MEMORY_WRITE)
        .dst_access_mask(vk::AccessFlags::MEMORY_READ | vk::AccessFlags::MEMORY_WRITE)
        .old_layout(transition.old)
        .new_layout(transition.new)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(COLOR_RANGE)
        .build()
}

/// Record every transition `stage` needs as a single pipeline barrier.
pub fn record_stage(
    device: &ash::Device,
    cmd: vk::CommandBuffer,
    stage: Stage,
    intermediate: vk::Image,
    presentable: vk::Image,
) {
    let barriers: Vec<vk::ImageMemoryBarrier> = stage
        .transitions()
        .iter()
        .map(|&(target, transition)| {
            let image = match target {
                Target::Intermediate => intermediate,
                Target::Presentable => presentable,
            };
            transition_barrier(image, transition)
        })
        .collect();

    unsafe {
        device.cmd_pipeline_barrier(
            cmd,
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::PipelineStageFlags::ALL_COMMANDS,
            vk::DependencyFlags::empty(),
            &[],
            &[],
            &barriers,
        );
    }
}
