// Compute pass - one pipeline writing one storage image
//
// Kernel contract (not queried, only assumed):
// - entry point `main`
// - local workgroup size 16x16x1
// - storage image at set 0, binding 0
//
// The descriptor set is written once at construction and never updated.

use anyhow::{Context, Result};
use ash::vk;
use glam::UVec3;
use std::ffi::CStr;

use super::allocator::{Image, ResourceAllocator};
use super::shader::create_shader_module;
use super::VulkanDevice;
use crate::teardown::ReleaseStack;

pub const KERNEL_ENTRY: &CStr = c"main";
pub const WORKGROUP_SIZE: u32 = 16;
pub const INTERMEDIATE_FORMAT: vk::Format = vk::Format::R32G32B32A32_SFLOAT;

/// Workgroups needed to cover `extent`: `ceil((n + 15) / 16)` per axis.
///
/// This always dispatches at least one extra column/row of groups past an
/// exact multiple of 16; the kernel discards out-of-range invocations.
pub fn dispatch_grid(extent: vk::Extent2D) -> UVec3 {
    let groups = |n: u32| (n + WORKGROUP_SIZE - 1).div_ceil(WORKGROUP_SIZE);
    UVec3::new(groups(extent.width), groups(extent.height), 1)
}

/// Everything the pass owns, in creation order.
enum PassPart {
    Target(Image),
    DescriptorPool(vk::DescriptorPool),
    SetLayout(vk::DescriptorSetLayout),
    PipelineLayout(vk::PipelineLayout),
    Pipeline(vk::Pipeline),
}

impl PassPart {
    fn destroy(self, device: &ash::Device, allocator: &mut ResourceAllocator) {
        unsafe {
            match self {
                PassPart::Target(image) => allocator.destroy_image(image),
                // Frees the set with it
                PassPart::DescriptorPool(pool) => device.destroy_descriptor_pool(pool, None),
                PassPart::SetLayout(layout) => device.destroy_descriptor_set_layout(layout, None),
                PassPart::PipelineLayout(layout) => device.destroy_pipeline_layout(layout, None),
                PassPart::Pipeline(pipeline) => device.destroy_pipeline(pipeline, None),
            }
        }
    }
}

struct Handles {
    target: vk::Image,
    extent: vk::Extent2D,
    descriptor_set: vk::DescriptorSet,
    layout: vk::PipelineLayout,
    pipeline: vk::Pipeline,
}

pub struct ComputePass {
    pipeline: vk::Pipeline,
    layout: vk::PipelineLayout,
    descriptor_set: vk::DescriptorSet,
    target: vk::Image,
    extent: vk::Extent2D,
    grid: UVec3,
    parts: ReleaseStack<PassPart>,
}

impl ComputePass {
    /// Build the pass. On failure everything created so far is destroyed
    /// before the error is returned.
    pub fn new(
        device: &VulkanDevice,
        allocator: &mut ResourceAllocator,
        extent: vk::Extent2D,
        kernel: &[u32],
    ) -> Result<Self> {
        let mut parts = ReleaseStack::default();
        let handles = match Self::build(device, allocator, extent, kernel, &mut parts) {
            Ok(handles) => handles,
            Err(e) => {
                parts.release(|part| part.destroy(&device.device, allocator));
                return Err(e);
            }
        };

        let grid = dispatch_grid(handles.extent);
        log::info!(
            "Compute pass: {}x{} target, {}x{}x{} workgroups",
            handles.extent.width,
            handles.extent.height,
            grid.x,
            grid.y,
            grid.z
        );

        Ok(Self {
            pipeline: handles.pipeline,
            layout: handles.layout,
            descriptor_set: handles.descriptor_set,
            target: handles.target,
            extent: handles.extent,
            grid,
            parts,
        })
    }

    fn build(
        device: &VulkanDevice,
        allocator: &mut ResourceAllocator,
        extent: vk::Extent2D,
        kernel: &[u32],
        parts: &mut ReleaseStack<PassPart>,
    ) -> Result<Handles> {
        let target = allocator
            .create_image(
                INTERMEDIATE_FORMAT,
                extent,
                vk::ImageUsageFlags::STORAGE | vk::ImageUsageFlags::TRANSFER_SRC,
            )
            .context("Failed to create intermediate image")?;
        let (target_handle, target_view, extent) = (target.handle, target.view, target.extent_2d());
        parts.push(PassPart::Target(target));

        let (set_layout, descriptor_set) =
            create_descriptor_resources(&device.device, target_view, parts)?;

        // Pipeline layout
        let set_layouts = [set_layout];
        let layout_info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);
        let layout = unsafe { device.device.create_pipeline_layout(&layout_info, None) }
            .context("Failed to create pipeline layout")?;
        parts.push(PassPart::PipelineLayout(layout));

        // Compute pipeline
        let module = create_shader_module(device, kernel)?;
        let stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(module)
            .name(KERNEL_ENTRY)
            .build();
        let pipeline_info = vk::ComputePipelineCreateInfo::builder()
            .stage(stage)
            .layout(layout)
            .build();

        let pipelines = unsafe {
            device
                .device
                .create_compute_pipelines(vk::PipelineCache::null(), &[pipeline_info], None)
        };
        // The module is only needed while the pipeline is being built
        unsafe { device.device.destroy_shader_module(module, None) };
        let pipeline = pipelines
            .map_err(|(_, e)| e)
            .context("Failed to create compute pipeline")?[0];
        parts.push(PassPart::Pipeline(pipeline));

        Ok(Handles {
            target: target_handle,
            extent,
            descriptor_set,
            layout,
            pipeline,
        })
    }

    /// The image the kernel writes.
    pub fn target(&self) -> vk::Image {
        self.target
    }

    pub fn extent(&self) -> vk::Extent2D {
        self.extent
    }

    /// Bind and dispatch. The target must already be in GENERAL layout.
    pub fn dispatch(&self, device: &ash::Device, cmd: vk::CommandBuffer) {
        unsafe {
            device.cmd_bind_pipeline(cmd, vk::PipelineBindPoint::COMPUTE, self.pipeline);
            device.cmd_bind_descriptor_sets(
                cmd,
                vk::PipelineBindPoint::COMPUTE,
                self.layout,
                0,
                &[self.descriptor_set],
                &[],
            );
            device.cmd_dispatch(cmd, self.grid.x, self.grid.y, self.grid.z);
        }
    }

    /// Destroy in reverse creation order: pipeline, layouts, descriptors,
    /// image. Calling it again does nothing.
    pub fn destroy(&mut self, device: &ash::Device, allocator: &mut ResourceAllocator) {
        self.parts.release(|part| part.destroy(device, allocator));
    }
}

fn create_descriptor_resources(
    device: &ash::Device,
    target_view: vk::ImageView,
    parts: &mut ReleaseStack<PassPart>,
) -> Result<(vk::DescriptorSetLayout, vk::DescriptorSet)> {
    let pool_sizes = [vk::DescriptorPoolSize {
        ty: vk::DescriptorType::STORAGE_IMAGE,
        descriptor_count: 1,
    }];
    let pool_info = vk::DescriptorPoolCreateInfo::builder()
        .max_sets(1)
        .pool_sizes(&pool_sizes);
    let pool = unsafe { device.create_descriptor_pool(&pool_info, None) }
        .context("Failed to create descriptor pool")?;
    parts.push(PassPart::DescriptorPool(pool));

    let bindings = [vk::DescriptorSetLayoutBinding::builder()
        .binding(0)
        .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
        .descriptor_count(1)
        .stage_flags(vk::ShaderStageFlags::COMPUTE)
        .build()];
    let layout_info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);
    let set_layout = unsafe { device.create_descriptor_set_layout(&layout_info, None) }
        .context("Failed to create descriptor set layout")?;
    parts.push(PassPart::SetLayout(set_layout));

    let set_layouts = [set_layout];
    let alloc_info = vk::DescriptorSetAllocateInfo::builder()
        .descriptor_pool(pool)
        .set_layouts(&set_layouts);
    let set = unsafe { device.allocate_descriptor_sets(&alloc_info) }
        .context("Failed to allocate descriptor set")?[0];

    let image_info = [vk::DescriptorImageInfo {
        sampler: vk::Sampler::null(),
        image_view: target_view,
        image_layout: vk::ImageLayout::GENERAL,
    }];
    let write = vk::WriteDescriptorSet::builder()
        .dst_set(set)
        .dst_binding(0)
        .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
        .image_info(&image_info)
        .build();
    unsafe { device.update_descriptor_sets(&[write], &[]) };

    Ok((set_layout, set))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(width: u32, height: u32) -> UVec3 {
        dispatch_grid(vk::Extent2D { width, height })
    }

    #[test]
    fn default_window_needs_33_groups_per_axis() {
        assert_eq!(grid(500, 500), UVec3::new(33, 33, 1));
    }

    #[test]
    fn exact_multiple_still_rounds_up() {
        // ceil(31 / 16) = 2, not 1
        assert_eq!(grid(16, 16), UVec3::new(2, 2, 1));
        assert_eq!(grid(32, 48), UVec3::new(3, 4, 1));
    }

    #[test]
    fn grid_always_covers_the_extent() {
        for n in [1, 2, 15, 17, 31, 33, 499, 500, 1920] {
            let g = grid(n, n);
            assert!(g.x * WORKGROUP_SIZE >= n, "{n}");
            assert!(g.y * WORKGROUP_SIZE >= n, "{n}");
            assert_eq!(g.z, 1);
        }
        assert_eq!(grid(1, 17), UVec3::new(1, 2, 1));
    }
}
