// Vulkan frame backend
//
// Builds every long-lived GPU object in lifecycle order and implements the
// per-frame steps the frame loop sequences:
//
//   device (instance, debug, surface, GPU, queue)
//     -> swapchain + views
//     -> command pool -> frame slots
//     -> allocator -> intermediate image -> descriptors -> pipeline
//
// Teardown waits for the device to go idle, then runs in exactly the reverse
// order: the compute pass explicitly, everything else through field drop
// order. A failed `create` unwinds the same way through its locals.

use anyhow::{Context, Result};
use ash::vk;
use raw_window_handle::{HasRawDisplayHandle, HasRawWindowHandle};
use std::sync::Arc;
use winit::window::Window;

use crate::backend::allocator::ResourceAllocator;
use crate::backend::barrier::{self, Stage};
use crate::backend::compositor::Compositor;
use crate::backend::pipeline::{ComputePass, INTERMEDIATE_FORMAT};
use crate::backend::shader::read_kernel;
use crate::backend::sync::{FrameSlot, FrameSlots};
use crate::backend::{Swapchain, VulkanDevice};
use crate::config::Config;
use crate::error::RenderError;
use crate::frame_loop::{DeviceIdle, FrameBackend, FrameLoop};
use crate::frame_ring::FrameRing;

/// IMPORTANT: Field order matters for Drop! Fields are declared newest
/// first, so they drop in reverse creation order after `Drop::drop` has
/// waited for the device and destroyed the compute pass.
pub struct VulkanBackend {
    compositor: Compositor,
    compute_pass: ComputePass,
    allocator: ResourceAllocator,
    frame_slots: FrameSlots,
    swapchain: Swapchain,
    device: Arc<VulkanDevice>,

    // The blit is the first command touching the acquired image
    wait_stages: [vk::PipelineStageFlags; 1],
}

/// Bring up the whole GPU side for `window` and wrap it in a frame loop.
pub fn create(window: &Window, config: &Config) -> Result<FrameLoop<VulkanBackend>> {
    log::info!("Initializing Vulkan...");

    // Read the kernel first so a missing file fails before any GPU work
    let kernel = read_kernel(&config.kernel.path)?;

    let enable_validation = cfg!(debug_assertions) && config.debug.validation_layers;
    let device = VulkanDevice::new(
        &config.window.title,
        enable_validation,
        window.raw_display_handle(),
        window.raw_window_handle(),
    )?;

    let swapchain = Swapchain::new(device.clone(), config.window.width, config.window.height)?;

    let frame_slots = FrameSlots::new(device.clone(), swapchain.images.len())?;
    // The ring cycles copies of the handles; `frame_slots` owns them
    let ring = FrameRing::new(frame_slots.slots().to_vec());

    let mut allocator = ResourceAllocator::new(device.clone())
        .context("Failed to create GPU allocator")?;
    let compute_pass = ComputePass::new(&device, &mut allocator, swapchain.extent, &kernel)?;
    let compositor = Compositor::new(&device, INTERMEDIATE_FORMAT);

    log::info!("Vulkan initialized successfully!");

    let backend = VulkanBackend {
        compositor,
        compute_pass,
        allocator,
        frame_slots,
        swapchain,
        device,
        wait_stages: [vk::PipelineStageFlags::TRANSFER],
    };
    Ok(FrameLoop::new(backend, ring))
}

impl FrameBackend for VulkanBackend {
    type Slot = FrameSlot;

    fn image_count(&self) -> usize {
        self.swapchain.images.len()
    }

    fn reclaim(&mut self, slot: &FrameSlot) -> Result<(), RenderError> {
        let fences = [slot.in_flight];
        unsafe {
            self.device.device.wait_for_fences(&fences, true, u64::MAX)?;
            self.device.device.reset_fences(&fences)?;
        }
        Ok(())
    }

    fn acquire(&mut self, slot: &FrameSlot) -> Result<u32, RenderError> {
        self.swapchain.acquire(slot.image_acquired)
    }

    fn record(&mut self, slot: &FrameSlot, image_index: u32) -> Result<(), RenderError> {
        let device = &self.device.device;
        let cmd = slot.command_buffer;
        let intermediate = self.compute_pass.target();
        let presentable = self.swapchain.images[image_index as usize];

        unsafe {
            device.reset_command_buffer(cmd, vk::CommandBufferResetFlags::empty())?;
            let begin_info = vk::CommandBufferBeginInfo::builder()
                .flags(vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT);
            device.begin_command_buffer(cmd, &begin_info)?;
        }

        barrier::record_stage(device, cmd, Stage::Dispatch, intermediate, presentable);
        self.compute_pass.dispatch(device, cmd);

        barrier::record_stage(device, cmd, Stage::Blit, intermediate, presentable);
        self.compositor.blit(
            device,
            cmd,
            intermediate,
            self.compute_pass.extent(),
            presentable,
            self.swapchain.extent,
        );

        barrier::record_stage(device, cmd, Stage::Present, intermediate, presentable);

        unsafe { device.end_command_buffer(cmd)? };
        Ok(())
    }

    fn submit(&mut self, slot: &FrameSlot) -> Result<(), RenderError> {
        let wait_semaphores = [slot.image_acquired];
        let signal_semaphores = [slot.render_complete];
        let command_buffers = [slot.command_buffer];

        let submit_info = vk::SubmitInfo::builder()
            .wait_semaphores(&wait_semaphores)
            .wait_dst_stage_mask(&self.wait_stages)
            .command_buffers(&command_buffers)
            .signal_semaphores(&signal_semaphores);

        unsafe {
            self.device.device.queue_submit(
                self.device.queue,
                &[submit_info.build()],
                slot.in_flight,
            )?;
        }
        Ok(())
    }

    fn present(&mut self, slot: &FrameSlot, image_index: u32) -> Result<(), RenderError> {
        self.swapchain
            .present(self.device.queue, image_index, &[slot.render_complete])
    }

    fn wait_idle(&mut self) -> Result<DeviceIdle, RenderError> {
        self.device.wait_idle()
    }

    fn release(self, slots: Vec<FrameSlot>, _idle: DeviceIdle) {
        log::info!("Cleaning up Vulkan resources...");
        debug_assert_eq!(slots.len(), self.frame_slots.len());
        drop(self);
        log::info!("Cleanup complete");
    }
}

impl Drop for VulkanBackend {
    fn drop(&mut self) {
        // Nothing may be destroyed while a submission can still reference it
        if let Err(e) = self.device.wait_idle() {
            log::error!("Device did not go idle before teardown: {}", e);
        }

        self.compute_pass.destroy(&self.device.device, &mut self.allocator);
        log::debug!("Live allocations at teardown: {}", self.allocator.live_allocations());

        // Then, by declaration order: allocator, frame slots, swapchain, and
        // the last device reference (device, surface, messenger, instance)
    }
}
