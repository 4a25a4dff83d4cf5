// Per-frame recording and synchronization state
//
// Each FrameSlot is reused every N frames (N = swapchain image count).
// The fence gates CPU reuse; the two semaphores order GPU work:
//   acquire --(image_acquired)--> submit --(render_complete)--> present
//
// `FrameSlots` owns the command pool and every slot allocated from it, so
// dropping it releases the slots' sync objects before the pool.

use anyhow::{Context, Result};
use ash::vk;
use std::sync::Arc;

use super::VulkanDevice;
use crate::teardown::ReleaseStack;

/// Frame slot - one per presentable image. Plain handles; `FrameSlots` owns them.
#[derive(Debug, Clone, Copy)]
pub struct FrameSlot {
    pub command_buffer: vk::CommandBuffer,
    pub in_flight: vk::Fence,
    pub image_acquired: vk::Semaphore,
    pub render_complete: vk::Semaphore,
}

enum SyncObject {
    Fence(vk::Fence),
    Semaphore(vk::Semaphore),
}

impl SyncObject {
    fn destroy(self, device: &ash::Device) {
        unsafe {
            match self {
                SyncObject::Fence(fence) => device.destroy_fence(fence, None),
                SyncObject::Semaphore(semaphore) => device.destroy_semaphore(semaphore, None),
            }
        }
    }
}

impl FrameSlot {
    /// Build one slot. If any sync object fails, the ones already created are
    /// destroyed; the command buffer goes back with the pool.
    fn new(device: &ash::Device, pool: vk::CommandPool) -> Result<Self> {
        let alloc_info = vk::CommandBufferAllocateInfo::builder()
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY)
            .command_buffer_count(1);
        let command_buffer = unsafe { device.allocate_command_buffers(&alloc_info) }
            .context("Failed to allocate command buffer")?[0];

        let mut built = ReleaseStack::default();
        match Self::create_sync_objects(device, &mut built) {
            Ok((in_flight, image_acquired, render_complete)) => {
                // Owned by the slot from here on
                built.commit();
                Ok(Self {
                    command_buffer,
                    in_flight,
                    image_acquired,
                    render_complete,
                })
            }
            Err(e) => {
                built.release(|object| object.destroy(device));
                Err(e)
            }
        }
    }

    fn create_sync_objects(
        device: &ash::Device,
        built: &mut ReleaseStack<SyncObject>,
    ) -> Result<(vk::Fence, vk::Semaphore, vk::Semaphore)> {
        let semaphore_info = vk::SemaphoreCreateInfo::builder();
        // Start signaled so the first wait on a fresh slot returns immediately
        let fence_info = vk::FenceCreateInfo::builder().flags(vk::FenceCreateFlags::SIGNALED);

        let in_flight = unsafe { device.create_fence(&fence_info, None) }
            .context("Failed to create in-flight fence")?;
        built.push(SyncObject::Fence(in_flight));

        let image_acquired = unsafe { device.create_semaphore(&semaphore_info, None) }
            .context("Failed to create image-acquired semaphore")?;
        built.push(SyncObject::Semaphore(image_acquired));

        let render_complete = unsafe { device.create_semaphore(&semaphore_info, None) }
            .context("Failed to create render-complete semaphore")?;
        built.push(SyncObject::Semaphore(render_complete));

        Ok((in_flight, image_acquired, render_complete))
    }

    fn destroy(&self, device: &ash::Device) {
        unsafe {
            device.destroy_semaphore(self.render_complete, None);
            device.destroy_semaphore(self.image_acquired, None);
            device.destroy_fence(self.in_flight, None);
        }
    }
}

/// Command pool plus one slot per presentable image.
pub struct FrameSlots {
    pool: vk::CommandPool,
    slots: Vec<FrameSlot>,
    device: Arc<VulkanDevice>,
}

impl FrameSlots {
    pub fn new(device: Arc<VulkanDevice>, count: usize) -> Result<Self> {
        // RESET: each slot resets its own buffer before re-recording
        let pool_info = vk::CommandPoolCreateInfo::builder()
            .queue_family_index(device.queue_family)
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER);

        let pool = unsafe { device.device.create_command_pool(&pool_info, None) }
            .context("Failed to create command pool")?;

        // From here on a failure drops `this`, which releases what exists
        let mut this = Self {
            pool,
            slots: Vec::with_capacity(count),
            device,
        };
        for _ in 0..count {
            let slot = FrameSlot::new(&this.device.device, this.pool)?;
            this.slots.push(slot);
        }

        log::info!("Created {} frame slots", this.slots.len());
        Ok(this)
    }

    pub fn slots(&self) -> &[FrameSlot] {
        &self.slots
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }
}

impl Drop for FrameSlots {
    fn drop(&mut self) {
        unsafe {
            for slot in self.slots.drain(..).rev() {
                slot.destroy(&self.device.device);
            }
            // Frees the command buffers with it
            self.device.device.destroy_command_pool(self.pool, None);
        }
    }
}
