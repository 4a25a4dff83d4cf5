// Resource allocator - device-memory-backed images and buffers
//
// Creation allocates memory through gpu-allocator and binds it in the same
// call; callers never see a half-built resource. Destruction releases the
// view (images), the handle and the memory together.
//
// The allocator is used from the render thread only and takes `&mut self`,
// so there is no internal locking.

use ash::vk;
use gpu_allocator::vulkan::{
    Allocation, AllocationCreateDesc, AllocationScheme, Allocator, AllocatorCreateDesc,
};
use gpu_allocator::MemoryLocation;
use std::collections::HashSet;
use std::sync::Arc;

use super::VulkanDevice;
use crate::error::RenderError;

/// Identifies one live allocation in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AllocationId(u64);

/// Tracks which allocations are alive.
#[derive(Debug, Default)]
pub struct AllocationLedger {
    next: u64,
    live: HashSet<AllocationId>,
}

impl AllocationLedger {
    pub fn track(&mut self) -> AllocationId {
        let id = AllocationId(self.next);
        self.next += 1;
        self.live.insert(id);
        id
    }

    /// Panics if `id` is not live: releasing twice is a programming error.
    pub fn release(&mut self, id: AllocationId) {
        assert!(
            self.live.remove(&id),
            "allocation {id:?} released twice or never created"
        );
    }

    pub fn live_count(&self) -> usize {
        self.live.len()
    }

    /// Release `id` for a resource about to be destroyed. Panics unless the
    /// resource is fully valid: destroying a half-built resource is a bug.
    pub fn retire(&mut self, id: AllocationId, fully_valid: bool, what: &str) {
        assert!(fully_valid, "destroying {what} that is not fully valid");
        self.release(id);
    }
}

/// Image with its own memory and a 2-D color view.
pub struct Image {
    pub handle: vk::Image,
    pub view: vk::ImageView,
    pub extent: vk::Extent3D,
    allocation: Option<Allocation>,
    id: AllocationId,
}

impl Image {
    pub fn is_valid(&self) -> bool {
        self.handle != vk::Image::null()
            && self.view != vk::ImageView::null()
            && self.allocation.is_some()
    }

    pub fn extent_2d(&self) -> vk::Extent2D {
        vk::Extent2D {
            width: self.extent.width,
            height: self.extent.height,
        }
    }
}

pub struct Buffer {
    pub handle: vk::Buffer,
    allocation: Option<Allocation>,
    id: AllocationId,
}

impl Buffer {
    pub fn is_valid(&self) -> bool {
        self.handle != vk::Buffer::null() && self.allocation.is_some()
    }
}

pub struct ResourceAllocator {
    // Declared before `device` so it is dropped while the device still exists
    allocator: Allocator,
    ledger: AllocationLedger,
    device: Arc<VulkanDevice>,
}

impl ResourceAllocator {
    pub fn new(device: Arc<VulkanDevice>) -> Result<Self, RenderError> {
        let allocator = Allocator::new(&AllocatorCreateDesc {
            instance: device.instance.clone(),
            device: device.device.clone(),
            physical_device: device.physical_device,
            debug_settings: Default::default(),
            buffer_device_address: false,
            allocation_sizes: Default::default(),
        })?;

        log::info!("Created GPU allocator");
        Ok(Self {
            allocator,
            ledger: AllocationLedger::default(),
            device,
        })
    }

    pub fn live_allocations(&self) -> usize {
        self.ledger.live_count()
    }

    pub fn create_image(
        &mut self,
        format: vk::Format,
        extent: vk::Extent2D,
        usage: vk::ImageUsageFlags,
    ) -> Result<Image, RenderError> {
        let owner = Arc::clone(&self.device);
        let device = &owner.device;
        let extent = vk::Extent3D {
            width: extent.width,
            height: extent.height,
            depth: 1,
        };

        let image_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(format)
            .extent(extent)
            .mip_levels(1)
            .array_layers(1)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .initial_layout(vk::ImageLayout::UNDEFINED);

        let handle = unsafe { device.create_image(&image_info, None) }?;
        let requirements = unsafe { device.get_image_memory_requirements(handle) };

        let allocation = match self.allocator.allocate(&AllocationCreateDesc {
            name: "image",
            requirements,
            location: MemoryLocation::GpuOnly,
            linear: false,
            allocation_scheme: AllocationScheme::DedicatedImage(handle),
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.destroy_image(handle, None) };
                return Err(e.into());
            }
        };

        let bound = unsafe { device.bind_image_memory(handle, allocation.memory(), allocation.offset()) };
        if let Err(e) = bound {
            self.discard(allocation);
            unsafe { device.destroy_image(handle, None) };
            return Err(e.into());
        }

        let view_info = vk::ImageViewCreateInfo::builder()
            .image(handle)
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(format)
            .subresource_range(vk::ImageSubresourceRange {
                aspect_mask: vk::ImageAspectFlags::COLOR,
                base_mip_level: 0,
                level_count: 1,
                base_array_layer: 0,
                layer_count: 1,
            });

        let view = match unsafe { device.create_image_view(&view_info, None) } {
            Ok(view) => view,
            Err(e) => {
                self.discard(allocation);
                unsafe { device.destroy_image(handle, None) };
                return Err(e.into());
            }
        };

        let id = self.ledger.track();
        log::debug!("Created image {:?} {}x{} ({:?})", format, extent.width, extent.height, id);

        Ok(Image {
            handle,
            view,
            extent,
            allocation: Some(allocation),
            id,
        })
    }

    // The pipeline binds no buffers yet; kept so buffers share the image lifecycle rules.
    #[allow(dead_code)]
    pub fn create_buffer(
        &mut self,
        size: vk::DeviceSize,
        usage: vk::BufferUsageFlags,
        location: MemoryLocation,
    ) -> Result<Buffer, RenderError> {
        let owner = Arc::clone(&self.device);
        let device = &owner.device;

        let buffer_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let handle = unsafe { device.create_buffer(&buffer_info, None) }?;
        let requirements = unsafe { device.get_buffer_memory_requirements(handle) };

        let allocation = match self.allocator.allocate(&AllocationCreateDesc {
            name: "buffer",
            requirements,
            location,
            linear: true,
            allocation_scheme: AllocationScheme::GpuAllocatorManaged,
        }) {
            Ok(allocation) => allocation,
            Err(e) => {
                unsafe { device.destroy_buffer(handle, None) };
                return Err(e.into());
            }
        };

        let bound =
            unsafe { device.bind_buffer_memory(handle, allocation.memory(), allocation.offset()) };
        if let Err(e) = bound {
            self.discard(allocation);
            unsafe { device.destroy_buffer(handle, None) };
            return Err(e.into());
        }

        Ok(Buffer {
            handle,
            allocation: Some(allocation),
            id: self.ledger.track(),
        })
    }

    /// Destroy the view, the image and its memory.
    ///
    /// The image must be fully valid; anything else is a bug in the caller.
    pub fn destroy_image(&mut self, mut image: Image) {
        self.ledger.retire(image.id, image.is_valid(), "an image");

        unsafe {
            self.device.device.destroy_image_view(image.view, None);
        }
        if let Some(allocation) = image.allocation.take() {
            self.discard(allocation);
        }
        unsafe {
            self.device.device.destroy_image(image.handle, None);
        }
    }

    #[allow(dead_code)]
    pub fn destroy_buffer(&mut self, mut buffer: Buffer) {
        self.ledger.retire(buffer.id, buffer.is_valid(), "a buffer");

        if let Some(allocation) = buffer.allocation.take() {
            self.discard(allocation);
        }
        unsafe {
            self.device.device.destroy_buffer(buffer.handle, None);
        }
    }

    fn discard(&mut self, allocation: Allocation) {
        if let Err(e) = self.allocator.free(allocation) {
            log::error!("Failed to free GPU allocation: {}", e);
        }
    }
}

impl Drop for ResourceAllocator {
    fn drop(&mut self) {
        let live = self.ledger.live_count();
        if live > 0 {
            log::warn!("Dropping allocator with {} live allocations", live);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn create_destroy_round_trip_restores_count() {
        let mut ledger = AllocationLedger::default();
        let before = ledger.live_count();

        let image = ledger.track();
        let buffer = ledger.track();
        assert_eq!(ledger.live_count(), before + 2);

        ledger.release(image);
        ledger.release(buffer);
        assert_eq!(ledger.live_count(), before);
    }

    #[test]
    fn ids_are_never_reused() {
        let mut ledger = AllocationLedger::default();
        let first = ledger.track();
        ledger.release(first);
        assert_ne!(ledger.track(), first);
    }

    #[test]
    #[should_panic(expected = "released twice")]
    fn double_release_fails_the_precondition() {
        let mut ledger = AllocationLedger::default();
        let id = ledger.track();
        ledger.release(id);
        ledger.release(id);
    }

    #[test]
    #[should_panic(expected = "never created")]
    fn releasing_an_unknown_id_fails_the_precondition() {
        let mut ledger = AllocationLedger::default();
        ledger.release(AllocationId(7));
    }

    #[test]
    fn partially_built_resources_are_invalid() {
        let image = half_built_image();
        assert!(!image.is_valid());
        assert_eq!(image.extent_2d(), vk::Extent2D { width: 4, height: 4 });

        let buffer = Buffer {
            handle: vk::Buffer::null(),
            allocation: None,
            id: AllocationId(1),
        };
        assert!(!buffer.is_valid());
    }

    fn half_built_image() -> Image {
        Image {
            handle: vk::Image::null(),
            view: vk::ImageView::null(),
            extent: vk::Extent3D {
                width: 4,
                height: 4,
                depth: 1,
            },
            allocation: None,
            id: AllocationId(0),
        }
    }

    #[test]
    #[should_panic(expected = "not fully valid")]
    fn destroying_a_half_built_image_fails_the_precondition() {
        let mut ledger = AllocationLedger::default();
        let mut image = half_built_image();
        image.id = ledger.track();
        ledger.retire(image.id, image.is_valid(), "an image");
    }

    #[test]
    fn retiring_a_valid_resource_releases_its_id() {
        let mut ledger = AllocationLedger::default();
        let id = ledger.track();
        ledger.retire(id, true, "a buffer");
        assert_eq!(ledger.live_count(), 0);
    }

    #[test]
    #[should_panic(expected = "released twice")]
    fn retiring_twice_fails_the_precondition() {
        let mut ledger = AllocationLedger::default();
        let id = ledger.track();
        ledger.retire(id, true, "a buffer");
        ledger.retire(id, true, "a buffer");
    }
}
