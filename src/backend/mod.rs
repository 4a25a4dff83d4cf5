// Backend module - Vulkan abstraction layer
//
// Design: Thin wrapper around ash. Each component owns what it creates and
// receives the shared `VulkanDevice` instead of reaching for globals.

pub mod allocator;
pub mod barrier;
pub mod compositor;
pub mod device;
pub mod pipeline;
pub mod shader;
pub mod swapchain;
pub mod sync;

pub use device::VulkanDevice;
pub use swapchain::Swapchain;
