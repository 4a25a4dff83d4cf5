// Render errors
//
// Per-frame and per-resource failures carry a kind so the frame loop can
// decide what to do with them. Bootstrap code keeps using anyhow.

use ash::vk;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RenderError {
    /// The presentation surface no longer matches the swapchain
    /// (out of date, suboptimal or lost).
    #[error("presentation surface became unusable: {0}")]
    TransientSurface(vk::Result),

    /// Host or device memory could not be provided.
    #[error("GPU allocation failed: {0}")]
    FatalAllocation(String),

    /// Any other API failure, including device loss.
    #[error("Vulkan call failed: {0}")]
    FatalDevice(vk::Result),
}

impl RenderError {
    /// Transient errors could be recovered by recreating the swapchain.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TransientSurface(_))
    }
}

impl From<vk::Result> for RenderError {
    fn from(result: vk::Result) -> Self {
        match result {
            vk::Result::ERROR_OUT_OF_DATE_KHR
            | vk::Result::SUBOPTIMAL_KHR
            | vk::Result::ERROR_SURFACE_LOST_KHR => Self::TransientSurface(result),
            vk::Result::ERROR_OUT_OF_HOST_MEMORY
            | vk::Result::ERROR_OUT_OF_DEVICE_MEMORY
            | vk::Result::ERROR_OUT_OF_POOL_MEMORY
            | vk::Result::ERROR_FRAGMENTED_POOL => Self::FatalAllocation(result.to_string()),
            _ => Self::FatalDevice(result),
        }
    }
}

impl From<gpu_allocator::AllocationError> for RenderError {
    fn from(err: gpu_allocator::AllocationError) -> Self {
        Self::FatalAllocation(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn surface_staleness_is_transient() {
        for result in [
            vk::Result::ERROR_OUT_OF_DATE_KHR,
            vk::Result::SUBOPTIMAL_KHR,
            vk::Result::ERROR_SURFACE_LOST_KHR,
        ] {
            assert!(RenderError::from(result).is_transient(), "{result:?}");
        }
    }

    #[test]
    fn memory_exhaustion_is_an_allocation_failure() {
        let err = RenderError::from(vk::Result::ERROR_OUT_OF_DEVICE_MEMORY);
        assert!(matches!(err, RenderError::FatalAllocation(_)));
        assert!(!err.is_transient());
    }

    #[test]
    fn device_loss_is_fatal() {
        let err = RenderError::from(vk::Result::ERROR_DEVICE_LOST);
        assert!(matches!(
            err,
            RenderError::FatalDevice(vk::Result::ERROR_DEVICE_LOST)
        ));
    }

    #[test]
    fn allocator_errors_convert() {
        let err = RenderError::from(gpu_allocator::AllocationError::OutOfMemory);
        assert!(matches!(err, RenderError::FatalAllocation(_)));
    }
}
