// Frame loop - the per-frame orchestration
//
// FRAME SEQUENCE (every call to `render_frame`):
//   reclaim slot (fence wait + reset)
//     -> acquire presentable image
//     -> record barriers, dispatch, blit
//     -> submit (wait "acquired", signal "render-complete", fence)
//     -> present (wait "render-complete")
//     -> advance ring
//
// The loop only knows the order. Everything that touches the GPU lives behind
// `FrameBackend`, which is what lets the ordering be tested without a device.

use crate::error::RenderError;
use crate::frame_ring::FrameRing;

/// Proof that the device has drained every submission.
///
/// Only a successful idle wait produces one, and `FrameBackend::release`
/// requires it, so nothing can be torn down while GPU work is pending.
#[derive(Debug)]
pub struct DeviceIdle(());

impl DeviceIdle {
    pub(crate) fn confirmed() -> Self {
        Self(())
    }
}

/// GPU-facing half of the frame loop.
pub trait FrameBackend {
    /// Per-frame recording and synchronization state.
    type Slot;

    /// Number of presentable images; the ring must hold exactly this many slots.
    fn image_count(&self) -> usize;

    /// Block until the slot's previous submission retired, then reset its fence.
    fn reclaim(&mut self, slot: &Self::Slot) -> Result<(), RenderError>;

    /// Acquire the next presentable image, signaling the slot's "acquired" semaphore.
    fn acquire(&mut self, slot: &Self::Slot) -> Result<u32, RenderError>;

    /// Record the whole frame into the slot's command buffer.
    fn record(&mut self, slot: &Self::Slot, image_index: u32) -> Result<(), RenderError>;

    fn submit(&mut self, slot: &Self::Slot) -> Result<(), RenderError>;

    fn present(&mut self, slot: &Self::Slot, image_index: u32) -> Result<(), RenderError>;

    fn wait_idle(&mut self) -> Result<DeviceIdle, RenderError>;

    /// Destroy the slots and everything the backend owns, in reverse creation order.
    fn release(self, slots: Vec<Self::Slot>, idle: DeviceIdle)
    where
        Self: Sized;
}

pub struct FrameLoop<B: FrameBackend> {
    ring: FrameRing<B::Slot>,
    backend: B,
    frames_completed: u64,
}

impl<B: FrameBackend> FrameLoop<B> {
    pub fn new(backend: B, ring: FrameRing<B::Slot>) -> Self {
        assert_eq!(
            ring.len(),
            backend.image_count(),
            "frame ring must hold one slot per presentable image"
        );
        log::info!("Frame loop ready with {} slots", ring.len());
        Self {
            ring,
            backend,
            frames_completed: 0,
        }
    }

    /// Run one full frame. Returns the slot index that was used.
    ///
    /// On error the ring is left where it was; the caller decides whether the
    /// error is recoverable.
    pub fn render_frame(&mut self) -> Result<usize, RenderError> {
        let index = self.ring.index();
        let slot = self.ring.current();

        self.backend.reclaim(slot)?;
        let image_index = self.backend.acquire(slot)?;
        self.backend.record(slot, image_index)?;
        self.backend.submit(slot)?;
        self.backend.present(slot, image_index)?;

        self.ring.advance();
        self.frames_completed += 1;
        log::trace!("Frame {} used slot {} / image {}", self.frames_completed, index, image_index);
        Ok(index)
    }

    pub fn frames_completed(&self) -> u64 {
        self.frames_completed
    }

    /// Wait for the device to go idle, then release every resource.
    pub fn shutdown(self) -> Result<(), RenderError> {
        let Self {
            ring, mut backend, ..
        } = self;
        let idle = backend.wait_idle()?;
        backend.release(ring.into_slots(), idle);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::teardown::ReleaseStack;
    use ash::vk;
    use std::cell::RefCell;
    use std::rc::Rc;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Fence {
        Signaled,
        Reset,
        InFlight,
    }

    struct MockSlot {
        id: usize,
    }

    /// Simulates the GPU: submissions stay in flight until someone waits on
    /// their fence or on the whole device.
    struct MockBackend {
        images: usize,
        fences: Vec<Fence>,
        next_image: u32,
        pending: usize,
        fail_present_on_frame: Option<usize>,
        presents: usize,
        parts: ReleaseStack<&'static str>,
        log: Rc<RefCell<Vec<String>>>,
    }

    /// What the real backend builds, in creation order.
    const CREATION_ORDER: [&str; 7] = [
        "device",
        "swapchain",
        "frame slots",
        "allocator",
        "intermediate image",
        "descriptors",
        "pipeline",
    ];

    impl MockBackend {
        fn new(images: usize) -> Self {
            let log: Rc<RefCell<Vec<String>>> = Rc::default();
            let mut parts = ReleaseStack::default();
            for part in CREATION_ORDER {
                log.borrow_mut().push(format!("create {part}"));
                parts.push(part);
            }
            Self {
                images,
                fences: vec![Fence::Signaled; images],
                next_image: 0,
                pending: 0,
                fail_present_on_frame: None,
                presents: 0,
                parts,
                log,
            }
        }

        fn ring(&self) -> FrameRing<MockSlot> {
            FrameRing::new((0..self.images).map(|id| MockSlot { id }).collect())
        }
    }

    impl FrameBackend for MockBackend {
        type Slot = MockSlot;

        fn image_count(&self) -> usize {
            self.images
        }

        fn reclaim(&mut self, slot: &MockSlot) -> Result<(), RenderError> {
            match self.fences[slot.id] {
                Fence::InFlight => self.pending -= 1,
                Fence::Signaled => {}
                Fence::Reset => panic!("slot {} waits on a fence nothing will signal", slot.id),
            }
            self.fences[slot.id] = Fence::Reset;
            Ok(())
        }

        fn acquire(&mut self, _slot: &MockSlot) -> Result<u32, RenderError> {
            let index = self.next_image;
            self.next_image = (self.next_image + 1) % self.images as u32;
            Ok(index)
        }

        fn record(&mut self, slot: &MockSlot, _image_index: u32) -> Result<(), RenderError> {
            assert_eq!(
                self.fences[slot.id],
                Fence::Reset,
                "slot {} re-recorded while the GPU may still use it",
                slot.id
            );
            Ok(())
        }

        fn submit(&mut self, slot: &MockSlot) -> Result<(), RenderError> {
            assert_eq!(self.fences[slot.id], Fence::Reset);
            self.fences[slot.id] = Fence::InFlight;
            self.pending += 1;
            Ok(())
        }

        fn present(&mut self, _slot: &MockSlot, _image_index: u32) -> Result<(), RenderError> {
            let frame = self.presents;
            self.presents += 1;
            if self.fail_present_on_frame == Some(frame) {
                return Err(vk::Result::ERROR_OUT_OF_DATE_KHR.into());
            }
            Ok(())
        }

        fn wait_idle(&mut self) -> Result<DeviceIdle, RenderError> {
            for fence in &mut self.fences {
                if *fence == Fence::InFlight {
                    *fence = Fence::Signaled;
                }
            }
            self.pending = 0;
            self.log.borrow_mut().push("wait_idle".into());
            Ok(DeviceIdle::confirmed())
        }

        fn release(mut self, slots: Vec<MockSlot>, _idle: DeviceIdle) {
            assert_eq!(self.pending, 0, "released resources with work in flight");
            let log = self.log.clone();
            log.borrow_mut().push(format!("release {} slots", slots.len()));
            self.parts
                .release(|part| log.borrow_mut().push(format!("destroy {part}")));
        }
    }

    #[test]
    fn three_images_cycle_over_ten_frames() {
        let backend = MockBackend::new(3);
        let ring = backend.ring();
        let mut frames = FrameLoop::new(backend, ring);

        let used: Vec<usize> = (0..10).map(|_| frames.render_frame().unwrap()).collect();

        assert_eq!(used, vec![0, 1, 2, 0, 1, 2, 0, 1, 2, 0]);
        assert_eq!(frames.frames_completed(), 10);
    }

    #[test]
    fn slots_wait_for_their_fence_before_reuse() {
        for images in 1..=4 {
            let backend = MockBackend::new(images);
            let ring = backend.ring();
            let mut frames = FrameLoop::new(backend, ring);
            for frame in 0..images * 3 + 1 {
                assert_eq!(frames.render_frame().unwrap(), frame % images);
                // Frames in flight never exceed the slot count.
                assert!(frames.backend.pending <= images);
            }
        }
    }

    #[test]
    fn failed_present_leaves_the_ring_in_place() {
        let mut backend = MockBackend::new(3);
        backend.fail_present_on_frame = Some(1);
        let ring = backend.ring();
        let mut frames = FrameLoop::new(backend, ring);

        assert_eq!(frames.render_frame().unwrap(), 0);
        let err = frames.render_frame().unwrap_err();

        assert!(err.is_transient());
        assert_eq!(frames.ring.index(), 1);
        assert_eq!(frames.frames_completed(), 1);
    }

    #[test]
    fn shutdown_drains_pending_work_before_release() {
        let backend = MockBackend::new(3);
        let log = backend.log.clone();
        let ring = backend.ring();
        let mut frames = FrameLoop::new(backend, ring);

        frames.render_frame().unwrap();
        frames.render_frame().unwrap();
        assert_eq!(frames.backend.pending, 2);

        log.borrow_mut().clear();
        frames.shutdown().unwrap();
        assert_eq!(log.borrow()[..2], ["wait_idle", "release 3 slots"]);
    }

    #[test]
    fn teardown_reverses_creation_order() {
        let backend = MockBackend::new(2);
        let log = backend.log.clone();
        let ring = backend.ring();
        let mut frames = FrameLoop::new(backend, ring);
        frames.render_frame().unwrap();
        frames.shutdown().unwrap();

        let log = log.borrow();
        let created: Vec<&str> = log
            .iter()
            .filter_map(|entry| entry.strip_prefix("create "))
            .collect();
        let mut destroyed: Vec<&str> = log
            .iter()
            .filter_map(|entry| entry.strip_prefix("destroy "))
            .collect();

        assert_eq!(created, CREATION_ORDER);
        destroyed.reverse();
        assert_eq!(destroyed, created);

        // Every destroy happens after the idle wait
        let idle_at = log.iter().position(|entry| entry == "wait_idle").unwrap();
        let first_destroy = log.iter().position(|entry| entry.starts_with("destroy ")).unwrap();
        assert!(idle_at < first_destroy);
    }

    #[test]
    #[should_panic(expected = "one slot per presentable image")]
    fn ring_must_match_image_count() {
        let backend = MockBackend::new(3);
        let ring = FrameRing::new(vec![MockSlot { id: 0 }, MockSlot { id: 1 }]);
        let _ = FrameLoop::new(backend, ring);
    }
}
