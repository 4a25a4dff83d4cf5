// Frame ring - round-robin ownership of per-frame slots
//
// The ring size is fixed at construction (one slot per presentable image).
// The index only moves through `advance`, which the frame loop calls once
// per completed frame.

pub struct FrameRing<T> {
    slots: Vec<T>,
    index: usize,
}

impl<T> FrameRing<T> {
    /// Build a ring over `slots`. An empty ring is a programming error.
    pub fn new(slots: Vec<T>) -> Self {
        assert!(!slots.is_empty(), "frame ring needs at least one slot");
        Self { slots, index: 0 }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    /// Index of the slot the next frame will record into.
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn current(&self) -> &T {
        &self.slots[self.index]
    }

    pub fn advance(&mut self) {
        self.index = (self.index + 1) % self.slots.len();
    }

    /// Give the slots back for destruction.
    pub fn into_slots(self) -> Vec<T> {
        self.slots
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn index_cycles_for_every_ring_size() {
        for n in 1..=5usize {
            let mut ring = FrameRing::new((0..n).collect());
            let seen: Vec<usize> = (0..3 * n + 1)
                .map(|_| {
                    let slot = *ring.current();
                    assert_eq!(slot, ring.index());
                    ring.advance();
                    slot
                })
                .collect();
            let expected: Vec<usize> = (0..3 * n + 1).map(|i| i % n).collect();
            assert_eq!(seen, expected, "ring of {n}");
        }
    }

    #[test]
    fn into_slots_keeps_construction_order() {
        let mut ring = FrameRing::new(vec!['a', 'b', 'c']);
        ring.advance();
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.into_slots(), vec!['a', 'b', 'c']);
    }

    #[test]
    #[should_panic(expected = "at least one slot")]
    fn empty_ring_is_rejected() {
        let _ = FrameRing::<u32>::new(Vec::new());
    }
}
