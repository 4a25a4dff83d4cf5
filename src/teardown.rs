// Release stack - destruction order derived from construction order
//
// Components push each part as soon as it exists. Whatever has been pushed
// is released newest first, whether construction finished or bailed out
// halfway.

pub struct ReleaseStack<T> {
    parts: Vec<T>,
}

impl<T> Default for ReleaseStack<T> {
    fn default() -> Self {
        Self { parts: Vec::new() }
    }
}

impl<T> ReleaseStack<T> {
    pub fn push(&mut self, part: T) {
        self.parts.push(part);
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// Construction finished and the parts now belong to a finished object
    /// that releases them itself.
    pub fn commit(&mut self) {
        self.parts.clear();
    }

    /// Hand every part to `release`, newest first. Leaves the stack empty,
    /// so a second call does nothing.
    pub fn release(&mut self, mut release: impl FnMut(T)) {
        while let Some(part) = self.parts.pop() {
            release(part);
        }
    }
}

impl<T> Drop for ReleaseStack<T> {
    fn drop(&mut self) {
        if !self.is_empty() {
            log::warn!("{} parts dropped without being released", self.len());
        }
    }
}
