use crate::gcref::Slot;

/// Root registration stack.
///
/// Frames are pushed and popped by the mutator around every scope whose
/// reference locals must survive an allocation. Global slots stay rooted for
/// the lifetime of the heap. All slots are flattened into one vector; `frames`
/// records where each frame begins.
pub struct RootStack {
    slots: Vec<Slot>,
    frames: Vec<usize>,
    globals: Vec<Slot>,
}

impl RootStack {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            frames: Vec::new(),
            globals: Vec::new(),
        }
    }

    /// Push a frame holding `slots`.
    ///
    /// # Safety
    /// Every slot must stay valid, and hold either `None` or a reference into
    /// the owning heap, until the matching [`RootStack::pop_frame`].
    pub unsafe fn push_frame(&mut self, slots: &[Slot]) {
        self.frames.push(self.slots.len());
        self.slots.extend_from_slice(slots);
    }

    /// Pop the innermost frame. Returns `false` when no frame was pushed.
    pub fn pop_frame(&mut self) -> bool {
        match self.frames.pop() {
            Some(base) => {
                self.slots.truncate(base);
                true
            }
            None => false,
        }
    }

    /// # Safety
    /// `slot` must stay valid for as long as the heap lives.
    pub unsafe fn push_global(&mut self, slot: Slot) {
        self.globals.push(slot);
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn len(&self) -> usize {
        self.slots.len() + self.globals.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Walk all rooted slots, innermost frame first, then globals.
    pub fn walk(&self, mut visitor: impl FnMut(Slot)) {
        for &slot in self.slots.iter().rev() {
            visitor(slot);
        }
        for &slot in &self.globals {
            visitor(slot);
        }
    }
}

impl Default for RootStack {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::ptr::NonNull;

    use crate::gcref::ObjectRef;

    fn slot(cell: &Cell<Option<ObjectRef>>) -> Slot {
        NonNull::new(cell.as_ptr()).unwrap()
    }

    #[test]
    fn frames_nest_and_globals_persist() {
        let a = Cell::new(None);
        let b = Cell::new(None);
        let c = Cell::new(None);
        let mut stack = RootStack::new();
        unsafe {
            stack.push_global(slot(&c));
            stack.push_frame(&[slot(&a)]);
            stack.push_frame(&[slot(&b)]);
        }
        let mut seen = Vec::new();
        stack.walk(|s| seen.push(s));
        assert_eq!(seen, vec![slot(&b), slot(&a), slot(&c)]);

        assert!(stack.pop_frame());
        assert!(stack.pop_frame());
        assert!(!stack.pop_frame());
        assert_eq!(stack.depth(), 0);
        assert_eq!(stack.len(), 1);
    }
}
