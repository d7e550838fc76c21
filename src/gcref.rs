use std::fmt;
use std::ptr::NonNull;

use crate::header::{HeaderState, HeaderWord};

/// Address of a heap object, i.e. of its header word.
///
/// An `ObjectRef` is a plain address: any allocation or collection may move the
/// object it names, so a reference that must survive one has to be reachable
/// from a root slot. `Option<ObjectRef>` has the layout of a single word, with
/// `None` being the null reference, which is how reference fields are stored.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ObjectRef(NonNull<usize>);

/// Address of a word holding an `Option<ObjectRef>`: an object field or a
/// mutator local registered as a root.
pub type Slot = NonNull<Option<ObjectRef>>;

impl ObjectRef {
    #[inline(always)]
    pub fn from_non_null(ptr: NonNull<usize>) -> Self {
        Self(ptr)
    }

    /// # Safety
    /// `addr` must be the address of a heap object of the heap it is used with.
    #[inline(always)]
    pub unsafe fn from_addr(addr: usize) -> Option<Self> {
        NonNull::new(addr as *mut usize).map(Self)
    }

    #[inline(always)]
    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }

    #[inline(always)]
    pub fn as_ptr(self) -> *mut usize {
        self.0.as_ptr()
    }

    /// Pointer to word `index` of the object.
    #[inline(always)]
    pub fn word_ptr(self, index: usize) -> *mut usize {
        unsafe { self.0.as_ptr().add(index) }
    }

    /// Word `index` seen as a reference slot.
    #[inline(always)]
    pub fn slot(self, index: usize) -> Slot {
        unsafe { NonNull::new_unchecked(self.word_ptr(index).cast()) }
    }

    #[inline(always)]
    pub(crate) unsafe fn read(self, index: usize) -> usize {
        self.word_ptr(index).read()
    }

    #[inline(always)]
    pub(crate) unsafe fn write(self, index: usize, value: usize) {
        self.word_ptr(index).write(value)
    }

    #[inline(always)]
    pub(crate) unsafe fn header(self) -> HeaderWord {
        HeaderWord::from_raw(self.read(0))
    }

    #[inline(always)]
    pub(crate) unsafe fn set_header(self, header: HeaderWord) {
        self.write(0, header.raw())
    }

    #[inline(always)]
    pub(crate) unsafe fn is_marked(self) -> bool {
        self.header().is_marked()
    }

    #[inline(always)]
    pub(crate) unsafe fn mark(self) {
        self.set_header(self.header().with_mark())
    }

    #[inline(always)]
    pub(crate) unsafe fn unmark(self) {
        self.set_header(self.header().without_mark())
    }

    #[inline(always)]
    pub(crate) unsafe fn forward_to(self, target: ObjectRef) {
        self.set_header(HeaderWord::forwarding(target))
    }

    #[inline(always)]
    pub(crate) unsafe fn forwarding_target(self) -> Option<ObjectRef> {
        match self.header().state() {
            HeaderState::Forwarded(target) => Some(target),
            _ => None,
        }
    }

    /// The object's current location: its forwarding target if it was moved by
    /// a collection whose from-space has not been reused yet, itself otherwise.
    #[inline(always)]
    pub(crate) unsafe fn resolve(self) -> ObjectRef {
        self.forwarding_target().unwrap_or(self)
    }

    /// Descriptor of a live (non-forwarded, non-free) object, followed through
    /// forwarding so moved descriptors still read correctly mid-collection.
    #[inline(always)]
    pub(crate) unsafe fn descriptor(self) -> ObjectRef {
        let header = self.header();
        debug_assert!(!header.is_forwarded() && !header.is_free_run());
        ObjectRef::from_non_null(NonNull::new_unchecked(header.address() as *mut usize)).resolve()
    }
}

impl fmt::Debug for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectRef({:p})", self.0.as_ptr())
    }
}

impl fmt::Pointer for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Pointer::fmt(&self.0.as_ptr(), f)
    }
}

/// Read the reference stored in `slot`.
#[inline(always)]
pub(crate) unsafe fn load(slot: Slot) -> Option<ObjectRef> {
    slot.as_ptr().read()
}

#[inline(always)]
pub(crate) unsafe fn store(slot: Slot, value: Option<ObjectRef>) {
    slot.as_ptr().write(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::mem::size_of;

    #[test]
    fn optional_reference_is_one_word() {
        assert_eq!(size_of::<Option<ObjectRef>>(), size_of::<usize>());
    }

    #[test]
    fn forwarding_round_trips_through_the_header() {
        let mut from = [0usize; 4];
        let mut to = [0usize; 4];
        let mut descriptor = [0usize; 4];
        unsafe {
            let from = ObjectRef::from_addr(from.as_mut_ptr() as usize).unwrap();
            let to = ObjectRef::from_addr(to.as_mut_ptr() as usize).unwrap();
            let descriptor = ObjectRef::from_addr(descriptor.as_mut_ptr() as usize).unwrap();
            from.set_header(HeaderWord::resting(descriptor));
            assert_eq!(from.descriptor(), descriptor);
            assert_eq!(from.resolve(), from);

            from.mark();
            assert!(from.is_marked());
            assert_eq!(from.descriptor(), descriptor);
            from.unmark();

            from.forward_to(to);
            assert!(from.header().is_forwarded());
            assert_eq!(from.resolve(), to);
            assert_eq!(from.forwarding_target(), Some(to));
        }
    }
}
