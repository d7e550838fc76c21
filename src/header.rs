use crate::gcref::ObjectRef;
use modular_bitfield::prelude::*;
use std::ptr::NonNull;

// The header is the first word of every heap object. At rest it is a plain
// descriptor reference; descriptors are word aligned so the low three bits are
// free for collector state.
//
// +-----------+------+-----------------------------------------------+
// | name      | bits |                                               |
// +-----------+------+-----------------------------------------------+
// | marked    |    1 | Set by the major collector while tracing.     |
// | free run  |    1 | Only on reclaimed old-generation runs.        |
// | forwarded |    1 | Object was copied; address is the new copy.   |
// | address   |   61 | Descriptor, forwarding target or run end >> 3 |
// +-----------+------+-----------------------------------------------+
//
// Exactly one interpretation is valid at a time: `forwarded` only between the
// copy of an object and the reset of its pool, `marked` only between the mark
// and sweep phases of a major collection, `free run` only on old memory that
// is not currently an object.
#[bitfield(bits = 64)]
#[derive(Clone, Copy)]
struct HeaderBits {
    marked: bool,
    free_run: bool,
    forwarded: bool,
    address: B61,
}

/// Decoded view of a header word.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum HeaderState {
    /// Outside of any collection: the object's descriptor.
    Resting(ObjectRef),
    /// Reached by the current major collection.
    Marked(ObjectRef),
    /// Moved; the payload lives at the contained address now.
    Forwarded(ObjectRef),
    /// Reclaimed old-generation memory ending (exclusive) at `end`.
    FreeRun { end: NonNull<usize> },
}

#[derive(Clone, Copy, PartialEq, Eq)]
#[repr(transparent)]
pub struct HeaderWord(usize);

impl HeaderWord {
    #[inline(always)]
    pub const fn from_raw(raw: usize) -> Self {
        Self(raw)
    }
    #[inline(always)]
    pub const fn raw(self) -> usize {
        self.0
    }
    #[inline(always)]
    pub fn resting(descriptor: ObjectRef) -> Self {
        Self(descriptor.addr())
    }
    #[inline(always)]
    pub fn forwarding(target: ObjectRef) -> Self {
        Self::from_bits(HeaderBits::new().with_forwarded(true).with_address(shifted(target.addr())))
    }
    #[inline(always)]
    pub fn free_run(end: NonNull<usize>) -> Self {
        Self::from_bits(HeaderBits::new().with_free_run(true).with_address(shifted(end.as_ptr() as usize)))
    }

    #[inline(always)]
    fn bits(self) -> HeaderBits {
        HeaderBits::from_bytes((self.0 as u64).to_le_bytes())
    }
    #[inline(always)]
    fn from_bits(bits: HeaderBits) -> Self {
        Self(u64::from_le_bytes(bits.into_bytes()) as usize)
    }

    #[inline(always)]
    pub fn is_marked(self) -> bool {
        self.bits().marked()
    }
    #[inline(always)]
    pub fn is_forwarded(self) -> bool {
        self.bits().forwarded()
    }
    #[inline(always)]
    pub fn is_free_run(self) -> bool {
        self.bits().free_run()
    }
    /// The address part of the word with every tag stripped.
    #[inline(always)]
    pub fn address(self) -> usize {
        (self.bits().address() as usize) << 3
    }

    #[inline(always)]
    pub fn with_mark(self) -> Self {
        Self::from_bits(self.bits().with_marked(true))
    }
    #[inline(always)]
    pub fn without_mark(self) -> Self {
        Self::from_bits(self.bits().with_marked(false))
    }

    pub fn state(self) -> HeaderState {
        let bits = self.bits();
        let address = (bits.address() as usize) << 3;
        // Every header state carries a non-null address.
        let pointer = NonNull::new(address as *mut usize).unwrap_or(NonNull::dangling());
        if bits.free_run() {
            HeaderState::FreeRun { end: pointer }
        } else if bits.forwarded() {
            HeaderState::Forwarded(ObjectRef::from_non_null(pointer))
        } else if bits.marked() {
            HeaderState::Marked(ObjectRef::from_non_null(pointer))
        } else {
            HeaderState::Resting(ObjectRef::from_non_null(pointer))
        }
    }
}

impl std::fmt::Debug for HeaderWord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "HeaderWord({:?})", self.state())
    }
}

#[inline(always)]
fn shifted(addr: usize) -> u64 {
    debug_assert_eq!(addr & crate::globals::TAG_MASK, 0, "unaligned header address");
    (addr >> 3) as u64
}
