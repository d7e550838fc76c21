//! Object shape descriptors.
//!
//! A descriptor is an ordinary heap object:
//!
//! ```text
//! +--------+------+----------------------------------+
//! | header | size | pointer bitmap (1 bit per word)  |
//! +--------+------+----------------------------------+
//! ```
//!
//! `size` is the described object's size in words, always even. Bit 0 of the
//! first bitmap word says whether a bitmap is present at all; when it is, it
//! also marks the described object's header as a reference (the header points
//! at the descriptor). Shapes without references store a single zero bitmap
//! word and only their header is traced.
//!
//! Descriptors are described by descriptor-descriptors, one per descriptor
//! object size, which are themselves described the same way. The chain ends at
//! the one descriptor-descriptor whose own size equals the size it describes:
//! its header points at itself.
use hashbrown::HashMap;

use crate::gcref::{ObjectRef, Slot};
use crate::globals::{
    bitmap_words, bytes_to_words, round_even, ARRAY_HEADER_WORDS, BITS_PER_WORD,
    DESCRIPTOR_DESCRIPTION, DESCRIPTOR_HEADER_WORDS,
};
use crate::heap::Heap;

/// Handle to a registered descriptor. Stable across collections, unlike the
/// descriptor object itself.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Descriptor(u32);

impl Descriptor {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// Words taken by a descriptor object describing `size` words with a bitmap.
pub const fn descriptor_words(size: usize) -> usize {
    round_even(DESCRIPTOR_HEADER_WORDS + bitmap_words(size))
}

/// Words taken by a descriptor object of a shape without references.
pub const DATA_DESCRIPTOR_WORDS: usize = round_even(DESCRIPTOR_HEADER_WORDS + 1);

#[derive(Clone, PartialEq, Eq, Hash)]
struct ShapeKey {
    size: usize,
    /// `None` for reference-free shapes.
    bitmap: Option<Box<[usize]>>,
}

/// Descriptors of one heap. `slots` is a permanent root set: collections
/// redirect these slots like any other root when descriptors move.
#[derive(Default)]
pub struct DescriptorRegistry {
    slots: Vec<Option<ObjectRef>>,
    shapes: HashMap<ShapeKey, Descriptor>,
    /// Descriptor-descriptors by the descriptor size they describe.
    meta: HashMap<usize, Descriptor>,
}

impl DescriptorRegistry {
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Current location of the descriptor object.
    pub fn object(&self, descriptor: Descriptor) -> ObjectRef {
        match self.slots[descriptor.index()] {
            Some(object) => object,
            None => unreachable!("descriptor {:?} is not installed", descriptor),
        }
    }

    pub(crate) fn slots(&mut self) -> impl Iterator<Item = Slot> + '_ {
        self.slots.iter_mut().map(Slot::from)
    }

    fn register(&mut self, object: ObjectRef) -> Descriptor {
        let descriptor = Descriptor(self.slots.len() as u32);
        self.slots.push(Some(object));
        descriptor
    }
}

/// Size in words of the objects `descriptor` describes.
///
/// # Safety
/// `descriptor` must be a descriptor object.
#[inline(always)]
pub(crate) unsafe fn described_size(descriptor: ObjectRef) -> usize {
    descriptor.read(1)
}

/// Words an object described by `descriptor` occupies. Descriptors built by a
/// registry are already even; foreign ones may not be.
///
/// # Safety
/// `descriptor` must be a descriptor object.
#[inline(always)]
pub(crate) unsafe fn object_words(descriptor: ObjectRef) -> usize {
    round_even(described_size(descriptor))
}

/// Call `visit` with every reference slot of `object` according to
/// `descriptor`, header included.
///
/// # Safety
/// `descriptor` must describe `object`.
pub(crate) unsafe fn for_each_reference(
    object: ObjectRef,
    descriptor: ObjectRef,
    mut visit: impl FnMut(Slot),
) {
    let size = described_size(descriptor);
    let bitmap = descriptor.word_ptr(DESCRIPTOR_HEADER_WORDS);
    if bitmap.read() & 1 == 0 {
        visit(object.slot(0));
        return;
    }
    for word in 0..bitmap_words(size) {
        let mut bits = bitmap.add(word).read();
        while bits != 0 {
            let index = word * BITS_PER_WORD + bits.trailing_zeros() as usize;
            bits &= bits - 1;
            if index >= size {
                break;
            }
            visit(object.slot(index));
        }
    }
}

/// Bitmap normalized to `size`: header bit forced, bits past the end cleared.
fn normalize_bitmap(size: usize, bitmap: &[usize]) -> Box<[usize]> {
    let mut words = vec![0usize; bitmap_words(size)];
    for (word, &bits) in words.iter_mut().zip(bitmap) {
        *word = bits;
    }
    words[0] |= 1;
    let tail = size % BITS_PER_WORD;
    if tail != 0 {
        if let Some(last) = words.last_mut() {
            *last &= (1 << tail) - 1;
        }
    }
    words.into_boxed_slice()
}

impl Heap {
    /// Descriptor for objects of `size` words whose reference words are the
    /// set bits of `bitmap` (bit `i` of word `w` is object word `w * 64 + i`).
    /// The header bit is always set. `size` is rounded up to an even count.
    pub fn descriptor(&mut self, size: usize, bitmap: &[usize]) -> Descriptor {
        let size = round_even(size.max(1));
        let bitmap = normalize_bitmap(size, bitmap);
        self.shape_descriptor(ShapeKey {
            size,
            bitmap: Some(bitmap),
        })
    }

    /// Descriptor for arrays of `len` references behind the array header.
    pub fn pointer_array_descriptor(&mut self, len: usize) -> Descriptor {
        let size = round_even(len + ARRAY_HEADER_WORDS);
        let mut bitmap = vec![usize::MAX; bitmap_words(size)];
        // the length word is not a reference
        bitmap[0] &= !0b10;
        self.descriptor(size, &bitmap)
    }

    /// Descriptor for arrays holding `bytes` bytes of opaque data.
    pub fn data_array_descriptor(&mut self, bytes: usize) -> Descriptor {
        let size = round_even(bytes_to_words(bytes) + ARRAY_HEADER_WORDS);
        self.shape_descriptor(ShapeKey { size, bitmap: None })
    }

    fn shape_descriptor(&mut self, key: ShapeKey) -> Descriptor {
        if let Some(&descriptor) = self.registry.shapes.get(&key) {
            return descriptor;
        }
        let own_words = match key.bitmap {
            Some(_) => descriptor_words(key.size),
            None => DATA_DESCRIPTOR_WORDS,
        };
        let meta = self.descriptor_descriptor(own_words);
        let object = self.allocate(meta);
        unsafe {
            object.write(1, key.size);
            if let Some(bitmap) = &key.bitmap {
                for (index, &bits) in bitmap.iter().enumerate() {
                    object.write(DESCRIPTOR_HEADER_WORDS + index, bits);
                }
            }
        }
        let descriptor = self.registry.register(object);
        tracing::trace!(
            target: "tenure::gc",
            size = key.size,
            references = key.bitmap.is_some(),
            index = descriptor.index(),
            "registered descriptor"
        );
        self.registry.shapes.insert(key, descriptor);
        descriptor
    }

    /// Descriptor of descriptor objects that are `size` words long.
    pub fn descriptor_descriptor(&mut self, size: usize) -> Descriptor {
        if let Some(&descriptor) = self.registry.meta.get(&size) {
            return descriptor;
        }
        let own_words = descriptor_words(size);
        let object = if own_words == size {
            // Base case: it describes objects of its own size, so it is its own
            // descriptor.
            let object = self.allocate_words(size);
            unsafe {
                object.set_header(crate::header::HeaderWord::resting(object));
            }
            object
        } else {
            let meta = self.descriptor_descriptor(own_words);
            self.allocate(meta)
        };
        unsafe {
            object.write(1, size);
            object.write(DESCRIPTOR_HEADER_WORDS, DESCRIPTOR_DESCRIPTION);
        }
        let descriptor = self.registry.register(object);
        self.registry.meta.insert(size, descriptor);
        descriptor
    }

    /// Current location of a descriptor object.
    pub fn descriptor_object(&self, descriptor: Descriptor) -> ObjectRef {
        self.registry.object(descriptor)
    }

    /// Size in words of the objects described by `descriptor`.
    pub fn descriptor_size(&self, descriptor: Descriptor) -> usize {
        unsafe { described_size(self.registry.object(descriptor)) }
    }

    pub fn registry_len(&self) -> usize {
        self.registry.len()
    }
}
