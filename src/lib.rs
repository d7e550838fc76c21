//! Generational, precise garbage collector for language runtimes.
//!
//! Objects live in a [`Heap`] made of fixed-size pools: a bump-allocated
//! nursery, a young generation of two copying semispaces and a mark-swept old
//! generation. Object shapes are given by heap-resident [`Descriptor`]s and the
//! mutator declares its live references through a stack of root frames.
//!
//! ```no_run
//! use std::cell::Cell;
//! use tenure::Heap;
//!
//! let mut heap = Heap::new();
//! let pair = heap.descriptor(3, &[0b110]);
//! let root = Cell::new(None);
//! heap.rooted(&[&root], |heap| {
//!     root.set(Some(heap.allocate(pair)));
//!     let tail = heap.allocate(pair);
//!     heap.write_ref(root.get().unwrap(), 1, Some(tail));
//!     heap.collect_minor();
//! });
//! ```
#[cfg(not(target_pointer_width = "64"))]
compile_error!("tenure only supports 64-bit targets");

pub mod config;
pub mod descriptor;
pub mod error;
pub mod free_list;
pub mod gcref;
pub mod globals;
pub mod header;
pub mod heap;
pub mod major;
pub mod minor;
pub mod mmap;
pub mod pool;
pub mod pool_provider;
pub mod remembered_set;
pub mod shadow_stack;
pub mod statistics;


pub use config::HeapConfig;
pub use descriptor::Descriptor;
pub use error::ConfigError;
pub use gcref::{ObjectRef, Slot};
pub use heap::{GcReason, Generation, Heap, NurseryPosition};
pub use pool_provider::PoolProvider;
pub use statistics::HeapStatistics;

pub struct FormattedSize {
    pub size: usize,
}

impl std::fmt::Display for FormattedSize {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        let ksize = (self.size as f64) / 1024f64;

        if ksize < 1f64 {
            return write!(f, "{}B", self.size);
        }

        let msize = ksize / 1024f64;

        if msize < 1f64 {
            return write!(f, "{:.1}K", ksize);
        }

        let gsize = msize / 1024f64;

        if gsize < 1f64 {
            write!(f, "{:.1}M", msize)
        } else {
            write!(f, "{:.1}G", gsize)
        }
    }
}

/// Human readable byte count: `512B`, `1.5K`, `3.0M`.
pub fn formatted_size(size: usize) -> FormattedSize {
    FormattedSize { size }
}

pub mod c_api {
    //! Entry points for generated code. Every function taking a heap expects
    //! a pointer returned by [`tenure_heap_create`] that has not been freed.

    use std::ptr::{null_mut, NonNull};

    use crate::{gcref::ObjectRef, heap::Heap, HeapConfig, Slot};

    /// Configuration with every field at its default.
    #[no_mangle]
    pub extern "C" fn tenure_default_config() -> HeapConfig {
        HeapConfig::default()
    }

    /// Create a heap. Returns null when `config` is invalid.
    #[no_mangle]
    pub extern "C" fn tenure_heap_create(config: HeapConfig) -> *mut Heap {
        match Heap::with_config(config) {
            Ok(heap) => Box::into_raw(Box::new(heap)),
            Err(error) => {
                tracing::error!(target: "tenure::gc", %error, "rejected heap configuration");
                null_mut()
            }
        }
    }

    /// Free the heap, handing its pools back to the process-wide free list.
    #[no_mangle]
    pub unsafe extern "C" fn tenure_heap_free(heap: *mut Heap) {
        if !heap.is_null() {
            drop(Box::from_raw(heap));
        }
    }

    /// Descriptor object for `size` words with `words` bitmap words at
    /// `bitmap`. The returned object is rooted by the heap for its lifetime
    /// but moves; fetch it again after any allocation.
    #[no_mangle]
    pub unsafe extern "C" fn tenure_descriptor(
        heap: *mut Heap,
        size: usize,
        bitmap: *const usize,
        words: usize,
    ) -> *mut usize {
        let heap = &mut *heap;
        let bitmap = if bitmap.is_null() {
            &[][..]
        } else {
            std::slice::from_raw_parts(bitmap, words)
        };
        let descriptor = heap.descriptor(size, bitmap);
        heap.descriptor_object(descriptor).as_ptr()
    }

    #[no_mangle]
    pub unsafe extern "C" fn tenure_malloc(heap: *mut Heap, descriptor: *mut usize) -> *mut usize {
        match NonNull::new(descriptor) {
            Some(descriptor) => (*heap)
                .allocate_raw(ObjectRef::from_non_null(descriptor))
                .as_ptr(),
            None => null_mut(),
        }
    }

    #[no_mangle]
    pub unsafe extern "C" fn tenure_malloc_pointer_array(heap: *mut Heap, len: usize) -> *mut usize {
        (*heap).allocate_pointer_array(len).as_ptr()
    }

    #[no_mangle]
    pub unsafe extern "C" fn tenure_malloc_data_array(
        heap: *mut Heap,
        count: usize,
        element_bytes: usize,
    ) -> *mut usize {
        (*heap).allocate_data_array(count, element_bytes).as_ptr()
    }

    /// Push a frame of `len` slot addresses.
    #[no_mangle]
    pub unsafe extern "C" fn tenure_push_frame(heap: *mut Heap, slots: *const Slot, len: usize) {
        let slots = if slots.is_null() {
            &[][..]
        } else {
            std::slice::from_raw_parts(slots, len)
        };
        (*heap).push_frame(slots);
    }

    #[no_mangle]
    pub unsafe extern "C" fn tenure_pop_frame(heap: *mut Heap) {
        (*heap).pop_frame();
    }

    #[no_mangle]
    pub unsafe extern "C" fn tenure_push_global(heap: *mut Heap, slot: *mut Option<ObjectRef>) {
        if let Some(slot) = NonNull::new(slot) {
            (*heap).push_global(slot);
        }
    }

    /// Call after storing a reference into `slot`, a word of a heap object.
    #[no_mangle]
    pub unsafe extern "C" fn tenure_write_barrier(heap: *mut Heap, slot: *mut Option<ObjectRef>) {
        if let Some(slot) = NonNull::new(slot) {
            (*heap).write_barrier(slot);
        }
    }

    #[no_mangle]
    pub unsafe extern "C" fn tenure_collect(heap: *mut Heap) {
        (*heap).collect_minor();
    }

    #[no_mangle]
    pub unsafe extern "C" fn tenure_collect_full(heap: *mut Heap) {
        (*heap).collect_major();
    }

    /// Returns 1 when a collection ran.
    #[no_mangle]
    pub unsafe extern "C" fn tenure_yield(heap: *mut Heap) -> i32 {
        (*heap).yield_point() as i32
    }
}
