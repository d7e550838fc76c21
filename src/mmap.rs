use std::io;

use memmap2::MmapMut;

use crate::globals::POOL_BYTES;

/// Anonymous mapping large enough to hold `pools` blocks aligned to
/// [`POOL_BYTES`]. One spare pool worth of address space is reserved so the
/// aligned start always fits.
pub struct Mmap {
    map: MmapMut,
    aligned: *mut u8,
    pools: usize,
}

impl Mmap {
    pub fn new(pools: usize) -> io::Result<Self> {
        let mut map = MmapMut::map_anon((pools + 1) * POOL_BYTES)?;
        let start = map.as_mut_ptr();
        let offset = (POOL_BYTES - (start as usize) % POOL_BYTES) % POOL_BYTES;
        let aligned = unsafe { start.add(offset) };
        Ok(Self {
            map,
            aligned,
            pools,
        })
    }

    pub fn pools(&self) -> usize {
        self.pools
    }

    pub fn start(&self) -> *const u8 {
        self.map.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    /// Pool number `index` inside this mapping.
    pub fn pool(&self, index: usize) -> *mut u8 {
        debug_assert!(index < self.pools);
        unsafe { self.aligned.add(index * POOL_BYTES) }
    }

    /// Hint the kernel that a freshly handed out pool is about to be written.
    pub fn commit(&self, page: *mut u8, size: usize) {
        #[cfg(unix)]
        unsafe {
            libc::madvise(page as *mut _, size as _, libc::MADV_WILLNEED);
        }
        #[cfg(not(unix))]
        {
            let _ = (page, size);
        }
    }
}

unsafe impl Send for Mmap {}
unsafe impl Sync for Mmap {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pools_are_aligned_and_inside_mapping() {
        let map = Mmap::new(3).unwrap();
        let start = map.start() as usize;
        let end = start + map.len();
        for i in 0..map.pools() {
            let pool = map.pool(i) as usize;
            assert_eq!(pool % POOL_BYTES, 0);
            assert!(pool >= start && pool + POOL_BYTES <= end);
        }
    }
}
