use crate::globals::{pool_base, POOL_BYTES, POOL_HEADER_WORDS, WORD_BYTES};
use crate::pool_provider::PoolBlock;
use crate::remembered_set::RememberedSet;

/// Index of a pool in its heap's pool arena. Also written into the first word
/// of the pool so any interior address maps back to its pool.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct PoolId(pub(crate) u32);

impl PoolId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Semispace {
    A,
    B,
}

impl Semispace {
    pub fn other(self) -> Self {
        match self {
            Semispace::A => Semispace::B,
            Semispace::B => Semispace::A,
        }
    }

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

/// Generation tag carried by a pool. Young pools name their semispace rather
/// than a to/from role, so swapping roles never touches the pools.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Space {
    Nursery,
    Young(Semispace),
    Old,
}

pub struct Pool {
    block: PoolBlock,
    pub(crate) free: *mut usize,
    end: *mut usize,
    pub(crate) space: Space,
    /// Only old pools carry one.
    pub(crate) remembered: Option<Box<RememberedSet>>,
}

impl Pool {
    /// Take ownership of `block` as pool `id`.
    pub(crate) fn new(block: PoolBlock, id: PoolId, space: Space) -> Self {
        let base = block.as_ptr().cast::<usize>();
        unsafe {
            base.write(id.index());
        }
        let start = unsafe { base.add(POOL_HEADER_WORDS) };
        Self {
            block,
            free: start,
            end: unsafe { base.add(POOL_BYTES / WORD_BYTES) },
            space,
            remembered: match space {
                Space::Old => Some(Box::new(RememberedSet::new())),
                _ => None,
            },
        }
    }

    pub fn block(&self) -> PoolBlock {
        self.block
    }

    pub fn base(&self) -> *mut usize {
        self.block.as_ptr().cast()
    }

    pub fn start(&self) -> *mut usize {
        unsafe { self.base().add(POOL_HEADER_WORDS) }
    }

    pub fn free(&self) -> *mut usize {
        self.free
    }

    pub fn space(&self) -> Space {
        self.space
    }

    pub fn remaining_words(&self) -> usize {
        (self.end as usize - self.free as usize) / WORD_BYTES
    }

    pub fn used_words(&self) -> usize {
        (self.free as usize - self.start() as usize) / WORD_BYTES
    }

    /// Bump `words` words, or `None` if the pool is too full.
    pub(crate) fn bump(&mut self, words: usize) -> Option<*mut usize> {
        if self.remaining_words() < words {
            return None;
        }
        let result = self.free;
        self.free = unsafe { self.free.add(words) };
        Some(result)
    }

    pub(crate) fn reset(&mut self) {
        self.free = self.start();
    }

    /// Word offset of `addr` from the pool base.
    pub(crate) fn offset_of(&self, addr: usize) -> usize {
        (addr - self.base() as usize) / WORD_BYTES
    }

    pub(crate) fn word_at(&self, offset: usize) -> *mut usize {
        unsafe { self.base().add(offset) }
    }
}

/// Pools of one generation (or semispace) in allocation order, with the
/// cursor of the pool currently bump-allocated from.
#[derive(Default)]
pub struct PoolList {
    pub(crate) pools: Vec<PoolId>,
    pub(crate) cursor: usize,
}

impl PoolList {
    pub fn len(&self) -> usize {
        self.pools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pools.is_empty()
    }

    pub fn current(&self) -> Option<PoolId> {
        self.pools.get(self.cursor).copied()
    }

    /// Pools from the head up to and including the cursor: the ones that may
    /// hold objects.
    pub fn in_use(&self) -> &[PoolId] {
        let end = (self.cursor + 1).min(self.pools.len());
        &self.pools[..end]
    }

    pub fn iter(&self) -> impl Iterator<Item = PoolId> + '_ {
        self.pools.iter().copied()
    }
}

/// Pool id stored in the first word of the pool containing `addr`.
///
/// # Safety
/// `addr` must point inside a pool owned by a live heap.
#[inline(always)]
pub(crate) unsafe fn pool_id_of(addr: usize) -> PoolId {
    PoolId((pool_base(addr) as *const usize).read() as u32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool_provider::PoolProvider;

    #[test]
    fn pool_records_its_id_and_bumps() {
        let provider = PoolProvider::with_limit(1);
        let block = provider.acquire(true).unwrap();
        let mut pool = Pool::new(block, PoolId(7), Space::Nursery);
        assert_eq!(unsafe { pool_id_of(pool.start() as usize + 40) }, PoolId(7));
        assert_eq!(pool.used_words(), 0);

        let remaining = pool.remaining_words();
        let first = pool.bump(4).unwrap();
        assert_eq!(first, pool.start());
        assert_eq!(pool.remaining_words(), remaining - 4);
        assert!(pool.bump(remaining).is_none());
        assert!(pool.bump(remaining - 4).is_some());
        assert_eq!(pool.remaining_words(), 0);

        pool.reset();
        assert_eq!(pool.used_words(), 0);
        assert_eq!(pool.offset_of(pool.start() as usize), POOL_HEADER_WORDS);
    }
}
