//! Process-wide source of pools.
//!
//! Pools are fixed-size, [`POOL_BYTES`] aligned blocks. Released pools go to a
//! shared FIFO free list and are handed out again before any new memory is
//! mapped. Memory is never returned to the OS and never cleared here.
use std::collections::VecDeque;
use std::ptr::NonNull;
use std::sync::{Arc, OnceLock};

use parking_lot::Mutex;

use crate::formatted_size;
use crate::globals::{POOLS_PER_CHUNK, POOL_BYTES};
use crate::mmap::Mmap;

/// A raw pool block handed out by [`PoolProvider`].
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct PoolBlock(NonNull<u8>);

unsafe impl Send for PoolBlock {}

impl PoolBlock {
    pub fn as_ptr(self) -> *mut u8 {
        self.0.as_ptr()
    }

    pub fn addr(self) -> usize {
        self.0.as_ptr() as usize
    }
}

struct ProviderState {
    chunks: Vec<Mmap>,
    /// Next unused pool in the last chunk.
    carved: usize,
    free: VecDeque<PoolBlock>,
    mapped_pools: usize,
}

pub struct PoolProvider {
    state: Mutex<ProviderState>,
    limit: Option<usize>,
}

static GLOBAL_PROVIDER: OnceLock<Arc<PoolProvider>> = OnceLock::new();

impl PoolProvider {
    /// Provider without any limit besides what the OS is willing to map.
    pub fn new() -> Self {
        Self::build(None)
    }

    /// Provider that maps at most `max_pools` pools over its lifetime.
    pub fn with_limit(max_pools: usize) -> Self {
        Self::build(Some(max_pools))
    }

    fn build(limit: Option<usize>) -> Self {
        Self {
            state: Mutex::new(ProviderState {
                chunks: Vec::new(),
                carved: 0,
                free: VecDeque::new(),
                mapped_pools: 0,
            }),
            limit,
        }
    }

    /// The provider shared by every heap in the process unless one is given explicitly.
    pub fn global() -> Arc<PoolProvider> {
        GLOBAL_PROVIDER
            .get_or_init(|| Arc::new(PoolProvider::new()))
            .clone()
    }

    /// Obtain a pool. Reuses released pools first. When `must_succeed` is set a
    /// failure aborts the process; otherwise `None` is returned.
    pub fn acquire(&self, must_succeed: bool) -> Option<PoolBlock> {
        if must_succeed {
            Some(self.acquire_or_abort())
        } else {
            self.try_acquire()
        }
    }

    /// `acquire(true)` for callers that cannot proceed without a pool.
    pub fn acquire_or_abort(&self) -> PoolBlock {
        match self.try_acquire() {
            Some(block) => block,
            None => pool_exhaustion_abort(self.mapped_pools()),
        }
    }

    fn try_acquire(&self) -> Option<PoolBlock> {
        let mut state = self.state.lock();
        if let Some(block) = state.free.pop_front() {
            return Some(block);
        }

        let exhausted = state
            .chunks
            .last()
            .map_or(true, |chunk| state.carved >= chunk.pools());
        if exhausted {
            let mut pools = POOLS_PER_CHUNK;
            if let Some(limit) = self.limit {
                pools = pools.min(limit.saturating_sub(state.mapped_pools));
            }
            if pools == 0 {
                return None;
            }
            match Mmap::new(pools) {
                Ok(map) => {
                    tracing::debug!(
                        target: "tenure::gc",
                        pools,
                        bytes = pools * POOL_BYTES,
                        "mapped pool chunk"
                    );
                    state.mapped_pools += pools;
                    state.chunks.push(map);
                    state.carved = 0;
                }
                Err(error) => {
                    tracing::debug!(target: "tenure::gc", %error, "pool chunk mapping failed");
                    return None;
                }
            }
        }

        let index = state.carved;
        state.carved += 1;
        let chunk = state.chunks.last()?;
        let pool = chunk.pool(index);
        chunk.commit(pool, POOL_BYTES);
        NonNull::new(pool).map(PoolBlock)
    }

    /// Append pools to the free list. Their contents are left untouched.
    pub fn release(&self, blocks: impl IntoIterator<Item = PoolBlock>) {
        let mut state = self.state.lock();
        state.free.extend(blocks);
    }

    /// Most pools this provider will ever map, if bounded.
    pub fn limit(&self) -> Option<usize> {
        self.limit
    }

    /// Pools mapped from the OS so far.
    pub fn mapped_pools(&self) -> usize {
        self.state.lock().mapped_pools
    }

    /// Pools sitting in the free list.
    pub fn free_pools(&self) -> usize {
        self.state.lock().free.len()
    }
}

impl Default for PoolProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[cold]
fn pool_exhaustion_abort(mapped: usize) -> ! {
    eprintln!(
        "Out of memory: pool provider could not supply a pool ({} mapped in {} pools)\n{:?}",
        formatted_size(mapped * POOL_BYTES),
        mapped,
        backtrace::Backtrace::new()
    );
    std::process::abort()
}

#[cold]
pub(crate) fn object_too_large_abort(words: usize, capacity: usize) -> ! {
    eprintln!(
        "Object of {} words does not fit in a pool of {} words\n{:?}",
        words,
        capacity,
        backtrace::Backtrace::new()
    );
    std::process::abort()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_is_respected_without_must_succeed() {
        let provider = PoolProvider::with_limit(2);
        assert!(provider.acquire(false).is_some());
        assert!(provider.acquire(false).is_some());
        assert!(provider.acquire(false).is_none());
        assert_eq!(provider.mapped_pools(), 2);
    }

    #[test]
    fn released_pools_are_reused_without_clearing() {
        let provider = PoolProvider::with_limit(1);
        let block = provider.acquire(true).unwrap();
        assert_eq!(block.addr() % POOL_BYTES, 0);
        unsafe {
            block.as_ptr().cast::<usize>().add(7).write(0xdead_beef);
        }
        provider.release([block]);
        assert_eq!(provider.free_pools(), 1);

        let again = provider.acquire(false).unwrap();
        assert_eq!(again, block);
        assert_eq!(unsafe { again.as_ptr().cast::<usize>().add(7).read() }, 0xdead_beef);
        assert_eq!(provider.free_pools(), 0);
    }

    #[test]
    fn free_list_is_first_in_first_out() {
        let provider = PoolProvider::new();
        let a = provider.acquire(true).unwrap();
        let b = provider.acquire(true).unwrap();
        provider.release([a, b]);
        assert_eq!(provider.acquire(true), Some(a));
        assert_eq!(provider.acquire(true), Some(b));
    }
}
