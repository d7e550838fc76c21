use std::cell::Cell;
use std::ptr::NonNull;
use std::sync::Arc;

use crate::config::HeapConfig;
use crate::descriptor::{object_words, Descriptor, DescriptorRegistry};
use crate::error::ConfigError;
use crate::free_list::FreeList;
use crate::gcref::{load, store, ObjectRef, Slot};
use crate::globals::{ARRAY_HEADER_WORDS, POOL_CAPACITY_WORDS, WORDS_PER_POOL};
use crate::header::HeaderWord;
use crate::pool::{pool_id_of, Pool, PoolId, PoolList, Semispace, Space};
use crate::pool_provider::{object_too_large_abort, PoolProvider};
use crate::shadow_stack::RootStack;
use crate::statistics::HeapStatistics;

/// Why a collection was started.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum GcReason {
    RequestedByUser,
    /// The nursery had no room for an allocation.
    AllocationFailure,
    /// Promotion failed during a minor collection.
    OldSpaceFull,
    /// `yield_point` found free-list searches too long.
    FreeListPressure,
}

/// Generation of a live object, as seen by the mutator.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Generation {
    Nursery,
    Young,
    Old,
}

/// Where the next nursery allocation will be attempted.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct NurseryPosition {
    pub pool: PoolId,
    pub remaining_words: usize,
}

/// Collector view of an address: like [`Generation`] but distinguishes the
/// two semispaces.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Region {
    Nursery,
    YoungTo,
    YoungFrom,
    Old,
}

#[derive(Default)]
pub(crate) struct CollectorState {
    pub in_minor: bool,
    /// Set once a major collection starts and cleared when the minor
    /// collection that follows it finishes. While set, promotion grows the
    /// old generation instead of failing.
    pub in_major: bool,
    pub young_pool_needed: bool,
    pub old_pool_needed: bool,
    pub skip_free_list: bool,
    /// Runs skipped by the last free-list search.
    pub free_list_hops: usize,
    /// Words promoted by the running minor collection.
    pub promoted_words: usize,
}

#[derive(Default)]
pub(crate) struct Counters {
    pub minor_collections: usize,
    pub major_collections: usize,
    pub last_promoted_words: usize,
    pub total_promoted_words: usize,
    pub old_live_words: usize,
    pub stale_remembered_bits: usize,
}

/// A generational heap owned by one mutator thread.
///
/// Objects are allocated in the nursery, copied into the young generation by
/// their first minor collection and promoted into the old generation by their
/// second. The old generation is mark-swept and reuses dead memory through a
/// first-fit free list.
///
/// Every allocation may collect and move any object, so references held
/// across an allocation must be rooted (see [`Heap::rooted`]).
pub struct Heap {
    provider: Arc<PoolProvider>,
    pub(crate) config: HeapConfig,
    pub(crate) pools: Vec<Pool>,
    pub(crate) nursery: PoolList,
    /// Indexed by [`Semispace::index`].
    pub(crate) young: [PoolList; 2],
    pub(crate) to_space: Semispace,
    pub(crate) old: PoolList,
    pub(crate) free_list: FreeList,
    pub(crate) roots: RootStack,
    pub(crate) registry: DescriptorRegistry,
    pub(crate) state: CollectorState,
    pub(crate) counters: Counters,
    /// Minor trace work: slot and whether it lives in an old object.
    pub(crate) minor_worklist: Vec<(Slot, bool)>,
    pub(crate) major_worklist: Vec<ObjectRef>,
}

impl Heap {
    /// Heap with the default configuration on the process-wide pool provider.
    pub fn new() -> Self {
        Self::build(HeapConfig::default(), PoolProvider::global())
    }

    pub fn with_config(config: HeapConfig) -> Result<Self, ConfigError> {
        Self::with_provider(config, PoolProvider::global())
    }

    pub fn with_provider(
        config: HeapConfig,
        provider: Arc<PoolProvider>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        if let Some(limit) = provider.limit() {
            if config.initial_pools() > limit {
                return Err(ConfigError::ProviderTooSmall {
                    requested: config.initial_pools(),
                    limit,
                });
            }
        }
        Ok(Self::build(config, provider))
    }

    fn build(config: HeapConfig, provider: Arc<PoolProvider>) -> Self {
        let mut heap = Self {
            provider,
            config,
            pools: Vec::new(),
            nursery: PoolList::default(),
            young: [PoolList::default(), PoolList::default()],
            to_space: Semispace::A,
            old: PoolList::default(),
            free_list: FreeList::new(),
            roots: RootStack::new(),
            registry: DescriptorRegistry::default(),
            state: CollectorState::default(),
            counters: Counters::default(),
            minor_worklist: Vec::new(),
            major_worklist: Vec::new(),
        };
        heap.expand_young(1);
        heap.expand_nursery();
        heap.expand_old(config.initial_old_pools);
        tracing::debug!(
            target: "tenure::gc",
            pools = heap.pools.len(),
            "heap initialized"
        );
        heap
    }

    pub fn config(&self) -> &HeapConfig {
        &self.config
    }

    pub fn provider(&self) -> &Arc<PoolProvider> {
        &self.provider
    }

    /* Pools and growth */

    fn add_pool(&mut self, space: Space) -> PoolId {
        let block = self.provider.acquire_or_abort();
        let id = PoolId(self.pools.len() as u32);
        self.pools.push(Pool::new(block, id, space));
        match space {
            Space::Nursery => self.nursery.pools.push(id),
            Space::Young(semispace) => self.young[semispace.index()].pools.push(id),
            Space::Old => self.old.pools.push(id),
        }
        id
    }

    /// Pools in both semispaces.
    pub(crate) fn young_pool_count(&self) -> usize {
        self.young[0].len() + self.young[1].len()
    }

    /// Grow the nursery to `nursery_ratio` pools per young pool.
    pub(crate) fn expand_nursery(&mut self) {
        let target = self.young_pool_count() * self.config.nursery_ratio;
        let before = self.nursery.len();
        while self.nursery.len() < target {
            self.add_pool(Space::Nursery);
        }
        if self.nursery.len() > before {
            tracing::debug!(target: "tenure::gc", pools = self.nursery.len(), "nursery grown");
        }
    }

    /// Add `pools` pools to each semispace.
    pub(crate) fn expand_young(&mut self, pools: usize) {
        for _ in 0..pools {
            self.add_pool(Space::Young(Semispace::A));
            self.add_pool(Space::Young(Semispace::B));
        }
        if pools > 0 {
            tracing::debug!(target: "tenure::gc", pools = self.young_pool_count(), "young generation grown");
        }
    }

    pub(crate) fn expand_old(&mut self, pools: usize) {
        for _ in 0..pools {
            self.add_pool(Space::Old);
        }
        if pools > 0 {
            tracing::debug!(target: "tenure::gc", pools = self.old.len(), "old generation grown");
        }
    }

    #[inline]
    pub(crate) fn pool_of(&self, addr: usize) -> &Pool {
        let id = unsafe { pool_id_of(addr) };
        let pool = &self.pools[id.index()];
        debug_assert_eq!(pool.base() as usize, crate::globals::pool_base(addr));
        pool
    }

    #[inline]
    pub(crate) fn region_of(&self, addr: usize) -> Region {
        match self.pool_of(addr).space() {
            Space::Nursery => Region::Nursery,
            Space::Young(semispace) if semispace == self.to_space => Region::YoungTo,
            Space::Young(_) => Region::YoungFrom,
            Space::Old => Region::Old,
        }
    }

    /// Record `slot`, which must be a word of an old object, in its pool's
    /// remembered set.
    pub(crate) fn remember(&mut self, slot: Slot) {
        let addr = slot.as_ptr() as usize;
        let id = unsafe { pool_id_of(addr) };
        let pool = &mut self.pools[id.index()];
        let offset = pool.offset_of(addr);
        if let Some(set) = pool.remembered.as_mut() {
            set.record(offset);
        }
    }

    /* Allocation */

    /// Allocate an object shaped by `descriptor`: zeroed, header installed.
    /// May run a minor (and through it a major) collection.
    pub fn allocate(&mut self, descriptor: Descriptor) -> ObjectRef {
        let object = self.registry.object(descriptor);
        unsafe { self.allocate_raw(object) }
    }

    /// Allocate by descriptor object.
    ///
    /// # Safety
    /// `descriptor` must be the current location of a descriptor object that
    /// is rooted (every descriptor from the registry is).
    pub unsafe fn allocate_raw(&mut self, mut descriptor: ObjectRef) -> ObjectRef {
        let words = object_words(descriptor);
        if words > POOL_CAPACITY_WORDS {
            object_too_large_abort(words, POOL_CAPACITY_WORDS);
        }
        loop {
            if let Some(object) = bump(&mut self.pools, &mut self.nursery, words) {
                std::ptr::write_bytes(object.as_ptr(), 0, words);
                object.set_header(HeaderWord::resting(descriptor));
                return object;
            }
            self.collect_minor_because(GcReason::AllocationFailure);
            // The descriptor is a heap object too and may just have moved.
            descriptor = descriptor.resolve();
        }
    }

    /// Zeroed nursery words with no header, for objects that install their
    /// own header right away.
    pub(crate) fn allocate_words(&mut self, words: usize) -> ObjectRef {
        if words > POOL_CAPACITY_WORDS {
            object_too_large_abort(words, POOL_CAPACITY_WORDS);
        }
        loop {
            if let Some(object) = bump(&mut self.pools, &mut self.nursery, words) {
                unsafe {
                    std::ptr::write_bytes(object.as_ptr(), 0, words);
                }
                return object;
            }
            self.collect_minor_because(GcReason::AllocationFailure);
        }
    }

    /// Descriptor lookup and allocation in one step.
    pub fn allocate_shape(&mut self, size: usize, bitmap: &[usize]) -> ObjectRef {
        let descriptor = self.descriptor(size, bitmap);
        self.allocate(descriptor)
    }

    /// Array of `len` null references. Word 1 holds the length.
    pub fn allocate_pointer_array(&mut self, len: usize) -> ObjectRef {
        let descriptor = self.pointer_array_descriptor(len);
        let array = self.allocate(descriptor);
        unsafe { array.write(1, len) };
        array
    }

    /// Zeroed array of `count` elements of `element_bytes` bytes each. Word 1
    /// holds `count`; the data starts at word 2.
    pub fn allocate_data_array(&mut self, count: usize, element_bytes: usize) -> ObjectRef {
        let bytes = match count.checked_mul(element_bytes) {
            Some(bytes) => bytes,
            None => object_too_large_abort(usize::MAX, POOL_CAPACITY_WORDS),
        };
        let descriptor = self.data_array_descriptor(bytes);
        let array = self.allocate(descriptor);
        unsafe { array.write(1, count) };
        array
    }

    /// To-space allocation for survivors of a minor collection. Growth is
    /// deferred to the next call so the semispaces are never grown while a
    /// bump is in flight.
    pub(crate) fn alloc_young_to(&mut self, words: usize) -> ObjectRef {
        loop {
            if self.state.young_pool_needed {
                self.expand_young(1);
                self.state.young_pool_needed = false;
            }
            let to_space = &mut self.young[self.to_space.index()];
            if let Some(object) = bump(&mut self.pools, to_space, words) {
                return object;
            }
            self.state.young_pool_needed = true;
        }
    }

    /// Old-generation allocation for promotion. `None` tells the minor
    /// collector to run a major collection first; once one has run, the old
    /// generation is grown instead.
    pub(crate) fn alloc_old(&mut self, words: usize) -> Option<ObjectRef> {
        loop {
            if self.state.old_pool_needed {
                self.expand_old(1);
                self.state.old_pool_needed = false;
            }
            if !self.state.skip_free_list && !self.free_list.is_empty() {
                let fit = unsafe { self.free_list.allocate(words) };
                self.state.free_list_hops = fit.hops;
                if let Some(start) = fit.start {
                    return Some(ObjectRef::from_non_null(start));
                }
            }
            self.state.skip_free_list = false;

            if let Some(object) = bump(&mut self.pools, &mut self.old, words) {
                return Some(object);
            }
            if !self.state.in_major {
                return None;
            }
            self.state.old_pool_needed = true;
            self.state.skip_free_list = true;
        }
    }

    /* Roots */

    /// Run `f` with `cells` registered as roots. Collections during `f`
    /// update the cells when their referents move.
    pub fn rooted<R>(
        &mut self,
        cells: &[&Cell<Option<ObjectRef>>],
        f: impl FnOnce(&mut Heap) -> R,
    ) -> R {
        let slots: Vec<Slot> = cells
            .iter()
            .map(|cell| NonNull::from(*cell).cast::<Option<ObjectRef>>())
            .collect();
        unsafe {
            self.roots.push_frame(&slots);
        }
        let guard = FrameGuard(self);
        f(&mut *guard.0)
    }

    /// # Safety
    /// See [`RootStack::push_frame`].
    pub unsafe fn push_frame(&mut self, slots: &[Slot]) {
        self.roots.push_frame(slots);
    }

    pub fn pop_frame(&mut self) -> bool {
        self.roots.pop_frame()
    }

    /// # Safety
    /// See [`RootStack::push_global`].
    pub unsafe fn push_global(&mut self, slot: Slot) {
        self.roots.push_global(slot);
    }

    pub fn roots(&self) -> &RootStack {
        &self.roots
    }

    /// Every root slot: frames, globals and the descriptor registry.
    pub(crate) fn root_slots(&mut self) -> Vec<Slot> {
        let mut slots = Vec::with_capacity(self.roots.len() + self.registry.len());
        self.roots.walk(|slot| slots.push(slot));
        slots.extend(self.registry.slots());
        slots
    }

    /* Field access */

    /// Record `slot` if it is a word of an old object now referencing a
    /// younger one. Must follow every reference store into a heap object.
    ///
    /// # Safety
    /// `slot` must be a word of a live object of this heap.
    pub unsafe fn write_barrier(&mut self, slot: Slot) {
        let value = match load(slot) {
            Some(value) => value,
            None => return,
        };
        if self.region_of(slot.as_ptr() as usize) == Region::Old
            && self.region_of(value.addr()) != Region::Old
        {
            self.remember(slot);
        }
    }

    /// Store `value` into reference field `index` of `object`.
    pub fn write_ref(&mut self, object: ObjectRef, index: usize, value: Option<ObjectRef>) {
        let slot = object.slot(index);
        unsafe {
            store(slot, value);
            self.write_barrier(slot);
        }
    }

    pub fn read_ref(&self, object: ObjectRef, index: usize) -> Option<ObjectRef> {
        unsafe { load(object.slot(index)) }
    }

    pub fn read_word(&self, object: ObjectRef, index: usize) -> usize {
        unsafe { object.read(index) }
    }

    /// Store a non-reference word. No barrier.
    pub fn write_word(&mut self, object: ObjectRef, index: usize, value: usize) {
        unsafe { object.write(index, value) }
    }

    pub fn array_length(&self, array: ObjectRef) -> usize {
        unsafe { array.read(1) }
    }

    /// Address of the first element of an array.
    pub fn array_data(&self, array: ObjectRef) -> *mut usize {
        array.word_ptr(ARRAY_HEADER_WORDS)
    }

    /// Size of `object` in words.
    pub fn object_size(&self, object: ObjectRef) -> usize {
        unsafe { object_words(object.descriptor()) }
    }

    /// Whether the remembered set of the pool holding `slot` has its bit set.
    pub fn is_remembered(&self, slot: Slot) -> bool {
        let addr = slot.as_ptr() as usize;
        let pool = self.pool_of(addr);
        pool.remembered
            .as_ref()
            .map_or(false, |set| set.contains(pool.offset_of(addr)))
    }

    /* Inspection */

    pub fn generation_of(&self, object: ObjectRef) -> Generation {
        match self.pool_of(object.addr()).space() {
            Space::Nursery => Generation::Nursery,
            Space::Young(_) => Generation::Young,
            Space::Old => Generation::Old,
        }
    }

    pub fn nursery_position(&self) -> NurseryPosition {
        let id = self.nursery.pools[self.nursery.cursor];
        NurseryPosition {
            pool: id,
            remaining_words: self.pools[id.index()].remaining_words(),
        }
    }

    fn used_words(&self, list: &PoolList) -> usize {
        list.iter()
            .map(|id| self.pools[id.index()].used_words())
            .sum()
    }

    pub(crate) fn old_used_words(&self) -> usize {
        self.used_words(&self.old)
    }

    pub fn statistics(&self) -> HeapStatistics {
        let remembered_slots = self
            .old
            .iter()
            .filter_map(|id| self.pools[id.index()].remembered.as_ref())
            .map(|set| set.count())
            .sum();
        HeapStatistics {
            nursery_pools: self.nursery.len(),
            young_pools: self.young_pool_count(),
            old_pools: self.old.len(),
            nursery_used_words: self.used_words(&self.nursery),
            young_used_words: self.used_words(&self.young[self.to_space.index()]),
            old_used_words: self.old_used_words(),
            free_list_words: unsafe { self.free_list.total_words() },
            free_list_runs: self.free_list.runs(),
            last_free_list_hops: self.state.free_list_hops,
            minor_collections: self.counters.minor_collections,
            major_collections: self.counters.major_collections,
            last_promoted_words: self.counters.last_promoted_words,
            total_promoted_words: self.counters.total_promoted_words,
            old_live_words: self.counters.old_live_words,
            remembered_slots,
            stale_remembered_bits: self.counters.stale_remembered_bits,
            descriptors: self.registry.len(),
        }
    }

    /* Heuristics */

    /// Mutator checkpoint: runs a major collection when the last free-list
    /// search skipped more runs than the configured limit. Returns whether a
    /// collection ran.
    pub fn yield_point(&mut self) -> bool {
        if self.state.free_list_hops <= self.config.freelist_hop_limit {
            return false;
        }
        self.collect_major_because(GcReason::FreeListPressure);
        self.state.free_list_hops = 0;
        true
    }

    /// Young pools wanted for `promoted` promoted words.
    pub(crate) fn young_pools_needed(&self, promoted: usize) -> usize {
        (promoted * self.config.young_headroom / WORDS_PER_POOL + 1)
            .saturating_sub(self.young_pool_count())
    }

    /// Old pools wanted for `live` live words.
    pub(crate) fn old_pools_needed(&self, live: usize) -> usize {
        (live * self.config.old_headroom / WORDS_PER_POOL + 1).saturating_sub(self.old.len())
    }

    /// Hand every pool of this heap back to the provider. Nothing is cleared.
    pub fn release(self) {}
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        tracing::debug!(
            target: "tenure::gc",
            pools = self.pools.len(),
            "releasing heap pools"
        );
        self.provider
            .release(self.pools.drain(..).map(|pool| pool.block()));
    }
}

struct FrameGuard<'a>(&'a mut Heap);

impl Drop for FrameGuard<'_> {
    fn drop(&mut self) {
        self.0.roots.pop_frame();
    }
}

/// Bump `words` words from the cursor pool of `list`, moving the cursor
/// forward past pools that are too full.
fn bump(pools: &mut [Pool], list: &mut PoolList, words: usize) -> Option<ObjectRef> {
    loop {
        let id = list.current()?;
        if let Some(address) = pools[id.index()].bump(words) {
            return NonNull::new(address).map(ObjectRef::from_non_null);
        }
        if list.cursor + 1 >= list.len() {
            return None;
        }
        list.cursor += 1;
    }
}
