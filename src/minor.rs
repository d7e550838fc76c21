//! Minor collection: copies nursery survivors into the young to-space and
//! promotes young from-space survivors into the old generation.
//!
//! The trace is seeded from the remembered sets of the old pools and from the
//! roots, so the old generation itself is never scanned. Every copied object
//! leaves a forwarding header behind; slots reaching it later are redirected.
//! When promotion cannot find old memory, a major collection runs, the
//! worklist is dropped and tracing restarts from a fresh seed.
use std::time::Instant;

use crate::descriptor::{for_each_reference, object_words};
use crate::formatted_size;
use crate::gcref::{load, store, ObjectRef, Slot};
use crate::globals::WORD_BYTES;
use crate::heap::{GcReason, Heap, Region};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum MinorPhase {
    /// Exchange the to/from roles of the semispaces.
    Swap,
    /// Fill the worklist from remembered sets and roots.
    Seed,
    Trace,
    /// Promotion failed: run a major collection, then seed again.
    RetryAfterMajor,
    /// Reset evacuated pools and size the generations.
    Finalize,
}

enum TraceOutcome {
    Complete,
    OldSpaceFull,
}

impl Heap {
    pub fn collect_minor(&mut self) {
        self.collect_minor_because(GcReason::RequestedByUser);
    }

    pub(crate) fn collect_minor_because(&mut self, reason: GcReason) {
        debug_assert!(!self.state.in_minor, "minor collection re-entered");
        let time = if self.config.verbose {
            Some(Instant::now())
        } else {
            None
        };
        self.state.in_minor = true;
        self.state.promoted_words = 0;
        tracing::debug!(target: "tenure::gc", ?reason, "minor collection started");

        let mut retries = 0;
        let mut phase = MinorPhase::Swap;
        loop {
            phase = match phase {
                MinorPhase::Swap => {
                    self.to_space = self.to_space.other();
                    MinorPhase::Seed
                }
                MinorPhase::Seed => {
                    self.seed_minor();
                    MinorPhase::Trace
                }
                MinorPhase::Trace => match self.trace_minor() {
                    TraceOutcome::Complete => MinorPhase::Finalize,
                    TraceOutcome::OldSpaceFull => MinorPhase::RetryAfterMajor,
                },
                MinorPhase::RetryAfterMajor => {
                    retries += 1;
                    tracing::debug!(
                        target: "tenure::gc",
                        retries,
                        "old generation full during promotion, collecting it"
                    );
                    self.collect_major_because(GcReason::OldSpaceFull);
                    MinorPhase::Seed
                }
                MinorPhase::Finalize => {
                    self.finish_minor();
                    break;
                }
            };
        }

        let promoted = self.counters.last_promoted_words;
        tracing::debug!(
            target: "tenure::gc",
            promoted_words = promoted,
            retries,
            young_pools = self.young_pool_count(),
            nursery_pools = self.nursery.len(),
            "minor collection finished"
        );
        if let Some(time) = time {
            tracing::info!(
                target: "tenure::gc",
                "[gc] GC({}) Pause Young ({:?}) Promoted {} (young space: {}) {:.4}ms",
                self.counters.minor_collections + self.counters.major_collections,
                reason,
                formatted_size(promoted * WORD_BYTES),
                formatted_size(self.statistics().young_used_words * WORD_BYTES),
                time.elapsed().as_micros() as f64 / 1000.0
            );
        }
    }

    fn seed_minor(&mut self) {
        self.minor_worklist.clear();

        let mut pending = Vec::new();
        let mut stale = 0;
        for index in 0..self.old.len() {
            let id = self.old.pools[index];
            let mut set = match self.pools[id.index()].remembered.take() {
                Some(set) => set,
                None => continue,
            };
            let pool = &self.pools[id.index()];
            set.retain(|offset| {
                let slot = pool.word_at(offset).cast::<Option<ObjectRef>>();
                match unsafe { slot.read() } {
                    Some(referent) if self.region_of(referent.addr()) != Region::Old => {
                        pending.push(slot);
                        true
                    }
                    _ => {
                        stale += 1;
                        false
                    }
                }
            });
            self.pools[id.index()].remembered = Some(set);
        }
        if stale > 0 {
            tracing::debug!(target: "tenure::gc", stale, "dropped stale remembered slots");
            self.counters.stale_remembered_bits += stale;
        }

        for slot in pending {
            if let Some(slot) = Slot::new(slot) {
                unsafe { self.push_if_needed(slot, false) };
            }
        }
        for slot in self.root_slots() {
            unsafe { self.push_if_needed(slot, false) };
        }
    }

    /// Queue `slot` unless its referent needs no work. Referents that were
    /// already copied are redirected on the spot.
    unsafe fn push_if_needed(&mut self, slot: Slot, remember: bool) {
        let referent = match load(slot) {
            Some(referent) => referent,
            None => return,
        };
        match self.region_of(referent.addr()) {
            Region::Old => return,
            // Already evacuated, unless a major collection marked it for a rescan.
            Region::YoungTo if !referent.is_marked() => {
                if remember {
                    self.remember(slot);
                }
                return;
            }
            _ => {}
        }
        if let Some(target) = referent.forwarding_target() {
            store(slot, Some(target));
            if remember && self.region_of(target.addr()) != Region::Old {
                self.remember(slot);
            }
            return;
        }
        self.minor_worklist.push((slot, remember));
    }

    fn trace_minor(&mut self) -> TraceOutcome {
        while let Some((slot, remember)) = self.minor_worklist.pop() {
            unsafe {
                let object = match load(slot) {
                    Some(object) => object,
                    None => continue,
                };
                let target = match self.region_of(object.addr()) {
                    // Promoted through another slot since this one was queued.
                    Region::Old => continue,
                    Region::YoungTo => {
                        if object.is_marked() {
                            object.unmark();
                            self.scan_minor(object);
                        }
                        if remember {
                            self.remember(slot);
                        }
                        continue;
                    }
                    region => match object.forwarding_target() {
                        Some(target) => target,
                        None => {
                            object.unmark();
                            let words = object_words(object.descriptor());
                            let copy = if region == Region::Nursery {
                                self.alloc_young_to(words)
                            } else {
                                match self.alloc_old(words) {
                                    Some(copy) => {
                                        self.state.promoted_words += words;
                                        copy
                                    }
                                    None => return TraceOutcome::OldSpaceFull,
                                }
                            };
                            std::ptr::copy_nonoverlapping(object.as_ptr(), copy.as_ptr(), words);
                            object.forward_to(copy);
                            self.scan_minor(copy);
                            copy
                        }
                    },
                };
                store(slot, Some(target));
                if remember && self.region_of(target.addr()) != Region::Old {
                    self.remember(slot);
                }
            }
        }
        TraceOutcome::Complete
    }

    /// Queue the reference slots of `object`, header included.
    unsafe fn scan_minor(&mut self, object: ObjectRef) {
        let remember = self.region_of(object.addr()) == Region::Old;
        let descriptor = object.descriptor();
        for_each_reference(object, descriptor, |slot| self.push_if_needed(slot, remember));
    }

    fn finish_minor(&mut self) {
        self.minor_worklist.clear();

        for index in 0..self.nursery.len() {
            let id = self.nursery.pools[index];
            self.pools[id.index()].reset();
        }
        self.nursery.cursor = 0;
        let from_space = self.to_space.other().index();
        for index in 0..self.young[from_space].len() {
            let id = self.young[from_space].pools[index];
            self.pools[id.index()].reset();
        }
        self.young[from_space].cursor = 0;

        let promoted = self.state.promoted_words;
        let needed = self.young_pools_needed(promoted);
        self.expand_young(needed);
        self.expand_nursery();

        self.counters.minor_collections += 1;
        self.counters.last_promoted_words = promoted;
        self.counters.total_promoted_words += promoted;
        self.state.in_minor = false;
        self.state.in_major = false;
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use crate::heap::{Generation, Heap};

    #[test]
    fn stale_remembered_bits_are_dropped_during_seeding() {
        let mut heap = Heap::new();
        let holder = Cell::new(None);
        let young = Cell::new(None);
        heap.rooted(&[&holder, &young], |heap| {
            holder.set(Some(heap.allocate_pointer_array(2)));
            heap.collect_minor();
            heap.collect_minor();
            let array = holder.get().unwrap();
            assert_eq!(heap.generation_of(array), Generation::Old);

            young.set(Some(heap.allocate_pointer_array(1)));
            heap.write_ref(array, 2, young.get());
            let slot = array.slot(2);
            assert!(heap.is_remembered(slot));

            // Overwrite without a barrier: the bit now names a null slot.
            heap.write_word(array, 2, 0);
            let before = heap.statistics().stale_remembered_bits;
            heap.collect_minor();
            assert!(!heap.is_remembered(slot));
            assert!(heap.statistics().stale_remembered_bits > before);
        });
    }

    #[test]
    fn remembered_bits_for_young_referents_survive_seeding() {
        let mut heap = Heap::new();
        let holder = Cell::new(None);
        heap.rooted(&[&holder], |heap| {
            holder.set(Some(heap.allocate_pointer_array(1)));
            heap.collect_minor();
            heap.collect_minor();
            let array = holder.get().unwrap();

            let child = heap.allocate_pointer_array(0);
            heap.write_ref(array, 2, Some(child));
            heap.collect_minor();

            let moved = heap.read_ref(array, 2).unwrap();
            assert_ne!(moved, child);
            assert_eq!(heap.generation_of(moved), Generation::Young);
            assert!(heap.is_remembered(array.slot(2)));

            // A second minor promotes the child; the bit goes stale and is
            // dropped by the seeding after that.
            heap.collect_minor();
            let promoted = heap.read_ref(array, 2).unwrap();
            assert_eq!(heap.generation_of(promoted), Generation::Old);
            heap.collect_minor();
            assert!(!heap.is_remembered(array.slot(2)));
        });
    }
}
