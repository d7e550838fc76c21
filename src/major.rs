//! Major collection: mark from the roots across every generation, then sweep
//! the old generation into a fresh free list.
//!
//! Marking also repairs references: a slot still naming an object that a
//! pending minor collection already copied is rewritten to the copy, and every
//! old-to-young edge met on the way is recorded again, since the remembered
//! sets are cleared first.
use std::ptr::NonNull;
use std::time::Instant;

use crate::descriptor::{for_each_reference, object_words};
use crate::formatted_size;
use crate::gcref::{load, store, ObjectRef};
use crate::globals::WORD_BYTES;
use crate::header::{HeaderState, HeaderWord};
use crate::heap::{GcReason, Heap, Region};

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum MajorPhase {
    ClearRemembered,
    Mark,
    Sweep,
    /// Size the old generation from the live words found by the sweep.
    Grow { live: usize },
    Finish,
}

impl Heap {
    /// Full collection. Followed by one minor collection so that the young
    /// generations are consistent again afterwards.
    pub fn collect_major(&mut self) {
        self.collect_major_because(GcReason::RequestedByUser);
    }

    pub(crate) fn collect_major_because(&mut self, reason: GcReason) {
        let nested = self.state.in_minor;
        let verbose = if self.config.verbose {
            Some((Instant::now(), self.old_used_words()))
        } else {
            None
        };
        self.state.in_major = true;
        tracing::debug!(target: "tenure::gc", ?reason, nested, "major collection started");

        let mut phase = MajorPhase::ClearRemembered;
        loop {
            phase = match phase {
                MajorPhase::ClearRemembered => {
                    for index in 0..self.old.len() {
                        let id = self.old.pools[index];
                        if let Some(set) = self.pools[id.index()].remembered.as_mut() {
                            set.clear();
                        }
                    }
                    MajorPhase::Mark
                }
                MajorPhase::Mark => {
                    unsafe { self.mark_from_roots() };
                    MajorPhase::Sweep
                }
                MajorPhase::Sweep => MajorPhase::Grow {
                    live: unsafe { self.sweep_old() },
                },
                MajorPhase::Grow { live } => {
                    self.counters.old_live_words = live;
                    let needed = self.old_pools_needed(live);
                    self.expand_old(needed);
                    MajorPhase::Finish
                }
                MajorPhase::Finish => break,
            };
        }
        self.counters.major_collections += 1;

        let live = self.counters.old_live_words;
        tracing::debug!(
            target: "tenure::gc",
            live_words = live,
            free_runs = self.free_list.runs(),
            old_pools = self.old.len(),
            "major collection finished"
        );
        if let Some((time, old_before)) = verbose {
            tracing::info!(
                target: "tenure::gc",
                "[gc] GC({}) Pause Old ({:?}) {}->{}({}) {:.4}ms",
                self.counters.minor_collections + self.counters.major_collections,
                reason,
                formatted_size(old_before * WORD_BYTES),
                formatted_size(live * WORD_BYTES),
                formatted_size(self.old.len() * crate::globals::POOL_BYTES),
                time.elapsed().as_micros() as f64 / 1000.0
            );
        }

        if nested {
            // The interrupted minor collection seeds again from scratch.
            self.minor_worklist.clear();
        } else {
            self.collect_minor_because(reason);
        }
    }

    unsafe fn mark_from_roots(&mut self) {
        self.major_worklist.clear();
        for slot in self.root_slots() {
            if let Some(object) = load(slot) {
                let object = object.resolve();
                store(slot, Some(object));
                self.mark_and_push(object);
            }
        }
        while let Some(object) = self.major_worklist.pop() {
            self.scan_major(object);
        }
    }

    #[inline]
    unsafe fn mark_and_push(&mut self, object: ObjectRef) {
        if !object.is_marked() {
            object.mark();
            self.major_worklist.push(object);
        }
    }

    /// Mark the children of `object`, which is itself marked.
    unsafe fn scan_major(&mut self, object: ObjectRef) {
        let in_old = self.region_of(object.addr()) == Region::Old;

        let header = object.header();
        let descriptor = object.descriptor();
        if descriptor.addr() != header.address() {
            object.set_header(HeaderWord::resting(descriptor).with_mark());
        }
        self.mark_and_push(descriptor);
        if in_old && self.region_of(descriptor.addr()) != Region::Old {
            self.remember(object.slot(0));
        }

        let header_slot = object.slot(0);
        for_each_reference(object, descriptor, |slot| {
            if slot == header_slot {
                return;
            }
            if let Some(child) = load(slot) {
                let child = child.resolve();
                store(slot, Some(child));
                self.mark_and_push(child);
                if in_old && self.region_of(child.addr()) != Region::Old {
                    self.remember(slot);
                }
            }
        });
    }

    /// Unmark live old objects and rebuild the free list from everything in
    /// between. Returns the live word count.
    unsafe fn sweep_old(&mut self) -> usize {
        self.free_list.clear();
        let mut live = 0;
        for index in 0..self.old.in_use().len() {
            let id = self.old.pools[index];
            let (start, free) = {
                let pool = &self.pools[id.index()];
                (pool.start(), pool.free())
            };

            let mut cursor = start;
            while cursor < free {
                let object = ObjectRef::from_non_null(NonNull::new_unchecked(cursor));
                if object.is_marked() {
                    object.unmark();
                    let words = object_words(object.descriptor());
                    live += words;
                    cursor = cursor.add(words);
                    continue;
                }

                // Coalesce dead objects and earlier runs up to the next live object.
                let run_start = cursor;
                while cursor < free {
                    let dead = ObjectRef::from_non_null(NonNull::new_unchecked(cursor));
                    cursor = match dead.header().state() {
                        HeaderState::Marked(_) => break,
                        HeaderState::FreeRun { end } => end.as_ptr(),
                        HeaderState::Resting(_) => cursor.add(object_words(dead.descriptor())),
                        HeaderState::Forwarded(target) => {
                            unreachable!("old object {:?} forwarded to {:?}", dead, target)
                        }
                    };
                }
                self.free_list.push_run(
                    NonNull::new_unchecked(run_start),
                    NonNull::new_unchecked(cursor),
                );
            }
        }
        live
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use crate::heap::{Generation, Heap};

    /// Allocate and promote `count` unrooted arrays so the old generation
    /// holds garbage for the next sweep.
    fn promote_garbage(heap: &mut Heap, count: usize) {
        let keep = Cell::new(None);
        heap.rooted(&[&keep], |heap| {
            let list = heap.allocate_pointer_array(count);
            keep.set(Some(list));
            for index in 0..count {
                let element = heap.allocate_pointer_array(3);
                heap.write_ref(keep.get().unwrap(), 2 + index, Some(element));
            }
            heap.collect_minor();
            heap.collect_minor();
            assert_eq!(heap.generation_of(keep.get().unwrap()), Generation::Old);
        });
    }

    #[test]
    fn sweep_builds_free_runs_from_dead_objects() {
        let mut heap = Heap::new();
        promote_garbage(&mut heap, 16);
        assert_eq!(heap.statistics().free_list_runs, 0);

        heap.collect_major();
        let stats = heap.statistics();
        assert!(stats.free_list_runs >= 1);
        assert!(stats.free_list_words >= 17 * 4);
        assert_eq!(stats.major_collections, 1);
    }

    #[test]
    fn major_collection_is_idempotent() {
        let mut heap = Heap::new();
        let root = Cell::new(None);
        heap.rooted(&[&root], |heap| {
            root.set(Some(heap.allocate_pointer_array(4)));
            for index in 0..4 {
                let child = heap.allocate_data_array(5, 8);
                heap.write_ref(root.get().unwrap(), 2 + index, Some(child));
            }
            promote_garbage(heap, 8);

            heap.collect_major();
            let first = heap.statistics();
            heap.collect_major();
            let second = heap.statistics();
            assert_eq!(first.old_live_words, second.old_live_words);
            assert!(second.free_list_words <= first.free_list_words);
        });
    }

    #[test]
    fn verbose_major_collection_reports_old_usage() {
        let config = crate::HeapConfig {
            verbose: true,
            ..Default::default()
        };
        let mut heap = Heap::with_config(config).unwrap();
        promote_garbage(&mut heap, 8);
        let before = heap.old_used_words();
        assert!(before > 0);
        heap.collect_major();
        assert_eq!(heap.statistics().major_collections, 1);
        assert!(heap.statistics().old_live_words < before);
    }

    #[test]
    fn free_runs_are_reused_by_promotion() {
        let mut heap = Heap::new();
        promote_garbage(&mut heap, 32);
        heap.collect_major();
        let runs = heap.statistics().free_list_words;
        assert!(runs > 0);

        let survivor = Cell::new(None);
        heap.rooted(&[&survivor], |heap| {
            survivor.set(Some(heap.allocate_pointer_array(3)));
            heap.collect_minor();
            heap.collect_minor();
            assert_eq!(heap.generation_of(survivor.get().unwrap()), Generation::Old);
        });
        assert!(heap.statistics().free_list_words < runs);
    }
}
