use crate::formatted_size;
use crate::globals::WORD_BYTES;

/// Snapshot of a heap, see [`crate::heap::Heap::statistics`]. Sizes are in words.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct HeapStatistics {
    pub nursery_pools: usize,
    /// Both semispaces.
    pub young_pools: usize,
    pub old_pools: usize,
    pub nursery_used_words: usize,
    /// Words in the current to-space.
    pub young_used_words: usize,
    /// Bump extent of the old generation, free runs included.
    pub old_used_words: usize,
    pub free_list_words: usize,
    pub free_list_runs: usize,
    pub last_free_list_hops: usize,
    pub minor_collections: usize,
    pub major_collections: usize,
    /// Words promoted into the old generation by the last minor collection.
    pub last_promoted_words: usize,
    pub total_promoted_words: usize,
    /// Live old words found by the last major collection.
    pub old_live_words: usize,
    pub remembered_slots: usize,
    /// Remembered-set bits dropped while seeding because their slot no longer
    /// referenced a young object.
    pub stale_remembered_bits: usize,
    pub descriptors: usize,
}

impl HeapStatistics {
    pub fn total_pools(&self) -> usize {
        self.nursery_pools + self.young_pools + self.old_pools
    }
}

impl std::fmt::Display for HeapStatistics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let bytes = |words: usize| formatted_size(words * WORD_BYTES);
        writeln!(f, "Heap statistics:")?;
        writeln!(
            f,
            "  Pools: {} nursery, {} young, {} old",
            self.nursery_pools, self.young_pools, self.old_pools
        )?;
        writeln!(f, "  Nursery usage: {}", bytes(self.nursery_used_words))?;
        writeln!(f, "  Young usage: {}", bytes(self.young_used_words))?;
        writeln!(
            f,
            "  Old usage: {} ({} in {} free runs)",
            bytes(self.old_used_words),
            bytes(self.free_list_words),
            self.free_list_runs
        )?;
        writeln!(
            f,
            "  Collections: {} minor, {} major",
            self.minor_collections, self.major_collections
        )?;
        writeln!(
            f,
            "  Promoted: {} last, {} total",
            bytes(self.last_promoted_words),
            bytes(self.total_promoted_words)
        )?;
        writeln!(f, "  Old live after last major: {}", bytes(self.old_live_words))?;
        writeln!(
            f,
            "  Remembered slots: {} ({} stale bits dropped)",
            self.remembered_slots, self.stale_remembered_bits
        )?;
        writeln!(f, "  Descriptors: {}", self.descriptors)?;
        Ok(())
    }
}
