use crate::globals::{BITS_PER_WORD, REMEMBERED_SET_WORDS};

/// One bit per word of an old pool, set when that word may hold a reference
/// into a younger generation. `min`/`max` bound the bitmap words that have ever
/// been dirtied since the last clear so scans skip the clean remainder.
pub struct RememberedSet {
    bits: Box<[usize]>,
    min: usize,
    max: usize,
}

impl RememberedSet {
    pub fn new() -> Self {
        Self {
            bits: vec![0; REMEMBERED_SET_WORDS].into_boxed_slice(),
            min: REMEMBERED_SET_WORDS,
            max: 0,
        }
    }

    /// Record word `offset` (counted from the pool's first word).
    #[inline]
    pub fn record(&mut self, offset: usize) {
        let index = offset / BITS_PER_WORD;
        self.bits[index] |= 1 << (offset % BITS_PER_WORD);
        self.min = self.min.min(index);
        self.max = self.max.max(index);
    }

    #[inline]
    pub fn contains(&self, offset: usize) -> bool {
        let index = offset / BITS_PER_WORD;
        self.bits[index] & (1 << (offset % BITS_PER_WORD)) != 0
    }

    pub fn is_empty(&self) -> bool {
        self.min > self.max
    }

    pub fn clear(&mut self) {
        if !self.is_empty() {
            self.bits[self.min..=self.max].fill(0);
        }
        self.min = REMEMBERED_SET_WORDS;
        self.max = 0;
    }

    /// Bitmap word range that can contain set bits.
    pub fn dirty_range(&self) -> Option<(usize, usize)> {
        if self.is_empty() {
            None
        } else {
            Some((self.min, self.max))
        }
    }

    pub fn count(&self) -> usize {
        match self.dirty_range() {
            Some((min, max)) => self.bits[min..=max]
                .iter()
                .map(|word| word.count_ones() as usize)
                .sum(),
            None => 0,
        }
    }

    /// Visit every recorded offset inside the dirty range. The visitor decides
    /// whether the bit stays set; the dirty range is then shrunk to the words
    /// that still carry bits.
    pub fn retain(&mut self, mut keep: impl FnMut(usize) -> bool) {
        let (min, max) = match self.dirty_range() {
            Some(range) => range,
            None => return,
        };
        let mut new_min = REMEMBERED_SET_WORDS;
        let mut new_max = 0;
        for index in min..=max {
            let mut word = self.bits[index];
            if word == 0 {
                continue;
            }
            let mut pending = word;
            while pending != 0 {
                let bit = pending.trailing_zeros() as usize;
                pending &= pending - 1;
                if !keep(index * BITS_PER_WORD + bit) {
                    word &= !(1 << bit);
                }
            }
            self.bits[index] = word;
            if word != 0 {
                new_min = new_min.min(index);
                new_max = new_max.max(index);
            }
        }
        self.min = new_min;
        self.max = new_max;
    }
}

impl Default for RememberedSet {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_tracks_dirty_range() {
        let mut set = RememberedSet::new();
        assert!(set.is_empty());
        set.record(3);
        set.record(64 * 10 + 5);
        assert_eq!(set.dirty_range(), Some((0, 10)));
        assert!(set.contains(3));
        assert!(set.contains(645));
        assert!(!set.contains(4));
        assert_eq!(set.count(), 2);
    }

    #[test]
    fn retain_drops_rejected_bits_and_shrinks_range() {
        let mut set = RememberedSet::new();
        set.record(1);
        set.record(200);
        set.record(201);
        let mut seen = Vec::new();
        set.retain(|offset| {
            seen.push(offset);
            offset != 1
        });
        assert_eq!(seen, vec![1, 200, 201]);
        assert!(!set.contains(1));
        assert!(set.contains(200) && set.contains(201));
        assert_eq!(set.dirty_range(), Some((3, 3)));

        set.retain(|_| false);
        assert!(set.is_empty());
        assert_eq!(set.count(), 0);
    }

    #[test]
    fn clear_resets_everything() {
        let mut set = RememberedSet::new();
        set.record(100);
        set.clear();
        assert!(set.is_empty());
        assert!(!set.contains(100));
        set.record(7);
        assert_eq!(set.dirty_range(), Some((0, 0)));
    }
}
