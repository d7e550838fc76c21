use std::mem::size_of;

/// log2 of the pool size. Every pool is aligned to its own size so the owning
/// pool of any interior address is found by masking.
pub const POOL_SHIFT: usize = 20;
pub const POOL_BYTES: usize = 1 << POOL_SHIFT;
pub const WORD_BYTES: usize = size_of::<usize>();
pub const BITS_PER_WORD: usize = WORD_BYTES * 8;
pub const WORDS_PER_POOL: usize = POOL_BYTES / WORD_BYTES;
/// Words at the start of every pool that hold pool metadata. Kept even so that
/// object starts stay two-word aligned.
pub const POOL_HEADER_WORDS: usize = 2;
/// Largest object (in words) a single pool can hold.
pub const POOL_CAPACITY_WORDS: usize = WORDS_PER_POOL - POOL_HEADER_WORDS;
/// Words of remembered-set bitmap per old pool, one bit per pool word.
pub const REMEMBERED_SET_WORDS: usize = WORDS_PER_POOL / BITS_PER_WORD;
/// Pools mapped from the OS at once when the provider runs dry.
pub const POOLS_PER_CHUNK: usize = 16;

pub const MARK_BIT: usize = 0b001;
pub const FREE_RUN_BIT: usize = 0b010;
pub const FORWARDED_BIT: usize = 0b100;
pub const TAG_MASK: usize = MARK_BIT | FREE_RUN_BIT | FORWARDED_BIT;

/// Bitmap of a descriptor object: only the header word is a reference.
pub const DESCRIPTOR_DESCRIPTION: usize = 1;
/// Descriptor object words before the pointer bitmap: header and size.
pub const DESCRIPTOR_HEADER_WORDS: usize = 2;
/// Array object words before the elements: header and length.
pub const ARRAY_HEADER_WORDS: usize = 2;

pub const DEFAULT_NURSERY_RATIO: usize = 2;
pub const DEFAULT_YOUNG_HEADROOM: usize = 3;
pub const DEFAULT_OLD_HEADROOM: usize = 2;
pub const DEFAULT_FREELIST_HOP_LIMIT: usize = 20;

#[inline(always)]
pub const fn pool_base(addr: usize) -> usize {
    addr & !(POOL_BYTES - 1)
}

/// Round a word count up to the next even number; the low bit of every size
/// stays clear so free runs can always hold their own header and link.
#[inline(always)]
pub const fn round_even(words: usize) -> usize {
    (words + 1) & !1
}

#[inline(always)]
pub const fn bitmap_words(size: usize) -> usize {
    (size + BITS_PER_WORD - 1) / BITS_PER_WORD
}

#[inline(always)]
pub const fn bytes_to_words(bytes: usize) -> usize {
    (bytes + WORD_BYTES - 1) / WORD_BYTES
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn geometry_is_consistent() {
        assert_eq!(POOL_BYTES % WORD_BYTES, 0);
        assert_eq!(POOL_CAPACITY_WORDS % 2, 0);
        assert_eq!(pool_base(POOL_BYTES * 3 + 17), POOL_BYTES * 3);
        assert_eq!(round_even(3), 4);
        assert_eq!(round_even(4), 4);
        assert_eq!(bitmap_words(64), 1);
        assert_eq!(bitmap_words(65), 2);
        assert_eq!(bytes_to_words(9), 2);
    }
}
