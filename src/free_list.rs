use std::ptr::NonNull;

use crate::header::{HeaderState, HeaderWord};

/// Reclaimed old-generation memory.
///
/// Each run overlays dead memory: its first word is a free-run header holding
/// the exclusive end of the run. The list itself only keeps run starts, in the
/// order the sweeper produced them; it is never sorted.
pub struct FreeList {
    runs: Vec<NonNull<usize>>,
}

/// Outcome of a first-fit search.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FreeListFit {
    pub start: Option<NonNull<usize>>,
    /// Runs examined and rejected before the search ended.
    pub hops: usize,
}

impl FreeList {
    pub const fn new() -> Self {
        Self { runs: Vec::new() }
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn runs(&self) -> usize {
        self.runs.len()
    }

    pub fn clear(&mut self) {
        self.runs.clear();
    }

    /// Turn `[start, end)` into a free run and append it.
    ///
    /// # Safety
    /// The range must be dead old-generation memory of at least two words.
    pub unsafe fn push_run(&mut self, start: NonNull<usize>, end: NonNull<usize>) {
        debug_assert!(words_between(start, end) >= 2);
        start.as_ptr().write(HeaderWord::free_run(end).raw());
        self.runs.push(start);
    }

    /// First-fit allocation of `words` words. An exact fit consumes the run,
    /// a larger run keeps its tail (rewritten with a fresh run header) in the
    /// same list position.
    ///
    /// # Safety
    /// Every run in the list must still carry the header written by `push_run`.
    pub unsafe fn allocate(&mut self, words: usize) -> FreeListFit {
        let mut hops = 0;
        for index in 0..self.runs.len() {
            let start = self.runs[index];
            let end = run_end(start);
            let available = words_between(start, end);
            if available == words {
                self.runs.remove(index);
                return FreeListFit {
                    start: Some(start),
                    hops,
                };
            }
            if available > words {
                let rest = NonNull::new_unchecked(start.as_ptr().add(words));
                rest.as_ptr().write(HeaderWord::free_run(end).raw());
                self.runs[index] = rest;
                return FreeListFit {
                    start: Some(start),
                    hops,
                };
            }
            hops += 1;
        }
        FreeListFit { start: None, hops }
    }

    /// Words held by all runs.
    ///
    /// # Safety
    /// See [`FreeList::allocate`].
    pub unsafe fn total_words(&self) -> usize {
        self.runs
            .iter()
            .map(|&start| words_between(start, run_end(start)))
            .sum()
    }
}

impl Default for FreeList {
    fn default() -> Self {
        Self::new()
    }
}

/// End of the free run starting at `start`.
///
/// # Safety
/// `start` must hold a free-run header.
pub unsafe fn run_end(start: NonNull<usize>) -> NonNull<usize> {
    match HeaderWord::from_raw(start.as_ptr().read()).state() {
        HeaderState::FreeRun { end } => end,
        state => unreachable!("free list entry {:p} has header {:?}", start, state),
    }
}

fn words_between(start: NonNull<usize>, end: NonNull<usize>) -> usize {
    (end.as_ptr() as usize - start.as_ptr() as usize) / std::mem::size_of::<usize>()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(buffer: &mut [usize], index: usize) -> NonNull<usize> {
        NonNull::new(unsafe { buffer.as_mut_ptr().add(index) }).unwrap()
    }

    #[test]
    fn first_fit_splits_and_counts_hops() {
        let mut memory = vec![0usize; 64];
        let mut list = FreeList::new();
        unsafe {
            list.push_run(at(&mut memory, 0), at(&mut memory, 4));
            list.push_run(at(&mut memory, 10), at(&mut memory, 20));
            list.push_run(at(&mut memory, 30), at(&mut memory, 36));
            assert_eq!(list.total_words(), 20);

            let fit = list.allocate(6);
            assert_eq!(fit.start, Some(at(&mut memory, 10)));
            assert_eq!(fit.hops, 1);
            assert_eq!(list.runs(), 3);
            assert_eq!(run_end(at(&mut memory, 16)), at(&mut memory, 20));
            assert_eq!(list.total_words(), 14);
        }
    }

    #[test]
    fn exact_fit_removes_the_run() {
        let mut memory = vec![0usize; 16];
        let mut list = FreeList::new();
        unsafe {
            list.push_run(at(&mut memory, 0), at(&mut memory, 4));
            list.push_run(at(&mut memory, 8), at(&mut memory, 12));
            let fit = list.allocate(4);
            assert_eq!(fit, FreeListFit { start: Some(at(&mut memory, 0)), hops: 0 });
            assert_eq!(list.runs(), 1);
            let fit = list.allocate(4);
            assert_eq!(fit.start, Some(at(&mut memory, 8)));
            assert!(list.is_empty());
        }
    }

    #[test]
    fn miss_reports_every_run_visited() {
        let mut memory = vec![0usize; 16];
        let mut list = FreeList::new();
        unsafe {
            list.push_run(at(&mut memory, 0), at(&mut memory, 2));
            list.push_run(at(&mut memory, 4), at(&mut memory, 8));
            let fit = list.allocate(6);
            assert_eq!(fit, FreeListFit { start: None, hops: 2 });
            assert_eq!(list.runs(), 2);
        }
    }
}
