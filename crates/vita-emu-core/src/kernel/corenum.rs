use std::sync::{Mutex, MutexGuard};

use super::KernelError;

/// Index of one emulated CPU execution context.
pub type CoreNum = usize;

const WORD_BITS: usize = u64::BITS as usize;

/// Fixed-capacity bitmap of allocated slots. A clear bit is free.
#[derive(Debug, Default, Clone)]
struct Bitmap {
    words: Vec<u64>,
    maximum: usize,
}

impl Bitmap {
    fn set_maximum(&mut self, maximum: usize) {
        self.maximum = maximum;
        self.words.resize(maximum.div_ceil(WORD_BITS), 0);
        // Bits past the new maximum never count as allocated.
        if let Some(last) = self.words.last_mut() {
            let tail = maximum % WORD_BITS;
            if tail != 0 {
                *last &= (1u64 << tail) - 1;
            }
        }
    }

    fn allocate_from(&mut self, start: usize) -> Option<usize> {
        let mut idx = start;
        while idx < self.maximum {
            let word = self.words[idx / WORD_BITS];
            if word == u64::MAX {
                idx = (idx / WORD_BITS + 1) * WORD_BITS;
                continue;
            }
            let bit = idx % WORD_BITS;
            if word & (1u64 << bit) == 0 {
                self.words[idx / WORD_BITS] |= 1u64 << bit;
                return Some(idx);
            }
            idx += 1;
        }
        None
    }

    fn free(&mut self, idx: usize) {
        if idx < self.maximum {
            self.words[idx / WORD_BITS] &= !(1u64 << (idx % WORD_BITS));
        }
    }

    fn is_set(&self, idx: usize) -> bool {
        idx < self.maximum && self.words[idx / WORD_BITS] & (1u64 << (idx % WORD_BITS)) != 0
    }

    fn count(&self) -> usize {
        self.words.iter().map(|w| w.count_ones() as usize).sum()
    }
}

/// Hands out the lowest free core number under a single lock.
///
/// Assignment is deterministic: the same sequence of allocate/free calls
/// always yields the same numbers, which keeps record/replay sessions
/// reproducible.
#[derive(Debug, Default)]
pub struct CoreNumAllocator {
    alloc: Mutex<Bitmap>,
}

impl CoreNumAllocator {
    pub fn new(max_core_count: usize) -> Self {
        let allocator = Self::default();
        allocator.set_maximum(max_core_count);
        allocator
    }

    fn bitmap(&self) -> MutexGuard<'_, Bitmap> {
        self.alloc.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Allocates the lowest free core number.
    pub fn allocate(&self) -> Result<CoreNum, KernelError> {
        let mut alloc = self.bitmap();
        let maximum = alloc.maximum;
        alloc
            .allocate_from(0)
            .ok_or(KernelError::CoreNumbersExhausted { maximum })
    }

    /// Returns `num` to the pool.
    ///
    /// Freeing a number that is not allocated is a caller contract violation.
    pub fn free(&self, num: CoreNum) {
        let mut alloc = self.bitmap();
        debug_assert!(alloc.is_set(num), "core number {num} freed while not allocated");
        alloc.free(num);
    }

    /// Sets the number of available core numbers.
    ///
    /// Must be called before concurrent allocation starts. Shrinking below
    /// the currently allocated numbers is a caller error.
    pub fn set_maximum(&self, max: usize) {
        self.bitmap().set_maximum(max);
    }

    pub fn maximum(&self) -> usize {
        self.bitmap().maximum
    }

    pub fn allocated_count(&self) -> usize {
        self.bitmap().count()
    }

    pub fn is_allocated(&self, num: CoreNum) -> bool {
        self.bitmap().is_set(num)
    }

    /// Like [`set_maximum`](Self::set_maximum), but refuses to drop a live
    /// number. Check and resize happen under the same lock.
    pub fn try_set_maximum(&self, max: usize) -> bool {
        let mut alloc = self.bitmap();
        if (max..alloc.maximum).any(|num| alloc.is_set(num)) {
            return false;
        }
        alloc.set_maximum(max);
        true
    }
}

/// Read-only view of an allocator whose maximum is owned elsewhere.
#[derive(Clone, Copy, Debug)]
pub struct CoreNumUsage<'a> {
    allocator: &'a CoreNumAllocator,
}

impl<'a> CoreNumUsage<'a> {
    pub fn new(allocator: &'a CoreNumAllocator) -> Self {
        Self { allocator }
    }

    pub fn maximum(&self) -> usize {
        self.allocator.maximum()
    }

    pub fn allocated_count(&self) -> usize {
        self.allocator.allocated_count()
    }

    pub fn is_allocated(&self, num: CoreNum) -> bool {
        self.allocator.is_allocated(num)
    }
}
