//! Write stamps for self-modifying code detection.
//!
//! Writable code memory is split into 256 byte buckets. Every write stamps its
//! bucket with the current generation, and every compilation takes the current
//! generation as its stamp before advancing it. A compiled function is stale as
//! soon as any bucket it was translated from carries a stamp newer than its own.

use std::ops::Range;

pub const BUCKET_SHIFT: u32 = 8;
pub const BUCKET_SIZE: u32 = 1 << BUCKET_SHIFT;

pub struct DirtyMap {
    generation: u64,
    /// Newest stamp anywhere, lets most lookups skip the per-bucket scan
    newest: u64,
    buckets: Box<[u64]>,
}

impl DirtyMap {
    /// `size` is the number of bytes covered, rounded up to whole buckets
    pub fn new(size: u32) -> DirtyMap {
        let count = (size + BUCKET_SIZE - 1) >> BUCKET_SHIFT;
        DirtyMap {
            generation: 0,
            newest: 0,
            buckets: vec![0; count as usize].into_boxed_slice(),
        }
    }

    #[inline(always)]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Returns the stamp for a function compiled from the current memory contents
    pub fn begin_compile(&mut self) -> u64 {
        let stamp = self.generation;
        self.generation += 1;
        stamp
    }

    #[inline(always)]
    pub fn touch(&mut self, offset: u32) {
        if let Some(bucket) = self.buckets.get_mut((offset >> BUCKET_SHIFT) as usize) {
            *bucket = self.generation;
            self.newest = self.generation;
        }
    }

    pub fn touch_range(&mut self, offsets: Range<u32>) {
        if offsets.is_empty() {
            return;
        }
        let first = (offsets.start >> BUCKET_SHIFT) as usize;
        let last = ((offsets.end - 1) >> BUCKET_SHIFT) as usize;
        let end = (last + 1).min(self.buckets.len());
        if first < end {
            self.buckets[first..end].fill(self.generation);
            self.newest = self.generation;
        }
    }

    /// True if anything in `offsets` was written after `stamp` was taken
    pub fn written_since(&self, offsets: Range<u32>, stamp: u64) -> bool {
        if self.newest <= stamp || offsets.is_empty() {
            return false;
        }
        let first = (offsets.start >> BUCKET_SHIFT) as usize;
        let last = ((offsets.end - 1) >> BUCKET_SHIFT) as usize;
        self.buckets.get(first..=last.min(self.buckets.len().saturating_sub(1)))
            .map_or(false, |buckets| buckets.iter().any(|&b| b > stamp))
    }

    pub fn reset(&mut self) {
        // Keep the generation monotonic so stamps handed out earlier stay ordered
        self.buckets.fill(self.generation);
        self.newest = self.generation;
        self.generation += 1;
    }
}
