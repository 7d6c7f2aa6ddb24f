mod pool;

use std::alloc::{alloc, dealloc, Layout};
use std::array;
use std::ptr::NonNull;

use spin::Mutex;

use self::pool::FreeListPool;

/// Cache-line size assumed for block promotion and false-sharing padding.
pub(crate) const CACHE_LINE: u32 = 64;

/// Number of cached size classes.
const POOL_COUNT: usize = 32;

const WORDS_PER_CACHE_LINE: u32 = CACHE_LINE / 4;

/// A caching allocator serving message memory.
///
/// A fixed array of size-class pools sits in front of the global allocator.
/// Block sizes are promoted to at least a cache line and rounded to four-byte
/// multiples, so small messages share classes and cache hits stay high; the
/// size class of a promoted size is `size / 4 - 16`, giving 32 cacheable
/// classes of at most [`FreeListPool::MAX_BLOCKS`] blocks each. Blocks larger
/// than the largest class bypass the cache entirely.
///
/// Every block handed out is cache-line aligned. Each pool is guarded by its
/// own spinlock; no other lock is ever taken while a pool lock is held.
pub(crate) struct CachingAllocator {
    pools: [Mutex<FreeListPool>; POOL_COUNT],
}

impl CachingAllocator {
    pub(crate) fn new() -> Self {
        Self {
            pools: array::from_fn(|_| Mutex::new(FreeListPool::new())),
        }
    }

    /// Promotes a requested size to the effective block size: at least a
    /// cache line, rounded up to a four-byte multiple. Idempotent.
    pub(crate) fn effective_size(size: u32) -> u32 {
        (size.max(CACHE_LINE) + 3) & !3
    }

    fn class_of(size: u32) -> usize {
        debug_assert!(size >= CACHE_LINE && size % 4 == 0);
        (size / 4 - WORDS_PER_CACHE_LINE) as usize
    }

    fn block_layout(size: u32) -> Layout {
        // Promoted sizes are non-zero multiples of four and never overflow a
        // valid layout on any supported target.
        Layout::from_size_align(size as usize, CACHE_LINE as usize)
            .expect("promoted block size always forms a valid layout")
    }

    /// Allocates a cache-line-aligned block of at least `size` bytes,
    /// preferring a cached block of the matching size class. Returns `None`
    /// when the underlying allocator fails.
    pub(crate) fn allocate(&self, size: u32) -> Option<NonNull<u8>> {
        let size = Self::effective_size(size);
        let class = Self::class_of(size);

        if class < POOL_COUNT {
            let block = self.pools[class].lock().fetch_aligned(CACHE_LINE);
            if block.is_some() {
                return block;
            }
        }

        NonNull::new(unsafe { alloc(Self::block_layout(size)) })
    }

    /// Returns a block to its size-class pool, or to the underlying allocator
    /// when the pool is full or the class is too large to cache.
    ///
    /// # Safety
    ///
    /// `block` must have been produced by [`allocate`](Self::allocate) on any
    /// `CachingAllocator` with the same `size`, and must not be used again.
    pub(crate) unsafe fn free(&self, block: NonNull<u8>, size: u32) {
        let size = Self::effective_size(size);
        let class = Self::class_of(size);

        if class < POOL_COUNT {
            let mut pool = self.pools[class].lock();
            let cached = unsafe { pool.add(block) };
            debug_assert!(pool.len() <= FreeListPool::MAX_BLOCKS);
            if cached {
                return;
            }
        }

        unsafe { dealloc(block.as_ptr(), Self::block_layout(size)) };
    }

    /// Frees a block directly against the global allocator, bypassing the
    /// cache. Used when no allocator instance is reachable, e.g. when a
    /// queued message is dropped during teardown.
    ///
    /// # Safety
    ///
    /// Same contract as [`free`](Self::free).
    pub(crate) unsafe fn dealloc_block(block: NonNull<u8>, size: u32) {
        let size = Self::effective_size(size);
        unsafe { dealloc(block.as_ptr(), Self::block_layout(size)) };
    }

    #[cfg(test)]
    pub(crate) fn cached_blocks(&self, size: u32) -> u32 {
        let class = Self::class_of(Self::effective_size(size));
        if class < POOL_COUNT {
            self.pools[class].lock().len()
        } else {
            0
        }
    }
}

impl Drop for CachingAllocator {
    /// Flushes every cached block back to the underlying allocator.
    fn drop(&mut self) {
        for (class, pool) in self.pools.iter().enumerate() {
            let size = (class as u32 + WORDS_PER_CACHE_LINE) * 4;
            let mut pool = pool.lock();
            while !pool.is_empty() {
                if let Some(block) = pool.fetch() {
                    unsafe { dealloc(block.as_ptr(), Self::block_layout(size)) };
                }
            }
        }
    }
}
