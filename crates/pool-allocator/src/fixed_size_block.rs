//! Fixed-size block allocator implementation.
//!
//! This module provides an allocator that hands out blocks of one size only.
//! Blocks come from a growable sequence of [`BlockPool`]s; a new pool is
//! appended whenever every existing pool is full, and fully free pools are
//! given back to the system once a second one appears.
//!
//! # Caching
//!
//! The allocator remembers the pool it last allocated from and the pool it last
//! released into. Repeated traffic of one size therefore usually touches a
//! single pool without scanning.
//!
//! # Locating the owning pool
//!
//! On deallocation the owning pool is found by a vicinity search centred on the
//! pool of the previous deallocation: one pool to the left, then one to the
//! right, widening until both ends of the sequence are reached.
//!
//! ```text
//!            probe order
//!    4    2    0    1    3    5
//! ┌────┬────┬────┬────┬────┬────┐
//! │ p0 │ p1 │ p2 │ p3 │ p4 │ p5 │   cached deallocation pool = p2
//! └────┴────┴────┴────┴────┴────┘
//! ```

use alloc::vec::Vec;
use core::ptr::NonNull;

use crate::{
    block_pool::{BlockPool, MAX_BLOCKS_PER_POOL},
    error::{AllocError, ConfigError},
};

/// Chunk size used when a size class is created with a chunk size of zero.
pub const DEFAULT_CHUNK_SIZE: usize = 4096;

/// Number of blocks per pool when a single block does not fit in a chunk.
const OVERSIZED_BLOCKS_PER_POOL: u8 = 8;

/// Computes how many blocks of `block_size` bytes one pool holds.
///
/// The count is `chunk_size / block_size`, capped at
/// [`MAX_BLOCKS_PER_POOL`]. Blocks larger than a chunk get a small fixed count
/// instead of an empty pool.
///
/// # Panics
///
/// Panics if `block_size` is zero.
#[must_use]
pub fn blocks_per_pool(chunk_size: usize, block_size: usize) -> u8 {
    assert!(block_size > 0);
    let chunk_size = if chunk_size == 0 {
        DEFAULT_CHUNK_SIZE
    } else {
        chunk_size
    };
    match chunk_size / block_size {
        0 => OVERSIZED_BLOCKS_PER_POOL,
        count => u8::try_from(count).unwrap_or(MAX_BLOCKS_PER_POOL),
    }
}

/// An allocator serving blocks of a single size from a list of pools.
///
/// Pools are referenced by index, so the cached positions stay valid when the
/// pool list grows.
#[derive(Debug)]
pub struct FixedSizeBlockAllocator {
    block_size: usize,
    blocks_per_pool: u8,
    pools: Vec<BlockPool>,
    /// Pool the last block was allocated from.
    alloc_pool: Option<usize>,
    /// Pool the last block was released into.
    dealloc_pool: Option<usize>,
}

impl FixedSizeBlockAllocator {
    /// Creates an allocator for blocks of `block_size` bytes.
    ///
    /// `chunk_size` is the number of bytes each pool should span; see
    /// [`blocks_per_pool`]. No memory is reserved until the first allocation.
    ///
    /// # Examples
    ///
    /// ```
    /// # use pool_allocator::fixed_size_block::FixedSizeBlockAllocator;
    /// let mut allocator = FixedSizeBlockAllocator::new(4096, 64).unwrap();
    /// let ptr = allocator.allocate().unwrap();
    /// unsafe {
    ///     allocator.deallocate(ptr).unwrap();
    /// }
    /// ```
    pub fn new(chunk_size: usize, block_size: usize) -> Result<Self, AllocError> {
        if block_size == 0 {
            return Err(ConfigError::ZeroBlockSize.into());
        }
        let blocks_per_pool = blocks_per_pool(chunk_size, block_size);
        if block_size.checked_mul(usize::from(blocks_per_pool)).is_none() {
            return Err(ConfigError::BlockPoolOverflow {
                block_size,
                block_count: usize::from(blocks_per_pool),
            }
            .into());
        }

        Ok(Self {
            block_size,
            blocks_per_pool,
            pools: Vec::new(),
            alloc_pool: None,
            dealloc_pool: None,
        })
    }

    /// Allocates one block, appending a new pool if every pool is full.
    pub fn allocate(&mut self) -> Result<NonNull<u8>, AllocError> {
        let index = match self.alloc_pool {
            Some(index) if self.pools[index].has_free_block() => index,
            _ => match self.pools.iter().position(BlockPool::has_free_block) {
                Some(index) => index,
                None => self.push_pool()?,
            },
        };
        self.alloc_pool = Some(index);

        self.pools[index]
            .allocate()
            .ok_or(AllocError::OutOfMemory {
                size: self.block_size,
                align: 1,
            })
    }

    fn push_pool(&mut self) -> Result<usize, AllocError> {
        let pool = BlockPool::new(self.block_size, self.blocks_per_pool)?;
        self.pools.push(pool);
        let index = self.pools.len() - 1;
        if self.dealloc_pool.is_none() {
            self.dealloc_pool = Some(index);
        }
        tracing::trace!(
            block_size = self.block_size,
            pools = self.pools.len(),
            "appended block pool"
        );
        Ok(index)
    }

    /// Returns a block to the pool that owns it.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    ///
    /// - `ptr` was allocated by this allocator instance
    /// - `ptr` has not been deallocated previously
    /// - The memory pointed to by `ptr` is not accessed after deallocation
    pub unsafe fn deallocate(&mut self, ptr: NonNull<u8>) -> Result<(), AllocError> {
        let index = self
            .find_in_vicinity(ptr)
            .ok_or(AllocError::UnknownPointer {
                addr: ptr.as_ptr().addr(),
            })?;
        unsafe {
            self.pools[index].deallocate(ptr)?;
        }
        self.dealloc_pool = Some(index);
        self.reclaim(index);
        Ok(())
    }

    /// Finds the pool containing `ptr`, probing outwards from the pool of the
    /// previous deallocation.
    fn find_in_vicinity(&self, ptr: NonNull<u8>) -> Option<usize> {
        let last = self.pools.len().checked_sub(1)?;
        let start = self.dealloc_pool.unwrap_or(0).min(last);

        let mut left = Some(start);
        let mut right = (start < last).then_some(start + 1);
        while left.is_some() || right.is_some() {
            if let Some(l) = left {
                if self.pools[l].contains(ptr) {
                    return Some(l);
                }
                left = l.checked_sub(1);
            }
            if let Some(r) = right {
                if self.pools[r].contains(ptr) {
                    return Some(r);
                }
                right = (r < last).then_some(r + 1);
            }
        }
        None
    }

    /// Releases surplus unused pools after `index` received a block.
    ///
    /// At most one unused pool is kept, always at the end of the sequence.
    /// When the pool at `index` becomes unused while the last pool is unused
    /// too, the last pool is released and `index` takes its place.
    fn reclaim(&mut self, index: usize) {
        if !self.pools[index].is_unused() {
            return;
        }
        let last = self.pools.len() - 1;

        if index == last {
            if last > 0 && self.pools[last - 1].is_unused() {
                self.release_last_pool();
                self.alloc_pool = Some(0);
                self.dealloc_pool = Some(0);
            }
            return;
        }

        if self.pools[last].is_unused() {
            self.release_last_pool();
        }
        let last = self.pools.len() - 1;
        self.pools.swap(index, last);
        self.alloc_pool = Some(last);
    }

    fn release_last_pool(&mut self) {
        self.pools.pop();
        tracing::trace!(
            block_size = self.block_size,
            pools = self.pools.len(),
            "released block pool"
        );
    }

    /// Releases every pool. Outstanding blocks become invalid.
    pub fn release(&mut self) {
        self.pools.clear();
        self.alloc_pool = None;
        self.dealloc_pool = None;
    }

    /// Returns `true` if `ptr` points into one of the pools.
    #[must_use]
    pub fn owns(&self, ptr: NonNull<u8>) -> bool {
        self.pools.iter().any(|pool| pool.contains(ptr))
    }

    #[must_use]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    #[must_use]
    pub fn blocks_per_pool(&self) -> u8 {
        self.blocks_per_pool
    }

    #[must_use]
    pub fn pools(&self) -> &[BlockPool] {
        &self.pools
    }

    /// Bytes reserved by all pools of this allocator.
    #[must_use]
    pub fn reserved_bytes(&self) -> usize {
        self.pools.iter().map(BlockPool::reserved_bytes).sum()
    }
}
