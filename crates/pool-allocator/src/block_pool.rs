//! Block pool (chunk) implementation.
//!
//! A block pool is a single contiguous buffer sliced into a fixed number of
//! equally sized blocks. Free blocks are chained through an index stored in
//! their own first byte, so the pool needs no memory besides the buffer and
//! two counters to track which blocks are available.
//!
//! ```text
//! Fresh pool with four blocks:
//! ┌───────┬───────┬───────┬───────┐
//! │ 1 ... │ 2 ... │ 3 ... │ 4 ... │   first_available = 0
//! └───────┴───────┴───────┴───────┘   blocks_available = 4
//!
//! After allocating blocks 0 and 1, then freeing block 0:
//! ┌───────┬───────┬───────┬───────┐
//! │ 2 ... │ (used)│ 3 ... │ 4 ... │   first_available = 0
//! └───────┴───────┴───────┴───────┘   blocks_available = 3
//! ```
//!
//! Because the index is a single byte, a pool never holds more than
//! [`MAX_BLOCKS_PER_POOL`] blocks.

use alloc::alloc::{alloc, dealloc};
use core::{alloc::Layout, ptr::NonNull};

use crate::{
    MAX_ALIGN,
    error::{AllocError, ConfigError},
};

/// Largest number of blocks a single pool can hold.
pub const MAX_BLOCKS_PER_POOL: u8 = u8::MAX;

/// A contiguous buffer of `block_count` blocks of `block_size` bytes each.
///
/// The buffer is reserved from the global allocator when the pool is created
/// and returned to it when the pool is dropped.
#[derive(Debug)]
pub struct BlockPool {
    data: NonNull<u8>,
    layout: Layout,
    block_size: usize,
    block_count: u8,
    first_available: u8,
    blocks_available: u8,
}

unsafe impl Send for BlockPool {}

impl BlockPool {
    /// Reserves a pool of `block_count` blocks of `block_size` bytes.
    ///
    /// The buffer is aligned to [`MAX_ALIGN`], so block `i` is aligned to the
    /// largest power of two (up to [`MAX_ALIGN`]) dividing `block_size`.
    pub fn new(block_size: usize, block_count: u8) -> Result<Self, AllocError> {
        let layout = Self::buffer_layout(block_size, block_count)?;
        let data = NonNull::new(unsafe { alloc(layout) }).ok_or(AllocError::OutOfMemory {
            size: layout.size(),
            align: layout.align(),
        })?;

        let mut pool = Self {
            data,
            layout,
            block_size,
            block_count,
            first_available: 0,
            blocks_available: 0,
        };
        pool.reset();
        Ok(pool)
    }

    fn buffer_layout(block_size: usize, block_count: u8) -> Result<Layout, ConfigError> {
        if block_size == 0 {
            return Err(ConfigError::ZeroBlockSize);
        }
        if block_count == 0 {
            return Err(ConfigError::ZeroBlockCount);
        }
        let overflow = ConfigError::BlockPoolOverflow {
            block_size,
            block_count: usize::from(block_count),
        };
        let size = block_size
            .checked_mul(usize::from(block_count))
            .ok_or(overflow)?;
        Layout::from_size_align(size, MAX_ALIGN).or(Err(overflow))
    }

    /// Rebuilds the embedded free list so that every block is available.
    ///
    /// Outstanding pointers into the pool become invalid.
    pub fn reset(&mut self) {
        self.first_available = 0;
        self.blocks_available = self.block_count;
        for index in 0..self.block_count {
            unsafe {
                self.block_ptr(index).write(index + 1);
            }
        }
    }

    /// Takes one block out of the pool, or `None` if every block is in use.
    pub fn allocate(&mut self) -> Option<NonNull<u8>> {
        if self.blocks_available == 0 {
            return None;
        }

        let block = self.block_ptr(self.first_available);
        self.first_available = unsafe { block.read() };
        self.blocks_available -= 1;
        Some(block)
    }

    /// Returns a block to the pool.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    ///
    /// - `ptr` was returned by [`allocate`](Self::allocate) on this pool
    /// - `ptr` has not been returned to the pool since
    /// - The block is not accessed after deallocation
    pub unsafe fn deallocate(&mut self, ptr: NonNull<u8>) -> Result<(), AllocError> {
        let addr = ptr.as_ptr().addr();
        if !self.contains(ptr) {
            return Err(AllocError::UnknownPointer { addr });
        }
        let offset = addr - self.data.as_ptr().addr();
        if !offset.is_multiple_of(self.block_size) {
            return Err(AllocError::MisalignedPointer {
                addr,
                block_size: self.block_size,
            });
        }

        // `contains` bounds the offset by `block_size * block_count`.
        let Ok(index) = u8::try_from(offset / self.block_size) else {
            return Err(AllocError::UnknownPointer { addr });
        };
        if self.is_available(index) {
            return Err(AllocError::DoubleFree { addr });
        }
        unsafe {
            self.block_ptr(index).write(self.first_available);
        }
        self.first_available = index;
        self.blocks_available += 1;
        Ok(())
    }

    /// Returns `true` if block `index` is on the embedded free list.
    fn is_available(&self, index: u8) -> bool {
        let mut next = self.first_available;
        for _ in 0..self.blocks_available {
            if next == index {
                return true;
            }
            next = unsafe { self.block_ptr(next).read() };
        }
        false
    }

    fn block_ptr(&self, index: u8) -> NonNull<u8> {
        assert!(index < self.block_count, "block index out of range");
        unsafe { self.data.add(usize::from(index) * self.block_size) }
    }

    /// Returns `true` if `ptr` points into this pool's buffer.
    #[must_use]
    pub fn contains(&self, ptr: NonNull<u8>) -> bool {
        let start = self.data.as_ptr().addr();
        let addr = ptr.as_ptr().addr();
        addr >= start && addr - start < self.reserved_bytes()
    }

    /// Returns `true` if at least one block can be allocated.
    #[must_use]
    pub fn has_free_block(&self) -> bool {
        self.blocks_available > 0
    }

    /// Returns `true` if no block of this pool is in use.
    #[must_use]
    pub fn is_unused(&self) -> bool {
        self.blocks_available == self.block_count
    }

    #[must_use]
    pub fn blocks_available(&self) -> u8 {
        self.blocks_available
    }

    #[must_use]
    pub fn block_count(&self) -> u8 {
        self.block_count
    }

    #[must_use]
    pub fn block_size(&self) -> usize {
        self.block_size
    }

    /// Bytes reserved for the pool's buffer.
    #[must_use]
    pub fn reserved_bytes(&self) -> usize {
        self.layout.size()
    }
}

impl Drop for BlockPool {
    fn drop(&mut self) {
        unsafe {
            dealloc(self.data.as_ptr(), self.layout);
        }
    }
}
