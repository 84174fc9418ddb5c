//! Size-class allocator for small objects.
//!
//! Every distinct request size gets its own [`FixedSizeBlockAllocator`]. The
//! allocators are kept sorted by block size so the one serving a request is
//! found by binary search, and a new size class is inserted in place the first
//! time a size is requested.

use alloc::vec::Vec;
use core::ptr::NonNull;

use crate::{error::AllocError, fixed_size_block::FixedSizeBlockAllocator};

/// Routes small allocations to per-size [`FixedSizeBlockAllocator`]s.
#[derive(Debug)]
pub struct SizeClassAllocator {
    chunk_size: usize,
    classes: Vec<FixedSizeBlockAllocator>,
    alloc_class: Option<usize>,
    dealloc_class: Option<usize>,
    reserved_bytes: usize,
}

impl SizeClassAllocator {
    /// Creates an allocator whose size classes use pools spanning
    /// `chunk_size` bytes.
    ///
    /// # Examples
    ///
    /// ```
    /// # use pool_allocator::size_class::SizeClassAllocator;
    /// let mut allocator = SizeClassAllocator::new(4096);
    /// let ptr = allocator.allocate(24).unwrap();
    /// unsafe {
    ///     allocator.deallocate(ptr, 24).unwrap();
    /// }
    /// assert_eq!(allocator.size_classes().collect::<Vec<_>>(), [24]);
    /// ```
    #[must_use]
    pub const fn new(chunk_size: usize) -> Self {
        Self {
            chunk_size,
            classes: Vec::new(),
            alloc_class: None,
            dealloc_class: None,
            reserved_bytes: 0,
        }
    }

    /// Allocates a block of exactly `size` bytes, creating the size class on
    /// first use.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        if size == 0 {
            return Err(AllocError::ZeroSize);
        }

        let index = match self.alloc_class {
            Some(index) if self.classes[index].block_size() == size => index,
            _ => self.find_or_insert(size)?,
        };
        self.alloc_class = Some(index);

        let class = &mut self.classes[index];
        let before = class.reserved_bytes();
        let res = class.allocate();
        self.reserved_bytes = self.reserved_bytes - before + class.reserved_bytes();
        res
    }

    fn find_or_insert(&mut self, size: usize) -> Result<usize, AllocError> {
        match self.search(size) {
            Ok(index) => Ok(index),
            Err(index) => {
                let class = FixedSizeBlockAllocator::new(self.chunk_size, size)?;
                self.classes.insert(index, class);
                if let Some(dealloc) = &mut self.dealloc_class {
                    if *dealloc >= index {
                        *dealloc += 1;
                    }
                }
                tracing::trace!(size, classes = self.classes.len(), "created size class");
                Ok(index)
            }
        }
    }

    fn search(&self, size: usize) -> Result<usize, usize> {
        self.classes
            .binary_search_by_key(&size, FixedSizeBlockAllocator::block_size)
    }

    /// Returns a block of `size` bytes to its size class.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    ///
    /// - `ptr` was returned by [`allocate`](Self::allocate) with the same `size`
    /// - `ptr` has not been deallocated previously
    /// - The memory pointed to by `ptr` is not accessed after deallocation
    pub unsafe fn deallocate(&mut self, ptr: NonNull<u8>, size: usize) -> Result<(), AllocError> {
        let index = match self.dealloc_class {
            Some(index) if self.classes[index].block_size() == size => index,
            _ => self
                .search(size)
                .or(Err(AllocError::UnknownSizeClass { size }))?,
        };
        self.dealloc_class = Some(index);

        let class = &mut self.classes[index];
        let before = class.reserved_bytes();
        let res = unsafe { class.deallocate(ptr) };
        self.reserved_bytes = self.reserved_bytes - before + class.reserved_bytes();
        res
    }

    /// Drops every size class. Outstanding blocks become invalid.
    pub fn reset(&mut self) {
        self.classes.clear();
        self.alloc_class = None;
        self.dealloc_class = None;
        self.reserved_bytes = 0;
    }

    /// Returns `true` if `ptr` points into a pool of any size class.
    #[must_use]
    pub fn owns(&self, ptr: NonNull<u8>) -> bool {
        self.classes.iter().any(|class| class.owns(ptr))
    }

    /// Block sizes of the existing size classes, in ascending order.
    pub fn size_classes(&self) -> impl Iterator<Item = usize> + '_ {
        self.classes.iter().map(FixedSizeBlockAllocator::block_size)
    }

    /// Returns the allocator serving blocks of exactly `size` bytes.
    #[must_use]
    pub fn class(&self, size: usize) -> Option<&FixedSizeBlockAllocator> {
        self.search(size).ok().map(|index| &self.classes[index])
    }

    #[must_use]
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Bytes reserved by the pools of all size classes.
    #[must_use]
    pub fn reserved_bytes(&self) -> usize {
        self.reserved_bytes
    }
}
