//! The memory manager front end.
//!
//! A [`MemoryManager`] owns one small-object allocator and one free-list arena
//! and routes every request to one of them:
//!
//! ```text
//!                    ┌──────────────────────┐
//!   size <= max  ──▶ │ SizeClassAllocator   │  exact-size block pools
//!   align <= 16      └──────────────────────┘
//!                    ┌──────────────────────┐
//!   otherwise    ──▶ │ FreeListAllocator    │  headers + coalescing arena
//!                    └──────────────────────┘
//! ```
//!
//! Both paths report the bytes they actually consumed, which feed the
//! requested/freed counters.

use std::{alloc::Layout, collections::HashMap, ptr::NonNull};

use pool_allocator::{MAX_ALIGN, free_list::FreeListAllocator, size_class::SizeClassAllocator};
use snafu::ResultExt as _;

use crate::{
    config::{AllocationKind, ManagerConfig},
    error::{
        ConfigSnafu, FreeListSnafu, InvalidLayoutSnafu, ManagerError, NullPointerSnafu,
        SmallObjectSnafu, UnknownSizeSnafu,
    },
    stats::MemoryStats,
};

/// Engine selected for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Route {
    /// Size class of the small-object allocator
    SmallObject(usize),
    FreeList,
}

/// Allocates memory from size-class pools or a free-list arena and keeps
/// track of the bytes handed out.
///
/// # Examples
///
/// ```
/// # use memory_manager::{AllocationKind, ManagerConfig, MemoryManager};
/// let mut manager = MemoryManager::new(ManagerConfig::default()).unwrap();
/// let small = manager.allocate(24, AllocationKind::Single).unwrap();
/// let array = manager.allocate(4000, AllocationKind::Collection).unwrap();
///
/// unsafe {
///     manager.deallocate(small.as_ptr(), Some(24)).unwrap();
///     // The size of a collection is looked up.
///     manager.deallocate(array.as_ptr(), None).unwrap();
/// }
/// assert_eq!(manager.stats().in_use(), 0);
/// ```
#[derive(Debug)]
pub struct MemoryManager {
    config: ManagerConfig,
    small_objects: SizeClassAllocator,
    free_list: FreeListAllocator,
    /// Layouts of live collection allocations, keyed by address
    collections: HashMap<usize, Layout>,
    requested: usize,
    freed: usize,
}

impl MemoryManager {
    /// Creates a manager, reserving the free-list arena up front.
    pub fn new(config: ManagerConfig) -> Result<Self, ManagerError> {
        config.validate().context(ConfigSnafu)?;
        let free_list =
            FreeListAllocator::new(config.arena_size, config.fit_policy).context(FreeListSnafu)?;
        tracing::debug!(?config, "created memory manager");
        Ok(Self {
            config,
            small_objects: SizeClassAllocator::new(config.chunk_size),
            free_list,
            collections: HashMap::new(),
            requested: 0,
            freed: 0,
        })
    }

    /// Layout used for requests that only carry a size.
    ///
    /// The alignment is the largest power of two dividing `size`, capped at
    /// [`MAX_ALIGN`]. This is the alignment a block of `size` bytes naturally
    /// gets inside a pool, so every request size keeps its own size class.
    fn size_layout(size: usize) -> Result<Layout, ManagerError> {
        let align = (size & size.wrapping_neg()).clamp(1, MAX_ALIGN);
        Layout::from_size_align(size, align).context(InvalidLayoutSnafu { size, align })
    }

    fn route(&self, layout: Layout) -> Route {
        if layout.size() <= self.config.max_small_object_size && layout.align() <= MAX_ALIGN {
            Route::SmallObject(layout.size().next_multiple_of(layout.align()))
        } else {
            Route::FreeList
        }
    }

    /// Allocates `size` bytes.
    ///
    /// The returned block is aligned to the largest power of two dividing
    /// `size`, up to 16 bytes.
    pub fn allocate(
        &mut self,
        size: usize,
        kind: AllocationKind,
    ) -> Result<NonNull<u8>, ManagerError> {
        let layout = Self::size_layout(size)?;
        self.allocate_layout(layout, kind)
    }

    /// Allocates a block satisfying `layout`.
    ///
    /// Requests aligned to more than [`MAX_ALIGN`] bytes are always served by
    /// the free list.
    pub fn allocate_layout(
        &mut self,
        layout: Layout,
        kind: AllocationKind,
    ) -> Result<NonNull<u8>, ManagerError> {
        let route = self.route(layout);
        let (ptr, consumed) = match route {
            Route::SmallObject(size) => {
                let ptr = self.small_objects.allocate(size).context(SmallObjectSnafu)?;
                (ptr, size)
            }
            Route::FreeList => self.free_list.allocate(layout).context(FreeListSnafu)?,
        };

        if kind.is_collection() {
            self.collections.insert(ptr.as_ptr().addr(), layout);
        }
        self.requested += consumed;
        tracing::debug!(
            size = layout.size(),
            align = layout.align(),
            ?kind,
            ?route,
            consumed,
            "allocated"
        );
        Ok(ptr)
    }

    /// Releases a block allocated with [`allocate`](Self::allocate).
    ///
    /// `size` must be the size passed to `allocate`. It may be `None` for
    /// collections, whose size is looked up; a size of zero is treated the
    /// same way. Returns the number of bytes reclaimed.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    ///
    /// - `ptr` was allocated by this manager and not released since
    /// - `size`, when given, is the size the block was allocated with
    /// - The memory pointed to by `ptr` is not accessed after deallocation
    pub unsafe fn deallocate(
        &mut self,
        ptr: *mut u8,
        size: Option<usize>,
    ) -> Result<usize, ManagerError> {
        let layout = size
            .filter(|&size| size != 0)
            .map(Self::size_layout)
            .transpose()?;
        unsafe { self.deallocate_layout(ptr, layout) }
    }

    /// Releases a block allocated with [`allocate_layout`](Self::allocate_layout).
    ///
    /// `layout` may be `None` for collections. Returns the number of bytes
    /// reclaimed. A failed deallocation leaves the manager unchanged.
    ///
    /// # Safety
    ///
    /// The caller must ensure that:
    ///
    /// - `ptr` was allocated by this manager and not released since
    /// - `layout`, when given, is the layout the block was allocated with
    /// - The memory pointed to by `ptr` is not accessed after deallocation
    pub unsafe fn deallocate_layout(
        &mut self,
        ptr: *mut u8,
        layout: Option<Layout>,
    ) -> Result<usize, ManagerError> {
        unsafe { self.release(ptr, layout) }.inspect_err(|err| {
            tracing::warn!(
                addr = format_args!("{:#x}", ptr.addr()),
                %err,
                "deallocation aborted"
            );
        })
    }

    unsafe fn release(
        &mut self,
        ptr: *mut u8,
        layout: Option<Layout>,
    ) -> Result<usize, ManagerError> {
        let Some(ptr) = NonNull::new(ptr) else {
            return NullPointerSnafu.fail();
        };
        let addr = ptr.as_ptr().addr();
        let Some(layout) = layout.or_else(|| self.collections.get(&addr).copied()) else {
            return UnknownSizeSnafu { addr }.fail();
        };

        let route = self.route(layout);
        let reclaimed = match route {
            Route::SmallObject(size) => {
                unsafe { self.small_objects.deallocate(ptr, size) }.context(SmallObjectSnafu)?;
                size
            }
            Route::FreeList => unsafe { self.free_list.deallocate(ptr) }.context(FreeListSnafu)?,
        };

        self.collections.remove(&addr);
        self.freed += reclaimed;
        tracing::debug!(
            addr = format_args!("{addr:#x}"),
            ?route,
            reclaimed,
            "deallocated"
        );
        Ok(reclaimed)
    }

    /// Releases every allocation at once and zeroes the counters.
    ///
    /// Block pools are dropped and the arena becomes a single free region.
    /// Every pointer previously returned by this manager becomes invalid.
    pub fn reset(&mut self) {
        self.small_objects.reset();
        self.free_list.reset();
        self.collections.clear();
        self.requested = 0;
        self.freed = 0;
        tracing::info!("reset memory manager");
    }

    #[must_use]
    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            small_object_reserved: self.small_objects.reserved_bytes(),
            free_list_reserved: self.free_list.reserved_bytes(),
            size_classes: self.small_objects.size_classes().count(),
            requested: self.requested,
            freed: self.freed,
        }
    }

    /// Emits the current counters as an `info` event and returns them.
    pub fn log_memory_state(&self) -> MemoryStats {
        let stats = self.stats();
        tracing::info!(
            reserved = stats.reserved(),
            requested = stats.requested,
            freed = stats.freed,
            in_use = stats.in_use(),
            "memory state"
        );
        stats
    }

    #[must_use]
    pub fn bytes_reserved(&self) -> usize {
        self.small_objects.reserved_bytes() + self.free_list.reserved_bytes()
    }

    #[must_use]
    pub fn bytes_requested(&self) -> usize {
        self.requested
    }

    #[must_use]
    pub fn bytes_freed(&self) -> usize {
        self.freed
    }

    #[must_use]
    pub fn bytes_in_use(&self) -> usize {
        debug_assert!(self.requested >= self.freed);
        self.requested - self.freed
    }

    /// Size originally requested for the live collection at `ptr`.
    #[must_use]
    pub fn collection_size(&self, ptr: NonNull<u8>) -> Option<usize> {
        self.collections
            .get(&ptr.as_ptr().addr())
            .map(|layout| layout.size())
    }

    #[must_use]
    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    #[must_use]
    pub fn small_objects(&self) -> &SizeClassAllocator {
        &self.small_objects
    }

    #[must_use]
    pub fn free_list(&self) -> &FreeListAllocator {
        &self.free_list
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use pool_allocator::{AllocError, FitPolicy};

    use super::*;

    fn manager() -> MemoryManager {
        MemoryManager::new(ManagerConfig::new().with_arena_size(64 * 1024)).unwrap()
    }

    #[test]
    fn test_size_layout() {
        let align = |size| MemoryManager::size_layout(size).unwrap().align();
        assert_eq!(align(1), 1);
        assert_eq!(align(24), 8);
        assert_eq!(align(64), 16);
        assert_eq!(align(2052), 4);
        assert_eq!(align(0), 1);
    }

    #[test]
    fn test_route() {
        let manager = manager();
        let route = |size, align| manager.route(Layout::from_size_align(size, align).unwrap());
        assert_eq!(route(24, 8), Route::SmallObject(24));
        assert_eq!(route(20, 8), Route::SmallObject(24));
        assert_eq!(route(128, 16), Route::SmallObject(128));
        assert_eq!(route(129, 1), Route::FreeList);
        assert_eq!(route(8, 32), Route::FreeList);
    }

    #[test]
    fn test_rejects_invalid_config() {
        let err = MemoryManager::new(ManagerConfig::new().with_arena_size(0)).unwrap_err();
        assert!(matches!(err, ManagerError::Config { .. }));
    }

    #[test]
    fn test_counts_consumed_bytes() {
        let mut manager = manager();
        let small = manager.allocate(24, AllocationKind::Single).unwrap();
        assert_eq!(manager.bytes_requested(), 24);

        let large = manager.allocate(200, AllocationKind::Single).unwrap();
        // 200 bytes rounded to 208 plus a 16-byte header.
        assert_eq!(manager.bytes_requested(), 24 + 224);

        unsafe {
            assert_eq!(manager.deallocate(large.as_ptr(), Some(200)).unwrap(), 224);
            assert_eq!(manager.deallocate(small.as_ptr(), Some(24)).unwrap(), 24);
        }
        assert_eq!(manager.bytes_freed(), 248);
        assert_eq!(manager.bytes_in_use(), 0);
    }

    #[test]
    fn test_null_pointer() {
        let mut manager = manager();
        let err = unsafe { manager.deallocate(std::ptr::null_mut(), Some(8)) }.unwrap_err();
        assert!(matches!(err, ManagerError::NullPointer { .. }));
        assert_eq!(manager.bytes_freed(), 0);
    }

    #[test]
    fn test_unknown_size() {
        let mut manager = manager();
        let ptr = manager.allocate(40, AllocationKind::Single).unwrap();
        let err = unsafe { manager.deallocate(ptr.as_ptr(), None) }.unwrap_err();
        assert!(matches!(
            err,
            ManagerError::UnknownSize { addr, .. } if addr == ptr.as_ptr().addr()
        ));

        unsafe {
            manager.deallocate(ptr.as_ptr(), Some(40)).unwrap();
        }
    }

    #[test]
    fn test_collection_size_is_forgotten_after_release() {
        let mut manager = manager();
        let ptr = manager.allocate(64, AllocationKind::Collection).unwrap();
        assert_eq!(manager.collection_size(ptr), Some(64));

        // Releasing with an explicit size also drops the record.
        unsafe {
            manager.deallocate(ptr.as_ptr(), Some(64)).unwrap();
        }
        assert_eq!(manager.collection_size(ptr), None);
    }

    #[test]
    fn test_zero_size_looks_up_collection() {
        let mut manager = manager();
        let small = manager.allocate(40, AllocationKind::Collection).unwrap();
        let large = manager.allocate(500, AllocationKind::Collection).unwrap();
        let requested = manager.bytes_requested();

        unsafe {
            assert_eq!(manager.deallocate(small.as_ptr(), Some(0)).unwrap(), 40);
            assert_eq!(
                manager.deallocate(large.as_ptr(), Some(0)).unwrap(),
                requested - 40
            );
        }
        assert_eq!(manager.collection_size(small), None);
        assert_eq!(manager.bytes_in_use(), 0);
    }

    #[test]
    fn test_zero_size_without_record_is_unknown() {
        let mut manager = manager();
        let ptr = manager.allocate(40, AllocationKind::Single).unwrap();
        let err = unsafe { manager.deallocate(ptr.as_ptr(), Some(0)) }.unwrap_err();
        assert!(matches!(err, ManagerError::UnknownSize { .. }));
        assert_eq!(manager.bytes_freed(), 0);

        unsafe {
            manager.deallocate(ptr.as_ptr(), Some(40)).unwrap();
        }
    }

    #[test]
    fn test_failed_deallocation_keeps_state() {
        let mut manager = manager();
        let ptr = manager.allocate(300, AllocationKind::Collection).unwrap();
        let requested = manager.bytes_requested();

        let bogus = unsafe { ptr.add(1) };
        let err = unsafe { manager.deallocate(bogus.as_ptr(), Some(300)) }.unwrap_err();
        assert_eq!(
            err.alloc_error(),
            Some(&AllocError::UnknownPointer {
                addr: bogus.as_ptr().addr()
            })
        );
        assert_eq!(manager.bytes_freed(), 0);
        assert_eq!(manager.collection_size(ptr), Some(300));

        unsafe {
            assert_eq!(manager.deallocate(ptr.as_ptr(), None).unwrap(), requested);
        }
    }

    #[test]
    fn test_over_aligned_request_uses_free_list() {
        let mut manager = manager();
        let layout = Layout::from_size_align(32, 64).unwrap();
        let ptr = manager.allocate_layout(layout, AllocationKind::Single).unwrap();
        assert_eq!(ptr.as_ptr().addr() % 64, 0);
        assert!(manager.free_list().contains(ptr));
        assert_eq!(manager.small_objects().size_classes().count(), 0);

        unsafe {
            manager.deallocate_layout(ptr.as_ptr(), Some(layout)).unwrap();
        }
    }

    #[test]
    fn test_out_of_memory() {
        let mut manager =
            MemoryManager::new(ManagerConfig::new().with_arena_size(1024)).unwrap();
        let err = manager.allocate(4096, AllocationKind::Single).unwrap_err();
        assert!(err.is_out_of_memory());
        assert_eq!(manager.bytes_requested(), 0);
    }

    #[test]
    fn test_reset() {
        let mut manager = manager();
        let _small = manager.allocate(16, AllocationKind::Single).unwrap();
        let _large = manager.allocate(1000, AllocationKind::Collection).unwrap();
        assert!(manager.stats().small_object_reserved > 0);

        manager.reset();
        let stats = manager.stats();
        assert_eq!(stats.requested, 0);
        assert_eq!(stats.freed, 0);
        assert_eq!(stats.small_object_reserved, 0);
        assert_eq!(stats.size_classes, 0);
        assert_eq!(manager.free_list().free_bytes(), 64 * 1024);
    }

    #[test]
    fn test_log_memory_state() {
        let mut manager = MemoryManager::new(
            ManagerConfig::new()
                .with_arena_size(4096)
                .with_fit_policy(FitPolicy::FirstFit),
        )
        .unwrap();
        let ptr = manager.allocate(8, AllocationKind::Single).unwrap();
        let stats = manager.log_memory_state();
        assert_eq!(stats, manager.stats());
        assert_eq!(stats.free_list_reserved, 4096);
        assert_eq!(stats.in_use(), 8);
        unsafe {
            manager.deallocate(ptr.as_ptr(), Some(8)).unwrap();
        }
    }
}
