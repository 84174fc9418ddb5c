//! Memory allocator engines backing the memory manager.
//!
//! This crate provides the two allocation strategies used by
//! `memory-manager`: pooled fixed-size blocks for small objects and a
//! free-list arena for everything else. The engines are `no_std` compatible and
//! draw their backing memory from the global allocator through [`alloc`].
//!
//! # Available Allocators
//!
//! ## [`SizeClassAllocator`](size_class::SizeClassAllocator)
//!
//! Routes each request size to its own
//! [`FixedSizeBlockAllocator`](fixed_size_block::FixedSizeBlockAllocator),
//! which in turn hands out blocks from a growable set of
//! [`BlockPool`](block_pool::BlockPool)s. Best suited for:
//!
//! - Frequently allocated small objects
//! - Workloads repeating the same few sizes
//!
//! **Performance**: O(1) allocation and deallocation when the cached pool can
//! serve the request, otherwise a scan over the pools of the size class.
//!
//! ## [`FreeListAllocator`](free_list::FreeListAllocator)
//!
//! A general-purpose allocator that carves variable-sized blocks out of a
//! single arena and keeps the free regions on an address-ordered list. Best
//! suited for:
//!
//! - Large or unusually aligned allocations
//! - Situations where allocation patterns are unpredictable
//!
//! **Performance**: O(n) allocation and deallocation where n is the number of
//! free regions.
//!
//! # Usage Examples
//!
//! ## Basic `SizeClassAllocator` Usage
//!
//! ```rust
//! use pool_allocator::size_class::SizeClassAllocator;
//!
//! let mut allocator = SizeClassAllocator::new(4096);
//! let ptr = allocator.allocate(32).unwrap();
//! // Use the allocated memory...
//! unsafe {
//!     allocator.deallocate(ptr, 32).unwrap();
//! }
//! ```
//!
//! ## Basic `FreeListAllocator` Usage
//!
//! ```rust
//! use core::alloc::Layout;
//!
//! use pool_allocator::free_list::{FitPolicy, FreeListAllocator};
//!
//! let mut allocator = FreeListAllocator::new(64 * 1024, FitPolicy::BestFit).unwrap();
//! let layout = Layout::from_size_align(4096, 64).unwrap();
//! let (ptr, block_size) = allocator.allocate(layout).unwrap();
//! assert!(block_size > 4096);
//! unsafe {
//!     allocator.deallocate(ptr).unwrap();
//! }
//! ```
//!
//! # Design Considerations
//!
//! ## Memory Safety
//!
//! Deallocation is `unsafe`: the engines validate what they cheaply can
//! (ownership, block boundaries, headers) but cannot prove that a pointer is
//! not used after it has been released.
//!
//! ## Thread Safety
//!
//! The allocators are `Send` but not `Sync`. They can be moved between threads
//! but require external synchronization (e.g., mutexes) for concurrent access.
//!
//! ## Performance Characteristics
//!
//! | Allocator | Allocation | Deallocation | Memory Overhead | Best Use Case |
//! |-----------|------------|--------------|-----------------|---------------|
//! | `SizeClassAllocator` | O(1)* | O(1)* | Unused blocks of the last pool | Small objects |
//! | `FreeListAllocator` | O(n) | O(n) | 16 bytes/block + padding | General purpose |
//!
//! *When the cached pool serves the request

#![no_std]
#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

extern crate alloc;

pub mod block_pool;
pub mod error;
pub mod fixed_size_block;
pub mod free_list;
pub mod size_class;

pub use self::{
    error::{AllocError, ConfigError},
    free_list::FitPolicy,
};

/// Largest alignment guaranteed by pooled blocks.
///
/// Pool buffers are aligned to this value, and requests needing a stricter
/// alignment must be served by the free list.
pub const MAX_ALIGN: usize = 16;
