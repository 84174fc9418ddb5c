//! Memory manager routing allocations between size-class pools and a
//! free-list arena.
//!
//! Small requests (up to [`ManagerConfig::max_small_object_size`] bytes) are
//! served from exact-size block pools; everything else is carved out of a
//! single arena managed by a best-fit or first-fit free list. The manager
//! tracks the bytes it hands out and takes back, and remembers the size of
//! collection allocations so they can be released by pointer alone.
//!
//! Use a [`MemoryManager`] directly for an isolated instance, or the
//! [`global`] module for the lazily created process-wide one.
//!
//! ```rust
//! use memory_manager::{AllocationKind, ManagerConfig, MemoryManager};
//!
//! let mut manager = MemoryManager::new(ManagerConfig::default()).unwrap();
//! let ptr = manager.allocate(100, AllocationKind::Single).unwrap();
//! unsafe {
//!     ptr.write_bytes(0, 100);
//!     manager.deallocate(ptr.as_ptr(), Some(100)).unwrap();
//! }
//! println!("{}", manager.stats());
//! ```

#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod config;
pub mod error;
pub mod global;
pub mod manager;
pub mod stats;

pub use self::{
    config::{AllocationKind, FitPolicy, ManagerConfig},
    error::ManagerError,
    manager::MemoryManager,
    stats::MemoryStats,
};
