//! Construction-time options of a [`MemoryManager`](crate::MemoryManager).

pub use pool_allocator::{FitPolicy, fixed_size_block::DEFAULT_CHUNK_SIZE};
use pool_allocator::{ConfigError, free_list};

/// Requests up to this many bytes are served by the small-object allocator by
/// default.
pub const DEFAULT_MAX_SMALL_OBJECT_SIZE: usize = 128;

/// Bytes reserved for the free-list arena by default.
pub const DEFAULT_ARENA_SIZE: usize = 1024 * 1024;

/// Whether an allocation holds one object or an array of them.
///
/// The size of a collection is remembered by the manager, so it can be
/// released without passing its size back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::IsVariant)]
pub enum AllocationKind {
    Single,
    Collection,
}

/// Configuration of a [`MemoryManager`](crate::MemoryManager).
///
/// # Examples
///
/// ```
/// # use memory_manager::config::{FitPolicy, ManagerConfig};
/// let config = ManagerConfig::new()
///     .with_max_small_object_size(64)
///     .with_arena_size(64 * 1024)
///     .with_fit_policy(FitPolicy::FirstFit);
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ManagerConfig {
    /// Bytes spanned by each block pool of the small-object allocator.
    ///
    /// Zero selects [`DEFAULT_CHUNK_SIZE`].
    pub chunk_size: usize,
    /// Largest request, in bytes, routed to the small-object allocator.
    pub max_small_object_size: usize,
    /// Bytes reserved for the free-list arena.
    pub arena_size: usize,
    /// How the free-list allocator picks a free region.
    pub fit_policy: FitPolicy,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl ManagerConfig {
    #[must_use]
    pub const fn new() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            max_small_object_size: DEFAULT_MAX_SMALL_OBJECT_SIZE,
            arena_size: DEFAULT_ARENA_SIZE,
            fit_policy: FitPolicy::BestFit,
        }
    }

    #[must_use]
    pub const fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    #[must_use]
    pub const fn with_max_small_object_size(mut self, max_small_object_size: usize) -> Self {
        self.max_small_object_size = max_small_object_size;
        self
    }

    #[must_use]
    pub const fn with_arena_size(mut self, arena_size: usize) -> Self {
        self.arena_size = arena_size;
        self
    }

    #[must_use]
    pub const fn with_fit_policy(mut self, fit_policy: FitPolicy) -> Self {
        self.fit_policy = fit_policy;
        self
    }

    /// Checks the options without reserving any memory.
    pub fn validate(&self) -> Result<(), ConfigError> {
        free_list::arena_layout(self.arena_size)?;
        Ok(())
    }
}

#[cfg_attr(coverage_nightly, coverage(off))]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ManagerConfig::default();
        assert_eq!(config.chunk_size, 4096);
        assert_eq!(config.max_small_object_size, 128);
        assert_eq!(config.arena_size, 1024 * 1024);
        assert!(config.fit_policy.is_best_fit());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_tiny_arena() {
        let config = ManagerConfig::new().with_arena_size(8);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ArenaTooSmall { arena_size: 8, .. })
        ));
    }

    #[test]
    fn test_rejects_overflowing_arena() {
        let config = ManagerConfig::new().with_arena_size(usize::MAX);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ArenaOverflow { .. })
        ));
    }

    #[test]
    fn test_zero_chunk_size_is_accepted() {
        let config = ManagerConfig::new().with_chunk_size(0);
        assert!(config.validate().is_ok());
    }
}
