use std::fmt;

/// Snapshot of the memory manager's counters.
///
/// Byte counts are the bytes actually consumed by the engines, which may exceed
/// the requested sizes because of headers and alignment padding.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct MemoryStats {
    /// Bytes reserved for the block pools of the small-object allocator
    pub small_object_reserved: usize,
    /// Bytes reserved for the free-list arena
    pub free_list_reserved: usize,
    /// Number of size classes in use
    pub size_classes: usize,
    /// Cumulative bytes handed out
    pub requested: usize,
    /// Cumulative bytes given back
    pub freed: usize,
}

impl MemoryStats {
    /// Total bytes reserved by both engines.
    #[must_use]
    pub fn reserved(&self) -> usize {
        self.small_object_reserved + self.free_list_reserved
    }

    /// Bytes currently handed out.
    #[must_use]
    pub fn in_use(&self) -> usize {
        debug_assert!(self.requested >= self.freed);
        self.requested - self.freed
    }
}

impl fmt::Display for MemoryStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "memory state")?;
        writeln!(
            f,
            "  reserved:  {:>10} bytes (small objects: {}, free list: {})",
            self.reserved(),
            self.small_object_reserved,
            self.free_list_reserved
        )?;
        writeln!(f, "  requested: {:>10} bytes", self.requested)?;
        writeln!(f, "  freed:     {:>10} bytes", self.freed)?;
        write!(f, "  in use:    {:>10} bytes", self.in_use())
    }
}
