//! Error kinds reported by the allocator engines.

/// Rejected construction-time parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, derive_more::Display, derive_more::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[display("block size must be greater than zero")]
    ZeroBlockSize,
    #[display("block pool must hold at least one block")]
    ZeroBlockCount,
    #[display("block pool size overflows: block_size={block_size}, block_count={block_count}")]
    BlockPoolOverflow { block_size: usize, block_count: usize },
    #[display("arena too small: arena_size={arena_size}, minimum={minimum}")]
    ArenaTooSmall { arena_size: usize, minimum: usize },
    #[display("arena size overflows: arena_size={arena_size}")]
    ArenaOverflow { arena_size: usize },
}

/// The kinds of errors that can occur while allocating or releasing memory.
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    derive_more::Display,
    derive_more::Error,
    derive_more::IsVariant,
)]
#[non_exhaustive]
pub enum AllocError {
    #[display("zero-sized allocation requested")]
    ZeroSize,
    #[display("out of memory: size={size}, align={align}")]
    OutOfMemory { size: usize, align: usize },
    #[display("pointer not owned by this allocator: address={addr:#x}")]
    UnknownPointer { addr: usize },
    #[display("pointer is not on a block boundary: address={addr:#x}, block_size={block_size}")]
    MisalignedPointer { addr: usize, block_size: usize },
    #[display("block already free: address={addr:#x}")]
    DoubleFree { addr: usize },
    #[display("no size class serves {size} bytes")]
    UnknownSizeClass { size: usize },
    #[display("allocation header is corrupted: address={addr:#x}")]
    CorruptHeader { addr: usize },
    #[display("invalid configuration: {_0}")]
    InvalidConfig(ConfigError),
}

impl From<ConfigError> for AllocError {
    fn from(err: ConfigError) -> Self {
        Self::InvalidConfig(err)
    }
}
