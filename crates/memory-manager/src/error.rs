use std::alloc::LayoutError;

use pool_allocator::{AllocError, ConfigError};
use snafu::{Location, Snafu};

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ManagerError {
    #[snafu(display("invalid configuration: {source}"))]
    Config {
        #[snafu(implicit)]
        location: Location,
        #[snafu(source)]
        source: ConfigError,
    },
    #[snafu(display("invalid allocation layout: size={size}, align={align}"))]
    InvalidLayout {
        size: usize,
        align: usize,
        #[snafu(implicit)]
        location: Location,
        #[snafu(source)]
        source: LayoutError,
    },
    #[snafu(display("attempted to deallocate a null pointer"))]
    NullPointer {
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("size of the allocation at {addr:#x} is unknown"))]
    UnknownSize {
        addr: usize,
        #[snafu(implicit)]
        location: Location,
    },
    #[snafu(display("small-object allocator failed: {source}"))]
    SmallObject {
        #[snafu(implicit)]
        location: Location,
        #[snafu(source)]
        source: AllocError,
    },
    #[snafu(display("free-list allocator failed: {source}"))]
    FreeList {
        #[snafu(implicit)]
        location: Location,
        #[snafu(source)]
        source: AllocError,
    },
    #[snafu(display("global memory manager is already initialized"))]
    AlreadyInitialized {
        #[snafu(implicit)]
        location: Location,
    },
}

impl ManagerError {
    /// Returns the engine error behind this error, if any.
    #[must_use]
    pub fn alloc_error(&self) -> Option<&AllocError> {
        match self {
            Self::SmallObject { source, .. } | Self::FreeList { source, .. } => Some(source),
            _ => None,
        }
    }

    /// Returns `true` if the request failed because no memory was left.
    #[must_use]
    pub fn is_out_of_memory(&self) -> bool {
        self.alloc_error().is_some_and(AllocError::is_out_of_memory)
    }
}
