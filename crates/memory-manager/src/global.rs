//! Process-wide memory manager.
//!
//! The instance is created on first use from the configuration registered with
//! [`init`], or from [`ManagerConfig::default`] if none was registered. It lives
//! until the process exits.

use std::ptr::NonNull;

use snafu::ResultExt as _;
use spin::{Mutex, Once};

use crate::{
    config::{AllocationKind, ManagerConfig},
    error::{AlreadyInitializedSnafu, ConfigSnafu, ManagerError},
    manager::MemoryManager,
};

static PENDING_CONFIG: Mutex<Option<ManagerConfig>> = Mutex::new(None);
static MANAGER: Once<Mutex<MemoryManager>> = Once::new();

/// Registers the configuration used to create the global instance.
///
/// Fails with [`ManagerError::AlreadyInitialized`] once the instance exists.
pub fn init(config: ManagerConfig) -> Result<(), ManagerError> {
    config.validate().context(ConfigSnafu)?;
    let mut pending = PENDING_CONFIG.lock();
    if MANAGER.is_completed() {
        return AlreadyInitializedSnafu.fail();
    }
    *pending = Some(config);
    Ok(())
}

fn instance() -> Result<&'static Mutex<MemoryManager>, ManagerError> {
    MANAGER.try_call_once(|| {
        let config = PENDING_CONFIG.lock().take().unwrap_or_default();
        tracing::info!(?config, "initializing global memory manager");
        MemoryManager::new(config).map(Mutex::new)
    })
}

/// Runs `f` with exclusive access to the global instance, creating it first if
/// needed.
pub fn with<R>(f: impl FnOnce(&mut MemoryManager) -> R) -> Result<R, ManagerError> {
    let manager = instance()?;
    Ok(f(&mut manager.lock()))
}

/// Allocates `size` bytes from the global instance.
///
/// See [`MemoryManager::allocate`].
pub fn allocate(size: usize, kind: AllocationKind) -> Result<NonNull<u8>, ManagerError> {
    with(|manager| manager.allocate(size, kind))?
}

/// Releases a block allocated by [`allocate`].
///
/// # Safety
///
/// Same contract as [`MemoryManager::deallocate`].
pub unsafe fn deallocate(ptr: *mut u8, size: Option<usize>) -> Result<usize, ManagerError> {
    with(|manager| unsafe { manager.deallocate(ptr, size) })?
}
