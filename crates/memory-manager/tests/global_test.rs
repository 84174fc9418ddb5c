#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))]
#![cfg(test)]

use memory_manager::{AllocationKind, ManagerConfig, ManagerError, global};

// One test function: the global instance is shared by every test in this
// binary.
#[test]
fn global_lifecycle() {
    let invalid = global::init(ManagerConfig::new().with_arena_size(0)).unwrap_err();
    assert!(matches!(invalid, ManagerError::Config { .. }));

    global::init(
        ManagerConfig::new()
            .with_arena_size(8192)
            .with_max_small_object_size(64),
    )
    .unwrap();

    let small = global::allocate(64, AllocationKind::Single).unwrap();
    let large = global::allocate(65, AllocationKind::Collection).unwrap();
    let (reserved, owns_small, owns_large) = global::with(|manager| {
        (
            manager.stats().free_list_reserved,
            manager.small_objects().owns(small),
            manager.free_list().contains(large),
        )
    })
    .unwrap();
    assert_eq!(reserved, 8192);
    assert!(owns_small);
    assert!(owns_large);

    let err = global::init(ManagerConfig::default()).unwrap_err();
    assert!(matches!(err, ManagerError::AlreadyInitialized { .. }));

    unsafe {
        global::deallocate(small.as_ptr(), Some(64)).unwrap();
        global::deallocate(large.as_ptr(), None).unwrap();
    }
    let in_use = global::with(|manager| manager.bytes_in_use()).unwrap();
    assert_eq!(in_use, 0);
}
