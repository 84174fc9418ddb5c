#![cfg_attr(coverage_nightly, feature(coverage_attribute))]
#![cfg_attr(coverage_nightly, coverage(off))]
#![cfg(test)]

use std::ptr::NonNull;

use memory_manager::{AllocationKind, FitPolicy, ManagerConfig, MemoryManager};
use proptest::{prelude::*, sample::Index};

fn manager() -> MemoryManager {
    MemoryManager::new(ManagerConfig::default()).unwrap()
}

#[test]
fn round_trip() {
    let mut manager = manager();
    for size in [1, 8, 24, 64, 128, 2052] {
        let ptr = manager.allocate(size, AllocationKind::Single).unwrap();
        unsafe {
            ptr.write_bytes(0x33, size);
            manager.deallocate(ptr.as_ptr(), Some(size)).unwrap();
        }
        let again = manager.allocate(size, AllocationKind::Single).unwrap();
        unsafe {
            manager.deallocate(again.as_ptr(), Some(size)).unwrap();
        }
    }
    assert_eq!(manager.bytes_in_use(), 0);
    assert_eq!(manager.free_list().free_blocks().count(), 1);
}

#[test]
fn conservation() {
    let mut manager = manager();
    let sizes = [3, 130, 16, 16, 4000, 77, 128, 129, 1];
    let ptrs: Vec<_> = sizes
        .iter()
        .map(|&size| manager.allocate(size, AllocationKind::Single).unwrap())
        .collect();
    assert!(manager.bytes_requested() >= sizes.iter().sum::<usize>());

    for (ptr, size) in ptrs.into_iter().zip(sizes).rev() {
        unsafe {
            manager.deallocate(ptr.as_ptr(), Some(size)).unwrap();
        }
        assert_eq!(
            manager.bytes_requested() - manager.bytes_freed(),
            manager.bytes_in_use()
        );
    }
    assert_eq!(manager.bytes_in_use(), 0);
    assert_eq!(manager.bytes_requested(), manager.bytes_freed());
}

#[test]
fn size_class_routing() {
    let mut manager = manager();
    let mut live = Vec::new();
    for size in (1..=128).chain([129, 200, 1000, 2052]) {
        let ptr = manager.allocate(size, AllocationKind::Single).unwrap();
        if size <= 128 {
            assert!(manager.small_objects().owns(ptr), "size {size}");
            assert!(!manager.free_list().contains(ptr), "size {size}");
        } else {
            assert!(manager.free_list().contains(ptr), "size {size}");
            assert!(!manager.small_objects().owns(ptr), "size {size}");
        }
        live.push((ptr, size));
    }
    assert_eq!(manager.small_objects().size_classes().count(), 128);

    for (ptr, size) in live {
        unsafe {
            manager.deallocate(ptr.as_ptr(), Some(size)).unwrap();
        }
    }
}

#[test]
fn routing_follows_threshold() {
    let mut manager =
        MemoryManager::new(ManagerConfig::new().with_max_small_object_size(32)).unwrap();
    let small = manager.allocate(32, AllocationKind::Single).unwrap();
    let large = manager.allocate(33, AllocationKind::Single).unwrap();
    assert!(manager.small_objects().owns(small));
    assert!(manager.free_list().contains(large));
    unsafe {
        manager.deallocate(small.as_ptr(), Some(32)).unwrap();
        manager.deallocate(large.as_ptr(), Some(33)).unwrap();
    }
}

#[test]
fn pool_grows_when_full() {
    // 64-byte chunks hold eight 8-byte blocks.
    let mut manager = MemoryManager::new(ManagerConfig::new().with_chunk_size(64)).unwrap();
    let ptrs: Vec<_> = (0..9)
        .map(|_| manager.allocate(8, AllocationKind::Single).unwrap())
        .collect();
    let class = manager.small_objects().class(8).unwrap();
    assert_eq!(class.pools().len(), 2);
    assert_eq!(manager.stats().small_object_reserved, 128);

    for ptr in ptrs {
        unsafe {
            manager.deallocate(ptr.as_ptr(), Some(8)).unwrap();
        }
    }
    let class = manager.small_objects().class(8).unwrap();
    assert_eq!(class.pools().len(), 1);
    assert!(class.pools()[0].is_unused());
}

#[test]
fn collection_size_recovery() {
    let mut manager = manager();
    let small = manager.allocate(100, AllocationKind::Collection).unwrap();
    let large = manager.allocate(2052, AllocationKind::Collection).unwrap();
    assert_eq!(manager.collection_size(small), Some(100));
    assert_eq!(manager.collection_size(large), Some(2052));
    let requested = manager.bytes_requested();

    unsafe {
        assert_eq!(manager.deallocate(small.as_ptr(), None).unwrap(), 100);
        let reclaimed = manager.deallocate(large.as_ptr(), None).unwrap();
        assert_eq!(100 + reclaimed, requested);
    }
    assert_eq!(manager.collection_size(small), None);
    assert_eq!(manager.bytes_in_use(), 0);
}

#[test]
fn collection_released_with_zero_size() {
    let mut manager = manager();
    let ptr = manager.allocate(40, AllocationKind::Collection).unwrap();
    unsafe {
        assert_eq!(manager.deallocate(ptr.as_ptr(), Some(0)).unwrap(), 40);
    }
    assert_eq!(manager.bytes_in_use(), 0);
}

/// Fills an exactly sized arena, then frees three separated regions of 64,
/// 208 and 96 bytes. Returns the payload pointers of the freed regions.
fn fragmented(policy: FitPolicy) -> (MemoryManager, [NonNull<u8>; 3]) {
    let config = ManagerConfig::new()
        .with_max_small_object_size(0)
        .with_arena_size(464)
        .with_fit_policy(policy);
    let mut manager = MemoryManager::new(config).unwrap();
    let sizes = [48, 16, 192, 16, 80, 16];
    let ptrs: Vec<_> = sizes
        .iter()
        .map(|&size| manager.allocate(size, AllocationKind::Single).unwrap())
        .collect();
    assert_eq!(manager.free_list().free_bytes(), 0);

    for i in [0, 2, 4] {
        unsafe {
            manager.deallocate(ptrs[i].as_ptr(), Some(sizes[i])).unwrap();
        }
    }
    (manager, [ptrs[0], ptrs[2], ptrs[4]])
}

#[test]
fn first_fit_selects_first_sufficient_region() {
    let (mut manager, [_, large, _]) = fragmented(FitPolicy::FirstFit);
    let ptr = manager.allocate(60, AllocationKind::Single).unwrap();
    assert_eq!(ptr, large);
}

#[test]
fn best_fit_selects_smallest_sufficient_region() {
    let (mut manager, [_, _, medium]) = fragmented(FitPolicy::BestFit);
    let ptr = manager.allocate(60, AllocationKind::Single).unwrap();
    assert_eq!(ptr, medium);
}

#[test]
fn coalescing_restores_single_region() {
    let config = ManagerConfig::new()
        .with_max_small_object_size(0)
        .with_arena_size(3 * 64);
    let mut manager = MemoryManager::new(config).unwrap();
    let blocks: Vec<_> = (0..3)
        .map(|_| manager.allocate(48, AllocationKind::Single).unwrap())
        .collect();
    assert!(manager.allocate(1, AllocationKind::Single).unwrap_err().is_out_of_memory());

    unsafe {
        manager.deallocate(blocks[0].as_ptr(), Some(48)).unwrap();
        manager.deallocate(blocks[2].as_ptr(), Some(48)).unwrap();
        manager.deallocate(blocks[1].as_ptr(), Some(48)).unwrap();
    }
    let regions: Vec<_> = manager.free_list().free_blocks().collect();
    assert_eq!(regions, vec![manager.free_list().arena_range()]);
    assert_eq!(regions[0].len(), 3 * 64);
}

#[test]
fn out_of_memory_is_recoverable() {
    let mut manager = MemoryManager::new(ManagerConfig::new().with_arena_size(4096)).unwrap();
    let ptr = manager.allocate(4000, AllocationKind::Collection).unwrap();
    let err = manager.allocate(1000, AllocationKind::Single).unwrap_err();
    assert!(err.is_out_of_memory());

    unsafe {
        manager.deallocate(ptr.as_ptr(), None).unwrap();
    }
    let ptr = manager.allocate(1000, AllocationKind::Single).unwrap();
    unsafe {
        manager.deallocate(ptr.as_ptr(), Some(1000)).unwrap();
    }
}

#[derive(Debug, Clone)]
enum Op {
    Allocate(usize, AllocationKind),
    Deallocate(Index),
}

fn op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (1usize..3000, any::<bool>()).prop_map(|(size, collection)| {
            let kind = if collection {
                AllocationKind::Collection
            } else {
                AllocationKind::Single
            };
            Op::Allocate(size, kind)
        }),
        2 => any::<Index>().prop_map(Op::Deallocate),
    ]
}

struct Live {
    ptr: NonNull<u8>,
    size: usize,
    kind: AllocationKind,
    fill: u8,
}

unsafe fn release(manager: &mut MemoryManager, live: &Live) {
    unsafe {
        for i in 0..live.size {
            assert_eq!(live.ptr.add(i).read(), live.fill);
        }
        let size = live.kind.is_single().then_some(live.size);
        manager.deallocate(live.ptr.as_ptr(), size).unwrap();
    }
}

proptest! {
    #[test]
    fn conservation_over_random_sequences(ops in prop::collection::vec(op(), 1..200)) {
        let mut manager = manager();
        let mut live: Vec<Live> = Vec::new();

        for (n, op) in ops.into_iter().enumerate() {
            match op {
                Op::Allocate(size, kind) => {
                    let ptr = manager.allocate(size, kind).unwrap();
                    #[expect(clippy::cast_possible_truncation)]
                    let fill = n as u8;
                    unsafe {
                        ptr.write_bytes(fill, size);
                    }
                    live.push(Live { ptr, size, kind, fill });
                }
                Op::Deallocate(index) => {
                    if live.is_empty() {
                        continue;
                    }
                    let entry = live.swap_remove(index.index(live.len()));
                    unsafe {
                        release(&mut manager, &entry);
                    }
                }
            }
            prop_assert!(manager.bytes_requested() >= manager.bytes_freed());
            prop_assert_eq!(
                manager.bytes_requested() - manager.bytes_freed(),
                manager.bytes_in_use()
            );
        }

        for entry in live.drain(..) {
            unsafe {
                release(&mut manager, &entry);
            }
        }
        prop_assert_eq!(manager.bytes_in_use(), 0);
        prop_assert_eq!(manager.free_list().free_blocks().count(), 1);
    }
}
