//! Peer identity, ownership, and release through the bridge facade

mod common;

use std::sync::Arc;

use common::sentinel_bridge;
use natbridge_engine::{Bridge, BridgeOptions, NativeAllocator, Ownership, SystemAllocator, Value};
use natbridge_sdk::{
    BridgeError, BridgeResult, DeclaredType, FieldDescriptor, ScalarKind, TypeKey,
};

#[repr(C)]
struct Pair {
    a: i32,
    b: i32,
}

fn declare_pair(bridge: &Bridge) -> TypeKey {
    bridge
        .declare(
            DeclaredType::new("Pair")
                .field(FieldDescriptor::scalar("a", 0, ScalarKind::I32))
                .field(FieldDescriptor::scalar("b", 1, ScalarKind::I32)),
        )
        .unwrap()
}

#[test]
fn test_wrap_same_address_same_peer() {
    let bridge = Bridge::default();
    let key = declare_pair(&bridge);
    let mut backing = Pair { a: 1, b: 2 };
    let address = &mut backing as *mut Pair as u64;

    let first = bridge.wrap(&key, address).unwrap();
    let second = bridge.wrap(&key, address).unwrap();
    assert!(first.same_object(&second));
    assert!(first.peer().same_peer(second.peer()));
    assert_eq!(bridge.registry().live_count(), 1);

    second.set("b", 20i32).unwrap();
    assert_eq!(first.get("b").unwrap(), Value::I32(20));
    drop((first, second));
    assert_eq!(backing.b, 20);
    assert_eq!(backing.a, 1);
}

#[test]
fn test_registry_index_stays_bounded() {
    let bridge = Bridge::default();
    let key = declare_pair(&bridge);
    let mut backing: Vec<Pair> = (0..1000).map(|i| Pair { a: i, b: -i }).collect();
    let base = backing.as_mut_ptr() as u64;

    for i in 0..1000u64 {
        let pair = bridge.wrap(&key, base + i * 8).unwrap();
        assert_eq!(pair.get("a").unwrap(), Value::I32(i as i32));
    }
    assert_eq!(bridge.registry().live_count(), 0);
    assert!(bridge.registry().entry_count() <= 64);

    let kept: Vec<_> = (0..200u64)
        .map(|i| bridge.wrap(&key, base + i * 8).unwrap())
        .collect();
    for i in 200..1000u64 {
        drop(bridge.wrap(&key, base + i * 8).unwrap());
    }
    assert_eq!(bridge.registry().live_count(), 200);
    assert!(bridge.registry().entry_count() <= 2 * 200 + 1);
    drop(kept);
}

#[test]
fn test_wrap_conflicting_access_is_aliasing() {
    let bridge = Bridge::default();
    let key = declare_pair(&bridge);
    let mut backing = Pair { a: 0, b: 0 };
    let address = &mut backing as *mut Pair as u64;

    let _writable = bridge.wrap(&key, address).unwrap();
    assert!(matches!(
        bridge.wrap_read_only(&key, address),
        Err(BridgeError::Aliasing { .. })
    ));
}

#[test]
fn test_instantiate_release_frees_once() {
    let (sentinel, bridge) = sentinel_bridge();
    let key = declare_pair(&bridge);

    let pair = bridge.instantiate(&key).unwrap();
    let address = pair.address();
    assert_eq!(pair.peer().ownership(), Ownership::Owned);
    assert_eq!(pair.get("a").unwrap(), Value::I32(0));

    bridge.release(&pair).unwrap();
    assert_eq!(sentinel.freed(address), 1);
    assert!(matches!(
        bridge.release(&pair),
        Err(BridgeError::DoubleRelease { .. })
    ));
    assert!(matches!(
        pair.get("a"),
        Err(BridgeError::UseAfterRelease { .. })
    ));

    drop(pair);
    assert_eq!(sentinel.freed(address), 1);
}

#[test]
fn test_unreachable_instance_freed_on_drop() {
    let (sentinel, bridge) = sentinel_bridge();
    let key = declare_pair(&bridge);

    let pair = bridge.instantiate(&key).unwrap();
    let address = pair.address();
    let alias = pair.clone();
    drop(pair);
    assert_eq!(sentinel.freed(address), 0);
    drop(alias);
    assert_eq!(sentinel.freed(address), 1);
    assert!(bridge.registry().lookup(address).is_none());
}

#[test]
fn test_borrowed_release_never_frees() {
    let (sentinel, bridge) = sentinel_bridge();
    let key = declare_pair(&bridge);
    let mut backing = Pair { a: 3, b: 4 };

    let pair = bridge
        .wrap(&key, &mut backing as *mut Pair as u64)
        .unwrap();
    bridge.release(&pair).unwrap();
    bridge.release(&pair).unwrap();
    drop(pair);
    assert_eq!(sentinel.free_count(), 0);
    assert_eq!(backing.a, 3);
}

#[test]
fn test_adopted_memory_freed_by_bridge() {
    let (sentinel, bridge) = sentinel_bridge();
    let key = declare_pair(&bridge);

    let address = bridge.registry().allocator().allocate(8, 4).unwrap();
    let pair = bridge.adopt(&key, address).unwrap();
    pair.set("a", 9i32).unwrap();
    assert!(pair.peer().is_owned());
    drop(pair);
    assert_eq!(sentinel.freed(address), 1);
}

#[test]
fn test_owned_overlap_rejected() {
    let bridge = Bridge::default();
    let key = declare_pair(&bridge);
    let outer = bridge.instantiate(&key).unwrap();

    assert!(matches!(
        bridge.adopt(&key, outer.address() + 4),
        Err(BridgeError::Aliasing { .. })
    ));
}

/// Allocator whose frees are no-ops, so overlapping owned peers are harmless
struct Leaky;

impl NativeAllocator for Leaky {
    fn allocate(&self, size: u64, align: u64) -> BridgeResult<u64> {
        SystemAllocator.allocate(size, align)
    }

    unsafe fn free(&self, _address: u64, _size: u64, _align: u64) {}
}

#[test]
fn test_overlap_allowed_without_strict_aliasing() {
    let options = BridgeOptions {
        strict_aliasing: false,
        ..BridgeOptions::default()
    };
    let bridge = Bridge::with_allocator(options, Arc::new(Leaky));
    let word = bridge
        .declare(DeclaredType::new("Word").field(FieldDescriptor::scalar("w", 0, ScalarKind::U32)))
        .unwrap();
    let wide = bridge
        .declare(
            DeclaredType::new("Wide")
                .field(FieldDescriptor::scalar("w", 0, ScalarKind::U32).with_count(4)),
        )
        .unwrap();

    let outer = bridge.instantiate(&wide).unwrap();
    let inner = bridge.adopt(&word, outer.address() + 4).unwrap();
    inner.set("w", 0xabcdu32).unwrap();
    assert_eq!(outer.read_element(0, 1).unwrap(), Value::U32(0xabcd));
}

#[test]
fn test_embedded_struct_shares_peer() {
    let bridge = Bridge::default();
    declare_pair(&bridge);
    let outer = bridge
        .declare(
            DeclaredType::new("Outer")
                .field(FieldDescriptor::scalar("tag", 0, ScalarKind::U8))
                .field(FieldDescriptor::aggregate("pair", 1, "Pair")),
        )
        .unwrap();

    let obj = bridge.instantiate(&outer).unwrap();
    let pair = obj.get("pair").unwrap();
    let pair = pair.as_struct().unwrap();
    assert!(pair.peer().same_peer(obj.peer()));
    assert_eq!(pair.offset(), 4);
    pair.set("b", 11i32).unwrap();

    let again = obj.get("pair").unwrap();
    assert!(again.as_struct().unwrap().same_object(pair));
    assert_eq!(again.as_struct().unwrap().get("b").unwrap(), Value::I32(11));
    assert_eq!(bridge.registry().live_count(), 1);
}

#[test]
fn test_struct_field_assignment_copies_bytes() {
    let bridge = Bridge::default();
    let pair_key = declare_pair(&bridge);
    let outer = bridge
        .declare(
            DeclaredType::new("Outer").field(FieldDescriptor::aggregate("pair", 0, "Pair")),
        )
        .unwrap();

    let source = bridge.instantiate(&pair_key).unwrap();
    source.set("a", 5i32).unwrap();
    source.set("b", 6i32).unwrap();

    let obj = bridge.instantiate(&outer).unwrap();
    obj.set("pair", source.clone()).unwrap();
    source.set("a", 50i32).unwrap();

    let copied = obj.get("pair").unwrap();
    let copied = copied.as_struct().unwrap();
    assert_eq!(copied.get("a").unwrap(), Value::I32(5));
    assert_eq!(copied.get("b").unwrap(), Value::I32(6));
    assert!(!copied.same_object(&source));
}
