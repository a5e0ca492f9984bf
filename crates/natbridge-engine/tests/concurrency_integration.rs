//! Concurrent metadata computation, peer registration, and dispatch

use std::sync::{Arc, Barrier};
use std::thread;

use natbridge_engine::{Bridge, SiteKey, Value};
use natbridge_sdk::{
    CallTargetDescriptor, DeclaredType, FieldDescriptor, Representation, ReturnDescriptor,
    ScalarKind, UncertainSpec,
};

const THREADS: usize = 16;

fn declare_nested(bridge: &Bridge) {
    bridge
        .declare(
            DeclaredType::new("Inner")
                .field(FieldDescriptor::scalar("x", 0, ScalarKind::I64))
                .field(FieldDescriptor::scalar("y", 1, ScalarKind::U8)),
        )
        .unwrap();
    bridge
        .declare(
            DeclaredType::new("Outer")
                .field(FieldDescriptor::scalar("flag", 0, ScalarKind::Bool))
                .field(FieldDescriptor::aggregate("inner", 1, "Inner").with_count(3)),
        )
        .unwrap();
}

#[test]
fn test_concurrent_metadata_computed_once() {
    let bridge = Arc::new(Bridge::default());
    declare_nested(&bridge);
    let outer = natbridge_sdk::TypeKey::new("Outer");
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let bridge = bridge.clone();
            let barrier = barrier.clone();
            let outer = outer.clone();
            thread::spawn(move || {
                barrier.wait();
                bridge.metadata(&outer).unwrap()
            })
        })
        .collect();
    let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    for meta in &results[1..] {
        assert!(Arc::ptr_eq(meta, &results[0]));
    }
    let layout = &results[0].layout;
    assert_eq!(layout.field(1).unwrap().offset, 8);
    assert_eq!(layout.field(1).unwrap().stride, 16);
    assert_eq!(layout.size, 56);
    // Outer and Inner, each exactly once
    assert_eq!(bridge.cache().computations(), 2);
}

#[test]
fn test_concurrent_wrap_yields_one_peer() {
    let bridge = Arc::new(Bridge::default());
    declare_nested(&bridge);
    let inner = natbridge_sdk::TypeKey::new("Inner");
    let mut backing = [0u64; 2];
    let address = backing.as_mut_ptr() as u64;
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|i| {
            let bridge = bridge.clone();
            let barrier = barrier.clone();
            let inner = inner.clone();
            thread::spawn(move || {
                barrier.wait();
                let obj = bridge.wrap(&inner, address).unwrap();
                if i == 0 {
                    obj.set("x", 99i64).unwrap();
                }
                obj
            })
        })
        .collect();
    let objects: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    for obj in &objects[1..] {
        assert!(obj.peer().same_peer(objects[0].peer()));
    }
    assert_eq!(bridge.registry().live_count(), 1);
    assert_eq!(objects[3].get("x").unwrap(), Value::I64(99));
    drop(objects);
    assert_eq!(backing[0], 99);
}

#[test]
fn test_concurrent_uncertain_resolution_agrees() {
    let bridge = Arc::new(Bridge::default());
    bridge
        .declare(
            DeclaredType::new("Cell").field(FieldDescriptor::scalar("v", 0, ScalarKind::I32)),
        )
        .unwrap();
    let multi = bridge
        .declare(
            DeclaredType::new("Multi").field(
                FieldDescriptor::aggregate("cells", 0, "Cell")
                    .with_count(4)
                    .with_uncertain(
                        UncertainSpec::parse("Options: value, array Fallback: array").unwrap(),
                    ),
            ),
        )
        .unwrap();
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let bridge = bridge.clone();
            let barrier = barrier.clone();
            let multi = multi.clone();
            thread::spawn(move || {
                let obj = bridge.instantiate(&multi).unwrap();
                barrier.wait();
                obj.representation(0).unwrap()
            })
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), Representation::Array);
    }
    assert_eq!(bridge.resolver().len(), 1);
    let choice = bridge.resolver().choice(&SiteKey::field(&multi, 0)).unwrap();
    assert_eq!(choice.chosen, Representation::Array);
    assert!(!choice.fell_back);
}

unsafe extern "C" fn counter_bump(receiver: u64, _args: *const u64, _count: usize) -> u64 {
    let value = &*(receiver as *const std::sync::atomic::AtomicI64);
    value.fetch_add(1, std::sync::atomic::Ordering::SeqCst) as u64
}

#[test]
fn test_concurrent_dispatch() {
    let bridge = Arc::new(Bridge::default());
    let key = bridge
        .declare(
            DeclaredType::new("Shared")
                .field(FieldDescriptor::scalar("n", 0, ScalarKind::I64))
                .method(
                    CallTargetDescriptor::method("bump")
                        .returns(ReturnDescriptor::scalar(ScalarKind::I64)),
                ),
        )
        .unwrap();
    bridge.bind_method(&key, "bump", counter_bump);
    let shared = bridge.instantiate(&key).unwrap();
    let barrier = Arc::new(Barrier::new(THREADS));

    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let bridge = bridge.clone();
            let barrier = barrier.clone();
            let shared = shared.clone();
            thread::spawn(move || {
                barrier.wait();
                for _ in 0..100 {
                    bridge.call(&shared, "bump", &[]).unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(shared.get("n").unwrap(), Value::I64((THREADS * 100) as i64));
}
