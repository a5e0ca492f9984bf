//! Shared helpers for natbridge-engine integration tests

#![allow(dead_code)]

use std::sync::Arc;

use natbridge_engine::{Bridge, BridgeOptions, NativeAllocator, SystemAllocator};
use natbridge_sdk::BridgeResult;
use parking_lot::Mutex;

/// Allocator that records every allocation and free
#[derive(Default)]
pub struct Sentinel {
    pub allocations: Mutex<Vec<u64>>,
    pub frees: Mutex<Vec<u64>>,
}

impl Sentinel {
    pub fn freed(&self, address: u64) -> usize {
        self.frees.lock().iter().filter(|&&a| a == address).count()
    }

    pub fn free_count(&self) -> usize {
        self.frees.lock().len()
    }
}

impl NativeAllocator for Sentinel {
    fn allocate(&self, size: u64, align: u64) -> BridgeResult<u64> {
        let address = SystemAllocator.allocate(size, align)?;
        self.allocations.lock().push(address);
        Ok(address)
    }

    unsafe fn free(&self, address: u64, size: u64, align: u64) {
        self.frees.lock().push(address);
        SystemAllocator.free(address, size, align);
    }
}

/// Bridge over a recording allocator
pub fn sentinel_bridge() -> (Arc<Sentinel>, Bridge) {
    let sentinel = Arc::new(Sentinel::default());
    let bridge = Bridge::with_allocator(BridgeOptions::default(), sentinel.clone());
    (sentinel, bridge)
}

/// Argument words of a native entry as a slice
///
/// # Safety
///
/// `args` must point to `count` readable words.
pub unsafe fn words<'a>(args: *const u64, count: usize) -> &'a [u64] {
    if count == 0 {
        &[]
    } else {
        std::slice::from_raw_parts(args, count)
    }
}

/// Returned by test entries when their calling convention was violated
pub const BAD_CALL: u64 = u64::MAX;
