//! Native memory: allocation and raw scalar access
//!
//! Everything here works on opaque `u64` addresses. Bounds are checked by
//! the callers in [`crate::peer`]; the functions in this module assume the
//! address range they touch is valid.

use natbridge_sdk::{BridgeError, BridgeResult, ScalarKind};

use crate::value::Value;

/// Source of owned native memory.
///
/// The peer registry frees owned peers through the allocator that produced
/// them; adopted addresses (`register_owned`) must come from a compatible
/// allocator.
pub trait NativeAllocator: Send + Sync {
    /// Allocate `size` bytes aligned to `align` (a power of two)
    fn allocate(&self, size: u64, align: u64) -> BridgeResult<u64>;

    /// Free a block.
    ///
    /// # Safety
    ///
    /// `address` must have been returned by this allocator and not freed yet.
    unsafe fn free(&self, address: u64, size: u64, align: u64);
}

/// Allocator backed by the C runtime heap
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemAllocator;

/// `malloc` guarantees this alignment on every supported platform
const MALLOC_ALIGN: u64 = 16;

impl NativeAllocator for SystemAllocator {
    fn allocate(&self, size: u64, align: u64) -> BridgeResult<u64> {
        let size = size.max(1) as usize;
        let ptr = unsafe { raw_alloc(size, align as usize) };
        if ptr.is_null() {
            return Err(BridgeError::marshal(format!(
                "native allocation of {} bytes (align {}) failed",
                size, align
            )));
        }
        Ok(ptr as u64)
    }

    unsafe fn free(&self, address: u64, _size: u64, align: u64) {
        raw_free(address as *mut libc::c_void, align as usize);
    }
}

#[cfg(unix)]
unsafe fn raw_alloc(size: usize, align: usize) -> *mut libc::c_void {
    if align as u64 <= MALLOC_ALIGN {
        return libc::malloc(size);
    }
    let mut out: *mut libc::c_void = std::ptr::null_mut();
    if libc::posix_memalign(&mut out, align, size) != 0 {
        return std::ptr::null_mut();
    }
    out
}

#[cfg(unix)]
unsafe fn raw_free(ptr: *mut libc::c_void, _align: usize) {
    libc::free(ptr);
}

#[cfg(windows)]
unsafe fn raw_alloc(size: usize, align: usize) -> *mut libc::c_void {
    libc::aligned_malloc(size, align.max(MALLOC_ALIGN as usize))
}

#[cfg(windows)]
unsafe fn raw_free(ptr: *mut libc::c_void, _align: usize) {
    libc::aligned_free(ptr);
}

/// Read a scalar at `address`.
///
/// # Safety
///
/// `address..address + kind.size()` must be readable.
pub unsafe fn read_scalar(address: u64, kind: ScalarKind) -> Value {
    let p = address as *const u8;
    let bits = match kind.size() {
        1 => p.read_unaligned() as u64,
        2 => (p as *const u16).read_unaligned() as u64,
        4 => (p as *const u32).read_unaligned() as u64,
        _ => (p as *const u64).read_unaligned(),
    };
    Value::from_bits(kind, bits)
}

/// Write a scalar at `address`, checking the value's shape first.
///
/// # Safety
///
/// `address..address + kind.size()` must be writable.
pub unsafe fn write_scalar(address: u64, kind: ScalarKind, value: &Value) -> BridgeResult<()> {
    let bits = value.to_bits(kind)?;
    let p = address as *mut u8;
    match kind.size() {
        1 => p.write_unaligned(bits as u8),
        2 => (p as *mut u16).write_unaligned(bits as u16),
        4 => (p as *mut u32).write_unaligned(bits as u32),
        _ => (p as *mut u64).write_unaligned(bits),
    }
    Ok(())
}

/// Round `value` up to a multiple of `align` (a power of two); `None` on overflow
#[inline]
pub const fn align_up(value: u64, align: u64) -> Option<u64> {
    match value.checked_add(align - 1) {
        Some(bumped) => Some(bumped & !(align - 1)),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_align_up() {
        assert_eq!(align_up(0, 8), Some(0));
        assert_eq!(align_up(4, 8), Some(8));
        assert_eq!(align_up(8, 8), Some(8));
        assert_eq!(align_up(17, 16), Some(32));
        assert_eq!(align_up(u64::MAX - 3, 8), None);
    }

    #[test]
    fn test_system_allocator_roundtrip() {
        let alloc = SystemAllocator;
        let addr = alloc.allocate(64, 64).unwrap();
        assert_eq!(addr % 64, 0);
        unsafe {
            write_scalar(addr, ScalarKind::F64, &Value::F64(2.5)).unwrap();
            assert_eq!(read_scalar(addr, ScalarKind::F64), Value::F64(2.5));
            write_scalar(addr + 8, ScalarKind::I16, &Value::I16(-3)).unwrap();
            assert_eq!(read_scalar(addr + 8, ScalarKind::I16), Value::I16(-3));
            alloc.free(addr, 64, 64);
        }
    }

    #[test]
    fn test_write_rejects_wrong_shape() {
        let alloc = SystemAllocator;
        let addr = alloc.allocate(8, 8).unwrap();
        let result = unsafe { write_scalar(addr, ScalarKind::U8, &Value::I8(1)) };
        assert!(matches!(result, Err(BridgeError::Marshal(_))));
        unsafe { alloc.free(addr, 8, 8) };
    }
}
