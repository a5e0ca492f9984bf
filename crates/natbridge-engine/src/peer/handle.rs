//! Peer handles
//!
//! A [`Peer`] is a cheap-clone handle to one native address range. Identity is
//! the identity of the shared cell: two handles are the same peer exactly when
//! [`Peer::same_peer`] says so.

use std::any::Any;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use natbridge_sdk::{BridgeError, BridgeResult, ScalarKind, TypeKey};
use parking_lot::Mutex;

use crate::memory::{self, NativeAllocator};
use crate::value::Value;

/// Who frees the native memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ownership {
    /// Allocated by or handed to the bridge; freed exactly once
    Owned,
    /// Externally managed; never freed by the bridge
    Borrowed,
}

/// Whether the bridge may mutate the peer's memory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Access {
    ReadWrite,
    ReadOnly,
}

/// Managed-side object associated with a peer
pub type Attachment = Arc<dyn Any + Send + Sync>;

pub(crate) struct PeerCell {
    pub(crate) address: u64,
    pub(crate) size: u64,
    pub(crate) align: u64,
    pub(crate) type_key: Option<TypeKey>,
    pub(crate) ownership: Ownership,
    pub(crate) access: Access,
    pub(crate) released: AtomicBool,
    pub(crate) allocator: Arc<dyn NativeAllocator>,
    attachment: Mutex<Option<Attachment>>,
}

impl PeerCell {
    pub(crate) fn new(
        address: u64,
        size: u64,
        align: u64,
        type_key: Option<TypeKey>,
        ownership: Ownership,
        access: Access,
        allocator: Arc<dyn NativeAllocator>,
    ) -> Self {
        PeerCell {
            address,
            size,
            align,
            type_key,
            ownership,
            access,
            released: AtomicBool::new(false),
            allocator,
            attachment: Mutex::new(None),
        }
    }

    /// Mark released; returns false if it already was.
    pub(crate) fn mark_released(&self) -> bool {
        !self.released.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Free owned memory. Callers must have won [`PeerCell::mark_released`].
    pub(crate) fn free(&self) {
        if self.ownership == Ownership::Owned {
            unsafe { self.allocator.free(self.address, self.size, self.align) };
        }
    }
}

impl Drop for PeerCell {
    // Must not touch the registry: the last handle can be dropped while a
    // registry shard lock is held.
    fn drop(&mut self) {
        if self.ownership == Ownership::Owned && self.mark_released() {
            tracing::debug!(
                address = format_args!("{:#x}", self.address),
                size = self.size,
                "freeing unreachable owned peer"
            );
            self.free();
        }
    }
}

/// Handle to a native address range
#[derive(Clone)]
pub struct Peer(pub(crate) Arc<PeerCell>);

impl Peer {
    /// Native base address
    pub fn address(&self) -> u64 {
        self.0.address
    }

    /// Size of the addressable range in bytes
    pub fn size(&self) -> u64 {
        self.0.size
    }

    /// Declared type the peer was first registered with
    pub fn type_key(&self) -> Option<&TypeKey> {
        self.0.type_key.as_ref()
    }

    pub fn ownership(&self) -> Ownership {
        self.0.ownership
    }

    pub fn access(&self) -> Access {
        self.0.access
    }

    pub fn is_owned(&self) -> bool {
        self.0.ownership == Ownership::Owned
    }

    pub fn is_read_only(&self) -> bool {
        self.0.access == Access::ReadOnly
    }

    pub fn is_released(&self) -> bool {
        self.0.is_released()
    }

    /// Identity comparison
    pub fn same_peer(&self, other: &Peer) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Associate a managed-side object, replacing any previous one
    pub fn attach(&self, object: Attachment) -> Option<Attachment> {
        self.0.attachment.lock().replace(object)
    }

    /// Associated managed-side object
    pub fn attachment(&self) -> Option<Attachment> {
        self.0.attachment.lock().clone()
    }

    /// Remove the associated managed-side object
    pub fn detach(&self) -> Option<Attachment> {
        self.0.attachment.lock().take()
    }

    /// Fail with `UseAfterRelease` once the peer has been released
    pub fn ensure_live(&self) -> BridgeResult<()> {
        if self.is_released() {
            return Err(BridgeError::UseAfterRelease {
                address: self.address(),
            });
        }
        Ok(())
    }

    /// Fail with `ConstViolation` on a read-only peer; `target` names the
    /// field or call target being bound.
    pub fn ensure_writable(&self, target: &str) -> BridgeResult<()> {
        if self.is_read_only() {
            return Err(BridgeError::ConstViolation {
                target: target.to_string(),
                address: self.address(),
            });
        }
        Ok(())
    }

    fn check_range(&self, offset: u64, len: u64) -> BridgeResult<u64> {
        self.ensure_live()?;
        let in_bounds = offset
            .checked_add(len)
            .map(|end| end <= self.size())
            .unwrap_or(false);
        if !in_bounds {
            return Err(BridgeError::marshal(format!(
                "access of {} byte(s) at offset {} outside peer {:#x} of {} byte(s)",
                len,
                offset,
                self.address(),
                self.size()
            )));
        }
        Ok(self.address() + offset)
    }

    /// Read a scalar at `offset`
    pub fn read_scalar(&self, offset: u64, kind: ScalarKind) -> BridgeResult<Value> {
        let address = self.check_range(offset, kind.size())?;
        Ok(unsafe { memory::read_scalar(address, kind) })
    }

    /// Write a scalar at `offset`
    pub fn write_scalar(&self, offset: u64, kind: ScalarKind, value: &Value) -> BridgeResult<()> {
        self.ensure_writable("write")?;
        let address = self.check_range(offset, kind.size())?;
        unsafe { memory::write_scalar(address, kind, value) }
    }

    /// Copy `len` bytes starting at `offset`
    pub fn read_bytes(&self, offset: u64, len: u64) -> BridgeResult<Vec<u8>> {
        let address = self.check_range(offset, len)?;
        let bytes = unsafe { std::slice::from_raw_parts(address as *const u8, len as usize) };
        Ok(bytes.to_vec())
    }

    /// Overwrite bytes starting at `offset`
    pub fn write_bytes(&self, offset: u64, bytes: &[u8]) -> BridgeResult<()> {
        self.ensure_writable("write")?;
        let address = self.check_range(offset, bytes.len() as u64)?;
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), address as *mut u8, bytes.len());
        }
        Ok(())
    }

    /// Copy `len` bytes from `source` at `source_offset` to `offset`
    pub fn copy_from(
        &self,
        offset: u64,
        source: &Peer,
        source_offset: u64,
        len: u64,
    ) -> BridgeResult<()> {
        self.ensure_writable("copy")?;
        let dst = self.check_range(offset, len)?;
        let src = source.check_range(source_offset, len)?;
        // `copy` tolerates overlap when both sides are the same peer.
        unsafe { std::ptr::copy(src as *const u8, dst as *mut u8, len as usize) };
        Ok(())
    }

    /// Zero `len` bytes starting at `offset`
    pub(crate) fn zero(&self, offset: u64, len: u64) -> BridgeResult<()> {
        let address = self.check_range(offset, len)?;
        unsafe { std::ptr::write_bytes(address as *mut u8, 0, len as usize) };
        Ok(())
    }
}

impl PartialEq for Peer {
    fn eq(&self, other: &Self) -> bool {
        self.same_peer(other)
    }
}

impl Eq for Peer {}

impl fmt::Debug for Peer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Peer")
            .field("address", &format_args!("{:#x}", self.address()))
            .field("size", &self.size())
            .field("type_key", &self.type_key())
            .field("ownership", &self.ownership())
            .field("access", &self.access())
            .field("released", &self.is_released())
            .finish()
    }
}
