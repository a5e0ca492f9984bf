//! Address-indexed peer registry
//!
//! The registry holds only weak references: a peer lives as long as some
//! managed-side handle does. Entries whose peer is gone are skipped on lookup
//! and replaced on registration. Registration sweeps them in bulk once the
//! index outgrows twice the live set, so the index stays proportional to the
//! number of live peers.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Weak};

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use natbridge_sdk::{BridgeError, BridgeResult, TypeKey};
use parking_lot::Mutex;

use super::handle::{Access, Ownership, Peer, PeerCell};
use crate::config::BridgeOptions;
use crate::memory::{NativeAllocator, SystemAllocator};

/// Index size below which stale entries are never swept
const PURGE_FLOOR: usize = 64;

/// Registry mapping native addresses to live peers
pub struct PeerRegistry {
    /// Address to peer identity
    peers: DashMap<u64, Weak<PeerCell>>,
    /// Start address to owned peer, for overlap checks.
    /// Lock order: `owned` before any `peers` shard.
    owned: Mutex<BTreeMap<u64, Weak<PeerCell>>>,
    /// Index size that triggers the next sweep
    purge_at: AtomicUsize,
    allocator: Arc<dyn NativeAllocator>,
    zero_fill: bool,
    min_align: u64,
    strict_aliasing: bool,
}

impl PeerRegistry {
    /// Registry over the system allocator with default options
    pub fn new() -> Self {
        Self::with_allocator(Arc::new(SystemAllocator), &BridgeOptions::default())
    }

    pub fn with_allocator(allocator: Arc<dyn NativeAllocator>, options: &BridgeOptions) -> Self {
        PeerRegistry {
            peers: DashMap::new(),
            owned: Mutex::new(BTreeMap::new()),
            purge_at: AtomicUsize::new(PURGE_FLOOR),
            allocator,
            zero_fill: options.zero_fill,
            min_align: options.min_alloc_align,
            strict_aliasing: options.strict_aliasing,
        }
    }

    /// Allocator used for owned peers
    pub fn allocator(&self) -> &Arc<dyn NativeAllocator> {
        &self.allocator
    }

    /// Adopt `address` as owned memory; the bridge will free it
    pub fn register_owned(
        &self,
        address: u64,
        size: u64,
        type_key: Option<TypeKey>,
    ) -> BridgeResult<Peer> {
        self.register(address, size, type_key, Ownership::Owned, Access::ReadWrite)
    }

    /// Wrap externally managed memory
    pub fn register_borrowed(
        &self,
        address: u64,
        size: u64,
        type_key: Option<TypeKey>,
    ) -> BridgeResult<Peer> {
        self.register(address, size, type_key, Ownership::Borrowed, Access::ReadWrite)
    }

    /// Register `address`, reusing the live peer if there is one.
    ///
    /// A live peer with a different size, ownership, or access fails with
    /// `AliasingError`, as does an owned range overlapping another live owned
    /// peer.
    pub fn register(
        &self,
        address: u64,
        size: u64,
        type_key: Option<TypeKey>,
        ownership: Ownership,
        access: Access,
    ) -> BridgeResult<Peer> {
        self.register_aligned(address, size, self.min_align, type_key, ownership, access)
    }

    fn register_aligned(
        &self,
        address: u64,
        size: u64,
        align: u64,
        type_key: Option<TypeKey>,
        ownership: Ownership,
        access: Access,
    ) -> BridgeResult<Peer> {
        if address == 0 {
            return Err(BridgeError::marshal("cannot register a null address"));
        }

        // Owned registrations hold the range index for the whole operation so
        // the overlap check and the insert are atomic.
        let mut owned = match ownership {
            Ownership::Owned => Some(self.owned.lock()),
            Ownership::Borrowed => None,
        };

        let peer = match self.peers.entry(address) {
            Entry::Occupied(mut entry) => match live(entry.get()) {
                Some(cell) => {
                    let existing = Peer(cell);
                    check_compatible(&existing, size, ownership, access)?;
                    return Ok(existing);
                }
                None => {
                    if let Some(index) = owned.as_deref_mut() {
                        self.check_overlap(index, address, size)?;
                    }
                    let peer = self.new_peer(address, size, align, type_key, ownership, access);
                    entry.insert(Arc::downgrade(&peer.0));
                    peer
                }
            },
            Entry::Vacant(entry) => {
                if let Some(index) = owned.as_deref_mut() {
                    self.check_overlap(index, address, size)?;
                }
                let peer = self.new_peer(address, size, align, type_key, ownership, access);
                entry.insert(Arc::downgrade(&peer.0));
                peer
            }
        };

        if let Some(index) = owned.as_deref_mut() {
            index.insert(address, Arc::downgrade(&peer.0));
        }
        drop(owned);
        self.maybe_purge();

        tracing::debug!(
            address = format_args!("{:#x}", address),
            size,
            ?ownership,
            ?access,
            "registered peer"
        );
        Ok(peer)
    }

    /// Allocate `size` bytes of owned native memory
    pub fn allocate(&self, size: u64, align: u64, type_key: Option<TypeKey>) -> BridgeResult<Peer> {
        let align = align.max(self.min_align);
        let address = self.allocator.allocate(size, align)?;
        let registered = self.register_aligned(
            address,
            size,
            align,
            type_key,
            Ownership::Owned,
            Access::ReadWrite,
        );
        let peer = match registered {
            Ok(peer) => peer,
            Err(e) => {
                unsafe { self.allocator.free(address, size, align) };
                return Err(e);
            }
        };
        if self.zero_fill {
            peer.zero(0, size)?;
        }
        Ok(peer)
    }

    /// Live peer at `address`; never allocates or frees
    pub fn lookup(&self, address: u64) -> Option<Peer> {
        let found = self.peers.get(&address).map(|w| live(w.value()));
        match found {
            Some(Some(cell)) => Some(Peer(cell)),
            Some(None) => {
                self.peers.remove_if(&address, |_, w| live(w).is_none());
                None
            }
            None => None,
        }
    }

    /// Release a peer.
    ///
    /// Borrowed peers are left untouched. Owned peers are freed and removed
    /// from the registry; releasing them again fails with `DoubleRelease`.
    pub fn release(&self, peer: &Peer) -> BridgeResult<()> {
        if peer.ownership() == Ownership::Borrowed {
            return Ok(());
        }
        let address = peer.address();
        if !peer.0.mark_released() {
            return Err(BridgeError::DoubleRelease { address });
        }

        {
            let mut owned = self.owned.lock();
            let ours = |w: &Weak<PeerCell>| std::ptr::eq(w.as_ptr(), Arc::as_ptr(&peer.0));
            if owned.get(&address).map(ours).unwrap_or(false) {
                owned.remove(&address);
            }
            self.peers.remove_if(&address, |_, w| ours(w));
        }

        peer.0.free();
        tracing::debug!(
            address = format_args!("{:#x}", address),
            size = peer.size(),
            "released owned peer"
        );
        Ok(())
    }

    /// Number of live registered peers
    pub fn live_count(&self) -> usize {
        self.peers
            .iter()
            .filter(|entry| live(entry.value()).is_some())
            .count()
    }

    /// Number of index entries, including ones whose peer is gone
    pub fn entry_count(&self) -> usize {
        self.peers.len()
    }

    /// Drop index entries whose peer is gone; returns how many were removed
    pub fn purge_stale(&self) -> usize {
        let mut owned = self.owned.lock();
        owned.retain(|_, w| w.strong_count() > 0);
        let before = self.peers.len();
        self.peers.retain(|_, w| w.strong_count() > 0);
        let remaining = self.peers.len();
        self.purge_at
            .store((remaining * 2).max(PURGE_FLOOR), Ordering::Relaxed);
        before.saturating_sub(remaining)
    }

    /// Sweep once the index reaches the threshold set by the last sweep.
    /// Must not be called with `owned` or a `peers` shard held.
    fn maybe_purge(&self) {
        if self.peers.len() >= self.purge_at.load(Ordering::Relaxed) {
            let removed = self.purge_stale();
            if removed > 0 {
                tracing::debug!(removed, live = self.peers.len(), "purged stale peer entries");
            }
        }
    }

    fn new_peer(
        &self,
        address: u64,
        size: u64,
        align: u64,
        type_key: Option<TypeKey>,
        ownership: Ownership,
        access: Access,
    ) -> Peer {
        Peer(Arc::new(PeerCell::new(
            address,
            size,
            align,
            type_key,
            ownership,
            access,
            self.allocator.clone(),
        )))
    }

    /// Reject `[address, address + size)` if it intersects a live owned peer.
    /// Live owned ranges never overlap each other, so the scan walks back from
    /// the end of the new range until it passes a live entry.
    fn check_overlap(
        &self,
        index: &mut BTreeMap<u64, Weak<PeerCell>>,
        address: u64,
        size: u64,
    ) -> BridgeResult<()> {
        if !self.strict_aliasing {
            return Ok(());
        }
        let end = address.saturating_add(size.max(1));
        let mut stale = Vec::new();
        let mut conflict = None;
        for (&start, weak) in index.range(..end).rev() {
            if weak.strong_count() == 0 {
                stale.push(start);
                continue;
            }
            let span = weak.upgrade().map(|c| c.size.max(1)).unwrap_or(0);
            if start.saturating_add(span) > address {
                conflict = Some(start);
            }
            break;
        }
        for start in stale {
            index.remove(&start);
        }
        if let Some(start) = conflict {
            return Err(BridgeError::aliasing(
                address,
                format!("overlaps live owned peer at {:#x}", start),
            ));
        }
        Ok(())
    }
}

impl Default for PeerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Upgrade an index entry to a live, unreleased peer cell
fn live(weak: &Weak<PeerCell>) -> Option<Arc<PeerCell>> {
    weak.upgrade().filter(|cell| !cell.is_released())
}

fn check_compatible(
    existing: &Peer,
    size: u64,
    ownership: Ownership,
    access: Access,
) -> BridgeResult<()> {
    let address = existing.address();
    if existing.size() != size {
        return Err(BridgeError::aliasing(
            address,
            format!("size {} conflicts with live peer of size {}", size, existing.size()),
        ));
    }
    if existing.ownership() != ownership {
        return Err(BridgeError::aliasing(
            address,
            format!(
                "{:?} registration conflicts with live {:?} peer",
                ownership,
                existing.ownership()
            ),
        ));
    }
    if existing.access() != access {
        return Err(BridgeError::aliasing(
            address,
            format!(
                "{:?} registration conflicts with live {:?} peer",
                access,
                existing.access()
            ),
        ));
    }
    Ok(())
}
