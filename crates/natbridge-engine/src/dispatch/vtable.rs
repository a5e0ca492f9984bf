//! Native entry points and dispatch tables
//!
//! Non-virtual targets resolve to a fixed entry bound by symbol or by
//! `(type, target)`. Virtual targets resolve through per-type slot tables,
//! walking the parent chain from the receiver's concrete runtime type.

use std::fmt;

use dashmap::DashMap;
use natbridge_sdk::{TargetKind, TypeKey};
use rustc_hash::FxHashSet;

use crate::peer::Peer;

/// Uniform native entry convention.
///
/// Scalars travel as 64-bit bit patterns; aggregates and arrays as
/// addresses. A by-value aggregate return is written to a hidden trailing
/// out-buffer argument.
pub type NativeEntry =
    unsafe extern "C" fn(receiver: u64, args: *const u64, arg_count: usize) -> u64;

/// Virtual method table of one runtime type
#[derive(Clone, Default)]
pub struct VTable {
    slots: Vec<Option<NativeEntry>>,
}

impl VTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Install `entry` at `slot`, growing the table as needed
    pub fn set(&mut self, slot: u32, entry: NativeEntry) {
        let slot = slot as usize;
        if self.slots.len() <= slot {
            self.slots.resize(slot + 1, None);
        }
        self.slots[slot] = Some(entry);
    }

    /// Entry at `slot`, if overridden on this type
    pub fn get(&self, slot: u32) -> Option<NativeEntry> {
        self.slots.get(slot as usize).copied().flatten()
    }

    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }
}

impl fmt::Debug for VTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let filled: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, e)| e.map(|_| i))
            .collect();
        f.debug_struct("VTable").field("filled", &filled).finish()
    }
}

/// Asks the native environment for a receiver's concrete type
pub trait RuntimeTypeSource: Send + Sync {
    /// Concrete type of `receiver`, or `None` if unknown
    fn runtime_type(&self, receiver: &Peer, declared: &TypeKey) -> Option<TypeKey>;
}

/// Source that trusts the type the peer was registered with
#[derive(Debug, Default, Clone, Copy)]
pub struct PeerTypeSource;

impl RuntimeTypeSource for PeerTypeSource {
    fn runtime_type(&self, receiver: &Peer, _declared: &TypeKey) -> Option<TypeKey> {
        receiver.type_key().cloned()
    }
}

/// All bound native entry points
#[derive(Default)]
pub struct DispatchTables {
    vtables: DashMap<TypeKey, VTable>,
    fixed: DashMap<(TypeKey, TargetKind), NativeEntry>,
    symbols: DashMap<String, NativeEntry>,
}

impl DispatchTables {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind the fixed entry of a target on `owner`
    pub fn bind_fixed(&self, owner: &TypeKey, target: TargetKind, entry: NativeEntry) {
        self.fixed.insert((owner.clone(), target), entry);
    }

    /// Bind a fixed entry by symbol name
    pub fn bind_symbol(&self, symbol: impl Into<String>, entry: NativeEntry) {
        self.symbols.insert(symbol.into(), entry);
    }

    /// Install an override for `slot` on runtime type `ty`
    pub fn bind_slot(&self, ty: &TypeKey, slot: u32, entry: NativeEntry) {
        self.vtables.entry(ty.clone()).or_default().set(slot, entry);
    }

    /// Fixed entry of a target: by symbol if it has one, else by `(owner, target)`
    pub fn fixed(
        &self,
        owner: &TypeKey,
        target: &TargetKind,
        symbol: Option<&str>,
    ) -> Option<NativeEntry> {
        if let Some(symbol) = symbol {
            if let Some(entry) = self.symbols.get(symbol) {
                return Some(*entry);
            }
        }
        self.fixed
            .get(&(owner.clone(), target.clone()))
            .map(|e| *e.value())
    }

    /// Slot entry for `runtime`, walking up through `parent`.
    ///
    /// Stops at the first override found, at the root, or on a parent cycle.
    pub fn virtual_entry<F>(&self, runtime: &TypeKey, slot: u32, parent: F) -> Option<NativeEntry>
    where
        F: Fn(&TypeKey) -> Option<TypeKey>,
    {
        let mut seen = FxHashSet::default();
        let mut current = Some(runtime.clone());
        while let Some(ty) = current {
            if let Some(entry) = self.vtables.get(&ty).and_then(|vt| vt.get(slot)) {
                return Some(entry);
            }
            current = parent(&ty);
            seen.insert(ty);
            if current.as_ref().map(|p| seen.contains(p)).unwrap_or(false) {
                return None;
            }
        }
        None
    }

    /// Number of types with a vtable
    pub fn vtable_count(&self) -> usize {
        self.vtables.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use natbridge_sdk::OperatorKind;

    unsafe extern "C" fn one(_: u64, _: *const u64, _: usize) -> u64 {
        1
    }

    unsafe extern "C" fn two(_: u64, _: *const u64, _: usize) -> u64 {
        2
    }

    fn call(entry: NativeEntry) -> u64 {
        unsafe { entry(0, std::ptr::null(), 0) }
    }

    #[test]
    fn test_vtable_slots() {
        let mut vt = VTable::new();
        assert!(vt.get(3).is_none());
        vt.set(3, one);
        assert_eq!(vt.slot_count(), 4);
        assert!(vt.get(0).is_none());
        assert_eq!(call(vt.get(3).unwrap()), 1);
    }

    #[test]
    fn test_fixed_prefers_symbol() {
        let tables = DispatchTables::new();
        let owner = TypeKey::new("T");
        let target = TargetKind::Method("f".into());
        tables.bind_fixed(&owner, target.clone(), one);
        tables.bind_symbol("T_f", two);

        assert_eq!(call(tables.fixed(&owner, &target, None).unwrap()), 1);
        assert_eq!(call(tables.fixed(&owner, &target, Some("T_f")).unwrap()), 2);
        // Unknown symbol falls back to the (type, target) binding
        assert_eq!(call(tables.fixed(&owner, &target, Some("nope")).unwrap()), 1);
    }

    #[test]
    fn test_operators_keyed_by_kind() {
        let tables = DispatchTables::new();
        let owner = TypeKey::new("V");
        let add = TargetKind::Operator {
            kind: OperatorKind::Add,
            reflected: false,
        };
        let plus = TargetKind::Operator {
            kind: OperatorKind::UnaryPlus,
            reflected: false,
        };
        tables.bind_fixed(&owner, add.clone(), one);
        tables.bind_fixed(&owner, plus.clone(), two);
        assert_eq!(call(tables.fixed(&owner, &add, None).unwrap()), 1);
        assert_eq!(call(tables.fixed(&owner, &plus, None).unwrap()), 2);
    }

    #[test]
    fn test_virtual_walks_parents() {
        let tables = DispatchTables::new();
        let base = TypeKey::new("Base");
        let mid = TypeKey::new("Mid");
        let leaf = TypeKey::new("Leaf");
        tables.bind_slot(&base, 0, one);
        tables.bind_slot(&mid, 1, two);

        let parent = |k: &TypeKey| match k.as_str() {
            "Leaf" => Some(TypeKey::new("Mid")),
            "Mid" => Some(TypeKey::new("Base")),
            _ => None,
        };
        assert_eq!(call(tables.virtual_entry(&leaf, 0, parent).unwrap()), 1);
        assert_eq!(call(tables.virtual_entry(&leaf, 1, parent).unwrap()), 2);
        assert!(tables.virtual_entry(&base, 1, parent).is_none());
    }

    #[test]
    fn test_parent_cycle_terminates() {
        let tables = DispatchTables::new();
        let a = TypeKey::new("A");
        let parent = |k: &TypeKey| match k.as_str() {
            "A" => Some(TypeKey::new("B")),
            _ => Some(TypeKey::new("A")),
        };
        assert!(tables.virtual_entry(&a, 0, parent).is_none());
    }
}
