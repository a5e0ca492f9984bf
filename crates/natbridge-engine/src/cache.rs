//! Type catalog and compute-once metadata cache
//!
//! Declarations land in the [`TypeCatalog`]. The first request for a type's
//! metadata computes its layout and call targets; every later request, from
//! any thread, receives the same `Arc<TypeMetadata>` (or the same cached
//! failure).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use natbridge_sdk::{BridgeResult, DeclaredType, LayoutError, OperatorKind, TypeKey};
use once_cell::sync::OnceCell;
use rustc_hash::FxHashSet;

use crate::dispatch::CallTarget;
use crate::layout::{compute_layout, AggregateLayout};

// ============================================================================
// Catalog
// ============================================================================

/// Store of declared types
#[derive(Default)]
pub struct TypeCatalog {
    types: DashMap<TypeKey, Arc<DeclaredType>>,
}

impl TypeCatalog {
    /// Empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a declaration.
    ///
    /// Redeclaring a key with identical content is a no-op; different content
    /// fails with [`LayoutError::ConflictingDeclaration`].
    pub fn declare(&self, decl: DeclaredType) -> Result<Arc<DeclaredType>, LayoutError> {
        decl.validate()?;
        match self.types.entry(decl.key.clone()) {
            Entry::Occupied(existing) => {
                if **existing.get() == decl {
                    Ok(existing.get().clone())
                } else {
                    Err(LayoutError::ConflictingDeclaration(decl.key))
                }
            }
            Entry::Vacant(slot) => {
                let decl = Arc::new(decl);
                slot.insert(decl.clone());
                Ok(decl)
            }
        }
    }

    /// Declaration for `key`
    pub fn get(&self, key: &TypeKey) -> Option<Arc<DeclaredType>> {
        self.types.get(key).map(|d| d.value().clone())
    }

    /// Snapshot of every declaration
    pub fn declarations(&self) -> Vec<Arc<DeclaredType>> {
        self.types.iter().map(|d| d.value().clone()).collect()
    }

    /// Whether `key` has been declared
    pub fn contains(&self, key: &TypeKey) -> bool {
        self.types.contains_key(key)
    }

    /// Parent link of a declared type
    pub fn parent(&self, key: &TypeKey) -> Option<TypeKey> {
        self.types.get(key).and_then(|d| d.parent.clone())
    }

    /// Number of declared types
    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Reject by-value containment cycles reachable from `key`.
    ///
    /// Undeclared types are skipped here; the layout engine reports them.
    pub fn check_acyclic(&self, key: &TypeKey) -> Result<(), LayoutError> {
        let mut path = vec![key.clone()];
        let mut done = FxHashSet::default();
        self.visit(key, &mut path, &mut done)
    }

    fn visit(
        &self,
        key: &TypeKey,
        path: &mut Vec<TypeKey>,
        done: &mut FxHashSet<TypeKey>,
    ) -> Result<(), LayoutError> {
        let Some(decl) = self.get(key) else {
            return Ok(());
        };
        for inner in decl.embedded_types() {
            if path.contains(inner) {
                let chain: Vec<&str> = path
                    .iter()
                    .chain(std::iter::once(inner))
                    .map(TypeKey::as_str)
                    .collect();
                return Err(LayoutError::RecursiveAggregate {
                    key: path[0].clone(),
                    path: chain.join(" -> "),
                });
            }
            if done.contains(inner) {
                continue;
            }
            path.push(inner.clone());
            self.visit(inner, path, done)?;
            path.pop();
            done.insert(inner.clone());
        }
        Ok(())
    }
}

// ============================================================================
// Metadata
// ============================================================================

/// Everything the bridge needs to know about one declared type
#[derive(Debug)]
pub struct TypeMetadata {
    /// Computed layout
    pub layout: Arc<AggregateLayout>,
    /// Validated call targets in declaration order
    pub targets: Vec<Arc<CallTarget>>,
    /// Base type for virtual dispatch
    pub parent: Option<TypeKey>,
}

impl TypeMetadata {
    /// Declared type this metadata describes
    pub fn key(&self) -> &TypeKey {
        &self.layout.key
    }

    /// First method target named `name`
    pub fn method(&self, name: &str) -> Option<&Arc<CallTarget>> {
        self.targets.iter().find(|t| t.method_name() == Some(name))
    }

    /// Operator target matching `kind` and reflection
    pub fn operator(&self, kind: OperatorKind, reflected: bool) -> Option<&Arc<CallTarget>> {
        self.targets
            .iter()
            .find(|t| t.operator() == Some((kind, reflected)))
    }
}

type Slot = Arc<OnceCell<Result<Arc<TypeMetadata>, LayoutError>>>;

/// Compute-once cache over a [`TypeCatalog`]
pub struct MetadataCache {
    catalog: Arc<TypeCatalog>,
    entries: DashMap<TypeKey, Slot>,
    computations: AtomicU64,
}

impl MetadataCache {
    pub fn new(catalog: Arc<TypeCatalog>) -> Self {
        MetadataCache {
            catalog,
            entries: DashMap::new(),
            computations: AtomicU64::new(0),
        }
    }

    pub fn catalog(&self) -> &Arc<TypeCatalog> {
        &self.catalog
    }

    /// Metadata for `key`, computing it on first use.
    ///
    /// Concurrent first callers block on the same cell; exactly one
    /// computation runs and every caller observes its result.
    pub fn get_or_compute(&self, key: &TypeKey) -> BridgeResult<Arc<TypeMetadata>> {
        Ok(self.lookup(key)?)
    }

    /// Layout for `key`
    pub fn layout(&self, key: &TypeKey) -> BridgeResult<Arc<AggregateLayout>> {
        Ok(self.lookup(key)?.layout.clone())
    }

    /// Whether a result (success or failure) is already cached
    pub fn is_cached(&self, key: &TypeKey) -> bool {
        self.entries
            .get(key)
            .map(|slot| slot.get().is_some())
            .unwrap_or(false)
    }

    /// Number of computations that actually ran
    pub fn computations(&self) -> u64 {
        self.computations.load(Ordering::Acquire)
    }

    fn lookup(&self, key: &TypeKey) -> Result<Arc<TypeMetadata>, LayoutError> {
        // Clone the cell out so no shard lock is held while computing;
        // nested layouts re-enter the map.
        let existing = self.entries.get(key).map(|slot| slot.value().clone());
        let slot = match existing {
            Some(slot) => slot,
            None => self.entries.entry(key.clone()).or_default().value().clone(),
        };
        slot.get_or_init(|| self.compute(key)).clone()
    }

    fn compute(&self, key: &TypeKey) -> Result<Arc<TypeMetadata>, LayoutError> {
        self.computations.fetch_add(1, Ordering::AcqRel);

        let result = self.compute_uncached(key);
        match &result {
            Ok(meta) => tracing::debug!(
                key = %key,
                size = meta.layout.size,
                align = meta.layout.align,
                targets = meta.targets.len(),
                "computed type metadata"
            ),
            Err(e) => tracing::debug!(key = %key, error = %e, "type metadata failed"),
        }
        result
    }

    fn compute_uncached(&self, key: &TypeKey) -> Result<Arc<TypeMetadata>, LayoutError> {
        let decl = self
            .catalog
            .get(key)
            .ok_or_else(|| LayoutError::UnknownType(key.clone()))?;
        self.catalog.check_acyclic(key)?;

        let layout = compute_layout(key, &decl.fields, decl.align, |inner| {
            let meta = self.lookup(inner)?;
            Ok((meta.layout.size, meta.layout.align))
        })?;

        let targets = decl
            .methods
            .iter()
            .enumerate()
            .map(|(index, desc)| CallTarget::new(key, index, desc).map(Arc::new))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Arc::new(TypeMetadata {
            layout: Arc::new(layout),
            targets,
            parent: decl.parent.clone(),
        }))
    }
}
