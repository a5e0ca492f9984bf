//! State shared by the bridge facade and every proxy it hands out

use std::sync::Arc;

use natbridge_sdk::{BridgeError, BridgeResult, TypeKey, TypeTag};
use parking_lot::RwLock;

use crate::cache::{MetadataCache, TypeCatalog};
use crate::config::BridgeOptions;
use crate::dispatch::{DispatchTables, PeerTypeSource, RuntimeTypeSource};
use crate::layout::AggregateLayout;
use crate::memory::NativeAllocator;
use crate::object::StructObject;
use crate::peer::{Peer, PeerRegistry};
use crate::uncertainty::UncertaintyResolver;

/// Everything a proxy needs to reach back into the bridge
pub(crate) struct SharedState {
    /// Options the bridge was created with
    pub options: BridgeOptions,

    /// Declared types and their compute-once metadata
    pub cache: MetadataCache,

    /// Address to peer identity
    pub registry: PeerRegistry,

    /// Memoized representation choices
    pub resolver: UncertaintyResolver,

    /// Bound native entry points
    pub tables: DispatchTables,

    /// Concrete runtime type of a receiver
    pub type_source: RwLock<Arc<dyn RuntimeTypeSource>>,
}

impl SharedState {
    pub fn new(options: BridgeOptions, allocator: Arc<dyn NativeAllocator>) -> Self {
        let registry = PeerRegistry::with_allocator(allocator, &options);
        SharedState {
            options,
            cache: MetadataCache::new(Arc::new(TypeCatalog::new())),
            registry,
            resolver: UncertaintyResolver::new(),
            tables: DispatchTables::new(),
            type_source: RwLock::new(Arc::new(PeerTypeSource)),
        }
    }

    pub fn catalog(&self) -> &Arc<TypeCatalog> {
        self.cache.catalog()
    }

    pub fn type_source(&self) -> Arc<dyn RuntimeTypeSource> {
        self.type_source.read().clone()
    }

    /// Size and alignment of one element of `ty`
    pub fn element_size(&self, ty: &TypeTag) -> BridgeResult<(u64, u64)> {
        match ty {
            TypeTag::Void => Err(BridgeError::marshal("void has no size")),
            TypeTag::Scalar(kind) => Ok((kind.size(), kind.align())),
            TypeTag::Aggregate(key) => {
                let layout = self.cache.layout(key)?;
                Ok((layout.size, layout.align))
            }
        }
    }

    /// Proxy of type `key` over `peer` starting at `base`
    pub fn object(
        self: &Arc<Self>,
        peer: Peer,
        base: u64,
        key: &TypeKey,
    ) -> BridgeResult<StructObject> {
        let layout = self.cache.layout(key)?;
        StructObject::new(self.clone(), peer, base, layout)
    }

    /// Owned copy of the aggregate at `source + offset`
    pub fn copy_aggregate(
        self: &Arc<Self>,
        source: &Peer,
        offset: u64,
        layout: &Arc<AggregateLayout>,
    ) -> BridgeResult<StructObject> {
        let copy = self
            .registry
            .allocate(layout.size, layout.align, Some(layout.key.clone()))?;
        copy.copy_from(0, source, offset, layout.size)?;
        StructObject::new(self.clone(), copy, 0, layout.clone())
    }
}
