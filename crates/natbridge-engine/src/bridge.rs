//! Bridge facade
//!
//! [`Bridge`] owns the catalog, the metadata cache, the peer registry, the
//! uncertainty resolver and the dispatch tables, and is the entry point for
//! declaring types, creating proxies, binding native entries, and calling.

use std::sync::Arc;

use natbridge_sdk::{
    BridgeError, BridgeResult, DeclaredType, LayoutError, OperatorKind, TargetKind, TypeKey,
};
use parking_lot::Mutex;
use serde::Deserialize;

use crate::cache::{MetadataCache, TypeMetadata};
use crate::config::BridgeOptions;
use crate::dispatch::{self, CallTarget, NativeEntry, RuntimeTypeSource};
use crate::layout::AggregateLayout;
use crate::memory::{NativeAllocator, SystemAllocator};
use crate::native::Library;
use crate::object::StructObject;
use crate::peer::{Access, Ownership, PeerRegistry};
use crate::shared_state::SharedState;
use crate::uncertainty::UncertaintyResolver;
use crate::value::Value;

/// One declaration or a list of them
#[derive(Deserialize)]
#[serde(untagged)]
enum Declarations {
    One(DeclaredType),
    Many(Vec<DeclaredType>),
}

/// Native struct and call bridge
pub struct Bridge {
    state: Arc<SharedState>,
    /// Libraries whose symbols are bound; kept loaded for the bridge's lifetime
    libraries: Mutex<Vec<Arc<Library>>>,
}

impl Bridge {
    /// Bridge over the system allocator
    pub fn new(options: BridgeOptions) -> Self {
        Self::with_allocator(options, Arc::new(SystemAllocator))
    }

    /// Bridge whose owned peers come from `allocator`
    pub fn with_allocator(options: BridgeOptions, allocator: Arc<dyn NativeAllocator>) -> Self {
        Bridge {
            state: Arc::new(SharedState::new(options, allocator)),
            libraries: Mutex::new(Vec::new()),
        }
    }

    pub fn options(&self) -> &BridgeOptions {
        &self.state.options
    }

    // ------------------------------------------------------------------------
    // Metadata
    // ------------------------------------------------------------------------

    /// Declare a native type
    pub fn declare(&self, decl: DeclaredType) -> BridgeResult<TypeKey> {
        let decl = self.state.catalog().declare(decl)?;
        tracing::debug!(key = %decl.key, fields = decl.fields.len(), "declared type");
        Ok(decl.key.clone())
    }

    /// Declare types from a JSON document holding one declaration or an array
    pub fn declare_json(&self, json: &str) -> BridgeResult<Vec<TypeKey>> {
        let decls = match serde_json::from_str::<Declarations>(json)
            .map_err(|e| LayoutError::MalformedDocument(e.to_string()))?
        {
            Declarations::One(decl) => vec![decl],
            Declarations::Many(decls) => decls,
        };
        decls.into_iter().map(|decl| self.declare(decl)).collect()
    }

    /// Layout and call targets of `key`, computed once
    pub fn metadata(&self, key: &TypeKey) -> BridgeResult<Arc<TypeMetadata>> {
        self.state.cache.get_or_compute(key)
    }

    pub fn layout(&self, key: &TypeKey) -> BridgeResult<Arc<AggregateLayout>> {
        self.state.cache.layout(key)
    }

    // ------------------------------------------------------------------------
    // Proxies
    // ------------------------------------------------------------------------

    /// Allocate a fresh owned instance of `key`
    pub fn instantiate(&self, key: &TypeKey) -> BridgeResult<StructObject> {
        let layout = self.layout(key)?;
        let peer = self
            .state
            .registry
            .allocate(layout.size, layout.align, Some(key.clone()))?;
        StructObject::new(self.state.clone(), peer, 0, layout)
    }

    /// Proxy over externally managed memory
    pub fn wrap(&self, key: &TypeKey, address: u64) -> BridgeResult<StructObject> {
        self.wrap_with(key, address, Ownership::Borrowed, Access::ReadWrite)
    }

    /// Read-only proxy over externally managed memory
    pub fn wrap_read_only(&self, key: &TypeKey, address: u64) -> BridgeResult<StructObject> {
        self.wrap_with(key, address, Ownership::Borrowed, Access::ReadOnly)
    }

    /// Adopt memory from the bridge's allocator; the bridge frees it
    pub fn adopt(&self, key: &TypeKey, address: u64) -> BridgeResult<StructObject> {
        self.wrap_with(key, address, Ownership::Owned, Access::ReadWrite)
    }

    fn wrap_with(
        &self,
        key: &TypeKey,
        address: u64,
        ownership: Ownership,
        access: Access,
    ) -> BridgeResult<StructObject> {
        let layout = self.layout(key)?;
        let peer = self.state.registry.register(
            address,
            layout.size,
            Some(key.clone()),
            ownership,
            access,
        )?;
        StructObject::new(self.state.clone(), peer, 0, layout)
    }

    /// View `obj`'s memory as declared type `key`; the view shares identity
    pub fn cast(&self, obj: &StructObject, key: &TypeKey) -> BridgeResult<StructObject> {
        obj.cast(key)
    }

    /// Release the peer behind `obj`
    pub fn release(&self, obj: &StructObject) -> BridgeResult<()> {
        self.state.registry.release(obj.peer())
    }

    // ------------------------------------------------------------------------
    // Calls
    // ------------------------------------------------------------------------

    /// Call method `name` on `obj`, looking through base types if needed
    pub fn call(&self, obj: &StructObject, name: &str, args: &[Value]) -> BridgeResult<Value> {
        let target = self
            .find_target(obj.type_key(), |meta| meta.method(name).cloned())?
            .ok_or_else(|| {
                BridgeError::dispatch(format!("{} has no method '{}'", obj.type_key(), name))
            })?;
        dispatch::invoke(&self.state, &target, obj, args)
    }

    /// Apply a member operator with `obj` as the left-hand (or only) operand
    pub fn call_operator(
        &self,
        obj: &StructObject,
        kind: OperatorKind,
        args: &[Value],
    ) -> BridgeResult<Value> {
        self.operator(obj, kind, false, args)
    }

    /// Apply a reflected operator: `lhs <op> obj`
    pub fn call_reflected(
        &self,
        obj: &StructObject,
        kind: OperatorKind,
        lhs: Value,
    ) -> BridgeResult<Value> {
        self.operator(obj, kind, true, &[lhs])
    }

    fn operator(
        &self,
        obj: &StructObject,
        kind: OperatorKind,
        reflected: bool,
        args: &[Value],
    ) -> BridgeResult<Value> {
        let target = self
            .find_target(obj.type_key(), |meta| meta.operator(kind, reflected).cloned())?
            .ok_or_else(|| {
                BridgeError::dispatch(format!(
                    "{} has no {}{}",
                    obj.type_key(),
                    if reflected { "reflected " } else { "" },
                    kind.symbol()
                ))
            })?;
        dispatch::invoke(&self.state, &target, obj, args)
    }

    /// First target matching `pick` on `key` or its base types
    fn find_target<F>(&self, key: &TypeKey, pick: F) -> BridgeResult<Option<Arc<CallTarget>>>
    where
        F: Fn(&TypeMetadata) -> Option<Arc<CallTarget>>,
    {
        let mut current = Some(key.clone());
        let mut depth = 0;
        while let Some(ty) = current {
            let meta = self.metadata(&ty)?;
            if let Some(target) = pick(&meta) {
                return Ok(Some(target));
            }
            depth += 1;
            if depth > self.state.catalog().len() {
                break;
            }
            current = meta.parent.clone();
        }
        Ok(None)
    }

    // ------------------------------------------------------------------------
    // Binding
    // ------------------------------------------------------------------------

    /// Bind the fixed entry of a target declared on `key`
    pub fn bind_entry(&self, key: &TypeKey, target: TargetKind, entry: NativeEntry) {
        self.state.tables.bind_fixed(key, target, entry);
    }

    /// Bind the fixed entry of method `name` on `key`
    pub fn bind_method(&self, key: &TypeKey, name: &str, entry: NativeEntry) {
        self.bind_entry(key, TargetKind::Method(name.to_string()), entry);
    }

    /// Bind the fixed entry of an operator on `key`
    pub fn bind_operator(
        &self,
        key: &TypeKey,
        kind: OperatorKind,
        reflected: bool,
        entry: NativeEntry,
    ) {
        self.bind_entry(key, TargetKind::Operator { kind, reflected }, entry);
    }

    /// Bind an entry for targets declared with `symbol`
    pub fn bind_symbol(&self, symbol: &str, entry: NativeEntry) {
        self.state.tables.bind_symbol(symbol, entry);
    }

    /// Install the override of virtual `slot` for runtime type `runtime`
    pub fn bind_virtual(&self, runtime: &TypeKey, slot: u32, entry: NativeEntry) {
        self.state.tables.bind_slot(runtime, slot, entry);
    }

    /// Bind every declared target whose symbol `library` exports.
    ///
    /// Returns how many symbols were bound; targets whose symbol is missing
    /// stay unbound and fail at call time.
    pub fn bind_library_symbols(&self, library: Arc<Library>) -> usize {
        let mut bound = 0;
        for decl in self.state.catalog().declarations() {
            for symbol in decl.methods.iter().filter_map(|m| m.symbol.as_deref()) {
                match library.entry(symbol) {
                    Ok(entry) => {
                        self.state.tables.bind_symbol(symbol, entry);
                        bound += 1;
                    }
                    Err(e) => {
                        tracing::debug!(
                            symbol,
                            library = library.path(),
                            error = %e,
                            "symbol not bound"
                        );
                    }
                }
            }
        }
        self.libraries.lock().push(library);
        bound
    }

    /// Replace the source asked for a receiver's concrete runtime type
    pub fn set_type_source(&self, source: Arc<dyn RuntimeTypeSource>) {
        *self.state.type_source.write() = source;
    }

    // ------------------------------------------------------------------------
    // Components
    // ------------------------------------------------------------------------

    pub fn registry(&self) -> &PeerRegistry {
        &self.state.registry
    }

    pub fn resolver(&self) -> &UncertaintyResolver {
        &self.state.resolver
    }

    pub fn cache(&self) -> &MetadataCache {
        &self.state.cache
    }
}

impl Default for Bridge {
    fn default() -> Self {
        Self::new(BridgeOptions::default())
    }
}
