//! Argument and return marshaling
//!
//! Managed values become 64-bit argument words: scalars by bit pattern,
//! aggregates and arrays by address. Values that have no native storage yet
//! (managed lists, by-value copies) are copied into owned temporaries that
//! live until the call returns.

use std::sync::Arc;

use natbridge_sdk::{
    BridgeError, BridgeResult, ParamDescriptor, Passing, PointeeCount, Representation,
    ReturnDescriptor, TypeKey, TypeTag,
};

use crate::memory;
use crate::object::{NativeArray, StructObject};
use crate::peer::{Access, Ownership, Peer, PeerRegistry};
use crate::shared_state::SharedState;
use crate::value::Value;

/// Representation used when a slot declares no uncertainty
pub fn default_representation(passing: Passing) -> Representation {
    match passing {
        Passing::ByValue => Representation::Value,
        Passing::ByPointer {
            count: PointeeCount::Fixed(_),
        } => Representation::Array,
        Passing::ByPointer { .. } => Representation::Reference,
    }
}

/// Owned buffers created for one call; released when dropped
pub(crate) struct Temporaries<'a> {
    registry: &'a PeerRegistry,
    peers: Vec<Peer>,
}

impl<'a> Temporaries<'a> {
    pub fn new(registry: &'a PeerRegistry) -> Self {
        Temporaries {
            registry,
            peers: Vec::new(),
        }
    }

    fn allocate(&mut self, size: u64, align: u64) -> BridgeResult<Peer> {
        let peer = self.registry.allocate(size, align, None)?;
        self.peers.push(peer.clone());
        Ok(peer)
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }
}

impl Drop for Temporaries<'_> {
    fn drop(&mut self) {
        for peer in self.peers.drain(..) {
            if let Err(e) = self.registry.release(&peer) {
                tracing::warn!(error = %e, "failed to release call temporary");
            }
        }
    }
}

/// Marshals one call's arguments
pub(crate) struct ArgMarshaler<'a> {
    state: &'a Arc<SharedState>,
    temps: Temporaries<'a>,
}

impl<'a> ArgMarshaler<'a> {
    pub fn new(state: &'a Arc<SharedState>) -> Self {
        ArgMarshaler {
            state,
            temps: Temporaries::new(&state.registry),
        }
    }

    /// Hand back the temporaries so they outlive the native call
    pub fn into_temporaries(self) -> Temporaries<'a> {
        self.temps
    }

    /// Convert `value` for parameter `param` under representation `repr`
    pub fn argument(
        &mut self,
        param: &ParamDescriptor,
        repr: Representation,
        value: &Value,
    ) -> BridgeResult<u64> {
        match param.passing {
            Passing::ByValue => match &param.ty {
                TypeTag::Scalar(kind) => value.to_bits(*kind),
                TypeTag::Aggregate(key) => {
                    let obj = expect_struct(key, value)?;
                    Ok(self.copy_struct(obj)?.address())
                }
                TypeTag::Void => Err(BridgeError::marshal("void parameter")),
            },
            Passing::ByPointer { count } => {
                if let Value::Null = value {
                    return Ok(0);
                }
                match repr {
                    Representation::Reference => self.reference(param, value),
                    Representation::Array => self.array(param, count, value),
                    Representation::Value => self.copied(param, value),
                }
            }
        }
    }

    fn reference(&mut self, param: &ParamDescriptor, value: &Value) -> BridgeResult<u64> {
        match (&param.ty, value) {
            (TypeTag::Aggregate(key), value) => {
                let obj = expect_struct(key, value)?;
                if !param.const_pointee {
                    obj.ensure_writable(NON_CONST_ARG)?;
                }
                obj.peer().ensure_live()?;
                Ok(obj.address())
            }
            (TypeTag::Scalar(_), Value::Pointer(address)) => Ok(*address),
            (TypeTag::Scalar(_), Value::Array(arr)) if !arr.is_empty() => {
                if !param.const_pointee {
                    arr.ensure_writable(NON_CONST_ARG)?;
                }
                Ok(arr.address())
            }
            (TypeTag::Scalar(_), _) => self.copied(param, value),
            (TypeTag::Void, _) => Err(BridgeError::marshal("void parameter")),
        }
    }

    fn array(
        &mut self,
        param: &ParamDescriptor,
        count: PointeeCount,
        value: &Value,
    ) -> BridgeResult<u64> {
        match value {
            Value::Array(arr) => {
                if arr.element() != &param.ty {
                    return Err(BridgeError::marshal(format!(
                        "expected array of {}, got array of {}",
                        param.ty,
                        arr.element()
                    )));
                }
                if let PointeeCount::Fixed(n) = count {
                    if arr.len() < n as usize {
                        return Err(BridgeError::marshal(format!(
                            "expected at least {} element(s), got {}",
                            n,
                            arr.len()
                        )));
                    }
                }
                if !param.const_pointee {
                    arr.ensure_writable(NON_CONST_ARG)?;
                }
                arr.peer().ensure_live()?;
                Ok(arr.address())
            }
            Value::List(items) => {
                if let PointeeCount::Fixed(n) = count {
                    if items.len() != n as usize {
                        return Err(BridgeError::marshal(format!(
                            "expected {} element(s), got {}",
                            n,
                            items.len()
                        )));
                    }
                }
                self.copy_list(&param.ty, items)
            }
            Value::Pointer(address) => Ok(*address),
            Value::Struct(obj) => {
                let key = param.ty.aggregate_key().ok_or_else(|| {
                    BridgeError::marshal(format!("expected array of {}, got struct", param.ty))
                })?;
                let single = matches!(count, PointeeCount::Unknown | PointeeCount::Fixed(1));
                if !single {
                    return Err(BridgeError::marshal(format!(
                        "expected array of {}, got a single {}",
                        key,
                        obj.type_key()
                    )));
                }
                self.reference(param, value)
            }
            other => Err(BridgeError::marshal(format!(
                "expected array of {}, got {}",
                param.ty,
                other.type_name()
            ))),
        }
    }

    /// Copy a single value into a fresh buffer and pass its address
    fn copied(&mut self, param: &ParamDescriptor, value: &Value) -> BridgeResult<u64> {
        match &param.ty {
            TypeTag::Scalar(kind) => {
                let buffer = self.temps.allocate(kind.size(), kind.align())?;
                buffer.write_scalar(0, *kind, value)?;
                Ok(buffer.address())
            }
            TypeTag::Aggregate(key) => {
                let obj = expect_struct(key, value)?;
                Ok(self.copy_struct(obj)?.address())
            }
            TypeTag::Void => Err(BridgeError::marshal("void parameter")),
        }
    }

    fn copy_struct(&mut self, obj: &StructObject) -> BridgeResult<Peer> {
        let layout = obj.layout();
        let buffer = self.temps.allocate(layout.size, layout.align)?;
        buffer.copy_from(0, obj.peer(), obj.offset(), layout.size)?;
        Ok(buffer)
    }

    fn copy_list(&mut self, element: &TypeTag, items: &[Value]) -> BridgeResult<u64> {
        let (size, align) = self.state.element_size(element)?;
        let buffer = self.temps.allocate(size * items.len() as u64, align)?;
        for (i, item) in items.iter().enumerate() {
            let offset = size * i as u64;
            match element {
                TypeTag::Scalar(kind) => buffer.write_scalar(offset, *kind, item)?,
                TypeTag::Aggregate(key) => {
                    let obj = expect_struct(key, item)?;
                    buffer.copy_from(offset, obj.peer(), obj.offset(), size)?;
                }
                TypeTag::Void => return Err(BridgeError::marshal("void element")),
            }
        }
        Ok(buffer.address())
    }
}

fn expect_struct<'v>(key: &TypeKey, value: &'v Value) -> BridgeResult<&'v StructObject> {
    let obj = value.as_struct().ok_or_else(|| {
        BridgeError::marshal(format!("expected {}, got {}", key, value.type_name()))
    })?;
    if obj.type_key() != key {
        return Err(BridgeError::marshal(format!(
            "expected {}, got {}",
            key,
            obj.type_key()
        )));
    }
    Ok(obj)
}

/// Target named when a const view is bound to a mutable pointer parameter
const NON_CONST_ARG: &str = "non-const pointer argument";

// ============================================================================
// Returns
// ============================================================================

/// Decode the raw return word of a call
pub(crate) fn return_value(
    state: &Arc<SharedState>,
    ret: &ReturnDescriptor,
    repr: Representation,
    bits: u64,
) -> BridgeResult<Value> {
    match ret.passing {
        Passing::ByValue => match &ret.ty {
            TypeTag::Void => Ok(Value::Void),
            TypeTag::Scalar(kind) => Ok(Value::from_bits(*kind, bits)),
            TypeTag::Aggregate(_) => Err(BridgeError::marshal(
                "by-value aggregate returns are written to an out-buffer",
            )),
        },
        Passing::ByPointer { count } => {
            if bits == 0 {
                return Ok(Value::Null);
            }
            pointer_return(state, ret, repr, count, bits)
        }
    }
}

/// Peer for a returned pointer of `size` bytes.
///
/// Owned returns claim the memory. Borrowed returns reuse a live peer that
/// already covers the address (a method returning `this`), else register a
/// new borrowed one.
fn returned_peer(
    state: &SharedState,
    ret: &ReturnDescriptor,
    address: u64,
    size: u64,
    key: Option<TypeKey>,
) -> BridgeResult<Peer> {
    if ret.owned {
        return state
            .registry
            .register(address, size, key, Ownership::Owned, Access::ReadWrite);
    }
    match state.registry.lookup(address) {
        Some(peer) if peer.size() >= size => Ok(peer),
        _ => state
            .registry
            .register(address, size, key, Ownership::Borrowed, Access::ReadWrite),
    }
}

fn pointer_return(
    state: &Arc<SharedState>,
    ret: &ReturnDescriptor,
    repr: Representation,
    count: PointeeCount,
    address: u64,
) -> BridgeResult<Value> {
    let fixed = match count {
        PointeeCount::Fixed(n) => Some(n),
        _ => None,
    };

    match (&ret.ty, repr, fixed) {
        (TypeTag::Void, ..) => Ok(Value::Pointer(address)),

        (ty, Representation::Array, Some(n)) => {
            let (size, _) = state.element_size(ty)?;
            let key = ty.aggregate_key().cloned();
            let peer = returned_peer(state, ret, address, size * n as u64, key)?;
            let arr = NativeArray::new(state.clone(), peer, 0, ty.clone(), size, n)?;
            Ok(Value::Array(arr.const_if(ret.const_pointee)))
        }

        (TypeTag::Scalar(kind), Representation::Value, _) => {
            let value = unsafe { memory::read_scalar(address, *kind) };
            if ret.owned {
                // Adopt and drop so the allocation is freed once.
                drop(returned_peer(state, ret, address, kind.size(), None)?);
            }
            Ok(value)
        }

        (TypeTag::Scalar(_), _, _) => {
            if ret.owned {
                return Err(BridgeError::marshal(
                    "owned scalar pointer returns need a value or fixed array representation",
                ));
            }
            Ok(Value::Pointer(address))
        }

        (TypeTag::Aggregate(key), repr, _) => {
            let layout = state.cache.layout(key)?;
            let peer = returned_peer(state, ret, address, layout.size, Some(key.clone()))?;
            match repr {
                Representation::Value => {
                    let copy = state.copy_aggregate(&peer, 0, &layout)?;
                    Ok(Value::Struct(copy))
                }
                Representation::Reference | Representation::Array => {
                    let view = StructObject::new(state.clone(), peer, 0, layout)?;
                    Ok(Value::Struct(view.const_if(ret.const_pointee)))
                }
            }
        }
    }
}
