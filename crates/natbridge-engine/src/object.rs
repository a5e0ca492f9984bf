//! Managed-side proxies over native memory
//!
//! A [`StructObject`] is a typed view of an aggregate: a peer, a base offset
//! into it, and the aggregate's layout. Embedded aggregates are views over
//! the same peer at a deeper offset, so they share the peer's identity and
//! lifetime. A [`NativeArray`] is a bounds-checked view over consecutive
//! elements.

use std::fmt;
use std::sync::Arc;

use natbridge_sdk::{BridgeError, BridgeResult, Representation, TypeKey, TypeTag};

use crate::layout::{AggregateLayout, FieldLayout};
use crate::peer::Peer;
use crate::shared_state::SharedState;
use crate::uncertainty::{NativeShape, SiteKey};
use crate::value::Value;

// ============================================================================
// StructObject
// ============================================================================

/// Proxy for a native aggregate
#[derive(Clone)]
pub struct StructObject {
    state: Arc<SharedState>,
    peer: Peer,
    base: u64,
    layout: Arc<AggregateLayout>,
    /// Const view: rejects mutation even if the peer is writable
    read_only: bool,
}

impl StructObject {
    pub(crate) fn new(
        state: Arc<SharedState>,
        peer: Peer,
        base: u64,
        layout: Arc<AggregateLayout>,
    ) -> BridgeResult<Self> {
        let fits = base
            .checked_add(layout.size)
            .map(|end| end <= peer.size())
            .unwrap_or(false);
        if !fits {
            return Err(BridgeError::marshal(format!(
                "{} ({} bytes) at offset {} does not fit peer {:#x} of {} bytes",
                layout.key,
                layout.size,
                base,
                peer.address(),
                peer.size()
            )));
        }
        Ok(StructObject {
            state,
            peer,
            base,
            layout,
            read_only: false,
        })
    }

    /// Same view, made const if `read_only`
    pub(crate) fn const_if(mut self, read_only: bool) -> Self {
        self.read_only |= read_only;
        self
    }

    /// Backing peer
    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    pub fn layout(&self) -> &Arc<AggregateLayout> {
        &self.layout
    }

    pub fn type_key(&self) -> &TypeKey {
        &self.layout.key
    }

    /// Native address of the aggregate
    pub fn address(&self) -> u64 {
        self.peer.address() + self.base
    }

    /// Offset of the aggregate within its peer
    pub fn offset(&self) -> u64 {
        self.base
    }

    /// Const view or read-only peer
    pub fn is_read_only(&self) -> bool {
        self.read_only || self.peer.is_read_only()
    }

    /// Fail with `ConstViolation` if this view may not be mutated; `target`
    /// names the field or call target being bound.
    pub fn ensure_writable(&self, target: &str) -> BridgeResult<()> {
        if self.is_read_only() {
            return Err(BridgeError::ConstViolation {
                target: target.to_string(),
                address: self.address(),
            });
        }
        Ok(())
    }

    /// Same native object: same peer at the same offset, whatever the view type
    pub fn same_object(&self, other: &StructObject) -> bool {
        self.peer.same_peer(&other.peer) && self.base == other.base
    }

    /// Same memory viewed as declared type `key`
    pub fn cast(&self, key: &TypeKey) -> BridgeResult<StructObject> {
        let view = self.state.object(self.peer.clone(), self.base, key)?;
        Ok(view.const_if(self.read_only))
    }

    /// Representation used for the field with order `order`
    pub fn representation(&self, order: u32) -> BridgeResult<Representation> {
        let field = self.layout.field(order)?;
        Ok(self.field_repr(field))
    }

    /// Read a whole field.
    ///
    /// Single elements are returned as values (scalars) or proxies
    /// (aggregates). Multi-element fields follow their representation: a
    /// [`NativeArray`] view for `Array`, the first element for `Reference`,
    /// a list of copies for `Value`.
    pub fn read_field(&self, order: u32) -> BridgeResult<Value> {
        let field = self.readable(order)?;
        let repr = self.field_repr(field);
        if field.count == 1 {
            return self.load(field, self.base + field.offset, repr);
        }
        match repr {
            Representation::Array => Ok(Value::Array(
                NativeArray::new(
                    self.state.clone(),
                    self.peer.clone(),
                    self.base + field.offset,
                    field.ty.clone(),
                    field.stride,
                    field.count,
                )?
                .const_if(self.read_only),
            )),
            Representation::Reference => match &field.ty {
                TypeTag::Scalar(_) => Ok(Value::Pointer(self.address() + field.offset)),
                _ => self.load(field, self.base + field.offset, repr),
            },
            Representation::Value => (0..field.count)
                .map(|i| {
                    let offset = self.base + field.element_offset(i)?;
                    self.load(field, offset, repr)
                })
                .collect::<BridgeResult<Vec<_>>>()
                .map(Value::List),
        }
    }

    /// Read element `index` of a field; bounds-checked against its count
    pub fn read_element(&self, order: u32, index: u32) -> BridgeResult<Value> {
        let field = self.readable(order)?;
        let offset = self.base + field.element_offset(index)?;
        self.load(field, offset, self.field_repr(field))
    }

    /// Overwrite a whole field. Multi-element fields take a list or array of
    /// exactly `count` elements.
    pub fn write_field(&self, order: u32, value: impl Into<Value>) -> BridgeResult<()> {
        let field = self.writable(order)?;
        let value = value.into();
        if field.count == 1 {
            return self.store(field, self.base + field.offset, &value);
        }
        let elements = match value {
            Value::List(items) => items,
            Value::Array(arr) => arr.to_vec()?,
            other => {
                return Err(BridgeError::marshal(format!(
                    "field '{}' holds {} elements, got {}",
                    field.name,
                    field.count,
                    other.type_name()
                )))
            }
        };
        if elements.len() != field.count as usize {
            return Err(BridgeError::marshal(format!(
                "field '{}' holds {} elements, got {}",
                field.name,
                field.count,
                elements.len()
            )));
        }
        for (i, element) in elements.iter().enumerate() {
            let offset = self.base + field.element_offset(i as u32)?;
            self.store(field, offset, element)?;
        }
        Ok(())
    }

    /// Overwrite element `index` of a field
    pub fn write_element(
        &self,
        order: u32,
        index: u32,
        value: impl Into<Value>,
    ) -> BridgeResult<()> {
        let field = self.writable(order)?;
        let offset = self.base + field.element_offset(index)?;
        self.store(field, offset, &value.into())
    }

    /// Read a field by name
    pub fn get(&self, name: &str) -> BridgeResult<Value> {
        let order = self.layout.field_by_name(name)?.order;
        self.read_field(order)
    }

    /// Write a field by name
    pub fn set(&self, name: &str, value: impl Into<Value>) -> BridgeResult<()> {
        let order = self.layout.field_by_name(name)?.order;
        self.write_field(order, value)
    }

    fn readable(&self, order: u32) -> BridgeResult<&FieldLayout> {
        let field = self.layout.field(order)?;
        if !field.getter {
            return Err(BridgeError::marshal(format!(
                "{}.{} has no getter",
                self.layout.key, field.name
            )));
        }
        Ok(field)
    }

    fn writable(&self, order: u32) -> BridgeResult<&FieldLayout> {
        let field = self.layout.field(order)?;
        if !field.setter {
            return Err(BridgeError::marshal(format!(
                "{}.{} has no setter",
                self.layout.key, field.name
            )));
        }
        self.ensure_writable(&format!("{}.{}", self.layout.key, field.name))?;
        Ok(field)
    }

    fn field_repr(&self, field: &FieldLayout) -> Representation {
        match &field.uncertain {
            Some(spec) => {
                let site = SiteKey::field(&self.layout.key, field.order);
                self.state
                    .resolver
                    .resolve(spec, site, NativeShape::of_field(field))
                    .chosen
            }
            None if field.count > 1 => Representation::Array,
            None if field.ty.aggregate_key().is_some() => Representation::Reference,
            None => Representation::Value,
        }
    }

    /// One element at `offset` (relative to the peer)
    fn load(&self, field: &FieldLayout, offset: u64, repr: Representation) -> BridgeResult<Value> {
        match &field.ty {
            TypeTag::Scalar(kind) => self.peer.read_scalar(offset, *kind),
            TypeTag::Aggregate(key) => {
                let layout = self.state.cache.layout(key)?;
                match repr {
                    Representation::Value => self
                        .state
                        .copy_aggregate(&self.peer, offset, &layout)
                        .map(Value::Struct),
                    Representation::Reference | Representation::Array => {
                        let view = StructObject::new(
                            self.state.clone(),
                            self.peer.clone(),
                            offset,
                            layout,
                        )?;
                        Ok(Value::Struct(view.const_if(self.read_only)))
                    }
                }
            }
            TypeTag::Void => Err(BridgeError::marshal("void field")),
        }
    }

    fn store(&self, field: &FieldLayout, offset: u64, value: &Value) -> BridgeResult<()> {
        store_element(&self.peer, &field.ty, field.stride, offset, value)
    }
}

/// Write one element of type `ty` at `offset` within `peer`
fn store_element(
    peer: &Peer,
    ty: &TypeTag,
    stride: u64,
    offset: u64,
    value: &Value,
) -> BridgeResult<()> {
    match ty {
        TypeTag::Scalar(kind) => peer.write_scalar(offset, *kind, value),
        TypeTag::Aggregate(key) => {
            let source = value.as_struct().ok_or_else(|| {
                BridgeError::marshal(format!("expected {}, got {}", key, value.type_name()))
            })?;
            if source.type_key() != key {
                return Err(BridgeError::marshal(format!(
                    "expected {}, got {}",
                    key,
                    source.type_key()
                )));
            }
            peer.copy_from(offset, &source.peer, source.base, stride)
        }
        TypeTag::Void => Err(BridgeError::marshal("void element")),
    }
}

impl fmt::Debug for StructObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StructObject")
            .field("type", &self.layout.key)
            .field("address", &format_args!("{:#x}", self.address()))
            .field("peer", &self.peer)
            .finish()
    }
}

// ============================================================================
// NativeArray
// ============================================================================

/// Bounds-checked view over consecutive native elements
#[derive(Clone)]
pub struct NativeArray {
    state: Arc<SharedState>,
    peer: Peer,
    offset: u64,
    element: TypeTag,
    stride: u64,
    len: u32,
    read_only: bool,
}

impl NativeArray {
    pub(crate) fn new(
        state: Arc<SharedState>,
        peer: Peer,
        offset: u64,
        element: TypeTag,
        stride: u64,
        len: u32,
    ) -> BridgeResult<Self> {
        let span = stride.checked_mul(len as u64);
        let fits = span
            .and_then(|s| offset.checked_add(s))
            .map(|end| end <= peer.size())
            .unwrap_or(false);
        if !fits {
            return Err(BridgeError::marshal(format!(
                "{} element(s) of {} bytes at offset {} do not fit peer {:#x}",
                len,
                stride,
                offset,
                peer.address()
            )));
        }
        Ok(NativeArray {
            state,
            peer,
            offset,
            element,
            stride,
            len,
            read_only: false,
        })
    }

    pub(crate) fn const_if(mut self, read_only: bool) -> Self {
        self.read_only |= read_only;
        self
    }

    /// Const view or read-only peer
    pub fn is_read_only(&self) -> bool {
        self.read_only || self.peer.is_read_only()
    }

    /// Fail with `ConstViolation` if this view may not be mutated
    pub fn ensure_writable(&self, target: &str) -> BridgeResult<()> {
        if self.is_read_only() {
            return Err(BridgeError::ConstViolation {
                target: target.to_string(),
                address: self.address(),
            });
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.len as usize
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn element(&self) -> &TypeTag {
        &self.element
    }

    pub fn stride(&self) -> u64 {
        self.stride
    }

    pub fn peer(&self) -> &Peer {
        &self.peer
    }

    /// Native address of the first element
    pub fn address(&self) -> u64 {
        self.peer.address() + self.offset
    }

    /// Same peer, offset, element stride and length
    pub fn same_view(&self, other: &NativeArray) -> bool {
        self.peer.same_peer(&other.peer)
            && self.offset == other.offset
            && self.stride == other.stride
            && self.len == other.len
    }

    fn element_offset(&self, index: usize) -> BridgeResult<u64> {
        if index >= self.len() {
            return Err(BridgeError::marshal(format!(
                "index {} out of bounds for array of {} element(s)",
                index, self.len
            )));
        }
        Ok(self.offset + self.stride * index as u64)
    }

    /// Element `index`; aggregates come back as views sharing this peer
    pub fn get(&self, index: usize) -> BridgeResult<Value> {
        let offset = self.element_offset(index)?;
        match &self.element {
            TypeTag::Scalar(kind) => self.peer.read_scalar(offset, *kind),
            TypeTag::Aggregate(key) => {
                let view = self.state.object(self.peer.clone(), offset, key)?;
                Ok(Value::Struct(view.const_if(self.read_only)))
            }
            TypeTag::Void => Err(BridgeError::marshal("void element")),
        }
    }

    /// Overwrite element `index`
    pub fn set(&self, index: usize, value: impl Into<Value>) -> BridgeResult<()> {
        let offset = self.element_offset(index)?;
        self.ensure_writable("array element")?;
        store_element(&self.peer, &self.element, self.stride, offset, &value.into())
    }

    /// Every element, in order
    pub fn to_vec(&self) -> BridgeResult<Vec<Value>> {
        (0..self.len()).map(|i| self.get(i)).collect()
    }
}

impl fmt::Debug for NativeArray {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeArray")
            .field("element", &self.element)
            .field("address", &format_args!("{:#x}", self.address()))
            .field("stride", &self.stride)
            .field("len", &self.len)
            .finish()
    }
}
