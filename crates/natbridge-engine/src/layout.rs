//! Layout engine
//!
//! Computes byte offsets, element strides, and total size of a declared
//! aggregate from its field descriptors. [`compute_layout`] is a pure
//! function of its inputs; caching is the metadata cache's job.

use natbridge_sdk::{
    BridgeError, BridgeResult, FieldDescriptor, LayoutError, TypeKey, TypeTag, UncertainSpec,
};

use crate::defaults::MAX_DECLARED_ALIGN;
use crate::memory::align_up;

/// Computed placement of one field
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldLayout {
    /// Field name
    pub name: String,
    /// Layout order
    pub order: u32,
    /// Element type
    pub ty: TypeTag,
    /// Byte offset from the aggregate base
    pub offset: u64,
    /// Distance between consecutive elements (the element size)
    pub stride: u64,
    /// Element alignment
    pub align: u64,
    /// Element count
    pub count: u32,
    /// Getter bound
    pub getter: bool,
    /// Setter bound
    pub setter: bool,
    /// Declared representation ambiguity
    pub uncertain: Option<UncertainSpec>,
}

impl FieldLayout {
    /// Bytes occupied by all elements
    pub fn span(&self) -> u64 {
        self.stride * self.count as u64
    }

    /// Offset of element `index`, bounds-checked against the declared count
    pub fn element_offset(&self, index: u32) -> BridgeResult<u64> {
        if index >= self.count {
            return Err(BridgeError::marshal(format!(
                "index {} out of bounds for field '{}' with {} element(s)",
                index, self.name, self.count
            )));
        }
        Ok(self.offset + self.stride * index as u64)
    }
}

/// Layout of one declared aggregate; immutable once computed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregateLayout {
    /// Declared type
    pub key: TypeKey,
    /// Fields in order-index order
    pub fields: Vec<FieldLayout>,
    /// Total size including tail padding
    pub size: u64,
    /// Overall alignment
    pub align: u64,
}

impl AggregateLayout {
    /// Field by order index
    pub fn field(&self, order: u32) -> BridgeResult<&FieldLayout> {
        self.fields.get(order as usize).ok_or_else(|| {
            BridgeError::marshal(format!("{} has no field with order {}", self.key, order))
        })
    }

    /// Field by name
    pub fn field_by_name(&self, name: &str) -> BridgeResult<&FieldLayout> {
        self.fields
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| BridgeError::marshal(format!("{} has no field '{}'", self.key, name)))
    }
}

/// Compute the layout of `key` from its field descriptors.
///
/// `nested` returns `(size, align)` of an embedded aggregate type.
pub fn compute_layout<F>(
    key: &TypeKey,
    descriptors: &[FieldDescriptor],
    declared_align: Option<u32>,
    mut nested: F,
) -> Result<AggregateLayout, LayoutError>
where
    F: FnMut(&TypeKey) -> Result<(u64, u64), LayoutError>,
{
    let mut sorted: Vec<&FieldDescriptor> = descriptors.iter().collect();
    sorted.sort_by_key(|d| d.order);

    for (expected, d) in sorted.iter().enumerate() {
        let expected = expected as u32;
        if d.order != expected {
            if expected > 0 && sorted[expected as usize - 1].order == d.order {
                return Err(LayoutError::DuplicateOrder {
                    key: key.clone(),
                    order: d.order,
                });
            }
            return Err(LayoutError::NonContiguousOrder {
                key: key.clone(),
                expected,
                found: d.order,
            });
        }
    }

    let mut fields = Vec::with_capacity(sorted.len());
    let mut running: u64 = 0;
    let mut max_align: u64 = 1;

    for d in sorted {
        if d.count == 0 {
            return Err(LayoutError::ZeroCount {
                key: key.clone(),
                order: d.order,
            });
        }
        let (size, align) = match &d.ty {
            TypeTag::Void => {
                return Err(LayoutError::VoidField {
                    key: key.clone(),
                    order: d.order,
                })
            }
            TypeTag::Scalar(kind) => (kind.size(), kind.align()),
            TypeTag::Aggregate(inner) => nested(inner)?,
        };

        let overflow = || LayoutError::SizeOverflow {
            key: key.clone(),
            order: d.order,
        };
        let offset = align_up(running, align).ok_or_else(overflow)?;
        running = size
            .checked_mul(d.count as u64)
            .and_then(|span| offset.checked_add(span))
            .ok_or_else(overflow)?;
        max_align = max_align.max(align);

        fields.push(FieldLayout {
            name: d.name.clone(),
            order: d.order,
            ty: d.ty.clone(),
            offset,
            stride: size,
            align,
            count: d.count,
            getter: d.getter,
            setter: d.setter,
            uncertain: d.uncertain.clone(),
        });
    }

    if let Some(align) = declared_align {
        let align = align as u64;
        if !align.is_power_of_two() || align > MAX_DECLARED_ALIGN {
            return Err(LayoutError::InvalidAlignment {
                key: key.clone(),
                align: align as u32,
            });
        }
        max_align = max_align.max(align);
    }

    let size = align_up(running, max_align).ok_or_else(|| LayoutError::SizeOverflow {
        key: key.clone(),
        order: fields.last().map(|f| f.order).unwrap_or(0),
    })?;

    Ok(AggregateLayout {
        key: key.clone(),
        fields,
        size,
        align: max_align,
    })
}
