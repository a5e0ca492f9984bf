//! Managed-side values
//!
//! `Value` is what callers hand to and receive from the bridge. Scalars carry
//! their exact native kind so that marshaling never coerces silently: an
//! `I32` field only accepts `Value::I32`.

use natbridge_sdk::{BridgeError, BridgeResult, ScalarKind};

use crate::object::{NativeArray, StructObject};

/// A managed-side value
#[derive(Debug, Clone)]
pub enum Value {
    /// Result of a void call
    Void,
    /// Null pointer
    Null,
    Bool(bool),
    I8(i8),
    U8(u8),
    I16(i16),
    U16(u16),
    I32(i32),
    U32(u32),
    I64(i64),
    U64(u64),
    F32(f32),
    F64(f64),
    /// Raw native address with no proxy
    Pointer(u64),
    /// Proxy for a native aggregate
    Struct(StructObject),
    /// View over native elements
    Array(NativeArray),
    /// Managed list, copied into native memory when marshaled
    List(Vec<Value>),
}

impl Value {
    /// Short name used in diagnostics
    pub fn type_name(&self) -> &'static str {
        match self {
            Value::Void => "void",
            Value::Null => "null",
            Value::Bool(_) => "bool",
            Value::I8(_) => "i8",
            Value::U8(_) => "u8",
            Value::I16(_) => "i16",
            Value::U16(_) => "u16",
            Value::I32(_) => "i32",
            Value::U32(_) => "u32",
            Value::I64(_) => "i64",
            Value::U64(_) => "u64",
            Value::F32(_) => "f32",
            Value::F64(_) => "f64",
            Value::Pointer(_) => "pointer",
            Value::Struct(_) => "struct",
            Value::Array(_) => "array",
            Value::List(_) => "list",
        }
    }

    /// Widen a scalar to its 64-bit native bit pattern.
    ///
    /// Fails with a marshal error if the value is not exactly of `kind`.
    pub fn to_bits(&self, kind: ScalarKind) -> BridgeResult<u64> {
        let bits = match (kind, self) {
            (ScalarKind::Bool, Value::Bool(b)) => *b as u64,
            (ScalarKind::I8, Value::I8(v)) => *v as i64 as u64,
            (ScalarKind::U8, Value::U8(v)) => *v as u64,
            (ScalarKind::I16, Value::I16(v)) => *v as i64 as u64,
            (ScalarKind::U16, Value::U16(v)) => *v as u64,
            (ScalarKind::I32, Value::I32(v)) => *v as i64 as u64,
            (ScalarKind::U32, Value::U32(v)) => *v as u64,
            (ScalarKind::I64, Value::I64(v)) => *v as u64,
            (ScalarKind::U64, Value::U64(v)) => *v,
            (ScalarKind::F32, Value::F32(v)) => v.to_bits() as u64,
            (ScalarKind::F64, Value::F64(v)) => v.to_bits(),
            (ScalarKind::Pointer, Value::Pointer(addr)) => *addr,
            (ScalarKind::Pointer, Value::Null) => 0,
            (ScalarKind::Pointer, Value::Struct(obj)) => obj.address(),
            (ScalarKind::Pointer, Value::Array(arr)) => arr.address(),
            (kind, other) => {
                return Err(BridgeError::marshal(format!(
                    "expected {}, got {}",
                    kind.name(),
                    other.type_name()
                )))
            }
        };
        Ok(bits)
    }

    /// Narrow a 64-bit native bit pattern to a scalar of `kind`
    pub fn from_bits(kind: ScalarKind, bits: u64) -> Value {
        match kind {
            ScalarKind::Bool => Value::Bool(bits & 0xFF != 0),
            ScalarKind::I8 => Value::I8(bits as i8),
            ScalarKind::U8 => Value::U8(bits as u8),
            ScalarKind::I16 => Value::I16(bits as i16),
            ScalarKind::U16 => Value::U16(bits as u16),
            ScalarKind::I32 => Value::I32(bits as i32),
            ScalarKind::U32 => Value::U32(bits as u32),
            ScalarKind::I64 => Value::I64(bits as i64),
            ScalarKind::U64 => Value::U64(bits),
            ScalarKind::F32 => Value::F32(f32::from_bits(bits as u32)),
            ScalarKind::F64 => Value::F64(f64::from_bits(bits)),
            ScalarKind::Pointer if bits == 0 => Value::Null,
            ScalarKind::Pointer => Value::Pointer(bits),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            Value::I32(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::I64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_u64(&self) -> Option<u64> {
        match self {
            Value::U64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::F64(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_struct(&self) -> Option<&StructObject> {
        match self {
            Value::Struct(obj) => Some(obj),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&NativeArray> {
        match self {
            Value::Array(arr) => Some(arr),
            _ => None,
        }
    }
}

impl PartialEq for Value {
    /// Scalars compare by value; proxies compare by native identity.
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Void, Value::Void) | (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::I8(a), Value::I8(b)) => a == b,
            (Value::U8(a), Value::U8(b)) => a == b,
            (Value::I16(a), Value::I16(b)) => a == b,
            (Value::U16(a), Value::U16(b)) => a == b,
            (Value::I32(a), Value::I32(b)) => a == b,
            (Value::U32(a), Value::U32(b)) => a == b,
            (Value::I64(a), Value::I64(b)) => a == b,
            (Value::U64(a), Value::U64(b)) => a == b,
            (Value::F32(a), Value::F32(b)) => a == b,
            (Value::F64(a), Value::F64(b)) => a == b,
            (Value::Pointer(a), Value::Pointer(b)) => a == b,
            (Value::Struct(a), Value::Struct(b)) => a.same_object(b),
            (Value::Array(a), Value::Array(b)) => a.same_view(b),
            (Value::List(a), Value::List(b)) => a == b,
            _ => false,
        }
    }
}

macro_rules! impl_from_scalar {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for Value {
                fn from(v: $ty) -> Self {
                    Value::$variant(v)
                }
            }
        )*
    };
}

impl_from_scalar!(
    bool => Bool,
    i8 => I8,
    u8 => U8,
    i16 => I16,
    u16 => U16,
    i32 => I32,
    u32 => U32,
    i64 => I64,
    u64 => U64,
    f32 => F32,
    f64 => F64,
);

impl From<StructObject> for Value {
    fn from(obj: StructObject) -> Self {
        Value::Struct(obj)
    }
}

impl From<Vec<Value>> for Value {
    fn from(list: Vec<Value>) -> Self {
        Value::List(list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bits_roundtrip_preserves_sign() {
        let bits = Value::I32(-5).to_bits(ScalarKind::I32).unwrap();
        assert_eq!(Value::from_bits(ScalarKind::I32, bits), Value::I32(-5));

        let bits = Value::F32(1.5).to_bits(ScalarKind::F32).unwrap();
        assert_eq!(bits, 1.5f32.to_bits() as u64);
    }

    #[test]
    fn test_no_silent_coercion() {
        let err = Value::I64(1).to_bits(ScalarKind::I32).unwrap_err();
        assert!(matches!(err, BridgeError::Marshal(_)));
        assert!(Value::I32(1).to_bits(ScalarKind::F64).is_err());
    }

    #[test]
    fn test_null_pointer() {
        assert_eq!(Value::Null.to_bits(ScalarKind::Pointer).unwrap(), 0);
        assert!(Value::from_bits(ScalarKind::Pointer, 0).is_null());
        assert_eq!(
            Value::from_bits(ScalarKind::Pointer, 0x1000),
            Value::Pointer(0x1000)
        );
    }
}
