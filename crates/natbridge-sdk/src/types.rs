//! Type identities and element type tags

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Identity of a declared native type.
///
/// Cheap to clone; equality and hashing follow the type name.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct TypeKey(Arc<str>);

impl TypeKey {
    /// Create a key from a type name
    pub fn new(name: impl AsRef<str>) -> Self {
        TypeKey(Arc::from(name.as_ref()))
    }

    /// Type name
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TypeKey {
    fn from(s: String) -> Self {
        TypeKey(Arc::from(s))
    }
}

impl From<&str> for TypeKey {
    fn from(s: &str) -> Self {
        TypeKey::new(s)
    }
}

impl From<TypeKey> for String {
    fn from(key: TypeKey) -> Self {
        key.0.to_string()
    }
}

impl fmt::Debug for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TypeKey({})", self.0)
    }
}

impl fmt::Display for TypeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Scalar element kinds with a fixed size table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScalarKind {
    /// C `bool`, one byte
    Bool,
    /// `int8_t`
    I8,
    /// `uint8_t`
    U8,
    /// `int16_t`
    I16,
    /// `uint16_t`
    U16,
    /// `int32_t`
    I32,
    /// `uint32_t`
    U32,
    /// `int64_t`
    I64,
    /// `uint64_t`
    U64,
    /// `float`
    F32,
    /// `double`
    F64,
    /// Opaque native address, platform width
    Pointer,
}

impl ScalarKind {
    /// Size in bytes
    pub const fn size(self) -> u64 {
        match self {
            ScalarKind::Bool | ScalarKind::I8 | ScalarKind::U8 => 1,
            ScalarKind::I16 | ScalarKind::U16 => 2,
            ScalarKind::I32 | ScalarKind::U32 | ScalarKind::F32 => 4,
            ScalarKind::I64 | ScalarKind::U64 | ScalarKind::F64 => 8,
            ScalarKind::Pointer => std::mem::size_of::<usize>() as u64,
        }
    }

    /// Natural alignment in bytes
    pub const fn align(self) -> u64 {
        match self {
            ScalarKind::Pointer => std::mem::align_of::<usize>() as u64,
            ScalarKind::I64 | ScalarKind::U64 => std::mem::align_of::<u64>() as u64,
            ScalarKind::F64 => std::mem::align_of::<f64>() as u64,
            other => other.size(),
        }
    }

    /// Short name used in diagnostics
    pub const fn name(self) -> &'static str {
        match self {
            ScalarKind::Bool => "bool",
            ScalarKind::I8 => "i8",
            ScalarKind::U8 => "u8",
            ScalarKind::I16 => "i16",
            ScalarKind::U16 => "u16",
            ScalarKind::I32 => "i32",
            ScalarKind::U32 => "u32",
            ScalarKind::I64 => "i64",
            ScalarKind::U64 => "u64",
            ScalarKind::F32 => "f32",
            ScalarKind::F64 => "f64",
            ScalarKind::Pointer => "pointer",
        }
    }
}

/// Element type of a field, parameter, or return slot
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TypeTag {
    /// No value (returns only)
    Void,
    /// Fixed-size scalar
    Scalar(ScalarKind),
    /// Another declared aggregate
    Aggregate(TypeKey),
}

impl TypeTag {
    /// Shorthand for an aggregate tag
    pub fn aggregate(name: impl AsRef<str>) -> Self {
        TypeTag::Aggregate(TypeKey::new(name))
    }

    /// Scalar kind, if this is a scalar
    pub fn scalar(&self) -> Option<ScalarKind> {
        match self {
            TypeTag::Scalar(kind) => Some(*kind),
            _ => None,
        }
    }

    /// Aggregate key, if this is an aggregate
    pub fn aggregate_key(&self) -> Option<&TypeKey> {
        match self {
            TypeTag::Aggregate(key) => Some(key),
            _ => None,
        }
    }

    /// Whether this is `Void`
    pub fn is_void(&self) -> bool {
        matches!(self, TypeTag::Void)
    }
}

impl fmt::Display for TypeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TypeTag::Void => f.write_str("void"),
            TypeTag::Scalar(kind) => f.write_str(kind.name()),
            TypeTag::Aggregate(key) => write!(f, "{}", key),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_sizes() {
        assert_eq!(ScalarKind::I32.size(), 4);
        assert_eq!(ScalarKind::F64.size(), 8);
        assert_eq!(ScalarKind::Bool.size(), 1);
        assert_eq!(ScalarKind::Pointer.size(), std::mem::size_of::<usize>() as u64);
    }

    #[test]
    fn test_type_key_identity() {
        let a = TypeKey::new("NG_I_Struct");
        let b: TypeKey = "NG_I_Struct".into();
        assert_eq!(a, b);
        assert_eq!(a.to_string(), "NG_I_Struct");
    }

    #[test]
    fn test_type_tag_json() {
        let tag: TypeTag = serde_json::from_str(r#"{"aggregate":"Point"}"#).unwrap();
        assert_eq!(tag, TypeTag::aggregate("Point"));

        let tag: TypeTag = serde_json::from_str(r#"{"scalar":"i64"}"#).unwrap();
        assert_eq!(tag.scalar(), Some(ScalarKind::I64));
    }
}
