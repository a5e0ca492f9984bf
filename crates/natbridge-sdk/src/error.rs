//! Error types shared by the descriptor crate and the bridging engine

use crate::types::TypeKey;

/// Result type for bridge operations
pub type BridgeResult<T> = Result<T, BridgeError>;

/// Malformed descriptor sequences and declarations.
///
/// Layout failures are cached permanently by the metadata cache, so the type
/// is `Clone` and every later lookup observes the same failure.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LayoutError {
    /// Two fields of one type share an order index
    #[error("{key}: duplicate field order {order}")]
    DuplicateOrder {
        /// Declared type
        key: TypeKey,
        /// Repeated order index
        order: u32,
    },

    /// Order indices do not form the sequence 0..n
    #[error("{key}: non-contiguous field order, expected {expected}, found {found}")]
    NonContiguousOrder {
        /// Declared type
        key: TypeKey,
        /// Next index the sequence required
        expected: u32,
        /// Index actually present
        found: u32,
    },

    /// A field declares zero elements
    #[error("{key}: field {order} has element count 0")]
    ZeroCount {
        /// Declared type
        key: TypeKey,
        /// Offending field
        order: u32,
    },

    /// A field is declared with the void type
    #[error("{key}: field {order} has void type")]
    VoidField {
        /// Declared type
        key: TypeKey,
        /// Offending field
        order: u32,
    },

    /// Offsets or total size do not fit in 64 bits
    #[error("{key}: size overflows at field {order}")]
    SizeOverflow {
        /// Declared type
        key: TypeKey,
        /// Field whose placement overflowed
        order: u32,
    },

    /// Declared alignment is not a power of two
    #[error("{key}: alignment {align} is not a power of two")]
    InvalidAlignment {
        /// Declared type
        key: TypeKey,
        /// Declared alignment
        align: u32,
    },

    /// A nested aggregate refers to a type that was never declared
    #[error("unknown declared type {0}")]
    UnknownType(TypeKey),

    /// A by-value aggregate contains itself
    #[error("{key}: aggregate contains itself by value (via {path})")]
    RecursiveAggregate {
        /// Declared type
        key: TypeKey,
        /// Containment chain that closes the cycle
        path: String,
    },

    /// An uncertainty annotation is malformed
    #[error("invalid uncertainty spec: {0}")]
    InvalidUncertainSpec(String),

    /// A call target descriptor is malformed
    #[error("{key}: invalid call target {target}: {reason}")]
    InvalidTarget {
        /// Declared type
        key: TypeKey,
        /// Target name
        target: String,
        /// What is wrong with it
        reason: String,
    },

    /// A type key was declared twice with different content
    #[error("conflicting declaration for {0}")]
    ConflictingDeclaration(TypeKey),

    /// A descriptor document could not be decoded
    #[error("malformed descriptor document: {0}")]
    MalformedDocument(String),
}

/// Errors surfaced by every bridge operation
#[derive(Debug, Clone, thiserror::Error)]
pub enum BridgeError {
    /// Malformed metadata
    #[error(transparent)]
    Layout(#[from] LayoutError),

    /// Conflicting registration for one native address
    #[error("aliasing conflict at {address:#x}: {reason}")]
    Aliasing {
        /// Native address
        address: u64,
        /// Why the registration conflicts
        reason: String,
    },

    /// An owned peer was released twice
    #[error("peer at {address:#x} released twice")]
    DoubleRelease {
        /// Native address
        address: u64,
    },

    /// Memory of a released peer was accessed
    #[error("peer at {address:#x} used after release")]
    UseAfterRelease {
        /// Native address
        address: u64,
    },

    /// A value's shape does not match its descriptor
    #[error("marshal error: {0}")]
    Marshal(String),

    /// A mutating operation was bound against a read-only peer
    #[error("const violation: {target} cannot mutate read-only peer at {address:#x}")]
    ConstViolation {
        /// Call target or field being bound
        target: String,
        /// Receiver address
        address: u64,
    },

    /// No resolvable native entry point
    #[error("dispatch error: {0}")]
    Dispatch(String),

    /// Native library or symbol could not be loaded
    #[error("load error: {0}")]
    Load(String),
}

impl BridgeError {
    /// Shorthand for a marshal error
    pub fn marshal(msg: impl Into<String>) -> Self {
        BridgeError::Marshal(msg.into())
    }

    /// Shorthand for a dispatch error
    pub fn dispatch(msg: impl Into<String>) -> Self {
        BridgeError::Dispatch(msg.into())
    }

    /// Shorthand for an aliasing error
    pub fn aliasing(address: u64, reason: impl Into<String>) -> Self {
        BridgeError::Aliasing {
            address,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_error_converts() {
        let err: BridgeError = LayoutError::UnknownType(TypeKey::new("Missing")).into();
        assert!(matches!(err, BridgeError::Layout(LayoutError::UnknownType(_))));
        assert_eq!(err.to_string(), "unknown declared type Missing");
    }

    #[test]
    fn test_address_formatting() {
        let err = BridgeError::DoubleRelease { address: 0x1000 };
        assert_eq!(err.to_string(), "peer at 0x1000 released twice");
    }
}
