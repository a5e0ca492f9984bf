//! natbridge SDK - descriptor types for native struct and call bridging
//!
//! This crate holds the immutable metadata that binding generators hand to
//! the bridge: declared types, field descriptors, call-target descriptors
//! with their virtuality/constness/operator attributes, and uncertainty
//! option sets. It also defines the error taxonomy shared with
//! `natbridge-engine`. Nothing here touches native memory.
//!
//! # Example
//!
//! ```ignore
//! use natbridge_sdk::{DeclaredType, FieldDescriptor, ScalarKind};
//!
//! let point = DeclaredType::new("Point")
//!     .field(FieldDescriptor::scalar("x", 0, ScalarKind::F64))
//!     .field(FieldDescriptor::scalar("y", 1, ScalarKind::F64));
//! ```

#![warn(missing_docs)]

pub mod descriptor;
pub mod error;
pub mod operator;
pub mod types;
pub mod uncertain;

pub use descriptor::{
    CallTargetDescriptor, DeclaredType, FieldDescriptor, ParamDescriptor, Passing, PointeeCount,
    ReturnDescriptor, TargetKind, Virtuality,
};
pub use error::{BridgeError, BridgeResult, LayoutError};
pub use operator::{Arity, OperatorKind};
pub use types::{ScalarKind, TypeKey, TypeTag};
pub use uncertain::{Representation, UncertainSpec};
