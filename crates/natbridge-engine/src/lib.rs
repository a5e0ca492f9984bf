//! natbridge engine
//!
//! Runtime bridge between managed code and native memory and routines:
//! - **Layout**: offsets, strides and sizes of declared aggregates (`layout`)
//! - **Metadata cache**: compute-once, read-many per-type metadata (`cache`)
//! - **Peers**: address identity, ownership and release (`peer`)
//! - **Uncertainty**: memoized choice among candidate representations (`uncertainty`)
//! - **Dispatch**: virtual/const/operator-aware native calls (`dispatch`)
//! - **Proxies**: managed views of native aggregates and arrays (`object`)
//!
//! # Example
//!
//! ```rust,ignore
//! use natbridge_engine::{Bridge, BridgeOptions, Value};
//! use natbridge_sdk::{DeclaredType, FieldDescriptor, ScalarKind};
//!
//! let bridge = Bridge::new(BridgeOptions::default());
//! let key = bridge.declare(
//!     DeclaredType::new("Point")
//!         .field(FieldDescriptor::scalar("x", 0, ScalarKind::F64))
//!         .field(FieldDescriptor::scalar("y", 1, ScalarKind::F64)),
//! )?;
//!
//! let point = bridge.instantiate(&key)?;
//! point.set("x", 1.5)?;
//! assert_eq!(point.get("x")?, Value::F64(1.5));
//! ```

#![warn(rust_2018_idioms)]

pub mod bridge;
pub mod cache;
pub mod config;
pub mod defaults;
pub mod dispatch;
pub mod layout;
pub mod memory;
pub mod native;
pub mod object;
pub mod peer;
pub mod uncertainty;
pub mod value;

mod shared_state;

pub use bridge::Bridge;
pub use cache::{MetadataCache, TypeCatalog, TypeMetadata};
pub use config::{BridgeOptions, ConfigError};
pub use dispatch::{CallConvention, CallTarget, NativeEntry, PeerTypeSource, RuntimeTypeSource};
pub use layout::{compute_layout, AggregateLayout, FieldLayout};
pub use memory::{NativeAllocator, SystemAllocator};
pub use native::{Library, LoadError};
pub use object::{NativeArray, StructObject};
pub use peer::{Access, Ownership, Peer, PeerRegistry};
pub use uncertainty::{NativeShape, SiteKey, SitePosition, UncertaintyChoice, UncertaintyResolver};
pub use value::Value;

pub use natbridge_sdk as sdk;
