//! Call dispatcher
//!
//! Binds declared call targets to native entry points and invokes them:
//! - `target`: validated targets and their calling conventions
//! - `vtable`: fixed entries, per-type slot tables, runtime type probing
//! - `marshal`: managed values to argument words and back
//! - `dispatcher`: the end-to-end invoke

mod dispatcher;
mod marshal;
mod target;
mod vtable;

pub(crate) use dispatcher::invoke;
pub use marshal::default_representation;
pub use target::{CallConvention, CallTarget};
pub use vtable::{DispatchTables, NativeEntry, PeerTypeSource, RuntimeTypeSource, VTable};
