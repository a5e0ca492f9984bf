//! Peer registry
//!
//! Tracks native address ranges exposed to managed code: identity (one live
//! [`Peer`] per address), ownership (owned memory is freed exactly once,
//! borrowed memory never), and access (read-only peers reject mutation).

mod handle;
mod registry;

pub use handle::{Access, Attachment, Ownership, Peer};
pub use registry::PeerRegistry;
