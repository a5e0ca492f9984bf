//! Default constants for bridge configuration.

/// Zero-fill memory the bridge allocates for owned peers.
pub const DEFAULT_ZERO_FILL: bool = true;

/// Minimum alignment requested from the native allocator.
pub const DEFAULT_MIN_ALLOC_ALIGN: u64 = 16;

/// Reject owned registrations that overlap a live owned peer.
pub const DEFAULT_STRICT_ALIASING: bool = true;

/// Largest alignment a declared aggregate may request.
pub const MAX_DECLARED_ALIGN: u64 = 4096;

/// Environment variable prefix for [`crate::BridgeOptions::from_env`].
pub const ENV_PREFIX: &str = "NATBRIDGE_";
