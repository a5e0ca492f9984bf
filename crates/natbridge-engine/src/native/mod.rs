//! Native symbol loading

pub mod loader;

pub use loader::{Library, LoadError};
