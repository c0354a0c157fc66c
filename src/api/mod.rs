//! Backend API access: HTTP adapter, error taxonomy, cache keys, and the
//! cached resource layer.

pub mod client;
pub mod error;
pub mod keys;
pub mod resources;
pub mod types;
