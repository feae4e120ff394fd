//! Adapters that live inside the domain crate for convenience.
//!
//! The in-memory stores back unit tests and `STORAGE_PROVIDER=memory` runs.
//! Durable adapters (SQLite) live in separate crates.

pub mod memory_repo;
