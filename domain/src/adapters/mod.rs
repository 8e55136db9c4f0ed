//! In-process adapters that live inside the domain crate for convenience.
//!
//! Used by unit tests and by the server's `memory` storage mode. The durable
//! adapter lives in the `sqlite-adapter` crate.

pub mod memory_repo;
