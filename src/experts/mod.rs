//! Expert management
//!
//! CRUD over the record store with read caching and ledger cleanup.

pub mod manager;

pub use manager::ExpertManager;
