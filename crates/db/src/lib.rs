//! `db` crate: pure persistence layer.
//!
//! Provides typed row structs, the [`Store`]/[`Transaction`] repository
//! contract, and an in-memory transactional backend. No business logic lives
//! here.

pub mod error;
pub mod memory;
pub mod models;
pub mod store;

pub use error::DbError;
pub use memory::MemoryStore;
pub use store::{
    HistoryRepository, InstanceRepository, ProcessRepository, Store, TaskRepository, Transaction,
};
