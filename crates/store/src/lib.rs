//! Message store implementations for Rivet.

pub mod file_backend;
pub mod in_memory;
pub mod transfer;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(test)]
mod testing;

pub use file_backend::FileStore;
pub use in_memory::InMemoryStore;
pub use transfer::{export_session, import_session};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStore;
