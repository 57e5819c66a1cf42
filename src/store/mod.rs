//! Persistence layer: the `Repository` trait with libSQL and in-memory backends.

pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod model;
pub mod traits;

pub use libsql_backend::LibSqlRepository;
pub use memory::InMemoryRepository;
pub use traits::Repository;
