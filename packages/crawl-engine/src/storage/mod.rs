//! [`Storage`](crate::traits::storage::Storage) backends.
//!
//! - [`FileStorage`]: one JSON file per URL under a root directory
//! - [`PostgresStorage`]: one row per URL in `crawled_data`
//!
//! An in-memory store for tests lives in [`crate::testing::MemoryStorage`].

pub mod file;
pub mod postgres;

pub use file::FileStorage;
pub use postgres::PostgresStorage;
