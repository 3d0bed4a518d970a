//! SQLite persistence: schema access, row codecs and the collaborator
//! implementation backed by them.
//!
//! - `model`: row shapes and text codecs.
//! - `repo`: SQL-only functions over a pool.
//! - `store`: [`SqliteStore`], the trait implementation the engine consumes.

pub mod model;
pub mod repo;
pub mod store;

pub use repo::*;
pub use store::SqliteStore;
