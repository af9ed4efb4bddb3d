//! # Metadata index
//!
//! A SQLite database (`meta.db`) recording which blobs are committed to a
//! content store, along with their labels. [`MetadataDb::content_store`] wraps
//! a store so that all reads and writes go through the index.

mod db;
mod error;
mod store;

pub use db::{MetadataDb, DB_FILE_MODE};
pub use error::MetadataError;
pub use store::MetadataStore;
