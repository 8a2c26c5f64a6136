//! Persistent metadata storage.

pub mod sqlite;

pub use sqlite::{MetadataStore, Repository};
