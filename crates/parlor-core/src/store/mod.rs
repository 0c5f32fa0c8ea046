//! Storage port for the conversation store.
//!
//! This module defines the `DocumentStore` trait that the infrastructure
//! layer implements, together with the tagged record schema shared by every
//! backend.

pub mod document;

pub use document::{
    AttributeUpdate, DocumentStore, QueryPage, RecordKey, ScanOrder, StoredRecord,
};
