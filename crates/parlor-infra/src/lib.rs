//! Infrastructure layer for Parlor.
//!
//! Contains implementations of the `DocumentStore` port defined in
//! `parlor-core`: an embedded in-memory engine (tests, local development)
//! and a DynamoDB-backed engine for deployment.

pub mod dynamo;
pub mod memory;
