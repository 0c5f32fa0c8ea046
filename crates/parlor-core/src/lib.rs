//! Domain logic and storage port for Parlor.
//!
//! This crate defines the abstract `DocumentStore` port that the
//! infrastructure layer implements, plus every operation of the
//! conversation-history store built on top of it: session CRUD and
//! pagination, append-only message persistence, cascading deletes,
//! retention, stats sampling, and counter repair.
//!
//! It depends only on `parlor-types` -- never on `parlor-infra` or any
//! database/SDK crate.

pub mod cursor;
pub mod keys;
pub mod message;
pub mod repair;
pub mod retention;
pub mod session;
pub mod stats;
pub mod store;
