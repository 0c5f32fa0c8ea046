//! Shared domain types for Parlor.
//!
//! This crate contains the core domain types used across the Parlor
//! conversation-history store: OwnerScope, ChatSession, ChatMessage, and
//! their associated error types.
//!
//! Zero infrastructure dependencies -- only serde, chrono, thiserror.

pub mod chat;
pub mod error;
pub mod owner;
pub mod stats;
