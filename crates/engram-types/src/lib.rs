//! Shared domain types for Engram.
//!
//! This crate contains the core domain types of the per-agent, per-user
//! memory service: memory categories, content envelopes, request/response
//! shapes, analyzer records, configuration, and their error types.
//!
//! Zero infrastructure dependencies -- only serde, uuid, chrono, thiserror.

pub mod analysis;
pub mod config;
pub mod envelope;
pub mod error;
pub mod memory;
pub mod stats;
pub mod visual;
