//! Infrastructure layer for Engram.
//!
//! Implementations of the ports defined in `engram-core`: SQLite-backed
//! memory stores, maintenance queries and pattern discovery, the Anthropic
//! screenshot captioner, and the `config.toml` loader.

pub mod caption;
pub mod components;
pub mod config;
pub mod sqlite;
