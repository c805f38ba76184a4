//! Memory orchestration and port trait definitions for Engram.
//!
//! This crate defines the "ports" (store, maintenance, pattern discovery and
//! captioning traits) that the infrastructure layer implements. It depends
//! only on `engram-types` -- never on `engram-infra` or any database/IO crate.

pub mod memory;
