//! The per-agent, per-user memory service.
//!
//! Content is classified into up to four memory types (working, episodic,
//! semantic, procedural), each backed by a store behind the
//! [`store::MemoryTypeStore`] port. [`service::MemoryService`] resolves
//! instances through [`registry::InstanceRegistry`], fans writes and reads out
//! across the stores, ranks results with [`ranker::rank`], and feeds the
//! background analyzers. [`lifecycle::LifecycleManager`] runs the periodic
//! sweeps.

pub mod background;
pub mod box_store;
pub mod caption;
pub mod classifier;
pub mod evolution;
pub mod instance;
pub mod lifecycle;
pub mod maintenance;
pub mod pattern;
pub mod ranker;
pub mod registry;
pub mod service;
pub mod stats;
pub mod store;
pub mod visual;

#[cfg(test)]
pub(crate) mod testing;
