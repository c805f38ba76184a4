//! REST API handler modules.

pub mod memory;
pub mod system;
