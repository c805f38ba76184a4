//! Screenshot captioning providers.

pub mod anthropic;
