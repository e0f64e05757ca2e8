//! Storage Type Registry Module
//!
//! Maps primary storage type identifiers to capability descriptors and
//! provider factories.

pub mod type_registry;

pub use type_registry::*;
