//! Domain layer - Core records, hook interfaces and port definitions
//!
//! This module defines the data model and the traits (ports) that storage
//! providers implement, following hexagonal architecture principles.

pub mod hooks;
pub mod model;
pub mod ports;

pub use hooks::*;
pub use model::*;
pub use ports::*;
