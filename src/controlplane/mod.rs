//! Primary Storage Control Plane
//!
//! Coordinates the type registry, built-in providers, capacity aggregation
//! and the API surface.

pub mod api;
pub mod capacity_query;
pub mod orchestrator;
pub mod providers;

pub use api::*;
pub use capacity_query::*;
pub use orchestrator::*;
pub use providers::*;
