//! API Module
//!
//! REST surface for primary storage lifecycle, capacity reports and
//! capacity queries.

pub mod server;
pub mod rest;

pub use server::*;
pub use rest::*;
