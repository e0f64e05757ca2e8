//! Extension-point dispatch to the provider owning a storage

pub mod dispatcher;

pub use dispatcher::{DispatchOutcome, ExtensionPointDispatcher};
