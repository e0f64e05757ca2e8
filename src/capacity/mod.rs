//! Capacity Accounting
//!
//! Scope selection, the first-write-wins merge, the version-checked row
//! updater, and the intake queue feeding it.

pub mod events;
pub mod intake;
pub mod scope;
pub mod updater;

pub use events::CapacityEvent;
pub use intake::{
    CapacityIntake, CapacityReport, CapacityReportSender, CapacityReportSink, IntakeStats,
};
pub use scope::CapacityScope;
pub use updater::{
    merge_capacity, CapacityUpdateSummary, CapacityUpdater, CapacityUpdaterConfig, RowOutcome,
};
