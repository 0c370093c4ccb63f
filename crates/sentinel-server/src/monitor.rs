//! Anomaly polling and the path from a matching rule to a dispatched alert.

pub mod firing;
pub mod scheduler;

pub use firing::{AlertTrigger, FireOutcome, TickSummary};
pub use scheduler::MonitoringScheduler;
