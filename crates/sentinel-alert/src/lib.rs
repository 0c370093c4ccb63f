//! Alert rule evaluation, rate limiting and the alert lifecycle.
//!
//! Anomaly records produced by the external model are matched against
//! enabled rules in [`engine`]. Every match passes through the
//! [`rate_limit::RateLimiter`] before an [`Alert`](sentinel_common::types::Alert)
//! is built with [`builder`]. Operator actions on existing alerts go through
//! the transitions in [`lifecycle`].

pub mod builder;
pub mod engine;
pub mod lifecycle;
pub mod rate_limit;

#[cfg(test)]
mod tests;
