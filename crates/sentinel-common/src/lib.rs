//! Shared domain types for the sentinel alerting workspace.

pub mod id;
pub mod types;

#[cfg(test)]
mod tests;
