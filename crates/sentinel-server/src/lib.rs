pub mod api;
pub mod app;
pub mod config;
pub mod logging;
pub mod monitor;
pub mod openapi;
pub mod rule_seed;
pub mod state;
