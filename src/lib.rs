pub mod cli;
pub mod config;
pub mod harness;
pub mod logging;
pub mod store;
pub mod sweep;
pub mod types;
