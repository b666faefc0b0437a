//! Command implementations for the CLI
//!
//! - start: Start the server with the log pipeline installed
//! - config: Configuration display and validation

pub mod config;
pub mod start;
