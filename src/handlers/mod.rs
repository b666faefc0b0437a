pub mod health;
pub mod log_level;
pub mod metrics_handler;
